use log::*;
use std::future::Future;
use tokio::task::JoinHandle;

/// Process exit status when the refresh task is gone.
pub const EXIT_REFRESH_DIED: i32 = 2;

#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Shutdown,
    RefreshDied(String),
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Shutdown => 0,
            Outcome::RefreshDied(_) => EXIT_REFRESH_DIED,
        }
    }
}

/// Wait until shutdown is requested or the refresh task ends.
///
/// The refresh task is meant to run forever; if it ends, served values would
/// freeze silently, so that is reported as fatal.
pub async fn supervise<T>(refresh: JoinHandle<T>, shutdown: impl Future<Output = ()>) -> Outcome {
    tokio::select! {
        res = refresh => {
            let reason = match res {
                Ok(_) => "refresh task returned".to_string(),
                Err(e) if e.is_panic() => format!("refresh task panicked: {e}"),
                Err(e) => format!("refresh task cancelled: {e}"),
            };
            error!("{reason}");
            Outcome::RefreshDied(reason)
        }
        _ = shutdown => {
            info!("Shutdown requested");
            Outcome::Shutdown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn shutdown_wins_while_refresh_runs() {
        let refresh = tokio::spawn(std::future::pending::<()>());
        let outcome = supervise(refresh, async {}).await;
        assert_eq!(outcome, Outcome::Shutdown);
        assert_eq!(outcome.exit_code(), 0);
    }

    #[tokio::test]
    async fn panicking_refresh_is_fatal() {
        let refresh = tokio::spawn(async { panic!("boom") });
        let outcome = supervise(refresh, std::future::pending()).await;
        assert!(matches!(outcome, Outcome::RefreshDied(ref r) if r.contains("panicked")));
        assert_eq!(outcome.exit_code(), EXIT_REFRESH_DIED);
    }

    #[tokio::test]
    async fn returning_refresh_is_fatal() {
        let refresh = tokio::spawn(tokio::time::sleep(Duration::from_millis(10)));
        let outcome = supervise(refresh, std::future::pending()).await;
        assert_eq!(
            outcome,
            Outcome::RefreshDied("refresh task returned".to_string())
        );
    }

    #[tokio::test]
    async fn aborted_refresh_is_fatal() {
        let refresh = tokio::spawn(std::future::pending::<()>());
        refresh.abort();
        let outcome = supervise(refresh, std::future::pending()).await;
        assert!(matches!(outcome, Outcome::RefreshDied(ref r) if r.contains("cancelled")));
    }
}

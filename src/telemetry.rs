//! Shelly 3EM telemetry: the snapshot record and the fetchers that produce it.

use async_trait::async_trait;
use log::*;
use serde::Deserialize;
use std::time::Duration;
use strum_macros::EnumIter;

use crate::config::UpstreamConfig;
use crate::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum Phase {
    L1,
    L2,
    L3,
}

impl Phase {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Instantaneous values and energy counters of one phase, as reported upstream.
/// Energy is in Wh.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct PhaseReading {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub total: f64,
    pub total_returned: f64,
}

/// One complete reading of the meter. Created once per successful fetch and
/// never modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySnapshot {
    pub voltage: [f64; 3],
    pub current: [f64; 3],
    pub power: [f64; 3],
    pub energy: [f64; 3],
    pub energy_returned: [f64; 3],
    pub power_total: f64,
    pub energy_total: f64,
    pub energy_returned_total: f64,
}

impl TelemetrySnapshot {
    /// Energy totals are the sum of the phase counters; total power is taken as reported.
    pub fn new(phases: [PhaseReading; 3], power_total: f64) -> Self {
        let energy = phases.map(|p| p.total);
        let energy_returned = phases.map(|p| p.total_returned);

        Self {
            voltage: phases.map(|p| p.voltage),
            current: phases.map(|p| p.current),
            power: phases.map(|p| p.power),
            energy,
            energy_returned,
            power_total,
            energy_total: energy.iter().sum(),
            energy_returned_total: energy_returned.iter().sum(),
        }
    }
}

/// One request/decode cycle against the upstream device. No retries.
#[async_trait]
pub trait TelemetryFetcher: Send + Sync {
    async fn fetch(&self) -> Result<TelemetrySnapshot, FetchError>;
}

/// Subset of the Shelly `/status` document this gateway needs.
#[derive(Debug, Deserialize)]
struct StatusPayload {
    emeters: [PhaseReading; 3],
    total_power: f64,
}

impl From<StatusPayload> for TelemetrySnapshot {
    fn from(status: StatusPayload) -> Self {
        TelemetrySnapshot::new(status.emeters, status.total_power)
    }
}

/// Decode a `/status` body. The whole document is rejected if anything is missing.
pub fn parse_status(body: &[u8]) -> Result<TelemetrySnapshot, FetchError> {
    serde_json::from_slice::<StatusPayload>(body)
        .map(TelemetrySnapshot::from)
        .map_err(|e| FetchError::MalformedPayload(e.to_string()))
}

pub struct HttpFetcher {
    client: reqwest::Client,
    url: String,
    credentials: Option<(String, String)>,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(upstream: &UpstreamConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("http://{}/status", upstream.host),
            credentials: upstream.credentials(),
            timeout: upstream.timeout(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TelemetryFetcher for HttpFetcher {
    async fn fetch(&self) -> Result<TelemetrySnapshot, FetchError> {
        let now = std::time::Instant::now();
        let unreachable = |e: reqwest::Error| FetchError::UpstreamUnreachable(e.to_string());

        let mut request = self.client.get(&self.url).timeout(self.timeout);
        if let Some((user, pass)) = &self.credentials {
            request = request.basic_auth(user, Some(pass));
        }
        let response = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(unreachable)?;
        let body = response.bytes().await.map_err(unreachable)?;

        debug!("GET {}: {} ms", self.url, now.elapsed().as_millis());
        parse_status(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strum::IntoEnumIterator;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn status_body() -> serde_json::Value {
        json!({
            "wifi_sta": { "connected": true, "ssid": "home" },
            "emeters": [
                { "power": 120.5, "pf": 0.9, "current": 0.52, "voltage": 230.1,
                  "is_valid": true, "total": 1000.0, "total_returned": 10.0 },
                { "power": -40.0, "pf": 0.8, "current": 0.2, "voltage": 229.8,
                  "is_valid": true, "total": 2000.0, "total_returned": 20.0 },
                { "power": 0, "pf": 0, "current": 0, "voltage": 231,
                  "is_valid": true, "total": 3000, "total_returned": 30 }
            ],
            "total_power": 80.5
        })
    }

    fn upstream(host: String, username: Option<&str>) -> UpstreamConfig {
        UpstreamConfig {
            host,
            username: username.map(str::to_string),
            password: username.map(|_| "pass".to_string()),
            timeout_secs: 5,
        }
    }

    fn host_of(server: &MockServer) -> String {
        server.uri().trim_start_matches("http://").to_string()
    }

    #[test]
    fn totals_are_phase_sums() {
        let snap = parse_status(status_body().to_string().as_bytes()).unwrap();
        assert_eq!(snap.voltage, [230.1, 229.8, 231.0]);
        assert_eq!(snap.power, [120.5, -40.0, 0.0]);
        assert_eq!(snap.energy, [1000.0, 2000.0, 3000.0]);
        assert_eq!(snap.energy_total, 6000.0);
        assert_eq!(snap.energy_returned_total, 60.0);
        assert_eq!(snap.power_total, 80.5);
        assert_eq!(snap.current[Phase::L1.index()], 0.52);

        let in_order: Vec<f64> = Phase::iter().map(|p| snap.voltage[p.index()]).collect();
        assert_eq!(in_order, vec![230.1, 229.8, 231.0]);
    }

    #[test]
    fn partial_payload_is_rejected_whole() {
        let mut body = status_body();
        body["emeters"][2]
            .as_object_mut()
            .unwrap()
            .remove("total_returned");
        let err = parse_status(body.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, FetchError::MalformedPayload(_)));

        let mut body = status_body();
        body["emeters"][0]["voltage"] = json!("230.1");
        assert!(parse_status(body.to_string().as_bytes()).is_err());

        let mut body = status_body();
        body["emeters"][1]["current"] = serde_json::Value::Null;
        assert!(parse_status(body.to_string().as_bytes()).is_err());

        let mut body = status_body();
        body.as_object_mut().unwrap().remove("total_power");
        assert!(parse_status(body.to_string().as_bytes()).is_err());

        assert!(parse_status(b"<html>busy</html>").is_err());
        assert!(parse_status(b"").is_err());
    }

    #[test]
    fn two_phases_is_malformed() {
        let mut body = status_body();
        body["emeters"].as_array_mut().unwrap().pop();
        let err = parse_status(body.to_string().as_bytes()).unwrap_err();
        assert_eq!(err.kind(), "MalformedPayload");
    }

    #[test]
    fn four_phases_is_malformed() {
        let mut body = status_body();
        let extra = body["emeters"][0].clone();
        body["emeters"].as_array_mut().unwrap().push(extra);
        let err = parse_status(body.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, FetchError::MalformedPayload(_)));
    }

    #[tokio::test]
    async fn fetch_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_body()))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&upstream(host_of(&server), None));
        let snap = fetcher.fetch().await.unwrap();
        assert_eq!(snap.voltage, [230.1, 229.8, 231.0]);
    }

    #[tokio::test]
    async fn fetch_sends_basic_auth() {
        let server = MockServer::start().await;
        // base64("admin:pass")
        Mock::given(method("GET"))
            .and(path("/status"))
            .and(header("Authorization", "Basic YWRtaW46cGFzcw=="))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_body()))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&upstream(host_of(&server), Some("admin")));
        assert!(fetcher.fetch().await.is_ok());
    }

    #[tokio::test]
    async fn non_success_status_is_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&upstream(host_of(&server), None));
        let err = fetcher.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::UpstreamUnreachable(_)));
    }

    #[tokio::test]
    async fn garbage_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"emeters\": []}"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&upstream(host_of(&server), None));
        let err = fetcher.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::MalformedPayload(_)));
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(status_body())
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let mut cfg = upstream(host_of(&server), None);
        cfg.timeout_secs = 1;
        let err = HttpFetcher::new(&cfg).fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::UpstreamUnreachable(_)));
    }

    #[tokio::test]
    async fn nobody_listening_is_unreachable() {
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let fetcher = HttpFetcher::new(&upstream(addr.to_string(), None));
        let err = fetcher.fetch().await.unwrap_err();
        assert_eq!(err.kind(), "UpstreamUnreachable");
    }
}

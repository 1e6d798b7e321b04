use thiserror::Error;

/// Failure of one request/decode cycle against the Shelly.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

impl FetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::UpstreamUnreachable(_) => "UpstreamUnreachable",
            FetchError::MalformedPayload(_) => "MalformedPayload",
        }
    }
}

/// Reasons a register read resolves to "no data".
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    #[error("register count {count} exceeds maximum of {max}")]
    OversizedRequest { count: u16, max: u16 },
    #[error("address {address:#06x} is outside the emulated register space")]
    OutOfRange { address: u16 },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

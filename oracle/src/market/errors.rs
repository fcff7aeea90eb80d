use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    /// Non-success HTTP status; part of the protocol error class.
    #[error("market data endpoint {url} returned status {status}")]
    Status { status: u16, url: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid price received: {0}")]
    InvalidData(f64),

    #[error("all {} price sources failed: [{}]", .0.len(), summarize(.0))]
    AllSourcesFailed(Vec<FetchError>),

    #[error("http client setup failed: {0}")]
    Client(String),
}

impl FetchError {
    /// Short label for counters and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Network(_) => "network",
            FetchError::Status { .. } | FetchError::Protocol(_) => "protocol",
            FetchError::InvalidData(_) => "invalid_data",
            FetchError::AllSourcesFailed(_) => "all_sources_failed",
            FetchError::Client(_) => "client",
        }
    }
}

fn summarize(errors: &[FetchError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

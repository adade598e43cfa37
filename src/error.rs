use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum RelayError {
    #[error("upstream fetch failed: {0}")]
    UpstreamFetchFailed(String),

    #[error("upstream read failed: {0}")]
    UpstreamReadFailed(String),

    #[error("close timed out waiting for pumper to exit")]
    CloseTimeout,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RelayError {
    /// Sanitized message safe for returning to proxied clients — never
    /// leaks upstream URLs, headers, or response bodies.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::UpstreamFetchFailed(_) => "upstream fetch failed",
            Self::UpstreamReadFailed(_) => "upstream read failed",
            Self::CloseTimeout => "stream close timed out",
            Self::Config(_) => "invalid configuration",
        }
    }
}

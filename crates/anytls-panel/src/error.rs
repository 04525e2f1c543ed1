//! Panel error types.

/// Error talking to the control plane.
#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    /// Network-level failure (connect, timeout, body read).
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    /// Upstream answered with a non-success status that is not retryable
    /// (4xx) or survived every retry (5xx).
    #[error("upstream status {0}")]
    Status(u16),
}

impl PanelError {
    /// True for 4xx responses, which the sync loop logs but startup treats
    /// as fatal configuration problems.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Status(code) if (400u16..500).contains(code))
    }
}

use thiserror::Error;

/// Top-level error type for the `applisync-api` crate.
///
/// Covers every failure mode of the vendor boundary: credential renewal,
/// transport, structured API rejections, and the push stream.
/// `applisync-core` maps these into its own taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The vendor rejected the access token (HTTP 401 after a renewal retry).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The refresh token is dead; only a new authorization can recover.
    #[error("Credential renewal rejected: {message}")]
    RenewalRejected { message: String },

    /// Renewal failed transiently after every retry.
    #[error("Credential renewal failed after {attempts} attempts: {message}")]
    RenewalExhausted { attempts: u32, message: String },

    /// Renewed credentials could not be written to durable storage.
    #[error("Failed to persist credentials: {0}")]
    Persistence(String),

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Vendor API ──────────────────────────────────────────────────
    /// Structured rejection returned by the appliance API.
    #[error("Appliance API error (HTTP {status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
        detail: Option<String>,
    },

    // ── Push stream ─────────────────────────────────────────────────
    /// The event stream could not be opened or broke mid-read.
    #[error("Event stream error: {0}")]
    Stream(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this error means the session is gone and the
    /// user must authorize again.
    pub fn is_auth_expired(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::RenewalRejected { .. }
        )
    }

    /// Returns `true` for any credential-flow failure, permanent or not.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. }
                | Self::RenewalRejected { .. }
                | Self::RenewalExhausted { .. }
        )
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Api { status, .. } => *status >= 500 && *status != 503,
            Self::Timeout { .. } | Self::Stream(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Api { status: 404, .. } => true,
            _ => false,
        }
    }

    /// HTTP status attached to the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Extract the machine-readable API error code, if available.
    pub fn api_error_code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Extract the human-readable rejection detail, if available.
    pub fn api_error_detail(&self) -> Option<&str> {
        match self {
            Self::Api { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

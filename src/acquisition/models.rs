use std::fmt;

use crate::session::SessionError;

/// Class of an acquisition failure, recorded as the prefix of `lastError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionErrorType {
    Authorization, // Credential rejected even after a refresh
    Transport,     // Network failure, timeout or error status
    Integrity,     // Payload too small or not audio
    Promotion,     // Move into the output directory failed, staged bytes kept
    Storage,       // Local file system error while staging
}

impl AcquisitionErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionErrorType::Authorization => "authorization",
            AcquisitionErrorType::Transport => "transport",
            AcquisitionErrorType::Integrity => "integrity",
            AcquisitionErrorType::Promotion => "promotion failed",
            AcquisitionErrorType::Storage => "storage",
        }
    }

    /// Classify an error returned by one of the download strategies.
    pub fn from_session_error(error: &SessionError) -> Self {
        match error {
            SessionError::Unauthorized(_) | SessionError::Credentials(_) => {
                AcquisitionErrorType::Authorization
            }
            SessionError::InvalidPayload(_) => AcquisitionErrorType::Integrity,
            SessionError::Io(_) => AcquisitionErrorType::Storage,
            SessionError::Status(_)
            | SessionError::Transport(_)
            | SessionError::Timeout(_)
            | SessionError::NoDownloadLink(_) => AcquisitionErrorType::Transport,
        }
    }
}

/// A classified acquisition failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionError {
    pub error_type: AcquisitionErrorType,
    pub message: String,
}

impl AcquisitionError {
    pub fn new(error_type: AcquisitionErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
        }
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::new(AcquisitionErrorType::Integrity, message)
    }

    pub fn promotion(message: impl Into<String>) -> Self {
        Self::new(AcquisitionErrorType::Promotion, message)
    }
}

impl From<&SessionError> for AcquisitionError {
    fn from(error: &SessionError) -> Self {
        Self::new(
            AcquisitionErrorType::from_session_error(error),
            error.to_string(),
        )
    }
}

impl fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_type.as_str(), self.message)
    }
}

impl std::error::Error for AcquisitionError {}

/// Which strategy produced an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Direct,
    Interactive,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::Interactive => "interactive",
        }
    }
}

/// Why an acquisition run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunOutcome {
    /// Every queued item was attempted
    #[default]
    Completed,
    /// The circuit breaker stopped the run
    CircuitTripped,
    /// A shutdown was requested
    Cancelled,
}

/// Summary of one acquisition run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquisitionReport {
    /// Items in the queue when the run started
    pub queued: usize,
    pub attempted: usize,
    pub acquired: usize,
    pub failed: usize,
    /// Items that downloaded fine but could not be moved into place
    pub promotion_failures: usize,
    pub outcome: RunOutcome,
}

impl AcquisitionReport {
    /// Queued items that were never attempted.
    pub fn remaining(&self) -> usize {
        self.queued.saturating_sub(self.attempted)
    }

    pub fn circuit_tripped(&self) -> bool {
        self.outcome == RunOutcome::CircuitTripped
    }
}

//! Error taxonomy shared by the orchestrators and collaborators.
//!
//! Library-level operations return [`WorkbenchError`]; the CLI and HTTP
//! layers wrap it in `anyhow` or map it onto status codes.
//! [`WorkbenchError::Aborted`] is a terminal state, not a failure: callers
//! report it as a neutral status message.

use thiserror::Error;

/// Errors produced while parsing, analysing, searching or persisting records.
#[derive(Debug, Error)]
pub enum WorkbenchError {
    /// The input text is blank after page markers were stripped.
    #[error("Bitte geben Sie Text zum Parsen ein.")]
    EmptyInput,

    /// The structuring service returned no utterances for any chunk.
    #[error("Keine verwertbaren Einträge im Text gefunden.")]
    NoUsableEntries,

    /// Fewer analysed records than an operation needs.
    #[error("Nicht genügend analysierte Daten (mind. {required} Einträge mit 'Kernaussage' benötigt, {found} vorhanden).")]
    InsufficientData { found: usize, required: usize },

    /// The run was cancelled through its cancellation token.
    #[error("Operation was aborted.")]
    Aborted,

    /// A remote call failed after exhausting its retries.
    #[error("AI call failed after {attempts} attempts. Last error: {message}")]
    RemoteCallFailed { attempts: u32, message: String },

    /// The remote service answered, but not with the expected shape.
    #[error("Model returned an unusable response: {0}")]
    InvalidResponse(String),

    /// No reasoning provider is configured.
    #[error("Aktion abgebrochen: {0}")]
    NotConfigured(String),

    /// The durable dataset could not be written or read.
    #[error("Fehler beim Speichern der Daten in der Datenbank: {0}")]
    PersistenceFailed(#[source] anyhow::Error),
}

impl WorkbenchError {
    /// Whether this error represents a user- or token-triggered cancellation.
    pub fn is_aborted(&self) -> bool {
        matches!(self, WorkbenchError::Aborted)
    }

    pub fn persistence(err: impl Into<anyhow::Error>) -> Self {
        WorkbenchError::PersistenceFailed(err.into())
    }
}

pub type WorkbenchResult<T> = Result<T, WorkbenchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborted_is_distinguished_from_failures() {
        assert!(WorkbenchError::Aborted.is_aborted());
        assert!(!WorkbenchError::NoUsableEntries.is_aborted());
        let remote = WorkbenchError::RemoteCallFailed {
            attempts: 3,
            message: "503".into(),
        };
        assert!(!remote.is_aborted());
        assert!(remote.to_string().contains("Last error: 503"));
    }

    #[test]
    fn insufficient_data_reports_counts() {
        let err = WorkbenchError::InsufficientData {
            found: 2,
            required: 3,
        };
        assert!(err.to_string().contains("mind. 3"));
    }
}

//! User-facing status reporting.
//!
//! Orchestrators report through a [`StatusSink`] handed to them by the
//! composition root instead of a process-wide notification object. Every
//! terminal state of a run produces exactly one status or error message;
//! pooled phases emit loading messages with a completion percentage.
//!
//! Messages go to **stderr** so stdout stays parseable for scripts.

use serde::Serialize;
use std::io::Write;
use std::sync::Mutex;

/// Kind of a status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    /// Terminal, neutral outcome (success or abort).
    Status,
    /// Ongoing work; superseded by the next message.
    Loading,
    /// Terminal failure.
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusMessage {
    pub kind: StatusKind,
    pub message: String,
}

/// Receives status updates from orchestrators.
pub trait StatusSink: Send + Sync {
    fn emit(&self, message: StatusMessage);

    /// Drop any sticky loading message.
    fn clear(&self) {}

    fn show_status(&self, message: &str) {
        self.emit(StatusMessage {
            kind: StatusKind::Status,
            message: message.to_string(),
        });
    }

    fn show_loading(&self, message: &str) {
        self.emit(StatusMessage {
            kind: StatusKind::Loading,
            message: message.to_string(),
        });
    }

    fn show_error(&self, message: &str) {
        self.emit(StatusMessage {
            kind: StatusKind::Error,
            message: message.to_string(),
        });
    }
}

/// Human-friendly lines on stderr: "… Parse... 50% abgeschlossen."
pub struct StderrStatus;

impl StatusSink for StderrStatus {
    fn emit(&self, message: StatusMessage) {
        let prefix = match message.kind {
            StatusKind::Status => "ok",
            StatusKind::Loading => "..",
            StatusKind::Error => "error",
        };
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{:>5}  {}", prefix, message.message);
        let _ = err.flush();
    }
}

/// Machine-readable status: one JSON object per line on stderr.
pub struct JsonStatus;

impl StatusSink for JsonStatus {
    fn emit(&self, message: StatusMessage) {
        let obj = serde_json::json!({
            "event": "status",
            "type": message.kind,
            "message": message.message,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
        }
    }
}

/// No-op sink when status output is disabled.
pub struct NoStatus;

impl StatusSink for NoStatus {
    fn emit(&self, _message: StatusMessage) {}
}

/// Keeps every message in memory. Used by the HTTP API to expose the
/// latest status and by tests to assert on reporting.
#[derive(Default)]
pub struct RecordingStatus {
    messages: Mutex<Vec<StatusMessage>>,
}

impl RecordingStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<StatusMessage> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn latest(&self) -> Option<StatusMessage> {
        self.messages.lock().ok().and_then(|m| m.last().cloned())
    }

    /// Messages that end a run (status or error).
    pub fn terminal(&self) -> Vec<StatusMessage> {
        self.messages()
            .into_iter()
            .filter(|m| m.kind != StatusKind::Loading)
            .collect()
    }
}

impl StatusSink for RecordingStatus {
    fn emit(&self, message: StatusMessage) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message);
        }
    }
}

/// Status mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatusMode {
    Off,
    Human,
    Json,
}

impl StatusMode {
    /// Default: human output when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            StatusMode::Human
        } else {
            StatusMode::Off
        }
    }

    pub fn sink(&self) -> Box<dyn StatusSink> {
        match self {
            StatusMode::Off => Box::new(NoStatus),
            StatusMode::Human => Box::new(StderrStatus),
            StatusMode::Json => Box::new(JsonStatus),
        }
    }
}

impl std::str::FromStr for StatusMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(StatusMode::Off),
            "human" => Ok(StatusMode::Human),
            "json" => Ok(StatusMode::Json),
            other => Err(format!("unknown status mode '{}': use off, human or json", other)),
        }
    }
}

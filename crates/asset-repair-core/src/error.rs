use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("Malformed manifest '{manifest}': {message}")]
    Format { manifest: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Verification worker failed: {0}")]
    Worker(String),
}

impl Error {
    pub fn format(manifest: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Format {
            manifest: manifest.into(),
            message: message.into(),
        }
    }

    pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Network {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Telemetry bucket attached to a reported fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCategory {
    UnhandledWorker,
    Manifest,
}

/// Side channel for faults that abort a pass. Must not block.
pub trait FaultSink: Send + Sync {
    fn report_fault(&self, error: &Error, category: FaultCategory);
}

/// Fault sink that only logs.
pub struct LogFaultSink;

impl FaultSink for LogFaultSink {
    fn report_fault(&self, error: &Error, category: FaultCategory) {
        tracing::error!("Fault [{:?}]: {}", category, error);
    }
}

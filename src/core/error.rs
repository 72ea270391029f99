use thiserror::Error;

use super::model::AlertId;

/// Errors surfaced by the monitoring engine.
///
/// Transient collaborator failures (store writes after startup, remote
/// message generation) are logged and recovered inline and never reach
/// this type; what remains is configuration rejection and the fatal
/// startup path.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Trigger parameter outside its mode-specific bounds.
    #[error("{field} = {value} out of bounds ({min}..={max})")]
    OutOfBounds {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Time-mode and repeating alerts need a scheduled arrival time.
    #[error("alert {0} requires an arrival time")]
    MissingArrivalTime(AlertId),

    /// Store I/O failure.
    #[error("store I/O failed: {0}")]
    StoreIo(#[from] std::io::Error),

    /// Store contents could not be decoded. Fatal during startup load:
    /// arming stale or partial alert state is worse than failing to start.
    #[error("store data corrupt: {0}")]
    StoreCorrupt(String),

    /// The monitoring loop has shut down and no longer accepts commands.
    #[error("monitor is not running")]
    MonitorClosed,
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::StoreCorrupt(err.to_string())
    }
}

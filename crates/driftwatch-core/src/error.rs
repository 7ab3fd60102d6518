use thiserror::Error;

/// Transport-level failures on the mention bus.
///
/// These are the only errors allowed to cross a cycle boundary; the runner
/// answers them by discarding the session and reconnecting.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus connection failed: {0}")]
    Connection(String),

    #[error("bus stream closed by peer")]
    StreamClosed,

    #[error("malformed bus frame: {0}")]
    Protocol(String),
}

/// Why a capability invocation produced no usable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ToolFailureKind {
    #[error("unknown capability")]
    UnknownCapability,

    #[error("invalid arguments")]
    InvalidArguments,

    #[error("execution failed")]
    Execution,
}

/// Faults that end the current bus session and send the runner back to its
/// reconnect loop.
#[derive(Debug, Error)]
pub enum SessionFault {
    #[error(transparent)]
    Transport(#[from] BusError),

    #[error("conversation memory failure: {0}")]
    Memory(anyhow::Error),
}

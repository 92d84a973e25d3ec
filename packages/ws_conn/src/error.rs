use axum::extract::ws::close_code;
use conc::ConcError;

/// Errors surfaced by a connection's read path, its collaborator hooks, or
/// the upgrade step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WsError {
    /// The peer's stream ended without a close frame.
    #[error("end of stream")]
    Eof,

    /// The peer sent a close frame.
    #[error("connection closed ({code}): {reason}")]
    Closed { code: u16, reason: String },

    /// No frame arrived before the read deadline.
    #[error("read deadline exceeded")]
    ReadTimeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode message: {0}")]
    Decode(String),

    #[error("failed to encode message: {0}")]
    Encode(String),

    /// The outbound writer refused the message.
    #[error("outbound writer: {0}")]
    Outbound(#[from] ConcError),

    /// A collaborator refused to start or continue.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// What the session loop does with a failed read.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadDisposition {
    /// Plain end of stream: leave the loop without consulting the collaborator.
    EndOfStream,
    /// Keep the session alive.
    Continue,
    /// Leave the loop immediately with this close code.
    Terminate(u16),
    /// Hand the error to the collaborator's error hook.
    Delegate,
}

impl WsError {
    pub fn close_code(&self) -> Option<u16> {
        match self {
            WsError::Closed { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn disposition(&self) -> ReadDisposition {
        match self {
            WsError::Eof => ReadDisposition::EndOfStream,
            WsError::Closed { code, .. } => match *code {
                close_code::ABNORMAL => ReadDisposition::Continue,
                close_code::NORMAL | close_code::AWAY => ReadDisposition::Terminate(*code),
                _ => ReadDisposition::Delegate,
            },
            _ => ReadDisposition::Delegate,
        }
    }
}

impl From<axum::Error> for WsError {
    fn from(err: axum::Error) -> Self {
        WsError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for WsError {
    fn from(err: serde_json::Error) -> Self {
        WsError::Decode(err.to_string())
    }
}

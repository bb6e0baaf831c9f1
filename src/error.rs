//! Error taxonomy for script runs.
//!
//! Three tiers, mirrored by how the host should present them:
//! - `Soft`: a deliberate early exit (`exit(reason)`, declined input prompt).
//!   Informational, not a bug. Staged changes are discarded.
//! - `Hard`: a violated environment precondition or an invalid capability
//!   argument. An error message; staged changes are discarded.
//! - `Script`: any other failure raised by the script body, carrying a
//!   traceback trimmed to the script's own frames.

use std::fmt;

use crate::host::HostError;
use crate::range_edit::RangeEditError;

/// Structured failure returned by a script run.
#[derive(Debug, Clone)]
pub enum MacroError {
    /// Script- or user-initiated early exit. Not a bug.
    Soft(String),
    /// Environment precondition or capability argument violation.
    Hard(String),
    /// Exception raised by the script body.
    Script {
        message: String,
        /// Traceback lines from the script's own frames; runner-internal
        /// frames have already been elided.
        trace: Vec<String>,
    },
}

impl MacroError {
    /// A soft (informational) early exit.
    pub fn soft(message: impl Into<String>) -> Self {
        MacroError::Soft(message.into())
    }

    /// A hard failure: bad capability argument or broken precondition.
    pub fn hard(message: impl Into<String>) -> Self {
        MacroError::Hard(message.into())
    }

    /// True for outcomes the host should present as information, not errors.
    pub fn is_soft(&self) -> bool {
        matches!(self, MacroError::Soft(_))
    }

    /// The user-facing message without the trace.
    pub fn message(&self) -> &str {
        match self {
            MacroError::Soft(m) | MacroError::Hard(m) => m,
            MacroError::Script { message, .. } => message,
        }
    }
}

impl fmt::Display for MacroError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacroError::Soft(m) => write!(f, "{}", m),
            MacroError::Hard(m) => write!(f, "Error: {}", m),
            MacroError::Script { message, trace } => {
                write!(f, "Error: {}", message)?;
                for line in trace {
                    write!(f, "\n  {}", line)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for MacroError {}

impl From<RangeEditError> for MacroError {
    fn from(err: RangeEditError) -> Self {
        MacroError::Hard(err.to_string())
    }
}

impl From<HostError> for MacroError {
    fn from(err: HostError) -> Self {
        MacroError::Hard(err.to_string())
    }
}

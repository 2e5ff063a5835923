//! Bridge errors
//!
//! Every failure that can cross the host/script boundary is a [`BridgeError`].
//! Script-side throws keep their message and, when the thrown value carried
//! one, their stack trace.

use std::fmt;

/// Result alias used throughout the bridge.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors raised while exchanging values or calls with the script engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    /// The engine runtime or its context could not be created.
    #[error("engine init failure: {0}")]
    EngineInit(String),

    /// A script-level throw or evaluation failure.
    #[error(transparent)]
    Script(#[from] ScriptException),

    /// A host or script value kind has no defined conversion.
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// Wrong number of arguments passed to a host function.
    #[error("{}", arity_message(*.expected, *.variadic, *.got))]
    ArityMismatch {
        expected: usize,
        variadic: bool,
        got: usize,
    },

    /// A named global exists but is not a function.
    #[error("{0} is not a function")]
    NotCallable(String),

    /// A named global does not exist.
    #[error("{0} is not defined")]
    NotFound(String),

    /// The trailing error result of a host function was set.
    #[error("{0}")]
    Host(String),

    /// A host value could not be coerced into the requested host type.
    #[error("cannot convert {from} to {to}")]
    Conversion { from: &'static str, to: &'static str },

    /// The owning session has been torn down.
    #[error("session closed")]
    SessionClosed,

    /// Any other engine-level failure.
    #[error("engine error: {0}")]
    Engine(String),
}

fn arity_message(expected: usize, variadic: bool, got: usize) -> String {
    if variadic {
        format!("at least {expected} args expected, got {got}")
    } else {
        format!("{expected} args expected, got {got}")
    }
}

impl BridgeError {
    /// Returns the script exception if this error came from a script throw.
    pub fn as_script(&self) -> Option<&ScriptException> {
        match self {
            Self::Script(exception) => Some(exception),
            _ => None,
        }
    }
}

impl From<rquickjs::Error> for BridgeError {
    fn from(err: rquickjs::Error) -> Self {
        Self::Engine(err.to_string())
    }
}

/// A value thrown by script code, flattened to text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptException {
    /// The `message` of a thrown error object, or the thrown value as a string.
    pub message: String,
    /// The `stack` property, present only when the thrown value defined one.
    pub stack: Option<String>,
}

impl ScriptException {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }
}

impl fmt::Display for ScriptException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "script exception: {}", self.message)?;
        if let Some(stack) = &self.stack {
            write!(f, "\n{stack}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ScriptException {}

/// Abort a script-to-host call whose host signature has no error slot.
///
/// A [`ScriptFn`](crate::ScriptFn) declared without a trailing
/// `Result<_, BridgeError>` has no channel to report a script failure, so the
/// failure is a contract violation by whoever declared that signature.
#[track_caller]
pub(crate) fn unrecoverable(err: BridgeError) -> ! {
    tracing::error!(error = %err, "unrecoverable bridge fault");
    panic!("unrecoverable bridge fault: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity_messages() {
        let fixed = BridgeError::ArityMismatch { expected: 2, variadic: false, got: 1 };
        assert_eq!(fixed.to_string(), "2 args expected, got 1");

        let variadic = BridgeError::ArityMismatch { expected: 1, variadic: true, got: 0 };
        assert_eq!(variadic.to_string(), "at least 1 args expected, got 0");
    }

    #[test]
    fn test_script_exception_display() {
        let mut exception = ScriptException::new("boom");
        assert_eq!(exception.to_string(), "script exception: boom");

        exception.stack = Some("    at f (main.js:1)".into());
        assert_eq!(exception.to_string(), "script exception: boom\n    at f (main.js:1)");
    }

    #[test]
    fn test_host_error_is_bare_message() {
        assert_eq!(BridgeError::Host("negative".into()).to_string(), "negative");
    }
}

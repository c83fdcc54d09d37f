//! Script execution error types

use std::fmt;

/// Script execution result type
pub type Result<T> = std::result::Result<T, ScriptError>;

/// Script execution error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// Script compilation/parsing error
    CompilationError {
        /// Error message
        message: String,
        /// Line number if available
        line: Option<usize>,
        /// Column number if available
        column: Option<usize>,
    },

    /// Script runtime error
    RuntimeError {
        /// Error message
        message: String,
        /// Script line where error occurred
        line: Option<usize>,
    },

    /// A script API call was given an invalid argument
    InvalidArgument {
        /// Error message
        message: String,
    },

    /// A wrapper was used after the data it refers to left the script's reach
    Expired {
        /// What the wrapper referred to
        object: &'static str,
    },

    /// Filter configuration could not be turned into a script
    ConfigError {
        /// Error message
        message: String,
    },

    /// IO error (reading script files)
    IoError {
        /// Error message
        message: String,
    },
}

impl ScriptError {
    /// Create a compilation error
    pub fn compilation<S: Into<String>>(message: S) -> Self {
        Self::CompilationError {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    /// Create a runtime error
    pub fn runtime<S: Into<String>>(message: S) -> Self {
        Self::RuntimeError {
            message: message.into(),
            line: None,
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an expired wrapper error
    pub fn expired(object: &'static str) -> Self {
        Self::Expired { object }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CompilationError {
                message,
                line,
                column,
            } => {
                write!(f, "Script compilation error: {}", message)?;
                if let Some(line) = line {
                    write!(f, " at line {}", line)?;
                    if let Some(col) = column {
                        write!(f, ", column {}", col)?;
                    }
                }
                Ok(())
            }
            Self::RuntimeError { message, line } => {
                write!(f, "Script runtime error: {}", message)?;
                if let Some(line) = line {
                    write!(f, " at line {}", line)?;
                }
                Ok(())
            }
            Self::InvalidArgument { message } => {
                write!(f, "Invalid script argument: {}", message)
            }
            Self::Expired { object } => {
                write!(f, "Script object expired: {} is no longer accessible", object)
            }
            Self::ConfigError { message } => {
                write!(f, "Script configuration error: {}", message)
            }
            Self::IoError { message } => {
                write!(f, "Script IO error: {}", message)
            }
        }
    }
}

impl std::error::Error for ScriptError {}

impl From<std::io::Error> for ScriptError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError {
            message: err.to_string(),
        }
    }
}

impl From<octopus_core::Error> for ScriptError {
    fn from(err: octopus_core::Error) -> Self {
        Self::ConfigError {
            message: err.to_string(),
        }
    }
}

impl From<Box<rhai::EvalAltResult>> for ScriptError {
    fn from(err: Box<rhai::EvalAltResult>) -> Self {
        let pos = err.position();
        Self::RuntimeError {
            message: err.to_string(),
            line: pos.line(),
        }
    }
}

impl From<rhai::ParseError> for ScriptError {
    fn from(err: rhai::ParseError) -> Self {
        let pos = err.position();
        Self::CompilationError {
            message: err.err_type().to_string(),
            line: pos.line(),
            column: pos.position(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compilation_display() {
        let err = ScriptError::CompilationError {
            message: "unexpected token".to_string(),
            line: Some(3),
            column: Some(7),
        };
        assert_eq!(
            err.to_string(),
            "Script compilation error: unexpected token at line 3, column 7"
        );
    }

    #[test]
    fn test_expired_display() {
        assert!(ScriptError::expired("body chunk")
            .to_string()
            .contains("body chunk"));
    }

    #[test]
    fn test_from_core_error() {
        let err: ScriptError = octopus_core::Error::Config("bad path".to_string()).into();
        assert!(matches!(err, ScriptError::ConfigError { .. }));
    }
}

//! Script execution error types

use std::fmt;

/// Script execution result type
pub type Result<T> = std::result::Result<T, ScriptError>;

/// Script execution error
#[derive(Debug, Clone)]
pub enum ScriptError {
    /// Script compilation/definition error
    CompilationError {
        /// Error message
        message: String,
    },

    /// Script raised an error while running
    RuntimeError {
        /// Interpreter-provided message
        message: String,
    },

    /// Script returned a value with no host representation
    MarshalError {
        /// Name of the offending type
        type_name: String,
    },

    /// No engine became available before the checkout timeout
    PoolExhausted {
        /// Waited time in milliseconds
        waited_ms: u64,
    },

    /// Interpreter instance could not be created
    EngineCreation {
        /// Error message
        message: String,
    },

    /// Invalid configuration value
    InvalidConfig {
        /// Error message
        message: String,
    },

    /// Remote content could not be fetched
    RemoteError {
        /// Remote location
        location: String,
        /// Error message
        message: String,
    },

    /// Rules text could not be parsed
    RulesError {
        /// 1-based line number
        line: usize,
        /// Error message
        message: String,
    },

    /// IO error (reading or writing script files)
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
        }
    }

    /// Create a runtime error
    pub fn runtime<S: Into<String>>(message: S) -> Self {
        Self::RuntimeError {
            message: message.into(),
        }
    }

    /// Create a marshalling error
    pub fn marshal<S: Into<String>>(type_name: S) -> Self {
        Self::MarshalError {
            type_name: type_name.into(),
        }
    }

    /// Create an engine creation error
    pub fn engine_creation<S: Into<String>>(message: S) -> Self {
        Self::EngineCreation {
            message: message.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a remote error
    pub fn remote<L: Into<String>, S: Into<String>>(location: L, message: S) -> Self {
        Self::RemoteError {
            location: location.into(),
            message: message.into(),
        }
    }

    /// Create a rules parse error
    pub fn rules<S: Into<String>>(line: usize, message: S) -> Self {
        Self::RulesError {
            line,
            message: message.into(),
        }
    }

    /// Whether the error originated in script code (as opposed to the host)
    pub fn is_script_error(&self) -> bool {
        matches!(
            self,
            Self::CompilationError { .. } | Self::RuntimeError { .. } | Self::MarshalError { .. }
        )
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CompilationError { message } => {
                write!(f, "Script compilation error: {}", message)
            }
            Self::RuntimeError { message } => {
                write!(f, "Script runtime error: {}", message)
            }
            Self::MarshalError { type_name } => {
                write!(f, "Got invalid script result value of type '{}'", type_name)
            }
            Self::PoolExhausted { waited_ms } => {
                write!(f, "No script engine available after {}ms", waited_ms)
            }
            Self::EngineCreation { message } => {
                write!(f, "Failed to create script engine: {}", message)
            }
            Self::InvalidConfig { message } => {
                write!(f, "Invalid script configuration: {}", message)
            }
            Self::RemoteError { location, message } => {
                write!(f, "Failed to fetch remote (location={}): {}", location, message)
            }
            Self::RulesError { line, message } => {
                write!(f, "Failed to parse rules at line {}: {}", line, message)
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

impl From<mlua::Error> for ScriptError {
    fn from(err: mlua::Error) -> Self {
        Self::RuntimeError {
            message: err.to_string(),
        }
    }
}

impl From<Box<rhai::EvalAltResult>> for ScriptError {
    fn from(err: Box<rhai::EvalAltResult>) -> Self {
        Self::RuntimeError {
            message: err.to_string(),
        }
    }
}

impl From<rhai::ParseError> for ScriptError {
    fn from(err: rhai::ParseError) -> Self {
        Self::CompilationError {
            message: err.to_string(),
        }
    }
}

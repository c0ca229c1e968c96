use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "policies.lookup.transforms.dos")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected format, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "availability", "policy_table")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A call that does not fit the declared signature of the wrapped function.
///
/// Always surfaced to the caller; the cache never recovers from it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgumentBindingError {
    #[error("{function}: takes at most {expected} positional arguments but {given} were given")]
    TooManyPositional {
        function: String,
        expected: usize,
        given: usize,
    },

    #[error("{function}: got an unexpected keyword argument '{name}'")]
    UnexpectedKeyword { function: String, name: String },

    #[error("{function}: got multiple values for argument '{name}'")]
    MultipleValues { function: String, name: String },

    #[error("{function}: missing required argument '{name}'")]
    MissingArgument { function: String, name: String },

    #[error("{function}: method called without a receiver")]
    MissingReceiver { function: String },
}

/// Unified error type for memo-cache.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Argument binding error: {0}")]
    Binding(#[from] ArgumentBindingError),

    /// Internal only: decorators recover from this by running the wrapped function.
    #[error("Backend unavailable: {message}{}", format_context(.context))]
    BackendUnavailable {
        message: String,
        context: ErrorContext,
    },

    #[error("Backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Policy file error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Key decoding error: {message}{}", format_context(.context))]
    KeyDecoding {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn unavailable_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::BackendUnavailable {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn key_decoding_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::KeyDecoding {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::BackendUnavailable { context, .. }
            | Error::Configuration { context, .. }
            | Error::KeyDecoding { context, .. } => Some(context),
            _ => None,
        }
    }

    /// True for failures that mean "the store could not be reached".
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, Error::BackendUnavailable { .. } | Error::Backend(_))
    }
}

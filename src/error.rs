//! Error types for the dependency injection container.

use thiserror::Error;

/// Dependency injection errors
///
/// Configuration and resolution problems surface through this type. Failures
/// inside background task callbacks or event targets never do; those are
/// caught and logged where they happen.
///
/// # Examples
///
/// ```rust
/// use reinject::{Container, DiError};
///
/// let container = Container::new("errors-doc");
/// match container.get::<String>() {
///     Err(DiError::NotFound(key)) => assert!(key.contains("String")),
///     _ => unreachable!(),
/// }
/// ```
#[derive(Debug, Error)]
pub enum DiError {
    /// No registration, no parent registration and no cached metadata for the key
    #[error("Service not found: {0}")]
    NotFound(String),
    /// Downcast of a resolved instance failed
    #[error("Type mismatch for: {0}")]
    TypeMismatch(String),
    /// Registration arguments are inconsistent (e.g. singleton without instance)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// No constructor could be satisfied and the type declares no fallback allocator
    #[error("No eligible constructor for {0}")]
    NoEligibleConstructor(String),
    /// A constructor parameter is neither known to the container nor defaulted
    #[error("Couldn't resolve parameter {parameter} to call constructor of {owner}")]
    UnresolvableParameter {
        parameter: String,
        owner: String,
    },
    /// Constructor invocation failed
    #[error("Couldn't create instance of {type_name}: {source}")]
    Construction {
        type_name: String,
        #[source]
        source: Box<DiError>,
    },
    /// A constructor body reported its own failure
    #[error("{0}")]
    Factory(#[from] anyhow::Error),
    /// Circular dependency detected (includes path)
    #[error("Circular dependency: {}", .0.join(" -> "))]
    Circular(Vec<String>),
    /// Maximum recursion depth exceeded
    #[error("Max depth {0} exceeded")]
    DepthExceeded(usize),
    /// A singleton was resolved after its dependency got disposed
    #[error("Instance of {0} was disposed")]
    Disposed(String),
    /// Event target signature does not match the event source
    #[error("Wrong method signature for event '{event}', expected {expected}, found {found}")]
    SignatureMismatch {
        event: String,
        expected: String,
        found: String,
    },
    /// The source object exposes no event with the given native name
    #[error("No event with name {event} found in type {source_type}")]
    UnknownEvent {
        source_type: String,
        event: String,
    },
    /// A cron expression could not be parsed
    #[error("Invalid schedule '{expression}': {reason}")]
    InvalidSchedule {
        expression: String,
        reason: String,
    },
    /// Timers need a tokio runtime and none was given or current
    #[error("No tokio runtime available to drive timers")]
    NoRuntime,
}

/// Result type for DI operations
///
/// A convenience type alias for `Result<T, DiError>` used throughout reinject.
pub type DiResult<T> = Result<T, DiError>;

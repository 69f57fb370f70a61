//! Query error types
//!
//! Provides structured error handling for planning, lowering and execution.
//! Every failure inside the operator tree is fatal to the query and travels
//! up to the executor unchanged.

use std::fmt;

/// Query error with context
#[derive(Debug)]
pub struct QueryError {
    /// Error kind for programmatic handling
    pub kind: QueryErrorKind,
    /// Human-readable message
    pub message: String,
    /// Optional source error
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl QueryError {
    /// Create a new query error
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Add source error for error chaining
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Validation, message)
    }

    /// Create a planning error
    pub fn planning(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Planning, message)
    }

    /// Create an execution error
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Execution, message)
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Timeout, message)
    }

    /// Create a cancellation error
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Cancelled, message)
    }

    /// Create a remote backend error
    pub fn remote(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Remote, message)
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Storage, message)
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Internal, message)
    }

    /// Whether this error was caused by cancellation or deadline expiry
    pub fn is_cancellation(&self) -> bool {
        matches!(self.kind, QueryErrorKind::Cancelled | QueryErrorKind::Timeout)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Categories of query errors for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Invalid input (bad matcher, bad time range, bad step)
    Validation,
    /// The plan cannot be lowered into operators
    Planning,
    /// An operator failed while producing steps
    Execution,
    /// Query exceeded its deadline
    Timeout,
    /// Query was cancelled by the caller
    Cancelled,
    /// A remote backend failed to answer a delegated query
    Remote,
    /// The storage adapter failed to produce series
    Storage,
    /// Internal error (bug, unexpected state)
    Internal,
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryErrorKind::Validation => write!(f, "ValidationError"),
            QueryErrorKind::Planning => write!(f, "PlanningError"),
            QueryErrorKind::Execution => write!(f, "ExecutionError"),
            QueryErrorKind::Timeout => write!(f, "Timeout"),
            QueryErrorKind::Cancelled => write!(f, "Cancelled"),
            QueryErrorKind::Remote => write!(f, "RemoteError"),
            QueryErrorKind::Storage => write!(f, "StorageError"),
            QueryErrorKind::Internal => write!(f, "Internal"),
        }
    }
}

/// Result type alias for query operations
pub type Result<T> = std::result::Result<T, QueryError>;

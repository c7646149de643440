use std::fmt;
use thiserror::Error as ThisError;

///
/// InternalError
///
/// Structured runtime error with a stable classification.
/// The class tells the caller whether the failure is a programming error,
/// a validation problem, lock contention or a missing record.
///

#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct InternalError {
    pub class: ErrorClass,
    pub origin: ErrorOrigin,
    pub message: String,

    /// Optional structured error detail.
    pub detail: Option<ErrorDetail>,
}

impl InternalError {
    pub fn new(class: ErrorClass, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            class,
            origin,
            message: message.into(),
            detail: None,
        }
    }

    /// Construct a usage error (caller bug: unknown field, write in read mode, ...).
    pub fn usage(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Usage, origin, message)
    }

    /// Construct a validation error carrying an aggregated problem list.
    pub fn validation(origin: ErrorOrigin, problems: Vec<String>) -> Self {
        let message = format!("validation failed: {}", problems.join("; "));

        Self {
            class: ErrorClass::Validation,
            origin,
            message,
            detail: Some(ErrorDetail::Validation(problems)),
        }
    }

    /// Construct a lock-acquisition failure.
    pub fn concurrency(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Concurrency, ErrorOrigin::Lock, message)
    }

    /// Construct a not-found error for one entity identity.
    pub fn not_found(entity: impl Into<String>, key: impl Into<String>) -> Self {
        let entity = entity.into();
        let key = key.into();

        Self {
            class: ErrorClass::NotFound,
            origin: ErrorOrigin::Record,
            message: format!("record not found: {entity} key={key}"),
            detail: Some(ErrorDetail::NotFound { entity, key }),
        }
    }

    pub(crate) fn storage_internal(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Internal, ErrorOrigin::Storage, message)
    }

    pub(crate) fn corruption(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Corruption, origin, message)
    }

    pub(crate) fn conflict(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Conflict, origin, message)
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.class, ErrorClass::NotFound)
    }

    #[must_use]
    pub const fn is_usage(&self) -> bool {
        matches!(self.class, ErrorClass::Usage)
    }

    /// Borrow the accumulated validation problems, if any.
    #[must_use]
    pub fn problems(&self) -> &[String] {
        match &self.detail {
            Some(ErrorDetail::Validation(problems)) => problems,
            _ => &[],
        }
    }

    #[must_use]
    pub fn display_with_class(&self) -> String {
        format!("{}:{}: {}", self.origin, self.class, self.message)
    }
}

///
/// ErrorDetail
///

#[derive(Debug, Eq, PartialEq)]
pub enum ErrorDetail {
    Validation(Vec<String>),
    NotFound { entity: String, key: String },
}

///
/// ErrorClass
/// Internal error taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorClass {
    Usage,
    Validation,
    Concurrency,
    NotFound,
    Conflict,
    Corruption,
    Unsupported,
    Internal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Usage => "usage",
            Self::Validation => "validation",
            Self::Concurrency => "concurrency",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Corruption => "corruption",
            Self::Unsupported => "unsupported",
            Self::Internal => "internal",
        };
        write!(f, "{label}")
    }
}

///
/// ErrorOrigin
/// Subsystem that raised the error.
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorOrigin {
    Model,
    Lock,
    Record,
    Query,
    Collection,
    Schema,
    Storage,
    Serialize,
    Config,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Model => "model",
            Self::Lock => "lock",
            Self::Record => "record",
            Self::Query => "query",
            Self::Collection => "collection",
            Self::Schema => "schema",
            Self::Storage => "storage",
            Self::Serialize => "serialize",
            Self::Config => "config",
        };
        write!(f, "{label}")
    }
}

impl From<rusqlite::Error> for InternalError {
    fn from(err: rusqlite::Error) -> Self {
        Self::storage_internal(err.to_string())
    }
}

use std::borrow::Cow;
use std::fmt;

type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Classification of an engine failure.
///
/// The HTTP boundary maps each kind to exactly one status code, see
/// [`ErrorKind::status_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed descriptor: missing resource, misplaced key, unsupported content
    /// type, multi-column primary key, malformed `in` list...
    BadRequest,
    /// Action not permitted for the resource
    Forbidden,
    /// Zero rows matched a single-entity fetch/update/delete
    NotFound,
    /// Any other store or decoding failure
    Internal,
}

impl ErrorKind {
    #[inline]
    pub const fn status_code(self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Internal => 500,
        }
    }

    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad request",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not found",
            ErrorKind::Internal => "internal error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine error: a kind, a message, and an optional wrapped cause.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: Cow<'static, str>,
    #[source]
    cause: Option<Cause>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn bad_request(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn forbidden(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn not_found(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Wraps a foreign error as `Internal`, keeping it as the source.
    pub fn from_cause(cause: impl Into<Cause>) -> Self {
        let cause = cause.into();
        Self {
            kind: ErrorKind::Internal,
            message: Cow::Owned(cause.to_string()),
            cause: Some(cause),
        }
    }

    pub fn with_cause(mut self, cause: impl Into<Cause>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Replaces the message, keeping kind and cause.
    pub fn with_message(mut self, message: impl Into<Cow<'static, str>>) -> Self {
        self.message = message.into();
        self
    }

    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[inline]
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    #[inline]
    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }

    /// Message safe to hand to an untrusted caller. Internal failures never expose
    /// their message or cause.
    pub fn public_message(&self) -> &str {
        match self.kind {
            ErrorKind::Internal => ErrorKind::Internal.as_str(),
            _ => &self.message,
        }
    }

    #[inline]
    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(feature = "rusqlite")]
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::QueryReturnedNoRows => {
                Error::not_found("no rows in result set").with_cause(err)
            }
            rusqlite::Error::SqliteFailure(failure, _)
                if failure.code == rusqlite::ErrorCode::OperationInterrupted =>
            {
                Error::internal("execution cancelled").with_cause(err)
            }
            _ => Error::from_cause(err),
        }
    }
}

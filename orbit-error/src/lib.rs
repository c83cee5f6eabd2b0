#![deny(missing_docs)]

//! This crate defines error & result types for Orbit.
//! It also contains a variety of useful macros for error handling.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;
use std::{env, fmt, io};

/// A string that can be used as an error message.
#[derive(Debug)]
pub struct ErrString(Cow<'static, str>);

#[allow(clippy::fallible_impl_from)]
impl<T> From<T> for ErrString
where
    T: Into<Cow<'static, str>>,
{
    #[allow(clippy::panic)]
    fn from(msg: T) -> Self {
        if env::var("ORBIT_PANIC_ON_ERR").as_deref().unwrap_or("") == "1" {
            panic!("{}\nBacktrace:\n{}", msg.into(), Backtrace::capture());
        } else {
            Self(msg.into())
        }
    }
}

impl AsRef<str> for ErrString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for ErrString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for ErrString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

// Alias so `thiserror` does not treat these fields as backtrace providers,
// which would require the nightly-only `error_generic_member_access` feature.
type CapturedBacktrace = Backtrace;

/// The top-level error type for Orbit.
#[derive(thiserror::Error)]
#[non_exhaustive]
pub enum OrbitError {
    /// A record batch does not carry the schema the space expects.
    #[error("schema mismatch: {0}\nBacktrace:\n{1}")]
    SchemaMismatch(ErrString, CapturedBacktrace),
    /// No file system backend is registered for a URI scheme.
    #[error("{0}\nBacktrace:\n{1}")]
    UnsupportedScheme(ErrString, CapturedBacktrace),
    /// A file system operation on a path failed.
    #[error("{operation} {path} failed: {source}")]
    IOFailure {
        /// The operation that failed, e.g. `rename`.
        operation: &'static str,
        /// The path the operation was applied to.
        path: String,
        /// The underlying failure.
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
    /// The manifest could not be parsed or violates its invariants.
    #[error("corrupt manifest: {0}\nBacktrace:\n{1}")]
    ManifestCorrupt(ErrString, CapturedBacktrace),
    /// A path does not exist.
    #[error("not found: {0}\nBacktrace:\n{1}")]
    NotFound(ErrString, CapturedBacktrace),
    /// An argument is invalid.
    #[error("{0}\nBacktrace:\n{1}")]
    InvalidArgument(ErrString, CapturedBacktrace),
    /// A generic error.
    #[error("{0}\nBacktrace:\n{1}")]
    Generic(ErrString, CapturedBacktrace),
    /// A wrapper for other errors, carrying additional context.
    #[error("{0}: {1}")]
    Context(ErrString, #[source] Box<OrbitError>),
    /// A wrapper for errors from the Arrow library.
    #[error(transparent)]
    ArrowError(#[from] arrow_schema::ArrowError),
    /// A wrapper for errors from the Parquet library.
    #[cfg(feature = "parquet")]
    #[error(transparent)]
    ParquetError(#[from] parquet::errors::ParquetError),
    /// A wrapper for errors from the object store library.
    #[cfg(feature = "object_store")]
    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),
    /// A wrapper for IO errors.
    #[error(transparent)]
    IOError(#[from] io::Error),
    /// A wrapper for serde_json errors.
    #[cfg(feature = "serde")]
    #[error(transparent)]
    JSONError(#[from] serde_json::Error),
    /// A wrapper for URL parsing errors.
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),
}

impl OrbitError {
    /// Adds additional context to an error.
    pub fn with_context<T: Into<ErrString>>(self, msg: T) -> Self {
        OrbitError::Context(msg.into(), Box::new(self))
    }

    /// Wrap a failed file system operation with the operation name and the path it touched.
    pub fn io_failure<E>(operation: &'static str, path: impl Display, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        OrbitError::IOFailure {
            operation,
            path: path.to_string(),
            source: Box::new(source),
        }
    }

    /// Returns true if this error, or the error it wraps, reports a missing path.
    pub fn is_not_found(&self) -> bool {
        match self {
            OrbitError::NotFound(..) => true,
            OrbitError::Context(_, inner) => inner.is_not_found(),
            #[cfg(feature = "object_store")]
            OrbitError::ObjectStore(object_store::Error::NotFound { .. }) => true,
            _ => false,
        }
    }
}

impl Debug for OrbitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// A type alias for Results that return OrbitErrors as their error type.
pub type OrbitResult<T> = Result<T, OrbitError>;

/// A convenient macro for creating an OrbitError.
#[macro_export]
macro_rules! orbit_err {
    (SchemaMismatch: $($tt:tt)+) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::OrbitError::SchemaMismatch(format!($($tt)+).into(), Backtrace::capture())
        )
    }};
    (UnsupportedScheme: $($tt:tt)+) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::OrbitError::UnsupportedScheme(format!($($tt)+).into(), Backtrace::capture())
        )
    }};
    (ManifestCorrupt: $($tt:tt)+) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::OrbitError::ManifestCorrupt(format!($($tt)+).into(), Backtrace::capture())
        )
    }};
    (NotFound: $($tt:tt)+) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::OrbitError::NotFound(format!($($tt)+).into(), Backtrace::capture())
        )
    }};
    (InvalidArgument: $($tt:tt)+) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::OrbitError::InvalidArgument(format!($($tt)+).into(), Backtrace::capture())
        )
    }};
    (Context: $msg:literal, $err:expr) => {{
        $crate::__private::must_use(
            $crate::OrbitError::Context($msg.into(), Box::new($err))
        )
    }};
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::OrbitError::Generic(format!($fmt, $($arg),*).into(), Backtrace::capture())
        )
    }};
}

/// A convenient macro for returning an OrbitError.
#[macro_export]
macro_rules! orbit_bail {
    ($($tt:tt)+) => {
        return Err($crate::orbit_err!($($tt)+))
    };
}

#[doc(hidden)]
pub mod __private {
    #[doc(hidden)]
    #[inline]
    #[cold]
    #[must_use]
    pub const fn must_use(error: crate::OrbitError) -> crate::OrbitError {
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bail_schema() -> OrbitResult<()> {
        orbit_bail!(SchemaMismatch: "expected {} fields, got {}", 3, 2)
    }

    #[test]
    fn macros_pick_the_variant() {
        let err = bail_schema().unwrap_err();
        assert!(matches!(err, OrbitError::SchemaMismatch(..)));
        assert!(err.to_string().starts_with("schema mismatch: expected 3 fields, got 2"));

        let err = orbit_err!("plain {}", "message");
        assert!(matches!(err, OrbitError::Generic(..)));
    }

    #[test]
    fn not_found_survives_context() {
        let err = orbit_err!(NotFound: "_manifest").with_context("loading manifest");
        assert!(err.is_not_found());
        assert!(!orbit_err!(InvalidArgument: "nope").is_not_found());
    }

    #[test]
    fn io_failure_names_operation_and_path() {
        let err = OrbitError::io_failure(
            "rename",
            "root/_manifest.tmp",
            io::Error::other("disk on fire"),
        );
        assert_eq!(
            err.to_string(),
            "rename root/_manifest.tmp failed: disk on fire"
        );
    }
}

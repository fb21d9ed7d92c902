// Error plumbing for the P.1203 quality-estimation pipeline.
//
// Adapted from a `failure`-based `Context<ErrorKind>` wrapper: a single
// concrete `Error` type carries a classified `ErrorKind` plus an optional
// chain of causes, so callers can match on the kind (for control flow, e.g.
// deciding whether an input error is fatal) while still getting a readable
// message for logs.

use failure::{Backtrace, Context, Fail};
use std::fmt::{self, Write};

/// Returns a pretty-and-informative version of `e`, including the full
/// cause chain and a backtrace if one was captured.
pub fn prettify_failure(e: &failure::Error) -> String {
    let mut msg = e.to_string();
    for cause in e.iter_causes() {
        write!(&mut msg, "\ncaused by: {}", cause).unwrap();
    }
    if e.backtrace().is_empty() {
        write!(
            &mut msg,
            "\n\n(set environment variable RUST_BACKTRACE=1 to see backtraces)"
        )
        .unwrap();
    } else {
        write!(&mut msg, "\n\nBacktrace:\n{}", e.backtrace()).unwrap();
    }
    msg
}

#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        *self.inner.get_context()
    }
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(inner: Context<ErrorKind>) -> Error {
        Error { inner }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.inner.cause() {
            None => fmt::Display::fmt(&self.kind(), f),
            Some(c) => write!(f, "{}: {}", self.kind(), c),
        }
    }
}

/// Classification of the fatal conditions a session can hit. Every variant
/// here aborts the session cleanly with no partial result; anything that
/// shouldn't abort is logged as a warning through `tracing` instead, not
/// represented here.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Fail)]
#[non_exhaustive]
#[rustfmt::skip]
pub enum ErrorKind {
    /// Missing `I13`/`O22`, or an unparsable `displaySize`.
    #[fail(display = "Schema error")] SchemaError,
    #[fail(display = "Unsupported audio codec")] UnsupportedAudioCodec,
    #[fail(display = "Unsupported video codec")] UnsupportedVideoCodec,
    #[fail(display = "Codec switch within measurement window")] CodecSwitchInWindow,
    #[fail(display = "Invalid frame type")] InvalidFrameType,
    #[fail(display = "Missing QP values")] MissingQPValues,
    /// Non-H.264 codecs are only defined for mode 0.
    #[fail(display = "Unsupported mode for this codec")] UnsupportedMode,
    /// `calculate_integration` called before `calculate_pa`/`calculate_pv`.
    #[fail(display = "Usage error")] UsageError,
}

/// Extension methods for `Result`.
pub trait ResultExt<T, E> {
    /// Annotates an error with the given kind.
    fn err_kind(self, k: ErrorKind) -> Result<T, Error>;
}

impl<T, E> ResultExt<T, E> for Result<T, E>
where
    E: Into<failure::Error>,
{
    fn err_kind(self, k: ErrorKind) -> Result<T, Error> {
        self.map_err(|e| e.into().context(k).into())
    }
}

/// Like `failure::bail!`, but the first argument specifies a type as an `ErrorKind`.
#[macro_export]
macro_rules! bail_t {
    ($t:ident, $e:expr) => {
        return Err(failure::err_msg($e).context($crate::ErrorKind::$t).into());
    };
    ($t:ident, $fmt:expr, $($arg:tt)+) => {
        return Err(failure::err_msg(format!($fmt, $($arg)+)).context($crate::ErrorKind::$t).into());
    };
}

/// Like `failure::format_err!`, but the first argument specifies a type as an `ErrorKind`.
#[macro_export]
macro_rules! format_err_t {
    ($t:ident, $e:expr) => {
        Into::<$crate::Error>::into(failure::err_msg($e).context($crate::ErrorKind::$t))
    };
    ($t:ident, $fmt:expr, $($arg:tt)+) => {
        Into::<$crate::Error>::into(failure::err_msg(format!($fmt, $($arg)+))
                                    .context($crate::ErrorKind::$t))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bail_t_sets_kind_and_message() {
        let e = (|| -> Result<(), Error> {
            bail_t!(UnsupportedAudioCodec, "unknown codec: {}", "opus");
        })()
        .unwrap_err();
        assert_eq!(e.kind(), ErrorKind::UnsupportedAudioCodec);
        assert_eq!(e.to_string(), "Unsupported audio codec: unknown codec: opus");
    }

    #[test]
    fn err_kind_wraps_foreign_error() {
        let r: Result<(), std::num::ParseIntError> = "x".parse::<i32>().map(|_| ());
        let e = r.err_kind(ErrorKind::SchemaError).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::SchemaError);
    }
}

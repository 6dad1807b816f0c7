//! Helpers for error handling

/// Expands a given error type to wrap a stringified version of a given error
///
/// To be used in a map_err() call
#[macro_export]
macro_rules! err_str {
    ($x:expr) => {
        |e| $x(e.to_string())
    };
}

/// Formats an error with a static prefix, yielding a `String`
///
/// To be used in a map_err() call where the error type is a bare string
#[macro_export]
macro_rules! raw_err_str {
    ($fmt:expr) => {
        |e| format!($fmt, e)
    };
}

//! Errors surfaced by handlers to the code that owns them.
//!
//! Delivery failures never reach the logging call site; they are reported
//! on the diagnostic channel by the drain workers. The only error a caller
//! sees is an explicit refusal to perform an operation the handler does
//! not support.

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler cannot perform the requested composition.
    #[error("{0} is not supported by this handler")]
    Unsupported(&'static str),
}

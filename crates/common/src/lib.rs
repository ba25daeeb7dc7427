//! Shared foundation for the director crates.
//!
//! Hosts the [`Error`] type every layer speaks: the wire codec and the
//! netlink transport produce it, and the reconciler keys its recovery
//! policy off [`Error::is_fatal`] to choose between dropping a failed
//! event and rebuilding kernel state. Tracing setup lives here too, so
//! the daemon and the gated kernel tests initialize logging the same way.

pub mod error;
pub mod logging;

pub use error::{Error, Result};

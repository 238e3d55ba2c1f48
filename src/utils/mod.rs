//! The `utils` module provides the pieces shared by every other module:
//! the error taxonomy and the tracing setup used by the binary and tests.

pub mod error;
pub mod logging;

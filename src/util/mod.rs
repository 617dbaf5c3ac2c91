//! Utility types shared throughout the library:
//! - [`Error`] / [`Result`] - Error handling

mod error;

pub use error::*;

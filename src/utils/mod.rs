//! The `utils` module holds the pieces shared by every other module of
//! `homebus`: the crate-wide error type and logging setup.

pub mod error;
pub mod logging;

pub use error::{Error, Result};

#[cfg(test)]
mod tests;

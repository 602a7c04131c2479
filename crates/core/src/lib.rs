// crates/core/src/lib.rs
pub mod error;
pub mod runner;

pub use error::*;
pub use runner::*;

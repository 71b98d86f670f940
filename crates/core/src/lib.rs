//! Eclipse2D Core - Fundamental types and utilities

mod error;
mod types;
mod idgen;

pub use error::*;
pub use types::*;
pub use idgen::*;

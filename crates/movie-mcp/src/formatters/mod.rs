//! Output formatters for tool results.

mod markdown;

pub use markdown::*;

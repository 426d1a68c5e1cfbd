//! Core traits implemented by services.

mod dispose;
mod implements;

pub use dispose::Dispose;
pub use implements::Implements;

//! Request handlers for item sync.

mod pull;
mod push;

pub use pull::*;
pub use push::*;

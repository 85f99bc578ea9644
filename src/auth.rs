//! Upstream API scopes and the access-token model.

pub mod scope;
pub mod token;

pub use scope::*;
pub use token::*;

//! Runtime and interop helpers shared by the Data Connect client.

pub mod deferred;
pub mod runtime;
pub mod token;

pub use deferred::Deferred;
pub use token::{IdTokenListener, InternalAuthProvider, TokenError, TokenErrorKind};

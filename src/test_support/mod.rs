//! Test utilities shared across crate-level unit tests.

pub mod auth;
pub mod gate;
pub mod transport;

pub use auth::FakeAuthProvider;
pub use gate::CallGate;
pub use transport::{ScriptedTransport, TransportCall};

//! Rust client for Firebase Data Connect.
//!
//! [`data_connect`] holds the client itself; [`platform`] holds the runtime and auth interop
//! pieces it is built on.

pub mod data_connect;
pub mod platform;

#[cfg(test)]
pub mod test_support;

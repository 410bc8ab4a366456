//! Session ownership and lifecycle.

pub mod registry;

pub use registry::{SessionError, SessionRegistry, SessionSnapshot};

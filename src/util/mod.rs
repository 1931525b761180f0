//! Shared utilities

pub mod secret;

pub use secret::SecretString;

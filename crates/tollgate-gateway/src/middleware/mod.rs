//! Gateway middleware.

pub mod security;

pub use security::SecurityLayer;

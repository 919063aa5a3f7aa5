//! Common types used across the application.

pub mod hours;
pub mod id;

pub use hours::Hours;
pub use id::*;

//! cibox shared - Definitions used on both sides of the host/guest boundary
//!
//! This crate contains the error taxonomy, the fixed paths the host writes
//! into a container filesystem, and the constants both the library and the
//! CLI agree on.

pub mod constants;
pub mod errors;
pub mod layout;

pub use errors::{CiboxError, CiboxResult};
pub use layout::{GuestLayout, RootfsLayout};

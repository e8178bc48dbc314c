pub mod constants;
pub mod options;
pub mod types;

mod core;
pub use core::CiboxRuntime;
pub(crate) use core::{RuntimeInner, RuntimeInnerImpl};

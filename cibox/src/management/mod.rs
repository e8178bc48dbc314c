//! Container listing and garbage collection support.
//!
//! # Overview
//!
//! - **scan**: managed containers of a store with their metadata
//! - **visible_in**: which store a container belongs to when runtime and
//!   archive stores share a directory
//! - **ContainerSummary**: name + store + metadata (for list operations)
//!
//! Containers without the private `/cibox` directory are never reported.
//!
//! # Example
//!
//! ```rust,no_run
//! use cibox::{CiboxOptions, CiboxRuntime, StoreKind};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = CiboxRuntime::new(CiboxOptions::default())?;
//!
//! for summary in runtime.list_summaries(StoreKind::Archive, Some("nightly")).await? {
//!     println!("{}: exit {:?}", summary.name, summary.meta.exit_code);
//! }
//! # Ok(())
//! # }
//! ```

mod listing;

pub use listing::{ContainerSummary, visible_in};
pub(crate) use listing::{base_images, scan};

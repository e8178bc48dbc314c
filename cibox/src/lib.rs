//! cibox - throwaway LXC containers for CI jobs.
//!
//! A job clones a base container, prepares it once as root, boots it, runs
//! one command over ssh and is then archived or destroyed.
//!
//! ```rust,no_run
//! use cibox::{CiboxOptions, CiboxRuntime, CreateOptions, TeardownPolicy, run_guarded};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = CiboxRuntime::new(CiboxOptions::default())?;
//! let container = runtime.create("ubuntu-base", None, CreateOptions::default()).await?;
//!
//! let policy = TeardownPolicy { archive: false, archive_on_fail: true };
//! let run = run_guarded(container, policy, |c, outcome| {
//!     Box::pin(async move {
//!         c.start().await?;
//!         let status = c.run_command("make check").await?;
//!         outcome.set(status);
//!         c.stop().await?;
//!         Ok(status)
//!     })
//! })
//! .await;
//! println!("exit {:?}", run.result?);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod container;
pub mod management;
pub mod runtime;
pub mod util;

pub use backend::Backends;
pub use cibox_shared::errors::{CiboxError, CiboxResult};
pub use container::{
    ContainerMeta, LifecyclePhase, OutcomeCell, RuntimeContainer, RuntimeState, TeardownGuard,
    TeardownPolicy, TeardownReport, run_guarded,
};
pub use management::ContainerSummary;
pub use runtime::CiboxRuntime;
pub use runtime::options::{CiboxOptions, ResultsOwner, Timeouts};
pub use runtime::types::{CloneOptions, ContainerDescriptor, CreateOptions, Store, StoreKind};
pub use util::{Verbosity, init_logging};

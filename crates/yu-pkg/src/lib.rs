//! yu-pkg: Package manager adapters
//!
//! `pip` and `yum` wrappers that run locally through an [`Executor`](yu_exec::Executor)
//! or on a remote [`Node`](yu_node::Node).

pub mod error;
pub mod pip;
pub mod traits;
pub mod types;
pub mod yum;

pub use error::PackageError;
pub use pip::Pip;
pub use traits::PackageManager;
pub use types::{PackageManagerType, PackageSummary, PipSource, YumSource};
pub use yum::Yum;

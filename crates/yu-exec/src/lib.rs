//! yu-exec: Local and remote execution
//!
//! Provides the SSH/SFTP `Session`, a local process executor, and the traits the
//! node and package layers are written against.

pub mod error;
pub mod keys;
pub mod local;
pub mod result;
pub mod ssh;
pub mod traits;

pub use error::ExecError;
pub use keys::{KeyError, KeySource, ResolvedKey};
pub use local::LocalExecutor;
pub use result::{CommandOutput, FileStat, SessionConfig};
pub use ssh::{Session, shell_quote};
pub use traits::{Executor, Transport};

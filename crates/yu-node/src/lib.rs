//! yu-node: Remote nodes with a single reconnect-and-retry policy
//!
//! `RemoteNode` wraps one transport to one host and hides transient connection
//! loss behind exactly one reconnect. `BuildNode` layers git, cmake and make on top
//! of anything implementing [`Node`].

pub mod build;
pub mod error;
pub mod location;
pub mod node;
pub mod traits;

pub use build::{BuildNode, DEFAULT_CHECKOUT_LOCATION};
pub use error::{BuildError, NodeError};
pub use location::Location;
pub use node::RemoteNode;
pub use traits::Node;

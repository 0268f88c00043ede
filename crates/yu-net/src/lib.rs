//! yu-net: Network reachability diagnostics
//!
//! DNS, ping, TCP and HTTP probes combined into a [`ConnectivityStatus`] report.

pub mod connectivity;
pub mod error;

pub use connectivity::{ConnectivityChecker, ConnectivityConfig, ConnectivityStatus};
pub use error::NetError;

//! Error types for yu-net

use thiserror::Error;

/// Errors from connectivity diagnostics
///
/// Individual probes report `false` rather than failing; these cover setup and
/// the resolver file.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("failed to read resolver configuration {path}: {source}")]
    ResolverConfig {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid proxy {proxy}: {source}")]
    InvalidProxy {
        proxy: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

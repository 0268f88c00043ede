//! Package manager trait

use async_trait::async_trait;

use crate::error::PackageError;
use crate::types::PackageManagerType;

/// Operations every local package manager supports
#[async_trait]
pub trait PackageManager: Send + Sync {
    async fn is_package_installed(&self, name: &str) -> Result<bool, PackageError>;

    async fn install_package(&self, name: &str) -> Result<(), PackageError>;

    /// Install several packages in one invocation
    async fn install_packages(&self, names: &[String]) -> Result<(), PackageError>;

    async fn remove_package(&self, name: &str) -> Result<(), PackageError>;

    fn manager_type(&self) -> PackageManagerType;
}

use async_trait::async_trait;

use crate::resolver::DistEntry;

/// Decides whether a distribution index entry may be selected.
///
/// Implementations may suspend, e.g. to consult a remote allow-list.
#[async_trait]
pub trait ApproveVersion: Send + Sync {
    async fn approve_version(&self, entry: &DistEntry) -> anyhow::Result<bool>;
}

/// Decides whether a manifest filepath may be downloaded.
#[async_trait]
pub trait ApproveFilename: Send + Sync {
    async fn approve_filename(&self, filepath: &str) -> anyhow::Result<bool>;
}

/// Approves every version. The default version predicate.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysApprove;

#[async_trait]
impl ApproveVersion for AlwaysApprove {
    async fn approve_version(&self, _entry: &DistEntry) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// Adapts a synchronous closure into either predicate trait.
pub struct ApproveFn<F>(pub F);

#[async_trait]
impl<F> ApproveVersion for ApproveFn<F>
where
    F: Fn(&DistEntry) -> bool + Send + Sync,
{
    async fn approve_version(&self, entry: &DistEntry) -> anyhow::Result<bool> {
        Ok((self.0)(entry))
    }
}

#[async_trait]
impl<F> ApproveFilename for ApproveFn<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    async fn approve_filename(&self, filepath: &str) -> anyhow::Result<bool> {
        Ok((self.0)(filepath))
    }
}

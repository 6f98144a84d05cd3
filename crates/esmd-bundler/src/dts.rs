//! Declaration-file transformer seam.

use async_trait::async_trait;
use esmd_npm::Pkg;

use crate::Result;

/// Rewrites a package's `.d.ts` tree so its imports point at CDN URLs.
#[async_trait]
pub trait DtsTransformer: Send + Sync {
    /// Returns how many declaration files were written.
    async fn transform(&self, pkg: &Pkg, dts: &str) -> Result<usize>;
}

/// Leaves declaration files alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDtsTransformer;

#[async_trait]
impl DtsTransformer for NoopDtsTransformer {
    async fn transform(&self, _pkg: &Pkg, _dts: &str) -> Result<usize> {
        Ok(0)
    }
}

//! Per-task runtime options.

use crate::paths::BundleMode;
use crate::target::Target;

/// Runtime knobs of one build task, shared with its sub-builds.
///
/// ```
/// use esmd_bundler::{BuildOptions, Target};
///
/// let options = BuildOptions::new(Target::Deno).dev(true).bundle(true);
/// assert!(options.dev && options.bundle && !options.no_bundle);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    pub target: Target,
    /// Development build: no minification, `NODE_ENV=development`.
    pub dev: bool,
    /// Inline every dependency except peers and forced externals.
    pub bundle: bool,
    /// Split every in-package module into its own build.
    pub no_bundle: bool,
}

impl BuildOptions {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            ..Default::default()
        }
    }

    pub fn target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    pub fn dev(mut self, dev: bool) -> Self {
        self.dev = dev;
        self
    }

    pub fn bundle(mut self, bundle: bool) -> Self {
        self.bundle = bundle;
        self
    }

    pub fn no_bundle(mut self, no_bundle: bool) -> Self {
        self.no_bundle = no_bundle;
        self
    }

    pub fn mode(&self) -> BundleMode {
        BundleMode::from_flags(self.bundle, self.no_bundle)
    }

    pub fn node_env(&self) -> &'static str {
        if self.dev { "development" } else { "production" }
    }
}

//! Mutable state of one build task, appended to from resolve hooks.

use esmd_npm::Pkg;
use parking_lot::Mutex;
use tracing::debug;

use crate::policy::ImportKind;
use crate::registry::SubBuildRegistry;

/// A sub-build claimed by this task, run after its own pass completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSubBuild {
    pub id: String,
    pub pkg: Pkg,
}

/// What the resolve hooks recorded during one engine pass.
#[derive(Debug, Clone, Default)]
pub struct Records {
    /// Resolved external paths, in resolution order, duplicates included.
    pub imports: Vec<String>,
    /// `(specifier, resolved path)` for every `require()` reference.
    pub requires: Vec<(String, String)>,
    /// A `.wasm` file was inlined into the bundle.
    pub embedded_wasm: bool,
}

#[derive(Debug, Default)]
struct State {
    records: Records,
    pending: Vec<PendingSubBuild>,
}

/// Lock-protected build context. Hooks run concurrently on the engine's
/// workers; the lock is only held while appending.
#[derive(Debug, Default)]
pub struct BuildContext {
    state: Mutex<State>,
    registry: SubBuildRegistry,
}

impl BuildContext {
    pub fn new(registry: SubBuildRegistry) -> Self {
        Self {
            state: Mutex::new(State::default()),
            registry,
        }
    }

    pub fn registry(&self) -> &SubBuildRegistry {
        &self.registry
    }

    /// Record an externalized dependency and return the specifier the
    /// engine should keep in the output.
    ///
    /// Dynamic imports are not recorded. `require()` references keep their
    /// literal specifier so the injected dispatcher can route them.
    pub fn record_external(&self, kind: ImportKind, specifier: &str, path: &str) -> String {
        let mut state = self.state.lock();
        if kind != ImportKind::DynamicImport {
            state.records.imports.push(path.to_string());
        }
        if kind == ImportKind::Require {
            state
                .records
                .requires
                .push((specifier.to_string(), path.to_string()));
            return specifier.to_string();
        }
        path.to_string()
    }

    pub fn mark_embedded_wasm(&self) {
        self.state.lock().records.embedded_wasm = true;
    }

    /// Claim `id` in the shared registry and queue it. Returns `false` when
    /// another task of the same request already owns it.
    pub fn schedule_sub_build(&self, id: &str, pkg: &Pkg) -> bool {
        if !self.registry.try_register(id) {
            return false;
        }
        debug!(id, "scheduled sub-build");
        self.state.lock().pending.push(PendingSubBuild {
            id: id.to_string(),
            pkg: pkg.clone(),
        });
        true
    }

    /// Forget what the previous pass recorded. Claimed sub-builds stay
    /// queued; the registry never releases an id.
    pub fn reset(&self) {
        self.state.lock().records = Records::default();
    }

    pub fn snapshot(&self) -> Records {
        self.state.lock().records.clone()
    }

    pub fn take_pending(&self) -> Vec<PendingSubBuild> {
        std::mem::take(&mut self.state.lock().pending)
    }
}

//! Request-scoped set of sub-build identifiers.

use std::sync::Arc;

use dashmap::DashSet;

/// Shared by every task spawned for one top-level request. Cloning shares
/// the underlying set.
#[derive(Debug, Clone, Default)]
pub struct SubBuildRegistry {
    ids: Arc<DashSet<String>>,
}

impl SubBuildRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id`. Only the first caller for a given id gets `true`.
    pub fn try_register(&self, id: &str) -> bool {
        self.ids.insert(id.to_string())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registers_once() {
        let registry = SubBuildRegistry::new();
        let shared = registry.clone();
        assert!(registry.try_register("a@1.0.0/es2022/b.js"));
        assert!(!shared.try_register("a@1.0.0/es2022/b.js"));
        assert!(shared.contains("a@1.0.0/es2022/b.js"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_claims_have_one_winner() {
        let registry = SubBuildRegistry::new();
        let winners: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let registry = registry.clone();
                    scope.spawn(move || usize::from(registry.try_register("x")))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(winners, 1);
    }
}

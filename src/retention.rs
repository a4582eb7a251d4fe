//! Retention engine
//!
//! Resolves a service's effective keep-counts (service override, then the
//! priority-class table, then the hard fallback) and drives the snapshot
//! store's forget/prune. Retention is always scoped to exactly one service's
//! tag so a tagging mistake can never delete another service's data.

use crate::config::{ClassRetention, Priority, RetentionPolicy, ServiceSpec};
use crate::utils::store::{SnapshotStore, TagSet};
use anyhow::{Context, Result};
use std::collections::HashMap;
use tracing::info;

/// Hard fallback when neither the service nor its priority class configures
/// a keep-count
pub const FALLBACK_POLICY: RetentionPolicy = RetentionPolicy {
    daily: 7,
    weekly: 4,
    monthly: 6,
};

pub struct RetentionEngine {
    class_defaults: HashMap<Priority, ClassRetention>,
}

impl RetentionEngine {
    pub fn new(class_defaults: HashMap<Priority, ClassRetention>) -> Self {
        Self { class_defaults }
    }

    /// Effective keep-counts for a service, resolved field-wise:
    /// service override > priority-class table > 7/4/6
    pub fn effective_policy(&self, spec: &ServiceSpec) -> RetentionPolicy {
        let class = self.class_defaults.get(&spec.priority);
        let overrides = spec.retention.as_ref();

        let pick = |field: fn(&ClassRetention) -> Option<u32>, fallback: u32| {
            overrides
                .and_then(field)
                .or_else(|| class.and_then(field))
                .unwrap_or(fallback)
        };

        RetentionPolicy {
            daily: pick(|r| r.daily, FALLBACK_POLICY.daily),
            weekly: pick(|r| r.weekly, FALLBACK_POLICY.weekly),
            monthly: pick(|r| r.monthly, FALLBACK_POLICY.monthly),
        }
    }

    /// Prune this service's snapshots outside the keep window
    pub fn apply(&self, store: &dyn SnapshotStore, spec: &ServiceSpec) -> Result<()> {
        let policy = self.effective_policy(spec);
        info!(
            "Retention for '{}' ({}): keep {}d/{}w/{}m",
            spec.name, spec.priority, policy.daily, policy.weekly, policy.monthly
        );

        store
            .forget(&TagSet::service(&spec.name), &policy, true)
            .with_context(|| format!("Retention failed for service '{}'", spec.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptureSpec;
    use crate::utils::store::mock::{MemoryStore, StoreCall};
    use std::path::PathBuf;

    fn service(priority: Priority, retention: Option<ClassRetention>) -> ServiceSpec {
        ServiceSpec {
            name: "wiki".to_string(),
            priority,
            capture: CaptureSpec::Directory {
                path: PathBuf::from("/data/wiki"),
            },
            compose: None,
            requires_quiesce: false,
            aux_volumes: vec![],
            aux_directories: vec![],
            allow_passwordless: false,
            retention,
        }
    }

    fn engine_with_critical_defaults() -> RetentionEngine {
        let mut defaults = HashMap::new();
        defaults.insert(
            Priority::Critical,
            ClassRetention {
                daily: Some(14),
                weekly: Some(8),
                monthly: None,
            },
        );
        RetentionEngine::new(defaults)
    }

    #[test]
    fn falls_back_to_hard_defaults() {
        let engine = RetentionEngine::new(HashMap::new());
        let policy = engine.effective_policy(&service(Priority::Medium, None));
        assert_eq!(policy, FALLBACK_POLICY);
    }

    #[test]
    fn class_table_overrides_fallback_field_wise() {
        let engine = engine_with_critical_defaults();
        let policy = engine.effective_policy(&service(Priority::Critical, None));
        assert_eq!(policy.daily, 14);
        assert_eq!(policy.weekly, 8);
        // monthly unset on the class table falls through to the hard default
        assert_eq!(policy.monthly, 6);
    }

    #[test]
    fn service_override_wins_over_class_table() {
        let engine = engine_with_critical_defaults();
        let policy = engine.effective_policy(&service(
            Priority::Critical,
            Some(ClassRetention {
                daily: Some(2),
                weekly: Some(1),
                monthly: Some(1),
            }),
        ));
        assert_eq!(
            policy,
            RetentionPolicy {
                daily: 2,
                weekly: 1,
                monthly: 1
            }
        );
    }

    #[test]
    fn apply_scopes_forget_to_the_service_tag_only() {
        let engine = engine_with_critical_defaults();
        let store = MemoryStore::new();
        let spec = service(Priority::Critical, None);

        engine.apply(&store, &spec).unwrap();

        let forgets = store.forget_calls();
        assert_eq!(forgets.len(), 1);
        match &forgets[0] {
            StoreCall::Forget { tags, policy, prune } => {
                assert_eq!(tags, &vec!["wiki".to_string()]);
                assert_eq!(policy.daily, 14);
                assert!(*prune);
            }
            other => panic!("unexpected call: {:?}", other),
        }
    }
}

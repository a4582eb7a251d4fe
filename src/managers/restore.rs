//! Restore orchestration
//!
//! Restores a service's primary artifact for a chosen snapshot, then its
//! auxiliary artifacts at their own latest generation. Auxiliary failures
//! degrade to warnings; only the primary artifact can fail the operation.
//! Restores are destructive, so interactive runs confirm before touching
//! anything.

use crate::config::{GlobalConfig, ServiceSpec};
use crate::managers::notification::NotificationManager;
use crate::strategies::{self, RestoreError, RestoreReport, SnapshotSelector, StrategyContext};
use crate::utils::locker::ServiceLock;
use crate::utils::runtime::ContainerRuntime;
use crate::utils::store::SnapshotStore;
use anyhow::{Context, Result};
use dialoguer::Confirm;
use tracing::{info, warn};

pub struct RestoreOrchestrator<'a> {
    store: &'a dyn SnapshotStore,
    runtime: &'a dyn ContainerRuntime,
    notifier: &'a NotificationManager,
    global: &'a GlobalConfig,
}

impl<'a> RestoreOrchestrator<'a> {
    pub fn new(
        store: &'a dyn SnapshotStore,
        runtime: &'a dyn ContainerRuntime,
        notifier: &'a NotificationManager,
        global: &'a GlobalConfig,
    ) -> Self {
        Self {
            store,
            runtime,
            notifier,
            global,
        }
    }

    fn context(&self) -> StrategyContext<'_> {
        StrategyContext {
            store: self.store,
            runtime: self.runtime,
            compose_root: &self.global.compose_root,
            scratch_root: &self.global.scratch_dir,
        }
    }

    /// Prompt before a destructive restore unless `assume_yes` was passed
    pub fn confirm(&self, spec: &ServiceSpec, assume_yes: bool) -> Result<bool> {
        if assume_yes {
            return Ok(true);
        }
        Confirm::new()
            .with_prompt(format!(
                "Restore '{}'? This replaces its current data",
                spec.name
            ))
            .default(false)
            .interact()
            .context("confirmation prompt failed")
    }

    /// Restore the service's primary artifact at the selected snapshot, then
    /// its auxiliary artifacts best effort.
    pub fn restore_service(
        &self,
        spec: &ServiceSpec,
        selector: &SnapshotSelector,
    ) -> Result<RestoreReport, RestoreError> {
        info!(service = %spec.name, ?selector, "starting restore");

        // The stack's stopped state is exclusive with a concurrent backup
        let mut lock = ServiceLock::open(&spec.name).map_err(RestoreError::Locked)?;
        let _guard = match lock.try_acquire() {
            Ok(guard) => guard,
            Err(e) => {
                self.notifier
                    .send_failure(&format!("restore: {}", spec.name), &format!("{:#}", e));
                return Err(RestoreError::Locked(e));
            }
        };

        let ctx = self.context();
        let strategy = strategies::strategy_for(&spec.capture);

        let mut report = match strategy.restore(&ctx, spec, selector) {
            Ok(report) => report,
            Err(e) => {
                self.notifier
                    .send_failure(&format!("restore: {}", spec.name), &e.to_string());
                return Err(e);
            }
        };

        report.merge(strategies::restore_aux_artifacts(&ctx, spec));

        if report.warnings.is_empty() {
            info!(service = %spec.name, "restore complete");
            self.notifier.send_success(
                &format!("restore: {}", spec.name),
                &report.restored.join("\n"),
            );
        } else {
            warn!(
                service = %spec.name,
                warnings = report.warnings.len(),
                "restore complete with warnings"
            );
            self.notifier.send_warning(
                &format!("restore: {}", spec.name),
                &report.warnings.join("\n"),
            );
        }
        Ok(report)
    }
}

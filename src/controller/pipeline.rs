//! Stage pipeline driver.
//!
//! Stages run strictly in order.  Every product in a stage is reconciled on
//! each pass, in declaration order, and its errors are collected rather than
//! returned early; the stage completes only when every product does.  The
//! first incomplete stage ends the pass.
//!
//! Results are returned as values.  The caller folds them into the status.

use std::collections::BTreeMap;

use kube::ResourceExt;
use tracing::{debug, warn};

use crate::crd::rhmi::{Rhmi, RhmiProductStatus, RhmiStageStatus};
use crate::crd::shared::{ProductName, StatusPhase};
use crate::error::{Error, ErrorList};
use crate::products::ProductRegistry;

use super::quota::Quota;
use super::topology::StageSpec;
use super::watches::{owner_ref, WatchProvisioner, WatchSync};

/// Outcome of one stage in one pass.
#[derive(Debug)]
pub struct StageResult {
    pub name: String,
    pub phase: StatusPhase,
    pub products: BTreeMap<String, RhmiProductStatus>,
    pub errors: ErrorList,
    /// Some product reported a version other than the one this release ships.
    pub version_mismatch: bool,
}

impl StageResult {
    pub fn new(name: &str, phase: StatusPhase) -> Self {
        Self {
            name: name.to_string(),
            phase,
            products: BTreeMap::new(),
            errors: ErrorList::new(),
            version_mismatch: false,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.phase.is_completed()
    }

    pub fn to_status(&self) -> RhmiStageStatus {
        RhmiStageStatus {
            name: self.name.clone(),
            phase: self.phase,
            products: self.products.clone(),
        }
    }
}

/// Everything one pass through the install stages produced.
#[derive(Debug, Default)]
pub struct PipelineOutcome {
    /// Attempted stages, in order.  Later stages were not reached.
    pub stages: Vec<StageResult>,
    pub version_mismatch: bool,
    /// Some stage is not Completed.
    pub in_progress: bool,
    /// Products reconciled in install mode this pass.
    pub attempted: Vec<ProductName>,
}

impl PipelineOutcome {
    /// The stage the pass stopped on, or the last one when all completed.
    pub fn current_stage(&self) -> Option<&StageResult> {
        self.stages
            .iter()
            .find(|s| !s.is_completed())
            .or_else(|| self.stages.last())
    }

    /// All collected errors, one per line.
    pub fn last_error(&self) -> String {
        self.stages
            .iter()
            .flat_map(|s| s.errors.iter())
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Every stage ran and completed with matching product versions.
    pub fn is_settled(&self) -> bool {
        !self.in_progress && !self.version_mismatch
    }
}

/// Reconcile every product of one stage.
pub async fn process_stage(
    installation: &Rhmi,
    stage: &StageSpec,
    registry: &ProductRegistry,
    watches: &dyn WatchProvisioner,
    quota: &Quota,
) -> StageResult {
    let owner = owner_ref(installation);
    let mut result = StageResult::new(stage.name, StatusPhase::InProgress);
    let mut all_completed = true;
    let mut watch_failed = false;

    for &product in &stage.products {
        let reconciler = match registry.build(product, installation) {
            Ok(r) => r,
            Err(e) => {
                warn!(stage = stage.name, %product, error = %e, "no reconciler for product");
                result.errors.push(e.context(format!("failed to build a reconciler for {product}")));
                result.phase = StatusPhase::Failed;
                return result;
            }
        };

        if !reconciler.verify_version(installation) {
            debug!(%product, "installed product version differs from the shipped one");
            result.version_mismatch = true;
        }

        let previous = installation.product_status(product);
        let status = match reconciler
            .reconcile(installation, &previous, &quota.product(product), false)
            .await
        {
            Ok(status) => status,
            Err(e) => {
                warn!(stage = stage.name, %product, error = %e, "product reconcile failed");
                result.errors.push(e.context(format!("failed installation of {product}")));
                let mut failed = previous;
                failed.phase = StatusPhase::Failed;
                failed
            }
        };

        if status.phase.is_completed() {
            let namespace = reconciler.namespace();
            for kind in reconciler.watchable_kinds() {
                match watches.ensure_watch(&kind, &namespace, &owner).await {
                    Ok(WatchSync::Synced) => {}
                    Ok(WatchSync::Pending) => {
                        watch_failed = true;
                        result.errors.push(Error::WatchSync(format!(
                            "a {kind} watch for {product} has not synced"
                        )));
                    }
                    Err(e) => {
                        watch_failed = true;
                        result
                            .errors
                            .push(e.context(format!("failed to create a {kind} watch for {product}")));
                    }
                }
            }
        } else {
            all_completed = false;
        }

        result.products.insert(product.to_string(), status);
    }

    result.phase = if watch_failed {
        StatusPhase::Failed
    } else if all_completed {
        StatusPhase::Completed
    } else {
        StatusPhase::InProgress
    };
    debug!(name = %installation.name_any(), stage = stage.name, phase = %result.phase, "stage processed");
    result
}

/// Walk the install stages until one is incomplete.  The bootstrap stage is
/// not reconciled here; its precomputed result stands in for it.
pub async fn run_install_stages(
    installation: &Rhmi,
    stages: &[StageSpec],
    bootstrap: StageResult,
    registry: &ProductRegistry,
    watches: &dyn WatchProvisioner,
    quota: &Quota,
) -> PipelineOutcome {
    let mut outcome = PipelineOutcome::default();
    let mut bootstrap = Some(bootstrap);

    for stage in stages {
        let result = if stage.is_bootstrap() {
            match bootstrap.take() {
                Some(b) => b,
                None => StageResult::new(stage.name, StatusPhase::Completed),
            }
        } else {
            outcome.attempted.extend(stage.products.iter().copied());
            process_stage(installation, stage, registry, watches, quota).await
        };

        outcome.version_mismatch |= result.version_mismatch;
        let completed = result.is_completed();
        outcome.stages.push(result);
        if !completed {
            outcome.in_progress = true;
            break;
        }
    }

    outcome
}

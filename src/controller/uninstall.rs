//! Uninstall finalizer tracker.
//!
//! Products are torn down stage by stage in the reverse-topology order.  A
//! product keeps its `<product>.integreatly.org/finalizer` on the
//! installation until its own uninstall reports Completed, so the
//! installation object outlives every product.  Once only the top-level
//! finalizer is left the shared bootstrap resources are removed and the
//! object is released.

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams,
};
use kube::{Client, ResourceExt};
use tracing::{debug, info, warn};

use crate::crd::rhmi::Rhmi;
use crate::crd::shared::StatusPhase;
use crate::error::{is_not_found, Error, Result};
use crate::helpers::OperatorConfig;
use crate::products::ProductRegistry;

use super::bootstrap::CLOUD_RESOURCE_CONFIG_MAP;
use super::helpers::{
    patch_finalizers, without_finalizer, DELETION_FINALIZER, LEGACY_DELETION_FINALIZER,
};
use super::pipeline::StageResult;
use super::quota::{ProductQuota, QUOTA_CONFIG_MAP, QUOTA_PARAM};
use super::topology::StageSpec;

/// Label selecting the alert rules the installation created.
pub const ALERT_RULE_SELECTOR: &str = "integreatly=yes";

/// Result of walking the uninstall stages once.
#[derive(Debug, Default)]
pub struct FinalizerPass {
    /// Stages attempted, in order.
    pub stages: Vec<StageResult>,
    /// Finalizer list after releasing every product that finished.
    pub finalizers: Vec<String>,
    /// Some stage still has products tearing down.
    pub pending: bool,
}

impl FinalizerPass {
    pub fn errors(&self) -> String {
        self.stages
            .iter()
            .flat_map(|s| s.errors.iter())
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Only the top-level finalizer is left.
    pub fn products_released(&self) -> bool {
        !self.pending && self.finalizers.iter().all(|f| f == DELETION_FINALIZER)
    }
}

/// Uninstall every product that still holds a finalizer, stage by stage.
/// Stops at the first stage with a product still tearing down.
pub async fn release_product_finalizers(
    installation: &Rhmi,
    stages: &[StageSpec],
    registry: &ProductRegistry,
) -> FinalizerPass {
    let mut pass = FinalizerPass {
        finalizers: installation.finalizers().to_vec(),
        ..Default::default()
    };

    for stage in stages {
        let mut result = StageResult::new(stage.name, StatusPhase::InProgress);
        let mut stage_pending = false;

        for &product in &stage.products {
            let finalizer = product.finalizer();
            if !pass.finalizers.contains(&finalizer) {
                continue;
            }

            let reconciler = match registry.build(product, installation) {
                Ok(r) => r,
                Err(e) => {
                    result
                        .errors
                        .push(e.context(format!("failed to build a reconciler for {product}")));
                    stage_pending = true;
                    continue;
                }
            };

            let previous = installation.product_status(product);
            match reconciler
                .reconcile(installation, &previous, &ProductQuota::default(), true)
                .await
            {
                Ok(status) => {
                    if status.phase.is_completed() {
                        info!(%product, "product uninstalled, releasing finalizer");
                        pass.finalizers = without_finalizer(&pass.finalizers, &finalizer);
                    } else {
                        debug!(%product, phase = %status.phase, "product still uninstalling");
                        stage_pending = true;
                    }
                    result.products.insert(product.to_string(), status);
                }
                Err(e) => {
                    warn!(stage = stage.name, %product, error = %e, "product uninstall failed");
                    result.errors.push(e.context(format!("failed uninstall of {product}")));
                    stage_pending = true;
                }
            }
        }

        result.phase = if stage_pending {
            StatusPhase::InProgress
        } else {
            StatusPhase::Completed
        };
        pass.stages.push(result);
        if stage_pending {
            pass.pending = true;
            break;
        }
    }

    pass
}

/// Delete every alert rule the installation labelled.  A cluster without
/// the rule API has none.
pub async fn delete_alert_rules(client: &Client) -> Result<()> {
    let ar = ApiResource::from_gvk(&GroupVersionKind::gvk(
        "monitoring.rhobs",
        "v1",
        "PrometheusRule",
    ));
    let rules: Api<DynamicObject> = Api::all_with(client.clone(), &ar);
    let list = match rules
        .list(&ListParams::default().labels(ALERT_RULE_SELECTOR))
        .await
    {
        Ok(list) => list,
        Err(e) if is_not_found(&e) => return Ok(()),
        Err(e) => return Err(Error::from(e).context("failed to list alert rules")),
    };

    for rule in list.items {
        let ns = rule.namespace().unwrap_or_default();
        let name = rule.name_any();
        let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), &ns, &ar);
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => debug!(%name, namespace = %ns, "deleted alert rule"),
            Err(e) if is_not_found(&e) => {}
            Err(e) => {
                return Err(Error::from(e).context(format!("failed to delete alert rule {ns}/{name}")))
            }
        }
    }
    Ok(())
}

async fn delete_config_map(cms: &Api<ConfigMap>, name: &str) -> Result<()> {
    match cms.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => Err(Error::from(e).context(format!("failed to delete {name} config map"))),
    }
}

/// Remove the shared resources bootstrap created.
pub async fn remove_bootstrap_resources(
    client: &Client,
    installation: &Rhmi,
    config: &OperatorConfig,
) -> Result<()> {
    let ns = installation.namespace().unwrap_or_default();
    let cms: Api<ConfigMap> = Api::namespaced(client.clone(), &ns);

    let installation_cm = config.installation_config_map_name(&installation.spec.namespace_prefix);
    delete_config_map(&cms, &installation_cm).await?;
    delete_config_map(&cms, QUOTA_CONFIG_MAP).await?;

    if let Some(cloud_config) = cms.get_opt(CLOUD_RESOURCE_CONFIG_MAP).await? {
        let finalizers = without_finalizer(
            &without_finalizer(cloud_config.finalizers(), DELETION_FINALIZER),
            LEGACY_DELETION_FINALIZER,
        );
        if finalizers.len() != cloud_config.finalizers().len() {
            patch_finalizers(&cms, &cloud_config, &finalizers).await?;
        }
        delete_config_map(&cms, CLOUD_RESOURCE_CONFIG_MAP).await?;
    }
    Ok(())
}

/// Remove the add-on subscription and the CSV it installed from the
/// operator namespace.  Objects already gone are ignored.
pub async fn uninstall_operator(client: &Client, namespace: &str) -> Result<()> {
    let sub_ar = ApiResource::from_gvk(&GroupVersionKind::gvk(
        "operators.coreos.com",
        "v1alpha1",
        "Subscription",
    ));
    let csv_ar = ApiResource::from_gvk(&GroupVersionKind::gvk(
        "operators.coreos.com",
        "v1alpha1",
        "ClusterServiceVersion",
    ));
    let subs: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, &sub_ar);
    let csvs: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, &csv_ar);

    let subscription = match subs.get_opt(QUOTA_PARAM).await {
        Ok(sub) => sub,
        Err(e) if is_not_found(&e) => None,
        Err(e) => return Err(e.into()),
    };
    let Some(subscription) = subscription else {
        debug!(%namespace, "no add-on subscription to remove");
        return Ok(());
    };

    let installed_csv = subscription
        .data
        .pointer("/status/installedCSV")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    match subs.delete(QUOTA_PARAM, &DeleteParams::default()).await {
        Ok(_) => info!(subscription = QUOTA_PARAM, "deleted add-on subscription"),
        Err(e) if is_not_found(&e) => {}
        Err(e) => return Err(e.into()),
    }
    if let Some(csv) = installed_csv {
        match csvs.delete(&csv, &DeleteParams::default()).await {
            Ok(_) => info!(%csv, "deleted operator csv"),
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// What one uninstall pass did.
#[derive(Debug)]
pub struct UninstallOutcome {
    pub pass: FinalizerPass,
    /// The top-level finalizer was removed and the object is gone or going.
    pub completed: bool,
}

/// One uninstall pass over a deleting installation.
pub async fn run_uninstall(
    client: &Client,
    installation: &Rhmi,
    config: &OperatorConfig,
    stages: &[StageSpec],
    registry: &ProductRegistry,
) -> Result<UninstallOutcome> {
    let name = installation.name_any();
    let ns = installation.namespace().unwrap_or_default();
    let api: Api<Rhmi> = Api::namespaced(client.clone(), &ns);
    info!(%name, "uninstalling installation");

    delete_alert_rules(client).await?;

    let pass = release_product_finalizers(installation, stages, registry).await;

    let mut current = installation.clone();
    if pass.finalizers.as_slice() != installation.finalizers() {
        current = patch_finalizers(&api, installation, &pass.finalizers).await?;
    }

    if !pass.products_released() {
        if !pass.pending {
            debug!(finalizers = ?pass.finalizers, "waiting on finalizers outside the uninstall stages");
        }
        return Ok(UninstallOutcome {
            pass,
            completed: false,
        });
    }

    remove_bootstrap_resources(client, installation, config).await?;

    let remaining = without_finalizer(current.finalizers(), DELETION_FINALIZER);
    match patch_finalizers(&api, &current, &remaining).await {
        Ok(_) => {}
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    uninstall_operator(client, &ns).await?;
    info!(%name, "uninstall completed");
    Ok(UninstallOutcome {
        pass,
        completed: true,
    })
}

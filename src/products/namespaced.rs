//! Generic namespace-scoped product installer.
//!
//! Owns one namespace, `<prefix><product>`, and treats the product as
//! installed once every Deployment in it is available.  Deployments named
//! after a quota component are scaled to the tier's replica count.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Namespace};
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::{debug, info};

use crate::controller::helpers::FIELD_MANAGER;
use crate::controller::quota::{quota_components, ProductQuota};
use crate::crd::rhmi::{Rhmi, RhmiProductStatus};
use crate::crd::shared::{ProductName, StatusPhase};
use crate::error::{is_not_found, Error, Result};
use crate::helpers::product_namespace;

use super::{PreflightObject, ProductReconciler, WatchableKind};

pub const INSTALLATION_LABEL: &str = "integreatly";
pub const INSTALLATION_UID_LABEL: &str = "integreatly.org/installation-uid";

/// Version of each product shipped with this operator release.
pub fn product_version(product: ProductName) -> &'static str {
    match product {
        ProductName::Rhsso | ProductName::RhssoUser => "7.6",
        ProductName::ThreeScale => "2.15.0",
        ProductName::CloudResources => "1.1.0",
        ProductName::Observability => "4.2.1",
        ProductName::Marin3r => "0.13.1",
        ProductName::Grafana => "4.10.1",
        ProductName::Mcg => "4.14.0",
    }
}

pub struct NamespacedProduct {
    client: Client,
    product: ProductName,
    namespace: String,
    installation_uid: String,
}

impl NamespacedProduct {
    pub fn new(client: Client, product: ProductName, installation: &Rhmi) -> Self {
        Self {
            client,
            product,
            namespace: product_namespace(&installation.spec.namespace_prefix, product.as_str()),
            installation_uid: installation.uid().unwrap_or_default(),
        }
    }

    fn operator_name(&self) -> String {
        format!("{}-operator", self.product)
    }

    fn namespace_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (INSTALLATION_LABEL.to_string(), "true".to_string()),
            (INSTALLATION_UID_LABEL.to_string(), self.installation_uid.clone()),
        ])
    }

    /// Create the product namespace or bring its labels up to date.
    async fn ensure_namespace(&self) -> Result<Namespace> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        match namespaces.get(&self.namespace).await {
            Ok(ns) => {
                let labels = ns.labels();
                let missing = self
                    .namespace_labels()
                    .iter()
                    .any(|(k, v)| labels.get(k) != Some(v));
                if !missing {
                    return Ok(ns);
                }
                let patch = json!({"metadata": {"labels": self.namespace_labels()}});
                let ns = namespaces
                    .patch(
                        &self.namespace,
                        &PatchParams::apply(FIELD_MANAGER),
                        &Patch::Merge(&patch),
                    )
                    .await?;
                Ok(ns)
            }
            Err(e) if is_not_found(&e) => {
                info!(namespace = %self.namespace, product = %self.product, "creating product namespace");
                let ns = Namespace {
                    metadata: ObjectMeta {
                        name: Some(self.namespace.clone()),
                        labels: Some(self.namespace_labels()),
                        ..Default::default()
                    },
                    ..Default::default()
                };
                Ok(namespaces.create(&PostParams::default(), &ns).await?)
            }
            Err(e) => Err(Error::from(e).context(format!("error reading namespace {}", self.namespace))),
        }
    }

    /// Scale quota-sized Deployments.  Below-tier replica counts are raised;
    /// a tier change resets every component to the tier value.
    async fn scale_to_quota(&self, deployments: &[Deployment], quota: &ProductQuota) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
        for component in quota_components(self.product) {
            let Some(desired) = quota.replicas(component) else {
                continue;
            };
            let name = component.replace('_', "-");
            let Some(deployment) = deployments.iter().find(|d| d.name_any() == name) else {
                continue;
            };
            let current = deployment
                .spec
                .as_ref()
                .and_then(|s| s.replicas)
                .unwrap_or(1);
            if current == desired || (current > desired && !quota.is_updated) {
                continue;
            }
            debug!(deployment = %name, current, desired, "scaling to quota");
            let patch = json!({"spec": {"replicas": desired}});
            api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
                .await?;
        }
        Ok(())
    }

    async fn install(&self, status: &RhmiProductStatus, quota: &ProductQuota) -> Result<RhmiProductStatus> {
        let mut next = status.clone();
        next.uninstall = false;
        next.operator = self.operator_name();

        let ns = self.ensure_namespace().await?;
        let active = ns
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .is_some_and(|p| p == "Active");
        if !active {
            next.phase = StatusPhase::InProgress;
            return Ok(next);
        }

        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
        let deployments = api.list(&ListParams::default()).await?.items;
        if deployments.is_empty() {
            next.phase = StatusPhase::AwaitingOperator;
            return Ok(next);
        }

        self.scale_to_quota(&deployments, quota).await?;

        if !deployments.iter().all(is_available) {
            next.phase = StatusPhase::AwaitingComponents;
            return Ok(next);
        }

        next.phase = StatusPhase::Completed;
        next.version = product_version(self.product).to_string();
        Ok(next)
    }

    async fn uninstall(&self, status: &RhmiProductStatus) -> Result<RhmiProductStatus> {
        let mut next = status.clone();
        next.uninstall = true;

        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        if namespaces.get_opt(&self.namespace).await?.is_none() {
            next.phase = StatusPhase::Completed;
            return Ok(next);
        }
        match namespaces.delete(&self.namespace, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(e.into()),
        }
        next.phase = StatusPhase::InProgress;
        Ok(next)
    }
}

fn is_available(deployment: &Deployment) -> bool {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Available" && c.status == "True")
        })
}

#[async_trait]
impl ProductReconciler for NamespacedProduct {
    fn namespace(&self) -> String {
        self.namespace.clone()
    }

    fn watchable_kinds(&self) -> Vec<WatchableKind> {
        vec![WatchableKind::new("apps", "v1", "Deployment")]
    }

    fn verify_version(&self, installation: &Rhmi) -> bool {
        installation.product_status(self.product).version == product_version(self.product)
    }

    fn preflight_object(&self, namespace: &str) -> Option<PreflightObject> {
        Some(PreflightObject {
            kind: WatchableKind::new("apps", "v1", "Deployment"),
            name: self.operator_name(),
            namespace: namespace.to_string(),
        })
    }

    async fn reconcile(
        &self,
        _installation: &Rhmi,
        status: &RhmiProductStatus,
        quota: &ProductQuota,
        uninstall: bool,
    ) -> Result<RhmiProductStatus> {
        if uninstall {
            self.uninstall(status).await
        } else {
            self.install(status, quota).await
        }
    }
}

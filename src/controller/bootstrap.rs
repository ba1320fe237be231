//! Bootstrap stage: the shared prerequisites every product relies on.
//!
//! Runs first on every pass, before any product stage.  Each step is an
//! idempotent create-or-update; the first step that fails ends the stage
//! as Failed.  Quota processing happens here so the install stages receive
//! the resolved tier.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::api::scheduling::v1::PriorityClass;
use k8s_openapi::ByteString;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, ObjectMeta, Patch,
    PatchParams, PostParams,
};
use kube::{Client, ResourceExt};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::crd::rhmi::Rhmi;
use crate::crd::shared::{InstallationType, ProductName, StatusPhase, BOOTSTRAP_STAGE};
use crate::error::{is_not_found, Error, Result};
use crate::helpers::generate_secret;

use super::dual_track::DualTrack;
use super::helpers::{
    controller_owner_ref, patch_finalizers, replace_finalizer, with_finalizer, DELETION_FINALIZER,
    FIELD_MANAGER, LEGACY_DELETION_FINALIZER,
};
use super::pipeline::StageResult;
use super::quota::{process_quota, reconcile_quota_config, Quota};
use super::topology::{cluster_infrastructure, Platform};

pub const CLOUD_RESOURCE_CONFIG_MAP: &str = "cloud-resource-config";
pub const RATE_LIMIT_ALERTS_CONFIG_MAP: &str = "rate-limit-alerts";
pub const GITHUB_OAUTH_SECRET: &str = "github-oauth-secret";
pub const TENANT_OAUTH_SECRET: &str = "tenant-oauth-client-secrets";
pub const LEGACY_CATALOG_SOURCE: &str = "rhmi-registry-cs";

const OAUTH_SECRET_LENGTH: usize = 32;

const OPENSHIFT_STRATEGIES: &str =
    r#"{"blobstorage":"openshift", "smtpcredentials":"openshift", "redis":"openshift", "postgres":"openshift"}"#;
const AWS_STRATEGIES: &str =
    r#"{"blobstorage":"aws", "smtpcredentials":"aws", "redis":"aws", "postgres":"aws"}"#;
const GCP_STRATEGIES: &str =
    r#"{"blobstorage":"gcp", "smtpcredentials":"gcp", "redis":"gcp", "postgres":"gcp"}"#;

pub fn oauth_secret_name(namespace_prefix: &str) -> String {
    format!("{namespace_prefix}oauth-client-secrets")
}

/// Products that authenticate through an OAuthClient of their own.
pub const OAUTH_PRODUCTS: [ProductName; 3] =
    [ProductName::Rhsso, ProductName::RhssoUser, ProductName::ThreeScale];

/// Everything the bootstrap stage hands to the rest of the pass.
#[derive(Debug)]
pub struct BootstrapOutcome {
    pub stage: StageResult,
    /// The resolved tier; `None` when quota processing did not finish.
    pub quota: Option<Quota>,
    pub quota_track: Option<DualTrack>,
}

pub struct Bootstrap<'a> {
    client: &'a Client,
    installation: &'a Rhmi,
    namespace: String,
}

impl<'a> Bootstrap<'a> {
    pub fn new(client: &'a Client, installation: &'a Rhmi) -> Self {
        Self {
            client,
            installation,
            namespace: installation.namespace().unwrap_or_default(),
        }
    }

    pub async fn run(
        &self,
        platform: &Platform,
        env_quota: Option<&str>,
        now: DateTime<Utc>,
    ) -> BootstrapOutcome {
        info!(name = %self.installation.name_any(), "reconciling bootstrap stage");

        if let Err(e) = self.reconcile_resources(platform).await {
            return failed(e, None);
        }

        let (quota, track) = if self.installation.spec.installation_type.uses_quota() {
            match self.quota(env_quota, now).await {
                Ok(q) => q,
                Err(e) if e.is_quota_waiting() => {
                    info!(reason = %e, "quota not yet available");
                    let mut stage = StageResult::new(BOOTSTRAP_STAGE, StatusPhase::InProgress);
                    stage.errors.push(e);
                    return BootstrapOutcome {
                        stage,
                        quota: None,
                        quota_track: None,
                    };
                }
                Err(e) => return failed(e.context("Error while processing the Quota"), None),
            }
        } else {
            (Quota::default(), DualTrack::default())
        };

        if let Err(e) = self.remove_legacy_catalog_source().await {
            return failed(e, Some((quota, track)));
        }

        info!("bootstrap stage reconciled successfully");
        BootstrapOutcome {
            stage: StageResult::new(BOOTSTRAP_STAGE, StatusPhase::Completed),
            quota: Some(quota),
            quota_track: Some(track),
        }
    }

    async fn reconcile_resources(&self, platform: &Platform) -> Result<()> {
        self.reconcile_oauth_secrets()
            .await
            .map_err(|e| e.context("failed to reconcile oauth secrets"))?;
        if self.installation.spec.installation_type.is_multitenant() {
            self.reconcile_tenant_oauth_secrets()
                .await
                .map_err(|e| e.context("failed to reconcile tenant oauth secrets"))?;
        }
        self.reconcile_github_oauth_secret()
            .await
            .map_err(|e| e.context("failed to reconcile github oauth secrets"))?;
        self.retrieve_cluster_urls()
            .await
            .map_err(|e| e.context("failed to retrieve console url and subdomain"))?;
        self.reconcile_cloud_resources_config(platform)
            .await
            .map_err(|e| e.context("failed to check cloud resources config settings"))?;
        self.reconcile_priority_class()
            .await
            .map_err(|e| e.context("failed to reconcile priority class"))?;
        self.reconcile_rate_limit_alerts()
            .await
            .map_err(|e| e.context("failed to check rate limit alert config settings"))?;
        Ok(())
    }

    async fn quota(&self, env_quota: Option<&str>, now: DateTime<Utc>) -> Result<(Quota, DualTrack)> {
        reconcile_quota_config(self.client, self.installation).await?;
        process_quota(self.client, self.installation, env_quota, now).await
    }

    // ── OAuth client secrets ──────────────────────────────────────────────────

    /// Value for an OAuth client secret key: the secret held by the live
    /// OAuthClient when one exists, otherwise a fresh random one.
    async fn recover_or_generate(&self, oauth_client_name: &str) -> Result<String> {
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk(
            "oauth.openshift.io",
            "v1",
            "OAuthClient",
        ));
        let clients: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        let existing = match clients.get_opt(oauth_client_name).await {
            Ok(found) => found,
            Err(e) if is_not_found(&e) => None,
            Err(e) => return Err(e.into()),
        };
        let recovered = existing
            .as_ref()
            .and_then(|c| c.data.get("secret"))
            .and_then(|s| s.as_str())
            .filter(|s| !s.is_empty());
        Ok(match recovered {
            Some(secret) => {
                warn!(client = %oauth_client_name, "OAuth client secret recovered from OAuthClient object");
                secret.to_string()
            }
            None => generate_secret(OAUTH_SECRET_LENGTH),
        })
    }

    async fn reconcile_oauth_secrets(&self) -> Result<()> {
        let prefix = &self.installation.spec.namespace_prefix;
        let keys: Vec<String> = OAUTH_PRODUCTS.iter().map(|p| p.to_string()).collect();
        self.reconcile_secret_keys(&oauth_secret_name(prefix), &keys, false)
            .await?;
        info!("bootstrap OAuth client secrets successfully reconciled");
        Ok(())
    }

    async fn reconcile_tenant_oauth_secrets(&self) -> Result<()> {
        let tenants = self.tenants().await?;
        self.reconcile_secret_keys(TENANT_OAUTH_SECRET, &tenants, true)
            .await?;
        info!(tenants = tenants.len(), "tenant OAuth client secrets successfully reconciled");
        Ok(())
    }

    /// Make sure `name` holds a value for every key.  Existing values are
    /// never regenerated.  With `prune`, keys not listed are dropped.
    async fn reconcile_secret_keys(&self, name: &str, keys: &[String], prune: bool) -> Result<()> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        let existing = secrets.get_opt(name).await?;
        let current: BTreeMap<String, ByteString> = existing
            .as_ref()
            .and_then(|s| s.data.clone())
            .unwrap_or_default();

        let mut data = current.clone();
        for key in keys {
            if data.contains_key(key) {
                continue;
            }
            let client_name = format!("{}{key}", self.installation.spec.namespace_prefix);
            let value = self.recover_or_generate(&client_name).await?;
            data.insert(key.clone(), ByteString(value.into_bytes()));
        }
        if prune {
            data.retain(|k, _| keys.contains(k));
        }

        match existing {
            None => {
                let secret = Secret {
                    metadata: ObjectMeta {
                        name: Some(name.to_string()),
                        namespace: Some(self.namespace.clone()),
                        ..Default::default()
                    },
                    data: Some(data),
                    ..Default::default()
                };
                secrets.create(&PostParams::default(), &secret).await?;
            }
            Some(_) if data != current => {
                // Replace the whole map so pruned keys go away.
                let mut patch = json!({"data": data});
                for removed in current.keys().filter(|k| !data.contains_key(*k)) {
                    patch["data"][removed.as_str()] = serde_json::Value::Null;
                }
                secrets
                    .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
                    .await?;
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Tenant keys for every user created after the installation.  Clusters
    /// without the user API have no tenants.
    async fn tenants(&self) -> Result<Vec<String>> {
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("user.openshift.io", "v1", "User"));
        let users: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        let list = match users.list(&ListParams::default()).await {
            Ok(list) => list,
            Err(e) if is_not_found(&e) => return Ok(Vec::new()),
            Err(e) => return Err(Error::from(e).context("error getting tenants for OAuth clients secrets")),
        };
        let installed = self.installation.creation_time();
        let mut tenants: Vec<String> = list
            .items
            .iter()
            .filter(|u| match (u.metadata.creation_timestamp.as_ref(), installed) {
                (Some(created), Some(installed)) => created.0 > installed,
                _ => false,
            })
            .map(|u| sanitise_tenant_name(&u.name_any()))
            .collect();
        tenants.sort();
        tenants.dedup();
        Ok(tenants)
    }

    async fn reconcile_github_oauth_secret(&self) -> Result<()> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        let existing = secrets.get_opt(GITHUB_OAUTH_SECRET).await?;
        if existing
            .as_ref()
            .and_then(|s| s.data.as_ref())
            .is_some_and(|d| !d.is_empty())
        {
            return Ok(());
        }
        let data = BTreeMap::from([
            ("clientId".to_string(), ByteString(b"dummy".to_vec())),
            ("secret".to_string(), ByteString(b"dummy".to_vec())),
        ]);
        if existing.is_some() {
            let patch = json!({"data": data});
            secrets
                .patch(
                    GITHUB_OAUTH_SECRET,
                    &PatchParams::apply(FIELD_MANAGER),
                    &Patch::Merge(&patch),
                )
                .await?;
        } else {
            let secret = Secret {
                metadata: ObjectMeta {
                    name: Some(GITHUB_OAUTH_SECRET.to_string()),
                    namespace: Some(self.namespace.clone()),
                    owner_references: Some(vec![controller_owner_ref(self.installation)]),
                    ..Default::default()
                },
                data: Some(data),
                ..Default::default()
            };
            secrets.create(&PostParams::default(), &secret).await?;
        }
        info!("bootstrap Github OAuth secrets successfully reconciled");
        Ok(())
    }

    // ── Cluster URLs ──────────────────────────────────────────────────────────

    /// Copy the console host, router subdomain and API server URL into the
    /// spec.  A source the cluster does not have leaves its field alone; the
    /// routing subdomain is only ever set once.
    async fn retrieve_cluster_urls(&self) -> Result<()> {
        let spec = &self.installation.spec;
        let mut patch = serde_json::Map::new();

        if let Some(route) = console_route(self.client).await? {
            let urls = ConsoleUrls::from_route(&route);
            if let Some(host) = urls.host.filter(|h| *h != spec.master_url) {
                patch.insert("masterURL".into(), json!(host));
            }
            if spec.routing_subdomain.is_empty() {
                if let Some(subdomain) = urls.routing_subdomain {
                    info!("setting routing domain to cluster default");
                    patch.insert("routingSubdomain".into(), json!(subdomain));
                }
            }
        }

        if let Some(infra) = cluster_infrastructure(self.client).await? {
            let api_server = infra
                .data
                .pointer("/status/apiServerURL")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty() && *s != spec.api_server);
            if let Some(url) = api_server {
                patch.insert("APIServer".into(), json!(url));
            }
        }

        if patch.is_empty() {
            return Ok(());
        }
        debug!(fields = ?patch.keys().collect::<Vec<_>>(), "updating cluster urls");
        let api: Api<Rhmi> = Api::namespaced(self.client.clone(), &self.namespace);
        api.patch(
            &self.installation.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&json!({"spec": patch})),
        )
        .await?;
        Ok(())
    }

    // ── Cloud resources config ────────────────────────────────────────────────

    async fn reconcile_cloud_resources_config(&self, platform: &Platform) -> Result<()> {
        let cms: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        let desired = cloud_resource_strategies(&self.installation.spec.use_cluster_storage, platform);

        match cms.get_opt(CLOUD_RESOURCE_CONFIG_MAP).await? {
            None => {
                let cm = ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(CLOUD_RESOURCE_CONFIG_MAP.to_string()),
                        namespace: Some(self.namespace.clone()),
                        finalizers: Some(vec![DELETION_FINALIZER.to_string()]),
                        ..Default::default()
                    },
                    data: Some(desired),
                    ..Default::default()
                };
                cms.create(&PostParams::default(), &cm).await?;
            }
            Some(existing) => {
                let finalizers = existing.finalizers().to_vec();
                let wanted = with_finalizer(
                    &replace_finalizer(&finalizers, LEGACY_DELETION_FINALIZER, DELETION_FINALIZER),
                    DELETION_FINALIZER,
                );
                let existing = if wanted != finalizers {
                    patch_finalizers(&cms, &existing, &wanted).await?
                } else {
                    existing
                };

                let current = existing.data.clone().unwrap_or_default();
                if desired.iter().any(|(k, v)| current.get(k) != Some(v)) {
                    let patch = json!({"data": desired});
                    cms.patch(
                        CLOUD_RESOURCE_CONFIG_MAP,
                        &PatchParams::apply(FIELD_MANAGER),
                        &Patch::Merge(&patch),
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }

    // ── Priority class ────────────────────────────────────────────────────────

    async fn reconcile_priority_class(&self) -> Result<()> {
        let name = &self.installation.spec.priority_class_name;
        if name.is_empty() {
            return Ok(());
        }
        let value = priority_class_value(self.installation.spec.installation_type);
        let classes: Api<PriorityClass> = Api::all(self.client.clone());

        match classes.get_opt(name).await? {
            Some(existing)
                if existing.value == value
                    && existing.global_default == Some(false)
                    && existing.description.as_deref() == Some(PRIORITY_CLASS_DESCRIPTION) => {}
            Some(existing) if existing.value != value => {
                // The value of a PriorityClass is immutable.
                info!(%name, "recreating priority class with new value");
                classes.delete(name, &DeleteParams::default()).await?;
                classes
                    .create(&PostParams::default(), &priority_class(name, value))
                    .await?;
            }
            Some(_) => {
                let patch = json!({
                    "globalDefault": false,
                    "description": PRIORITY_CLASS_DESCRIPTION,
                });
                classes
                    .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
                    .await?;
            }
            None => {
                classes
                    .create(&PostParams::default(), &priority_class(name, value))
                    .await?;
            }
        }
        Ok(())
    }

    // ── Rate limit alerts ─────────────────────────────────────────────────────

    /// Write the default alert levels once; later edits are left alone.
    async fn reconcile_rate_limit_alerts(&self) -> Result<()> {
        let cms: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        let existing = cms.get_opt(RATE_LIMIT_ALERTS_CONFIG_MAP).await?;
        if existing
            .as_ref()
            .and_then(|cm| cm.data.as_ref())
            .is_some_and(|d| d.contains_key("alerts"))
        {
            return Ok(());
        }

        let alerts = serde_json::to_string_pretty(&default_rate_limit_alerts())?;
        match existing {
            Some(_) => {
                let patch = json!({"data": {"alerts": alerts}});
                cms.patch(
                    RATE_LIMIT_ALERTS_CONFIG_MAP,
                    &PatchParams::apply(FIELD_MANAGER),
                    &Patch::Merge(&patch),
                )
                .await?;
            }
            None => {
                let cm = ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(RATE_LIMIT_ALERTS_CONFIG_MAP.to_string()),
                        namespace: Some(self.namespace.clone()),
                        annotations: Some(BTreeMap::from([
                            (
                                "integreatly-name".to_string(),
                                self.installation.name_any(),
                            ),
                            ("integreatly-namespace".to_string(), self.namespace.clone()),
                        ])),
                        ..Default::default()
                    },
                    data: Some(BTreeMap::from([("alerts".to_string(), alerts)])),
                    ..Default::default()
                };
                cms.create(&PostParams::default(), &cm).await?;
            }
        }
        Ok(())
    }

    // ── Legacy cleanup ────────────────────────────────────────────────────────

    async fn remove_legacy_catalog_source(&self) -> Result<()> {
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk(
            "operators.coreos.com",
            "v1alpha1",
            "CatalogSource",
        ));
        let sources: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &self.namespace, &ar);
        match sources.delete(LEGACY_CATALOG_SOURCE, &DeleteParams::default()).await {
            Ok(_) => {
                info!(name = LEGACY_CATALOG_SOURCE, "removed legacy catalog source");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(Error::from(e).context("failed to remove legacy catalog source")),
        }
    }
}

fn failed(err: Error, quota: Option<(Quota, DualTrack)>) -> BootstrapOutcome {
    warn!(error = %err, "bootstrap stage failed");
    let mut stage = StageResult::new(BOOTSTRAP_STAGE, StatusPhase::Failed);
    stage.errors.push(err);
    let (quota, quota_track) = match quota {
        Some((q, t)) => (Some(q), Some(t)),
        None => (None, None),
    };
    BootstrapOutcome {
        stage,
        quota,
        quota_track,
    }
}

// ── Pure builders ─────────────────────────────────────────────────────────────

pub const PRIORITY_CLASS_DESCRIPTION: &str = "Priority Class for managed-api";

pub fn priority_class_value(installation_type: InstallationType) -> i32 {
    if installation_type.is_multitenant() {
        0
    } else {
        1_000_000_000
    }
}

fn priority_class(name: &str, value: i32) -> PriorityClass {
    PriorityClass {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        value,
        global_default: Some(false),
        description: Some(PRIORITY_CLASS_DESCRIPTION.to_string()),
        ..Default::default()
    }
}

/// Strategy JSON per installation type for the cloud resource operator.
pub fn cloud_resource_strategies(use_cluster_storage: &str, platform: &Platform) -> BTreeMap<String, String> {
    let managed = if use_cluster_storage.eq_ignore_ascii_case("true") {
        Some(OPENSHIFT_STRATEGIES)
    } else {
        match platform {
            Platform::Aws => Some(AWS_STRATEGIES),
            Platform::Gcp => Some(GCP_STRATEGIES),
            Platform::Other(_) => None,
        }
    };

    let mut data = BTreeMap::new();
    if let Some(strategies) = managed {
        data.insert("managed-api".to_string(), strategies.to_string());
        data.insert("multitenant-managed-api".to_string(), strategies.to_string());
    }
    data.insert("workshop".to_string(), OPENSHIFT_STRATEGIES.to_string());
    data
}

/// Lowercase, collapse every run of non-alphanumerics into `-` and drop a
/// trailing `-`.
pub fn sanitise_tenant_name(username: &str) -> String {
    let mut out = String::with_capacity(username.len());
    let mut in_run = false;
    for c in username.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('-');
            in_run = true;
        }
    }
    out.strip_suffix('-').map(str::to_string).unwrap_or(out)
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AlertThreshold {
    pub min_rate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rate: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AlertConfig {
    #[serde(rename = "type")]
    pub alert_type: String,
    pub rule_name: String,
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<AlertThreshold>,
    pub period: String,
}

fn threshold_alert(rule: &str, min: &str, max: Option<&str>, period: &str) -> AlertConfig {
    AlertConfig {
        alert_type: "Threshold".to_string(),
        rule_name: rule.to_string(),
        level: "info".to_string(),
        threshold: Some(AlertThreshold {
            min_rate: min.to_string(),
            max_rate: max.map(str::to_string),
        }),
        period: period.to_string(),
    }
}

pub fn default_rate_limit_alerts() -> BTreeMap<String, AlertConfig> {
    BTreeMap::from([
        (
            "api-usage-alert-level1".to_string(),
            threshold_alert("RHOAMApiUsageLevel1ThresholdExceeded", "80%", Some("90%"), "4h"),
        ),
        (
            "api-usage-alert-level2".to_string(),
            threshold_alert("RHOAMApiUsageLevel2ThresholdExceeded", "90%", Some("95%"), "2h"),
        ),
        (
            "api-usage-alert-level3".to_string(),
            threshold_alert("RHOAMApiUsageLevel3ThresholdExceeded", "95%", None, "30m"),
        ),
        (
            "rate-limit-spike".to_string(),
            AlertConfig {
                alert_type: "Spike".to_string(),
                rule_name: "RHOAMApiUsageOverLimit".to_string(),
                level: "warning".to_string(),
                threshold: None,
                period: "30m".to_string(),
            },
        ),
    ])
}

/// Console host and router subdomain published on the console Route.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsoleUrls {
    pub host: Option<String>,
    pub routing_subdomain: Option<String>,
}

impl ConsoleUrls {
    pub fn from_route(route: &DynamicObject) -> Self {
        let ingress = route.data.pointer("/status/ingress/0");
        let field = |name: &str| {
            ingress
                .and_then(|i| i.get(name))
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            host: field("host"),
            routing_subdomain: field("routerCanonicalHostname")
                .map(|h| h.strip_prefix("router-default.").map(str::to_string).unwrap_or(h)),
        }
    }
}

/// The `console` Route in `openshift-console`, or `None` when the cluster
/// has no console.
pub async fn console_route(client: &Client) -> Result<Option<DynamicObject>> {
    let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("route.openshift.io", "v1", "Route"));
    let routes: Api<DynamicObject> = Api::namespaced_with(client.clone(), "openshift-console", &ar);
    match routes.get_opt("console").await {
        Ok(route) => Ok(route),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(Error::from(e).context("could not retrieve CR route")),
    }
}

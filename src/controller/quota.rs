//! Quota tier resolution.
//!
//! The desired tier comes from the add-on parameters secret, falling back to
//! the trial parameter and then the `QUOTA` env var once the installation is
//! older than the grace period.  The resolved parameter selects one entry of
//! the quota-definition ConfigMap, which carries per-component replica and
//! resource allotments for the products that scale with the tier.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::core::v1::{ConfigMap, ResourceRequirements, Secret};
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use kube::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::crd::rhmi::Rhmi;
use crate::crd::shared::ProductName;
use crate::error::{is_not_found, Error, Result};

use super::dual_track::{DualTrack, PendingPolicy};
use super::helpers::FIELD_MANAGER;

pub const QUOTA_CONFIG_MAP: &str = "quota-config-managed-api-service";
pub const QUOTA_CONFIG_KEY: &str = "quota-configs";
pub const ADDON_PARAMETERS_SECRET: &str = "addon-managed-api-service-parameters";
pub const QUOTA_PARAM: &str = "addon-managed-api-service";
pub const TRIAL_QUOTA_PARAM: &str = "trial-quota";
pub const NOTIFICATION_EMAIL_PARAM: &str = "notification-email";
pub const QUOTA_ENV: &str = "QUOTA";

/// How long a new installation waits for the add-on quota parameter before
/// falling back to the trial parameter and the env var.
const QUOTA_GRACE_SECONDS: i64 = 60;

/// Quota tiers shipped with the operator, written into the quota-definition
/// ConfigMap on every pass.
pub const DEFAULT_QUOTA_CONFIGS: &str = include_str!("quota_configs.json");

pub fn quota_grace_period() -> Duration {
    Duration::seconds(QUOTA_GRACE_SECONDS)
}

// ── Add-on parameters ─────────────────────────────────────────────────────────

/// Decoded contents of the add-on parameters secret.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddonParameters(BTreeMap<String, String>);

impl AddonParameters {
    pub fn from_secret(secret: &Secret) -> Self {
        let mut params = BTreeMap::new();
        for (k, v) in secret.data.iter().flatten() {
            params.insert(k.clone(), String::from_utf8_lossy(&v.0).to_string());
        }
        for (k, v) in secret.string_data.iter().flatten() {
            params.insert(k.clone(), v.clone());
        }
        Self(params)
    }

    /// Read the parameters secret; a missing secret has no parameters.
    pub async fn fetch(client: &Client, namespace: &str) -> Result<Self> {
        let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
        match secrets.get(ADDON_PARAMETERS_SECRET).await {
            Ok(secret) => Ok(Self::from_secret(&secret)),
            Err(e) if is_not_found(&e) => Ok(Self::default()),
            Err(e) => Err(Error::from(e).context("error checking for quota secret")),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// The parameter value, treating an empty value as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }
}

impl<const N: usize> From<[(&str, &str); N]> for AddonParameters {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// Whether the installation is still inside the quota grace period.  An
/// object without a creation timestamp has just been created.
pub fn within_grace_period(created: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match created {
        Some(created) => created + quota_grace_period() >= now,
        None => true,
    }
}

/// Pick the quota parameter for an installation.  First match wins: the
/// add-on quota parameter; once the grace period has passed, the trial
/// parameter and then the env fallback.  Inside the grace period a missing
/// parameter is a waiting error the caller retries on.
pub fn resolve_quota_param(
    created: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    params: &AddonParameters,
    env_quota: Option<&str>,
) -> Result<String> {
    if let Some(param) = params.get(QUOTA_PARAM) {
        return Ok(param.to_string());
    }

    if within_grace_period(created, now) {
        return Err(Error::QuotaWaiting(
            "waiting for quota parameter for 1 minute after creation of cr".to_string(),
        ));
    }

    if let Some(param) = params.get(TRIAL_QUOTA_PARAM) {
        return Ok(param.to_string());
    }

    info!("no secret param found after one minute so falling back to env var '{QUOTA_ENV}' for sku value");
    match env_quota.filter(|q| !q.is_empty()) {
        Some(q) => Ok(q.to_string()),
        None => Err(Error::quota(format!(
            "no quota value provided by add on parameter '{QUOTA_PARAM}' or by env var '{QUOTA_ENV}'"
        ))),
    }
}

// ── Quota definitions ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub requests_per_unit: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceConfig {
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub resources: ResourceRequirements,
}

/// One entry of the `quota-configs` JSON array.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct QuotaDefinition {
    #[serde(default)]
    pub name: String,
    pub param: String,
    #[serde(default, rename = "rate-limiting")]
    pub rate_limiting: RateLimitConfig,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceConfig>,
}

/// Components sized by the quota tier, per product.
pub fn quota_components(product: ProductName) -> &'static [&'static str] {
    match product {
        ProductName::ThreeScale => &[
            "backend_listener",
            "backend_worker",
            "apicast_production",
            "apicast_staging",
        ],
        ProductName::RhssoUser => &["rhssouser"],
        ProductName::Marin3r => &["ratelimit"],
        ProductName::Grafana => &["grafana"],
        _ => &[],
    }
}

/// A product's share of the resolved quota tier.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProductQuota {
    pub quota_name: String,
    pub resources: BTreeMap<String, ResourceConfig>,
    pub rate_limit: RateLimitConfig,
    /// The tier changed on this pass; products resize even when scaled up
    /// beyond the tier.
    pub is_updated: bool,
}

impl ProductQuota {
    pub fn replicas(&self, component: &str) -> Option<i32> {
        self.resources.get(component).map(|r| r.replicas)
    }
}

/// The resolved quota tier for one pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Quota {
    name: String,
    products: BTreeMap<ProductName, ProductQuota>,
    is_updated: bool,
}

impl Quota {
    /// Select the definition matching `param` from the ConfigMap's
    /// `quota-configs` JSON and split it into per-product allotments.
    pub fn resolve(param: &str, config_map: &ConfigMap) -> Result<Self> {
        let raw = config_map
            .data
            .as_ref()
            .and_then(|d| d.get(QUOTA_CONFIG_KEY))
            .ok_or_else(|| {
                Error::quota(format!("{QUOTA_CONFIG_MAP} ConfigMap missing {QUOTA_CONFIG_KEY} key"))
            })?;
        let definitions: Vec<QuotaDefinition> = serde_json::from_str(raw)?;
        Self::from_definitions(param, &definitions)
    }

    pub fn from_definitions(param: &str, definitions: &[QuotaDefinition]) -> Result<Self> {
        let definition = definitions
            .iter()
            .find(|d| d.param == param && !d.name.is_empty())
            .ok_or_else(|| {
                Error::quota(format!(
                    "wasn't able to find a quota in the quota config which matches the '{param}' quota parameter"
                ))
            })?;

        let mut products = BTreeMap::new();
        for product in ProductName::ALL {
            let components = quota_components(product);
            if components.is_empty() {
                continue;
            }
            let resources = components
                .iter()
                .map(|c| {
                    (
                        c.to_string(),
                        definition.resources.get(*c).cloned().unwrap_or_default(),
                    )
                })
                .collect();
            products.insert(
                product,
                ProductQuota {
                    quota_name: definition.name.clone(),
                    resources,
                    rate_limit: definition.rate_limiting.clone(),
                    is_updated: false,
                },
            );
        }

        Ok(Self {
            name: definition.name.clone(),
            products,
            is_updated: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_updated(&self) -> bool {
        self.is_updated
    }

    pub fn set_updated(&mut self, updated: bool) {
        self.is_updated = updated;
        for p in self.products.values_mut() {
            p.is_updated = updated;
        }
    }

    /// The product's allotment; products the tier does not size get an
    /// empty one.
    pub fn product(&self, product: ProductName) -> ProductQuota {
        self.products.get(&product).cloned().unwrap_or_default()
    }
}

// ── Cluster side ──────────────────────────────────────────────────────────────

/// Write the shipped quota tiers into the quota-definition ConfigMap.
/// Only quota installation types carry one.
pub async fn reconcile_quota_config(client: &Client, installation: &Rhmi) -> Result<()> {
    if !installation.spec.installation_type.uses_quota() {
        return Ok(());
    }
    let ns = installation.metadata.namespace.clone().unwrap_or_default();
    let cms: Api<ConfigMap> = Api::namespaced(client.clone(), &ns);

    match cms.get(QUOTA_CONFIG_MAP).await {
        Ok(existing) => {
            let current = existing.data.as_ref().and_then(|d| d.get(QUOTA_CONFIG_KEY));
            if current.map(String::as_str) != Some(DEFAULT_QUOTA_CONFIGS) {
                let patch = serde_json::json!({"data": {QUOTA_CONFIG_KEY: DEFAULT_QUOTA_CONFIGS}});
                cms.patch(
                    QUOTA_CONFIG_MAP,
                    &PatchParams::apply(FIELD_MANAGER),
                    &Patch::Merge(&patch),
                )
                .await?;
            }
            Ok(())
        }
        Err(e) if is_not_found(&e) => {
            let cm = ConfigMap {
                metadata: ObjectMeta {
                    name: Some(QUOTA_CONFIG_MAP.to_string()),
                    namespace: Some(ns),
                    ..Default::default()
                },
                data: Some(BTreeMap::from([(
                    QUOTA_CONFIG_KEY.to_string(),
                    DEFAULT_QUOTA_CONFIGS.to_string(),
                )])),
                ..Default::default()
            };
            cms.create(&PostParams::default(), &cm).await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Resolve this pass's quota and mark the installation's quota track.
///
/// Returns the resolved quota (flagged as updated when the tier entered a
/// transition) and the quota track with any new pending value.
pub async fn process_quota(
    client: &Client,
    installation: &Rhmi,
    env_quota: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(Quota, DualTrack)> {
    let ns = installation.metadata.namespace.clone().unwrap_or_default();
    let params = AddonParameters::fetch(client, &ns).await?;
    let param = resolve_quota_param(installation.creation_time(), now, &params, env_quota)?;

    let cms: Api<ConfigMap> = Api::namespaced(client.clone(), &ns);
    let config_map = cms
        .get(QUOTA_CONFIG_MAP)
        .await
        .map_err(|e| Error::from(e).context("error getting quota config map"))?;
    let mut quota = Quota::resolve(&param, &config_map)?;

    let status = installation.status_or_default();
    let mut track = DualTrack::new(&status.quota, &status.to_quota);
    let updated = track.begin(quota.name(), PendingPolicy::Replace);
    quota.set_updated(updated);
    debug!(quota = %quota.name(), updated, "quota resolved");
    Ok((quota, track))
}

//! Preflight gate run before the first install stage.
//!
//! The gate is a small state machine over `status.preflightStatus`:
//!
//! ```text
//! InProgress ──checks_passed──▶ Success
//! InProgress ──check_failed───▶ Fail
//! Fail       ──retry──────────▶ InProgress
//! ```
//!
//! Checks run in a fixed order and the first failure wins.  API errors are
//! not check failures; they are returned so the pass is retried.  A gate
//! that reached Success is never re-run.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::{Api, ApiResource, DynamicObject, ListParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::{info, warn};

use crate::crd::rhmi::Rhmi;
use crate::crd::shared::PreflightStatus;
use crate::error::Result;
use crate::products::{PreflightObject, ProductRegistry};

use super::quota::{within_grace_period, AddonParameters, QUOTA_PARAM, TRIAL_QUOTA_PARAM};
use super::topology::StageSpec;

pub const ANTI_AFFINITY_REQUIRED_ENV: &str = "ANTI_AFFINITY_REQUIRED";
pub const ALERT_SMTP_FROM_ENV: &str = "ALERT_SMTP_FROM";

pub const PREFLIGHT_PASSED_MESSAGE: &str = "preflight checks passed";

/// Namespaces never scanned for conflicting products.
const SYSTEM_NAMESPACE_PREFIXES: &[&str] = &["openshift-", "kube-"];

// ── Env var checks ────────────────────────────────────────────────────────────

/// Validation applied to one operator env var.
pub struct EnvCheck {
    pub name: &'static str,
    pub required: bool,
    pub validate: fn(&str) -> std::result::Result<(), String>,
}

pub static ENV_CHECKS: &[EnvCheck] = &[
    EnvCheck {
        name: ANTI_AFFINITY_REQUIRED_ENV,
        required: false,
        validate: |v| match parse_bool(v) {
            Some(_) => Ok(()),
            None => Err(format!("parsing \"{v}\": invalid syntax")),
        },
    },
    EnvCheck {
        name: ALERT_SMTP_FROM_ENV,
        required: true,
        validate: |v| {
            if v.is_empty() {
                Err(format!("env var {ALERT_SMTP_FROM_ENV} is required"))
            } else {
                Ok(())
            }
        },
    },
];

/// Boolean spellings accepted in operator env vars.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// First env var that fails its check, as a status message.
pub fn check_env_vars(lookup: &dyn Fn(&str) -> Option<String>) -> Option<String> {
    for check in ENV_CHECKS {
        let reason = match lookup(check.name) {
            None if check.required => Err("required env var not present".to_string()),
            None => Ok(()),
            Some(value) => (check.validate)(&value),
        };
        if let Err(reason) = reason {
            return Some(format!("validation failure for env var {}: {reason}", check.name));
        }
    }
    None
}

// ── Cluster probe ─────────────────────────────────────────────────────────────

/// Cluster reads the gate needs.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PreflightProbe: Send + Sync {
    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool>;

    async fn addon_parameters(&self, namespace: &str) -> Result<AddonParameters>;

    async fn list_namespaces(&self) -> Result<Vec<String>>;

    async fn object_exists(&self, object: &PreflightObject) -> Result<bool>;
}

pub struct KubeProbe {
    client: Client,
}

impl KubeProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PreflightProbe for KubeProbe {
    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        if name.is_empty() {
            return Ok(false);
        }
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(secrets.get_opt(name).await?.is_some())
    }

    async fn addon_parameters(&self, namespace: &str) -> Result<AddonParameters> {
        AddonParameters::fetch(&self.client, namespace).await
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        Ok(namespaces
            .list(&ListParams::default())
            .await?
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    async fn object_exists(&self, object: &PreflightObject) -> Result<bool> {
        let ar = ApiResource::from_gvk(&object.kind.gvk());
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &object.namespace, &ar);
        match api.get_opt(&object.name).await {
            Ok(found) => Ok(found.is_some()),
            // A kind the cluster does not serve cannot conflict.
            Err(e) if crate::error::is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

// ── Transition table ──────────────────────────────────────────────────────────

/// Result of one run of the checks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PreflightReport {
    pub failure: Option<String>,
}

impl PreflightReport {
    pub fn passed() -> Self {
        Self { failure: None }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
        }
    }

    pub fn message(&self) -> &str {
        self.failure.as_deref().unwrap_or(PREFLIGHT_PASSED_MESSAGE)
    }
}

pub struct PreflightTransition {
    pub from: PreflightStatus,
    pub to: PreflightStatus,
    pub guard: fn(&PreflightReport) -> bool,
    pub guard_name: &'static str,
}

/// First matching guard wins.
pub static PREFLIGHT_TRANSITIONS: &[PreflightTransition] = &[
    PreflightTransition {
        from: PreflightStatus::Fail,
        to: PreflightStatus::InProgress,
        guard: |_| true,
        guard_name: "retry",
    },
    PreflightTransition {
        from: PreflightStatus::InProgress,
        to: PreflightStatus::Success,
        guard: |r| r.failure.is_none(),
        guard_name: "checks_passed",
    },
    PreflightTransition {
        from: PreflightStatus::InProgress,
        to: PreflightStatus::Fail,
        guard: |r| r.failure.is_some(),
        guard_name: "check_failed",
    },
];

/// Apply the first matching transition out of `current`.
pub fn next_status(current: PreflightStatus, report: &PreflightReport) -> PreflightStatus {
    PREFLIGHT_TRANSITIONS
        .iter()
        .filter(|t| t.from == current)
        .find(|t| (t.guard)(report))
        .map_or(current, |t| {
            info!(from = %current, to = %t.to, guard = t.guard_name, "preflight transition");
            t.to
        })
}

// ── Gate ──────────────────────────────────────────────────────────────────────

/// Inputs the checks read besides the cluster.
pub struct PreflightInputs<'a> {
    pub env: &'a (dyn Fn(&str) -> Option<String> + Sync),
    pub quota_env: Option<&'a str>,
    pub now: DateTime<Utc>,
}

/// Run the checks in order and stop at the first failure.
pub async fn run_checks(
    installation: &Rhmi,
    probe: &dyn PreflightProbe,
    registry: &ProductRegistry,
    stages: &[StageSpec],
    inputs: &PreflightInputs<'_>,
) -> Result<PreflightReport> {
    let namespace = installation.metadata.namespace.clone().unwrap_or_default();
    let spec = &installation.spec;

    if let Some(message) = check_env_vars(inputs.env) {
        warn!(%message, "preflight env var check failed");
        return Ok(PreflightReport::failed(message));
    }

    let storage = spec.use_cluster_storage.to_lowercase();
    if storage != "true" && storage != "false" {
        warn!("preflight checks failed on useClusterStorage value");
        return Ok(PreflightReport::failed(
            "Spec.useClusterStorage must be set to either 'true' or 'false' to continue",
        ));
    }

    if spec.installation_type.requires_managed_alerting() {
        for secret in [&spec.pager_duty_secret, &spec.dead_mans_snitch_secret] {
            if !probe.secret_exists(&namespace, secret).await? {
                return Ok(PreflightReport::failed(format!(
                    "Could not find {secret} secret in {namespace} namespace"
                )));
            }
            info!(%secret, "found required secret");
        }
    }

    if spec.installation_type.uses_quota() {
        let params = probe.addon_parameters(&namespace).await?;
        if !params.contains(QUOTA_PARAM) && !params.contains(TRIAL_QUOTA_PARAM) {
            if within_grace_period(installation.creation_time(), inputs.now) {
                return Ok(PreflightReport::failed(
                    "quota parameter not found, waiting 1 minute before defaulting to env var",
                ));
            }
            if inputs.quota_env.map_or(true, str::is_empty) {
                return Ok(PreflightReport::failed(
                    "quota parameter not found from add-on or env var",
                ));
            }
        }
    }

    for ns in probe.list_namespaces().await? {
        if SYSTEM_NAMESPACE_PREFIXES.iter().any(|p| ns.starts_with(p)) {
            continue;
        }
        let mut found = Vec::new();
        let mut seen = BTreeSet::new();
        for product in stages.iter().flat_map(|s| s.products.iter().copied()) {
            if !seen.insert(product) {
                continue;
            }
            let reconciler = registry.build(product, installation)?;
            let Some(object) = reconciler.preflight_object(&ns) else {
                continue;
            };
            if probe.object_exists(&object).await? {
                info!(%product, namespace = %ns, "found conflicting product");
                found.push(product.to_string());
            }
        }
        if !found.is_empty() {
            return Ok(PreflightReport::failed(format!(
                "found conflicting packages: {}, in namespace: {ns}",
                found.join(", ")
            )));
        }
    }

    Ok(PreflightReport::passed())
}

/// Status and message after this pass, or `None` when the gate already
/// passed.
pub async fn run_preflight(
    installation: &Rhmi,
    probe: &dyn PreflightProbe,
    registry: &ProductRegistry,
    stages: &[StageSpec],
    inputs: &PreflightInputs<'_>,
) -> Result<Option<(PreflightStatus, String)>> {
    let mut current = installation.status_or_default().preflight_status;
    if current == PreflightStatus::Success {
        return Ok(None);
    }
    info!("running preflight checks");
    if current == PreflightStatus::Fail {
        current = next_status(current, &PreflightReport::default());
    }

    let report = run_checks(installation, probe, registry, stages, inputs).await?;
    let status = next_status(current, &report);
    Ok(Some((status, report.message().to_string())))
}

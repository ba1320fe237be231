use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::shared::{InstallationType, PreflightStatus, ProductName, StatusPhase};

// ── Spec sub-types ────────────────────────────────────────────────────────────

/// Where alerts for the installation are routed, per audience.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AlertingEmailAddresses {
    #[serde(default)]
    pub business_unit: String,
    #[serde(default)]
    pub cssre: String,
}

/// Secret copied into every product namespace for pulling product images.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct PullSecretSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

// ── CRD ───────────────────────────────────────────────────────────────────────

/// RHMI is the Schema for the rhmis API: the single root declaration of a
/// managed-service installation.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "integreatly.org",
    version = "v1alpha1",
    kind = "RHMI",
    root = "Rhmi",
    plural = "rhmis",
    namespaced,
    status = "RhmiStatus",
    printcolumn = r#"{"name": "Type", "type": "string", "jsonPath": ".spec.type"}"#,
    printcolumn = r#"{"name": "Stage", "type": "string", "jsonPath": ".status.stage"}"#,
    printcolumn = r#"{"name": "Status", "type": "string", "jsonPath": ".status.stages.installation.phase"}"#,
    printcolumn = r#"{"name": "Version", "type": "string", "jsonPath": ".status.version"}"#,
    printcolumn = r#"{"name": "Upgrading To", "type": "string", "jsonPath": ".status.toVersion"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RhmiSpec {
    #[serde(rename = "type")]
    pub installation_type: InstallationType,

    #[serde(default)]
    pub namespace_prefix: String,

    #[serde(default)]
    pub routing_subdomain: String,

    #[serde(default, rename = "masterURL")]
    pub master_url: String,

    #[serde(default, rename = "APIServer")]
    pub api_server: String,

    #[serde(default)]
    pub self_signed_certs: bool,

    #[serde(default)]
    pub rebalance_pods: bool,

    /// "true" or "false"; any other value fails preflight.
    #[serde(default)]
    pub use_cluster_storage: String,

    #[serde(default)]
    pub priority_class_name: String,

    #[serde(default)]
    pub alerting_email_address: String,

    #[serde(default)]
    pub alerting_email_addresses: AlertingEmailAddresses,

    #[serde(default)]
    pub alert_from_address: String,

    #[serde(default)]
    pub pull_secret: PullSecretSpec,

    #[serde(default)]
    pub smtp_secret: String,

    #[serde(default)]
    pub pager_duty_secret: String,

    #[serde(default)]
    pub dead_mans_snitch_secret: String,
}

// ── Status ────────────────────────────────────────────────────────────────────

/// Observed state of one product, owned by that product's reconciler.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RhmiProductStatus {
    pub name: ProductName,

    #[serde(default, rename = "status")]
    pub phase: StatusPhase,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operator: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,

    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub product_type: String,

    #[serde(default)]
    pub uninstall: bool,
}

impl RhmiProductStatus {
    pub fn new(name: ProductName) -> Self {
        Self {
            name,
            phase: StatusPhase::NotStarted,
            version: String::new(),
            operator: String::new(),
            host: String::new(),
            product_type: String::new(),
            uninstall: false,
        }
    }
}

/// Observed state of one stage: its phase plus the latest status of every
/// product it owns.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct RhmiStageStatus {
    pub name: String,

    #[serde(default)]
    pub phase: StatusPhase,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub products: BTreeMap<String, RhmiProductStatus>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RhmiStatus {
    #[serde(default)]
    pub stage: String,

    #[serde(default)]
    pub stages: BTreeMap<String, RhmiStageStatus>,

    #[serde(default)]
    pub preflight_status: PreflightStatus,

    #[serde(default)]
    pub preflight_message: String,

    #[serde(default)]
    pub last_error: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub to_version: String,

    #[serde(default)]
    pub quota: String,

    #[serde(default)]
    pub to_quota: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// An install that has not finished within this window is reported as blocked.
const INSTALL_BLOCKED_AFTER_HOURS: i64 = 2;

impl Rhmi {
    pub fn status_or_default(&self) -> RhmiStatus {
        self.status.clone().unwrap_or_default()
    }

    /// Latest recorded status for a product, searching every stage.  Returns
    /// a fresh not-started status when the product has never been reconciled.
    pub fn product_status(&self, name: ProductName) -> RhmiProductStatus {
        self.status
            .as_ref()
            .and_then(|s| {
                s.stages
                    .values()
                    .find_map(|stage| stage.products.get(name.as_str()).cloned())
            })
            .unwrap_or_else(|| RhmiProductStatus::new(name))
    }

    pub fn finalizers(&self) -> &[String] {
        self.metadata.finalizers.as_deref().unwrap_or_default()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers().iter().any(|f| f == finalizer)
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        self.metadata.creation_timestamp.as_ref().map(|t| t.0)
    }

    /// Whether the installation was created more than `age` ago.  An object
    /// without a creation timestamp has not been persisted yet and is new.
    pub fn is_older_than(&self, age: Duration, now: DateTime<Utc>) -> bool {
        self.creation_time().is_some_and(|created| created + age < now)
    }

    /// A version has been committed at least once.
    pub fn is_installed(&self) -> bool {
        self.status.as_ref().is_some_and(|s| !s.version.is_empty())
    }

    pub fn is_uninstalling(&self) -> bool {
        self.is_deleting()
    }

    /// Stuck on its first install for longer than the allowed window.
    pub fn is_install_blocked(&self, now: DateTime<Utc>) -> bool {
        !self.is_installed()
            && !self.is_uninstalling()
            && self.is_older_than(Duration::hours(INSTALL_BLOCKED_AFTER_HOURS), now)
    }
}

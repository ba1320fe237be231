use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::crd::shared::InstallationType;

// ── Operator configuration (injected via CLI flags / env) ─────────────────────

/// Cluster-specific configuration injected at startup via CLI flags.
/// Used to create the installation resource when none exists and to fill
/// unset alerting fields on every pass.
#[derive(Clone, Debug, Default)]
pub struct OperatorConfig {
    pub watch_namespace: String,
    pub installation_type: InstallationType,
    pub use_cluster_storage: String,
    /// Raw `REBALANCE_PODS` value; `None` when unset.
    pub rebalance_pods: Option<String>,
    pub alerting_email_address: String,
    pub bu_alerting_email_address: String,
    pub priority_class_name: String,
    /// Overrides `<prefix>installation-config` when non-empty.
    pub installation_config_map: String,
    /// Fallback quota parameter once the add-on grace period has passed.
    pub quota: Option<String>,
}

impl OperatorConfig {
    /// Pods are rebalanced unless the flag is set to something other than "true".
    pub fn rebalance_pods(&self) -> bool {
        self.rebalance_pods.as_deref().map_or(true, |v| v == "true")
    }

    /// The quota env fallback, treating an empty value as unset.
    pub fn quota_env(&self) -> Option<&str> {
        self.quota.as_deref().filter(|q| !q.is_empty())
    }

    pub fn installation_config_map_name(&self, namespace_prefix: &str) -> String {
        if self.installation_config_map.is_empty() {
            format!("{namespace_prefix}{DEFAULT_INSTALLATION_CONFIG_MAP}")
        } else {
            self.installation_config_map.clone()
        }
    }

    pub fn priority_class_name(&self) -> String {
        if self.priority_class_name.is_empty() {
            DEFAULT_PRIORITY_CLASS_NAME.to_string()
        } else {
            self.priority_class_name.clone()
        }
    }
}

pub const DEFAULT_INSTALLATION_CONFIG_MAP: &str = "installation-config";
pub const DEFAULT_PRIORITY_CLASS_NAME: &str = "rhoam-pod-priority";

// ── Naming helpers ────────────────────────────────────────────────────────────

/// First two dash-separated segments of the watch namespace plus a trailing
/// dash: `redhat-rhoam-operator` becomes `redhat-rhoam-`.
pub fn namespace_prefix_from(watch_namespace: &str) -> String {
    let segments: Vec<&str> = watch_namespace.split('-').take(2).collect();
    format!("{}-", segments.join("-"))
}

/// Name given to an auto-created installation resource.
pub fn installation_name_for(installation_type: InstallationType) -> &'static str {
    if installation_type.uses_quota() {
        "rhoam"
    } else {
        "rhmi"
    }
}

/// Namespace a namespaced product lives in.
pub fn product_namespace(namespace_prefix: &str, product: &str) -> String {
    format!("{namespace_prefix}{product}")
}

/// Generate a random alphanumeric secret of the given length.
pub fn generate_secret(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

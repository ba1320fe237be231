//! Unit tests for naming, configuration and finalizer helpers.

use kube::api::ObjectMeta;

use integreatly_operator::controller::helpers::*;
use integreatly_operator::crd::rhmi::{Rhmi, RhmiSpec};
use integreatly_operator::crd::shared::InstallationType;
use integreatly_operator::helpers::*;

/// Build a minimal installation for testing.
fn test_installation(name: &str) -> Rhmi {
    Rhmi {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("redhat-rhoam-operator".to_string()),
            uid: Some("rhmi-uid-1234".to_string()),
            ..Default::default()
        },
        spec: RhmiSpec {
            installation_type: InstallationType::ManagedApi,
            namespace_prefix: "redhat-rhoam-".to_string(),
            ..Default::default()
        },
        status: None,
    }
}

fn strings(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

// ── controller_owner_ref ────────────────────────────────────────────────────

#[test]
fn test_controller_owner_ref_sets_api_version_and_kind() {
    let inst = test_installation("rhoam");
    let oref = controller_owner_ref(&inst);

    assert_eq!(oref.api_version, "integreatly.org/v1alpha1");
    assert_eq!(oref.kind, "RHMI");
    assert_eq!(oref.name, "rhoam");
    assert_eq!(oref.uid, "rhmi-uid-1234");
    assert_eq!(oref.controller, Some(true));
    assert_eq!(oref.block_owner_deletion, Some(true));
}

#[test]
fn test_controller_owner_ref_missing_uid_defaults_to_empty() {
    let mut inst = test_installation("no-uid");
    inst.metadata.uid = None;
    assert_eq!(controller_owner_ref(&inst).uid, "");
}

// ── kube_object_ref ─────────────────────────────────────────────────────────

#[test]
fn test_kube_object_ref_carries_namespace() {
    let oref = kube_object_ref(&test_installation("rhoam"));
    assert_eq!(oref.kind.as_deref(), Some("RHMI"));
    assert_eq!(oref.namespace.as_deref(), Some("redhat-rhoam-operator"));
}

// ── finalizer lists ─────────────────────────────────────────────────────────

#[test]
fn test_with_finalizer_appends_once() {
    let list = with_finalizer(&strings(&["a"]), DELETION_FINALIZER);
    assert_eq!(list, strings(&["a", DELETION_FINALIZER]));
    assert_eq!(with_finalizer(&list, DELETION_FINALIZER), list);
}

#[test]
fn test_without_finalizer_keeps_order() {
    let list = strings(&["a", "b", "c"]);
    assert_eq!(without_finalizer(&list, "b"), strings(&["a", "c"]));
    assert_eq!(without_finalizer(&list, "missing"), list);
}

#[test]
fn test_replace_finalizer_swaps_legacy_name() {
    let list = strings(&["rhsso.integreatly.org/finalizer", LEGACY_DELETION_FINALIZER]);
    assert_eq!(
        replace_finalizer(&list, LEGACY_DELETION_FINALIZER, DELETION_FINALIZER),
        strings(&["rhsso.integreatly.org/finalizer", DELETION_FINALIZER])
    );
}

#[test]
fn test_replace_finalizer_does_not_duplicate() {
    let list = strings(&[LEGACY_DELETION_FINALIZER, DELETION_FINALIZER]);
    assert_eq!(
        replace_finalizer(&list, LEGACY_DELETION_FINALIZER, DELETION_FINALIZER),
        strings(&[DELETION_FINALIZER])
    );
}

// ── requeue intervals ───────────────────────────────────────────────────────

#[test]
fn test_settled_requeue_shorter_for_multitenant() {
    assert_eq!(
        settled_requeue(InstallationType::MultitenantManagedApi).as_secs(),
        30
    );
    assert_eq!(settled_requeue(InstallationType::ManagedApi).as_secs(), 300);
    assert_eq!(REQUEUE_SHORT.as_secs(), 10);
}

// ── naming ──────────────────────────────────────────────────────────────────

#[test]
fn test_namespace_prefix_from_watch_namespace() {
    assert_eq!(namespace_prefix_from("redhat-rhoam-operator"), "redhat-rhoam-");
    assert_eq!(namespace_prefix_from("sandbox"), "sandbox-");
}

#[test]
fn test_installation_name_for_type() {
    assert_eq!(installation_name_for(InstallationType::ManagedApi), "rhoam");
    assert_eq!(
        installation_name_for(InstallationType::MultitenantManagedApi),
        "rhoam"
    );
    assert_eq!(installation_name_for(InstallationType::Workshop), "rhmi");
}

#[test]
fn test_product_namespace() {
    assert_eq!(product_namespace("redhat-rhoam-", "3scale"), "redhat-rhoam-3scale");
}

#[test]
fn test_generate_secret_length_and_charset() {
    let s = generate_secret(32);
    assert_eq!(s.len(), 32);
    assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    assert_ne!(s, generate_secret(32));
}

// ── OperatorConfig ──────────────────────────────────────────────────────────

#[test]
fn test_rebalance_pods_defaults_to_true() {
    let mut config = OperatorConfig::default();
    assert!(config.rebalance_pods());
    config.rebalance_pods = Some("true".into());
    assert!(config.rebalance_pods());
    config.rebalance_pods = Some("no".into());
    assert!(!config.rebalance_pods());
}

#[test]
fn test_quota_env_treats_empty_as_unset() {
    let mut config = OperatorConfig::default();
    assert_eq!(config.quota_env(), None);
    config.quota = Some(String::new());
    assert_eq!(config.quota_env(), None);
    config.quota = Some("50".into());
    assert_eq!(config.quota_env(), Some("50"));
}

#[test]
fn test_installation_config_map_name_override() {
    let mut config = OperatorConfig::default();
    assert_eq!(
        config.installation_config_map_name("redhat-rhoam-"),
        "redhat-rhoam-installation-config"
    );
    config.installation_config_map = "custom".into();
    assert_eq!(config.installation_config_map_name("redhat-rhoam-"), "custom");
}

#[test]
fn test_priority_class_name_default() {
    let mut config = OperatorConfig::default();
    assert_eq!(config.priority_class_name(), "rhoam-pod-priority");
    config.priority_class_name = "custom-priority".into();
    assert_eq!(config.priority_class_name(), "custom-priority");
}

// ── FIELD_MANAGER ───────────────────────────────────────────────────────────

#[test]
fn test_field_manager_value() {
    assert_eq!(FIELD_MANAGER, "integreatly-operator");
}

//! Shared helpers for controller modules.
//!
//! Kubernetes object references, finalizer list manipulation and the requeue
//! intervals used by the installation controller.  Pure naming and
//! configuration helpers live in `crate::helpers` instead.

use std::fmt::Debug;
use std::time::Duration;

use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, Patch, PatchParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::crd::shared::InstallationType;
use crate::error::Result;

/// Field manager name used for patches.
pub const FIELD_MANAGER: &str = "integreatly-operator";

/// Top-level finalizer held on the installation until uninstall completes.
pub const DELETION_FINALIZER: &str = "finalizer/configmaps";
/// Finalizer name written by earlier operator versions.
pub const LEGACY_DELETION_FINALIZER: &str = "finalizer.configmaps.integreatly.org";

/// Requeue while a stage, preflight or uninstall step is incomplete.
pub const REQUEUE_SHORT: Duration = Duration::from_secs(10);
/// Requeue once every stage reports Completed.
pub const REQUEUE_SETTLED: Duration = Duration::from_secs(5 * 60);
/// Multitenant installs keep polling for new tenants.
pub const REQUEUE_SETTLED_MULTITENANT: Duration = Duration::from_secs(30);

pub fn settled_requeue(installation_type: InstallationType) -> Duration {
    if installation_type.is_multitenant() {
        REQUEUE_SETTLED_MULTITENANT
    } else {
        REQUEUE_SETTLED
    }
}

/// Build a controller OwnerReference for any kube-rs `Resource`.
///
/// The trait bound `K: Resource<DynamicType = ()>` means "any type whose
/// Kubernetes metadata is known at compile time", which is true for every
/// struct that derives `CustomResource`.
pub fn controller_owner_ref<K: Resource<DynamicType = ()>>(obj: &K) -> OwnerReference {
    OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: obj.name_any(),
        uid: obj.meta().uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Build an ObjectReference from any kube Resource.
pub fn kube_object_ref<K: Resource<DynamicType = ()>>(obj: &K) -> ObjectReference {
    ObjectReference {
        api_version: Some(K::api_version(&()).to_string()),
        kind: Some(K::kind(&()).to_string()),
        name: Some(obj.name_any()),
        namespace: obj.namespace(),
        uid: obj.meta().uid.clone(),
        resource_version: obj.meta().resource_version.clone(),
        ..Default::default()
    }
}

// ── Finalizer lists ───────────────────────────────────────────────────────────

/// Append `finalizer` unless already present, keeping order.
pub fn with_finalizer(finalizers: &[String], finalizer: &str) -> Vec<String> {
    let mut out = finalizers.to_vec();
    if !out.iter().any(|f| f == finalizer) {
        out.push(finalizer.to_string());
    }
    out
}

pub fn without_finalizer(finalizers: &[String], finalizer: &str) -> Vec<String> {
    finalizers
        .iter()
        .filter(|f| f.as_str() != finalizer)
        .cloned()
        .collect()
}

/// Swap `old` for `new` in place; a list without `old` is returned as is.
pub fn replace_finalizer(finalizers: &[String], old: &str, new: &str) -> Vec<String> {
    let mut out = Vec::with_capacity(finalizers.len());
    for f in finalizers {
        let f = if f == old { new } else { f.as_str() };
        if !out.iter().any(|o: &String| o == f) {
            out.push(f.to_string());
        }
    }
    out
}

/// Write a finalizer list guarded by the object's resourceVersion, so a
/// concurrent update fails with a conflict instead of being overwritten.
pub async fn patch_finalizers<K>(api: &Api<K>, obj: &K, finalizers: &[String]) -> Result<K>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let patch = json!({
        "metadata": {
            "finalizers": finalizers,
            "resourceVersion": obj.resource_version(),
        }
    });
    let updated = api
        .patch(
            &obj.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await?;
    Ok(updated)
}

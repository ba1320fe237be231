//! Zone rebalancing for product workloads on multi-AZ clusters.
//!
//! A workload whose running pods all landed in one zone gets one pod
//! deleted so the scheduler can place the replacement elsewhere.  Each owner
//! is rebalanced at most [`MAX_REBALANCE_ATTEMPTS`] times, counted in an
//! annotation on the owner.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams,
};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::crd::shared::ProductName;
use crate::error::{is_not_found, Error, ErrorList, Result};

use super::helpers::FIELD_MANAGER;

pub const ZONE_LABEL: &str = "topology.kubernetes.io/zone";
pub const REBALANCE_ATTEMPTS_ANNOTATION: &str = "pod-rebalance-attempts";
pub const MAX_REBALANCE_ATTEMPTS: u32 = 3;

/// Products whose namespaces are checked for zone balance.
pub const REBALANCED_PRODUCTS: [ProductName; 4] = [
    ProductName::ThreeScale,
    ProductName::Rhsso,
    ProductName::RhssoUser,
    ProductName::Marin3r,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum OwnerKind {
    ReplicaSet,
    StatefulSet,
}

impl OwnerKind {
    fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "ReplicaSet" => Some(Self::ReplicaSet),
            "StatefulSet" => Some(Self::StatefulSet),
            _ => None,
        }
    }

    fn api_resource(&self) -> ApiResource {
        let kind = match self {
            Self::ReplicaSet => "ReplicaSet",
            Self::StatefulSet => "StatefulSet",
        };
        ApiResource::from_gvk(&GroupVersionKind::gvk("apps", "v1", kind))
    }
}

impl fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReplicaSet => f.write_str("rs"),
            Self::StatefulSet => f.write_str("ss"),
        }
    }
}

/// A workload with more than one running pod, all in a single zone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnbalancedOwner {
    pub kind: OwnerKind,
    pub name: String,
    pub pods: Vec<String>,
}

fn node_zone(node: &Node) -> Option<&str> {
    node.labels()
        .get(ZONE_LABEL)
        .map(String::as_str)
        .filter(|z| !z.is_empty())
}

/// More than one distinct zone across the cluster's nodes.
pub fn is_multi_az(nodes: &[Node]) -> bool {
    nodes.iter().filter_map(node_zone).collect::<BTreeSet<_>>().len() > 1
}

/// Node internal IP to zone.  Pods report their node by host IP.
pub fn node_zones(nodes: &[Node]) -> BTreeMap<String, String> {
    nodes
        .iter()
        .filter_map(|node| {
            let ip = node
                .status
                .as_ref()?
                .addresses
                .as_ref()?
                .iter()
                .find(|a| a.type_ == "InternalIP")?
                .address
                .clone();
            Some((ip, node_zone(node).unwrap_or_default().to_string()))
        })
        .collect()
}

/// Group running pods by their controlling ReplicaSet or StatefulSet and
/// return the owners whose pods all share one zone.
pub fn find_unbalanced(pods: &[Pod], zones: &BTreeMap<String, String>) -> Vec<UnbalancedOwner> {
    let mut owners: BTreeMap<(OwnerKind, String), (BTreeSet<String>, Vec<String>)> = BTreeMap::new();

    for pod in pods {
        let status = pod.status.as_ref();
        if status.and_then(|s| s.phase.as_deref()) != Some("Running") {
            continue;
        }
        let Some((kind, owner)) = pod.owner_references().iter().find_map(|o| {
            if o.controller != Some(true) {
                return None;
            }
            OwnerKind::from_kind(&o.kind).map(|k| (k, o.name.clone()))
        }) else {
            continue;
        };

        let zone = status
            .and_then(|s| s.host_ip.as_ref())
            .and_then(|ip| zones.get(ip))
            .cloned()
            .unwrap_or_default();
        let entry = owners.entry((kind, owner)).or_default();
        entry.0.insert(zone);
        entry.1.push(pod.name_any());
    }

    owners
        .into_iter()
        .filter(|(_, (zones, pods))| zones.len() == 1 && pods.len() > 1)
        .map(|((kind, name), (_, pods))| UnbalancedOwner { kind, name, pods })
        .collect()
}

/// Rebalance attempts recorded on an owner.
pub fn rebalance_attempts(annotations: &BTreeMap<String, String>) -> Result<u32> {
    match annotations.get(REBALANCE_ATTEMPTS_ANNOTATION) {
        None => Ok(0),
        Some(v) => v.parse().map_err(|_| {
            Error::reconcile(format!(
                "error converting annotation {REBALANCE_ATTEMPTS_ANNOTATION} value {v:?}"
            ))
        }),
    }
}

/// Rebalance the workloads of `namespaces`.  Best effort: every failure is
/// collected and the rest of the namespaces are still visited.
pub async fn reconcile_pod_distribution(client: &Client, namespaces: &[String]) -> ErrorList {
    let mut errors = ErrorList::new();

    let node_api: Api<Node> = Api::all(client.clone());
    let nodes = match node_api.list(&ListParams::default()).await {
        Ok(list) => list.items,
        Err(e) => {
            errors.push(Error::from(e).context("error listing cluster nodes"));
            return errors;
        }
    };
    if !is_multi_az(&nodes) {
        debug!("single zone cluster, skipping pod rebalance");
        return errors;
    }
    let zones = node_zones(&nodes);

    for ns in namespaces {
        info!(namespace = %ns, "reconciling pod balance");
        let pods: Api<Pod> = Api::namespaced(client.clone(), ns);
        let list = match pods.list(&ListParams::default()).await {
            Ok(list) => list.items,
            Err(e) => {
                errors.push(
                    Error::from(e).context(format!("error getting pods to balance on namespace {ns}")),
                );
                continue;
            }
        };
        for owner in find_unbalanced(&list, &zones) {
            if let Err(e) = rebalance(client, ns, &owner).await {
                errors.push(e);
            }
        }
    }
    errors
}

async fn rebalance(client: &Client, ns: &str, owner: &UnbalancedOwner) -> Result<()> {
    let ar = owner.kind.api_resource();
    let owners: Api<DynamicObject> = Api::namespaced_with(client.clone(), ns, &ar);
    let obj = owners.get(&owner.name).await.map_err(|e| {
        Error::from(e).context(format!("error getting {} {} on namespace {ns}", owner.kind, owner.name))
    })?;

    let attempts = rebalance_attempts(obj.annotations())?;
    if attempts >= MAX_REBALANCE_ATTEMPTS {
        warn!(owner = %owner.name, namespace = %ns, "reached max balance attempts");
        return Ok(());
    }
    let Some(pod) = owner.pods.first() else {
        return Ok(());
    };

    warn!(kind = %owner.kind, owner = %owner.name, namespace = %ns, %pod, "pods share one zone, deleting a pod");
    let pods: Api<Pod> = Api::namespaced(client.clone(), ns);
    match pods.delete(pod, &DeleteParams::default()).await {
        Ok(_) => {}
        Err(e) if is_not_found(&e) => {}
        Err(e) => {
            return Err(Error::from(e).context(format!("error deleting pod {pod} on namespace {ns}")))
        }
    }

    let patch = json!({
        "metadata": {
            "annotations": { REBALANCE_ATTEMPTS_ANNOTATION: (attempts + 1).to_string() }
        }
    });
    owners
        .patch(&owner.name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await
        .map_err(|e| {
            Error::from(e).context(format!("error updating {} {} on {ns}", owner.kind, owner.name))
        })?;
    Ok(())
}

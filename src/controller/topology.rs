//! Stage topology per installation type and cluster platform.
//!
//! Install stages run front to back and stop at the first incomplete one;
//! uninstall stages are a separate list walked in the same direction.

use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind};
use kube::Client;
use tracing::debug;

use crate::crd::shared::{
    InstallationType, ProductName, BOOTSTRAP_STAGE, INSTALL_STAGE,
    UNINSTALL_BOOTSTRAP_STAGE, UNINSTALL_CLOUD_RESOURCES_STAGE, UNINSTALL_PRODUCTS_STAGE,
};
use crate::error::{Error, Result};

/// Version every installation type converges to.
pub const OPERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn desired_version(_installation_type: InstallationType) -> &'static str {
    OPERATOR_VERSION
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageSpec {
    pub name: &'static str,
    /// Products in reconcile order.
    pub products: Vec<ProductName>,
}

impl StageSpec {
    fn new(name: &'static str, products: &[ProductName]) -> Self {
        Self {
            name,
            products: products.to_vec(),
        }
    }

    pub fn is_bootstrap(&self) -> bool {
        self.name == BOOTSTRAP_STAGE
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topology {
    pub install: Vec<StageSpec>,
    pub uninstall: Vec<StageSpec>,
}

impl Topology {
    /// Every product the install stages reconcile, in order.
    pub fn install_products(&self) -> impl Iterator<Item = ProductName> + '_ {
        self.install.iter().flat_map(|s| s.products.iter().copied())
    }
}

/// Infrastructure platform reported by the cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Platform {
    Aws,
    Gcp,
    Other(String),
}

impl Platform {
    pub fn from_status_type(s: &str) -> Self {
        match s {
            "AWS" => Self::Aws,
            "GCP" => Self::Gcp,
            other => Self::Other(other.to_string()),
        }
    }
}

pub fn topology_for(installation_type: InstallationType, platform: &Platform) -> Result<Topology> {
    use ProductName::*;

    match installation_type {
        InstallationType::ManagedApi => {
            let mut installation = vec![
                CloudResources,
                Observability,
                Rhsso,
                ThreeScale,
                RhssoUser,
                Marin3r,
                Grafana,
            ];
            let mut cloud_resources = vec![CloudResources];
            if *platform == Platform::Gcp {
                installation.push(Mcg);
                cloud_resources.push(Mcg);
            }
            Ok(Topology {
                install: vec![
                    StageSpec::new(BOOTSTRAP_STAGE, &[]),
                    StageSpec::new(INSTALL_STAGE, &installation),
                ],
                uninstall: vec![
                    StageSpec::new(
                        UNINSTALL_PRODUCTS_STAGE,
                        &[Rhsso, ThreeScale, RhssoUser, Marin3r, Grafana],
                    ),
                    StageSpec::new(UNINSTALL_CLOUD_RESOURCES_STAGE, &cloud_resources),
                    StageSpec::new(UNINSTALL_BOOTSTRAP_STAGE, &[Observability]),
                ],
            })
        }
        InstallationType::MultitenantManagedApi => Ok(Topology {
            install: vec![
                StageSpec::new(BOOTSTRAP_STAGE, &[]),
                StageSpec::new(
                    INSTALL_STAGE,
                    &[CloudResources, Observability, Rhsso, ThreeScale, Marin3r, Grafana],
                ),
            ],
            uninstall: vec![
                StageSpec::new(UNINSTALL_PRODUCTS_STAGE, &[Rhsso, ThreeScale, Marin3r, Grafana]),
                StageSpec::new(UNINSTALL_CLOUD_RESOURCES_STAGE, &[CloudResources]),
                StageSpec::new(UNINSTALL_BOOTSTRAP_STAGE, &[Observability]),
            ],
        }),
        other => Err(Error::UnknownInstallationType(other.to_string())),
    }
}

fn infrastructure_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        "config.openshift.io",
        "v1",
        "Infrastructure",
    ))
}

/// The cluster `Infrastructure` object, or `None` on clusters that do not
/// serve one.
pub async fn cluster_infrastructure(client: &Client) -> Result<Option<DynamicObject>> {
    let api: Api<DynamicObject> = Api::all_with(client.clone(), &infrastructure_resource());
    match api.get_opt("cluster").await {
        Ok(infra) => Ok(infra),
        Err(e) if crate::error::is_not_found(&e) => Ok(None),
        Err(e) => Err(Error::from(e).context("error getting cluster infrastructure information")),
    }
}

pub async fn platform_type(client: &Client) -> Result<Platform> {
    let platform = cluster_infrastructure(client)
        .await?
        .and_then(|infra| {
            infra
                .data
                .pointer("/status/platformStatus/type")
                .and_then(|v| v.as_str())
                .map(Platform::from_status_type)
        })
        .unwrap_or_else(|| Platform::Other(String::new()));
    debug!(?platform, "resolved cluster platform");
    Ok(platform)
}

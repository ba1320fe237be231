use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::Error;

// ── Stage names ───────────────────────────────────────────────────────────────

pub const BOOTSTRAP_STAGE: &str = "bootstrap";
pub const INSTALL_STAGE: &str = "installation";
pub const COMPLETE_STAGE: &str = "complete";
pub const PREFLIGHT_STAGE: &str = "Preflight Checks";
pub const DELETION_STAGE: &str = "deletion";
pub const UNINSTALL_PRODUCTS_STAGE: &str = "uninstall - products";
pub const UNINSTALL_CLOUD_RESOURCES_STAGE: &str = "uninstall - cloud-resources";
pub const UNINSTALL_BOOTSTRAP_STAGE: &str = "uninstall - bootstrap";

// ── InstallationType ──────────────────────────────────────────────────────────

/// The flavour of managed service being installed.  Selects the stage
/// topology, the requeue interval and which preflight checks apply.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum InstallationType {
    #[serde(rename = "managed")]
    Managed,
    #[default]
    #[serde(rename = "managed-api")]
    ManagedApi,
    #[serde(rename = "multitenant-managed-api")]
    MultitenantManagedApi,
    #[serde(rename = "workshop")]
    Workshop,
    #[serde(rename = "self-managed")]
    SelfManaged,
}

impl InstallationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Managed => "managed",
            Self::ManagedApi => "managed-api",
            Self::MultitenantManagedApi => "multitenant-managed-api",
            Self::Workshop => "workshop",
            Self::SelfManaged => "self-managed",
        }
    }

    /// Both managed-api flavours consume a quota tier.
    pub fn uses_quota(&self) -> bool {
        matches!(self, Self::ManagedApi | Self::MultitenantManagedApi)
    }

    pub fn is_multitenant(&self) -> bool {
        matches!(self, Self::MultitenantManagedApi)
    }

    /// Types that page an on-call rota and therefore need the alerting secrets.
    pub fn requires_managed_alerting(&self) -> bool {
        matches!(
            self,
            Self::Managed | Self::ManagedApi | Self::MultitenantManagedApi
        )
    }
}

impl fmt::Display for InstallationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstallationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "managed" => Ok(Self::Managed),
            "managed-api" => Ok(Self::ManagedApi),
            "multitenant-managed-api" => Ok(Self::MultitenantManagedApi),
            "workshop" => Ok(Self::Workshop),
            "self-managed" => Ok(Self::SelfManaged),
            other => Err(Error::UnknownInstallationType(other.to_string())),
        }
    }
}

// ── ProductName ───────────────────────────────────────────────────────────────

/// Every product the orchestrator knows how to place in a stage.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProductName {
    #[serde(rename = "rhsso")]
    Rhsso,
    #[serde(rename = "rhssouser")]
    RhssoUser,
    #[serde(rename = "3scale")]
    ThreeScale,
    #[serde(rename = "cloud-resources")]
    CloudResources,
    #[serde(rename = "observability")]
    Observability,
    #[serde(rename = "marin3r")]
    Marin3r,
    #[serde(rename = "grafana")]
    Grafana,
    #[serde(rename = "mcg")]
    Mcg,
}

impl ProductName {
    pub const ALL: [ProductName; 8] = [
        Self::Rhsso,
        Self::RhssoUser,
        Self::ThreeScale,
        Self::CloudResources,
        Self::Observability,
        Self::Marin3r,
        Self::Grafana,
        Self::Mcg,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rhsso => "rhsso",
            Self::RhssoUser => "rhssouser",
            Self::ThreeScale => "3scale",
            Self::CloudResources => "cloud-resources",
            Self::Observability => "observability",
            Self::Marin3r => "marin3r",
            Self::Grafana => "grafana",
            Self::Mcg => "mcg",
        }
    }

    /// Finalizer a product holds on the installation while it is installed.
    pub fn finalizer(&self) -> String {
        format!("{}.integreatly.org/finalizer", self.as_str())
    }
}

impl fmt::Display for ProductName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| Error::config(format!("unknown product: {s}")))
    }
}

// ── StatusPhase ───────────────────────────────────────────────────────────────

/// Convergence state of a product or a stage.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum StatusPhase {
    #[default]
    #[serde(rename = "")]
    NotStarted,
    #[serde(rename = "awaiting operator")]
    AwaitingOperator,
    #[serde(rename = "awaiting cloud resources")]
    AwaitingCloudResources,
    #[serde(rename = "creating components")]
    CreatingComponents,
    #[serde(rename = "awaiting components")]
    AwaitingComponents,
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl StatusPhase {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for StatusPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "",
            Self::AwaitingOperator => "awaiting operator",
            Self::AwaitingCloudResources => "awaiting cloud resources",
            Self::CreatingComponents => "creating components",
            Self::AwaitingComponents => "awaiting components",
            Self::InProgress => "in progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ── PreflightStatus ───────────────────────────────────────────────────────────

/// Outcome of the preflight gate.  A fresh installation has no recorded
/// status, which reads the same as a check in progress.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum PreflightStatus {
    #[default]
    #[serde(rename = "")]
    InProgress,
    #[serde(rename = "successful")]
    Success,
    #[serde(rename = "failed")]
    Fail,
}

impl fmt::Display for PreflightStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InProgress => "InProgress",
            Self::Success => "Success",
            Self::Fail => "Fail",
        };
        f.write_str(s)
    }
}

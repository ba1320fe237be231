//! Product reconcilers: the per-product installers the stage pipeline drives.
//!
//! Each product is reached only through the [`ProductReconciler`] trait.
//! The [`ProductRegistry`] maps a product name to a constructor so new
//! products are added by registering them at startup, not by editing the
//! pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::GroupVersionKind;
use kube::Client;
#[cfg(test)]
use mockall::automock;

use crate::controller::quota::ProductQuota;
use crate::crd::rhmi::{Rhmi, RhmiProductStatus};
use crate::crd::shared::ProductName;
use crate::error::{Error, Result};

pub mod namespaced;

pub use namespaced::NamespacedProduct;

// ── Product configuration types ───────────────────────────────────────────────

/// A resource kind a product asks the orchestrator to watch once it is
/// installed, so changes to it re-trigger reconciliation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WatchableKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl WatchableKind {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }
}

impl fmt::Display for WatchableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}, Kind={}", self.version, self.kind)
        } else {
            write!(f, "{}/{}, Kind={}", self.group, self.version, self.kind)
        }
    }
}

/// An object whose presence in a namespace means a conflicting copy of the
/// product is already installed there.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreflightObject {
    pub kind: WatchableKind,
    pub name: String,
    pub namespace: String,
}

// ── Reconciler contract ───────────────────────────────────────────────────────

/// The contract every product installer fulfils.
///
/// `reconcile` converges the product one step towards installed (or, with
/// `uninstall`, towards removed) and reports the product's new status.  The
/// orchestrator only reads the returned phase to decide stage advancement.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProductReconciler: Send + Sync {
    /// Namespace the product's watchable kinds live in.
    fn namespace(&self) -> String;

    fn watchable_kinds(&self) -> Vec<WatchableKind>;

    /// Whether the installed product matches the version this operator ships.
    fn verify_version(&self, installation: &Rhmi) -> bool;

    fn preflight_object(&self, namespace: &str) -> Option<PreflightObject>;

    async fn reconcile(
        &self,
        installation: &Rhmi,
        status: &RhmiProductStatus,
        quota: &ProductQuota,
        uninstall: bool,
    ) -> Result<RhmiProductStatus>;
}

// ── Registry ──────────────────────────────────────────────────────────────────

pub type ProductConstructor =
    Arc<dyn Fn(&Rhmi) -> Result<Box<dyn ProductReconciler>> + Send + Sync>;

/// Maps product names to the constructor that builds their reconciler for a
/// given installation.
#[derive(Clone, Default)]
pub struct ProductRegistry {
    constructors: BTreeMap<ProductName, ProductConstructor>,
}

impl ProductRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every known product with the generic namespaced installer.
    pub fn with_namespaced_products(client: Client) -> Self {
        let mut registry = Self::new();
        for product in ProductName::ALL {
            let client = client.clone();
            registry.register(product, move |installation: &Rhmi| {
                Ok(Box::new(NamespacedProduct::new(client.clone(), product, installation))
                    as Box<dyn ProductReconciler>)
            });
        }
        registry
    }

    pub fn register<F>(&mut self, product: ProductName, constructor: F)
    where
        F: Fn(&Rhmi) -> Result<Box<dyn ProductReconciler>> + Send + Sync + 'static,
    {
        self.constructors.insert(product, Arc::new(constructor));
    }

    pub fn build(&self, product: ProductName, installation: &Rhmi) -> Result<Box<dyn ProductReconciler>> {
        let constructor = self
            .constructors
            .get(&product)
            .ok_or_else(|| Error::NotFound(format!("no reconciler registered for {product}")))?;
        constructor(installation)
    }
}

impl fmt::Debug for ProductRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProductRegistry")
            .field("products", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

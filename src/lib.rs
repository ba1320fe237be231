//! integreatly-operator: installs a managed service onto a cluster as an
//! ordered pipeline of product stages driven from a single `RHMI` resource.

pub mod controller;
pub mod crd;
pub mod error;
pub mod helpers;
pub mod products;

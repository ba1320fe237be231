use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::Api;
use kube::ResourceExt;

use super::common::*;
use integreatly_operator::controller::quota::ProductQuota;
use integreatly_operator::crd::rhmi::{RhmiProductStatus, RhmiStageStatus, RhmiStatus};
use integreatly_operator::crd::shared::{InstallationType, ProductName, StatusPhase};
use integreatly_operator::products::namespaced::{INSTALLATION_LABEL, INSTALLATION_UID_LABEL};
use integreatly_operator::products::{NamespacedProduct, ProductReconciler};

/// The product namespace is created and labelled, and the product waits for
/// its operator until a Deployment shows up.
#[tokio::test]
async fn namespaced_product_install_lifecycle() {
    let ctx = TestContext::new().await;
    let rhmi = ctx.create_installation(InstallationType::ManagedApi).await;
    let product = NamespacedProduct::new(ctx.client.clone(), ProductName::Grafana, &rhmi);
    let product_ns = format!("{}grafana", ctx.prefix());
    assert_eq!(product.namespace(), product_ns);

    let quota = ProductQuota::default();
    let status = product
        .reconcile(&rhmi, &RhmiProductStatus::new(ProductName::Grafana), &quota, false)
        .await
        .unwrap();
    assert_eq!(status.phase, StatusPhase::AwaitingOperator);
    assert_eq!(status.operator, "grafana-operator");

    let namespaces: Api<Namespace> = Api::all(ctx.client.clone());
    let ns = namespaces.get(&product_ns).await.unwrap();
    let labels = ns.labels();
    assert_eq!(labels.get(INSTALLATION_LABEL).map(String::as_str), Some("true"));
    assert_eq!(labels.get(INSTALLATION_UID_LABEL), rhmi.uid().as_ref());

    create_deployment(&ctx.client, &product_ns, "grafana", 1).await;
    let status = product.reconcile(&rhmi, &status, &quota, false).await.unwrap();
    assert_eq!(status.phase, StatusPhase::AwaitingComponents);
    assert!(status.version.is_empty());

    fake_deployment_available(&ctx.client, &product_ns, "grafana").await;
    let status = product.reconcile(&rhmi, &status, &quota, false).await.unwrap();
    assert_eq!(status.phase, StatusPhase::Completed);
    assert_eq!(status.version, "4.10.1");

    let mut installed = rhmi.clone();
    installed.status = Some(RhmiStatus {
        stages: BTreeMap::from([(
            "installation".to_string(),
            RhmiStageStatus {
                name: "installation".into(),
                phase: StatusPhase::InProgress,
                products: BTreeMap::from([("grafana".to_string(), status)]),
            },
        )]),
        ..Default::default()
    });
    assert!(product.verify_version(&installed));
}

/// Uninstall deletes the namespace and reports progress until it is gone.
#[tokio::test]
async fn namespaced_product_uninstall_deletes_namespace() {
    let ctx = TestContext::new().await;
    let rhmi = ctx.create_installation(InstallationType::ManagedApi).await;
    let product = NamespacedProduct::new(ctx.client.clone(), ProductName::Marin3r, &rhmi);
    let quota = ProductQuota::default();

    let installed = product
        .reconcile(&rhmi, &RhmiProductStatus::new(ProductName::Marin3r), &quota, false)
        .await
        .unwrap();

    let status = product.reconcile(&rhmi, &installed, &quota, true).await.unwrap();
    assert!(status.uninstall);
    // No namespace controller in the test API server, so it stays Terminating.
    assert_eq!(status.phase, StatusPhase::InProgress);

    let namespaces: Api<Namespace> = Api::all(ctx.client.clone());
    let ns = namespaces.get(&product.namespace()).await.unwrap();
    assert!(ns.metadata.deletion_timestamp.is_some());
}

/// A product whose namespace never existed is already uninstalled.
#[tokio::test]
async fn uninstall_without_namespace_completes() {
    let ctx = TestContext::new().await;
    let rhmi = ctx.create_installation(InstallationType::ManagedApi).await;
    let product = NamespacedProduct::new(ctx.client.clone(), ProductName::Mcg, &rhmi);

    let status = product
        .reconcile(
            &rhmi,
            &RhmiProductStatus::new(ProductName::Mcg),
            &ProductQuota::default(),
            true,
        )
        .await
        .unwrap();
    assert_eq!(status.phase, StatusPhase::Completed);
}

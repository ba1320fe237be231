use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::ResourceExt;
use serde_json::json;

use super::common::*;
use integreatly_operator::controller::bootstrap::CLOUD_RESOURCE_CONFIG_MAP;
use integreatly_operator::controller::helpers::DELETION_FINALIZER;
use integreatly_operator::controller::topology::{topology_for, Platform};
use integreatly_operator::controller::uninstall::run_uninstall;
use integreatly_operator::crd::rhmi::Rhmi;
use integreatly_operator::crd::shared::{InstallationType, ProductName};
use integreatly_operator::products::ProductRegistry;

/// Give the installation `finalizers`, delete it and return the deleting copy.
async fn delete_with_finalizers(ctx: &TestContext, finalizers: &[String]) -> Rhmi {
    ctx.create_installation(InstallationType::ManagedApi).await;
    let api: Api<Rhmi> = Api::namespaced(ctx.client.clone(), &ctx.ns);
    api.patch(
        "rhoam",
        &PatchParams::default(),
        &Patch::Merge(&json!({ "metadata": { "finalizers": finalizers } })),
    )
    .await
    .unwrap();
    api.delete("rhoam", &DeleteParams::default()).await.unwrap();
    let rhmi = ctx.installation().await;
    assert!(rhmi.metadata.deletion_timestamp.is_some());
    rhmi
}

/// The cloud resources ConfigMap the bootstrap stage leaves behind.
async fn create_cloud_resource_config(ctx: &TestContext) -> Api<ConfigMap> {
    let cms: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &ctx.ns);
    let cloud_config: ConfigMap = serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": CLOUD_RESOURCE_CONFIG_MAP,
            "namespace": &ctx.ns,
            "finalizers": [DELETION_FINALIZER]
        },
        "data": { "managed-api": "{}" }
    }))
    .unwrap();
    cms.create(&PostParams::default(), &cloud_config).await.unwrap();
    cms
}

#[tokio::test]
async fn product_namespace_still_terminating_blocks_uninstall() {
    let ctx = TestContext::new().await;
    let cms = create_cloud_resource_config(&ctx).await;
    create_namespace(&ctx.client, &format!("{}rhsso", ctx.prefix())).await;
    let rhmi = delete_with_finalizers(
        &ctx,
        &[ProductName::Rhsso.finalizer(), DELETION_FINALIZER.to_string()],
    )
    .await;

    let registry = ProductRegistry::with_namespaced_products(ctx.client.clone());
    let topology = topology_for(InstallationType::ManagedApi, &Platform::Aws).unwrap();
    let outcome = run_uninstall(&ctx.client, &rhmi, &ctx.config(), &topology.uninstall, &registry)
        .await
        .unwrap();

    assert!(!outcome.completed);
    assert!(outcome.pass.pending);
    assert_eq!(outcome.pass.stages.len(), 1);

    let rhmi = ctx.installation().await;
    assert!(rhmi.has_finalizer(&ProductName::Rhsso.finalizer()));
    assert!(rhmi.has_finalizer(DELETION_FINALIZER));

    // Bootstrap resources outlive the products.
    let cloud_config = cms.get_opt(CLOUD_RESOURCE_CONFIG_MAP).await.unwrap();
    let cloud_config = cloud_config.expect("cloud resource config removed while products pending");
    assert_eq!(cloud_config.finalizers(), [DELETION_FINALIZER.to_string()]);
}

#[tokio::test]
async fn uninstall_removes_bootstrap_resources_and_finalizer() {
    let ctx = TestContext::new().await;
    let cms = create_cloud_resource_config(&ctx).await;

    let rhmi = delete_with_finalizers(&ctx, &[DELETION_FINALIZER.to_string()]).await;

    let registry = ProductRegistry::with_namespaced_products(ctx.client.clone());
    let topology = topology_for(InstallationType::ManagedApi, &Platform::Aws).unwrap();
    let outcome = run_uninstall(&ctx.client, &rhmi, &ctx.config(), &topology.uninstall, &registry)
        .await
        .unwrap();

    assert!(outcome.completed);
    assert!(outcome.pass.products_released());
    assert!(cms.get_opt(CLOUD_RESOURCE_CONFIG_MAP).await.unwrap().is_none());

    let api: Api<Rhmi> = Api::namespaced(ctx.client.clone(), &ctx.ns);
    assert!(
        wait_for(TIMEOUT, POLL, || {
            let api = api.clone();
            async move { matches!(api.get_opt("rhoam").await, Ok(None)) }
        })
        .await,
        "installation should be gone once its last finalizer is removed"
    );
}

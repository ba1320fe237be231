use chrono::Utc;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::api::scheduling::v1::PriorityClass;
use kube::api::Api;

use super::common::*;
use integreatly_operator::controller::bootstrap::{
    oauth_secret_name, Bootstrap, CLOUD_RESOURCE_CONFIG_MAP, GITHUB_OAUTH_SECRET,
    RATE_LIMIT_ALERTS_CONFIG_MAP,
};
use integreatly_operator::controller::helpers::DELETION_FINALIZER;
use integreatly_operator::controller::quota::QUOTA_CONFIG_MAP;
use integreatly_operator::controller::topology::Platform;
use integreatly_operator::crd::shared::{InstallationType, StatusPhase};

/// Bootstrap provisions its shared resources even while quota is still
/// waiting on the add-on parameter.
#[tokio::test]
async fn bootstrap_provisions_shared_resources() {
    let ctx = TestContext::new().await;
    let rhmi = ctx.create_installation(InstallationType::ManagedApi).await;

    let outcome = Bootstrap::new(&ctx.client, &rhmi)
        .run(&Platform::Other(String::new()), None, Utc::now())
        .await;

    assert_eq!(outcome.stage.phase, StatusPhase::InProgress);
    assert!(outcome.stage.errors.iter().all(|e| e.is_quota_waiting()));
    assert!(outcome.quota.is_none());

    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &ctx.ns);
    let oauth = secrets.get(&oauth_secret_name(&ctx.prefix())).await.unwrap();
    let data = oauth.data.unwrap();
    for key in ["rhsso", "rhssouser", "3scale"] {
        assert_eq!(data[key].0.len(), 32, "{key}");
    }

    let github = secrets.get(GITHUB_OAUTH_SECRET).await.unwrap().data.unwrap();
    assert_eq!(github["clientId"].0, b"dummy");

    let cms: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &ctx.ns);
    let cloud = cms.get(CLOUD_RESOURCE_CONFIG_MAP).await.unwrap();
    assert_eq!(
        cloud.metadata.finalizers,
        Some(vec![DELETION_FINALIZER.to_string()])
    );
    assert!(cloud.data.unwrap()["managed-api"].contains("\"postgres\":\"openshift\""));

    let alerts = cms.get(RATE_LIMIT_ALERTS_CONFIG_MAP).await.unwrap();
    assert!(alerts.data.unwrap()["alerts"].contains("RHOAMApiUsageLevel1ThresholdExceeded"));
    assert!(cms.get(QUOTA_CONFIG_MAP).await.is_ok());

    let classes: Api<PriorityClass> = Api::all(ctx.client.clone());
    let class = classes.get(&format!("{}-priority", ctx.ns)).await.unwrap();
    assert_eq!(class.value, 1_000_000_000);
    assert_eq!(class.global_default, Some(false));
}

/// A second pass keeps every generated secret value.
#[tokio::test]
async fn bootstrap_does_not_regenerate_secrets() {
    let ctx = TestContext::new().await;
    ctx.create_addon_parameters("1").await;
    let rhmi = ctx.create_installation(InstallationType::ManagedApi).await;
    let platform = Platform::Other(String::new());

    let first = Bootstrap::new(&ctx.client, &rhmi)
        .run(&platform, None, Utc::now())
        .await;
    assert_eq!(first.stage.phase, StatusPhase::Completed);
    assert_eq!(first.quota.as_ref().map(|q| q.name().to_string()).as_deref(), Some("100K"));
    let track = first.quota_track.unwrap();
    assert_eq!(track.pending, "100K");

    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &ctx.ns);
    let name = oauth_secret_name(&ctx.prefix());
    let before = secrets.get(&name).await.unwrap().data.unwrap();

    let rhmi = ctx.installation().await;
    let second = Bootstrap::new(&ctx.client, &rhmi)
        .run(&platform, None, Utc::now())
        .await;
    assert_eq!(second.stage.phase, StatusPhase::Completed);

    let after = secrets.get(&name).await.unwrap().data.unwrap();
    assert_eq!(before, after);
}

/// Multitenant installs get a tenant secret and a zero-value priority class.
#[tokio::test]
async fn multitenant_bootstrap() {
    let ctx = TestContext::new().await;
    ctx.create_addon_parameters("1").await;
    let rhmi = ctx
        .create_installation(InstallationType::MultitenantManagedApi)
        .await;

    let outcome = Bootstrap::new(&ctx.client, &rhmi)
        .run(&Platform::Aws, None, Utc::now())
        .await;
    assert_eq!(outcome.stage.phase, StatusPhase::Completed);

    // No user API in envtest, so the tenant secret exists but is empty.
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &ctx.ns);
    let tenants = secrets.get("tenant-oauth-client-secrets").await.unwrap();
    assert!(tenants.data.unwrap_or_default().is_empty());

    let classes: Api<PriorityClass> = Api::all(ctx.client.clone());
    let class = classes.get(&format!("{}-priority", ctx.ns)).await.unwrap();
    assert_eq!(class.value, 0);

    let cms: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &ctx.ns);
    let cloud = cms.get(CLOUD_RESOURCE_CONFIG_MAP).await.unwrap().data.unwrap();
    assert!(cloud["workshop"].contains("openshift"));
}

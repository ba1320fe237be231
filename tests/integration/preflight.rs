use chrono::{Duration, Utc};

use super::common::*;
use integreatly_operator::controller::preflight::{
    run_preflight, KubeProbe, PreflightInputs, ALERT_SMTP_FROM_ENV, PREFLIGHT_PASSED_MESSAGE,
};
use integreatly_operator::controller::topology::{topology_for, Platform};
use integreatly_operator::crd::shared::{InstallationType, PreflightStatus};
use integreatly_operator::products::ProductRegistry;

fn env(key: &str) -> Option<String> {
    (key == ALERT_SMTP_FROM_ENV).then(|| "noreply@example.com".to_string())
}

#[tokio::test]
async fn missing_alerting_secret_fails_preflight() {
    let ctx = TestContext::new().await;
    let rhmi = ctx.create_installation(InstallationType::ManagedApi).await;
    let registry = ProductRegistry::with_namespaced_products(ctx.client.clone());
    let topology = topology_for(InstallationType::ManagedApi, &Platform::Aws).unwrap();
    let inputs = PreflightInputs {
        env: &env,
        quota_env: None,
        now: Utc::now(),
    };

    let (status, message) = run_preflight(
        &rhmi,
        &KubeProbe::new(ctx.client.clone()),
        &registry,
        &topology.install,
        &inputs,
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(status, PreflightStatus::Fail);
    assert_eq!(
        message,
        format!(
            "Could not find {}pagerduty secret in {} namespace",
            ctx.prefix(),
            ctx.ns
        )
    );
}

#[tokio::test]
async fn healthy_cluster_passes_preflight() {
    let ctx = TestContext::new().await;
    ctx.create_alerting_secrets().await;
    ctx.create_addon_parameters("10").await;
    let rhmi = ctx.create_installation(InstallationType::ManagedApi).await;
    let registry = ProductRegistry::with_namespaced_products(ctx.client.clone());
    let topology = topology_for(InstallationType::ManagedApi, &Platform::Aws).unwrap();
    let inputs = PreflightInputs {
        env: &env,
        quota_env: None,
        now: Utc::now(),
    };

    let (status, message) = run_preflight(
        &rhmi,
        &KubeProbe::new(ctx.client.clone()),
        &registry,
        &topology.install,
        &inputs,
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(status, PreflightStatus::Success);
    assert_eq!(message, PREFLIGHT_PASSED_MESSAGE);
}

#[tokio::test]
async fn quota_env_fallback_after_grace_period() {
    let ctx = TestContext::new().await;
    ctx.create_alerting_secrets().await;
    let rhmi = ctx.create_installation(InstallationType::ManagedApi).await;
    let registry = ProductRegistry::with_namespaced_products(ctx.client.clone());
    let topology = topology_for(InstallationType::ManagedApi, &Platform::Aws).unwrap();
    let probe = KubeProbe::new(ctx.client.clone());
    let later = Utc::now() + Duration::minutes(5);

    let without_env = PreflightInputs {
        env: &env,
        quota_env: None,
        now: later,
    };
    let (status, message) = run_preflight(&rhmi, &probe, &registry, &topology.install, &without_env)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, PreflightStatus::Fail);
    assert_eq!(message, "quota parameter not found from add-on or env var");

    let with_env = PreflightInputs {
        env: &env,
        quota_env: Some("50"),
        now: later,
    };
    let (status, _) = run_preflight(&rhmi, &probe, &registry, &topology.install, &with_env)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, PreflightStatus::Success);
}

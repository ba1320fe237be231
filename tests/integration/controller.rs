use super::common::*;
use integreatly_operator::controller::helpers::DELETION_FINALIZER;
use integreatly_operator::crd::shared::{
    InstallationType, PreflightStatus, ProductName, StatusPhase, BOOTSTRAP_STAGE, INSTALL_STAGE,
};

/// A running controller takes a fresh installation through preflight and
/// bootstrap and parks it on the install stage while products wait for
/// their operators.
#[tokio::test]
async fn controller_drives_installation_to_install_stage() {
    let ctx = TestContext::new().await;
    ctx.create_alerting_secrets().await;
    ctx.create_addon_parameters("1").await;
    ctx.spawn_controller();
    ctx.create_installation(InstallationType::ManagedApi).await;

    let preflight_passed = wait_for_status(&ctx.client, &ctx.ns, |rhmi| {
        rhmi.status
            .as_ref()
            .is_some_and(|s| s.preflight_status == PreflightStatus::Success)
    })
    .await;
    assert!(preflight_passed, "preflight never passed");

    let installing = wait_for_status(&ctx.client, &ctx.ns, |rhmi| {
        rhmi.status.as_ref().is_some_and(|s| {
            s.stage == INSTALL_STAGE
                && s.stages
                    .get(BOOTSTRAP_STAGE)
                    .is_some_and(|b| b.phase == StatusPhase::Completed)
        })
    })
    .await;
    assert!(installing, "installation never reached the install stage");

    let finalized = wait_for_status(&ctx.client, &ctx.ns, |rhmi| {
        rhmi.has_finalizer(DELETION_FINALIZER) && rhmi.has_finalizer(&ProductName::Rhsso.finalizer())
    })
    .await;
    assert!(finalized, "product finalizers were never added");

    let rhmi = ctx.installation().await;
    let status = rhmi.status.unwrap();
    assert_eq!(status.to_quota, "100K");
    assert!(status.version.is_empty(), "nothing is installed yet");
}

/// Preflight failures are reported on the status and block the install.
#[tokio::test]
async fn controller_reports_preflight_failure() {
    let ctx = TestContext::new().await;
    ctx.spawn_controller();
    ctx.create_installation(InstallationType::ManagedApi).await;

    let failed = wait_for_status(&ctx.client, &ctx.ns, |rhmi| {
        rhmi.status.as_ref().is_some_and(|s| {
            s.preflight_status == PreflightStatus::Fail
                && s.preflight_message.contains("pagerduty secret")
        })
    })
    .await;
    assert!(failed, "preflight failure was never reported");

    let rhmi = ctx.installation().await;
    assert!(!rhmi.status.unwrap().stages.contains_key(BOOTSTRAP_STAGE));
}

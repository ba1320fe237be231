//! RHMI controller: the installation reconciler.
//!
//! Each pass adds the top-level finalizer, fills alert address defaults,
//! runs the preflight gate, then either walks the uninstall stages (object
//! being deleted) or the bootstrap and install stages.  Everything the pass
//! learnt is written back in one status patch.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::channel::mpsc::UnboundedReceiver;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::{
    api::{Api, ListParams, Patch, PatchParams, PostParams, ResourceExt},
    runtime::{
        controller::{Action, Controller},
        events::{Event as KubeEvent, EventType, Recorder, Reporter},
        reflector::ObjectRef,
        watcher::Config as WatcherConfig,
    },
    Client, Resource,
};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::crd::rhmi::{AlertingEmailAddresses, Rhmi, RhmiSpec, RhmiStatus};
use crate::crd::shared::{
    PreflightStatus, StatusPhase, COMPLETE_STAGE, DELETION_STAGE, PREFLIGHT_STAGE,
};
use crate::error::{Error, ErrorList, Result};
use crate::helpers::{installation_name_for, namespace_prefix_from, OperatorConfig};
use crate::products::ProductRegistry;

use super::bootstrap::Bootstrap;
use super::dual_track::{DualTrack, PendingPolicy};
use super::helpers::{
    kube_object_ref, patch_finalizers, replace_finalizer, settled_requeue, with_finalizer,
    DELETION_FINALIZER, FIELD_MANAGER, LEGACY_DELETION_FINALIZER, REQUEUE_SHORT,
};
use super::pipeline::{run_install_stages, PipelineOutcome, StageResult};
use super::pod_distribution::{reconcile_pod_distribution, REBALANCED_PRODUCTS};
use super::preflight::{run_preflight, KubeProbe, PreflightInputs};
use super::quota::{AddonParameters, Quota, NOTIFICATION_EMAIL_PARAM};
use super::topology::{desired_version, platform_type, topology_for, Topology};
use super::uninstall::run_uninstall;
use super::watches::WatchProvisioner;

/// Publish a Kubernetes event attached to the given resource.
/// Errors are logged but never block reconciliation.
pub async fn publish_event<K: Resource<DynamicType = ()>>(
    ctx: &Context,
    obj: &K,
    type_: EventType,
    reason: &str,
    action: &str,
    note: Option<String>,
) {
    let rec = Recorder::new(ctx.client.clone(), ctx.reporter.clone());
    let oref = kube_object_ref(obj);
    if let Err(e) = rec
        .publish(
            &KubeEvent {
                type_,
                reason: reason.to_string(),
                note,
                action: action.to_string(),
                secondary: None,
            },
            &oref,
        )
        .await
    {
        warn!(%e, "failed to publish event");
    }
}

// ── Shared context passed to every reconcile call ─────────────────────────────

pub struct Context {
    pub client: Client,
    pub config: OperatorConfig,
    pub registry: ProductRegistry,
    pub watches: Arc<dyn WatchProvisioner>,
    pub reporter: Reporter,
}

// ── Controller entry point ────────────────────────────────────────────────────

/// Start the RHMI controller. Returns a future that runs until shutdown.
///
/// `triggers` carries re-queue requests from the product watches.
pub async fn run(ctx: Arc<Context>, triggers: UnboundedReceiver<ObjectRef<Rhmi>>) {
    let client = ctx.client.clone();
    let ns = ctx.config.watch_namespace.clone();
    let installations: Api<Rhmi> = Api::namespaced(client.clone(), &ns);
    let secrets: Api<Secret> = Api::namespaced(client.clone(), &ns);
    let configmaps: Api<ConfigMap> = Api::namespaced(client.clone(), &ns);

    let controller = Controller::new(installations, WatcherConfig::default());
    let store = controller.store();
    let cm_store = store.clone();

    controller
        // Any Secret or ConfigMap in the operator namespace re-triggers
        // every installation.
        .watches(secrets, WatcherConfig::default(), move |_: Secret| {
            store
                .state()
                .into_iter()
                .map(|rhmi| ObjectRef::from_obj(rhmi.as_ref()))
        })
        .watches(configmaps, WatcherConfig::default(), move |_: ConfigMap| {
            cm_store
                .state()
                .into_iter()
                .map(|rhmi| ObjectRef::from_obj(rhmi.as_ref()))
        })
        .reconcile_on(triggers)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((_obj, _action)) => {}
                Err(e) => {
                    let msg = format!("{e:?}");
                    if msg.contains("ObjectNotFound") {
                        debug!("reconcile: object already deleted");
                    } else {
                        warn!("reconcile failed: {msg}");
                    }
                }
            }
        })
        .await;
}

// ── Startup ───────────────────────────────────────────────────────────────────

/// The installation the operator creates when the namespace has none.
pub fn default_installation(config: &OperatorConfig) -> Rhmi {
    let installation_type = config.installation_type;
    let prefix = namespace_prefix_from(&config.watch_namespace);
    let priority_class_name = if installation_type.uses_quota() {
        config.priority_class_name()
    } else {
        config.priority_class_name.clone()
    };

    let mut rhmi = Rhmi::new(
        installation_name_for(installation_type),
        RhmiSpec {
            installation_type,
            smtp_secret: format!("{prefix}smtp"),
            pager_duty_secret: format!("{prefix}pagerduty"),
            dead_mans_snitch_secret: format!("{prefix}deadmanssnitch"),
            namespace_prefix: prefix,
            use_cluster_storage: config.use_cluster_storage.clone(),
            rebalance_pods: config.rebalance_pods(),
            alerting_email_address: config.alerting_email_address.clone(),
            alerting_email_addresses: AlertingEmailAddresses {
                business_unit: config.bu_alerting_email_address.clone(),
                cssre: config.alerting_email_address.clone(),
            },
            priority_class_name,
            ..Default::default()
        },
    );
    rhmi.metadata.namespace = Some(config.watch_namespace.clone());
    rhmi
}

/// Make sure exactly one installation exists in the watch namespace,
/// creating it from the operator configuration when there is none.
pub async fn ensure_installation(client: &Client, config: &OperatorConfig) -> Result<()> {
    let api: Api<Rhmi> = Api::namespaced(client.clone(), &config.watch_namespace);
    let existing = api.list(&ListParams::default()).await?;
    match existing.items.len() {
        0 => {
            let rhmi = default_installation(config);
            info!(name = %rhmi.name_any(), ns = %config.watch_namespace, "creating installation");
            api.create(&PostParams::default(), &rhmi).await?;
            Ok(())
        }
        1 => Ok(()),
        n => Err(Error::config(format!(
            "found {n} installations in {}, expected at most one",
            config.watch_namespace
        ))),
    }
}

// ── Reconcile ─────────────────────────────────────────────────────────────────

async fn reconcile(rhmi: Arc<Rhmi>, ctx: Arc<Context>) -> Result<Action> {
    let ns = rhmi.namespace().unwrap_or_default();
    let name = rhmi.name_any();
    let api: Api<Rhmi> = Api::namespaced(ctx.client.clone(), &ns);

    debug!(%name, %ns, "reconciling installation");

    if !rhmi.is_deleting() {
        let finalizers = with_finalizer(
            &replace_finalizer(rhmi.finalizers(), LEGACY_DELETION_FINALIZER, DELETION_FINALIZER),
            DELETION_FINALIZER,
        );
        if finalizers.as_slice() != rhmi.finalizers() {
            info!(%name, "adding deletion finalizer");
            patch_finalizers(&api, rhmi.as_ref(), &finalizers).await?;
            return Ok(Action::requeue(Duration::from_secs(0)));
        }
    }

    if apply_alert_defaults(&ctx, &rhmi).await {
        publish_event(
            &ctx,
            rhmi.as_ref(),
            EventType::Normal,
            "DefaultsApplied",
            "Reconcile",
            Some("Alerting addresses defaulted from operator configuration".to_string()),
        )
        .await;
        return Ok(Action::requeue(Duration::from_secs(0)));
    }

    let platform = platform_type(&ctx.client).await?;
    let topology = topology_for(rhmi.spec.installation_type, &platform)?;

    // Preflight gate.
    let env = |key: &str| std::env::var(key).ok();
    let inputs = PreflightInputs {
        env: &env,
        quota_env: ctx.config.quota_env(),
        now: Utc::now(),
    };
    let probe = KubeProbe::new(ctx.client.clone());
    if let Some((status, message)) =
        run_preflight(&rhmi, &probe, &ctx.registry, &topology.install, &inputs).await?
    {
        let patch = json!({
            "status": {
                "preflightStatus": status,
                "preflightMessage": message,
                "stage": PREFLIGHT_STAGE,
            }
        });
        api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;

        if status != PreflightStatus::Success {
            warn!(%name, %message, "preflight checks failed");
            publish_event(
                &ctx,
                rhmi.as_ref(),
                EventType::Warning,
                "PreflightFailed",
                "Preflight",
                Some(message),
            )
            .await;
            return Ok(Action::requeue(REQUEUE_SHORT));
        }
        info!(%name, "preflight checks passed");
        publish_event(
            &ctx,
            rhmi.as_ref(),
            EventType::Normal,
            "PreflightPassed",
            "Preflight",
            Some(message),
        )
        .await;
    }

    if rhmi.is_deleting() {
        return reconcile_uninstall(&rhmi, &ctx, &topology.uninstall).await;
    }

    let now = Utc::now();
    if rhmi.is_install_blocked(now) {
        warn!(%name, "installation has not completed within the expected time");
        publish_event(
            &ctx,
            rhmi.as_ref(),
            EventType::Warning,
            "InstallBlocked",
            "Reconcile",
            Some(format!("Stage {} has not completed", rhmi.status_or_default().stage)),
        )
        .await;
    }

    let bootstrap = Bootstrap::new(&ctx.client, &rhmi)
        .run(&platform, ctx.config.quota_env(), now)
        .await;
    let quota = bootstrap.quota.unwrap_or_default();
    let outcome = run_install_stages(
        &rhmi,
        &topology.install,
        bootstrap.stage,
        &ctx.registry,
        ctx.watches.as_ref(),
        &quota,
    )
    .await;

    ensure_product_finalizers(&api, &name, &outcome).await?;

    let status = rhmi.status_or_default();
    let tracks = advance_tracks(
        &status,
        desired_version(rhmi.spec.installation_type),
        bootstrap.quota_track,
        &outcome,
    );
    publish_commits(&ctx, &rhmi, &tracks, &quota).await;

    let mut last_error = outcome.last_error();
    if outcome.is_settled() && rhmi.spec.rebalance_pods {
        let errors = rebalance_pods(&ctx, &rhmi, &topology).await;
        if !errors.is_empty() {
            warn!(%name, %errors, "pod rebalance failed");
            if !last_error.is_empty() {
                last_error.push('\n');
            }
            last_error.push_str(&errors.to_string());
        }
    }

    write_status(&api, &rhmi, &outcome, &tracks, &last_error).await?;

    if status.stage != stage_name(&outcome) {
        publish_event(
            &ctx,
            rhmi.as_ref(),
            EventType::Normal,
            "StageChanged",
            "Reconcile",
            Some(format!(
                "Stage changed from {} to {}",
                status.stage,
                stage_name(&outcome)
            )),
        )
        .await;
    }

    if outcome.in_progress {
        Ok(Action::requeue(REQUEUE_SHORT))
    } else {
        Ok(Action::requeue(settled_requeue(rhmi.spec.installation_type)))
    }
}

fn error_policy(rhmi: Arc<Rhmi>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = rhmi.name_any();
    if error.is_not_found() && rhmi.is_deleting() {
        debug!(%name, "object already deleted, skipping requeue");
        return Action::await_change();
    }
    warn!(%name, %error, "reconcile error, requeuing in 30s");
    Action::requeue(Duration::from_secs(30))
}

// ── Install helpers ───────────────────────────────────────────────────────────

/// Add the finalizer of every product the pass attempted.  Works on a fresh
/// copy since bootstrap may have patched the spec.
async fn ensure_product_finalizers(
    api: &Api<Rhmi>,
    name: &str,
    outcome: &PipelineOutcome,
) -> Result<()> {
    if outcome.attempted.is_empty() {
        return Ok(());
    }
    let current = api.get(name).await?;
    let finalizers = outcome
        .attempted
        .iter()
        .fold(current.finalizers().to_vec(), |acc, p| {
            with_finalizer(&acc, &p.finalizer())
        });
    if finalizers.as_slice() != current.finalizers() {
        debug!(%name, ?finalizers, "adding product finalizers");
        patch_finalizers(api, &current, &finalizers).await?;
    }
    Ok(())
}

/// Version and quota tracks after one install pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PassTracks {
    pub version: DualTrack,
    /// `None` while the quota is not resolved yet; the status keeps
    /// whatever it last recorded.
    pub quota: Option<DualTrack>,
    pub committed_version: Option<String>,
    pub committed_quota: Option<String>,
}

/// Start the version track towards `desired_version` and commit both tracks
/// when the pass settled.
pub fn advance_tracks(
    status: &RhmiStatus,
    desired_version: &str,
    quota: Option<DualTrack>,
    outcome: &PipelineOutcome,
) -> PassTracks {
    let mut version = DualTrack::new(&status.version, &status.to_version);
    version.begin(desired_version, PendingPolicy::Keep);
    let mut quota = quota;

    let (committed_version, committed_quota) = if outcome.is_settled() {
        (
            version.commit().map(str::to_string),
            quota.as_mut().and_then(|q| q.commit().map(str::to_string)),
        )
    } else {
        (None, None)
    };

    PassTracks {
        version,
        quota,
        committed_version,
        committed_quota,
    }
}

impl PassTracks {
    /// `version`/`toVersion`, plus `quota`/`toQuota` when the quota was
    /// resolved on this pass.
    pub fn status_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("version".into(), json!(self.version.applied));
        fields.insert("toVersion".into(), json!(self.version.pending));
        if let Some(quota) = &self.quota {
            fields.insert("quota".into(), json!(quota.applied));
            fields.insert("toQuota".into(), json!(quota.pending));
        }
        fields
    }
}

async fn publish_commits(ctx: &Context, rhmi: &Rhmi, tracks: &PassTracks, quota: &Quota) {
    if let Some(committed) = &tracks.committed_version {
        info!(name = %rhmi.name_any(), version = %committed, "installation settled");
        publish_event(
            ctx,
            rhmi,
            EventType::Normal,
            "InstallationSettled",
            "Reconcile",
            Some(format!("Version {committed} installed")),
        )
        .await;
    }

    if let Some(committed) = &tracks.committed_quota {
        info!(name = %rhmi.name_any(), quota = %committed, updated = quota.is_updated(), "quota applied");
        publish_event(
            ctx,
            rhmi,
            EventType::Normal,
            "QuotaApplied",
            "Reconcile",
            Some(format!("Quota {committed} applied")),
        )
        .await;
    }
}

fn stage_name(outcome: &PipelineOutcome) -> String {
    if outcome.is_settled() {
        COMPLETE_STAGE.to_string()
    } else {
        outcome
            .current_stage()
            .map(|s| s.name.clone())
            .unwrap_or_default()
    }
}

async fn write_status(
    api: &Api<Rhmi>,
    rhmi: &Rhmi,
    outcome: &PipelineOutcome,
    tracks: &PassTracks,
    last_error: &str,
) -> Result<()> {
    let stage = stage_name(outcome);
    let phase = outcome
        .current_stage()
        .map(|s| s.phase)
        .unwrap_or_default();
    let generation = rhmi.metadata.generation.unwrap_or(0);

    let mut status = tracks.status_fields();
    status.insert("stages".into(), stage_statuses(&outcome.stages));
    status.insert("stage".into(), json!(stage));
    status.insert("lastError".into(), json!(last_error));
    status.insert(
        "conditions".into(),
        json!(stage_conditions(&stage, phase, outcome.is_settled(), generation)),
    );

    api.patch_status(
        &rhmi.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&json!({"status": status})),
    )
    .await?;
    Ok(())
}

/// Rebalance the zone spread of the quota-sized products this topology
/// installs.
async fn rebalance_pods(ctx: &Context, rhmi: &Rhmi, topology: &Topology) -> ErrorList {
    let mut errors = ErrorList::new();
    let mut namespaces = Vec::new();
    for product in topology
        .install_products()
        .filter(|p| REBALANCED_PRODUCTS.contains(p))
    {
        match ctx.registry.build(product, rhmi) {
            Ok(reconciler) => namespaces.push(reconciler.namespace()),
            Err(e) => errors.push(e.context(format!("pod rebalance for {product}"))),
        }
    }
    errors.merge(reconcile_pod_distribution(&ctx.client, &namespaces).await);
    errors
}

fn stage_statuses(stages: &[StageResult]) -> Value {
    let map: Map<String, Value> = stages
        .iter()
        .map(|s| (s.name.clone(), json!(s.to_status())))
        .collect();
    Value::Object(map)
}

// ── Uninstall ─────────────────────────────────────────────────────────────────

async fn reconcile_uninstall(
    rhmi: &Rhmi,
    ctx: &Context,
    stages: &[super::topology::StageSpec],
) -> Result<Action> {
    let name = rhmi.name_any();
    let api: Api<Rhmi> = Api::namespaced(ctx.client.clone(), &rhmi.namespace().unwrap_or_default());

    if rhmi.status_or_default().stage != DELETION_STAGE {
        publish_event(
            ctx,
            rhmi,
            EventType::Normal,
            "Uninstalling",
            "Finalize",
            Some("Removing installed products".to_string()),
        )
        .await;
    }

    let outcome = run_uninstall(&ctx.client, rhmi, &ctx.config, stages, &ctx.registry).await?;
    if outcome.completed {
        return Ok(Action::await_change());
    }

    let generation = rhmi.metadata.generation.unwrap_or(0);
    let patch = json!({
        "status": {
            "stage": DELETION_STAGE,
            "stages": stage_statuses(&outcome.pass.stages),
            "lastError": outcome.pass.errors(),
            "conditions": stage_conditions(DELETION_STAGE, StatusPhase::InProgress, false, generation),
        }
    });
    api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(Action::requeue(REQUEUE_SHORT))
}

// ── Alert address defaults ────────────────────────────────────────────────────

/// Spec fields to fill from the operator configuration and the
/// `notification-email` add-on parameter, or `None` when nothing changes.
pub fn alert_defaults_patch(
    spec: &RhmiSpec,
    config: &OperatorConfig,
    notification_email: Option<&str>,
) -> Option<Value> {
    let mut addresses = Map::new();
    if spec.alerting_email_addresses.cssre.is_empty() && !config.alerting_email_address.is_empty() {
        addresses.insert("cssre".into(), json!(config.alerting_email_address));
    }
    if spec.alerting_email_addresses.business_unit.is_empty()
        && !config.bu_alerting_email_address.is_empty()
    {
        addresses.insert("businessUnit".into(), json!(config.bu_alerting_email_address));
    }

    let mut spec_patch = Map::new();
    if !addresses.is_empty() {
        spec_patch.insert("alertingEmailAddresses".into(), Value::Object(addresses));
    }
    if let Some(email) = notification_email.filter(|e| !e.is_empty()) {
        if email != spec.alerting_email_address {
            spec_patch.insert("alertingEmailAddress".into(), json!(email));
        }
    }

    (!spec_patch.is_empty()).then(|| json!({"spec": spec_patch}))
}

/// Returns whether the spec was patched.  Failures are logged only.
async fn apply_alert_defaults(ctx: &Context, rhmi: &Rhmi) -> bool {
    let ns = rhmi.namespace().unwrap_or_default();
    let params = match AddonParameters::fetch(&ctx.client, &ns).await {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "failed to read add-on parameters for alerting addresses");
            AddonParameters::default()
        }
    };
    let Some(patch) = alert_defaults_patch(
        &rhmi.spec,
        &ctx.config,
        params.get(NOTIFICATION_EMAIL_PARAM),
    ) else {
        return false;
    };

    let api: Api<Rhmi> = Api::namespaced(ctx.client.clone(), &ns);
    match api
        .patch(&rhmi.name_any(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => {
            info!(name = %rhmi.name_any(), "alerting email addresses defaulted");
            true
        }
        Err(e) => {
            warn!(error = %e, "failed to default alerting email addresses");
            false
        }
    }
}

// ── Conditions ────────────────────────────────────────────────────────────────

/// Ready / Progressing conditions for UIs such as the OpenShift console.
pub fn stage_conditions(
    stage: &str,
    phase: StatusPhase,
    settled: bool,
    generation: i64,
) -> Vec<Condition> {
    let (reason, message) = if settled {
        ("InstallationComplete", "All stages completed".to_string())
    } else if stage == DELETION_STAGE {
        ("Uninstalling", "Removing installed products".to_string())
    } else if phase == StatusPhase::Failed {
        ("StageFailed", format!("Stage {stage} failed"))
    } else {
        ("StageInProgress", format!("Stage {stage} is {phase}"))
    };
    let progressing = !settled && phase != StatusPhase::Failed;
    let now = Time(Utc::now());

    vec![
        Condition {
            type_: "Ready".to_string(),
            status: if settled { "True" } else { "False" }.to_string(),
            reason: reason.to_string(),
            message: message.clone(),
            observed_generation: Some(generation),
            last_transition_time: now.clone(),
        },
        Condition {
            type_: "Progressing".to_string(),
            status: if progressing { "True" } else { "False" }.to_string(),
            reason: reason.to_string(),
            message,
            observed_generation: Some(generation),
            last_transition_time: now,
        },
    ]
}

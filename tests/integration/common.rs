//! Shared test harness and helpers for envtest-based integration tests.
//!
//! A single envtest server is shared across all tests in this binary.  Each
//! test gets its own Kubernetes namespace, used both as the operator's watch
//! namespace and as the namespace prefix of its products, so tests can run
//! in parallel.
//!
//! There is no kubelet, namespace controller or OpenShift API in envtest:
//! Deployment availability is faked by patching status subresources,
//! deleted namespaces stay Terminating, and every OpenShift kind reads as
//! absent.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use envtest::Environment;
use futures::channel::mpsc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::config::KubeConfigOptions;
use kube::runtime::events::Reporter;
use kube::{Client, Config, CustomResourceExt};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use integreatly_operator::controller::helpers::FIELD_MANAGER;
use integreatly_operator::controller::preflight::ALERT_SMTP_FROM_ENV;
use integreatly_operator::controller::quota::{ADDON_PARAMETERS_SECRET, QUOTA_PARAM};
use integreatly_operator::controller::rhmi::Context;
use integreatly_operator::controller::watches::DynamicWatches;
use integreatly_operator::crd::rhmi::Rhmi;
use integreatly_operator::crd::shared::InstallationType;
use integreatly_operator::helpers::OperatorConfig;
use integreatly_operator::products::ProductRegistry;

pub const TIMEOUT: Duration = Duration::from_secs(30);
pub const POLL: Duration = Duration::from_millis(500);

/// Counter for generating unique namespace names.
static NS_COUNTER: AtomicU32 = AtomicU32::new(0);

// ═══════════════════════════════════════════════════════════════════════════════
// Shared environment (one envtest server per test binary)
// ═══════════════════════════════════════════════════════════════════════════════

/// Holds the envtest server, a kube Client, and the tokio runtime that drives
/// controllers.  All three live for the entire process.
struct SharedEnv {
    client: Client,
    // The runtime keeps controller tasks and kube HTTP connections alive
    // across individual `#[tokio::test]` runtimes.
    runtime: tokio::runtime::Runtime,
    _server: envtest::Server,
}

// SAFETY: envtest::Server is just a String wrapper (kubeconfig), so Send+Sync.
unsafe impl Send for SharedEnv {}
unsafe impl Sync for SharedEnv {}

/// Singleton, initialised on first use, never torn down (process exit cleans up).
static SHARED: OnceLock<SharedEnv> = OnceLock::new();

fn init_shared() -> SharedEnv {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn,integreatly_operator=debug"))
        .try_init();

    // Preflight reads the process environment.
    std::env::set_var(ALERT_SMTP_FROM_ENV, "noreply@example.com");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build shared runtime");

    let (client, server) = rt.block_on(async {
        let mut env = Environment::default();
        let env = env
            .with_crds(vec![Rhmi::crd()])
            .expect("failed to configure CRDs");

        let server = env.create().expect("failed to start envtest server");
        let kubeconfig = server.kubeconfig().expect("failed to get kubeconfig");
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .expect("failed to build config");
        let client = Client::try_from(config).expect("failed to create client");
        (client, server)
    });

    SharedEnv {
        client,
        runtime: rt,
        _server: server,
    }
}

/// Get (or create) the shared envtest environment.
///
/// Initialization runs on a dedicated OS thread to avoid the "cannot start a
/// runtime from within a runtime" panic that would occur if `block_on` were
/// called from inside a `#[tokio::test]` context.
fn shared() -> &'static SharedEnv {
    SHARED.get_or_init(|| {
        std::thread::spawn(init_shared)
            .join()
            .expect("shared env init thread panicked")
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Per-test context
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-test context: owns a unique namespace and provides a kube Client.
pub struct TestContext {
    pub client: Client,
    pub ns: String,
}

impl TestContext {
    pub async fn new() -> Self {
        let env = shared();
        let client = env.client.clone();

        let id = NS_COUNTER.fetch_add(1, Ordering::SeqCst);
        let ns = format!("test-{id}");
        create_namespace(&client, &ns).await;

        Self { client, ns }
    }

    /// Namespace prefix for this test's products: `test-3-rhsso` and so on.
    pub fn prefix(&self) -> String {
        format!("{}-", self.ns)
    }

    pub fn config(&self) -> OperatorConfig {
        OperatorConfig {
            watch_namespace: self.ns.clone(),
            installation_type: InstallationType::ManagedApi,
            use_cluster_storage: "true".into(),
            alerting_email_address: "sre@example.com".into(),
            bu_alerting_email_address: "bu@example.com".into(),
            ..Default::default()
        }
    }

    /// Create the installation resource and return the persisted copy.
    pub async fn create_installation(&self, installation_type: InstallationType) -> Rhmi {
        let api: Api<Rhmi> = Api::namespaced(self.client.clone(), &self.ns);
        let rhmi: Rhmi = serde_json::from_value(json!({
            "apiVersion": "integreatly.org/v1alpha1",
            "kind": "RHMI",
            "metadata": { "name": "rhoam", "namespace": &self.ns },
            "spec": {
                "type": installation_type.as_str(),
                "namespacePrefix": self.prefix(),
                "useClusterStorage": "true",
                "priorityClassName": format!("{}-priority", self.ns),
                "pagerDutySecret": format!("{}pagerduty", self.prefix()),
                "deadMansSnitchSecret": format!("{}deadmanssnitch", self.prefix()),
                "smtpSecret": format!("{}smtp", self.prefix()),
                "alertingEmailAddresses": {
                    "businessUnit": "bu@example.com",
                    "cssre": "sre@example.com"
                }
            }
        }))
        .unwrap();
        api.create(&PostParams::default(), &rhmi)
            .await
            .expect("failed to create RHMI")
    }

    pub async fn installation(&self) -> Rhmi {
        let api: Api<Rhmi> = Api::namespaced(self.client.clone(), &self.ns);
        api.get("rhoam").await.expect("failed to read RHMI")
    }

    /// The alerting secrets preflight looks for.
    pub async fn create_alerting_secrets(&self) {
        for suffix in ["pagerduty", "deadmanssnitch"] {
            create_secret(&self.client, &self.ns, &format!("{}{suffix}", self.prefix()), json!({
                "serviceKey": "dummy"
            }))
            .await;
        }
    }

    pub async fn create_addon_parameters(&self, quota: &str) {
        create_secret(
            &self.client,
            &self.ns,
            ADDON_PARAMETERS_SECRET,
            json!({ QUOTA_PARAM: quota }),
        )
        .await;
    }

    /// Run a controller watching this test's namespace on the shared runtime.
    pub fn spawn_controller(&self) {
        let client = self.client.clone();
        let (trigger_tx, trigger_rx) = mpsc::unbounded();
        let ctx = Arc::new(Context {
            client: client.clone(),
            config: self.config(),
            registry: ProductRegistry::with_namespaced_products(client.clone()),
            watches: Arc::new(DynamicWatches::new(client, trigger_tx)),
            reporter: Reporter {
                controller: "integreatly-operator-test".into(),
                instance: None,
            },
        });
        shared().runtime.spawn(async move {
            integreatly_operator::controller::rhmi::run(ctx, trigger_rx).await;
        });
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn create_namespace(client: &Client, name: &str) {
    let ns_api: Api<Namespace> = Api::all(client.clone());
    let ns_obj: Namespace = serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": name }
    }))
    .unwrap();
    ns_api
        .create(&PostParams::default(), &ns_obj)
        .await
        .expect("failed to create namespace");
}

pub async fn create_secret(client: &Client, ns: &str, name: &str, string_data: serde_json::Value) {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), ns);
    let secret: Secret = serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": { "name": name, "namespace": ns },
        "stringData": string_data
    }))
    .unwrap();
    secrets
        .create(&PostParams::default(), &secret)
        .await
        .expect("failed to create secret");
}

/// Poll until a condition is true, or timeout.
pub async fn wait_for<F, Fut>(timeout: Duration, interval: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    loop {
        if check().await {
            return true;
        }
        if start.elapsed() > timeout {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}

/// Wait until the installation's status satisfies `check`.
pub async fn wait_for_status<F>(client: &Client, ns: &str, check: F) -> bool
where
    F: Fn(&Rhmi) -> bool,
{
    let api: Api<Rhmi> = Api::namespaced(client.clone(), ns);
    let check = &check;
    wait_for(TIMEOUT, POLL, move || {
        let api = api.clone();
        async move { api.get("rhoam").await.ok().is_some_and(|r| check(&r)) }
    })
    .await
}

/// Create a Deployment with a minimal pod template.
pub async fn create_deployment(client: &Client, ns: &str, name: &str, replicas: i32) {
    let deps: Api<Deployment> = Api::namespaced(client.clone(), ns);
    let dep: Deployment = serde_json::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": name, "namespace": ns },
        "spec": {
            "replicas": replicas,
            "selector": { "matchLabels": { "app": name } },
            "template": {
                "metadata": { "labels": { "app": name } },
                "spec": { "containers": [{ "name": "main", "image": "busybox" }] }
            }
        }
    }))
    .unwrap();
    deps.create(&PostParams::default(), &dep)
        .await
        .expect("failed to create deployment");
}

/// Patch a Deployment's status to report the Available condition.
pub async fn fake_deployment_available(client: &Client, ns: &str, name: &str) {
    let deps: Api<Deployment> = Api::namespaced(client.clone(), ns);
    let patch = json!({
        "status": {
            "conditions": [{
                "type": "Available",
                "status": "True",
                "reason": "MinimumReplicasAvailable",
                "message": "faked by test"
            }]
        }
    });
    deps.patch_status(
        name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await
    .expect("failed to patch deployment status");
}

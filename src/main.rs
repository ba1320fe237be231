//! integreatly-operator: installs a managed service onto the cluster as an
//! ordered pipeline of product stages driven from a single RHMI resource.

use std::sync::Arc;

use clap::Parser;
use futures::channel::mpsc;
use kube::runtime::events::Reporter;
use kube::Client;
use tracing::info;
use warp::Filter;

use integreatly_operator::controller;
use integreatly_operator::controller::watches::DynamicWatches;
use integreatly_operator::crd::shared::InstallationType;
use integreatly_operator::helpers::OperatorConfig;
use integreatly_operator::products::ProductRegistry;

#[derive(Parser, Debug)]
#[command(
    name = "integreatly-operator",
    about = "Kubernetes operator for staged managed-service installations"
)]
struct Args {
    /// Namespace holding the RHMI resource and the operator's secrets.
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: String,

    /// Installation type used when the operator creates the RHMI resource.
    #[arg(long, default_value = "managed-api", env = "INSTALLATION_TYPE")]
    installation_type: InstallationType,

    /// "true" to back products with in-cluster storage.
    #[arg(long, default_value = "true", env = "USE_CLUSTER_STORAGE")]
    use_cluster_storage: String,

    /// Pods are rebalanced across zones unless set to something other than "true".
    #[arg(long, env = "REBALANCE_PODS")]
    rebalance_pods: Option<String>,

    #[arg(long, default_value = "", env = "ALERTING_EMAIL_ADDRESS")]
    alerting_email_address: String,

    #[arg(long, default_value = "", env = "BU_ALERTING_EMAIL_ADDRESS")]
    bu_alerting_email_address: String,

    /// Priority class for product pods; managed-api defaults to rhoam-pod-priority.
    #[arg(long, default_value = "", env = "PRIORITY_CLASS_NAME")]
    priority_class_name: String,

    /// Overrides the `<prefix>installation-config` ConfigMap name.
    #[arg(long, default_value = "", env = "INSTALLATION_CONFIG_MAP")]
    installation_config_map: String,

    /// Quota parameter used once the add-on grace period has passed.
    #[arg(long, env = "QUOTA")]
    quota: Option<String>,

    /// Bind address for health probe endpoints (/healthz, /readyz).
    #[arg(long, default_value = ":8081", env = "HEALTH_PROBE_BIND_ADDRESS")]
    health_probe_bind_address: String,

    /// Log format: "text" for human-readable, "json" for structured.
    #[arg(long, default_value = "text", env = "LOG_FORMAT")]
    log_format: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,kube=warn,hyper=warn,tower=warn,warp=warn".into());

    if args.log_format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let client = Client::try_default().await?;

    let config = OperatorConfig {
        watch_namespace: args.watch_namespace,
        installation_type: args.installation_type,
        use_cluster_storage: args.use_cluster_storage,
        rebalance_pods: args.rebalance_pods,
        alerting_email_address: args.alerting_email_address,
        bu_alerting_email_address: args.bu_alerting_email_address,
        priority_class_name: args.priority_class_name,
        installation_config_map: args.installation_config_map,
        quota: args.quota,
    };

    info!(
        ns = %config.watch_namespace,
        installation_type = %config.installation_type,
        "starting integreatly-operator"
    );

    controller::rhmi::ensure_installation(&client, &config).await?;

    let (trigger_tx, trigger_rx) = mpsc::unbounded();
    let ctx = Arc::new(controller::rhmi::Context {
        client: client.clone(),
        registry: ProductRegistry::with_namespaced_products(client.clone()),
        watches: Arc::new(DynamicWatches::new(client.clone(), trigger_tx)),
        config,
        reporter: Reporter {
            controller: "integreatly-operator".into(),
            instance: std::env::var("POD_NAME").ok(),
        },
    });

    // Parse health probe bind address (e.g. ":8081" or "0.0.0.0:8081").
    let health_addr: std::net::SocketAddr = args
        .health_probe_bind_address
        .strip_prefix(':')
        .map(|port| format!("0.0.0.0:{port}"))
        .unwrap_or(args.health_probe_bind_address)
        .parse()?;

    let healthz = warp::get()
        .and(warp::path("healthz"))
        .and(warp::path::end())
        .map(|| warp::reply::with_status("ok", warp::http::StatusCode::OK));
    let readyz = warp::get()
        .and(warp::path("readyz"))
        .and(warp::path::end())
        .map(|| warp::reply::with_status("ok", warp::http::StatusCode::OK));
    let health_routes = healthz.or(readyz);

    // The controller stops on SIGTERM/SIGINT, which ends the select.
    tokio::select! {
        _ = controller::rhmi::run(ctx, trigger_rx) => {},
        _ = warp::serve(health_routes).run(health_addr) => {},
    }

    info!("integreatly-operator stopped");
    Ok(())
}

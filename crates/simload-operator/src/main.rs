//! sim-operator - control-plane load proportional to KWOK node count

mod leader_election;

use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};

use simload_common::crd::ScaleLoadConfig;
use simload_common::telemetry::{init_telemetry, TelemetryConfig};
use simload_common::FIELD_MANAGER;
use simload_controller::{error_policy, reconcile, Context};

use leader_election::{LeaderElector, LEADER_LEASE_NAME};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

/// sim-operator - scales namespaces, objects, events and node annotations
/// with the number of KWOK nodes in the cluster
#[derive(Parser, Debug)]
#[command(name = "sim-operator", version, about, long_about = None)]
struct Cli {
    /// Print the ScaleLoadConfig CRD manifest and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the ScaleLoadConfig controller (default mode)
    Controller(ControllerArgs),
}

#[derive(Parser, Debug, Clone)]
struct ControllerArgs {
    /// Install or update the CRD with server-side apply on startup
    #[arg(long, env = "SIMLOAD_INSTALL_CRDS", default_value_t = true, action = ArgAction::Set)]
    install_crds: bool,

    /// Campaign for a Lease and only reconcile while holding it
    #[arg(long, env = "SIMLOAD_LEADER_ELECT", default_value_t = false, action = ArgAction::Set)]
    leader_elect: bool,

    /// Namespace holding the leader Lease
    #[arg(long, env = "POD_NAMESPACE", default_value = "sim-operator-system")]
    lease_namespace: String,

    /// Holder identity for the leader Lease, defaults to the host name
    #[arg(long, env = "POD_NAME")]
    identity: Option<String>,

    /// Seed for all randomness, for repeatable runs
    #[arg(long, env = "SIMLOAD_SEED")]
    seed: Option<u64>,

    /// OTLP gRPC endpoint for spans and metrics
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,
}

impl ControllerArgs {
    fn identity(&self) -> String {
        self.identity
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "sim-operator".to_string())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&ScaleLoadConfig::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    let args = match cli.command {
        Some(Commands::Controller(args)) => args,
        None => ControllerArgs::parse_from(["sim-operator"]),
    };

    init_telemetry(TelemetryConfig {
        otlp_endpoint: args.otlp_endpoint.clone(),
        ..TelemetryConfig::default()
    })?;

    run_controller(args).await
}

/// Install the ScaleLoadConfig CRD so its schema always matches this build
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!("Installing ScaleLoadConfig CRD...");
    crds.patch(
        &ScaleLoadConfig::crd_name(),
        &params,
        &Patch::Apply(&ScaleLoadConfig::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install ScaleLoadConfig CRD: {}", e))?;

    Ok(())
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if args.install_crds {
        ensure_crd_installed(&client).await?;
    }

    if !args.leader_elect {
        start_controller(client, args.seed).await;
        return Ok(());
    }

    let identity = args.identity();
    let elector = Arc::new(LeaderElector::new(
        client.clone(),
        LEADER_LEASE_NAME,
        &args.lease_namespace,
        &identity,
    ));
    let mut guard = elector.acquire().await;

    let lost = tokio::select! {
        _ = start_controller(client, args.seed) => false,
        _ = guard.lost() => true,
    };
    if lost {
        return Err(anyhow::anyhow!(
            "leadership lost, exiting so a restart can re-campaign"
        ));
    }

    if let Err(e) = guard.release().await {
        tracing::warn!(error = %e, "Failed to release leader lease");
    }
    Ok(())
}

async fn start_controller(client: Client, seed: Option<u64>) {
    let ctx = Arc::new(Context::new(client.clone(), seed));
    let configs: Api<ScaleLoadConfig> = Api::all(client);

    tracing::info!(seed = ?seed, "Starting ScaleLoadConfig controller");

    Controller::new(configs, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| {
            match result {
                Ok(action) => tracing::debug!(?action, "ScaleLoadConfig reconciliation completed"),
                Err(e) => tracing::error!(error = ?e, "ScaleLoadConfig reconciliation error"),
            }
            std::future::ready(())
        })
        .await;

    tracing::info!("Controller stopped");
}

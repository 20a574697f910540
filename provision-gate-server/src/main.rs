// provision-gate-server/src/main.rs
// ============================================================================
// Module: Provision Gate Server Binary
// Description: Process entry point wiring config, store, runtime, listeners.
// Purpose: Run the public and engine listeners with graceful shutdown.
// Dependencies: clap, provision-gate-{config, core, opa, server, store-sqlite}
// ============================================================================

//! ## Overview
//! The server binary loads configuration, opens the policy store, builds the
//! rule-runtime client, and runs both HTTP listeners concurrently until
//! SIGINT or SIGTERM. Backend handles are constructed before the async
//! runtime starts so the blocking rule-runtime client never touches an
//! async context directly.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use provision_gate_config::ProvisionGateConfig;
use provision_gate_core::Evaluator;
use provision_gate_core::SharedPolicyStore;
use provision_gate_core::SharedRuleRuntime;
use provision_gate_opa::OpaClient;
use provision_gate_server::PolicyService;
use provision_gate_server::api;
use provision_gate_server::engine;
use provision_gate_server::serve;
use provision_gate_store_sqlite::SqlitePolicyStore;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: CLI
// ============================================================================

/// Provision Gate policy manager and evaluation engine.
#[derive(Debug, Parser)]
#[command(name = "provision-gate-server", version, about)]
struct Args {
    /// Path to the configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("provision-gate-server: {error}");
            ExitCode::FAILURE
        }
    }
}

/// Builds the backends and runs both listeners to completion.
fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = ProvisionGateConfig::load(args.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.service.log_level)?)
        .init();

    let store = SqlitePolicyStore::new(&config.store)?;
    let shared_store = SharedPolicyStore::from_store(store);
    let opa = Arc::new(OpaClient::new(&config.rule_runtime)?);
    let rule_runtime = SharedRuleRuntime::new(opa.clone());

    let policy_service = Arc::new(PolicyService::new(shared_store.clone(), opa));
    let evaluator = Arc::new(Evaluator::new(shared_store, rule_runtime));

    let public_addr: SocketAddr = config.service.bind.parse()?;
    let engine_addr: SocketAddr = config.service.engine_bind.parse()?;
    let public_router = api::router(policy_service);
    let engine_router = engine::router(evaluator);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        tokio::try_join!(
            serve(public_addr, public_router, shutdown_signal()),
            serve(engine_addr, engine_router, shutdown_signal()),
        )
    })?;

    tracing::info!("all servers stopped");
    Ok(())
}

/// Resolves when SIGINT or SIGTERM is received.
async fn shutdown_signal() {
    let interrupt = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
}

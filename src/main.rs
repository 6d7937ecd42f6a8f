//! Assay proxy entrypoint.
//!
//! Launches the intercepting JSON-RPC server in front of an upstream
//! endpoint. Send/sign requests are scanned (provider analysis + forked
//! simulation) and forwarded, blocked, or prompted per policy; everything
//! else passes through.
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `RUST_LOG` controls verbosity
//! - `ASSAY_CONFIG` / `ASSAY_CACHE_DIR` override config and cache locations

use clap::Parser;
use dotenvy::dotenv;
use std::io::IsTerminal;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use assay::config::AssayConfig;
use assay::findings::Recommendation;
use assay::policy::{RiskAction, RiskPolicy};
use assay::providers::AnalyzeMode;
use assay::proxy::{ProxyOptions, ProxyState, serve};
use assay::scan::AssayCore;
use assay::util::{SigDown, Telemetry};

/// CLI arguments for the assay proxy.
#[derive(Parser, Debug)]
#[command(name = "assay")]
#[command(about = "Pre-signing safety gate: intercepting JSON-RPC proxy for EVM transactions")]
struct CliArgs {
    /// Upstream JSON-RPC endpoint to forward approved requests to.
    #[arg(long, env = "ASSAY_UPSTREAM")]
    upstream: Url,

    /// Listen port on 127.0.0.1.
    #[arg(long, short, env = "ASSAY_PORT", default_value_t = 8545)]
    port: u16,

    /// Path to the JSON configuration file.
    #[arg(long, short, env = "ASSAY_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for per-entry recording bundles.
    #[arg(long, env = "ASSAY_RECORD_DIR")]
    record_dir: Option<PathBuf>,

    /// Shut down after the first intercepted send/sign entry.
    #[arg(long)]
    once: bool,

    /// Suppress rendered scan summaries in recordings.
    #[arg(long)]
    quiet: bool,

    /// Restrict HTTP to the configured RPC URLs; all non-RPC providers are
    /// skipped.
    #[arg(long)]
    offline: bool,

    /// Use the low-latency wallet profile (tight budgets, no caching).
    #[arg(long)]
    wallet: bool,

    /// Risk threshold at or above which the policy applies.
    #[arg(long, default_value = "caution")]
    threshold: String,

    /// What to do with risky entries: "block" or "prompt".
    #[arg(long, default_value = "prompt")]
    on_risk: String,

    /// Allow prompting even when the simulation failed.
    #[arg(long)]
    allow_prompt_when_simulation_fails: bool,
}

fn parse_threshold(raw: &str) -> Recommendation {
    match raw.to_ascii_lowercase().as_str() {
        "ok" => Recommendation::Ok,
        "warning" => Recommendation::Warning,
        "danger" => Recommendation::Danger,
        _ => Recommendation::Caution,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let _telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let args = CliArgs::parse();
    let config = AssayConfig::load(args.config.as_deref())?;
    let core = Arc::new(AssayCore::new(config, args.offline));

    let policy = RiskPolicy {
        threshold: parse_threshold(&args.threshold),
        on_risk: if args.on_risk.eq_ignore_ascii_case("block") {
            RiskAction::Block
        } else {
            RiskAction::Prompt
        },
        allow_prompt_when_simulation_fails: args.allow_prompt_when_simulation_fails,
    };
    let interactive = std::io::stdin().is_terminal() && std::io::stdout().is_terminal();

    let options = ProxyOptions {
        upstream: args.upstream,
        record_dir: args.record_dir,
        once: args.once,
        quiet: args.quiet,
        interactive,
        policy,
        mode: if args.wallet {
            AnalyzeMode::Wallet
        } else {
            AnalyzeMode::Default
        },
    };

    let sig_down = Arc::new(SigDown::try_new()?);
    let state = Arc::new(ProxyState::new(core, options, sig_down)?);

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), args.port);
    serve(state, addr).await?;
    Ok(())
}

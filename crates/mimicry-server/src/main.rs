use clap::Parser;
use tracing_subscriber::EnvFilter;

use mimicry_hunt::config::HuntConfig;
use mimicry_server::config::ServerConfig;
use mimicry_server::headless::{HeadlessOptions, run_headless};
use mimicry_server::session::SessionManager;

/// Authoritative server for Mimicry.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Run bots-only rounds without real-time pacing and print JSON results.
    #[arg(long)]
    headless: bool,
    /// Evader bots for a headless run.
    #[arg(long, default_value_t = 4)]
    evaders: usize,
    /// Pursuer bots for a headless run.
    #[arg(long, default_value_t = 1)]
    pursuers: usize,
    /// Overrides the configured round count.
    #[arg(long)]
    rounds: Option<u8>,
    /// Overrides the configured seed.
    #[arg(long)]
    seed: Option<u64>,
    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid server configuration");
            return std::process::ExitCode::FAILURE;
        },
    };
    if let Some(rounds) = cli.rounds {
        config.rounds.round_count = rounds;
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    let hunt = HuntConfig::load();

    if cli.headless {
        let options = HeadlessOptions {
            evaders: cli.evaders,
            pursuers: cli.pursuers,
            rounds: config.rounds.round_count,
            round_secs: config.rounds.round_duration_secs as f32,
            tick_rate_hz: config.tick_rate_hz,
            seed: config.seed,
        };
        let report = run_headless(&options, hunt);
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize report");
                return std::process::ExitCode::FAILURE;
            },
        }
        return std::process::ExitCode::SUCCESS;
    }

    tracing::info!(
        tick_rate = config.tick_rate_hz,
        rounds = config.rounds.round_count,
        "Mimicry server starting"
    );
    let bots = config.bots.clone();
    let mut session = SessionManager::new(config, hunt);
    for _ in 0..bots.evaders + bots.pursuers {
        if let Err(e) = session.add_bot() {
            tracing::warn!(error = %e, "Could not add bot");
            break;
        }
    }
    if let Err(e) = session.start() {
        tracing::error!(error = %e, "Session could not start");
        return std::process::ExitCode::FAILURE;
    }

    let interrupted = tokio::select! {
        _ = session.wait() => false,
        _ = tokio::signal::ctrl_c() => true,
    };
    if interrupted {
        tracing::info!("Shutting down");
        session.stop().await;
    } else {
        tracing::info!("Session finished");
    }
    std::process::ExitCode::SUCCESS
}

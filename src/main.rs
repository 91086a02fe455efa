use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use leadflow::config::{AppConfig, LoggingConfig, Profile};
use leadflow::pipeline::{WorkflowEngine, format_summary};
use leadflow::services::Services;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Process one batch and exit
    Single,
    /// Poll until Ctrl-C
    Monitor,
    /// Check configuration and connectivity
    Health,
}

#[derive(Parser, Debug)]
#[command(name = "leadflow", version, about = "Email inquiry to CRM lead automation")]
struct Cli {
    /// Run mode
    #[arg(long, value_enum, default_value_t = Mode::Monitor)]
    mode: Mode,

    /// Deployment profile
    #[arg(long = "env", value_enum, default_value_t = Profile::Development)]
    profile: Profile,
}

/// Console plus daily-rolling file logging. The returned guard flushes the
/// file writer on drop and must live until exit.
fn init_logging(config: &LoggingConfig) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));

    let _ = std::fs::create_dir_all(&config.log_dir);
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "workflow.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .try_init()
        .ok();

    guard
}

async fn run(cli: Cli, config: AppConfig) -> anyhow::Result<ExitCode> {
    let services = Services::from_config(&config).context("failed to build service clients")?;
    let mut engine = WorkflowEngine::new(config.workflow.clone(), services);

    match cli.mode {
        Mode::Single => match engine.run_single().await {
            Ok(results) => {
                print!("{}", format_summary(&results));
                if !results.is_empty() {
                    println!("\n{}", serde_json::to_string_pretty(&results)?);
                }
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                eprintln!("Error: {e}");
                Ok(ExitCode::FAILURE)
            }
        },
        Mode::Monitor => {
            engine.run_monitor().await?;
            Ok(ExitCode::SUCCESS)
        }
        Mode::Health => {
            let report = engine.health_check(config.validate()).await;
            print!("{report}");
            println!(
                "\nOverall: {}",
                if report.is_healthy() { "healthy" } else { "degraded" }
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match AppConfig::from_env(cli.profile) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("  Set the missing variable in the environment or in .env");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_logging(&config.logging);

    eprintln!("📬 Leadflow v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Profile: {}", config.profile);
    eprintln!("   Model:   {} ({:?})", config.llm.model, config.llm.backend);
    eprintln!("   Logs:    {}", config.logging.log_dir.display());

    match run(cli, config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{fmt, EnvFilter};

use sgas::aggregation::scheduler::UpdateScheduler;
use sgas::aggregation::store::SqlAggregationStore;
use sgas::authz::hostcheck::InsertionChecker;
use sgas::authz::types::{Action, CheckResponse};
use sgas::authz::{loader, Authorizer, RuleStoreHandle};
use sgas::settings::Settings;
use sgas::{host_scale, storage};

#[derive(Parser, Debug)]
#[command(name = "sgas", version, about = "Grid usage record accounting service")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "sgas.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the aggregation updater until SIGINT/SIGTERM (default)
    Run,
    /// Parse the rule file and report what it grants
    CheckRules,
    /// Evaluate one authorization request against the rule file
    Authorize {
        subject: String,
        action: Action,
        /// Context entries as key=value, repeatable
        #[arg(value_parser = parse_context_entry)]
        context: Vec<(String, String)>,
    },
}

fn parse_context_entry(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got `{s}`")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(settings).await,
        Command::CheckRules => {
            let store = loader::load_rules(&settings.authz.rules_file)?;
            println!(
                "{}: {} rules for {} subjects",
                settings.authz.rules_file.display(),
                store.rule_count,
                store.subject_count()
            );
            Ok(())
        }
        Command::Authorize {
            subject,
            action,
            context,
        } => {
            let store = loader::load_rules(&settings.authz.rules_file)?;
            let authorizer = Authorizer::new(
                Arc::new(RuleStoreHandle::new(store)),
                InsertionChecker::new(settings.authz.insert_check_depth),
            );
            let context: Vec<(&str, &str)> = context
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            let allowed = authorizer.is_allowed(&subject, action, &context);
            let response = CheckResponse {
                subject,
                action,
                allowed,
            };
            println!("{}", serde_json::to_string(&response).into_diagnostic()?);
            Ok(())
        }
    }
}

async fn run(settings: Settings) -> Result<()> {
    // rules are required; a bad file stops startup
    let store = loader::load_rules(&settings.authz.rules_file)?;
    let rules = Arc::new(RuleStoreHandle::new(store));
    let authorizer = Arc::new(Authorizer::new(
        rules.clone(),
        InsertionChecker::new(settings.authz.insert_check_depth),
    ));
    tracing::debug!(
        depth = settings.authz.insert_check_depth,
        "Authorizer ready"
    );

    // init storage (database)
    let db = storage::init(&settings.database).await?;
    host_scale::sync_scale_factors(&db, &settings.scale_factors()).await;

    let scheduler = UpdateScheduler::start(
        Arc::new(SqlAggregationStore::new(db)),
        settings.scheduler_config(),
    );

    let reload_path = settings.authz.rules_file.clone();
    let reload_rules = authorizer.rules().clone();
    let reloader = tokio::spawn(async move { reload_on_hangup(reload_rules, reload_path).await });

    shutdown_signal().await;
    tracing::info!("Shutdown requested, stopping aggregation updater");
    reloader.abort();

    scheduler.stop().await?;
    tracing::info!("Aggregation updater stopped");
    Ok(())
}

#[cfg(unix)]
async fn reload_on_hangup(rules: Arc<RuleStoreHandle>, path: std::path::PathBuf) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "SIGHUP handler unavailable, rule reload disabled");
            return;
        }
    };
    while hangup.recv().await.is_some() {
        // errors are logged by reload; the previous rules stay active
        let _ = rules.reload(&path);
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(_rules: Arc<RuleStoreHandle>, _path: std::path::PathBuf) {
    std::future::pending::<()>().await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

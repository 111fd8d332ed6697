//! CLI parsing and command execution
//!
//! This module handles command-line argument parsing and routes commands to the appropriate handlers.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::audit;
use crate::backends::{GcpApiKeysClient, GcpSecretManagerClient};
use crate::config::Config;
use crate::gateway::ResourceGateway;
use crate::ledger;
use crate::notify::{self, WebhookNotifier};
use crate::report;
use crate::rotation::{self, Outcome};
use crate::staleness;

#[derive(Parser)]
#[command(name = "akr")]
#[command(about = "Rotate API keys stored in Google Secret Manager", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "AKR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Project id (overrides config file)
    #[arg(long, env = "GCP_PROJECT")]
    pub project: Option<String>,

    /// OAuth access token (overrides config file)
    #[arg(long, env = "GCP_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Emit internal diagnostic trace
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a sample configuration file
    Init {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "akr-config.toml")]
        output: PathBuf,
    },

    /// Rotate every key whose secret version is older than the threshold
    Rotate {
        /// Age in days after which a secret is rotated (overrides config)
        #[arg(short, long)]
        threshold_days: Option<u32>,

        /// Dry run - simulate every change instead of making it
        #[arg(long)]
        dry_run: bool,

        /// Write a CSV report of the run
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Show which secrets are due for rotation without changing anything
    Scan {
        /// Age in days after which a secret is due (overrides config)
        #[arg(short, long)]
        threshold_days: Option<u32>,
    },

    /// Check every secret for more than one enabled version
    Audit {
        /// Write a CSV report of the findings
        #[arg(long)]
        report: Option<PathBuf>,

        /// Also list keys that no secret references
        #[arg(long)]
        credentials: bool,
    },

    /// Find the secret that holds a key
    Lookup {
        /// Key id to search for
        credential_id: String,
    },

    /// List secrets in the project
    List {
        /// Maximum number of secrets to show
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

/// Execute a CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    // Handle init command separately as it doesn't need a gateway
    if let Commands::Init { output } = cli.command {
        Config::create_sample(&output)
            .with_context(|| format!("Failed to create sample config at {:?}", output))?;
        println!("Sample configuration created at {:?}", output);
        return Ok(());
    }

    // Load configuration
    let mut config = if let Some(config_path) = cli.config {
        Config::from_file(&config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        Config::from_env().context("Failed to load config from environment")?
    };

    // Override with CLI arguments if provided
    if let Some(project) = cli.project {
        config.project = project;
    }
    if let Some(token) = cli.access_token {
        config.gcp.access_token = token;
    }
    config.validate()?;

    let gateway = create_gateway(&config)?;

    match cli.command {
        Commands::Init { .. } => unreachable!(), // Handled above

        Commands::Rotate {
            threshold_days,
            dry_run,
            report: report_path,
        } => {
            let threshold = threshold_days.unwrap_or(config.rotation.expiry_threshold_days);
            let gateway = gateway.with_dry_run(dry_run);

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, stopping after the current secret");
                    on_interrupt.cancel();
                }
            });

            let report = rotation::rotate_secrets(&gateway, threshold, &cancel)
                .await
                .context("Failed to enumerate secrets")?;

            for outcome in &report.outcomes {
                match outcome.outcome {
                    Outcome::Rotated(_) => println!("✓ {}", outcome),
                    Outcome::NotDue { .. } => println!("  {}", outcome),
                    Outcome::Skipped(_) => eprintln!("✗ {}", outcome),
                }
            }
            println!(
                "\n{}Rotated {} of {} secret(s)",
                if dry_run { "[DRY RUN] " } else { "" },
                report.rotated_count(),
                report.outcomes.len()
            );

            if let Some(path) = report_path {
                report::save_rotation(&path, &report)?;
                println!("Report written to {:?}", path);
            }

            if let Some(ref notify_config) = config.notify {
                let notifier = WebhookNotifier::new(notify_config)?;
                let subject = format!(
                    "{}API key rotation for {}: {} rotated",
                    if dry_run { "[DRY RUN] " } else { "" },
                    config.project,
                    report.rotated_count()
                );
                notify::notify_quietly(&notifier, &subject, &report.summary()).await;
            }
        }

        Commands::Scan { threshold_days } => {
            let threshold = threshold_days.unwrap_or(config.rotation.expiry_threshold_days);
            let secrets = gateway
                .list_secrets(None)
                .await
                .context("Failed to enumerate secrets")?;

            let now = Utc::now();
            let mut due = Vec::new();
            for secret in &secrets {
                match staleness::check_staleness(&gateway, &secret.name, threshold, now).await {
                    Ok(check) if check.stale => due.push((secret.name.clone(), check)),
                    Ok(_) => {}
                    Err(e) => eprintln!("✗ {}: {} ({})", secret.name, e.kind(), e),
                }
            }

            if due.is_empty() {
                println!("No secrets need rotation at this time");
            } else {
                println!("Secrets older than {} day(s):", threshold);
                for (name, check) in due {
                    println!(
                        "  - {} (version {}, {} day(s) old)",
                        name,
                        check.version.id,
                        check.age_days()
                    );
                }
            }
        }

        Commands::Audit {
            report: report_path,
            credentials,
        } => {
            let findings = audit::audit_secrets(&gateway)
                .await
                .context("Failed to enumerate secrets")?;

            for finding in &findings {
                println!(
                    "{}: {} (enabled: {}, latest enabled: {}, reason: {})",
                    finding.secret,
                    finding.status.label(),
                    finding.enabled_versions.join("/"),
                    finding.latest_enabled,
                    finding.status.reason_code()
                );
            }
            let violations = findings.iter().filter(|f| f.is_violation()).count();
            println!("\n{} of {} secret(s) in violation", violations, findings.len());

            if let Some(path) = report_path {
                report::save_audit(&path, &findings)?;
                println!("Report written to {:?}", path);
            }

            if credentials {
                let orphans = audit::unreferenced_credentials(&gateway)
                    .await
                    .context("Failed to list keys")?;
                if orphans.is_empty() {
                    println!("Every key is referenced by a secret");
                } else {
                    println!("Keys not referenced by any secret:");
                    for key in orphans {
                        println!("  - {} ({})", key.id, key.display_name);
                    }
                }
            }
        }

        Commands::Lookup { credential_id } => {
            match ledger::find_secret_by_credential(&gateway, &credential_id)
                .await
                .context("Failed to search secrets")?
            {
                Some(secret) => println!("Key uid: {}\n Secret: {}", credential_id, secret.name),
                None => println!("No secret references key {}", credential_id),
            }
        }

        Commands::List { limit } => {
            let secrets = gateway
                .list_secrets(limit)
                .await
                .context("Failed to list secrets")?;
            if secrets.is_empty() {
                println!("No secrets found in project {}", config.project);
            } else {
                println!("Secrets in {}:", config.project);
                for secret in secrets {
                    let created = secret
                        .created_at
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!("  - {} (created {})", secret.name, created);
                }
            }
        }
    }

    Ok(())
}

/// Create the gateway over the Google clients described by the configuration
fn create_gateway(config: &Config) -> Result<ResourceGateway> {
    let store = GcpSecretManagerClient::new(
        config.gcp.secret_manager_url.clone(),
        config.project.clone(),
        config.gcp.access_token.clone(),
        config.gcp.timeout_seconds,
    )
    .context("Failed to create Secret Manager client")?;

    let issuer = GcpApiKeysClient::new(
        config.gcp.api_keys_url.clone(),
        config.project.clone(),
        config.gcp.access_token.clone(),
        config.gcp.timeout_seconds,
    )
    .context("Failed to create API Keys client")?;

    Ok(ResourceGateway::new(Arc::new(store), Arc::new(issuer)))
}

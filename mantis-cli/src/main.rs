//! Mantis CLI
//!
//! The execution core of the Mantis IaC automation tool. Runs a batch of
//! jobs (parsed from configuration by the embedding driver) against their
//! projects: dependency-ordered, policy-gated, locked around state-touching
//! operations, reported back to the PR and the central backend.
//!
//! Architecture:
//! - Configuration: environment settings read once at startup
//! - Capabilities: IaC executor, plan store, lock store, reporter, policy
//!   checker, PR service, backend client — each a trait with
//!   interchangeable variants
//! - Pipeline: the sequential batch loop driving jobs to completion

mod config;
mod drift;
mod execution;
mod iac;
mod locking;
#[cfg(test)]
mod mocks;
mod pipeline;
mod policy;
mod pr;
mod reporting;
mod storage;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mantis_client::{BackendApi, HttpBackendApi, NoopBackendApi};
use mantis_core::domain::ci::CiKind;
use mantis_core::domain::graph::DependencyGraph;
use mantis_core::domain::job::Job;

use crate::config::{Config, PlanStoreKind};
use crate::drift::{DriftNotifier, WebhookNotifier};
use crate::locking::{LockProvider, MemoryLockProvider, PostgresLockProvider};
use crate::pipeline::{default_iac_factory, merge_pull_request, JobRunner, RunOptions};
use crate::policy::{AllowAllPolicyChecker, PolicyChecker, RuleBasedPolicyChecker};
use crate::pr::{DryRunPrService, PrService};
use crate::reporting::{CiReporter, Reporter, StdOutReporter};
use crate::storage::{BucketPlanStore, LocalPlanStore, PlanStore, PlanUploader, RestPlanStore};

#[derive(Parser)]
#[command(name = "mantis")]
#[command(about = "Mantis IaC automation pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a batch of jobs produced by the configuration parser
    Run {
        /// Path to the batch spec (jobs + dependency graph) as JSON
        #[arg(long)]
        jobs_file: PathBuf,

        /// Directory containing the project checkouts
        #[arg(long, default_value = ".")]
        working_dir: PathBuf,

        /// Batch identifier at the backend; generated when omitted
        #[arg(long, env = "MANTIS_JOB_ID")]
        job_id: Option<String>,

        /// Report the terminal batch status to the backend
        #[arg(long)]
        report_final_status: bool,

        /// Include terraform output in the final backend report
        #[arg(long)]
        report_terraform_output: bool,

        /// Aggregate PR comment to rewrite with batch results
        #[arg(long)]
        pr_comment_id: Option<String>,
    },
    /// Merge a pull request once its batch has fully applied
    Merge {
        #[arg(long)]
        pr: u64,
    },
}

/// Batch description produced by the configuration parser.
#[derive(Deserialize)]
struct BatchSpec {
    jobs: Vec<Job>,
    /// project -> projects it depends on
    #[serde(default)]
    dependencies: std::collections::HashMap<String, Vec<String>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mantis=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            jobs_file,
            working_dir,
            job_id,
            report_final_status,
            report_terraform_output,
            pr_comment_id,
        } => {
            run_batch(
                jobs_file,
                working_dir,
                job_id,
                report_final_status,
                report_terraform_output,
                pr_comment_id,
            )
            .await
        }
        Commands::Merge { pr } => merge_pull_request(&DryRunPrService, pr).await,
    }
}

async fn run_batch(
    jobs_file: PathBuf,
    working_dir: PathBuf,
    job_id: Option<String>,
    report_final_status: bool,
    report_terraform_output: bool,
    pr_comment_id: Option<String>,
) -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    let ci = CiKind::detect();
    info!("Starting Mantis (ci: {:?})", ci);

    let batch = read_batch_spec(&jobs_file)?;
    info!("Loaded {} job(s) from {}", batch.jobs.len(), jobs_file.display());

    let mut graph = DependencyGraph::new();
    for (project, depends_on) in &batch.dependencies {
        graph.add_project(project);
        for dependency in depends_on {
            graph.add_dependency(project, dependency);
        }
    }

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("Failed to build HTTP client")?;

    // TODO: wire the real PR platform client for the detected CI once the
    // platform crates land; until then PR actions run in dry-run mode.
    let pr_service: Arc<dyn PrService> = Arc::new(DryRunPrService);

    let pr_number = batch.jobs.iter().find_map(|job| job.pull_request_number);
    let reporter: Arc<dyn Reporter> = match (ci, pr_number) {
        (CiKind::None, _) | (_, None) => Arc::new(StdOutReporter),
        (_, Some(pr)) => Arc::new(CiReporter::new(pr_service.clone(), pr)),
    };

    let lock_provider: Arc<dyn LockProvider> = match &config.database_url {
        Some(url) => Arc::new(
            PostgresLockProvider::connect(url, config.lock_ttl)
                .await
                .context("Failed to connect to the lock store")?,
        ),
        None => Arc::new(MemoryLockProvider::new(config.lock_ttl)),
    };

    let plan_store: Arc<dyn PlanStore> = match &config.plan_store {
        PlanStoreKind::Local { dir } => Arc::new(LocalPlanStore::new(dir.clone())),
        PlanStoreKind::Bucket { url } => {
            Arc::new(BucketPlanStore::new(url.clone(), http.clone()))
        }
        PlanStoreKind::Rest {
            endpoint,
            method,
            pr_url,
        } => Arc::new(RestPlanStore::new(
            endpoint.clone(),
            method.clone(),
            pr_url.clone(),
            http.clone(),
        )),
    };

    let backend: Arc<dyn BackendApi> = match &config.backend_url {
        Some(url) => Arc::new(HttpBackendApi::with_client(
            url.clone(),
            config.organisation.clone(),
            http.clone(),
        )),
        None => Arc::new(NoopBackendApi),
    };

    let policy: Arc<dyn PolicyChecker> = if config.policy_rules.is_empty() {
        Arc::new(AllowAllPolicyChecker)
    } else {
        Arc::new(RuleBasedPolicyChecker::new(config.policy_rules.clone()))
    };

    let drift_notifier: Option<Arc<dyn DriftNotifier>> = config
        .drift_webhook_url
        .as_ref()
        .map(|url| Arc::new(WebhookNotifier::new(url.clone(), http.clone())) as Arc<dyn DriftNotifier>);

    let plan_uploader = config
        .plan_upload
        .as_ref()
        .map(|u| PlanUploader::new(u.endpoint.clone(), u.method.clone(), http.clone()));

    // A first interrupt stops the batch at the next command boundary; the
    // command in flight (and its IaC child) is left to finish.
    let cancelled = Arc::new(std::sync::atomic::AtomicBool::new(false));
    {
        let cancelled = cancelled.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, stopping after the current command");
                cancelled.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        });
    }

    let runner = JobRunner {
        pr_service,
        policy,
        lock_provider,
        reporter,
        plan_store,
        backend,
        drift_notifier,
        plan_uploader,
        iac_factory: default_iac_factory(),
        cancelled,
        opts: RunOptions {
            job_id: job_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            report_final_status_to_backend: report_final_status,
            report_terraform_output,
            pr_comment_id,
            working_dir,
            iac_timeout: config.iac_timeout,
        },
    };

    let outcome = runner.run_jobs(batch.jobs, &graph).await?;

    if outcome.all_applies_success {
        println!("{}", "All project commands succeeded".green().bold());
        Ok(())
    } else {
        println!("{}", "Some project commands failed".red().bold());
        std::process::exit(1);
    }
}

fn read_batch_spec(path: &PathBuf) -> Result<BatchSpec> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read jobs file {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse jobs file {}", path.display()))
}

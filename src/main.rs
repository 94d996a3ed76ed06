use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use jobmaster_lite::cluster::{ClusterView, Member};
use jobmaster_lite::config::{CoordinatorConfig, JobConfig};
use jobmaster_lite::job::{JobSummary, ProcessingGuarantee, TerminationMode};
use jobmaster_lite::repository::{InMemoryJobRepository, JobRepository};
use jobmaster_lite::shutdown::{chain_shutdown, install_shutdown_handler};
use jobmaster_lite::sim::{LocalCluster, LocalEngine};
use jobmaster_lite::JobCoordinationService;

#[derive(Parser, Debug)]
#[command(name = "jobmaster-lite")]
#[command(version)]
#[command(about = "Master-side job coordination for a distributed stream processing cluster")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a short scripted scenario on a simulated cluster and print the job summary
    Demo(DemoArgs),

    /// Run the coordinator on a simulated cluster until interrupted
    Run(RunArgs),
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct DemoArgs {
    /// Number of data members in the simulated cluster
    #[arg(long, default_value = "3")]
    members: usize,

    /// Number of jobs to submit
    #[arg(long, default_value = "4")]
    jobs: usize,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Number of data members in the simulated cluster
    #[arg(long, default_value = "3")]
    members: usize,

    /// Number of jobs to submit, one per second
    #[arg(long, default_value = "10")]
    jobs: usize,

    /// Period of the job scan in milliseconds
    #[arg(long, default_value = "5000")]
    scan_period_ms: u64,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobListOutput {
    jobs: Vec<JobSummary>,
    total_count: usize,
}

// =============================================================================
// Helper Functions
// =============================================================================

struct SimulatedCluster {
    service: JobCoordinationService,
    cluster: Arc<LocalCluster>,
    engine: LocalEngine,
    repository: Arc<InMemoryJobRepository>,
}

fn start_simulation(
    members: usize,
    config: CoordinatorConfig,
    engine: LocalEngine,
) -> SimulatedCluster {
    let (cluster, members) = LocalCluster::with_data_members(members);
    let cluster = Arc::new(cluster);
    let repository = Arc::new(InMemoryJobRepository::new());

    tracing::info!(
        members = members.len(),
        master = %members[0].uuid,
        scan_period_ms = config.scan_period.as_millis() as u64,
        "Starting simulated cluster"
    );

    let service = JobCoordinationService::new(
        config,
        repository.clone(),
        cluster.clone(),
        Arc::new(engine.clone()),
    );
    service.start_scanning();

    SimulatedCluster {
        service,
        cluster,
        engine,
        repository,
    }
}

async fn wait_for_initial_scan(service: &JobCoordinationService) {
    while !service.jobs_scanned() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn demo_job_config(index: usize) -> JobConfig {
    let config = JobConfig::named(format!("pipeline-{}", index));
    match index % 3 {
        0 => config,
        1 => config
            .with_processing_guarantee(ProcessingGuarantee::AtLeastOnce)
            .with_snapshot_interval_ms(200),
        _ => config.with_split_brain_protection(true),
    }
}

fn print_summaries(
    summaries: Vec<JobSummary>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match output_format {
        OutputFormat::Json => {
            let output = JobListOutput {
                total_count: summaries.len(),
                jobs: summaries,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            if summaries.is_empty() {
                println!("No jobs found.");
                return Ok(());
            }
            println!(
                "{:<21} {:<14} {:<12} {:<10} FAILURE",
                "JOB ID", "NAME", "STATUS", "EXECUTION"
            );
            println!("{}", "-".repeat(78));
            for job in &summaries {
                let execution = job
                    .execution_id
                    .map(|id| id.value().to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<21} {:<14} {:<12} {:<10} {}",
                    job.job_id.to_string(),
                    job.name,
                    job.status.to_string(),
                    execution,
                    job.failure_text.as_deref().unwrap_or("-")
                );
            }
            println!();
            println!("Total: {} jobs", summaries.len());
        }
    }
    Ok(())
}

// =============================================================================
// Command Implementations
// =============================================================================

async fn run_demo(args: DemoArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = CoordinatorConfig::default()
        .with_scan_period(Duration::from_millis(100))
        .with_retry_delay(Duration::from_millis(100))
        .with_scale_up_delay(Duration::from_millis(300));
    let engine = LocalEngine::new().with_auto_complete(Duration::from_millis(1500));
    let sim = start_simulation(args.members, config, engine);
    wait_for_initial_scan(&sim.service).await;

    let mut job_ids = Vec::with_capacity(args.jobs);
    for index in 0..args.jobs {
        let job_id = sim.repository.new_job_id();
        sim.service
            .submit_job(job_id, vec![index as u8], demo_job_config(index))
            .await?;
        job_ids.push(job_id);
    }

    // a late joiner triggers a scale-up restart of the running jobs
    tokio::time::sleep(Duration::from_millis(200)).await;
    let joiner = Member::data(format!("127.0.0.1:{}", 5701 + args.members));
    sim.cluster.add_member(joiner.clone());
    sim.service.on_member_added(&joiner).await;

    if let Some(first) = job_ids.first() {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Err(e) = sim
            .service
            .terminate_job(*first, TerminationMode::CancelForceful)
            .await
        {
            tracing::warn!(job_id = %first, error = %e, "Could not cancel job");
        }
    }

    for job_id in &job_ids {
        let completion = sim.service.join_submitted_job(*job_id).await?;
        let outcome = completion.wait().await;
        tracing::info!(job_id = %job_id, success = outcome.is_ok(), "Job finished");
    }

    tracing::info!(
        data_members = sim.cluster.data_members().len(),
        still_running = sim.engine.running_count(),
        "Demo finished"
    );
    let summaries = sim.service.get_job_summary_list().await?;
    sim.service.shutdown();
    print_summaries(summaries, &args.output)
}

async fn run_forever(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config =
        CoordinatorConfig::default().with_scan_period(Duration::from_millis(args.scan_period_ms));
    let engine = LocalEngine::new().with_auto_complete(Duration::from_secs(5));
    let sim = start_simulation(args.members, config, engine);

    let service = sim.service.clone();
    let shutdown = chain_shutdown(install_shutdown_handler(), move || service.shutdown());

    wait_for_initial_scan(&sim.service).await;
    let mut submitted = 0usize;
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!(submitted, "Coordinator stopped");
                break;
            }
            _ = ticker.tick() => {
                if submitted < args.jobs {
                    let job_id = sim.repository.new_job_id();
                    match sim
                        .service
                        .submit_job(job_id, Vec::new(), demo_job_config(submitted))
                        .await
                    {
                        Ok(()) => submitted += 1,
                        Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Job submission failed"),
                    }
                }
                match sim.service.get_job_summary_list().await {
                    Ok(summaries) => {
                        let running = summaries
                            .iter()
                            .filter(|s| !s.status.is_terminal())
                            .count();
                        tracing::info!(total = summaries.len(), running, "Job status");
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to list jobs"),
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match args.command {
        Commands::Demo(demo_args) => run_demo(demo_args).await?,
        Commands::Run(run_args) => run_forever(run_args).await?,
    }

    Ok(())
}

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use insight_orchestrator::app_state::AppState;
use insight_orchestrator::config::AppConfig;
use insight_orchestrator::models::dataset::DatasetId;
use insight_orchestrator::models::query::{FastResult, NarrativeState};
use insight_orchestrator::models::upload::{LocalFile, UploadEvent, UploadOutcome, UploadTask};

#[derive(Parser)]
#[command(name = "insight", version, about = "Upload datasets and ask questions about them")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a tabular file and register it as a dataset
    Upload {
        file: PathBuf,

        /// Ask this question once the dataset is registered
        #[arg(long)]
        ask: Option<String>,
    },
    /// Ask a question against a registered dataset
    Ask {
        #[arg(long)]
        dataset: String,

        question: String,
    },
    /// Follow a backend job until it finishes
    Job { job_id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize structured logging; stdout is reserved for command output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");
    tracing::info!(api_base_url = %config.api_base_url, "Initializing insight client");

    // Register application metrics
    metrics::describe_counter!("ingestion_uploads_total", "Upload runs by outcome");
    metrics::describe_histogram!("ingestion_upload_seconds", "Wall time of one upload run");
    metrics::describe_counter!("job_polls_total", "Job status checks issued");
    metrics::describe_counter!("query_executions_total", "Fast query results by outcome");
    metrics::describe_counter!("narratives_total", "Narrative results by outcome");

    // Initialize backend and storage clients
    let state = AppState::from_config(&config).expect("Failed to initialize clients");

    match cli.command {
        Command::Upload { file, ask } => upload(&state, file, ask).await,
        Command::Ask { dataset, question } => match DatasetId::new(dataset) {
            Ok(dataset_id) => ask(&state, &dataset_id, &question).await,
            Err(e) => {
                eprintln!("{e}");
                ExitCode::FAILURE
            }
        },
        Command::Job { job_id } => follow_job(&state, &job_id).await,
    }
}

async fn upload(state: &AppState, path: PathBuf, question: Option<String>) -> ExitCode {
    let file = match LocalFile::from_path(&path).await {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Cannot read {}: {e}", path.display());
            return ExitCode::FAILURE;
        }
    };

    let pipeline = state.ingestion();
    let (tx, mut rx) = mpsc::unbounded_channel::<UploadEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            println!("{}", event.state);
        }
    });

    let mut task = UploadTask::new(file);
    let outcome = pipeline.run(&state.session, &mut task, Some(&tx)).await;
    drop(tx);
    if let Err(e) = printer.await {
        tracing::warn!(error = %e, "Progress printer stopped early");
    }

    match outcome {
        Ok(UploadOutcome::Succeeded(dataset_id)) => {
            println!("dataset_id: {dataset_id}");
            match question {
                Some(question) => ask(state, &dataset_id, &question).await,
                None => ExitCode::SUCCESS,
            }
        }
        Ok(UploadOutcome::Failed(e)) => {
            eprintln!("Upload failed: {e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn ask(state: &AppState, dataset_id: &DatasetId, question: &str) -> ExitCode {
    let orchestrator = state.orchestrator();
    let submission = match orchestrator.submit(&state.session, dataset_id, question).await {
        Ok(submission) => submission,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match &submission.fast {
        FastResult::Ready(result) => match serde_json::to_string_pretty(result) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Cannot render result: {e}"),
        },
        FastResult::Failed(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
        FastResult::Pending => {}
    }

    println!("Generating narrative...");
    if let Some(narrative) = submission.narrative {
        if let Err(e) = narrative.await {
            tracing::warn!(error = %e, "Narrative task did not finish");
        }
    }

    // The chart already printed; a narrative failure does not fail the run.
    match orchestrator.current().map(|execution| execution.narrative) {
        Some(NarrativeState::Ready(text)) => println!("\n{text}"),
        Some(NarrativeState::Failed(e)) => eprintln!("{e}"),
        _ => {}
    }
    ExitCode::SUCCESS
}

async fn follow_job(state: &AppState, job_id: &str) -> ExitCode {
    let mut watcher = state.job_poller().watch(state.session.clone());
    if let Err(e) = watcher.set_job(Some(job_id)) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    let mut updates = watcher.subscribe();
    loop {
        let view = updates.borrow_and_update().clone();
        println!("{}", view.snapshot().status);
        if view.snapshot().status.is_terminal() {
            if let Some(data) = &view.snapshot().data {
                println!("{data}");
            }
            if let Some(error) = &view.snapshot().error {
                eprintln!("{error}");
                return ExitCode::FAILURE;
            }
            return ExitCode::SUCCESS;
        }
        if updates.changed().await.is_err() {
            return ExitCode::FAILURE;
        }
    }
}

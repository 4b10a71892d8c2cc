mod cli;
mod ui;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use pageforge::model::{
    Audience, Job, JobItem, JobKind, ModelProfile, Project, SizeClass,
};
use pageforge::services::memory::{MemoryLedger, MemoryStore, StubClassifier, StubSynthesizer};
use pageforge::services::scenes::KeywordScenePlanner;
use pageforge::services::store::RecordStore;
use pageforge::{JobOrchestrator, PipelineConfig, PipelineServices, trigger_generation_job};

use cli::{Cli, Command};
use ui::Reporter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Command::Demo {
            pages,
            audience,
            idea,
        } => {
            let config = PipelineConfig::load()?;
            run_demo(config, pages, audience.into(), &idea).await
        }
        Command::Check { file } => run_check(&file),
    }
}

fn run_check(file: &str) -> Result<()> {
    let bytes = std::fs::read(file)?;
    let report = pageforge::quality::check(&bytes)?;
    Reporter::new().print_quality_report(&report);
    Ok(())
}

/// Wire the pipeline to in-memory collaborators and run one job.
async fn run_demo(config: PipelineConfig, pages: u32, audience: Audience, idea: &str) -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(MemoryLedger::new());

    let owner = Uuid::new_v4();
    let project = Project {
        id: Uuid::new_v4(),
        owner_id: owner,
        audience,
        size_class: SizeClass::Standard,
        model: ModelProfile::Fast,
        hero_id: None,
        style_anchor: None,
    };
    let job = Job::new(
        owner,
        project.id,
        JobKind::Generation,
        pages,
        serde_json::json!({ "idea": idea, "page_count": pages }),
    );
    let job_id = job.id;

    store.insert_project(project);
    for _ in 0..pages {
        store.insert_item(JobItem::new(job_id, Uuid::new_v4()));
    }
    store.insert_job(job);
    ledger.reserve(job_id, pages);

    let services = PipelineServices {
        store: store.clone(),
        objects: store.clone(),
        ledger: ledger.clone(),
        synthesizer: Arc::new(StubSynthesizer::new()),
        scenes: Arc::new(KeywordScenePlanner),
        classifier: Arc::new(StubClassifier),
    };
    let orchestrator = Arc::new(JobOrchestrator::new(services, config));

    // Fire and forget; the demo then waits on the handle so it can print
    // the settled result.
    let handle = trigger_generation_job(orchestrator, job_id);
    handle.await?;

    let job = store
        .job(job_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("job vanished"))?;
    let items = store.items(job_id).await?;
    Reporter::new().print_job_summary(&job, &items, ledger.refund_for(job_id));
    Ok(())
}

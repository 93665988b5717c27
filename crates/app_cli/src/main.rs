use std::sync::Arc;
use std::time::Duration;
use std::{fs, path::Path, path::PathBuf};

use agent_registry::AgentRegistry;
use anyhow::{Context, Result};
use config::{AppConfig, ConfigStore};
use core_distributor::{
    ApprovalGate, Distributor, GatewayRunner, RetryPolicy, RunControl, TaskExecutor,
    project_outcome,
};
use core_types::{
    CreateDocumentInput, CreateProjectInput, InputType, ProjectStatus, TaskStatus, TaskType,
    UpdateProjectInput,
};
use storage_sqlite::SqliteStorage;
use tool_gateway::{
    BrowserProvider, FetchProvider, FilesystemProvider, OcrProvider, PdfExtractProvider,
    ProviderGateway,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    let mut data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
    data_dir.push("simplidoc");
    if let Err(err) = fs::create_dir_all(&data_dir) {
        eprintln!("failed to prepare data dir: {err}");
    }
    let _log_guard = init_local_logger(&data_dir.join("logs"));

    let config_store = ConfigStore::from_dir(data_dir.join("config"));
    let config = match config_store.load_or_init() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to load config: {err}");
            AppConfig::default()
        }
    };

    let input_source = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://example.com/manual".to_string());

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to create tokio runtime: {err}");
            return;
        }
    };

    if let Err(err) = runtime.block_on(run(&data_dir, config, input_source)) {
        error!("conversion run failed: {err:#}");
        eprintln!("conversion run failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run(data_dir: &Path, config: AppConfig, input_source: String) -> Result<()> {
    let storage = SqliteStorage::connect(data_dir.join("simplidoc.db"))
        .await
        .context("failed to open storage")?;

    let registry = Arc::new(AgentRegistry::from_entries(config.agents.clone()));
    let gateway = Arc::new(build_gateway(data_dir, &config)?);
    let retry = RetryPolicy::new(
        config.retry.max_retries,
        Duration::from_millis(config.retry.base_delay_ms),
        Duration::from_millis(config.retry.max_delay_ms),
    );

    let project = storage
        .create_project(CreateProjectInput {
            name: format!("conversion of {input_source}"),
            description: None,
            input_type: InputType::Url,
            input_source,
            settings: Some(config.conversion.clone()),
        })
        .await?;
    info!(project_id = %project.id, source = %project.input_source, "project created");

    let required = [
        TaskType::WebScraping,
        TaskType::ContentAnalysis,
        TaskType::DataStorage,
    ];
    let distribution = Distributor::new(Arc::clone(&registry), retry).plan(&project, &required)?;
    info!(project_id = %project.id, tasks = distribution.total_tasks, "distribution planned");

    storage
        .update_project(
            project.id,
            UpdateProjectInput {
                status: Some(ProjectStatus::Processing),
                ..Default::default()
            },
        )
        .await?;

    let runner = Arc::new(GatewayRunner::new(gateway));
    let executor = TaskExecutor::new(registry, runner, retry);
    let done = executor
        .execute(distribution, ApprovalGate::new(), RunControl::new())
        .await?;
    info!(
        project_id = %project.id,
        completed = done.completed_tasks,
        failed = done.failed_tasks,
        "distribution finished"
    );

    let outcome = project_outcome(&done);
    if outcome == ProjectStatus::Completed {
        let scraped = done
            .tasks
            .iter()
            .find(|t| t.task_type == TaskType::WebScraping && t.status == TaskStatus::Completed)
            .and_then(|t| t.output.as_ref())
            .map(|output| serde_json::to_string_pretty(output).unwrap_or_default())
            .unwrap_or_default();
        let document = storage
            .create_document(CreateDocumentInput {
                project_id: project.id,
                title: project.name.clone(),
                description: None,
                original_content: scraped,
            })
            .await?;
        info!(document_id = %document.id, hash = %document.content_hash, "document stored");
    }

    let error_message = done
        .tasks
        .iter()
        .find_map(|t| (t.status == TaskStatus::Failed).then(|| t.error.clone()).flatten());
    let final_project = storage
        .update_project(
            project.id,
            UpdateProjectInput {
                status: Some(outcome),
                error_message,
                ..Default::default()
            },
        )
        .await?;
    println!(
        "project {} finished with status `{}`",
        final_project.id, final_project.status
    );
    Ok(())
}

fn build_gateway(data_dir: &Path, config: &AppConfig) -> Result<ProviderGateway> {
    let workspace: PathBuf = config
        .gateway
        .workspace_dir
        .clone()
        .unwrap_or_else(|| data_dir.join("workspace"));
    fs::create_dir_all(&workspace)
        .with_context(|| format!("failed to create {}", workspace.display()))?;

    Ok(
        ProviderGateway::new(Duration::from_millis(config.gateway.call_timeout_ms))
            .with_provider(Arc::new(BrowserProvider::new(&config.gateway.browser_url)))
            .with_provider(Arc::new(FetchProvider::new()))
            .with_provider(Arc::new(FilesystemProvider::new(workspace)))
            .with_provider(Arc::new(PdfExtractProvider::new(
                &config.gateway.pdf_extractor_url,
            )))
            .with_provider(Arc::new(OcrProvider::new(&config.gateway.ocr_url))),
    )
}

fn init_local_logger(log_dir: &Path) -> tracing_appender::non_blocking::WorkerGuard {
    if let Err(err) = fs::create_dir_all(log_dir) {
        eprintln!("failed to create log dir `{}`: {err}", log_dir.display());
    }
    let file_appender = tracing_appender::rolling::daily(log_dir, "simplidoc.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,app_cli=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_writer(writer)
        .init();

    guard
}

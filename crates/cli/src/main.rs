//! `flowgraph` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`    start the API server.
//! - `migrate`  run pending database migrations.
//! - `validate` validate a workflow JSON file.
//! - `import`   validate a workflow JSON file and store it.
//! - `run`      execute a workflow JSON file in memory.
//! - `tick`     run every scheduled workflow due this minute.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use db::pool::{create_pool, run_migrations, PoolConfig};
use db::{MemoryStore, PgStore, PrimitiveStore, WorkflowStore};
use engine::{validate_definition, EngineConfig, TriggerRequest, WorkflowDefinition, WorkflowEngine};
use primitives::{builtin, HandlerRegistry, PrimitiveAdapter};

#[derive(Parser)]
#[command(name = "flowgraph", about = "Node-graph workflow automation engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server.
    Serve {
        #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
        bind: String,
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
        /// Environment variables primitives may read, comma separated.
        #[arg(long = "env-allow", env = "PRIMITIVE_ENV_ALLOW", value_delimiter = ',')]
        env_allow: Vec<String>,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Validate a workflow definition file and insert it into the database.
    Import {
        path: PathBuf,
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Execute a workflow definition file against an in-memory store.
    Run {
        path: PathBuf,
        /// Trigger payload as a JSON document.
        #[arg(long)]
        payload: Option<String>,
        #[arg(long = "env-allow", env = "PRIMITIVE_ENV_ALLOW", value_delimiter = ',')]
        env_allow: Vec<String>,
    },
    /// Run scheduled workflows whose cron pattern matches the current minute.
    Tick {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind, database_url, env_allow } => {
            let store = Arc::new(PgStore::new(create_pool(&PoolConfig::new(database_url)).await?));
            let config = EngineConfig { env_allow_list: env_allow, ..EngineConfig::default() };
            let engine = build_engine(store.clone(), store, config);

            info!("Starting API server on {bind}");
            api::serve(&bind, api::AppState::new(Arc::new(engine))).await?;
        }
        Command::Migrate { database_url } => {
            let pool = create_pool(&PoolConfig::new(database_url).with_max_connections(2)).await?;
            run_migrations(&pool).await?;
            info!("Migrations applied successfully");
        }
        Command::Validate { path } => {
            let workflow = read_definition(&path)?;
            match validate_definition(&workflow) {
                Ok(order) => println!("Workflow is valid. Execution order: {order:?}"),
                Err(e) => bail!("validation failed: {e}"),
            }
        }
        Command::Import { path, database_url } => {
            let workflow = read_definition(&path)?;
            validate_definition(&workflow).context("refusing to import an invalid workflow")?;

            let pool = create_pool(&PoolConfig::new(database_url).with_max_connections(2)).await?;
            let row = db::repository::workflows::create_workflow(&pool, &workflow.to_row()?).await?;
            println!("imported {} ({}) as /{}", row.name, row.id, row.slug);
        }
        Command::Run { path, payload, env_allow } => {
            let workflow = read_definition(&path)?;
            let payload: Value = match payload {
                Some(raw) => serde_json::from_str(&raw).context("--payload is not valid JSON")?,
                None => Value::Object(Default::default()),
            };

            let store = Arc::new(MemoryStore::new());
            for row in builtin::builtin_rows() {
                store.put_primitive(row);
            }
            store.put_workflow(workflow.to_row()?);

            let config = EngineConfig { env_allow_list: env_allow, ..EngineConfig::default() };
            let engine = build_engine(store.clone(), store, config);
            let request = TriggerRequest::new(workflow.trigger.kind(), payload);
            let outcome = engine.execute_workflow(workflow.id, request).await?;

            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.succeeded() {
                std::process::exit(1);
            }
        }
        Command::Tick { database_url } => {
            let store = Arc::new(PgStore::new(create_pool(&PoolConfig::new(database_url)).await?));
            let engine = build_engine(store.clone(), store, EngineConfig::default());

            let outcomes = engine.run_due_schedules(chrono::Utc::now()).await?;
            info!(count = outcomes.len(), "scheduled workflows run");
            for outcome in &outcomes {
                println!("{} {} {}", outcome.workflow_id, outcome.execution_id, outcome.status);
            }
        }
    }

    Ok(())
}

fn build_engine(
    workflows: Arc<dyn WorkflowStore>,
    primitives: Arc<dyn PrimitiveStore>,
    config: EngineConfig,
) -> WorkflowEngine {
    let mut registry = HandlerRegistry::new();
    builtin::register_builtins(&mut registry);
    let adapter = PrimitiveAdapter::new(primitives, registry, config.adapter_config());
    WorkflowEngine::new(workflows, Arc::new(adapter), config)
}

fn read_definition(path: &Path) -> anyhow::Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    let mut workflow: WorkflowDefinition =
        serde_json::from_str(&content).with_context(|| format!("invalid workflow JSON in {}", path.display()))?;
    if workflow.slug.is_empty() {
        workflow.slug = engine::models::slugify(&workflow.name);
    }
    Ok(workflow)
}

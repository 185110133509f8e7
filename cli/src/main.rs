//! Trellis CLI - serve a data root or call a running server.
//!
//! ```text
//! trellis serve                      load <data_root>, listen, answer requests
//! trellis workflow <entity> <name>   run a workflow on a running server
//! trellis task <service> <task>      run a shared service task on a running server
//! trellis list                       print what <data_root> defines
//! ```

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context as _, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use trellis_config::{
    DATA_ROOT_ENV, TrellisConfig, build_orchestrator, load_definitions, resolve_data_root,
};
use trellis_engine::builtin::stock_registry;
use trellis_engine::{Orchestrator, TaskRegistry};
use trellis_rpc::{Client, Router, Server};
use trellis_types::{Context, Request, Response};

#[derive(Debug, Parser)]
#[command(name = "trellis")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding settings.toml and the definitions.
    #[arg(long, global = true, env = DATA_ROOT_ENV)]
    data_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load the data root and answer requests until interrupted.
    Serve(Endpoint),
    /// Run a workflow of an entity on a running server.
    Workflow {
        entity: String,
        workflow: String,
        #[command(flatten)]
        call: CallArgs,
        /// Step option exposed to the workflow as `workflow.options`.
        #[arg(long = "option", value_name = "KEY=VALUE", value_parser = parse_option)]
        options: Vec<(String, Value)>,
    },
    /// Run a task of a shared service on a running server.
    Task {
        service: String,
        task: String,
        #[command(flatten)]
        call: CallArgs,
    },
    /// Print the entities, workflows and shared services of the data root.
    List,
}

#[derive(Debug, Clone, Default, Args)]
struct Endpoint {
    /// Address to bind or connect to (default from settings.toml).
    #[arg(long)]
    address: Option<String>,
    /// Port to bind or connect to (default from settings.toml).
    #[arg(long)]
    port: Option<u16>,
}

impl Endpoint {
    fn resolve(&self, address: &str, port: u16) -> String {
        format!(
            "{}:{}",
            self.address.as_deref().unwrap_or(address),
            self.port.unwrap_or(port)
        )
    }
}

#[derive(Debug, Clone, Args)]
struct CallArgs {
    #[command(flatten)]
    endpoint: Endpoint,
    /// Initial context as a JSON object.
    #[arg(long, value_parser = parse_ctx)]
    ctx: Option<Context>,
}

fn parse_ctx(raw: &str) -> Result<Context, String> {
    serde_json::from_str::<Map<String, Value>>(raw)
        .map(Context::from)
        .map_err(|e| format!("--ctx must be a JSON object: {e}"))
}

/// `key=value`; the value is JSON when it parses, a plain string otherwise.
fn parse_option(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    if key.is_empty() {
        return Err("option key must not be empty".to_string());
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn init_tracing(data_root: &Path, mode: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let log_path = data_root.join("logs").join(format!("{mode}.log"));
    match open_log_file(&log_path) {
        Ok(file) => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .with(env_filter)
                .init();
            tracing::info!(path = %log_path.display(), "Logging initialized");
        }
        Err(e) => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(env_filter)
                .init();
            tracing::warn!("Failed to open log file {}: {e:#}", log_path.display());
        }
    }
}

fn open_log_file(path: &Path) -> Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating log dir {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))
}

fn load(data_root: &Path, config: &TrellisConfig) -> Result<(TaskRegistry, Orchestrator)> {
    let registry = stock_registry(data_root)?;
    let orchestrator = build_orchestrator(data_root, &config.settings, &registry)
        .with_context(|| format!("loading definitions from {}", data_root.display()))?;
    Ok((registry, orchestrator))
}

async fn serve(data_root: PathBuf, config: TrellisConfig, endpoint: &Endpoint) -> Result<()> {
    let (registry, orchestrator) = load(&data_root, &config)?;

    let mut router: Router =
        Router::new(orchestrator).with_max_transactions(config.server.max_transactions);
    if config.server.reload_on_error {
        let settings = config.settings.clone();
        router = router.reload_on_error(Box::new(move |orchestrator| {
            let fresh = TrellisConfig::load(&data_root)
                .map(|c| c.settings)
                .unwrap_or_else(|e| {
                    tracing::warn!("Keeping previous settings: {e}");
                    settings.clone()
                });
            load_definitions(&data_root, &fresh, &registry)?.reload_into(orchestrator)?;
            Ok(())
        }));
    }

    let addr = endpoint.resolve(&config.server.address, config.server.port);
    let server = Server::bind(addr.as_str(), router)
        .await
        .with_context(|| format!("binding {addr}"))?;
    let handle = server.handle();
    let serving = tokio::spawn(server.serve());

    tokio::signal::ctrl_c()
        .await
        .context("waiting for interrupt")?;
    tracing::info!("Interrupted, stopping server");
    handle.stop();
    serving.await.context("server task panicked")?
}

async fn call(config: &TrellisConfig, endpoint: &Endpoint, request: Request) -> Result<Response> {
    let addr = endpoint.resolve(&config.client.address, config.client.port);
    let mut client: Client = Client::connect(addr.as_str(), config.client.request_timeout())
        .await
        .with_context(|| format!("connecting to {addr}"))?;
    let response = client.send(request).await;
    client.stop().await;
    response
}

fn print_response(response: &Response) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(if response.has_errors() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn list(data_root: &Path, config: &TrellisConfig) -> Result<()> {
    let (_, orchestrator) = load(data_root, config)?;
    if orchestrator.entities().next().is_none() && orchestrator.shared().is_empty() {
        bail!("nothing defined under {}", data_root.display());
    }

    for entity in orchestrator.entities() {
        println!("entity {}", entity.name());
        for workflow in entity.workflows() {
            println!("  workflow {}: {}", workflow.name(), workflow.stages().join(" -> "));
        }
        for (service, tasks) in entity.services().service_items() {
            println!("  service {service}: {}", tasks.join(", "));
        }
    }
    for (service, tasks) in orchestrator.shared().service_items() {
        println!("shared {service}: {}", tasks.join(", "));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let data_root = resolve_data_root(cli.data_root.as_deref());

    let mode = match &cli.command {
        Commands::Serve(_) => "server",
        Commands::Workflow { .. } | Commands::Task { .. } | Commands::List => "client",
    };
    init_tracing(&data_root, mode);

    let config = TrellisConfig::load(&data_root)?;

    match cli.command {
        Commands::Serve(endpoint) => {
            serve(data_root, config, &endpoint).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Workflow {
            entity,
            workflow,
            call: args,
            options,
        } => {
            let mut request =
                Request::workflow(entity, workflow).with_ctx(args.ctx.unwrap_or_default());
            for (key, value) in options {
                request.set_option(key, value);
            }
            print_response(&call(&config, &args.endpoint, request).await?)
        }
        Commands::Task {
            service,
            task,
            call: args,
        } => {
            let request = Request::task(service, task).with_ctx(args.ctx.unwrap_or_default());
            print_response(&call(&config, &args.endpoint, request).await?)
        }
        Commands::List => {
            list(&data_root, &config)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

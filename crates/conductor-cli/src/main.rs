mod resolver;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use conductor_core::{
    load_flow, load_global, ConductorError, ConfigError, GlobalConfig, TraceEntry,
};
use conductor_runtime::{
    register_builtins, render_mermaid, summary_json, CallableRegistry, FlowEngine, RemoteLogSink,
};
use tracing_subscriber::EnvFilter;

use resolver::ResourceResolver;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "Execute conductor flows defined in configuration files", version)]
struct Cli {
    /// Logging filter, e.g. `info` or `conductor_runtime=debug`
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a flow
    Run {
        /// Flow definition: path, URL, or alias:// reference (JSON/YAML/TOML)
        #[arg(long)]
        flow: String,

        /// Global configuration: path, URL, or alias:// reference
        #[arg(long)]
        global_config: Option<String>,

        /// Inline JSON seed payload for the start nodes
        #[arg(long, conflicts_with = "payload_file")]
        payload: Option<String>,

        /// File containing the JSON seed payload
        #[arg(long)]
        payload_file: Option<String>,

        /// Write the trace as a JSON array to this path
        #[arg(long)]
        trace_file: Option<PathBuf>,

        /// Print the shared state snapshot after the run
        #[arg(long)]
        print_state: bool,

        /// Print the full trace after the run
        #[arg(long)]
        print_trace: bool,

        /// Do not print the terminal outputs
        #[arg(long)]
        no_print_results: bool,
    },

    /// Render a flow (and optionally a recorded trace) as a Mermaid diagram
    Diagram {
        /// Flow definition: path, URL, or alias:// reference
        #[arg(long)]
        flow: String,

        /// Global configuration used for resolving alias:// references
        #[arg(long)]
        global_config: Option<String>,

        /// Trace file written by a previous `run --trace-file`
        #[arg(long)]
        trace_file: Option<PathBuf>,

        /// Annotate nodes with run counts, statuses, and previews
        #[arg(long)]
        include_metadata: bool,

        /// Also print per-node aggregates as JSON
        #[arg(long)]
        print_summary: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match cli.command {
        Commands::Run {
            flow,
            global_config,
            payload,
            payload_file,
            trace_file,
            print_state,
            print_trace,
            no_print_results,
        } => {
            run_command(RunArgs {
                flow,
                global_config,
                payload,
                payload_file,
                trace_file,
                print_state,
                print_trace,
                print_results: !no_print_results,
            })
            .await
        }
        Commands::Diagram {
            flow,
            global_config,
            trace_file,
            include_metadata,
            print_summary,
        } => diagram_command(flow, global_config, trace_file, include_metadata, print_summary).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(exit_code_for(&error))
        }
    }
}

/// Configuration and resolution problems exit 2; anything else is an
/// engine-internal failure and exits 1. Node-level `error` statuses do not
/// fail the process.
fn exit_code_for(error: &anyhow::Error) -> u8 {
    let config_error = error.downcast_ref::<ConfigError>().is_some()
        || matches!(
            error.downcast_ref::<ConductorError>(),
            Some(ConductorError::Config(_))
        );
    if config_error {
        2
    } else {
        1
    }
}

struct RunArgs {
    flow: String,
    global_config: Option<String>,
    payload: Option<String>,
    payload_file: Option<String>,
    trace_file: Option<PathBuf>,
    print_state: bool,
    print_trace: bool,
    print_results: bool,
}

/// Load the global config through a bootstrap resolver (paths and URLs
/// only), then build the full resolver so flow and payload references can
/// use the configured aliases.
async fn load_setup(reference: Option<&str>) -> Result<(GlobalConfig, ResourceResolver)> {
    let config = match reference {
        Some(reference) => {
            let bootstrap = ResourceResolver::new(GlobalConfig::default())?;
            let path = bootstrap.resolve(reference).await?;
            load_global(&path)?
        }
        None => GlobalConfig::default(),
    };
    let resolver = ResourceResolver::new(config.clone())?;
    Ok((config, resolver))
}

async fn run_command(args: RunArgs) -> Result<()> {
    let (config, resolver) = load_setup(args.global_config.as_deref()).await?;

    let flow_path = resolver.resolve(&args.flow).await?;
    let flow = load_flow(&flow_path)?;

    let seed = match (&args.payload, &args.payload_file) {
        (Some(inline), _) => serde_json::from_str(inline).context("invalid --payload JSON")?,
        (None, Some(reference)) => {
            let path = resolver.resolve(reference).await?;
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read payload file '{}'", path.display()))?;
            serde_json::from_str(&text).context("invalid payload file JSON")?
        }
        (None, None) => serde_json::Value::Null,
    };

    if !config.dependencies.is_empty() {
        // Runtime dependency installation belongs to the container
        // entrypoint, not this binary.
        tracing::debug!(
            count = config.dependencies.len(),
            "configured dependencies are handled by the container entrypoint"
        );
    }

    let mut registry = CallableRegistry::new();
    register_builtins(&mut registry);

    let sink = config
        .remote_logging
        .as_ref()
        .and_then(RemoteLogSink::spawn);
    let mut engine = FlowEngine::new(flow, config, registry);
    if let Some(sink) = sink {
        engine = engine.with_remote_sink(sink);
    }

    let result = engine.run(seed).await?;

    if args.print_results {
        println!("{}", serde_json::to_string_pretty(&result.terminal_outputs)?);
    }
    if args.print_state {
        println!("{}", serde_json::to_string_pretty(&result.shared_state)?);
    }
    if args.print_trace {
        println!("{}", serde_json::to_string_pretty(&result.trace)?);
    }
    if let Some(path) = args.trace_file {
        let text = serde_json::to_string_pretty(&result.trace)?;
        std::fs::write(&path, text)
            .with_context(|| format!("failed to write trace file '{}'", path.display()))?;
        tracing::info!(path = %path.display(), entries = result.trace.len(), "trace written");
    }

    Ok(())
}

async fn diagram_command(
    flow: String,
    global_config: Option<String>,
    trace_file: Option<PathBuf>,
    include_metadata: bool,
    print_summary: bool,
) -> Result<()> {
    let (_config, resolver) = load_setup(global_config.as_deref()).await?;
    let flow_path = resolver.resolve(&flow).await?;
    let flow = load_flow(&flow_path)?;

    let trace: Option<Vec<TraceEntry>> = match trace_file {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read trace file '{}'", path.display()))?;
            Some(serde_json::from_str(&text).context("invalid trace file")?)
        }
        None => None,
    };

    println!("{}", render_mermaid(&flow, trace.as_deref(), include_metadata));
    if print_summary {
        let entries = trace.unwrap_or_default();
        println!("{}", serde_json::to_string_pretty(&summary_json(&entries))?);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_map_to_exit_code_2() {
        let error = anyhow::Error::new(ConfigError::UnknownStartNode("ghost".to_string()));
        assert_eq!(exit_code_for(&error), 2);

        let error = anyhow::Error::new(ConductorError::Config(ConfigError::InvalidFlow(
            "bad".to_string(),
        )));
        assert_eq!(exit_code_for(&error), 2);
    }

    #[test]
    fn other_errors_map_to_exit_code_1() {
        let error = anyhow::anyhow!("engine exploded");
        assert_eq!(exit_code_for(&error), 1);
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

//! `steward` entry point.
//!
//! Exit codes: 0 on success, 1 on user errors (parse, compile, deploy,
//! package), 2 on internal errors.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use steward_core::{CompileError, EngineError, HandlerRegistry};
use steward_dsl::Compiler;
use steward_engine::{Deployer, Exporter};
use steward_pkg::{read_project, PackageStore, ProjectSettings};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

const EXIT_USER_ERROR: u8 = 1;
const EXIT_INTERNAL_ERROR: u8 = 2;

#[derive(Parser)]
#[command(name = "steward", version = VERSION, about = "Desired-state configuration engine")]
struct Cli {
    /// Verbosity of the log output.
    #[arg(long, global = true, value_enum, default_value = "info")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Compile a model and print the resulting object graph.
    Compile {
        /// Path to the entrypoint file.
        file: PathBuf,
    },
    /// Compile a model, then drive every resource to its declared state.
    Deploy {
        /// Path to the entrypoint file.
        file: PathBuf,
        /// Preview what would change without touching anything.
        #[arg(long)]
        dry_run: bool,
        /// Log a progress line as each task completes.
        #[arg(long)]
        log_progress: bool,
    },
    /// Build, install or remove packages.
    Package {
        #[command(subcommand)]
        command: PackageCommand,
    },
}

#[derive(Subcommand)]
enum PackageCommand {
    /// Build a distributable archive from the current directory.
    Build,
    /// Install a package from a local archive, http(s) URL or git URL.
    Install { spec: String },
    /// Remove an installed package.
    Uninstall { name: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(cli.log_level.as_filter()))
        .with_target(false)
        .init();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(exit) => ExitCode::from(exit),
    }
}

async fn run(command: Command) -> Result<(), u8> {
    match command {
        Command::Compile { file } => {
            let (compiled, _) = compile(&file)?;
            let graph = compiled.model.printable();
            match serde_json::to_string_pretty(&graph) {
                Ok(rendered) => println!("{rendered}"),
                Err(error) => {
                    tracing::error!("failed to render the object graph: {error}");
                    return Err(EXIT_INTERNAL_ERROR);
                }
            }
            Ok(())
        }
        Command::Deploy {
            file,
            dry_run,
            log_progress,
        } => {
            let (compiled, settings) = compile(&file)?;
            let model = Arc::new(compiled.model);

            // Handlers are contributed by the host embedding the engine;
            // the plain CLI deploys data-only models.
            let registry = HandlerRegistry::new();
            let graph = Exporter::new(&model, &registry)
                .export()
                .map_err(engine_exit)?;

            let deployer = Deployer::new();
            if dry_run || settings.dry_run {
                tracing::info!("Running dry run.");
                deployer.dry_run(&model, &graph).await.map_err(engine_exit)?;
                return Ok(());
            }

            let report = deployer
                .deploy(&model, &graph, log_progress)
                .await
                .map_err(engine_exit)?;
            if report.success() {
                tracing::info!("Deployed {} tasks.", report.done);
                Ok(())
            } else {
                tracing::error!("{} of {} tasks failed.", report.failed, report.total);
                Err(EXIT_USER_ERROR)
            }
        }
        Command::Package { command } => {
            let store = PackageStore::open_default().map_err(package_exit)?;
            match command {
                PackageCommand::Build => {
                    let cwd = current_dir()?;
                    store.build(&cwd).map_err(package_exit)?;
                }
                PackageCommand::Install { spec } => {
                    store.install(&spec).map_err(package_exit)?;
                }
                PackageCommand::Uninstall { name } => {
                    store.uninstall(&name).map_err(package_exit)?;
                }
            }
            Ok(())
        }
    }
}

/// Loads project settings, checks the engine version, then compiles the
/// entrypoint with the package store's source directories on the search
/// path.
fn compile(file: &PathBuf) -> Result<(steward_dsl::Compiled, ProjectSettings), u8> {
    if !file.exists() {
        tracing::error!("No such file: {}", file.display());
        return Err(EXIT_USER_ERROR);
    }

    let cwd = current_dir()?;
    let settings = read_project(&cwd).map_err(package_exit)?;
    settings
        .check_engine_version(VERSION)
        .map_err(package_exit)?;

    let store = PackageStore::open_default().map_err(package_exit)?;
    let search_paths = store.source_paths().map_err(package_exit)?;

    tracing::info!("Compiling {}", file.display());
    let compiled = Compiler::with_search_paths(search_paths)
        .compile_file(file)
        .map_err(compile_exit)?;
    Ok((compiled, settings))
}

fn current_dir() -> Result<PathBuf, u8> {
    std::env::current_dir().map_err(|error| {
        tracing::error!("cannot determine the working directory: {error}");
        EXIT_INTERNAL_ERROR
    })
}

fn compile_exit(error: CompileError) -> u8 {
    eprintln!("{}", error.render());
    match error {
        CompileError::Internal { .. } => EXIT_INTERNAL_ERROR,
        _ => EXIT_USER_ERROR,
    }
}

fn engine_exit(error: EngineError) -> u8 {
    tracing::error!("{error}");
    match error {
        EngineError::Internal { .. } => EXIT_INTERNAL_ERROR,
        _ => EXIT_USER_ERROR,
    }
}

fn package_exit(error: steward_pkg::PackageError) -> u8 {
    tracing::error!("{error}");
    EXIT_USER_ERROR
}

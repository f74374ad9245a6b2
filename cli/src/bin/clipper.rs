use clap::{Parser, Subcommand};
use cli::{ClipperConfig, load_request};
use clipper_common::MediaInfo;
use clipper_common::utils::format_file_size;
use color_eyre::eyre::{Result, eyre};
use pipeline::driver::Driver;
use pipeline::driver::ffmpeg::FFmpegDriver;
use pipeline::sources::{FileSink, MediaSource, Source};
use pipeline::{CompileError, CompiledPlan, Compiler, EditRequest, OpKind};
use schemars::schema_for;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use strum::IntoEnumIterator;
use tracing::{error, info};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser)]
#[command(author, version, about = "Compile JSON edit pipelines into ffmpeg passes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a request and print the plan as JSON
    Compile {
        /// Path to the request (.json or .toml)
        #[arg(short, long)]
        request: PathBuf,
        /// Source duration in seconds, instead of probing
        #[arg(short, long, conflicts_with = "probe")]
        duration: Option<f64>,
        /// Probe the source with ffprobe
        #[arg(long)]
        probe: bool,
        /// Path to clipper.toml
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Compile a request and run every pass
    Render {
        #[arg(short, long)]
        request: PathBuf,
        /// Where the final artifact is written
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the JSON schema of an operation, or of the whole request
    Schema {
        /// Operation name, e.g. `karaoke`
        op: Option<String>,
        /// Print the compiled plan schema instead
        #[arg(long, conflicts_with = "op")]
        plan: bool,
    },
    /// List the operations the compiler understands
    Ops,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Compile { request, duration, probe, config } => {
            compile(request, *duration, *probe, config.as_deref())?;
        }
        Commands::Render { request, output, config } => {
            render(request, output, config.as_deref()).await?;
        }
        Commands::Schema { op, plan } => {
            print_schema(op.as_deref(), *plan)?;
        }
        Commands::Ops => list_ops(),
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ClipperConfig> {
    match path {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Ok(ClipperConfig::from_file(path)?)
        }
        None => Ok(ClipperConfig::default()),
    }
}

fn driver(config: &ClipperConfig) -> Result<FFmpegDriver> {
    let tools = &config.ffmpeg;
    Ok(FFmpegDriver::with_paths(
        tools.ffmpeg.as_deref(),
        tools.ffprobe.as_deref(),
        tools.ytdlp.as_deref(),
    )?)
}

/// Print the structured error report and exit non-zero
fn fail(err: CompileError) -> ! {
    error!("{}", err);
    match serde_json::to_string_pretty(&err.report()) {
        Ok(report) => println!("{report}"),
        Err(_) => println!("{err}"),
    }
    std::process::exit(1);
}

fn compile_request(
    compiler: &Compiler,
    request: &EditRequest,
    duration: Option<f64>,
    probe: Option<&FFmpegDriver>,
) -> CompiledPlan {
    let compiled = match (probe, duration) {
        (Some(driver), _) => compiler.compile_with_probe(request, driver),
        (None, Some(duration)) => compiler.compile(request, Some(&MediaInfo::with_duration(duration))),
        (None, None) => compiler.compile(request, None),
    };
    compiled.unwrap_or_else(|err| fail(err))
}

fn compile(request_path: &Path, duration: Option<f64>, probe: bool, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let request = load_request(request_path)?;
    let compiler = Compiler::new(config.compiler.clone());

    let driver = if probe { Some(driver(&config)?) } else { None };
    let plan = compile_request(&compiler, &request, duration, driver.as_ref());
    println!("{}", plan.to_json()?);
    Ok(())
}

async fn render(request_path: &Path, output: &Path, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let request = load_request(request_path)?;
    let compiler = Compiler::new(config.compiler.clone());
    let driver = driver(&config)?;

    let source = MediaSource::new(request.media.clone());
    source.validate()?;
    info!("Rendering {}", source.description());

    let plan = compile_request(&compiler, &request, None, Some(&driver));
    info!("Compiled {} pass(es), {} node(s)", plan.passes.len(), plan.node_count());

    let sink = FileSink::new(output.to_string_lossy());
    let report = tokio::task::spawn_blocking(move || driver.render(&plan, &sink)).await??;

    let size = std::fs::metadata(output).map(|meta| meta.len()).unwrap_or(0);
    info!(
        "Wrote {:?} ({}) in {:.2}s over {} pass(es)",
        output,
        format_file_size(size),
        report.processing_time,
        report.passes
    );
    Ok(())
}

fn print_schema(op: Option<&str>, plan: bool) -> Result<()> {
    let schema = match op {
        Some(name) => OpKind::from_str(name)
            .map_err(|_| eyre!("unknown operation `{name}`, see `clipper ops`"))?
            .schema(),
        None if plan => schema_for!(CompiledPlan),
        None => schema_for!(EditRequest),
    };
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

fn list_ops() {
    println!("{:<22} {:<8} {:<9} needs", "operation", "items", "terminal");
    for kind in OpKind::iter() {
        println!(
            "{:<22} {:<8} {:<9} {}",
            kind.name(),
            kind.cardinality().to_string(),
            if kind.is_terminal() { "yes" } else { "no" },
            kind.requirement()
        );
    }
}

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use remapkit::loader::{loader_for_path, ClasspathLoader, CompoundLoader};
use remapkit::pipeline::{JarRemapPipeline, RemapTask};

const USAGE: &str = "usage: remap [-s|--skip-resources] [-f|--force] [-v|--stacktrace] \
                     -- <input> <output> <mappings> <from> <to> [classpath...]";

/// CLI arguments for jar remapping.
#[derive(Parser, Debug)]
#[command(
    name = "remap",
    about = "Apply JVM name mappings to a JAR file.",
    version,
    disable_help_subcommand = true,
    override_usage = "remap [-s] [-f] [-v] -- <input> <output> <mappings> <from> <to> [classpath...]"
)]
struct Cli {
    /// Do not copy non-class resources into the output.
    #[arg(short = 's', long)]
    skip_resources: bool,
    /// Overwrite the output file if it exists.
    #[arg(short = 'f', long)]
    force: bool,
    /// Print full error chains instead of one-line messages.
    #[arg(short = 'v', long)]
    stacktrace: bool,
    /// <input> <output> <mappings> <from> <to> [classpath...]
    #[arg(value_name = "ARG")]
    args: Vec<String>,
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();
    let stacktrace = cli.stacktrace;
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if stacktrace {
                eprintln!("error: {err:?}");
            } else {
                eprintln!("error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let init_result = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("remapkit=info,warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
    let _ = init_result;
}

fn run(cli: Cli) -> Result<()> {
    if cli.args.len() < 5 {
        println!("{USAGE}");
        anyhow::bail!("expected at least five arguments, got {}", cli.args.len());
    }
    let input = PathBuf::from(&cli.args[0]);
    let output = PathBuf::from(&cli.args[1]);
    let mappings_path = PathBuf::from(&cli.args[2]);
    let from = cli.args[3].clone();
    let to = cli.args[4].clone();
    let classpath_paths: Vec<PathBuf> = cli.args[5..].iter().map(PathBuf::from).collect();

    for required in std::iter::once(&input)
        .chain(std::iter::once(&mappings_path))
        .chain(classpath_paths.iter())
    {
        if !required.exists() {
            println!("{USAGE}");
            anyhow::bail!("no such file: {}", required.display());
        }
    }
    let output_parent = match output.parent() {
        Some(parent) if parent.as_os_str().is_empty() => Path::new("."),
        Some(parent) => parent,
        None => Path::new("."),
    };
    if !output_parent.exists() {
        println!("{USAGE}");
        anyhow::bail!("output directory does not exist: {}", output_parent.display());
    }
    if output.exists() && !cli.force {
        println!("{USAGE}");
        anyhow::bail!(
            "output {} already exists; pass --force to overwrite",
            output.display()
        );
    }

    let mappings = remapkit::format::read_path(&mappings_path)
        .with_context(|| format!("failed to load mappings from {}", mappings_path.display()))?;

    let mut classpath: Vec<Arc<dyn ClasspathLoader>> = Vec::with_capacity(classpath_paths.len());
    for path in &classpath_paths {
        classpath.push(loader_for_path(path)?);
    }
    let classpath: Arc<dyn ClasspathLoader> = Arc::new(CompoundLoader::new(classpath));

    let mut pipeline = JarRemapPipeline::new(Arc::new(mappings), classpath);
    pipeline.copy_resources(!cli.skip_resources);
    pipeline.run(&[RemapTask {
        input,
        output,
        from,
        to,
    }])
}

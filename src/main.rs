use clap::{Parser, Subcommand};
use image_derive::media::Format;
use image_derive::publish::FsSink;
use image_derive::{Capabilities, Image, ImageError, Processor, config, output};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "image-derive")]
#[command(about = "Content-addressed cache and transform pipeline for derived images")]
#[command(long_about = "\
Content-addressed cache and transform pipeline for derived images

Every derived image is named after the content of its source and the
options that produced it, so rebuilding never renders the same variant
twice and renaming a source never re-renders anything.

Spec grammar (tokens in any order, case-insensitive):

  300x200       target size; 300x or x200 keeps the aspect ratio
  resize|crop|fill|fit
                action; required with a size, otherwise the spec string converts
  q80           JPEG/AVIF quality, 1-100
  r90           counter-clockwise rotation: 90, 180 or 270
  center|top|bottom|left|right|topleft|topright|bottomleft|bottomright|smart
                crop/fill anchor
  box|linear|lanczos|catmullrom|gaussian|nearestneighbor
                resampling filter
  #fff          background for formats without alpha
  jpg|png|gif|webp|tiff|avif
                target format

Derived files are written under --output next to a manifest
(_gen/.derived-manifest.json) that lets later runs reuse them.

Run 'image-derive gen-config' to generate a documented config.toml.")]
#[command(version)]
struct Cli {
    /// Publish root for derived images
    #[arg(long, default_value = "dist", global = true)]
    output: PathBuf,

    /// Configuration file (missing file = stock defaults)
    #[arg(long, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Ignore the persisted manifest and render every derivation
    #[arg(long, global = true)]
    no_cache: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Derive one image once per spec
    Derive {
        /// Source image
        image: PathBuf,
        /// Process specs, e.g. "fill 200x200 smart" or "resize 450x png"
        #[arg(required = true)]
        specs: Vec<String>,
    },
    /// Derive every supported image under a directory
    Batch {
        /// Directory to walk
        dir: PathBuf,
        /// Process spec applied to every image
        spec: String,
    },
    /// Print the derived file name for a spec without rendering
    Key {
        /// Source image
        image: PathBuf,
        /// Process spec
        spec: String,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Command::Derive { image, specs } => {
            let processor = open_session(&cli)?;
            let source = add_file(&processor, image, file_name(image))?;
            output::print_source(1, &source, source.metadata().as_deref());

            let mut failed = 0;
            for spec in specs {
                match derive_one(&processor, &source, spec) {
                    Ok((derived, permalink)) => output::print_derived(spec, &derived, &permalink),
                    Err(e) => {
                        failed += 1;
                        output::print_failure(spec, &e);
                    }
                }
            }
            finish(&processor, 1, specs.len() - failed, failed)?;
        }
        Command::Batch { dir, spec } => {
            let config = load_config(&cli)?;
            init_thread_pool(&config.processing);
            let processor = open_session_with(&cli, &config)?;
            let files = collect_images(dir);

            let results: Vec<(Vec<String>, bool)> = files
                .par_iter()
                .enumerate()
                .map(|(i, (path, rel))| batch_one(&processor, path, rel, spec, i + 1))
                .collect();

            let mut failed = 0;
            for (lines, ok) in &results {
                for line in lines {
                    println!("{}", line);
                }
                if !ok {
                    failed += 1;
                }
            }
            finish(&processor, files.len(), files.len() - failed, failed)?;
        }
        Command::Key { image, spec } => {
            let processor = open_session(&cli)?;
            let source = add_file(&processor, image, file_name(image))?;
            let derived = processor.process(&source, spec)?;
            println!("{}", output::format_key(&derived));
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<config::DeriveConfig, config::ConfigError> {
    let mut config = config::load_config(&cli.config)?;
    if cli.no_cache {
        config.cache.persist_manifest = false;
    }
    Ok(config)
}

fn open_session(cli: &Cli) -> Result<Processor, Box<dyn std::error::Error>> {
    let config = load_config(cli)?;
    open_session_with(cli, &config)
}

fn open_session_with(
    cli: &Cli,
    config: &config::DeriveConfig,
) -> Result<Processor, Box<dyn std::error::Error>> {
    let sink = Arc::new(FsSink::new(cli.output.clone()));
    Ok(Processor::new(config, Capabilities::with_sink(sink))?)
}

fn add_file(processor: &Processor, path: &Path, rel: &str) -> Result<Image, Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path)?;
    Ok(processor.add_source(rel, bytes)?)
}

fn file_name(path: &Path) -> &str {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("image")
}

/// Derive and publish; returns the handle and its permalink.
fn derive_one(processor: &Processor, source: &Image, spec: &str) -> Result<(Image, String), ImageError> {
    let derived = processor.process(source, spec)?;
    let permalink = derived.rel_permalink()?;
    Ok((derived, permalink))
}

/// Output lines for one batch file, and whether it succeeded.
fn batch_one(processor: &Processor, path: &Path, rel: &str, spec: &str, index: usize) -> (Vec<String>, bool) {
    let source = match add_file(processor, path, rel) {
        Ok(source) => source,
        Err(e) => return (vec![format!("{:0>3} {} failed: {}", index, rel, e)], false),
    };
    let mut lines = output::format_source(index, &source, None);
    match derive_one(processor, &source, spec) {
        Ok((derived, permalink)) => {
            lines.extend(output::format_derived(spec, &derived, &permalink));
            (lines, true)
        }
        Err(e) => {
            lines.extend(output::format_failure(spec, &e));
            (lines, false)
        }
    }
}

/// Supported images under `dir`, with their slash-separated relative paths,
/// in a stable order.
fn collect_images(dir: &Path) -> Vec<(PathBuf, String)> {
    let mut files: Vec<(PathBuf, String)> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .and_then(Format::from_extension)
                .is_some_and(Format::can_decode)
        })
        .filter_map(|e| {
            let rel = e.path().strip_prefix(dir).ok()?;
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            Some((e.path().to_path_buf(), rel))
        })
        .collect();
    files.sort_by(|a, b| a.1.cmp(&b.1));
    files
}

fn finish(
    processor: &Processor,
    sources: usize,
    derived: usize,
    failed: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    processor.save_manifest()?;
    output::print_summary(sources, derived, failed, &processor.stats());
    if failed > 0 {
        return Err(format!("{failed} derivation(s) failed").into());
    }
    Ok(())
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; the config can constrain
/// down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

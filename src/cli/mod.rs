//! Command-line interface for the tissue tiler.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::codec::{JxlCodec, TileCodec};
use crate::config::TilerConfig;
use crate::pipeline::{RunReport, TilerPipeline};
use crate::progress::BarProgress;
use crate::slide::ImageSlide;

/// Tissue Tiler
///
/// Cuts a whole slide image into tissue tiles and encodes each one with
/// JPEG XL at the largest distance that keeps SSIM above the target.
#[derive(Parser, Debug)]
#[command(name = "tiler")]
#[command(author = "Digital Pathology Team")]
#[command(version)]
#[command(about = "SSIM-bounded JPEG XL tiling of whole slide images")]
#[command(long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Mask, index, and encode a slide
    Run {
        /// Input slide image
        #[arg(short, long)]
        input: PathBuf,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output root (overrides output.root)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Worker threads (overrides encoder.workers)
        #[arg(short, long)]
        workers: Option<usize>,

        /// SSIM target (overrides encoder.ssim_target)
        #[arg(short, long)]
        target: Option<f64>,

        /// SSIM tolerance (overrides encoder.ssim_tol)
        #[arg(long)]
        tolerance: Option<f64>,

        /// Tile edge length (overrides indexer.tile_size)
        #[arg(long)]
        tile_size: Option<u32>,

        /// Grid stride (overrides indexer.stride)
        #[arg(long)]
        stride: Option<u32>,

        /// Minimum tissue fraction (overrides indexer.min_tissue_frac)
        #[arg(long)]
        min_tissue: Option<f64>,

        /// Skip overlay.png
        #[arg(long)]
        no_overlay: bool,
    },

    /// Compute the tissue mask and tile index without encoding
    Index {
        /// Input slide image
        #[arg(short, long)]
        input: PathBuf,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write the tile overlay to this PNG
        #[arg(long)]
        overlay: Option<PathBuf>,
    },

    /// Validate configuration and check the JPEG XL tools
    Check {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the default configuration as TOML
    InitConfig,
}

/// Run the CLI application.
pub fn run(cli: Cli) -> anyhow::Result<()> {
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    match cli.command {
        Commands::Run {
            input,
            config,
            output,
            workers,
            target,
            tolerance,
            tile_size,
            stride,
            min_tissue,
            no_overlay,
        } => {
            let mut cfg = load_config(config.as_deref())?;
            if let Some(root) = output {
                cfg.output.root = root;
            }
            if let Some(n) = workers {
                cfg.encoder.workers = n;
            }
            if let Some(t) = target {
                cfg.encoder.ssim_target = t;
            }
            if let Some(t) = tolerance {
                cfg.encoder.ssim_tol = t;
            }
            if let Some(s) = tile_size {
                cfg.indexer.tile_size = s;
            }
            if let Some(s) = stride {
                cfg.indexer.stride = s;
            }
            if let Some(f) = min_tissue {
                cfg.indexer.min_tissue_frac = f;
            }
            if no_overlay {
                cfg.visualizer.enabled = false;
            }
            run_tiling(&input, cfg, cli.quiet)
        }
        Commands::Index {
            input,
            config,
            overlay,
        } => run_index(&input, config.as_deref(), overlay.as_deref(), cli.quiet),
        Commands::Check { config } => run_check(config.as_deref(), cli.quiet),
        Commands::InitConfig => {
            print!("{}", TilerConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<TilerConfig> {
    match path {
        Some(p) => TilerConfig::from_file(p)
            .with_context(|| format!("Failed to load config {}", p.display())),
        None => Ok(TilerConfig::default()),
    }
}

fn open_slide(path: &Path) -> anyhow::Result<ImageSlide> {
    ImageSlide::open(path).with_context(|| format!("Failed to open slide {}", path.display()))
}

/// Run the full pipeline.
fn run_tiling(input: &Path, config: TilerConfig, quiet: bool) -> anyhow::Result<()> {
    config.validate().context("Invalid configuration")?;
    let slide = open_slide(input)?;

    let mut pipeline = TilerPipeline::new(config);
    if !quiet {
        pipeline = pipeline.with_progress(Box::new(BarProgress::new()));
    }
    let report = pipeline
        .run(Box::new(slide))
        .with_context(|| format!("Tiling failed for {}", input.display()))?;

    if !quiet {
        print_report(&report);
    }
    if report.summary.failed > 0 {
        anyhow::bail!(
            "{} of {} tiles failed; see {}",
            report.summary.failed,
            report.summary.total,
            report.run_dir.join(crate::pipeline::MANIFEST_FILE).display()
        );
    }
    Ok(())
}

/// Run index command.
fn run_index(input: &Path, config: Option<&Path>, overlay: Option<&Path>, quiet: bool) -> anyhow::Result<()> {
    let cfg = load_config(config)?;
    let slide = open_slide(input)?;
    let report = TilerPipeline::new(cfg)
        .index(Box::new(slide), overlay)
        .with_context(|| format!("Indexing failed for {}", input.display()))?;

    if quiet {
        return Ok(());
    }

    let raw: u64 = report.tiles.iter().map(|t| t.raw_bytes()).sum();
    println!("Tile Index");
    println!("==========");
    println!("Slide: {} ({}x{})", input.display(), report.dimensions.0, report.dimensions.1);
    println!(
        "Mask: level {} ({}x{}), tissue {:.1}%",
        report.mask.level,
        report.mask.width,
        report.mask.height,
        report.mask.coverage * 100.0
    );
    println!("Bounding box: {}", report.mask.bbox_region());
    println!("Tiles: {}", report.tiles.len());
    println!("Raw size: {} bytes ({:.2} MB)", raw, raw as f64 / 1_048_576.0);
    if let Some(path) = overlay {
        println!("Overlay: {}", path.display());
    }
    Ok(())
}

/// Run check command.
fn run_check(config: Option<&Path>, quiet: bool) -> anyhow::Result<()> {
    let cfg = load_config(config)?;
    cfg.validate().context("Invalid configuration")?;
    JxlCodec::from_config(&cfg.jxl)
        .probe()
        .context("JPEG XL tools are not usable")?;

    if !quiet {
        println!("Configuration OK");
        println!("  cjxl: {}", cfg.jxl.cjxl_bin);
        println!("  djxl: {}", cfg.jxl.djxl_bin);
        println!("  distance: [{}, {}], effort {}", cfg.jxl.dist_min, cfg.jxl.dist_max, cfg.jxl.effort);
        println!(
            "  SSIM floor: {:.4} ({} - {})",
            cfg.encoder.threshold(),
            cfg.encoder.ssim_target,
            cfg.encoder.ssim_tol
        );
    }
    Ok(())
}

/// Print run report.
fn print_report(report: &RunReport) {
    let s = &report.summary;
    println!("Tiling Result:");
    println!("  Run directory: {}", report.run_dir.display());
    println!("  Slide: {}x{}", s.slide_width, s.slide_height);
    println!("  Tissue: {:.1}%", s.tissue_coverage * 100.0);
    println!("  Tiles: {} indexed, {} written ({} infeasible), {} failed", s.total, s.succeeded, s.infeasible, s.failed);
    println!(
        "  Raw Size: {} bytes ({:.2} MB)",
        s.raw_bytes,
        s.raw_bytes as f64 / 1_048_576.0
    );
    println!(
        "  Encoded Size: {} bytes ({:.2} MB)",
        s.encoded_bytes,
        s.encoded_bytes as f64 / 1_048_576.0
    );
    println!("  Ratio: {:.2}:1", s.overall_ratio());
    println!("  Space Savings: {:.1}%", s.overall_savings_percent());
    println!("  Time: {} ms", s.elapsed_ms);
}

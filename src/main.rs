use clap::{Parser, Subcommand, ValueEnum};
use raster_codecs::batch::{self, SaveOverrides};
use raster_codecs::codecs::LoadFlags;
use raster_codecs::{config, output};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn version_string() -> &'static str {
    let engine = env!("HEVC_ENGINE");
    let base = if env!("ON_RELEASE_TAG") == "true" {
        env!("CARGO_PKG_VERSION").to_string()
    } else {
        match env!("GIT_HASH") {
            "" => "dev@unknown".to_string(),
            hash => format!("dev@{hash}"),
        }
    };
    // Leaked once at startup
    Box::leak(format!("{base} (hevc: {engine})").into_boxed_str())
}

#[derive(Parser)]
#[command(name = "raster-codecs")]
#[command(about = "Inspect and convert raster images through one codec layer")]
#[command(long_about = "\
Inspect and convert raster images through one codec layer

Every file is decoded to a BGRA buffer (8 or 16 bits per channel) by the
adapter its content selects, then written by the adapter the target
extension selects.

Adapters:
  PNG         png: 1-16 bit, palette, tRNS, Adam7
  TIFF        tif, tiff: strips, chunky and planar, 8/16-bit and float
  HEIF        heic, heif: container parsing built in, HEVC pixels need the
              `heif` feature (libheif)
  Generic     jpg, webp, bmp, gif and anything else the image crate reads
  ThirdParty  qoi, ppm, pam, jxl, hdr, farbfeld via zune-image

Run 'raster-codecs gen-config' to generate a documented config.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Directory holding config.toml
    #[arg(long, default_value = ".", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum InfoFlags {
    /// Dimensions, depth, color model and metadata without pixels
    Header,
    /// Full decode
    All,
}

impl InfoFlags {
    fn load_flags(self) -> LoadFlags {
        match self {
            InfoFlags::Header => LoadFlags::header_only(),
            InfoFlags::All => LoadFlags::default(),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Print format, size, depth and metadata of image files
    Info {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
        #[arg(long, value_enum, default_value = "header")]
        flags: InfoFlags,
    },
    /// Convert files or directories to another format
    Convert {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Target extension (png, tiff, heic, jpg, webp, qoi, ...)
        #[arg(long)]
        to: String,
        #[arg(long)]
        out_dir: PathBuf,
        /// Quality attribute for the target adapter (overrides config)
        #[arg(long)]
        quality: Option<i64>,
        /// Compress TIFF output
        #[arg(long)]
        compress: bool,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Info { files, json, flags } => {
            let codec_config = config::load_config(&cli.config)?;
            init_thread_pool(&codec_config.processing);
            let files = batch::collect_inputs(&files)?;
            let results = batch::inspect_all(&files, flags.load_flags(), &codec_config);
            if json {
                let reports: Vec<_> = results
                    .iter()
                    .filter_map(|(_, r)| r.as_ref().ok())
                    .collect();
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                output::print_info(&results);
            }
        }
        Command::Convert {
            inputs,
            to,
            out_dir,
            quality,
            compress,
        } => {
            let codec_config = config::load_config(&cli.config)?;
            init_thread_pool(&codec_config.processing);
            let sources = batch::collect_inputs(&inputs)?;
            let jobs = batch::plan_jobs(&sources, &out_dir, &to);
            let overrides = SaveOverrides { quality, compress };

            let (tx, rx) = std::sync::mpsc::channel();
            let printer = std::thread::spawn(move || {
                for event in rx {
                    for line in output::format_batch_event(&event) {
                        println!("{}", line);
                    }
                }
            });
            let summary = batch::convert_all(&jobs, &to, &codec_config, &overrides, Some(tx));
            printer
                .join()
                .map_err(|_| "output printer thread panicked")?;
            let summary = summary?;
            output::print_summary(&summary);
            if summary.failed > 0 {
                std::process::exit(1);
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; the config can only lower it.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

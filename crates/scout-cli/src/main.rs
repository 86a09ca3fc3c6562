use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use scout_core::{
    recognize_faces, EuclideanMatcher, Frame, Gallery, Matcher, OnnxFaceEmbedder,
    DEFAULT_MATCH_THRESHOLD,
};
use scout_hw::{open_source, CameraSource, SourceConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Empty cycles tolerated before `identify` gives up on a source.
const FRAME_ATTEMPTS: usize = 10;

#[derive(Parser)]
#[command(name = "scout", about = "Scout surveillance diagnostics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a gallery directory and list its identities
    Gallery {
        /// Directory of enrolled stills
        #[arg(short, long)]
        dir: PathBuf,
        /// Directory containing det_10g.onnx and w600k_r50.onnx
        #[arg(short, long)]
        models: PathBuf,
    },
    /// List V4L2 capture devices
    Devices,
    /// Grab one frame from a source and recognise the faces in it
    Identify {
        /// Camera device path or http(s):// MJPEG URL
        #[arg(short, long, default_value = "/dev/video0")]
        source: String,
        #[arg(short, long)]
        models: PathBuf,
        /// Gallery to match against; without it every face is Unknown
        #[arg(short, long)]
        gallery: Option<PathBuf>,
        #[arg(short, long, default_value_t = DEFAULT_MATCH_THRESHOLD)]
        threshold: f32,
        /// Detect on a copy shrunk by this factor, as scoutd does
        #[arg(long, default_value_t = 4)]
        downscale: u32,
        #[arg(long, default_value_t = 5000)]
        read_timeout_ms: u64,
        /// Write the annotated frame here
        #[arg(long)]
        save: Option<PathBuf>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Gallery { dir, models } => {
            let mut embedder = load_models(&models)?;
            let load = Gallery::load(&dir, &mut embedder)
                .with_context(|| format!("failed to load gallery {}", dir.display()))?;

            if load.gallery.is_empty() {
                println!("No identities in {}", dir.display());
            }
            for identity in load.gallery.identities() {
                println!(
                    "{:<24} {} embedding(s)",
                    identity.label,
                    identity.embeddings().len()
                );
            }
            for warning in &load.warnings {
                println!("skipped {}: {:?}", warning.path.display(), warning.kind);
            }
        }
        Commands::Devices => {
            let devices = CameraSource::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Identify {
            source,
            models,
            gallery,
            threshold,
            downscale,
            read_timeout_ms,
            save,
            json,
        } => {
            let mut embedder = load_models(&models)?;
            let gallery = match gallery {
                Some(dir) => {
                    Gallery::load(&dir, &mut embedder)
                        .with_context(|| format!("failed to load gallery {}", dir.display()))?
                        .gallery
                }
                None => Gallery::new(),
            };

            let config = SourceConfig::parse(&source, Duration::from_millis(read_timeout_ms));
            let frame = grab_frame(&config)?;
            let matcher = EuclideanMatcher::new(threshold);
            let results = recognize_faces(&mut embedder, &frame, downscale, |embedding| {
                matcher.compare(embedding, &gallery)
            })
            .context("recognition failed")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                println!(
                    "{}x{} frame, {} face(s)",
                    frame.width,
                    frame.height,
                    results.len()
                );
                for r in &results {
                    println!(
                        "  {:<16} distance {:.3}  box (top {}, right {}, bottom {}, left {})",
                        r.label.to_string(),
                        r.distance,
                        r.region.top,
                        r.region.right,
                        r.region.bottom,
                        r.region.left
                    );
                }
            }

            if let Some(path) = save {
                let annotated = frame.annotate(&results);
                annotated
                    .to_rgb_image()
                    .context("frame buffer does not match its dimensions")?
                    .save(&path)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                println!("annotated frame written to {}", path.display());
            }
        }
    }

    Ok(())
}

fn load_models(dir: &std::path::Path) -> Result<OnnxFaceEmbedder> {
    OnnxFaceEmbedder::load(dir)
        .with_context(|| format!("failed to load face models from {}", dir.display()))
}

fn grab_frame(config: &SourceConfig) -> Result<Frame> {
    let mut source = open_source(config).context("failed to open frame source")?;
    for _ in 0..FRAME_ATTEMPTS {
        if let Some(frame) = source.next_frame().context("failed to read frame")? {
            return Ok(frame);
        }
    }
    bail!(
        "no decodable frame from {} after {FRAME_ATTEMPTS} attempts",
        source.describe()
    )
}

use anyhow::{Context, Result};
use scout_core::{EuclideanMatcher, Gallery, LatestFrame, OnnxFaceEmbedder};
use scout_hw::{open_channel, open_source};
use scoutd::{
    console, CommandDispatcher, Config, EnrollmentFlow, PipelineSettings, RecognitionPipeline,
};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        source = %config.source,
        gallery = %config.gallery_dir.display(),
        models = %config.model_dir.display(),
        threshold = config.match_threshold,
        downscale = config.downscale,
        actuator = %config.actuator,
        "scoutd starting"
    );

    // Fail fast: an unopenable source is the one fatal startup error.
    let source = open_source(&config.source_config())
        .with_context(|| format!("failed to open frame source {}", config.source))?;

    let mut embedder = OnnxFaceEmbedder::load(&config.model_dir).with_context(|| {
        format!(
            "failed to load face models from {}",
            config.model_dir.display()
        )
    })?;

    std::fs::create_dir_all(&config.gallery_dir).with_context(|| {
        format!(
            "failed to create gallery directory {}",
            config.gallery_dir.display()
        )
    })?;
    let load = Gallery::load(&config.gallery_dir, &mut embedder).context("failed to load gallery")?;
    let gallery = load.gallery.into_shared();

    let channel = open_channel(&config.actuator)
        .with_context(|| format!("failed to open actuator channel {}", config.actuator))?;

    let embedder = Arc::new(Mutex::new(embedder));
    let latest = LatestFrame::new();

    let pipeline = RecognitionPipeline::new(
        embedder.clone(),
        EuclideanMatcher::new(config.match_threshold),
        gallery.clone(),
        latest.clone(),
        PipelineSettings {
            downscale: config.downscale,
            cycle_delay: config.cycle_delay,
            retry: config.retry_policy(),
        },
    );
    let mut pipeline = pipeline.spawn(source)?;

    let (command_tx, command_rx) = mpsc::channel(16);
    let dispatcher = CommandDispatcher::new(channel, config.open_cooldown);
    dispatcher
        .spawn(pipeline.subscribe(), command_rx)
        .context("failed to spawn actuator thread")?;

    // blocking stdin reader, detached
    let (quit_tx, mut quit_rx) = oneshot::channel();
    let enrollment = EnrollmentFlow::new(latest, gallery, embedder);
    std::thread::Builder::new()
        .name("scout-console".into())
        .spawn(move || {
            console::serve(std::io::stdin().lock(), command_tx, &enrollment, quit_tx);
        })
        .context("failed to spawn console thread")?;

    tracing::info!("scoutd ready");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            tracing::info!("interrupt received");
        }
        Ok(()) = &mut quit_rx => tracing::info!("quit requested"),
        _ = pipeline.stopped() => {}
    }

    tracing::info!("scoutd shutting down");
    tokio::task::spawn_blocking(move || pipeline.shutdown())
        .await
        .context("pipeline shutdown task failed")?
        .context("recognition pipeline failed")?;

    Ok(())
}

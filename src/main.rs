//! Prism dual-stream demo over the simulated transport

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tracing::{info, warn};

use prism::capture::BundleSaver;
use prism::transport::sim::{SimProfile, SimTransport};
use prism::transport::{ParamValue, StreamTransport};
use prism::{ChannelId, Config, DualStreamPipeline};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prism=debug".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Prism launching...");

    // Load configuration (optional TOML path as the first argument)
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    // The demo drives the simulated device
    let transport = SimTransport::new(SimProfile::default());
    transport.set_parameter("ExposureTime", ParamValue::Float(350.0));
    transport.set_parameter("Gain", ParamValue::Float(2.0));
    if let Some(ParamValue::Float(exposure)) = transport.get_parameter("ExposureTime") {
        info!(exposure_us = exposure, "device parameters applied");
    }

    let pipeline =
        DualStreamPipeline::build(&config, Arc::clone(&transport) as Arc<dyn StreamTransport>);
    pipeline.start()?;

    // One preview consumer per channel at the decimated cadence
    for channel in ChannelId::ALL {
        if let Some(rx) = pipeline.subscribe_preview(channel) {
            tokio::spawn(async move {
                let mut shown = 0u64;
                while let Ok(frame) = rx.recv_async().await {
                    shown += 1;
                    if shown % 15 == 0 {
                        info!(
                            channel = %channel,
                            sequence = frame.sequence,
                            latency_us = frame.received_at.elapsed().as_micros() as u64,
                            shown,
                            "preview frame"
                        );
                    }
                }
            });
        }
    }

    // Periodic per-channel statistics
    {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                for channel in ChannelId::ALL {
                    if let Some(stats) = pipeline.stats(channel) {
                        info!(
                            channel = %channel,
                            received = stats.received,
                            published = stats.published,
                            stale = stats.stale_dropped,
                            preview = stats.preview_forwarded,
                            "stream stats"
                        );
                    }
                }
            }
        });
    }

    info!("streaming; Ctrl-C captures and exits");
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(30)) => info!("demo window elapsed"),
        _ = tokio::signal::ctrl_c() => info!("interrupt received"),
    }

    // One four-plane capture on the way out
    let bundle = pipeline.capture()?;
    if let Some(skew) = bundle.timestamp_skew() {
        info!(skew_ticks = skew, "capture timestamp skew");
    }
    for gap in &bundle.gaps {
        warn!(%gap, "capture gap");
    }
    let saver = BundleSaver::new(&config.capture.save_dir);
    let saved = saver.save(&bundle)?;
    info!(
        directory = %saved.directory.display(),
        files = saved.files.len(),
        "capture written"
    );

    pipeline.stop();
    info!("Prism shutting down");
    Ok(())
}

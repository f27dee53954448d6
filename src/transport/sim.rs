//! Simulated dual-channel transport
//!
//! Stands in for the streaming device during development and tests: one
//! paced generator task per started channel, deterministic synthetic
//! content, and the same start/stop contract a real transport obeys.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::stream::frame::{ChannelId, PixelFormat};
use crate::transport::{
    FrameDelivery, FrameSink, ParamValue, StreamDestination, StreamStartError, StreamTransport,
};
use crate::utils::lock;

/// Shape of the synthetic streams.
#[derive(Debug, Clone)]
pub struct SimProfile {
    pub width: u32,
    pub height: u32,
    pub rgb_format: PixelFormat,
    /// Delivery rate per channel, frames per second.
    pub rate_hz: f64,
}

impl Default for SimProfile {
    fn default() -> Self {
        Self {
            width: 64,
            height: 48,
            rgb_format: PixelFormat::Rgb8,
            rate_hz: 60.0,
        }
    }
}

struct ChannelRun {
    paused: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

type SinkSlot = Arc<Mutex<Option<Arc<dyn FrameSink>>>>;

/// In-process stand-in for the streaming device. Block ids continue
/// across a stop/start of the same channel, the way a device-side
/// counter would.
pub struct SimTransport {
    profile: SimProfile,
    sink: SinkSlot,
    running: Mutex<HashMap<ChannelId, ChannelRun>>,
    /// Per-channel block id heads; they outlive the generator tasks.
    sequences: Mutex<HashMap<ChannelId, Arc<AtomicU64>>>,
    params: Mutex<HashMap<String, ParamValue>>,
}

impl SimTransport {
    pub fn new(profile: SimProfile) -> Arc<Self> {
        let params = [
            ("ExposureTime", ParamValue::Float(500.0)),
            ("Gain", ParamValue::Float(1.0)),
            ("AcquisitionLineRate", ParamValue::Float(10_000.0)),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();

        Arc::new(Self {
            profile,
            sink: Arc::new(Mutex::new(None)),
            running: Mutex::new(HashMap::new()),
            sequences: Mutex::new(HashMap::new()),
            params: Mutex::new(params),
        })
    }

    /// Halt deliveries without tearing the channel down, so the stream
    /// looks stalled to everything upstream. Test hook.
    pub fn pause_channel(&self, channel: ChannelId, paused: bool) {
        if let Some(run) = lock(&self.running).get(&channel) {
            run.paused.store(paused, Ordering::Relaxed);
            debug!(channel = %channel, paused, "sim channel pause toggled");
        }
    }
}

impl StreamTransport for SimTransport {
    fn start_channel(
        &self,
        channel: ChannelId,
        destination: &StreamDestination,
    ) -> Result<(), StreamStartError> {
        if destination.address.is_empty() || destination.port == 0 {
            return Err(StreamStartError::Unreachable {
                channel,
                destination: destination.clone(),
                reason: "no route to destination".into(),
            });
        }

        let mut running = lock(&self.running);
        if running.contains_key(&channel) {
            return Err(StreamStartError::AlreadyActive(channel));
        }

        let format = match channel {
            ChannelId::Rgb => self.profile.rgb_format,
            ChannelId::Nir => PixelFormat::Mono8,
        };
        let paused = Arc::new(AtomicBool::new(false));
        let head = Arc::clone(lock(&self.sequences).entry(channel).or_default());
        let task = tokio::spawn(generate(
            channel,
            format,
            self.profile.clone(),
            Arc::clone(&paused),
            head,
            Arc::clone(&self.sink),
        ));
        running.insert(channel, ChannelRun { paused, task });

        info!(channel = %channel, destination = %destination, "sim channel started");
        Ok(())
    }

    fn stop_channel(&self, channel: ChannelId) {
        if let Some(run) = lock(&self.running).remove(&channel) {
            run.task.abort();
            info!(channel = %channel, "sim channel stopped");
        }
    }

    fn register_sink(&self, sink: Arc<dyn FrameSink>) {
        *lock(&self.sink) = Some(sink);
    }

    fn get_parameter(&self, name: &str) -> Option<ParamValue> {
        lock(&self.params).get(name).cloned()
    }

    fn set_parameter(&self, name: &str, value: ParamValue) -> bool {
        lock(&self.params).insert(name.to_string(), value);
        true
    }
}

impl Drop for SimTransport {
    fn drop(&mut self) {
        for (_, run) in lock(&self.running).drain() {
            run.task.abort();
        }
    }
}

async fn generate(
    channel: ChannelId,
    format: PixelFormat,
    profile: SimProfile,
    paused: Arc<AtomicBool>,
    head: Arc<AtomicU64>,
    sink: SinkSlot,
) {
    let period = Duration::from_secs_f64(1.0 / profile.rate_hz.max(1.0));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let clock = Instant::now();

    loop {
        ticker.tick().await;
        if paused.load(Ordering::Relaxed) {
            continue;
        }
        let sequence = head.fetch_add(1, Ordering::Relaxed) + 1;

        let delivery = FrameDelivery {
            channel,
            sequence,
            // Nanoseconds since stream start plays the device tick clock.
            timestamp: clock.elapsed().as_nanos() as u64,
            width: profile.width,
            height: profile.height,
            format,
            data: synth_payload(format, profile.width, profile.height, sequence),
        };

        let registered = { lock(&sink).clone() };
        if let Some(sink) = registered {
            sink.frame_ready(delivery);
        }
    }
}

/// Deterministic test-pattern payload: gradients salted by the sequence
/// number so consecutive frames differ but reruns do not.
fn synth_payload(format: PixelFormat, width: u32, height: u32, sequence: u64) -> Bytes {
    let step = format.bytes_per_pixel();
    let mut data = vec![0u8; width as usize * height as usize * step];
    let salt = sequence as u32;

    for y in 0..height {
        for x in 0..width {
            let base = ((y * width + x) as usize) * step;
            match format.rgb_offsets() {
                Some([r, g, b]) => {
                    data[base + r] = (x + salt) as u8;
                    data[base + g] = y as u8;
                    data[base + b] = (x + y + salt) as u8;
                    if step == 4 {
                        data[base + 3] = 0xFF; // alpha is last in both 4-byte layouts
                    }
                }
                None => data[base] = (x + 2 * y + salt) as u8,
            }
        }
    }
    Bytes::from(data)
}

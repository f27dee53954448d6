//! Per-channel stream lifecycle and frame ingestion

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::stream::frame::{ChannelId, Frame, SharedFrame};
use crate::stream::limiter::RateGate;
use crate::stream::slot::LatestSlot;
use crate::stream::stats::{ChannelCounters, ChannelStats};
use crate::transport::{FrameDelivery, StreamDestination, StreamStartError, StreamTransport};
use crate::utils::lock;
use crate::ChannelConfig;

/// Reason string carried by the stall error state.
pub const STALL_REASON: &str = "stalled";

/// Depth of each preview queue. One slot: a lagging subscriber sees the
/// newest admitted frame and misses the ones in between.
const PREVIEW_DEPTH: usize = 1;

/// Lifecycle of one stream channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    /// Created, never started.
    Idle,
    /// Transport is delivering, or expected to be.
    Streaming,
    /// Fault while streaming; the reason is carried verbatim.
    Error(String),
    /// Torn down. Terminal for this controller.
    Stopped,
}

/// Owns one channel's state machine, latest-frame slot, preview gate and
/// stall watchdog.
///
/// `on_frame_ready` is safe from any execution context; the remaining
/// methods belong to the session that owns the controller. A controller
/// is one-shot: once stopped it stays stopped and the next acquisition
/// session builds a fresh one.
pub struct ChannelController {
    channel: ChannelId,
    destination: StreamDestination,
    stall_timeout: Duration,
    transport: Arc<dyn StreamTransport>,
    slot: LatestSlot,
    state: Mutex<ChannelState>,
    counters: ChannelCounters,
    gate: RateGate,
    subscribers: Mutex<Vec<flume::Sender<SharedFrame>>>,
    /// Bumped on every delivery; the watchdog compares across its period.
    arrivals: AtomicU64,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelController {
    pub fn new(
        channel: ChannelId,
        config: &ChannelConfig,
        preview_rate_hz: u32,
        transport: Arc<dyn StreamTransport>,
    ) -> Arc<Self> {
        Arc::new(Self {
            channel,
            destination: config.destination.clone(),
            stall_timeout: Duration::from_millis(config.stall_timeout_ms),
            transport,
            slot: LatestSlot::new(),
            state: Mutex::new(ChannelState::Idle),
            counters: ChannelCounters::default(),
            gate: RateGate::new(preview_rate_hz),
            subscribers: Mutex::new(Vec::new()),
            arrivals: AtomicU64::new(0),
            watchdog: Mutex::new(None),
        })
    }

    /// Ask the transport to start this channel and arm the stall watchdog.
    ///
    /// Allowed from Idle and from Error (explicit recovery); recovery
    /// releases the transport side first, since a faulted channel is
    /// usually still bound. A stopped controller refuses, and a
    /// transport-side refusal surfaces without changing state. Must run
    /// inside a tokio runtime.
    pub fn start(self: &Arc<Self>) -> Result<(), StreamStartError> {
        let resuming = {
            let state = lock(&self.state);
            match &*state {
                ChannelState::Streaming => {
                    return Err(StreamStartError::AlreadyActive(self.channel))
                }
                ChannelState::Stopped => return Err(StreamStartError::Stopped(self.channel)),
                ChannelState::Idle => false,
                ChannelState::Error(_) => true,
            }
        };

        // Transport calls may block; never hold the state lock across them.
        if resuming {
            // A stall leaves the channel bound transport-side, which would
            // turn the retry into AlreadyActive. stop_channel is idempotent.
            self.transport.stop_channel(self.channel);
        }
        self.transport.start_channel(self.channel, &self.destination)?;

        *lock(&self.state) = ChannelState::Streaming;
        info!(channel = %self.channel, destination = %self.destination, "channel streaming");
        self.arm_watchdog();
        Ok(())
    }

    /// Transport delivery entry point; never blocks.
    #[instrument(skip_all, fields(channel = %self.channel, sequence = delivery.sequence))]
    pub fn on_frame_ready(&self, delivery: FrameDelivery) {
        self.arrivals.fetch_add(1, Ordering::Relaxed);
        self.counters.record_received();

        {
            let mut state = lock(&self.state);
            match &*state {
                ChannelState::Streaming => {}
                ChannelState::Error(_) => {
                    // Deliveries came back on their own; that is recovery.
                    *state = ChannelState::Streaming;
                    drop(state);
                    info!(channel = %self.channel, "frames resumed, channel streaming again");
                }
                // Torn down; the slot is sealed anyway.
                ChannelState::Stopped => return,
                ChannelState::Idle => {
                    debug!("delivery before start, dropped");
                    return;
                }
            }
        }

        let frame = Frame {
            channel: self.channel,
            sequence: delivery.sequence,
            timestamp: delivery.timestamp,
            width: delivery.width,
            height: delivery.height,
            format: delivery.format,
            data: delivery.data,
            received_at: Instant::now(),
        };

        if frame.data.len() != frame.expected_len() {
            self.counters.record_runt_dropped();
            warn!(
                len = frame.data.len(),
                expected = frame.expected_len(),
                "runt delivery dropped"
            );
            return;
        }

        if !self.slot.publish(frame) {
            // Stale or duplicate block id; the slot only moves forward.
            self.counters.record_stale_dropped();
            metrics::counter!("frames_stale_dropped", "channel" => self.channel.label())
                .increment(1);
            debug!("stale delivery dropped");
            return;
        }
        self.counters.record_published();
        metrics::counter!("frames_published", "channel" => self.channel.label()).increment(1);

        if self.gate.admit(Instant::now()) {
            self.forward_preview();
        }
    }

    /// Seal the slot, tear down the transport side, finish the watchdog.
    /// Idempotent; the last published frame stays readable and frames
    /// already handed to readers stay valid.
    pub fn stop(&self) {
        {
            let mut state = lock(&self.state);
            if *state == ChannelState::Stopped {
                return;
            }
            *state = ChannelState::Stopped;
        }
        self.slot.seal();
        self.transport.stop_channel(self.channel);
        if let Some(handle) = lock(&self.watchdog).take() {
            handle.abort();
        }
        info!(channel = %self.channel, "channel stopped");
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn state(&self) -> ChannelState {
        lock(&self.state).clone()
    }

    /// Newest frame this channel has produced, if any.
    pub fn latest(&self) -> Option<SharedFrame> {
        self.slot.read()
    }

    pub fn stats(&self) -> ChannelStats {
        self.counters.snapshot()
    }

    /// Rate-limited feed of the latest frames. The queue holds one entry;
    /// sending never blocks the delivery path.
    pub fn subscribe_preview(&self) -> flume::Receiver<SharedFrame> {
        let (tx, rx) = flume::bounded(PREVIEW_DEPTH);
        lock(&self.subscribers).push(tx);
        rx
    }

    pub fn set_preview_rate(&self, rate_hz: u32) {
        self.gate.set_rate(rate_hz);
    }

    fn forward_preview(&self) {
        let Some(frame) = self.slot.read() else {
            return;
        };
        metrics::histogram!("preview_latency_us", "channel" => self.channel.label())
            .record(frame.received_at.elapsed().as_micros() as f64);
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| match tx.try_send(Arc::clone(&frame)) {
            Ok(()) => {
                self.counters.record_preview_forwarded();
                true
            }
            Err(flume::TrySendError::Full(_)) => {
                self.counters.record_preview_dropped();
                true
            }
            Err(flume::TrySendError::Disconnected(_)) => false,
        });
    }

    fn arm_watchdog(self: &Arc<Self>) {
        if self.stall_timeout.is_zero() {
            // A zero timeout turns stall detection off for this channel.
            debug!(channel = %self.channel, "stall watchdog disabled");
            return;
        }
        let mut guard = lock(&self.watchdog);
        if guard.is_some() {
            // Still running from a previous start; it resumes checking
            // as soon as the state is Streaming again.
            return;
        }
        let controller = Arc::clone(self);
        *guard = Some(tokio::spawn(async move { controller.watchdog_loop().await }));
    }

    /// Compares the arrival counter across fixed periods. A full period
    /// with no deliveries while Streaming flags the channel stalled;
    /// recovery is a later `start` or spontaneously resumed frames.
    async fn watchdog_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.stall_timeout);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        let mut seen = self.arrivals.load(Ordering::Relaxed);

        loop {
            ticker.tick().await;
            let current = self.arrivals.load(Ordering::Relaxed);
            let mut stalled = false;
            {
                let mut state = lock(&self.state);
                match &*state {
                    ChannelState::Stopped => break,
                    ChannelState::Streaming if current == seen => {
                        *state = ChannelState::Error(STALL_REASON.into());
                        stalled = true;
                    }
                    _ => {}
                }
            }
            if stalled {
                warn!(
                    channel = %self.channel,
                    timeout_ms = self.stall_timeout.as_millis() as u64,
                    "no frames within the stall timeout"
                );
                metrics::counter!("channel_stalls", "channel" => self.channel.label()).increment(1);
            }
            seen = current;
        }
        debug!(channel = %self.channel, "watchdog finished");
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::stream::frame::PixelFormat;
    use crate::transport::testing::FakeTransport;
    use crate::transport::ParamValue;

    fn config(port: u16) -> ChannelConfig {
        ChannelConfig {
            destination: StreamDestination {
                address: "239.192.0.1".into(),
                port,
            },
            stall_timeout_ms: 1_000,
        }
    }

    fn controller(transport: &Arc<FakeTransport>) -> Arc<ChannelController> {
        ChannelController::new(
            ChannelId::Rgb,
            &config(50_010),
            15,
            Arc::clone(transport) as Arc<dyn StreamTransport>,
        )
    }

    fn delivery(sequence: u64) -> FrameDelivery {
        FrameDelivery {
            channel: ChannelId::Rgb,
            sequence,
            timestamp: sequence * 1_000,
            width: 2,
            height: 2,
            format: PixelFormat::Mono8,
            data: Bytes::from(vec![sequence as u8; 4]),
        }
    }

    /// Captures histogram samples; counters and gauges fall through.
    #[derive(Default)]
    struct CapturingRecorder {
        histograms: Arc<Mutex<Vec<(String, f64)>>>,
    }

    struct HistogramLog {
        name: String,
        samples: Arc<Mutex<Vec<(String, f64)>>>,
    }

    impl metrics::HistogramFn for HistogramLog {
        fn record(&self, value: f64) {
            lock(&self.samples).push((self.name.clone(), value));
        }
    }

    impl metrics::Recorder for CapturingRecorder {
        fn describe_counter(
            &self,
            _: metrics::KeyName,
            _: Option<metrics::Unit>,
            _: metrics::SharedString,
        ) {
        }

        fn describe_gauge(
            &self,
            _: metrics::KeyName,
            _: Option<metrics::Unit>,
            _: metrics::SharedString,
        ) {
        }

        fn describe_histogram(
            &self,
            _: metrics::KeyName,
            _: Option<metrics::Unit>,
            _: metrics::SharedString,
        ) {
        }

        fn register_counter(
            &self,
            _: &metrics::Key,
            _: &metrics::Metadata<'_>,
        ) -> metrics::Counter {
            metrics::Counter::noop()
        }

        fn register_gauge(&self, _: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Gauge {
            metrics::Gauge::noop()
        }

        fn register_histogram(
            &self,
            key: &metrics::Key,
            _: &metrics::Metadata<'_>,
        ) -> metrics::Histogram {
            metrics::Histogram::from_arc(Arc::new(HistogramLog {
                name: key.name().to_string(),
                samples: Arc::clone(&self.histograms),
            }))
        }
    }

    #[tokio::test]
    async fn start_transitions_to_streaming() {
        let transport = FakeTransport::new();
        let controller = controller(&transport);
        assert_eq!(controller.state(), ChannelState::Idle);
        controller.start().unwrap();
        assert_eq!(controller.state(), ChannelState::Streaming);
        // A first start has nothing to release.
        assert!(lock(&transport.stops).is_empty());
    }

    #[tokio::test]
    async fn double_start_reports_already_active() {
        let transport = FakeTransport::new();
        let controller = controller(&transport);
        controller.start().unwrap();
        assert!(matches!(
            controller.start(),
            Err(StreamStartError::AlreadyActive(ChannelId::Rgb))
        ));
        assert_eq!(controller.state(), ChannelState::Streaming);
    }

    #[tokio::test]
    async fn unreachable_destination_leaves_idle() {
        let transport = FakeTransport::new();
        let controller = ChannelController::new(
            ChannelId::Rgb,
            &config(0),
            15,
            Arc::clone(&transport) as Arc<dyn StreamTransport>,
        );
        assert!(matches!(
            controller.start(),
            Err(StreamStartError::Unreachable { .. })
        ));
        assert_eq!(controller.state(), ChannelState::Idle);
    }

    #[tokio::test]
    async fn stale_deliveries_are_dropped_silently() {
        let transport = FakeTransport::new();
        let controller = controller(&transport);
        controller.start().unwrap();

        for sequence in [5, 3, 7, 6] {
            controller.on_frame_ready(delivery(sequence));
        }

        assert_eq!(controller.latest().unwrap().sequence, 7);
        let stats = controller.stats();
        assert_eq!(stats.received, 4);
        assert_eq!(stats.published, 2);
        assert_eq!(stats.stale_dropped, 2);
    }

    #[tokio::test]
    async fn runt_payload_is_dropped() {
        let transport = FakeTransport::new();
        let controller = controller(&transport);
        controller.start().unwrap();

        let mut short = delivery(1);
        short.data = Bytes::from(vec![0u8; 3]); // geometry says 4
        controller.on_frame_ready(short);

        assert!(controller.latest().is_none());
        assert_eq!(controller.stats().runt_dropped, 1);
    }

    #[tokio::test]
    async fn deliveries_before_start_are_ignored() {
        let transport = FakeTransport::new();
        let controller = controller(&transport);
        controller.on_frame_ready(delivery(1));
        assert!(controller.latest().is_none());
        assert_eq!(controller.state(), ChannelState::Idle);
    }

    #[tokio::test]
    async fn stop_seals_but_keeps_the_last_frame() {
        let transport = FakeTransport::new();
        let controller = controller(&transport);
        controller.start().unwrap();
        controller.on_frame_ready(delivery(4));

        controller.stop();
        controller.stop(); // idempotent
        assert_eq!(controller.state(), ChannelState::Stopped);
        assert_eq!(lock(&transport.stops).as_slice(), &[ChannelId::Rgb]);

        controller.on_frame_ready(delivery(9));
        let held = controller.latest().unwrap();
        assert_eq!(held.sequence, 4);

        assert!(matches!(
            controller.start(),
            Err(StreamStartError::Stopped(ChannelId::Rgb))
        ));
    }

    #[tokio::test]
    async fn preview_gate_drops_back_to_back_ticks() {
        let transport = FakeTransport::new();
        let controller = controller(&transport);
        let rx = controller.subscribe_preview();
        controller.start().unwrap();

        controller.on_frame_ready(delivery(1));
        controller.on_frame_ready(delivery(2)); // inside the 15/sec window

        let first = rx.try_recv().unwrap();
        assert_eq!(first.sequence, 1);
        assert!(rx.try_recv().is_err());
        assert_eq!(controller.stats().preview_forwarded, 1);
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let transport = FakeTransport::new();
        let controller = controller(&transport);
        let rx = controller.subscribe_preview();
        controller.start().unwrap();
        drop(rx);

        controller.on_frame_ready(delivery(1));
        assert_eq!(controller.stats().preview_forwarded, 0);
        assert_eq!(lock(&controller.subscribers).len(), 0);
    }

    #[tokio::test]
    async fn admitted_preview_records_a_latency_sample() {
        let transport = FakeTransport::new();
        let controller = controller(&transport);
        let _rx = controller.subscribe_preview();
        controller.start().unwrap();

        let recorder = CapturingRecorder::default();
        let histograms = Arc::clone(&recorder.histograms);
        metrics::with_local_recorder(&recorder, || {
            controller.on_frame_ready(delivery(1));
        });

        let samples = lock(&histograms);
        assert!(
            samples
                .iter()
                .any(|(name, value)| name == "preview_latency_us" && *value >= 0.0),
            "no receipt-to-forward latency sample in {samples:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_flags_a_stalled_channel() {
        let transport = FakeTransport::new();
        let controller = controller(&transport);
        controller.start().unwrap();
        tokio::task::yield_now().await;

        controller.on_frame_ready(delivery(1));
        tokio::time::advance(Duration::from_millis(1_100)).await;
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(1_100)).await;
        tokio::task::yield_now().await;

        assert_eq!(
            controller.state(),
            ChannelState::Error(STALL_REASON.into())
        );

        // Frames resuming on their own count as recovery.
        controller.on_frame_ready(delivery(2));
        assert_eq!(controller.state(), ChannelState::Streaming);
        assert_eq!(controller.latest().unwrap().sequence, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_stays_quiet_while_frames_flow() {
        let transport = FakeTransport::new();
        let controller = controller(&transport);
        controller.start().unwrap();
        tokio::task::yield_now().await;

        for sequence in 1..=6u64 {
            controller.on_frame_ready(delivery(sequence));
            tokio::time::advance(Duration::from_millis(600)).await;
            tokio::task::yield_now().await;
        }

        assert_eq!(controller.state(), ChannelState::Streaming);
    }

    #[tokio::test]
    async fn restart_after_stall_goes_back_to_streaming() {
        let transport = FakeTransport::new();
        let controller = controller(&transport);
        controller.start().unwrap();

        // A stall leaves the transport still holding the channel.
        *lock(&controller.state) = ChannelState::Error(STALL_REASON.into());

        controller.start().unwrap();
        assert_eq!(controller.state(), ChannelState::Streaming);
        // The retry released the stale binding before rebinding.
        assert_eq!(lock(&transport.stops).as_slice(), &[ChannelId::Rgb]);

        controller.on_frame_ready(delivery(1));
        assert_eq!(controller.latest().unwrap().sequence, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_stall_timeout_disables_the_watchdog() {
        let transport = FakeTransport::new();
        let config = ChannelConfig {
            destination: StreamDestination {
                address: "239.192.0.1".into(),
                port: 50_010,
            },
            stall_timeout_ms: 0,
        };
        let controller = ChannelController::new(
            ChannelId::Rgb,
            &config,
            15,
            Arc::clone(&transport) as Arc<dyn StreamTransport>,
        );

        controller.start().unwrap();
        assert!(lock(&controller.watchdog).is_none());

        // Silence of any length is not a stall on this channel.
        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;
        assert_eq!(controller.state(), ChannelState::Streaming);

        controller.on_frame_ready(delivery(1));
        assert_eq!(controller.latest().unwrap().sequence, 1);
        controller.stop();
        assert_eq!(controller.state(), ChannelState::Stopped);
    }

    #[test]
    fn fake_transport_parameter_surface_is_inert() {
        let transport = FakeTransport::new();
        assert!(transport.get_parameter("Gain").is_none());
        assert!(!transport.set_parameter("Gain", ParamValue::Float(1.0)));
    }
}

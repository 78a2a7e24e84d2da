use log::{info, warn};
use parking_lot::Mutex as ParkingMutex;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::capture::decoder::PacketDecoder;
use crate::capture::pipeline::{self, PipelineStreams};
use crate::capture::source::PcapSource;
use crate::models::config::Config;
use crate::models::packet::PacketInfo;
use crate::utils::error::{AppError, AppResult};
use crate::ws::{Broadcaster, LiveStats, WsEnvelope};

/// Upper bound on offline analysis runtime
const ANALYZE_TIMEOUT: Duration = Duration::from_secs(30);

/// Packets included verbatim in an analysis response
const ANALYZE_SAMPLE_LIMIT: usize = 100;

/// How often live-capture statistics are pushed to subscribers
const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Result of an offline pcap analysis
#[derive(Debug, Serialize)]
pub struct AnalysisReport {
    pub total_packets: u64,
    pub gateway_packets: u64,
    pub gateway_percentage: f64,
    pub sample_packets: Vec<PacketInfo>,
}

#[derive(Default)]
struct LiveState {
    running: bool,
    cancel: Option<CancellationToken>,
}

/// Coordinator-local capture: offline pcap analysis and a single live
/// session whose gateway traffic is streamed to WebSocket subscribers.
///
/// The decoder, and with it the learned gateway state, is shared between
/// offline and live runs for the life of the coordinator process.
pub struct LiveCaptureService {
    decoder: Arc<ParkingMutex<PacketDecoder>>,
    capturer: ParkingMutex<PcapSource>,
    state: ParkingMutex<LiveState>,
    pub broadcaster: Arc<Broadcaster>,
}

impl LiveCaptureService {
    pub fn new(config: &Config, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            decoder: Arc::new(ParkingMutex::new(PacketDecoder::new(&config.gateway))),
            capturer: ParkingMutex::new(PcapSource::new(config.capture.clone())),
            state: ParkingMutex::new(LiveState::default()),
            broadcaster,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Start the coordinator-local live capture.
    pub fn start(self: &Arc<Self>, interface: &str, filter: Option<&str>) -> AppResult<()> {
        if interface.is_empty() {
            return Err(AppError::InvalidRequest(
                "No network interface specified".to_string(),
            ));
        }

        let mut state = self.state.lock();
        if state.running {
            return Err(AppError::StateConflict(
                "A live capture is already running".to_string(),
            ));
        }

        let streams = {
            let mut capturer = self.capturer.lock();
            if let Some(filter) = filter {
                capturer.update_filter(filter);
            }
            capturer.open_live(interface)?;

            let cancel = CancellationToken::new();
            let source = capturer.take_for_session();
            let streams = pipeline::start(Box::new(source), self.decoder.clone(), cancel.clone());
            state.cancel = Some(cancel);
            streams
        };

        state.running = true;
        drop(state);

        info!("Live capture started on interface {}", interface);
        tokio::spawn(self.clone().process(streams));
        Ok(())
    }

    /// Stop the running live capture.
    pub fn stop(&self) -> AppResult<()> {
        let mut state = self.state.lock();
        if !state.running {
            return Err(AppError::InvalidRequest(
                "No active live capture".to_string(),
            ));
        }

        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
        }
        state.running = false;
        info!("Live capture stopped");
        Ok(())
    }

    async fn process(self: Arc<Self>, mut streams: PipelineStreams) {
        let mut total: u64 = 0;
        let mut gateway: u64 = 0;
        let mut ticker = tokio::time::interval(STATS_INTERVAL);
        ticker.tick().await;

        loop {
            tokio::select! {
                packet = streams.packets.recv() => {
                    let Some(info) = packet else { break };
                    total += 1;
                    if info.is_gateway_traffic {
                        gateway += 1;
                        self.broadcaster.broadcast(&WsEnvelope::Packet {
                            data: info.to_summary(),
                        });
                    }
                }
                error = streams.errors.recv() => {
                    if let Some(err) = error {
                        warn!("Live capture error: {}", err);
                    }
                }
                _ = ticker.tick() => {
                    if total > 0 {
                        self.broadcaster.broadcast(&WsEnvelope::Stats {
                            data: LiveStats {
                                total_packets: total,
                                gateway_packets: gateway,
                                gateway_percentage: percentage(gateway, total),
                                timestamp: chrono::Utc::now(),
                            },
                        });
                    }
                }
            }
        }

        info!(
            "Live capture finished: {} packets, {} gateway-relevant",
            total, gateway
        );
        let mut state = self.state.lock();
        state.running = false;
        state.cancel = None;
    }

    /// Analyze a pcap file, collecting for at most 30 seconds.
    pub async fn analyze_file(self: &Arc<Self>, path: &Path) -> AppResult<AnalysisReport> {
        let mut source = PcapSource::new(self.capturer.lock().config().clone());
        source.open_offline(path)?;

        let cancel = CancellationToken::new();
        let mut streams = pipeline::start(Box::new(source), self.decoder.clone(), cancel.clone());

        let deadline = tokio::time::Instant::now() + ANALYZE_TIMEOUT;
        let mut total: u64 = 0;
        let mut gateway: u64 = 0;
        let mut samples = Vec::new();

        loop {
            match tokio::time::timeout_at(deadline, streams.packets.recv()).await {
                Ok(Some(info)) => {
                    total += 1;
                    if info.is_gateway_traffic {
                        gateway += 1;
                    }
                    if samples.len() < ANALYZE_SAMPLE_LIMIT {
                        samples.push(info);
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!("Analysis timed out after {:?}", ANALYZE_TIMEOUT);
                    cancel.cancel();
                    break;
                }
            }
        }

        Ok(AnalysisReport {
            total_packets: total,
            gateway_packets: gateway,
            gateway_percentage: percentage(gateway, total),
            sample_packets: samples,
        })
    }
}

fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

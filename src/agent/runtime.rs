use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::capture::decoder::PacketDecoder;
use crate::capture::pipeline::{self, PipelineStreams};
use crate::capture::source::{FrameSource, PcapSource};
use crate::models::agent::{AgentState, AgentStatus, CaptureRequest};
use crate::models::config::{AgentConfig, Config};
use crate::models::interface::interface_exists;
use crate::utils::error::{AppError, AppResult};
use crate::ws::{Broadcaster, WsEnvelope};

/// A capture agent: holds the state machine, the capture source, the
/// decoder with its learned gateway state, and the subscriber fan-out.
///
/// All mutation goes through the state-transition methods; handlers only
/// ever see snapshots.
pub struct CaptureAgent {
    cli_config_path: Option<PathBuf>,
    config: RwLock<Config>,
    status: RwLock<AgentStatus>,
    decoder: Arc<Mutex<PacketDecoder>>,
    capturer: Mutex<PcapSource>,
    cancel: Mutex<Option<CancellationToken>>,
    session_dropped: Mutex<Arc<AtomicU64>>,
    pub subscribers: Broadcaster,
    pub(crate) http: reqwest::Client,
}

impl CaptureAgent {
    pub fn new(config: Config, cli_config_path: Option<PathBuf>) -> Arc<Self> {
        let agent_config = config.agent.clone().unwrap_or_default();
        let status = AgentStatus::new(agent_config.name.clone(), agent_config.interface.clone());
        let decoder = PacketDecoder::new(&config.gateway);
        let capturer = PcapSource::new(config.capture.clone());

        Arc::new(Self {
            cli_config_path,
            config: RwLock::new(config),
            status: RwLock::new(status),
            decoder: Arc::new(Mutex::new(decoder)),
            capturer: Mutex::new(capturer),
            cancel: Mutex::new(None),
            session_dropped: Mutex::new(Arc::new(AtomicU64::new(0))),
            subscribers: Broadcaster::new(),
            http: reqwest::Client::new(),
        })
    }

    pub fn agent_config(&self) -> AgentConfig {
        self.config.read().agent.clone().unwrap_or_default()
    }

    pub fn config_snapshot(&self) -> Config {
        self.config.read().clone()
    }

    pub fn status_snapshot(&self) -> AgentStatus {
        let mut status = self.status.read().clone();
        status.packets_dropped = self.session_dropped.lock().load(Ordering::Relaxed);
        status
    }

    pub fn state(&self) -> AgentState {
        self.status.read().status
    }

    /// Open a live capture and launch the session pipeline.
    ///
    /// An empty request interface falls back to the configured one; an
    /// empty filter clears any previously active filter.
    pub fn start_capture(
        self: &Arc<Self>,
        request: CaptureRequest,
    ) -> AppResult<(String, Option<String>)> {
        if self.state() == AgentState::Capturing {
            return Err(AppError::StateConflict(
                "Capture already in progress".to_string(),
            ));
        }

        let interface = request
            .interface
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.agent_config().interface);
        if interface.is_empty() {
            return Err(AppError::InvalidRequest(
                "No interface specified".to_string(),
            ));
        }

        let filter = request.filter.filter(|f| !f.is_empty());

        let source = {
            let mut capturer = self.capturer.lock();
            capturer.update_filter(filter.as_deref().unwrap_or(""));

            if let Err(err) = capturer.open_live(&interface) {
                let mut status = self.status.write();
                status.status = AgentState::Error;
                status.error = Some(err.to_string());
                return Err(err);
            }
            capturer.take_for_session()
        };

        self.config.write().capture.filter = filter.clone().unwrap_or_default();
        self.start_session(Box::new(source), &interface, filter.clone());
        Ok((interface, filter))
    }

    /// Launch the pipeline and consumer for an already-open source.
    ///
    /// Split out from `start_capture` so the state machine can run against
    /// a test double instead of a live pcap handle.
    pub fn start_session(
        self: &Arc<Self>,
        source: Box<dyn FrameSource>,
        interface: &str,
        filter: Option<String>,
    ) {
        let cancel = CancellationToken::new();
        let streams = pipeline::start(source, self.decoder.clone(), cancel.clone());

        *self.cancel.lock() = Some(cancel);
        *self.session_dropped.lock() = streams.dropped.clone();

        {
            let mut status = self.status.write();
            status.status = AgentState::Capturing;
            status.interface = interface.to_string();
            status.packets_captured = 0;
            status.error = None;
            status.active_filter = filter;
        }

        tokio::spawn(self.clone().consume(streams));
    }

    /// Cancel the running capture session.
    pub fn stop_capture(&self) -> AppResult<()> {
        if self.state() != AgentState::Capturing {
            return Err(AppError::InvalidRequest(
                "No active capture to stop".to_string(),
            ));
        }

        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }

        let mut status = self.status.write();
        status.status = AgentState::Idle;
        status.active_filter = None;
        Ok(())
    }

    /// Switch the configured capture interface, persisting the change.
    /// Does not touch a session in progress.
    pub fn set_interface(&self, interface: &str) -> AppResult<()> {
        if !interface_exists(interface) {
            return Err(AppError::UnknownInterface(interface.to_string()));
        }

        {
            let mut config = self.config.write();
            config.capture.interface = interface.to_string();
            match config.agent.as_mut() {
                Some(agent) => agent.interface = interface.to_string(),
                None => {
                    config.agent = Some(AgentConfig {
                        interface: interface.to_string(),
                        ..Default::default()
                    })
                }
            }
        }

        self.status.write().interface = interface.to_string();
        self.capturer.lock().update_interface(interface);

        if let Err(err) = self.save_config() {
            warn!(
                "Could not persist configuration after interface change: {}",
                err
            );
        }
        Ok(())
    }

    /// Persist the current configuration through the fallback path chain.
    pub fn save_config(&self) -> AppResult<PathBuf> {
        let config = self.config_snapshot();
        config.save_with_fallback(
            self.cli_config_path.as_deref(),
            &crate::models::config::executable_dir(),
        )
    }

    /// Replace the agent settings (admin surface) without touching capture
    /// or gateway configuration.
    pub fn update_agent_config(&self, updated: AgentConfig) {
        let mut config = self.config.write();
        config.agent = Some(updated.clone());
        drop(config);
        self.status.write().name = updated.name;
    }

    pub(crate) fn enter_error_state(&self, message: String) {
        let mut status = self.status.write();
        status.status = AgentState::Error;
        status.error = Some(message);
    }

    /// A successful registration clears a previous error; a capture in
    /// progress stays untouched.
    pub(crate) fn clear_error_state(&self) {
        let mut status = self.status.write();
        if status.status == AgentState::Error {
            status.status = AgentState::Idle;
        }
        status.error = None;
    }

    pub(crate) fn touch_heartbeat(&self) {
        self.status.write().last_heartbeat = chrono::Utc::now();
    }

    /// Drain the session streams: count packets, stream gateway-relevant
    /// summaries to subscribers, record capture errors.
    async fn consume(self: Arc<Self>, streams: PipelineStreams) {
        let PipelineStreams {
            mut packets,
            mut errors,
            ..
        } = streams;

        let error_sink = self.clone();
        tokio::spawn(async move {
            while let Some(err) = errors.recv().await {
                warn!("Capture error: {}", err);
                error_sink.status.write().error = Some(err.to_string());
            }
        });

        while let Some(info) = packets.recv().await {
            self.status.write().packets_captured += 1;

            if info.is_gateway_traffic {
                self.subscribers.broadcast(&WsEnvelope::Packet {
                    data: info.to_summary(),
                });
            }
        }

        debug!("Packet consumer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::source::RawFrame;
    use chrono::Utc;
    use pnet::packet::ethernet::{EtherTypes, MutableEthernetPacket};
    use pnet::packet::ip::IpNextHeaderProtocols;
    use pnet::packet::ipv4::MutableIpv4Packet;
    use pnet::util::MacAddr;
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    struct ScriptedSource {
        frames: VecDeque<RawFrame>,
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> AppResult<Option<RawFrame>> {
            Ok(self.frames.pop_front())
        }
    }

    fn plain_frames(count: usize) -> Box<ScriptedSource> {
        let frames = (0..count)
            .map(|_| RawFrame {
                data: vec![0u8; 14],
                timestamp: Utc::now(),
                wire_length: 60,
            })
            .collect();
        Box::new(ScriptedSource { frames })
    }

    fn icmp_frame_to(dst: Ipv4Addr) -> RawFrame {
        let icmp = [8u8, 0, 0, 0, 0, 0, 0, 0];
        let mut ip_buf = vec![0u8; 20 + icmp.len()];
        let mut ip = MutableIpv4Packet::new(&mut ip_buf).unwrap();
        ip.set_version(4);
        ip.set_header_length(5);
        ip.set_total_length((20 + icmp.len()) as u16);
        ip.set_ttl(64);
        ip.set_next_level_protocol(IpNextHeaderProtocols::Icmp);
        ip.set_source(Ipv4Addr::new(192, 168, 1, 50));
        ip.set_destination(dst);
        ip.set_payload(&icmp);

        let mut buf = vec![0u8; 14 + ip_buf.len()];
        let mut eth = MutableEthernetPacket::new(&mut buf).unwrap();
        eth.set_destination(MacAddr::broadcast());
        eth.set_source(MacAddr::new(2, 0, 0, 0, 0, 1));
        eth.set_ethertype(EtherTypes::Ipv4);
        eth.set_payload(&ip_buf);

        RawFrame {
            data: buf,
            timestamp: Utc::now(),
            wire_length: 42,
        }
    }

    fn agent() -> Arc<CaptureAgent> {
        let mut config = Config::default();
        config.agent = Some(AgentConfig {
            name: "test-agent".to_string(),
            ..Default::default()
        });
        config.gateway.known_gateways = vec!["10.0.0.1".to_string()];
        CaptureAgent::new(config, None)
    }

    async fn wait_until(mut predicate: impl FnMut() -> bool) {
        for _ in 0..200 {
            if predicate() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn session_counts_packets_and_returns_to_idle() {
        let agent = agent();
        agent.start_session(plain_frames(10), "eth0", None);
        assert_eq!(agent.state(), AgentState::Capturing);

        wait_until(|| agent.status_snapshot().packets_captured == 10).await;

        agent.stop_capture().unwrap();
        let status = agent.status_snapshot();
        assert_eq!(status.status, AgentState::Idle);
        assert!(status.active_filter.is_none());
    }

    #[tokio::test]
    async fn restart_resets_the_packet_counter() {
        let agent = agent();
        agent.start_session(plain_frames(5), "eth0", None);
        wait_until(|| agent.status_snapshot().packets_captured == 5).await;
        agent.stop_capture().unwrap();

        agent.start_session(plain_frames(2), "eth0", Some("udp".to_string()));
        let status = agent.status_snapshot();
        assert_eq!(status.status, AgentState::Capturing);
        assert_eq!(status.active_filter.as_deref(), Some("udp"));
        wait_until(|| agent.status_snapshot().packets_captured == 2).await;
    }

    #[tokio::test]
    async fn stop_without_capture_is_rejected() {
        let agent = agent();
        assert!(matches!(
            agent.stop_capture(),
            Err(AppError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn start_while_capturing_conflicts() {
        let agent = agent();
        agent.start_session(plain_frames(1000), "eth0", None);

        let result = agent.start_capture(CaptureRequest {
            interface: Some("eth0".to_string()),
            filter: None,
        });
        assert!(matches!(result, Err(AppError::StateConflict(_))));
    }

    #[tokio::test]
    async fn start_capture_requires_an_interface() {
        let agent = agent();
        let result = agent.start_capture(CaptureRequest::default());
        assert!(matches!(result, Err(AppError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn gateway_packets_reach_subscribers() {
        let agent = agent();
        let (_id, mut rx) = agent.subscribers.subscribe();

        // Destination 10.0.0.1 is a configured known gateway
        let frames = VecDeque::from(vec![icmp_frame_to(Ipv4Addr::new(10, 0, 0, 1))]);
        agent.start_session(Box::new(ScriptedSource { frames }), "eth0", None);

        let text = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(text.contains("\"type\":\"packet\""));
        assert!(text.contains("\"is_gateway_traffic\":true"));
        assert!(text.contains("ICMP"));
    }

    #[tokio::test]
    async fn non_gateway_packets_are_not_broadcast() {
        let agent = agent();
        let (_id, mut rx) = agent.subscribers.subscribe();

        agent.start_session(plain_frames(5), "eth0", None);
        wait_until(|| agent.status_snapshot().packets_captured == 5).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn decode_errors_surface_in_status_without_state_change() {
        let agent = agent();
        let frames = VecDeque::from(vec![RawFrame {
            data: vec![0u8; 4],
            timestamp: Utc::now(),
            wire_length: 4,
        }]);
        agent.start_session(Box::new(ScriptedSource { frames }), "eth0", None);

        wait_until(|| agent.status_snapshot().error.is_some()).await;
        assert_eq!(agent.state(), AgentState::Capturing);
    }

    #[tokio::test]
    async fn registration_outcome_drives_error_state() {
        let agent = agent();
        agent.enter_error_state("registration failed".to_string());
        assert_eq!(agent.state(), AgentState::Error);

        agent.clear_error_state();
        let status = agent.status_snapshot();
        assert_eq!(status.status, AgentState::Idle);
        assert!(status.error.is_none());
    }

    #[tokio::test]
    async fn registration_failure_does_not_stop_a_capture() {
        let agent = agent();
        agent.start_session(plain_frames(1000), "eth0", None);

        agent.enter_error_state("coordinator unreachable".to_string());
        assert_eq!(agent.state(), AgentState::Error);

        agent.clear_error_state();
        // Error cleared, but the session was never cancelled
        assert!(agent.cancel.lock().is_some());
    }
}

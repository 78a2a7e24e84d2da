use chrono::{DateTime, Utc};
use log::{info, warn};
use pcap::{Active, Capture, Offline};
use std::path::Path;

use crate::models::config::CaptureConfig;
use crate::models::interface::is_bridge_interface;
use crate::utils::error::{AppError, AppResult};

/// Bridge interfaces need at least this much kernel buffer
const BRIDGE_MIN_BUFFER: i32 = 8 * 1024 * 1024;

/// One captured link-layer frame
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    /// On-wire length, which may exceed the captured length
    pub wire_length: u32,
}

/// Source of raw frames for the capture pipeline.
///
/// `Ok(None)` means the source is exhausted (offline EOF). Implementations
/// other than the pcap one exist only in tests.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> AppResult<Option<RawFrame>>;
}

enum Handle {
    Offline(Capture<Offline>),
    Live(Capture<Active>),
}

/// pcap-backed capture source holding at most one open handle.
pub struct PcapSource {
    config: CaptureConfig,
    handle: Option<Handle>,
}

impl PcapSource {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            handle: None,
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Point the configuration at a different interface. Does not affect
    /// an already-open handle.
    pub fn update_interface(&mut self, interface: &str) {
        self.config.interface = interface.to_string();
    }

    /// Replace the BPF filter in the configuration snapshot.
    pub fn update_filter(&mut self, filter: &str) {
        self.config.filter = filter.to_string();
    }

    /// Open a pcap/pcapng file for reading, replacing any open handle.
    pub fn open_offline(&mut self, path: &Path) -> AppResult<()> {
        let mut capture = Capture::from_file(path).map_err(|err| {
            AppError::CaptureOpen(format!("cannot open {}: {}", path.display(), err))
        })?;

        if !self.config.filter.is_empty() {
            capture.filter(&self.config.filter, true).map_err(|err| {
                AppError::CaptureOpen(format!(
                    "BPF filter '{}' rejected: {}",
                    self.config.filter, err
                ))
            })?;
        }

        self.handle = Some(Handle::Offline(capture));
        Ok(())
    }

    /// Open a live capture on the named interface, replacing any open
    /// handle.
    ///
    /// Bridge interfaces force promiscuous mode, raise the buffer to at
    /// least 8 MiB and attempt immediate delivery; when activation with
    /// immediate mode fails it is retried without, with a warning.
    pub fn open_live(&mut self, interface: &str) -> AppResult<()> {
        let is_bridge = is_bridge_interface(interface);
        let (promisc, buffer_size) = effective_live_params(&self.config, is_bridge);

        if is_bridge {
            info!(
                "Bridge interface detected: {} (forcing promiscuous mode, buffer {} bytes)",
                interface, buffer_size
            );
        }

        let mut capture =
            match Self::activate(interface, promisc, self.config.snap_len, buffer_size, is_bridge)
            {
                Ok(capture) => capture,
                Err(err) if is_bridge => {
                    warn!(
                        "Immediate mode could not be enabled on {}: {}",
                        interface, err
                    );
                    Self::activate(interface, promisc, self.config.snap_len, buffer_size, false)
                        .map_err(|err| {
                            AppError::CaptureOpen(format!(
                                "cannot open interface {}: {}",
                                interface, err
                            ))
                        })?
                }
                Err(err) => {
                    return Err(AppError::CaptureOpen(format!(
                        "cannot open interface {}: {}",
                        interface, err
                    )))
                }
            };

        if !self.config.filter.is_empty() {
            capture.filter(&self.config.filter, true).map_err(|err| {
                AppError::CaptureOpen(format!(
                    "BPF filter '{}' rejected: {}",
                    self.config.filter, err
                ))
            })?;
        }

        info!(
            "Live capture opened on {} (promisc: {}, snaplen: {}, buffer: {})",
            interface, promisc, self.config.snap_len, buffer_size
        );

        self.config.interface = interface.to_string();
        self.handle = Some(Handle::Live(capture));
        Ok(())
    }

    fn activate(
        interface: &str,
        promisc: bool,
        snap_len: i32,
        buffer_size: i32,
        immediate: bool,
    ) -> Result<Capture<Active>, pcap::Error> {
        // Timeout 0 blocks forever; the pipeline relies on cancellation
        let mut inactive = Capture::from_device(interface)?
            .promisc(promisc)
            .snaplen(snap_len)
            .buffer_size(buffer_size)
            .timeout(0);

        if immediate {
            inactive = inactive.immediate_mode(true);
        }

        inactive.open()
    }

    /// Move the opened handle out for a capture session, leaving this
    /// source closed with the same configuration.
    pub fn take_for_session(&mut self) -> PcapSource {
        let config = self.config.clone();
        std::mem::replace(self, PcapSource::new(config))
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn close(&mut self) {
        self.handle = None;
    }
}

impl FrameSource for PcapSource {
    fn next_frame(&mut self) -> AppResult<Option<RawFrame>> {
        let handle = self.handle.as_mut().ok_or(AppError::HandleNotOpen)?;

        loop {
            let result = match handle {
                Handle::Offline(capture) => capture.next_packet(),
                Handle::Live(capture) => capture.next_packet(),
            };

            match result {
                Ok(packet) => {
                    let timestamp = DateTime::from_timestamp(
                        packet.header.ts.tv_sec as i64,
                        (packet.header.ts.tv_usec as u32).saturating_mul(1000),
                    )
                    .unwrap_or_else(Utc::now);

                    return Ok(Some(RawFrame {
                        data: packet.data.to_vec(),
                        timestamp,
                        wire_length: packet.header.len,
                    }));
                }
                Err(pcap::Error::NoMorePackets) => return Ok(None),
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Effective promiscuous flag and buffer size for a live open.
fn effective_live_params(config: &CaptureConfig, is_bridge: bool) -> (bool, i32) {
    if is_bridge {
        (true, config.buffer_size.max(BRIDGE_MIN_BUFFER))
    } else {
        (config.promisc_mode, config.buffer_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CaptureConfig {
        CaptureConfig {
            promisc_mode: false,
            buffer_size: 1024 * 1024,
            ..Default::default()
        }
    }

    #[test]
    fn bridge_forces_promisc_and_min_buffer() {
        let (promisc, buffer) = effective_live_params(&config(), true);
        assert!(promisc);
        assert_eq!(buffer, BRIDGE_MIN_BUFFER);
    }

    #[test]
    fn bridge_keeps_larger_configured_buffer() {
        let mut cfg = config();
        cfg.buffer_size = 16 * 1024 * 1024;
        let (_, buffer) = effective_live_params(&cfg, true);
        assert_eq!(buffer, 16 * 1024 * 1024);
    }

    #[test]
    fn non_bridge_uses_configured_params() {
        let (promisc, buffer) = effective_live_params(&config(), false);
        assert!(!promisc);
        assert_eq!(buffer, 1024 * 1024);
    }

    #[test]
    fn read_without_open_handle_fails() {
        let mut source = PcapSource::new(config());
        assert!(matches!(
            source.next_frame(),
            Err(AppError::HandleNotOpen)
        ));
    }

    #[test]
    fn update_interface_touches_only_config() {
        let mut source = PcapSource::new(config());
        source.update_interface("eth1");
        assert_eq!(source.config().interface, "eth1");
        assert!(!source.is_open());
    }

    #[test]
    fn take_for_session_leaves_closed_source_with_same_config() {
        let mut source = PcapSource::new(config());
        source.update_interface("br0");

        let taken = source.take_for_session();
        assert_eq!(taken.config().interface, "br0");
        assert_eq!(source.config().interface, "br0");
        assert!(!source.is_open());
    }

    #[test]
    fn open_offline_missing_file_is_a_capture_open_error() {
        let mut source = PcapSource::new(config());
        let result = source.open_offline(Path::new("/nonexistent/trace.pcap"));
        assert!(matches!(result, Err(AppError::CaptureOpen(_))));
    }
}

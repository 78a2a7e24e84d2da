use log::{debug, error};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::capture::decoder::PacketDecoder;
use crate::capture::source::FrameSource;
use crate::models::packet::PacketInfo;
use crate::utils::error::AppError;

/// Bounded capacity of the packet stream
pub const PACKET_CHANNEL_CAPACITY: usize = 1000;

/// Bounded capacity of the error stream
pub const ERROR_CHANNEL_CAPACITY: usize = 10;

/// Consecutive read failures tolerated before the producer gives up
const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Receiving ends of a running capture session.
///
/// Both streams close when the producer exits: on cancellation, source
/// exhaustion, or a fatal read error.
pub struct PipelineStreams {
    pub packets: mpsc::Receiver<PacketInfo>,
    pub errors: mpsc::Receiver<AppError>,
    /// Packets discarded because the packet stream was full
    pub dropped: Arc<AtomicU64>,
    pub producer: JoinHandle<()>,
}

/// Start the capture pipeline: a blocking producer reads frames from the
/// source, decodes them, and forwards the results without ever blocking on
/// a slow consumer. Full channels drop, cancellation is checked between
/// frames.
pub fn start(
    mut source: Box<dyn FrameSource>,
    decoder: Arc<Mutex<PacketDecoder>>,
    cancel: CancellationToken,
) -> PipelineStreams {
    let (packet_tx, packet_rx) = mpsc::channel(PACKET_CHANNEL_CAPACITY);
    let (error_tx, error_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_in_producer = dropped.clone();

    let producer = tokio::task::spawn_blocking(move || {
        let mut consecutive_errors = 0u32;

        loop {
            if cancel.is_cancelled() {
                debug!("Capture cancelled, stopping producer");
                break;
            }

            match source.next_frame() {
                Ok(Some(frame)) => {
                    consecutive_errors = 0;

                    match decoder.lock().analyze(&frame) {
                        Ok(info) => match packet_tx.try_send(info) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                dropped_in_producer.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(TrySendError::Closed(_)) => {
                                debug!("Packet stream consumer gone, stopping producer");
                                break;
                            }
                        },
                        Err(err) => {
                            // Decode failures are reported, never fatal
                            let _ = error_tx.try_send(err);
                        }
                    }
                }
                Ok(None) => {
                    debug!("Capture source exhausted");
                    break;
                }
                Err(AppError::HandleNotOpen) => {
                    let _ = error_tx.try_send(AppError::HandleNotOpen);
                    break;
                }
                Err(err) => {
                    let _ = error_tx.try_send(err);
                    consecutive_errors += 1;
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        error!(
                            "Too many consecutive capture errors ({}), stopping capture",
                            consecutive_errors
                        );
                        break;
                    }
                }
            }
        }
    });

    PipelineStreams {
        packets: packet_rx,
        errors: error_rx,
        dropped,
        producer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::source::RawFrame;
    use crate::models::config::GatewayConfig;
    use crate::models::packet::Protocol;
    use chrono::Utc;
    use std::collections::VecDeque;

    /// Test double replaying a fixed frame list, then EOF.
    struct ScriptedSource {
        frames: VecDeque<RawFrame>,
    }

    impl ScriptedSource {
        fn new(frames: Vec<RawFrame>) -> Self {
            Self {
                frames: frames.into(),
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> crate::utils::error::AppResult<Option<RawFrame>> {
            Ok(self.frames.pop_front())
        }
    }

    /// Source that produces frames until cancelled externally.
    struct EndlessSource;

    impl FrameSource for EndlessSource {
        fn next_frame(&mut self) -> crate::utils::error::AppResult<Option<RawFrame>> {
            std::thread::sleep(std::time::Duration::from_micros(100));
            Ok(Some(plain_frame(64)))
        }
    }

    /// Source whose reads always fail.
    struct FailingSource;

    impl FrameSource for FailingSource {
        fn next_frame(&mut self) -> crate::utils::error::AppResult<Option<RawFrame>> {
            Err(AppError::CaptureOpen("device vanished".to_string()))
        }
    }

    fn plain_frame(wire_length: u32) -> RawFrame {
        // 14 zero bytes parse as Ethernet with an unknown EtherType
        RawFrame {
            data: vec![0u8; 14],
            timestamp: Utc::now(),
            wire_length,
        }
    }

    fn short_frame() -> RawFrame {
        RawFrame {
            data: vec![0u8; 4],
            timestamp: Utc::now(),
            wire_length: 4,
        }
    }

    fn decoder() -> Arc<Mutex<PacketDecoder>> {
        Arc::new(Mutex::new(PacketDecoder::new(&GatewayConfig::default())))
    }

    #[tokio::test]
    async fn packets_arrive_in_capture_order() {
        let frames: Vec<_> = (1..=50).map(plain_frame).collect();
        let mut streams = start(
            Box::new(ScriptedSource::new(frames)),
            decoder(),
            CancellationToken::new(),
        );

        let mut lengths = Vec::new();
        while let Some(info) = streams.packets.recv().await {
            assert_eq!(info.protocol, Protocol::Unknown);
            lengths.push(info.length);
        }
        assert_eq!(lengths, (1..=50).collect::<Vec<u32>>());
        streams.producer.await.unwrap();
    }

    #[tokio::test]
    async fn full_packet_channel_drops_without_blocking() {
        let extra = 25;
        let frames: Vec<_> = (0..(PACKET_CHANNEL_CAPACITY + extra))
            .map(|_| plain_frame(60))
            .collect();

        let mut streams = start(
            Box::new(ScriptedSource::new(frames)),
            decoder(),
            CancellationToken::new(),
        );

        // Do not consume until the producer has finished
        streams.producer.await.unwrap();
        assert_eq!(streams.dropped.load(Ordering::Relaxed), extra as u64);

        let mut received = 0;
        while streams.packets.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, PACKET_CHANNEL_CAPACITY);
    }

    #[tokio::test]
    async fn decode_failures_go_to_error_stream_only() {
        let frames = vec![short_frame(), plain_frame(42), short_frame()];
        let mut streams = start(
            Box::new(ScriptedSource::new(frames)),
            decoder(),
            CancellationToken::new(),
        );

        let mut packets = 0;
        while streams.packets.recv().await.is_some() {
            packets += 1;
        }
        assert_eq!(packets, 1);

        let mut errors = 0;
        while let Ok(err) = streams.errors.try_recv() {
            assert!(matches!(err, AppError::Decode(_)));
            errors += 1;
        }
        assert_eq!(errors, 2);
    }

    #[tokio::test]
    async fn cancellation_closes_both_streams() {
        let cancel = CancellationToken::new();
        let mut streams = start(Box::new(EndlessSource), decoder(), cancel.clone());

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();
        streams.producer.await.unwrap();

        // Drain whatever was buffered, then both streams must be closed
        while streams.packets.try_recv().is_ok() {}
        assert!(streams.packets.recv().await.is_none());
        assert!(streams.errors.recv().await.is_none());
    }

    #[tokio::test]
    async fn persistent_read_errors_stop_the_producer() {
        let mut streams = start(Box::new(FailingSource), decoder(), CancellationToken::new());

        streams.producer.await.unwrap();
        assert!(streams.packets.recv().await.is_none());

        let mut errors = 0;
        while streams.errors.try_recv().is_ok() {
            errors += 1;
        }
        assert_eq!(errors, MAX_CONSECUTIVE_ERRORS as usize);
    }
}

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use mjpeg_relay_common::config::PublishConfig;
use mjpeg_relay_common::frame::VideoFrame;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Write-only sink for published frames.
///
/// Fire-and-forget: implementations apply their own queueing and drop policy
/// and never report failure to the caller.
pub trait Publisher {
    fn publish(&mut self, frame: VideoFrame);
}

/// Delivers one frame to its destination and waits for the outcome.
pub trait FrameSink: Send + 'static {
    fn deliver(
        &mut self,
        frame: &VideoFrame,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to create Kafka producer: {0}")]
    Create(String),
    #[error("failed to deliver frame: {0}")]
    Delivery(#[from] KafkaError),
}

pub fn create_producer(brokers: &str, compression: &str) -> Result<FutureProducer, PublishError> {
    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        // raw BGR frames: 1280x720 is ~2.7 MB
        .set("message.max.bytes", "16777216")
        .set("compression.type", compression)
        .set("linger.ms", "0")
        .set("request.timeout.ms", "5000")
        // undelivered frames expire after 10s
        .set("message.timeout.ms", "10000")
        .create()
        .map_err(|e| PublishError::Create(e.to_string()))?;
    Ok(producer)
}

/// Produces frames to a Kafka topic, one message per frame.
pub struct KafkaSink {
    producer: FutureProducer,
    topic: String,
}

impl KafkaSink {
    pub fn new(config: &PublishConfig) -> Result<Self, PublishError> {
        Ok(Self {
            producer: create_producer(&config.brokers, &config.compression)?,
            topic: config.topic.clone(),
        })
    }
}

impl FrameSink for KafkaSink {
    async fn deliver(&mut self, frame: &VideoFrame) -> Result<(), PublishError> {
        let payload = frame.serialize();
        let key = frame.publish_key();
        let record = FutureRecord::to(&self.topic).key(&key).payload(&payload);

        match self.producer.send(record, Duration::from_secs(5)).await {
            Ok(_) => Ok(()),
            Err((e, _)) => Err(PublishError::Delivery(e)),
        }
    }
}

/// Depth-1 publish channel: holds only the newest undelivered frame.
///
/// `publish` overwrites the slot and returns at once. A background task
/// delivers whatever the slot holds once the previous delivery completes, so
/// a frame still waiting when a newer one arrives is dropped.
pub struct LatestFramePublisher {
    slot: watch::Sender<Option<Arc<VideoFrame>>>,
    delivery: JoinHandle<()>,
}

impl LatestFramePublisher {
    /// Start the delivery task. Must be called within a tokio runtime.
    pub fn spawn<K: FrameSink>(sink: K) -> Self {
        let (slot, pending) = watch::channel(None);
        let delivery = tokio::spawn(deliver_latest(sink, pending));
        Self { slot, delivery }
    }

    /// Stop accepting frames, deliver the last pending one and wait for the
    /// delivery task to finish.
    pub async fn close(self) {
        let Self { slot, delivery } = self;
        drop(slot);
        if let Err(e) = delivery.await {
            warn!(error = %e, "frame delivery task failed");
        }
    }
}

impl Publisher for LatestFramePublisher {
    fn publish(&mut self, frame: VideoFrame) {
        self.slot.send_replace(Some(Arc::new(frame)));
    }
}

async fn deliver_latest<K: FrameSink>(
    mut sink: K,
    mut pending: watch::Receiver<Option<Arc<VideoFrame>>>,
) {
    // an unseen value is still reported after the sender is dropped
    while pending.changed().await.is_ok() {
        let Some(frame) = pending.borrow_and_update().clone() else {
            continue;
        };
        match sink.deliver(&frame).await {
            Ok(()) => debug!(seq = frame.seq, "frame delivered"),
            Err(e) => warn!(error = %e, seq = frame.seq, "failed to deliver frame"),
        }
    }
    debug!("publish channel closed");
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_log::capture_levels;
    use mjpeg_relay_common::frame::PixelEncoding;
    use rdkafka::mocking::MockCluster;
    use rdkafka::types::RDKafkaErrorCode;
    use std::sync::Mutex;
    use tokio::sync::Semaphore;
    use tracing::Level;

    fn publish_config(brokers: &str, compression: &str) -> PublishConfig {
        PublishConfig {
            brokers: brokers.into(),
            topic: "camera.image_raw".into(),
            frame_id: "camera".into(),
            compression: compression.into(),
        }
    }

    fn frame(seq: u64) -> VideoFrame {
        VideoFrame::new(2, 2, PixelEncoding::Bgr8, vec![0; 12], 1708300000000, seq, "camera")
            .unwrap()
    }

    /// Records delivery attempts; each delivery waits for a permit from `gate`
    /// and fails when `fail` is set.
    struct MemorySink {
        attempted: Arc<Mutex<Vec<u64>>>,
        delivered: Arc<Mutex<Vec<u64>>>,
        gate: Arc<Semaphore>,
        fail: bool,
    }

    impl MemorySink {
        fn new(gate: Arc<Semaphore>, fail: bool) -> Self {
            Self {
                attempted: Arc::default(),
                delivered: Arc::default(),
                gate,
                fail,
            }
        }
    }

    impl FrameSink for MemorySink {
        async fn deliver(&mut self, frame: &VideoFrame) -> Result<(), PublishError> {
            self.attempted.lock().unwrap().push(frame.seq);
            self.gate.acquire().await.unwrap().forget();
            if self.fail {
                return Err(PublishError::Delivery(KafkaError::MessageProduction(
                    RDKafkaErrorCode::MessageSizeTooLarge,
                )));
            }
            self.delivered.lock().unwrap().push(frame.seq);
            Ok(())
        }
    }

    async fn wait_for_attempts(attempted: &Mutex<Vec<u64>>, n: usize) {
        while attempted.lock().unwrap().len() < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn rapid_publishes_deliver_only_newest() {
        let sink = MemorySink::new(Arc::new(Semaphore::new(100)), false);
        let delivered = sink.delivered.clone();
        let mut publisher = LatestFramePublisher::spawn(sink);

        for seq in 0..3 {
            publisher.publish(frame(seq));
        }
        publisher.close().await;

        assert_eq!(*delivered.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn newer_frame_replaces_waiting_one_while_delivery_in_flight() {
        let gate = Arc::new(Semaphore::new(0));
        let sink = MemorySink::new(gate.clone(), false);
        let attempted = sink.attempted.clone();
        let delivered = sink.delivered.clone();
        let mut publisher = LatestFramePublisher::spawn(sink);

        publisher.publish(frame(0));
        wait_for_attempts(&attempted, 1).await;
        // frame 0 is in flight; 1 waits in the slot and is overwritten by 2
        publisher.publish(frame(1));
        publisher.publish(frame(2));
        gate.add_permits(10);
        publisher.close().await;

        assert_eq!(*attempted.lock().unwrap(), vec![0, 2]);
        assert_eq!(*delivered.lock().unwrap(), vec![0, 2]);
    }

    #[tokio::test]
    async fn failed_delivery_is_logged_and_next_frame_still_sent() {
        let (events, _guard) = capture_levels();
        let gate = Arc::new(Semaphore::new(100));
        let sink = MemorySink::new(gate, true);
        let attempted = sink.attempted.clone();
        let mut publisher = LatestFramePublisher::spawn(sink);

        publisher.publish(frame(0));
        wait_for_attempts(&attempted, 1).await;
        publisher.publish(frame(1));
        publisher.close().await;

        assert_eq!(*attempted.lock().unwrap(), vec![0, 1]);
        assert_eq!(events.get(Level::WARN), 2);
        assert_eq!(events.get(Level::ERROR), 0);
    }

    #[tokio::test]
    async fn close_without_frames_returns() {
        let sink = MemorySink::new(Arc::new(Semaphore::new(0)), false);
        let attempted = sink.attempted.clone();
        LatestFramePublisher::spawn(sink).close().await;
        assert!(attempted.lock().unwrap().is_empty());
    }

    #[test]
    fn rejects_unknown_compression() {
        let result = KafkaSink::new(&publish_config("127.0.0.1:1", "bogus"));
        assert!(matches!(result, Err(PublishError::Create(_))));
    }

    #[tokio::test]
    async fn kafka_sink_delivers_to_broker() {
        let cluster = MockCluster::new(1).unwrap();
        cluster.create_topic("camera.image_raw", 1, 1).unwrap();
        let mut sink = KafkaSink::new(&publish_config(&cluster.bootstrap_servers(), "none")).unwrap();

        sink.deliver(&frame(0)).await.unwrap();
    }
}

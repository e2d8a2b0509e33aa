use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::OutboxMessage;

/// What a consumer receives: identity, routing key, JSON body, correlation id.
#[derive(Debug, Clone, Copy)]
pub struct BrokerMessage<'a> {
    pub id: Uuid,
    pub routing_key: &'a str,
    pub payload: &'a str,
    pub correlation_id: Option<&'a str>,
}

impl OutboxMessage {
    pub fn envelope(&self) -> BrokerMessage<'_> {
        BrokerMessage {
            id: self.id,
            routing_key: &self.message_type,
            payload: &self.payload,
            correlation_id: self.correlation_id.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum PublishError {
    #[error("broker rejected message: {0}")]
    Rejected(String),

    #[error("broker unavailable: {0}")]
    Transport(String),
}

#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(&self, message: &BrokerMessage<'_>) -> Result<(), PublishError>;
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub topic: String,
    pub partitions: i32,
    pub replication: i32,
    pub message_timeout: Duration,
    pub queue_timeout: Duration,
}

/// Owns the single producer used to reach Kafka.
///
/// The producer is created lazily and dropped after any failure, so the
/// next publish starts from a fresh connection. The mutex makes sure only
/// one caller performs the handshake at a time.
pub struct KafkaBroker {
    config: KafkaConfig,
    producer: Mutex<ProducerSlot>,
}

/// The live producer, tagged with the connection it came from so a late
/// cleanup cannot drop a newer one.
#[derive(Default)]
struct ProducerSlot {
    generation: u64,
    producer: Option<FutureProducer>,
}

impl ProducerSlot {
    fn install(&mut self, producer: FutureProducer) -> u64 {
        self.generation += 1;
        self.producer = Some(producer);
        self.generation
    }

    fn release(&mut self, generation: u64) -> Option<FutureProducer> {
        if self.generation == generation {
            self.producer.take()
        } else {
            None
        }
    }
}

impl KafkaBroker {
    pub fn new(config: KafkaConfig) -> Self {
        Self {
            config,
            producer: Mutex::new(ProducerSlot::default()),
        }
    }

    /// Returns the live producer, connecting and declaring the topic first
    /// if there is none.
    pub async fn ensure_connected(&self) -> Result<FutureProducer, PublishError> {
        self.connection().await.map(|(_, producer)| producer)
    }

    async fn connection(&self) -> Result<(u64, FutureProducer), PublishError> {
        let mut slot = self.producer.lock().await;
        if let Some(producer) = slot.producer.as_ref() {
            return Ok((slot.generation, producer.clone()));
        }

        info!(brokers = %self.config.brokers, "Connecting to Kafka...");
        let producer = self.connect().await.map_err(|e| {
            error!("Could not connect to Kafka: {}", e);
            e
        })?;
        let generation = slot.install(producer.clone());
        info!(topic = %self.config.topic, generation, "Connected to Kafka");
        Ok((generation, producer))
    }

    async fn connect(&self) -> Result<FutureProducer, PublishError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .set(
                "message.timeout.ms",
                self.config.message_timeout.as_millis().to_string(),
            )
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .create()
            .map_err(transport)?;

        let probe = producer.clone();
        let timeout = self.config.message_timeout;
        tokio::task::spawn_blocking(move || probe.client().fetch_metadata(None, timeout).map(|_| ()))
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?
            .map_err(transport)?;

        self.declare_topic().await?;
        Ok(producer)
    }

    async fn declare_topic(&self) -> Result<(), PublishError> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .create()
            .map_err(transport)?;

        let topic = NewTopic::new(
            &self.config.topic,
            self.config.partitions,
            TopicReplication::Fixed(self.config.replication),
        );
        let options = AdminOptions::new().operation_timeout(Some(self.config.message_timeout));

        for result in admin.create_topics([&topic], &options).await.map_err(transport)? {
            match result {
                Ok(name) => info!(topic = %name, "Declared topic"),
                Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {}
                Err((name, code)) => {
                    return Err(PublishError::Transport(format!(
                        "could not declare topic {}: {}",
                        name, code
                    )))
                }
            }
        }
        Ok(())
    }

    /// Drops the producer of `generation` if it is still the live one.
    async fn cleanup(&self, generation: u64) {
        if self.producer.lock().await.release(generation).is_some() {
            warn!(generation, "Dropped Kafka producer after failure");
        }
    }

    /// Flushes pending deliveries and releases the producer.
    pub async fn shutdown(&self) {
        let Some(producer) = self.producer.lock().await.producer.take() else {
            return;
        };
        let timeout = self.config.message_timeout;
        match tokio::task::spawn_blocking(move || producer.flush(timeout)).await {
            Ok(Ok(())) => info!("Kafka producer flushed"),
            Ok(Err(e)) => warn!("Error while flushing Kafka producer: {}", e),
            Err(e) => warn!("Kafka flush task failed: {}", e),
        }
    }
}

#[async_trait]
impl MessageBroker for KafkaBroker {
    async fn publish(&self, message: &BrokerMessage<'_>) -> Result<(), PublishError> {
        let (generation, producer) = self.connection().await?;

        let id = message.id.to_string();
        let mut headers = OwnedHeaders::new()
            .insert(Header {
                key: "message-id",
                value: Some(id.as_str()),
            })
            .insert(Header {
                key: "message-type",
                value: Some(message.routing_key),
            });
        if let Some(correlation_id) = message.correlation_id {
            headers = headers.insert(Header {
                key: "correlation-id",
                value: Some(correlation_id),
            });
        }

        let record = FutureRecord::to(&self.config.topic)
            .payload(message.payload)
            .key(message.routing_key)
            .headers(headers);

        match producer.send(record, self.config.queue_timeout).await {
            Ok((partition, offset)) => {
                debug!(id = %message.id, partition, offset, "Delivered to Kafka");
                Ok(())
            }
            Err((e, _)) => {
                error!(id = %message.id, "Failed to publish message, cleaning up producer: {}", e);
                self.cleanup(generation).await;
                Err(classify(e))
            }
        }
    }
}

fn transport(e: KafkaError) -> PublishError {
    PublishError::Transport(e.to_string())
}

/// Broker refusals of the message itself; everything else is transport.
fn classify(e: KafkaError) -> PublishError {
    match e.rdkafka_error_code() {
        Some(
            RDKafkaErrorCode::MessageSizeTooLarge
            | RDKafkaErrorCode::InvalidMessage
            | RDKafkaErrorCode::InvalidMessageSize
            | RDKafkaErrorCode::TopicAuthorizationFailed,
        ) => PublishError::Rejected(e.to_string()),
        _ => transport(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_producer() -> FutureProducer {
        ClientConfig::new()
            .set("bootstrap.servers", "127.0.0.1:9")
            .create()
            .unwrap()
    }

    #[tokio::test]
    async fn stale_cleanup_keeps_the_newer_producer() {
        let broker = KafkaBroker::new(KafkaConfig {
            brokers: "127.0.0.1:9".to_string(),
            topic: "bar.events".to_string(),
            partitions: 1,
            replication: 1,
            message_timeout: Duration::from_millis(100),
            queue_timeout: Duration::from_millis(100),
        });

        let failed = broker.producer.lock().await.install(offline_producer());
        broker.cleanup(failed).await;
        assert!(broker.producer.lock().await.producer.is_none());

        let stale = failed;
        let fresh = broker.producer.lock().await.install(offline_producer());
        broker.cleanup(stale).await;
        assert!(broker.producer.lock().await.producer.is_some());

        let (generation, _) = broker.connection().await.unwrap();
        assert_eq!(generation, fresh);

        broker.cleanup(fresh).await;
        assert!(broker.producer.lock().await.producer.is_none());
    }

    #[test]
    fn classifies_message_refusals_as_rejected() {
        let too_large = KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge);
        assert!(matches!(classify(too_large), PublishError::Rejected(_)));

        let timed_out = KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut);
        assert!(matches!(classify(timed_out), PublishError::Transport(_)));
    }

    #[test]
    fn envelope_borrows_outbox_fields() {
        let message = OutboxMessage::new(
            "order.created",
            r#"{"total":"1"}"#.to_string(),
            Some("corr".to_string()),
            chrono::Utc::now(),
        );
        let envelope = message.envelope();
        assert_eq!(envelope.id, message.id);
        assert_eq!(envelope.routing_key, "order.created");
        assert_eq!(envelope.correlation_id, Some("corr"));
    }
}

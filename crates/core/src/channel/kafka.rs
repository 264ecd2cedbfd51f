//! Kafka transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{ChannelError, InboundSender, TicketProducer};
use crate::codec::TicketCodec;
use crate::config::BrokerConfig;
use crate::metrics;
use crate::ticket::Ticket;

/// First delay after a failed receive; doubles per consecutive failure.
const RECEIVE_RETRY_BASE: Duration = Duration::from_millis(100);
const RECEIVE_RETRY_MAX: Duration = Duration::from_secs(5);

/// Delay before the next receive after `failures` consecutive errors.
fn receive_backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    RECEIVE_RETRY_BASE
        .saturating_mul(1 << exponent)
        .min(RECEIVE_RETRY_MAX)
}

/// Kafka-backed message channel.
///
/// Produces with the outbound codec and decodes consumed replies with the
/// inbound codec. The producer is shared; the consumer is created when the
/// consume loop is spawned.
pub struct KafkaChannel {
    producer: FutureProducer,
    outbound: TicketCodec,
    inbound: Arc<TicketCodec>,
    config: BrokerConfig,
    timeout: Duration,
}

impl KafkaChannel {
    pub fn new(
        config: &BrokerConfig,
        outbound: TicketCodec,
        inbound: TicketCodec,
    ) -> Result<Self, ChannelError> {
        let timeout = Duration::from_secs(config.timeout_secs);

        let producer: FutureProducer = Self::client_config(config)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("socket.timeout.ms", timeout.as_millis().to_string())
            .set("acks", "all")
            .create()
            .map_err(|e| ChannelError::Config(format!("Failed to create producer: {e}")))?;

        info!(
            brokers = %config.brokers,
            topic = %config.outbound_topic,
            schema_id = outbound.schema_id(),
            "Kafka producer ready"
        );

        Ok(Self {
            producer,
            outbound,
            inbound: Arc::new(inbound),
            config: config.clone(),
            timeout,
        })
    }

    /// Base client settings shared by producer and consumer.
    fn client_config(config: &BrokerConfig) -> ClientConfig {
        let mut client = ClientConfig::new();
        client.set("bootstrap.servers", &config.brokers);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            client
                .set("security.protocol", "SASL_PLAINTEXT")
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", password);
        }
        client
    }

    /// Spawn the consume loop.
    ///
    /// Each decoded reply is pushed onto `queue` and its offset committed only
    /// afterwards, so a crash redelivers rather than loses. Payloads that fail
    /// to decode are logged and committed. The loop exits on `shutdown` or when
    /// the queue is closed.
    pub fn spawn_consumer(
        &self,
        queue: InboundSender,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<JoinHandle<()>, ChannelError> {
        let topic = self.config.inbound_topic.clone();

        let consumer: StreamConsumer = Self::client_config(&self.config)
            .set("group.id", &self.config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| ChannelError::Subscribe {
                topic: topic.clone(),
                reason: format!("Failed to create consumer: {e}"),
            })?;

        consumer
            .subscribe(&[topic.as_str()])
            .map_err(|e| ChannelError::Subscribe {
                topic: topic.clone(),
                reason: e.to_string(),
            })?;

        let codec = Arc::clone(&self.inbound);
        let group_id = self.config.group_id.clone();

        let handle = tokio::spawn(async move {
            info!(topic = %topic, group_id = %group_id, "Consume loop started");
            let mut failures: u32 = 0;

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("Consume loop shutting down");
                        break;
                    }
                    received = consumer.recv() => {
                        let message = match received {
                            Ok(message) => {
                                failures = 0;
                                message
                            }
                            Err(e) => {
                                failures = failures.saturating_add(1);
                                let delay = receive_backoff(failures);
                                error!(
                                    error = %e,
                                    failures,
                                    retry_in_ms = delay.as_millis() as u64,
                                    "Failed to receive message"
                                );
                                tokio::select! {
                                    _ = shutdown.recv() => {
                                        info!("Consume loop shutting down");
                                        break;
                                    }
                                    _ = tokio::time::sleep(delay) => continue,
                                }
                            }
                        };

                        match message.payload().map(|payload| codec.decode(payload)) {
                            Some(Ok(ticket)) => {
                                debug!(
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    customer_id = %ticket.customer_id,
                                    kind = %ticket.kind,
                                    "Received backend reply"
                                );
                                metrics::EVENTS_CONSUMED
                                    .with_label_values(&[ticket.kind.as_keyword()])
                                    .inc();
                                if queue.send(ticket).is_err() {
                                    warn!("Inbound queue closed, stopping consume loop");
                                    break;
                                }
                            }
                            Some(Err(e)) => {
                                metrics::DECODE_FAILURES.inc();
                                warn!(
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    error = %e,
                                    "Dropping undecodable message"
                                );
                            }
                            None => {
                                metrics::DECODE_FAILURES.inc();
                                warn!(
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    "Dropping message without payload"
                                );
                            }
                        }

                        if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                            warn!(
                                partition = message.partition(),
                                offset = message.offset(),
                                error = %e,
                                "Failed to commit offset (message may be redelivered)"
                            );
                        }
                    }
                }
            }

            info!("Consume loop stopped");
        });

        Ok(handle)
    }
}

#[async_trait]
impl TicketProducer for KafkaChannel {
    async fn produce(&self, ticket: &Ticket) -> Result<(), ChannelError> {
        let kind = ticket.kind.as_keyword();
        let payload = self.outbound.encode(ticket).inspect_err(|_| {
            metrics::EVENTS_PRODUCED
                .with_label_values(&[kind, "error"])
                .inc();
        })?;

        let topic = &self.config.outbound_topic;
        let record = FutureRecord::to(topic)
            .payload(&payload)
            .key(ticket.customer_id.as_bytes());

        match self.producer.send(record, Timeout::After(self.timeout)).await {
            Ok((partition, offset)) => {
                metrics::EVENTS_PRODUCED.with_label_values(&[kind, "ok"]).inc();
                debug!(
                    topic = %topic,
                    partition,
                    offset,
                    customer_id = %ticket.customer_id,
                    billing_channel = %ticket.billing_channel,
                    kind,
                    "Produced ticket event"
                );
                Ok(())
            }
            Err((e, _)) => {
                metrics::EVENTS_PRODUCED
                    .with_label_values(&[kind, "error"])
                    .inc();
                error!(
                    topic = %topic,
                    customer_id = %ticket.customer_id,
                    error = %e,
                    "Failed to produce ticket event"
                );
                Err(ChannelError::Delivery {
                    topic: topic.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

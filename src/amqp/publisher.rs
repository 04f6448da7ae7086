//! AMQP event publisher for outbound events

use crate::amqp::messages::{
    MessageEnvelope, MessageUtils, MATCH_EVENTS_EXCHANGE, PLAYER_EVENTS_EXCHANGE,
};
use crate::error::{MatchmakingError, Result};
use crate::types::*;
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Sink for waiting-room events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a MatchFound event
    async fn publish_match_found(&self, event: MatchFound) -> Result<()>;

    /// Publish a PlayerEnteredWaitingRoom event
    async fn publish_player_entered(&self, event: PlayerEnteredWaitingRoom) -> Result<()>;

    /// Publish a PlayerLeftWaitingRoom event
    async fn publish_player_left(&self, event: PlayerLeftWaitingRoom) -> Result<()>;
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub enable_deduplication: bool,
    /// Event keys remembered for de-duplication; the oldest are evicted first
    pub deduplication_capacity: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
            enable_deduplication: true,
            deduplication_capacity: 10_000,
        }
    }
}

/// Bounded set of recently published event keys
#[derive(Debug)]
pub struct DeduplicationCache {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DeduplicationCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    /// Remember `key`, forgetting the oldest key once full
    pub fn insert(&mut self, key: String) {
        if !self.seen.insert(key.clone()) {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }
}

/// AMQP-based event publisher implementation
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
    published_messages: std::sync::Mutex<DeduplicationCache>,
}

impl AmqpEventPublisher {
    /// Create a new event publisher and declare its exchanges
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let published_messages =
            std::sync::Mutex::new(DeduplicationCache::new(config.deduplication_capacity));
        let publisher = Self {
            channel,
            config,
            published_messages,
        };

        publisher.setup_exchanges().await?;

        Ok(publisher)
    }

    /// Set up AMQP exchanges for events
    async fn setup_exchanges(&self) -> Result<()> {
        for exchange in [PLAYER_EVENTS_EXCHANGE, MATCH_EVENTS_EXCHANGE] {
            let mut args = ExchangeDeclareArguments::new(exchange, "topic");
            args.durable(true);
            self.channel.exchange_declare(args).await.map_err(|e| {
                MatchmakingError::AmqpConnectionFailed {
                    message: format!("Failed to declare exchange {}: {}", exchange, e),
                }
            })?;
        }

        info!("Successfully set up AMQP exchanges");
        Ok(())
    }

    async fn publish_event(&self, event: WaitingRoomEvent) -> Result<()> {
        let (exchange, routing_key) = MessageUtils::route(&event);
        let event_key = MessageUtils::event_key(&event);
        let envelope = MessageEnvelope::new(event, routing_key.to_string());
        self.publish_to_exchange(exchange, &envelope, event_key).await
    }

    /// Publish to an exchange with retry and exponential backoff
    async fn publish_to_exchange<T>(
        &self,
        exchange: &str,
        envelope: &MessageEnvelope<T>,
        event_key: String,
    ) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        if self.config.enable_deduplication {
            let published_messages =
                self.published_messages
                    .lock()
                    .map_err(|_| MatchmakingError::InternalError {
                        message: "Failed to acquire published messages lock".to_string(),
                    })?;
            if published_messages.contains(&event_key) {
                debug!("Event {} already published, skipping", event_key);
                return Ok(());
            }
        }

        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(exchange, envelope).await {
                Ok(_) => {
                    if self.config.enable_deduplication {
                        let mut published_messages =
                            self.published_messages.lock().map_err(|_| {
                                MatchmakingError::InternalError {
                                    message: "Failed to acquire published messages lock"
                                        .to_string(),
                                }
                            })?;
                        published_messages.insert(event_key);
                    }

                    debug!(
                        "Successfully published message {} to exchange {}",
                        envelope.correlation_id, exchange
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    /// Single publish attempt
    async fn try_publish<T>(&self, exchange: &str, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(exchange, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to publish message: {}", e),
            })?;

        Ok(())
    }

    /// Clear deduplication cache
    pub fn clear_deduplication_cache(&self) {
        if let Ok(mut published_messages) = self.published_messages.lock() {
            published_messages.clear();
        }
    }

    /// Get number of cached event keys (for monitoring)
    pub fn cached_message_count(&self) -> usize {
        self.published_messages
            .lock()
            .map(|cache| cache.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish_match_found(&self, event: MatchFound) -> Result<()> {
        self.publish_event(WaitingRoomEvent::MatchFound(event)).await
    }

    async fn publish_player_entered(&self, event: PlayerEnteredWaitingRoom) -> Result<()> {
        self.publish_event(WaitingRoomEvent::PlayerEnteredWaitingRoom(event))
            .await
    }

    async fn publish_player_left(&self, event: PlayerLeftWaitingRoom) -> Result<()> {
        self.publish_event(WaitingRoomEvent::PlayerLeftWaitingRoom(event))
            .await
    }
}

/// Mock event publisher for testing
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    published_events: std::sync::Mutex<Vec<WaitingRoomEvent>>,
    failing: AtomicBool,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Get all published events (for testing)
    pub fn get_published_events(&self) -> Vec<WaitingRoomEvent> {
        self.published_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Published MatchFound events only
    pub fn matches(&self) -> Vec<MatchFound> {
        self.get_published_events()
            .into_iter()
            .filter_map(|event| match event {
                WaitingRoomEvent::MatchFound(found) => Some(found),
                _ => None,
            })
            .collect()
    }

    /// Published PlayerLeftWaitingRoom events only
    pub fn departures(&self) -> Vec<PlayerLeftWaitingRoom> {
        self.get_published_events()
            .into_iter()
            .filter_map(|event| match event {
                WaitingRoomEvent::PlayerLeftWaitingRoom(left) => Some(left),
                _ => None,
            })
            .collect()
    }

    /// Clear published events (for testing)
    pub fn clear_events(&self) {
        if let Ok(mut events) = self.published_events.lock() {
            events.clear();
        }
    }

    fn record(&self, event: WaitingRoomEvent) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MatchmakingError::AmqpConnectionFailed {
                message: "mock publisher set to fail".to_string(),
            }
            .into());
        }
        if let Ok(mut events) = self.published_events.lock() {
            events.push(event);
        }
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish_match_found(&self, event: MatchFound) -> Result<()> {
        self.record(WaitingRoomEvent::MatchFound(event))
    }

    async fn publish_player_entered(&self, event: PlayerEnteredWaitingRoom) -> Result<()> {
        self.record(WaitingRoomEvent::PlayerEnteredWaitingRoom(event))
    }

    async fn publish_player_left(&self, event: PlayerLeftWaitingRoom) -> Result<()> {
        self.record(WaitingRoomEvent::PlayerLeftWaitingRoom(event))
    }
}

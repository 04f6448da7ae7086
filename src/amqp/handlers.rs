//! AMQP message handlers for waiting-room requests
//!
//! A delivery is acknowledged once it has been handled, including
//! deliveries that fail validation, so a malformed message is never
//! redelivered in a loop. Deliveries that fail because the shared store is
//! unreachable are returned to the queue instead.

use crate::amqp::messages::MessageUtils;
use crate::error::{MatchmakingError, Result};
use crate::types::WaitingRoomRequest;
use amqprs::{
    channel::{
        BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, BasicNackArguments,
        Channel,
    },
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Trait defining the interface for handling AMQP messages
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle a validated waiting-room request
    async fn handle_request(&self, request: WaitingRoomRequest) -> Result<()>;

    /// Handle processing errors
    async fn handle_error(&self, error: MatchmakingError, message_data: &[u8]);
}

/// How a processed delivery is settled with the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    /// Negative-acknowledge and requeue for another attempt
    Requeue,
}

impl Settlement {
    /// Only store outages are retried; everything else would fail again
    pub fn for_outcome(outcome: &Result<()>) -> Self {
        match outcome {
            Err(e) if MatchmakingError::is_store_unavailable(e) => Settlement::Requeue,
            _ => Settlement::Ack,
        }
    }
}

/// Consumer for waiting-room request messages
pub struct RequestConsumer {
    handler: Arc<dyn MessageHandler>,
    channel: Channel,
    consumer_tag: String,
}

impl RequestConsumer {
    /// Create a new request consumer
    pub fn new(handler: Arc<dyn MessageHandler>, channel: Channel) -> Self {
        let consumer_tag = format!("waiting-room-consumer-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            channel,
            consumer_tag,
        }
    }

    /// Start consuming messages from the queue
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag);

        self.channel
            .basic_consume(QueueConsumer::new(self.handler.clone()), args)
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming messages from queue: {}", queue_name);
        Ok(())
    }

    /// Stop consuming messages
    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel.basic_cancel(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            }
        })?;

        info!("Stopped consuming messages");
        Ok(())
    }
}

/// Internal consumer implementation
struct QueueConsumer {
    handler: Arc<dyn MessageHandler>,
}

impl QueueConsumer {
    fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl AsyncConsumer for QueueConsumer {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        debug!(
            "AMQP message received - delivery_tag: {}, routing_key: '{}', size: {} bytes",
            delivery_tag,
            deliver.routing_key(),
            content.len()
        );

        let start_time = std::time::Instant::now();
        let outcome = process_message(self.handler.as_ref(), &content).await;
        let settlement = Settlement::for_outcome(&outcome);
        match outcome {
            Ok(_) => {
                debug!(
                    "Message processed - delivery_tag: {}, processing_time: {:.2}ms",
                    delivery_tag,
                    start_time.elapsed().as_secs_f64() * 1000.0
                );
            }
            Err(e) => {
                error!(
                    "Message processing failed - delivery_tag: {}, processing_time: {:.2}ms, error: {}",
                    delivery_tag,
                    start_time.elapsed().as_secs_f64() * 1000.0,
                    e
                );
                let error = match e.downcast::<MatchmakingError>() {
                    Ok(error) => error,
                    Err(other) => MatchmakingError::InternalError {
                        message: other.to_string(),
                    },
                };
                self.handler.handle_error(error, &content).await;
            }
        }

        match settlement {
            Settlement::Ack => {
                if let Err(e) = channel
                    .basic_ack(BasicAckArguments::new(delivery_tag, false))
                    .await
                {
                    warn!("Failed to ack delivery {}: {}", delivery_tag, e);
                }
            }
            Settlement::Requeue => {
                warn!("Store unavailable, requeueing delivery {}", delivery_tag);
                if let Err(e) = channel
                    .basic_nack(BasicNackArguments::new(delivery_tag, false, true))
                    .await
                {
                    warn!("Failed to nack delivery {}: {}", delivery_tag, e);
                }
            }
        }
    }
}

/// Decode, validate and forward one message body
pub async fn process_message(handler: &dyn MessageHandler, content: &[u8]) -> Result<()> {
    let request = MessageUtils::deserialize_request(content)?;

    debug!(
        "Waiting room request parsed - token: '{}', exercise_type: {}",
        request.token(),
        request.exercise_type()
    );

    handler.handle_request(request).await
}

/// Mock message handler for testing
pub struct MockMessageHandler {
    pub received_requests: Arc<tokio::sync::Mutex<Vec<WaitingRoomRequest>>>,
    pub errors: Arc<tokio::sync::Mutex<Vec<String>>>,
}

impl Default for MockMessageHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMessageHandler {
    pub fn new() -> Self {
        Self {
            received_requests: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            errors: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl MessageHandler for MockMessageHandler {
    async fn handle_request(&self, request: WaitingRoomRequest) -> Result<()> {
        let mut requests = self.received_requests.lock().await;
        requests.push(request);
        Ok(())
    }

    async fn handle_error(&self, error: MatchmakingError, _message_data: &[u8]) {
        self.errors.lock().await.push(error.to_string());
    }
}

//! AMQP integration for the waiting-room service
//!
//! Handles the broker connection, consumption of waiting-room requests and
//! publishing of match and waiting-room events.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

// Re-export commonly used types
pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::{MessageHandler, RequestConsumer};
pub use messages::*;
pub use publisher::{AmqpEventPublisher, EventPublisher, MockEventPublisher};

//! Backend поверх Redis Pub/Sub (feature `redis-backend`).
//!
//! Подписки идут через выделенное async pub/sub-соединение, публикации через
//! отдельное multiplexed-соединение, создаваемое по требованию.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use listener_container_error::ConnectionError;
use ::redis::{aio, AsyncCommands, Client, RedisError};
use tracing::debug;

use crate::{
    connection::{BoxConnection, Connection, ConnectionFactory},
    pubsub::{Message, Topic},
};

/// Фабрика соединений с Redis.
#[derive(Clone)]
pub struct RedisConnectionFactory {
    client: Client,
    url: String,
}

impl RedisConnectionFactory {
    /// Разбирает URL (`redis://host:port/db`). Соединение не открывается.
    pub fn new(url: &str) -> Result<Self, ConnectionError> {
        let client = Client::open(url).map_err(|e| ConnectionError::ConnectFailed {
            endpoint: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl ConnectionFactory for RedisConnectionFactory {
    async fn connect(&self) -> Result<BoxConnection, ConnectionError> {
        let pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| ConnectionError::ConnectFailed {
                endpoint: self.url.clone(),
                reason: e.to_string(),
            })?;
        debug!(endpoint = %self.url, "Redis pub/sub connection opened");

        Ok(Box::new(RedisConnection {
            client: self.client.clone(),
            pubsub,
            publisher: None,
        }))
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}

/// Подписочное соединение с Redis.
pub struct RedisConnection {
    client: Client,
    pubsub: aio::PubSub,
    publisher: Option<aio::MultiplexedConnection>,
}

#[async_trait]
impl Connection for RedisConnection {
    async fn subscribe(
        &mut self,
        topic: &Topic,
    ) -> Result<(), ConnectionError> {
        let result = match topic {
            Topic::Channel(name) => self.pubsub.subscribe(&**name).await,
            Topic::Pattern(_) => self.pubsub.psubscribe(topic.as_str()).await,
        };
        result.map_err(|e| subscribe_error(topic, e))
    }

    async fn unsubscribe(
        &mut self,
        topic: &Topic,
    ) -> Result<(), ConnectionError> {
        let result = match topic {
            Topic::Channel(name) => self.pubsub.unsubscribe(&**name).await,
            Topic::Pattern(_) => self.pubsub.punsubscribe(topic.as_str()).await,
        };
        result.map_err(|e| subscribe_error(topic, e))
    }

    async fn receive(&mut self) -> Result<Message, ConnectionError> {
        let msg = self
            .pubsub
            .on_message()
            .next()
            .await
            .ok_or(ConnectionError::Closed)?;

        let message = Message::new(
            msg.get_channel_name(),
            Bytes::copy_from_slice(msg.get_payload_bytes()),
        );
        if !msg.from_pattern() {
            return Ok(message);
        }
        let pattern: String = msg.get_pattern().map_err(|e| ConnectionError::Protocol {
            reason: e.to_string(),
        })?;
        Ok(message.with_pattern(pattern))
    }

    async fn publish(
        &mut self,
        channel: &str,
        payload: Bytes,
    ) -> Result<usize, ConnectionError> {
        if self.publisher.is_none() {
            let conn = self
                .client
                .get_multiplexed_async_connection()
                .await
                .map_err(map_redis_error)?;
            self.publisher = Some(conn);
        }
        let Some(conn) = self.publisher.as_mut() else {
            return Err(ConnectionError::Closed);
        };
        conn.publish::<_, _, usize>(channel, payload.as_ref())
            .await
            .map_err(map_redis_error)
    }
}

fn subscribe_error(
    topic: &Topic,
    err: RedisError,
) -> ConnectionError {
    if err.is_connection_dropped() || err.is_io_error() {
        return ConnectionError::Closed;
    }
    ConnectionError::Subscribe {
        topic: topic.to_string(),
        reason: err.to_string(),
    }
}

fn map_redis_error(err: RedisError) -> ConnectionError {
    if err.is_connection_dropped() || err.is_io_error() {
        ConnectionError::Closed
    } else {
        ConnectionError::Protocol {
            reason: err.to_string(),
        }
    }
}

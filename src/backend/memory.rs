use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use listener_container_error::ConnectionError;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    connection::{BoxConnection, Connection, ConnectionFactory, Delivery},
    pubsub::{Message, Topic},
};

const ENDPOINT: &str = "memory://local";

type ConnId = u64;
type Inbox = mpsc::UnboundedSender<Message>;

/// Подписчики шаблона вместе со скомпилированной темой.
struct PatternEntry {
    topic: Topic,
    inboxes: HashMap<ConnId, Inbox>,
}

/// Брокер Pub/Sub сообщений в памяти процесса.
///
/// Каждое соединение, у которого совпала хотя бы одна подписка, получает
/// одну копию публикации без `pattern` ([`Delivery::PerPublication`]).
/// `publish` возвращает число совпавших подписок, как Redis `PUBLISH`.
///
/// Для тестов умеет имитировать сбои: [`disconnect_all`](Self::disconnect_all)
/// обрывает все соединения, [`set_available`](Self::set_available) запрещает
/// новые.
pub struct MemoryBroker {
    /// Точные каналы → входящие очереди соединений
    channels: DashMap<Arc<str>, HashMap<ConnId, Inbox>>,
    /// Шаблоны → входящие очереди соединений
    patterns: DashMap<Arc<str>, PatternEntry>,
    /// Живые соединения
    connections: DashMap<ConnId, Inbox>,
    next_conn_id: AtomicU64,
    available: AtomicBool,
    /// Общее количество вызовов `publish`
    publish_count: AtomicUsize,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            patterns: DashMap::new(),
            connections: DashMap::new(),
            next_conn_id: AtomicU64::new(1),
            available: AtomicBool::new(true),
            publish_count: AtomicUsize::new(0),
        }
    }

    /// Открывает новое соединение с брокером.
    pub fn connect(self: &Arc<Self>) -> Result<MemoryConnection, ConnectionError> {
        if !self.is_available() {
            return Err(ConnectionError::ConnectFailed {
                endpoint: ENDPOINT.to_string(),
                reason: "broker unavailable".to_string(),
            });
        }

        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(id, tx);
        debug!(conn = id, "Memory connection opened");

        Ok(MemoryConnection {
            id,
            broker: self.clone(),
            inbox: rx,
            topics: HashSet::new(),
        })
    }

    /// Публикует сообщение, возвращает число совпавших подписок.
    ///
    /// Соединение, подписанное и на канал, и на подходящие шаблоны,
    /// получает сообщение один раз.
    pub fn publish(
        &self,
        channel: &str,
        payload: impl Into<Bytes>,
    ) -> usize {
        self.publish_count.fetch_add(1, Ordering::Relaxed);
        let mut matched = 0;
        let mut receivers: HashMap<ConnId, Inbox> = HashMap::new();

        if let Some(entry) = self.channels.get(channel) {
            matched += entry.len();
            for (id, inbox) in entry.iter() {
                receivers.entry(*id).or_insert_with(|| inbox.clone());
            }
        }

        for entry in self.patterns.iter() {
            if !entry.topic.matches(channel) {
                continue;
            }
            matched += entry.inboxes.len();
            for (id, inbox) in entry.inboxes.iter() {
                receivers.entry(*id).or_insert_with(|| inbox.clone());
            }
        }

        if !receivers.is_empty() {
            let msg = Message::new(channel, payload);
            for inbox in receivers.values() {
                let _ = inbox.send(msg.clone());
            }
        }
        matched
    }

    /// Обрывает все соединения. Их `receive` вернёт `Closed` после того,
    /// как выберет уже доставленные сообщения.
    pub fn disconnect_all(&self) {
        let dropped = self.connections.len();
        self.connections.clear();
        self.channels.clear();
        self.patterns.clear();
        warn!(connections = dropped, "Memory broker dropped all connections");
    }

    /// Разрешает или запрещает новые соединения.
    pub fn set_available(
        &self,
        available: bool,
    ) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Количество соединений, подписанных на канал (без учёта шаблонов).
    pub fn channel_subscribers(
        &self,
        channel: &str,
    ) -> usize {
        self.channels.get(channel).map_or(0, |entry| entry.len())
    }

    /// Количество соединений, подписанных на шаблон.
    pub fn pattern_subscribers(
        &self,
        pattern: &str,
    ) -> usize {
        self.patterns
            .get(pattern)
            .map_or(0, |entry| entry.inboxes.len())
    }

    pub fn publish_count(&self) -> usize {
        self.publish_count.load(Ordering::Relaxed)
    }

    fn inbox_of(
        &self,
        id: ConnId,
    ) -> Result<Inbox, ConnectionError> {
        self.connections
            .get(&id)
            .map(|inbox| inbox.clone())
            .ok_or(ConnectionError::Closed)
    }

    fn add_subscriber(
        &self,
        id: ConnId,
        topic: &Topic,
    ) -> Result<(), ConnectionError> {
        let inbox = self.inbox_of(id)?;
        let key: Arc<str> = Arc::from(topic.as_str());
        match topic {
            Topic::Channel(_) => {
                self.channels.entry(key).or_default().insert(id, inbox);
            }
            Topic::Pattern(_) => {
                self.patterns
                    .entry(key)
                    .or_insert_with(|| PatternEntry {
                        topic: topic.clone(),
                        inboxes: HashMap::new(),
                    })
                    .inboxes
                    .insert(id, inbox);
            }
        }
        Ok(())
    }

    fn remove_subscriber(
        &self,
        id: ConnId,
        topic: &Topic,
    ) {
        match topic {
            Topic::Channel(_) => {
                self.channels
                    .remove_if_mut(topic.as_str(), |_, inboxes| {
                        inboxes.remove(&id);
                        inboxes.is_empty()
                    });
            }
            Topic::Pattern(_) => {
                self.patterns.remove_if_mut(topic.as_str(), |_, entry| {
                    entry.inboxes.remove(&id);
                    entry.inboxes.is_empty()
                });
            }
        }
    }

    fn drop_connection(
        &self,
        id: ConnId,
    ) {
        if self.connections.remove(&id).is_none() {
            return;
        }
        self.channels.retain(|_, inboxes| {
            inboxes.remove(&id);
            !inboxes.is_empty()
        });
        self.patterns.retain(|_, entry| {
            entry.inboxes.remove(&id);
            !entry.inboxes.is_empty()
        });
        debug!(conn = id, "Memory connection closed");
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Соединение с [`MemoryBroker`].
pub struct MemoryConnection {
    id: ConnId,
    broker: Arc<MemoryBroker>,
    inbox: mpsc::UnboundedReceiver<Message>,
    topics: HashSet<Topic>,
}

impl MemoryConnection {
    /// Темы, на которые подписано соединение.
    pub fn topics(&self) -> impl Iterator<Item = &Topic> {
        self.topics.iter()
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn subscribe(
        &mut self,
        topic: &Topic,
    ) -> Result<(), ConnectionError> {
        self.broker.add_subscriber(self.id, topic)?;
        self.topics.insert(topic.clone());
        Ok(())
    }

    async fn unsubscribe(
        &mut self,
        topic: &Topic,
    ) -> Result<(), ConnectionError> {
        self.broker.inbox_of(self.id)?;
        self.broker.remove_subscriber(self.id, topic);
        self.topics.remove(topic);
        Ok(())
    }

    async fn receive(&mut self) -> Result<Message, ConnectionError> {
        self.inbox.recv().await.ok_or(ConnectionError::Closed)
    }

    async fn publish(
        &mut self,
        channel: &str,
        payload: Bytes,
    ) -> Result<usize, ConnectionError> {
        self.broker.inbox_of(self.id)?;
        Ok(self.broker.publish(channel, payload))
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.broker.drop_connection(self.id);
        self.topics.clear();
        Ok(())
    }

    fn delivery(&self) -> Delivery {
        Delivery::PerPublication
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.broker.drop_connection(self.id);
    }
}

/// Фабрика соединений с общим [`MemoryBroker`].
#[derive(Clone)]
pub struct MemoryConnectionFactory {
    broker: Arc<MemoryBroker>,
}

impl MemoryConnectionFactory {
    pub fn new(broker: Arc<MemoryBroker>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &Arc<MemoryBroker> {
        &self.broker
    }
}

#[async_trait]
impl ConnectionFactory for MemoryConnectionFactory {
    async fn connect(&self) -> Result<BoxConnection, ConnectionError> {
        let conn = self.broker.connect()?;
        Ok(Box::new(conn))
    }

    fn endpoint(&self) -> String {
        ENDPOINT.to_string()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use tokio::time::{timeout, Duration};

    use super::*;

    fn setup() -> (Arc<MemoryBroker>, MemoryConnection) {
        let broker = Arc::new(MemoryBroker::new());
        let conn = broker.connect().unwrap();
        (broker, conn)
    }

    async fn recv(conn: &mut MemoryConnection) -> Message {
        timeout(Duration::from_millis(50), conn.receive())
            .await
            .expect("timed out")
            .expect("connection closed")
    }

    /// Проверяет доставку подписчику канала и счётчик публикаций.
    #[tokio::test]
    async fn test_publish_and_receive() {
        let (broker, mut conn) = setup();
        conn.subscribe(&Topic::channel("chan")).await.unwrap();

        assert_eq!(broker.publish("chan", Bytes::from_static(b"x")), 1);
        let msg = recv(&mut conn).await;
        assert_eq!(&*msg.channel, "chan");
        assert_eq!(msg.payload, Bytes::from_static(b"x"));
        assert_eq!(msg.pattern, None);
        assert_eq!(broker.publish_count(), 1);
    }

    /// Проверяет, что публикация в канал без подписчиков ничего не создаёт.
    #[tokio::test]
    async fn test_publish_to_nonexistent_channel() {
        let broker = MemoryBroker::new();
        assert_eq!(broker.publish("nochan", Bytes::from_static(b"z")), 0);
        assert_eq!(broker.publish_count(), 1);
        assert_eq!(broker.channel_subscribers("nochan"), 0);
    }

    /// Проверяет, что соединение с подпиской и на канал, и на шаблон
    /// получает одну копию, а счётчик учитывает обе подписки.
    #[tokio::test]
    async fn test_sub_and_psub_together() {
        let (broker, mut conn) = setup();
        conn.subscribe(&Topic::channel("topic")).await.unwrap();
        conn.subscribe(&Topic::pattern("t*").unwrap()).await.unwrap();
        conn.subscribe(&Topic::pattern("*c").unwrap()).await.unwrap();
        assert_eq!(conn.delivery(), Delivery::PerPublication);

        assert_eq!(broker.publish("topic", "Z"), 3);

        let msg = recv(&mut conn).await;
        assert_eq!(&*msg.channel, "topic");
        assert_eq!(msg.pattern, None);
        assert!(timeout(Duration::from_millis(20), conn.receive())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_multiple_connections_receive() {
        let broker = Arc::new(MemoryBroker::new());
        let mut conns: Vec<_> = (0..3).map(|_| broker.connect().unwrap()).collect();
        for conn in conns.iter_mut() {
            conn.subscribe(&Topic::channel("multi")).await.unwrap();
        }

        assert_eq!(broker.publish("multi", "d"), 3);
        for conn in conns.iter_mut() {
            assert_eq!(recv(conn).await.payload, Bytes::from_static(b"d"));
        }
    }

    /// Проверяет, что отписка удаляет пустой канал из брокера.
    #[tokio::test]
    async fn test_unsubscribe_removes_empty_channel() {
        let (broker, mut conn) = setup();
        let topic = Topic::pattern("a?c").unwrap();
        conn.subscribe(&topic).await.unwrap();
        assert_eq!(broker.pattern_subscribers("a?c"), 1);

        conn.unsubscribe(&topic).await.unwrap();
        assert_eq!(broker.pattern_subscribers("a?c"), 0);
        assert_eq!(broker.publish("abc", "x"), 0);
        assert_eq!(conn.topics().count(), 0);
    }

    /// Проверяет, что обрыв соединений закрывает `receive` и запрещает
    /// подписку через старое соединение.
    #[tokio::test]
    async fn test_disconnect_all() {
        let (broker, mut conn) = setup();
        conn.subscribe(&Topic::channel("c")).await.unwrap();
        broker.publish("c", "before");

        broker.disconnect_all();
        assert_eq!(broker.connection_count(), 0);

        assert_eq!(recv(&mut conn).await.payload, Bytes::from_static(b"before"));
        assert_eq!(conn.receive().await, Err(ConnectionError::Closed));
        assert_eq!(
            conn.subscribe(&Topic::channel("c")).await,
            Err(ConnectionError::Closed)
        );
    }

    #[tokio::test]
    async fn test_unavailable_broker_refuses_connections() {
        let broker = Arc::new(MemoryBroker::new());
        broker.set_available(false);
        assert!(matches!(
            broker.connect(),
            Err(ConnectionError::ConnectFailed { .. })
        ));

        broker.set_available(true);
        assert!(broker.connect().is_ok());
    }

    /// Проверяет, что drop соединения снимает его подписки.
    #[tokio::test]
    async fn test_drop_cleans_up() {
        let (broker, mut conn) = setup();
        conn.subscribe(&Topic::channel("c")).await.unwrap();
        assert_eq!(broker.channel_subscribers("c"), 1);

        drop(conn);
        assert_eq!(broker.connection_count(), 0);
        assert_eq!(broker.channel_subscribers("c"), 0);
    }

    #[tokio::test]
    async fn test_factory_connects_through_broker() {
        let broker = Arc::new(MemoryBroker::new());
        let factory = MemoryConnectionFactory::new(broker.clone());
        let mut conn = factory.connect().await.unwrap();

        conn.subscribe(&Topic::channel("f")).await.unwrap();
        assert_eq!(conn.publish("f", Bytes::from_static(b"1")).await.unwrap(), 1);
        assert_eq!(conn.receive().await.unwrap().payload, Bytes::from_static(b"1"));
        assert_eq!(factory.endpoint(), "memory://local");
    }
}

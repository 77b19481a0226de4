//! Subscription Registry: темы → слушатели.
//!
//! Реестр изменяется снаружи цикла диспетчеризации (из любых задач и
//! потоков) и читается им на каждое сообщение. Каждое изменение увеличивает
//! поколение в `watch`-канале, по которому цикл синхронизирует подписки
//! backend'а.

mod subscription;

pub use subscription::{MatchedListener, SubscriptionId};

use std::{collections::BTreeSet, fmt, sync::Arc};

use dashmap::DashMap;
use listener_container_error::RegistryError;
use tokio::sync::watch;
use tracing::debug;

use crate::pubsub::{Message, MessageListener, Topic};

struct Entry {
    topic: Topic,
    listener: Arc<dyn MessageListener>,
}

/// Потокобезопасный реестр подписок.
pub struct SubscriptionRegistry {
    entries: DashMap<SubscriptionId, Entry>,
    generation: watch::Sender<u64>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            generation: watch::Sender::new(0),
        }
    }

    /// Регистрирует слушателя на тему.
    pub fn subscribe<L: MessageListener>(
        &self,
        topic: Topic,
        listener: L,
    ) -> SubscriptionId {
        self.subscribe_shared(topic, Arc::new(listener))
    }

    /// То же, что [`subscribe`](Self::subscribe), для уже разделяемого
    /// слушателя. Один слушатель может быть подписан на несколько тем.
    pub fn subscribe_shared(
        &self,
        topic: Topic,
        listener: Arc<dyn MessageListener>,
    ) -> SubscriptionId {
        let id = SubscriptionId::next();
        debug!(subscription = %id, topic = %topic, "Listener subscribed");
        self.entries.insert(id, Entry { topic, listener });
        self.bump();
        id
    }

    /// Разбирает строку через [`Topic::parse`] и регистрирует слушателя.
    pub fn subscribe_str<L: MessageListener>(
        &self,
        topic: &str,
        listener: L,
    ) -> Result<SubscriptionId, RegistryError> {
        let topic = Topic::parse(topic)?;
        Ok(self.subscribe(topic, listener))
    }

    /// Удаляет подписку. После возврата слушатель не выбирается ни для
    /// одного нового сообщения.
    pub fn unsubscribe(
        &self,
        id: SubscriptionId,
    ) -> Result<(), RegistryError> {
        let (_, entry) = self
            .entries
            .remove(&id)
            .ok_or(RegistryError::NotFound { id: id.as_u64() })?;
        debug!(subscription = %id, topic = %entry.topic, "Listener unsubscribed");
        self.bump();
        Ok(())
    }

    /// Все подписки, чья тема подходит под канал, в порядке регистрации.
    pub fn matches(
        &self,
        channel: &str,
    ) -> Vec<MatchedListener> {
        self.collect(|topic| topic.matches(channel))
    }

    /// Слушатели для одной доставки backend'а.
    ///
    /// Backend присылает публикацию по разу на каждую совпавшую подписку,
    /// поэтому прямая доставка выбирает только подписки на канал, а
    /// доставка по шаблону только подписки на этот шаблон.
    pub fn route(
        &self,
        message: &Message,
    ) -> Vec<MatchedListener> {
        match message.pattern.as_deref() {
            None => self.collect(|topic| match topic {
                Topic::Channel(name) => **name == *message.channel,
                Topic::Pattern(_) => false,
            }),
            Some(pattern) => {
                self.collect(|topic| topic.is_pattern() && topic.as_str() == pattern)
            }
        }
    }

    /// Темы, на которые должен быть подписан backend.
    pub fn topics(&self) -> BTreeSet<Topic> {
        self.entries
            .iter()
            .map(|entry| entry.value().topic.clone())
            .collect()
    }

    pub fn topic_of(
        &self,
        id: SubscriptionId,
    ) -> Option<Topic> {
        self.entries.get(&id).map(|entry| entry.topic.clone())
    }

    pub fn contains(
        &self,
        id: SubscriptionId,
    ) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Удаляет все подписки.
    pub fn clear(&self) {
        self.entries.clear();
        self.bump();
    }

    /// Текущее поколение реестра.
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Подписка на изменения поколения.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    fn bump(&self) {
        self.generation.send_modify(|gen| *gen += 1);
    }

    fn collect<P>(
        &self,
        predicate: P,
    ) -> Vec<MatchedListener>
    where
        P: Fn(&Topic) -> bool,
    {
        let mut matched: Vec<MatchedListener> = self
            .entries
            .iter()
            .filter(|entry| predicate(&entry.value().topic))
            .map(|entry| MatchedListener {
                id: *entry.key(),
                topic: entry.value().topic.clone(),
                listener: entry.value().listener.clone(),
            })
            .collect();
        matched.sort_unstable_by_key(|m| m.id);
        matched
    }
}

////////////////////////////////////////////////////////////////////////////////
// Реализация типажей
////////////////////////////////////////////////////////////////////////////////

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &self.entries.len())
            .field("generation", &self.generation())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

use std::sync::Arc;

use bytes::Bytes;

use super::Topic;

/// Сообщение, доставленное backend'ом.
///
/// `pattern` заполнен, если backend доставил сообщение по шаблонной подписке
/// (аналог Redis `pmessage`), и пуст для подписки на точный канал.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: Arc<str>,
    pub payload: Bytes,
    pub pattern: Option<Arc<str>>,
}

impl Message {
    pub fn new(
        channel: impl Into<Arc<str>>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
            pattern: None,
        }
    }

    /// Помечает сообщение как доставленное по шаблону `pattern`.
    pub fn with_pattern(
        mut self,
        pattern: impl Into<Arc<str>>,
    ) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Копия сообщения для подписчика темы: `pattern` равен шаблону темы
    /// или пуст для подписки на канал.
    pub fn for_topic(
        &self,
        topic: &Topic,
    ) -> Message {
        Message {
            channel: self.channel.clone(),
            payload: self.payload.clone(),
            pattern: topic.pattern_source().cloned(),
        }
    }

    /// Payload как UTF-8, если он валиден.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет создание сообщения с &str и Vec<u8>.
    #[test]
    fn test_message_creation() {
        let msg = Message::new("news", b"hello world".to_vec());

        assert_eq!(&*msg.channel, "news");
        assert_eq!(msg.payload, Bytes::from_static(b"hello world"));
        assert_eq!(msg.pattern, None);
        assert_eq!(msg.payload_str(), Some("hello world"));
    }

    /// Тест проверяет, что бинарный payload не ломает `payload_str`.
    #[test]
    fn test_message_with_binary_payload() {
        let msg = Message::new(String::from("bin"), vec![0, 255, 128, 64, 0]);
        assert_eq!(msg.payload.len(), 5);
        assert_eq!(msg.payload_str(), None);
    }

    #[test]
    fn test_for_topic_sets_pattern() {
        let msg = Message::new("orders.created", "x");
        let pattern = Topic::pattern("orders.*").unwrap();

        let via_pattern = msg.for_topic(&pattern);
        assert_eq!(via_pattern.pattern.as_deref(), Some("orders.*"));
        assert_eq!(via_pattern.payload, msg.payload);

        let direct = via_pattern.for_topic(&Topic::channel("orders.created"));
        assert_eq!(direct.pattern, None);
    }

    #[test]
    fn test_message_with_pattern() {
        let msg = Message::new("orders.created", Bytes::new()).with_pattern("orders.*");
        assert_eq!(msg.pattern.as_deref(), Some("orders.*"));
        assert!(msg.payload.is_empty());
    }
}

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::pubsub::{MessageListener, Topic};

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Идентификатор подписки.
///
/// Уникален в пределах процесса и монотонно растёт, поэтому порядок
/// идентификаторов совпадает с порядком регистрации.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Слушатель, выбранный для доставки одного сообщения.
///
/// Владеет клонами `Arc`, поэтому не зависит от последующих изменений
/// реестра.
#[derive(Clone)]
pub struct MatchedListener {
    pub id: SubscriptionId,
    pub topic: Topic,
    pub listener: Arc<dyn MessageListener>,
}

impl fmt::Debug for MatchedListener {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("MatchedListener")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic() {
        let a = SubscriptionId::next();
        let b = SubscriptionId::next();
        assert!(b > a);
        assert_eq!(b.to_string(), format!("#{}", b.as_u64()));
    }
}

//! Модель данных pub/sub.
//!
//! - `topic`: точные каналы и glob-шаблоны.
//! - `message`: неизменяемое сообщение `(channel, payload, pattern)`.
//! - `listener`: интерфейс слушателя и адаптеры для замыканий.

pub mod listener;
pub mod message;
pub mod topic;

pub use listener::*;
pub use message::*;
pub use topic::*;

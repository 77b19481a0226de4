/// Backend implementations: in-process broker and Redis.
pub mod backend;
/// Application settings loading.
pub mod config;
/// Connection management: factory seam, retry policy, connection manager.
pub mod connection;
/// Listener container: lifecycle, dispatch loop, error observer.
pub mod container;
/// Flexible logging (formatting, filters, sinks).
pub mod logging;
/// Pub/Sub data model: Topic, Message, MessageListener.
pub mod pubsub;
/// Subscription registry: topics mapped to listeners.
pub mod registry;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Connection seam and manager.
pub use connection::{
    BoxConnection, Connection, ConnectionFactory, ConnectionManager, ConnectionStats, Delivery,
    Lease, RetryPolicy,
};
/// Container API.
pub use container::{
    observer_fn, ContainerConfig, ContainerEvent, ContainerState, ContainerStats, ErrorObserver,
    ListenerContainer, ListenerFailure, LoggingObserver,
};
/// Error types and result aliases.
pub use listener_container_error::{
    ConnectionError, ContainerError, ErrorExt, ListenerError, RegistryError, StackError,
    StackResult, StatusCode,
};
/// Pub/Sub API.
pub use pubsub::{listener_async, listener_fn, Message, MessageListener, Topic};
/// Subscription registry.
pub use registry::{MatchedListener, SubscriptionId, SubscriptionRegistry};

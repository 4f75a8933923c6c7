pub mod fanout;
pub mod guard;
pub mod lifecycle;
pub mod projection;
pub mod relay;
pub mod store;
pub mod viewer;
pub mod websocket;

pub use fanout::{RealtimeHub, Scope, Subscription, SubscriptionError};
pub use guard::{check_and_apply, Versioned};
pub use lifecycle::{select_next_ticket, QueueLifecycle};
pub use projection::{View, ViewProjector};
pub use relay::RedisRelay;
pub use store::{
    InMemoryQueueStore, InMemoryTicketStore, QueueStore, SupabaseQueueStore, SupabaseTicketStore,
    TicketStore,
};
pub use viewer::{QueueViewer, ViewerError, ViewerSource, ViewerUpdate};

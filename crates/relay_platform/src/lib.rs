#![forbid(unsafe_code)]

pub mod connection;
pub mod dispatch;
pub mod pool;
pub mod twitch;

#[cfg(test)]
mod dispatch_tests;

pub use connection::{CloseReason, Connection, ConnectionConfig, DEFAULT_RECONNECT_DELAY, Session, SessionAction};
pub use dispatch::{DEFAULT_BUFFER_CAPACITY, MessageBuffer, MessageDispatcher};
pub use pool::ConnectionPool;
pub use twitch::chat::{ChatConfig, ChatConnection, DEFAULT_CHAT_URL};
pub use twitch::chat_pattern::{ChatMessagePattern, ChatMessageProperty, TextMatch};
pub use twitch::connections::TwitchConnections;
pub use twitch::eventsub::{DEFAULT_EVENTSUB_URL, EventSubConfig, EventSubConnection};
pub use twitch::helix::{DEFAULT_HELIX_BASE_URL, HelixClient, TwitchTokenValidation, validate_user_token};
pub use twitch::subscriptions::{ApiResponse, PendingSubscription, Subscription, SubscriptionApi, SubscriptionRegistry};

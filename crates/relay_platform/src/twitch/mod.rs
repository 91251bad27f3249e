#![forbid(unsafe_code)]

pub mod chat;
pub mod chat_pattern;
pub mod connections;
pub mod eventsub;
pub mod helix;
pub mod subscriptions;



#[cfg(test)]
mod eventsub_tests;

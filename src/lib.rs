//! Home automation relay bot.
//!
//! This library routes sensor events published on an MQTT bus to chat
//! recipients and interprets chat commands that query sensors or manage
//! subscriptions.

pub mod bus;
pub mod chat;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod instance_lock;
pub mod relay;
pub mod router;
pub mod sensors;
pub mod store;
pub mod tasks;
pub mod topic;

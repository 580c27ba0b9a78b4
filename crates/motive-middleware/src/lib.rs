//! `motive-middleware` – The Nervous System
//!
//! Routes what the control cycle observes and decides to anyone who wants
//! to watch, without caring what they do with it.
//!
//! # Modules
//!
//! - [`bus`] – Headless, typed, topic-based publish/subscribe event bus built
//!   on Tokio broadcast channels.

pub mod bus;

pub use bus::{EventBus, Topic, TopicReceiver};

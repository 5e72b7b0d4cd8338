//! Event Bus
//!
//! In-memory, topic-keyed publish/subscribe registry. Producers publish a
//! payload under a topic name; every subscription registered for that topic
//! receives a shared copy through its own bounded channel.
//!
//! # Delivery policy
//!
//! Publishing never waits on a subscriber. When a subscriber's channel is
//! full the event is dropped for that subscriber only and counted in
//! [`BusStats::dropped`]. Stale telemetry is preferable to stalling every
//! collector behind one slow consumer.
//!
//! # Example
//!
//! ```rust
//! use hostpulse::bus::{EventBus, Topic};
//!
//! # #[tokio::main]
//! # async fn main() {
//! const GREETING: Topic<String> = Topic::new("greeting");
//!
//! let bus = EventBus::new(16);
//! let mut sub = bus.subscribe(GREETING.name());
//!
//! bus.publish_to(&GREETING, "hello".to_string());
//!
//! let event = sub.recv().await.unwrap();
//! assert_eq!(event.payload::<String>().unwrap(), "hello");
//! bus.unsubscribe(&sub, GREETING.name());
//! # }
//! ```

mod event;
mod hub;

pub use event::{Event, Topic};
pub use hub::{BusStats, DEFAULT_BUFFER_SIZE, EventBus, Subscription, SubscriptionId};

//! Event envelope and typed topic handles.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Type-erased payload shared by all receivers of one publish.
pub(crate) type Payload = Arc<dyn Any + Send + Sync>;

/// A published event as seen by a subscriber.
///
/// The payload is opaque to the bus. Receivers recover the concrete value
/// with [`Event::payload`] or [`Event::downcast`].
#[derive(Clone)]
pub struct Event {
    topic: Arc<str>,
    payload: Payload,
    published_at: DateTime<Utc>,
}

impl Event {
    pub(crate) fn new(topic: Arc<str>, payload: Payload) -> Self {
        Self {
            topic,
            payload,
            published_at: Utc::now(),
        }
    }

    /// Topic this event was published under.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wall-clock time of the publish call.
    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    /// Borrow the payload if it is a `T`.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Take a shared handle to the payload if it is a `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.payload).downcast::<T>().ok()
    }

    /// Whether the payload is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.payload.is::<T>()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("topic", &self.topic)
            .field("published_at", &self.published_at)
            .finish_non_exhaustive()
    }
}

/// A topic name bound to the payload type published under it.
///
/// Publishing through [`EventBus::publish_to`](super::EventBus::publish_to)
/// with a typed topic makes a payload type mismatch a compile error.
pub struct Topic<T> {
    name: &'static str,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Topic<T> {
    /// Create a typed topic.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _payload: PhantomData,
        }
    }

    /// Topic name on the wire.
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Topic<T> {}

impl<T> fmt::Debug for Topic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Topic").field(&self.name).finish()
    }
}

impl<T> fmt::Display for Topic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_downcast() {
        let event = Event::new(Arc::from("numbers"), Arc::new(42_u32));
        assert_eq!(event.topic(), "numbers");
        assert!(event.is::<u32>());
        assert_eq!(event.payload::<u32>(), Some(&42));
        assert!(event.payload::<String>().is_none());
        assert_eq!(*event.downcast::<u32>().unwrap(), 42);
    }

    #[test]
    fn test_topic_display() {
        const T: Topic<u8> = Topic::new("bytes");
        assert_eq!(T.name(), "bytes");
        assert_eq!(T.to_string(), "bytes");
    }
}

//! Messages and typed topics
//!
//! Messages are immutable once published. The bus shares them between
//! subscribers as `Arc<M>`, so the last subscriber job to finish frees them.

use std::fmt;
use std::marker::PhantomData;

use bytes::Bytes;

use crate::{MessageError, MessageResult};

/// Anything that can travel over a topic
pub trait Message: Send + Sync + 'static {
    /// Monotonic timestamp of the original publish event
    fn origin_timestamp(&self) -> i64;

    /// Reject timestamps the receiver's clock has not reached yet. Any other
    /// value, negative included, is a valid reading of the shared clock.
    fn validate(&self, now: i64) -> MessageResult<()> {
        let published_at = self.origin_timestamp();
        if published_at > now {
            return Err(MessageError::FromTheFuture { published_at, now });
        }
        Ok(())
    }
}

/// Camera frame. The payload is opaque to the pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    pub published_at_monotonic_nanos: i64,
    pub payload: Bytes,
}

impl Image {
    pub fn new(published_at_monotonic_nanos: i64, payload: Bytes) -> Self {
        Image {
            published_at_monotonic_nanos,
            payload,
        }
    }

    /// Image with an empty payload
    pub fn stamped(published_at_monotonic_nanos: i64) -> Self {
        Self::new(published_at_monotonic_nanos, Bytes::new())
    }
}

impl Message for Image {
    #[inline]
    fn origin_timestamp(&self) -> i64 {
        self.published_at_monotonic_nanos
    }
}

/// Signal from the object detector to the actuation node.
/// Carries the timestamp of the image that caused it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActuationTrigger {
    pub timestamp_nanos: i64,
}

impl ActuationTrigger {
    #[inline]
    pub fn new(timestamp_nanos: i64) -> Self {
        ActuationTrigger { timestamp_nanos }
    }
}

impl From<&Image> for ActuationTrigger {
    fn from(image: &Image) -> Self {
        ActuationTrigger::new(image.published_at_monotonic_nanos)
    }
}

impl Message for ActuationTrigger {
    #[inline]
    fn origin_timestamp(&self) -> i64 {
        self.timestamp_nanos
    }
}

/// Named topic bound to one message type
pub struct Topic<M> {
    name: &'static str,
    _message: PhantomData<fn() -> M>,
}

impl<M> Topic<M> {
    pub const fn new(name: &'static str) -> Self {
        Topic {
            name,
            _message: PhantomData,
        }
    }

    #[inline]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<M> Clone for Topic<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for Topic<M> {}

impl<M> PartialEq for Topic<M> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<M> Eq for Topic<M> {}

impl<M> fmt::Debug for Topic<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Topic({})", self.name)
    }
}

/// Camera frames
pub const IMAGE_TOPIC: Topic<Image> = Topic::new("/image");

/// Object detector to actuation
pub const ACTUATION_TOPIC: Topic<ActuationTrigger> = Topic::new("/actuation");

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_trigger_copies_image_timestamp() {
        let image = Image::new(1_234_567, Bytes::from_static(b"frame"));
        let trigger = ActuationTrigger::from(&image);
        assert_eq!(trigger.timestamp_nanos, 1_234_567);
        assert_eq!(trigger.origin_timestamp(), image.origin_timestamp());
    }

    #[test]
    fn test_validate_rejects_future() {
        let image = Image::stamped(2_000);
        assert_eq!(
            image.validate(1_000),
            Err(MessageError::FromTheFuture {
                published_at: 2_000,
                now: 1_000
            })
        );
        assert_eq!(image.validate(2_000), Ok(()));
    }

    #[test]
    fn test_validate_accepts_negative_epoch() {
        let trigger = ActuationTrigger::new(-5_000);
        assert_eq!(trigger.validate(-4_000), Ok(()));
        assert_eq!(
            trigger.validate(-6_000),
            Err(MessageError::FromTheFuture {
                published_at: -5_000,
                now: -6_000
            })
        );
    }

    #[test]
    fn test_topic_names() {
        assert_eq!(IMAGE_TOPIC.name(), "/image");
        assert_eq!(ACTUATION_TOPIC.name(), "/actuation");
        assert_ne!(IMAGE_TOPIC.name(), ACTUATION_TOPIC.name());
    }

    proptest! {
        #[test]
        fn validate_accepts_any_past_timestamp(published in -1_000_000_000i64..1_000_000_000, lag in 0i64..1_000_000_000) {
            let image = Image::stamped(published);
            prop_assert!(image.validate(published + lag).is_ok());
        }
    }
}

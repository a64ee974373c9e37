#![forbid(unsafe_code)]

use tokio::sync::broadcast;

use crate::Event;

/// Default channel depth. Sized for the busiest realistic window: with
/// half-second container chunks on two tracks, a full look-ahead of
/// appends produces on the order of a hundred `BufferUpdate`s before a
/// host that only polls between frames catches up.
const DEFAULT_CAPACITY: usize = 128;

/// One broadcast channel shared by every stage of the pipeline.
///
/// Producers, stream managers, the compositor and the feeders all hold a
/// clone and publish into it; the host (and tests) subscribe. Publishing
/// never blocks and never fails, so it is safe on the compositor's tick
/// path: with nobody listening the event just evaporates, and a
/// subscriber that falls behind loses the oldest events rather than
/// slowing the pipeline down.
#[derive(Clone, Debug)]
pub struct EventBus {
    inner: broadcast::Sender<Event>,
}

impl EventBus {
    /// A bus holding at most `capacity` undelivered events per
    /// subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (inner, _) = broadcast::channel(capacity.max(1));
        Self { inner }
    }

    /// Broadcast one event; any domain sub-enum converts in place, so
    /// call sites write `bus.publish(SourceEvent::EndOfStream { .. })`.
    ///
    /// Returns how many subscribers the event reached (zero when nobody
    /// is listening).
    pub fn publish<E: Into<Event>>(&self, event: E) -> usize {
        self.inner.send(event.into()).unwrap_or(0)
    }

    /// A fresh receiver that sees everything published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use diptych_core::SourceId;

    use super::*;
    use crate::{PlayerEvent, SourceEvent};

    #[test]
    fn publish_reports_listener_count() {
        let bus = EventBus::new(8);
        assert_eq!(
            bus.publish(PlayerEvent::TimeUpdate { current_time_s: 0.0 }),
            0
        );

        let _rx1 = bus.subscribe();
        let _rx2 = bus.subscribe();
        assert_eq!(
            bus.publish(PlayerEvent::TimeUpdate { current_time_s: 1.0 }),
            2
        );
    }

    #[tokio::test]
    async fn events_fan_out_to_every_subscriber() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(PlayerEvent::ActiveSourceChanged {
            source: SourceId::B,
        });
        for rx in [&mut rx1, &mut rx2] {
            assert!(matches!(
                rx.recv().await.unwrap(),
                Event::Player(PlayerEvent::ActiveSourceChanged {
                    source: SourceId::B
                })
            ));
        }
    }

    #[tokio::test]
    async fn sub_enum_values_publish_without_wrapping() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        bus.publish(SourceEvent::EndOfStream {
            source: SourceId::A,
        });
        assert!(matches!(rx.recv().await.unwrap(), Event::Source(_)));
    }

    #[tokio::test]
    async fn overflow_is_lossy_not_blocking() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..20 {
            // Publishing stays non-blocking well past the capacity.
            bus.publish(PlayerEvent::TimeUpdate {
                current_time_s: f64::from(i),
            });
        }
        // The slow subscriber learns it missed some, then reads on.
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        assert!(rx.recv().await.is_ok());
    }
}

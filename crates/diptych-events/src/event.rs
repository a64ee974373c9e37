#![forbid(unsafe_code)]

use crate::{PipelineEvent, PlayerEvent, SourceEvent};

/// Envelope carried on the bus.
///
/// One channel serves three audiences, so the envelope splits by who an
/// event is for: `Player` is the host-facing contract (buffer, time and
/// switch notifications plus terminal errors), `Source` narrates segment
/// transport, `Pipeline` is diagnostics from the decode/composite
/// stages. Hosts typically match on `Player` and ignore the rest; tests
/// dig into all three.
#[derive(Clone, Debug)]
pub enum Event {
    Player(PlayerEvent),
    Source(SourceEvent),
    Pipeline(PipelineEvent),
}

impl Event {
    /// The host-facing view of this event, if it has one.
    #[must_use]
    pub fn as_player(&self) -> Option<&PlayerEvent> {
        match self {
            Self::Player(event) => Some(event),
            Self::Source(_) | Self::Pipeline(_) => None,
        }
    }
}

/// Lets `EventBus::publish` accept domain events directly instead of
/// forcing every call site to name the envelope variant.
macro_rules! envelope {
    ($($domain:ty => $variant:ident),* $(,)?) => {$(
        impl From<$domain> for Event {
            fn from(event: $domain) -> Self {
                Self::$variant(event)
            }
        }
    )*};
}

envelope! {
    PlayerEvent => Player,
    SourceEvent => Source,
    PipelineEvent => Pipeline,
}

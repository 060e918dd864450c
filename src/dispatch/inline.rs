use std::sync::{Arc, Weak};

use crate::bus::{Bus, BusInner};
use crate::channel::Escalation;
use crate::consumer::Registration;
use crate::error::BusResult;
use crate::types::{ChannelKind, Delivery};

use super::Dispatcher;

/// Inline strategy: invokes the consumer on the emitting thread before
/// `enqueue` returns. No queue.
pub(crate) struct InlineDispatcher {
    bus: Weak<BusInner>,
    kind: ChannelKind,
}

impl InlineDispatcher {
    pub(crate) fn new(bus: Weak<BusInner>, kind: ChannelKind) -> Self {
        InlineDispatcher { bus, kind }
    }
}

impl Dispatcher for InlineDispatcher {
    fn enqueue(&self, registration: Arc<Registration>, delivery: Delivery) -> BusResult<()> {
        let Some(inner) = self.bus.upgrade() else {
            return Ok(());
        };
        let bus = Bus::from_inner(inner);
        bus.inner()
            .channel(self.kind)
            .invoke(&bus, &registration, &delivery, Escalation::Return)
    }
}

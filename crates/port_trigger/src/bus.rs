use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, trace};

use crate::event::{TriggerAction, TriggerEvent};

/// Publish/subscribe hub.  Cheap to clone; clones share the same channels.
#[derive(Clone)]
pub struct TriggerBus {
    channels: Arc<[watch::Sender<u64>; 3]>,
}

impl Default for TriggerBus {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerBus {
    pub fn new() -> Self {
        let channels = [
            watch::Sender::new(0),
            watch::Sender::new(0),
            watch::Sender::new(0),
        ];
        Self {
            channels: Arc::new(channels),
        }
    }

    fn channel(&self, event: TriggerEvent) -> &watch::Sender<u64> {
        &self.channels[event.index()]
    }

    /// Wake every current subscriber of `event`.  Never blocks; a no-op when
    /// nobody listens.
    pub fn publish(&self, event: TriggerEvent) {
        let channel = self.channel(event);
        channel.send_modify(|count| *count = count.wrapping_add(1));
        trace!(%event, subscribers = channel.receiver_count(), "trigger published");
    }

    pub fn subscribe(&self, event: TriggerEvent) -> TriggerHandle {
        TriggerHandle {
            event,
            rx: self.channel(event).subscribe(),
        }
    }

    pub fn subscriber_count(&self, event: TriggerEvent) -> usize {
        self.channel(event).receiver_count()
    }

    pub fn dispatch(&self, action: TriggerAction) {
        match action {
            TriggerAction::Publish(event) => self.publish(event),
            TriggerAction::Unknown(name) => {
                debug!(action = %name, "ignoring unknown trigger action");
            }
        }
    }
}

/// One subscriber's view of a single event type.
///
/// `current()` is the number of publishes so far.  A handle starts out with
/// everything before its creation already seen.
pub struct TriggerHandle {
    event: TriggerEvent,
    rx: watch::Receiver<u64>,
}

impl TriggerHandle {
    pub fn event(&self) -> TriggerEvent {
        self.event
    }

    pub fn current(&self) -> u64 {
        *self.rx.borrow()
    }

    /// Whether a publish happened since the last `mark_seen` / `changed`.
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    pub fn mark_seen(&mut self) -> u64 {
        *self.rx.borrow_and_update()
    }

    /// Wait for the next publish.  Returns `false` once every bus handle is
    /// gone and no further publish can arrive.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::VehicleEvent;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for per-vehicle scheduling events. Publish failures are
/// invisible to the scheduling decision already made.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<VehicleEvent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a vehicle. Creates the channel if needed.
    pub fn subscribe(&self, vehicle_id: Ulid) -> broadcast::Receiver<VehicleEvent> {
        let sender = self
            .channels
            .entry(vehicle_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. No-op if nobody is listening.
    pub fn send(&self, vehicle_id: Ulid, event: &VehicleEvent) {
        if let Some(sender) = self.channels.get(&vehicle_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when a vehicle is removed).
    pub fn remove(&self, vehicle_id: &Ulid) {
        self.channels.remove(vehicle_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Span;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let vid = Ulid::new();
        let mut rx = hub.subscribe(vid);

        let event = VehicleEvent::BookingApproved {
            booking_id: Ulid::new(),
            vehicle_id: vid,
        };
        hub.send(vid, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let vid = Ulid::new();
        // No subscriber — should not panic
        hub.send(
            vid,
            &VehicleEvent::BookingRescheduled {
                booking_id: Ulid::new(),
                vehicle_id: vid,
                from: Span::new(0, 100),
                to: Span::new(100, 200),
            },
        );
    }
}

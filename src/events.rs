// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2024 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! `EventBus`: per-location publish channel carrying
//! count updates, status transitions, and notifications to subscribed
//! clients.
//!
//! One `tokio::sync::broadcast::Sender<Event>` per location, stored in
//! a `base::FastHashMap` behind a `base::Mutex`. Delivery is best-effort:
//! `broadcast` drops the oldest buffered message for a lagging subscriber
//! rather than block the publisher.

use base::FastHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Severity of a `{location}_notification` event.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Primary,
    Success,
    Warning,
    Danger,
}

/// A `counter_status_event` status value. Distinct from the
/// in-memory `EngineStatus`: `Error` there maps to `error`
/// here, but wire values use the original past-tense vocabulary
/// (`started`/`paused`/`stopped`) subscribers expect.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireStatus {
    Started,
    Paused,
    Stopped,
    Error,
}

/// One of the three event kinds a location's subscribers can receive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Event {
    /// `{location}_count`: emitted on every processed frame that updates
    /// state.
    Count {
        location: String,
        total: i64,
        current: i64,
        defect: i64,
        correct: i64,
    },
    /// `{location}_notification`: emitted on operator commands and
    /// recoverable errors.
    Notification {
        location: String,
        kind: NotificationKind,
        message: String,
    },
    /// `counter_status_event`: emitted on state transitions.
    Status {
        location: String,
        status: WireStatus,
    },
}

impl Event {
    pub fn location(&self) -> &str {
        match self {
            Event::Count { location, .. } => location,
            Event::Notification { location, .. } => location,
            Event::Status { location, .. } => location,
        }
    }
}

/// Number of buffered-but-unread events a subscriber may lag behind before
/// the oldest are dropped.
const CHANNEL_CAPACITY: usize = 64;

/// Process-wide fan-out of [`Event`]s, one broadcast channel per location.
///
/// Ordered per subscriber per kind: within one location's channel, all
/// three kinds share a single `broadcast::Sender`, so delivery order across
/// kinds to one subscriber matches publish order, which trivially provides
/// per-subscriber per-kind ordering too.
pub struct EventBus {
    channels: base::Mutex<FastHashMap<String, broadcast::Sender<Event>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            channels: base::Mutex::new(FastHashMap::default()),
        }
    }

    fn sender_for(&self, location: &str) -> broadcast::Sender<Event> {
        let mut channels = self.channels.lock();
        channels
            .entry(location.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Subscribes to all events for `location`. Distinct callers of
    /// `subscribe` for the same location fan out from the same underlying
    /// channel.
    pub fn subscribe(&self, location: &str) -> broadcast::Receiver<Event> {
        self.sender_for(location).subscribe()
    }

    /// Publishes `event`. Best-effort: if there are no subscribers, or a
    /// subscriber's buffer is full, the event (or the subscriber's oldest
    /// unread event) is silently dropped rather than blocking the caller.
    pub fn publish(&self, event: Event) {
        let sender = self.sender_for(event.location());
        // An error here just means there are currently no subscribers.
        let _ = sender.send(event);
    }

    pub fn publish_count(&self, location: &str, total: i64, current: i64, defect: i64, correct: i64) {
        self.publish(Event::Count {
            location: location.to_string(),
            total,
            current,
            defect,
            correct,
        });
    }

    pub fn publish_notification(&self, location: &str, kind: NotificationKind, message: impl Into<String>) {
        self.publish(Event::Notification {
            location: location.to_string(),
            kind,
            message: message.into(),
        });
    }

    pub fn publish_status(&self, location: &str, status: WireStatus) {
        self.publish(Event::Status {
            location: location.to_string(),
            status,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_receives_events_for_its_location_only() {
        let bus = EventBus::new();
        let mut a = bus.subscribe("dock-1");
        let mut b = bus.subscribe("dock-2");
        bus.publish_count("dock-1", 1, 1, 0, 0);
        let got = a.try_recv().unwrap();
        assert_eq!(got.location(), "dock-1");
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn events_for_one_subscriber_arrive_in_publish_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("dock-1");
        bus.publish_status("dock-1", WireStatus::Started);
        bus.publish_count("dock-1", 1, 1, 0, 0);
        bus.publish_notification("dock-1", NotificationKind::Primary, "hi");
        match rx.try_recv().unwrap() {
            Event::Status { status, .. } => assert_eq!(status, WireStatus::Started),
            other => panic!("unexpected {other:?}"),
        }
        match rx.try_recv().unwrap() {
            Event::Count { total, .. } => assert_eq!(total, 1),
            other => panic!("unexpected {other:?}"),
        }
        match rx.try_recv().unwrap() {
            Event::Notification { message, .. } => assert_eq!(message, "hi"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish_count("dock-1", 1, 1, 0, 0);
    }

    #[test]
    fn multiple_subscribers_to_same_location_all_receive() {
        let bus = EventBus::new();
        let mut a = bus.subscribe("dock-1");
        let mut b = bus.subscribe("dock-1");
        bus.publish_count("dock-1", 5, 5, 0, 0);
        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_ok());
    }
}

//! # In-Process Memory Hub
//!
//! A [`Transport`] backed by shared memory. Every device of an account that
//! opens `"{prefix}:{owner}"` on the same hub lands in the same channel.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          MemoryHub                                      │
//! │                                                                         │
//! │   channels: "sync:user-1" ──► [ member 1 ] [ member 2 ] [ member 3 ]    │
//! │                                   │             │            │          │
//! │                                 sink          sink         sink         │
//! │                                   │             │            │          │
//! │                                device A      device B     device C      │
//! │                                                                         │
//! │   send() from member 2     ──► members 1 and 3 (self excluded)          │
//! │   publish_row_change()     ──► every member whose binding matches       │
//! │   fail_channel()/close_all ──► status to every member                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Channels join instantly. Members whose manager has gone away are pruned
//! on the next delivery.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use tether_core::{ChangeType, ChannelStatus};

use crate::error::{SyncError, SyncResult};
use crate::transport::{
    BroadcastMessage, Channel, ChannelOptions, ChannelSink, RowChangeBinding, Transport,
};

// =============================================================================
// Row Filter
// =============================================================================

/// Comparison operator of a row filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
}

/// A parsed `column=op.value` row filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFilter {
    pub column: String,
    pub op: FilterOp,
    pub value: String,
}

impl RowFilter {
    /// Parses `owner_id=eq.user-1`. Returns `None` for anything else.
    pub fn parse(filter: &str) -> Option<Self> {
        let (column, rest) = filter.split_once('=')?;
        let (op, value) = rest.split_once('.')?;
        let op = match op {
            "eq" => FilterOp::Eq,
            "neq" => FilterOp::Neq,
            _ => return None,
        };
        if column.is_empty() {
            return None;
        }
        Some(RowFilter {
            column: column.to_string(),
            op,
            value: value.to_string(),
        })
    }

    /// Evaluates the filter against a JSON row.
    pub fn matches(&self, row: &serde_json::Value) -> bool {
        let actual = match row.get(&self.column) {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };
        let equal = actual.as_deref() == Some(self.value.as_str());
        match self.op {
            FilterOp::Eq => equal,
            FilterOp::Neq => !equal,
        }
    }
}

fn binding_matches(
    binding: &RowChangeBinding,
    resource_name: &str,
    row: &serde_json::Value,
) -> bool {
    if binding.resource_name != resource_name {
        return false;
    }
    match &binding.filter {
        None => true,
        Some(filter) => match RowFilter::parse(filter) {
            Some(parsed) => parsed.matches(row),
            None => {
                warn!(filter = %filter, "Unsupported row filter, never matches");
                false
            }
        },
    }
}

// =============================================================================
// Hub
// =============================================================================

struct Member {
    id: Uuid,
    options: ChannelOptions,
    bindings: Vec<RowChangeBinding>,
    broadcast_events: Vec<String>,
    sink: ChannelSink,
}

#[derive(Default)]
struct HubInner {
    channels: HashMap<String, Vec<Member>>,
}

/// Shared in-process pub/sub backend.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport attached to this hub (one per device).
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport { hub: self.clone() }
    }

    /// Number of live members of `channel`.
    pub fn member_count(&self, channel: &str) -> usize {
        self.inner
            .lock()
            .channels
            .get(channel)
            .map_or(0, |members| members.len())
    }

    /// Delivers a row change to every matching binding on every channel.
    ///
    /// Only the resource name and change type reach subscribers; `row` is
    /// used for filter evaluation. Returns the number of deliveries.
    pub fn publish_row_change(
        &self,
        resource_name: &str,
        change_type: ChangeType,
        row: &serde_json::Value,
    ) -> usize {
        let mut delivered = 0;
        let mut inner = self.inner.lock();
        for members in inner.channels.values_mut() {
            members.retain(|member| {
                if !member
                    .bindings
                    .iter()
                    .any(|b| binding_matches(b, resource_name, row))
                {
                    return true;
                }
                let alive = member.sink.row_change(resource_name, change_type);
                if alive {
                    delivered += 1;
                }
                alive
            });
        }
        inner.channels.retain(|_, members| !members.is_empty());
        debug!(resource = resource_name, %change_type, delivered, "Row change published");
        delivered
    }

    /// Reports `status` to every member of `channel`.
    pub fn fail_channel(&self, channel: &str, status: ChannelStatus) -> usize {
        let mut inner = self.inner.lock();
        let Some(members) = inner.channels.get_mut(channel) else {
            return 0;
        };
        members.retain(|member| member.sink.status(status));
        let count = members.len();
        debug!(channel, %status, count, "Injected channel status");
        count
    }

    /// Reports `closed` to every member of every channel.
    pub fn close_all(&self) -> usize {
        let mut inner = self.inner.lock();
        let mut count = 0;
        for members in inner.channels.values_mut() {
            members.retain(|member| member.sink.status(ChannelStatus::Closed));
            count += members.len();
        }
        count
    }

    fn join(&self, channel: &str, member: Member) {
        let mut inner = self.inner.lock();
        let members = inner.channels.entry(channel.to_string()).or_default();
        members.retain(|m| !m.sink.is_closed());
        if member.sink.status(ChannelStatus::Joined) {
            members.push(member);
        }
    }

    fn leave(&self, channel: &str, id: Uuid) {
        let mut inner = self.inner.lock();
        if let Some(members) = inner.channels.get_mut(channel) {
            members.retain(|m| m.id != id);
            if members.is_empty() {
                inner.channels.remove(channel);
            }
        }
    }

    fn deliver_broadcast(&self, channel: &str, from: Uuid, message: &BroadcastMessage) -> usize {
        let mut inner = self.inner.lock();
        let Some(members) = inner.channels.get_mut(channel) else {
            return 0;
        };

        let include_self = members
            .iter()
            .find(|m| m.id == from)
            .is_some_and(|m| m.options.broadcast_self);

        let mut delivered = 0;
        members.retain(|member| {
            if member.id == from && !include_self {
                return true;
            }
            if !member.broadcast_events.iter().any(|e| *e == message.event) {
                return true;
            }
            let alive = member
                .sink
                .broadcast(&message.event, message.payload.clone());
            if alive {
                delivered += 1;
            }
            alive
        });
        delivered
    }

    fn is_member(&self, channel: &str, id: Uuid) -> bool {
        self.inner
            .lock()
            .channels
            .get(channel)
            .is_some_and(|members| members.iter().any(|m| m.id == id))
    }
}

// =============================================================================
// Transport & Channel
// =============================================================================

/// One device's view of a [`MemoryHub`].
#[derive(Clone)]
pub struct MemoryTransport {
    hub: MemoryHub,
}

impl Transport for MemoryTransport {
    type Channel = MemoryChannel;

    fn open_channel(&mut self, name: &str, options: &ChannelOptions) -> MemoryChannel {
        MemoryChannel {
            id: Uuid::new_v4(),
            name: name.to_string(),
            options: options.clone(),
            bindings: Vec::new(),
            broadcast_events: Vec::new(),
            hub: self.hub.clone(),
        }
    }

    fn close_channel(&mut self, channel: MemoryChannel) {
        self.hub.leave(&channel.name, channel.id);
    }
}

/// A channel on a [`MemoryHub`].
pub struct MemoryChannel {
    id: Uuid,
    name: String,
    options: ChannelOptions,
    bindings: Vec<RowChangeBinding>,
    broadcast_events: Vec<String>,
    hub: MemoryHub,
}

impl Channel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_row_change(&mut self, binding: RowChangeBinding) {
        self.bindings.push(binding);
    }

    fn on_broadcast(&mut self, event: &str) {
        self.broadcast_events.push(event.to_string());
    }

    fn subscribe(&mut self, sink: ChannelSink) {
        let member = Member {
            id: self.id,
            options: self.options.clone(),
            bindings: self.bindings.clone(),
            broadcast_events: self.broadcast_events.clone(),
            sink,
        };
        self.hub.join(&self.name, member);
    }

    fn send(&mut self, message: BroadcastMessage) -> SyncResult<()> {
        if !self.hub.is_member(&self.name, self.id) {
            return Err(SyncError::ChannelClosed(self.name.clone()));
        }
        let delivered = self.hub.deliver_broadcast(&self.name, self.id, &message);
        debug!(channel = %self.name, event = %message.event, delivered, "Broadcast delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{ChannelEvent, Signal};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn joined_channel(
        transport: &mut MemoryTransport,
        name: &str,
        filter: Option<&str>,
    ) -> (MemoryChannel, mpsc::UnboundedReceiver<Signal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut channel = transport.open_channel(name, &ChannelOptions::default());
        channel.on_row_change(RowChangeBinding {
            resource_name: "items".into(),
            filter: filter.map(str::to_string),
        });
        channel.on_broadcast("sync");
        channel.subscribe(ChannelSink::new(1, tx));
        (channel, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Signal>) -> Vec<ChannelEvent> {
        let mut events = Vec::new();
        while let Ok(Signal::Channel { event, .. }) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_row_filter_parse_and_match() {
        let filter = RowFilter::parse("owner_id=eq.user-1").unwrap();
        assert_eq!(filter.op, FilterOp::Eq);
        assert!(filter.matches(&json!({"owner_id": "user-1"})));
        assert!(!filter.matches(&json!({"owner_id": "user-2"})));
        assert!(!filter.matches(&json!({})));

        let numeric = RowFilter::parse("version=neq.3").unwrap();
        assert!(!numeric.matches(&json!({"version": 3})));
        assert!(numeric.matches(&json!({"version": 4})));

        assert!(RowFilter::parse("owner_id=like.user%").is_none());
        assert!(RowFilter::parse("owner_id").is_none());
    }

    #[test]
    fn test_subscribe_joins_immediately() {
        let hub = MemoryHub::new();
        let mut transport = hub.transport();
        let (_channel, mut rx) = joined_channel(&mut transport, "sync:u1", None);

        assert_eq!(drain(&mut rx), vec![ChannelEvent::Status(ChannelStatus::Joined)]);
        assert_eq!(hub.member_count("sync:u1"), 1);
    }

    #[test]
    fn test_broadcast_excludes_sender() {
        let hub = MemoryHub::new();
        let mut a = hub.transport();
        let mut b = hub.transport();
        let (mut channel_a, mut rx_a) = joined_channel(&mut a, "sync:u1", None);
        let (_channel_b, mut rx_b) = joined_channel(&mut b, "sync:u1", None);
        drain(&mut rx_a);
        drain(&mut rx_b);

        channel_a
            .send(BroadcastMessage {
                event: "sync".into(),
                payload: json!({"type": "refresh"}),
            })
            .unwrap();

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(
            drain(&mut rx_b),
            vec![ChannelEvent::Broadcast {
                event: "sync".into(),
                payload: json!({"type": "refresh"})
            }]
        );
    }

    #[test]
    fn test_row_change_respects_filter() {
        let hub = MemoryHub::new();
        let mut transport = hub.transport();
        let (_mine, mut rx_mine) =
            joined_channel(&mut transport, "sync:u1", Some("owner_id=eq.u1"));
        let (_other, mut rx_other) =
            joined_channel(&mut transport, "sync:u2", Some("owner_id=eq.u2"));
        drain(&mut rx_mine);
        drain(&mut rx_other);

        let delivered =
            hub.publish_row_change("items", ChangeType::Insert, &json!({"owner_id": "u1"}));

        assert_eq!(delivered, 1);
        assert_eq!(drain(&mut rx_mine).len(), 1);
        assert!(drain(&mut rx_other).is_empty());
        assert_eq!(hub.publish_row_change("notes", ChangeType::Insert, &json!({})), 0);
    }

    #[test]
    fn test_closed_channel_leaves_and_cannot_send() {
        let hub = MemoryHub::new();
        let mut transport = hub.transport();
        let (channel, _rx) = joined_channel(&mut transport, "sync:u1", None);

        let mut handle = MemoryChannel {
            id: channel.id,
            name: channel.name.clone(),
            options: ChannelOptions::default(),
            bindings: Vec::new(),
            broadcast_events: Vec::new(),
            hub: hub.clone(),
        };
        transport.close_channel(channel);

        assert_eq!(hub.member_count("sync:u1"), 0);
        let err = handle
            .send(BroadcastMessage {
                event: "sync".into(),
                payload: json!(null),
            })
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_dead_members_are_pruned() {
        let hub = MemoryHub::new();
        let mut transport = hub.transport();
        let (_channel, rx) = joined_channel(&mut transport, "sync:u1", None);
        drop(rx);

        assert_eq!(hub.fail_channel("sync:u1", ChannelStatus::Errored), 0);
        assert_eq!(hub.member_count("sync:u1"), 0);
    }

    #[test]
    fn test_failure_injection() {
        let hub = MemoryHub::new();
        let mut transport = hub.transport();
        let (_a, mut rx_a) = joined_channel(&mut transport, "sync:u1", None);
        let (_b, mut rx_b) = joined_channel(&mut transport, "sync:u2", None);
        drain(&mut rx_a);
        drain(&mut rx_b);

        assert_eq!(hub.fail_channel("sync:u1", ChannelStatus::Errored), 1);
        assert_eq!(drain(&mut rx_a), vec![ChannelEvent::Status(ChannelStatus::Errored)]);
        assert!(drain(&mut rx_b).is_empty());

        assert_eq!(hub.close_all(), 2);
        assert_eq!(drain(&mut rx_b), vec![ChannelEvent::Status(ChannelStatus::Closed)]);
        assert_eq!(hub.fail_channel("sync:missing", ChannelStatus::Errored), 0);
    }
}

//! Recording doubles shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tether_core::SyncEvent;

use crate::error::{SyncError, SyncResult};
use crate::listener::{Diagnostic, SyncListener};
use crate::transport::{
    BroadcastMessage, Channel, ChannelOptions, ChannelSink, RowChangeBinding, Transport,
};

/// Channel lifecycle calls, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TransportCall {
    Open(String),
    Close(String),
}

/// What a channel was wired with before `subscribe`.
#[derive(Debug, Clone, Default)]
pub(crate) struct ChannelWiring {
    pub options: ChannelOptions,
    pub bindings: Vec<RowChangeBinding>,
    pub broadcast_events: Vec<String>,
}

#[derive(Default)]
struct Recorded {
    calls: Vec<TransportCall>,
    wiring: Vec<ChannelWiring>,
    sinks: Vec<ChannelSink>,
    sent: Vec<BroadcastMessage>,
    fail_sends: bool,
}

#[derive(Clone, Default)]
pub(crate) struct RecordingTransport {
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingTransport {
    pub fn calls(&self) -> Vec<TransportCall> {
        self.recorded.lock().calls.clone()
    }

    pub fn opened(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Open(name) => Some(name),
                TransportCall::Close(_) => None,
            })
            .collect()
    }

    pub fn wiring(&self, index: usize) -> ChannelWiring {
        self.recorded.lock().wiring[index].clone()
    }

    pub fn last_sink(&self) -> ChannelSink {
        self.recorded
            .lock()
            .sinks
            .last()
            .cloned()
            .expect("no channel subscribed yet")
    }

    pub fn sent(&self) -> Vec<BroadcastMessage> {
        self.recorded.lock().sent.clone()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.recorded.lock().fail_sends = fail;
    }
}

pub(crate) struct RecordingChannel {
    name: String,
    wiring: ChannelWiring,
    recorded: Arc<Mutex<Recorded>>,
}

impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_row_change(&mut self, binding: RowChangeBinding) {
        self.wiring.bindings.push(binding);
    }

    fn on_broadcast(&mut self, event: &str) {
        self.wiring.broadcast_events.push(event.to_string());
    }

    fn subscribe(&mut self, sink: ChannelSink) {
        let mut recorded = self.recorded.lock();
        recorded.wiring.push(self.wiring.clone());
        recorded.sinks.push(sink);
    }

    fn send(&mut self, message: BroadcastMessage) -> SyncResult<()> {
        let mut recorded = self.recorded.lock();
        if recorded.fail_sends {
            return Err(SyncError::SendFailed {
                channel: self.name.clone(),
                reason: "injected".into(),
            });
        }
        recorded.sent.push(message);
        Ok(())
    }
}

impl Transport for RecordingTransport {
    type Channel = RecordingChannel;

    fn open_channel(&mut self, name: &str, options: &ChannelOptions) -> RecordingChannel {
        self.recorded
            .lock()
            .calls
            .push(TransportCall::Open(name.to_string()));
        RecordingChannel {
            name: name.to_string(),
            wiring: ChannelWiring {
                options: options.clone(),
                ..Default::default()
            },
            recorded: self.recorded.clone(),
        }
    }

    fn close_channel(&mut self, channel: RecordingChannel) {
        self.recorded
            .lock()
            .calls
            .push(TransportCall::Close(channel.name));
    }
}

#[derive(Default)]
pub(crate) struct RecordingListener {
    events: Mutex<Vec<SyncEvent>>,
    reconnects: AtomicUsize,
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().clone()
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().clone()
    }
}

impl SyncListener for RecordingListener {
    fn on_event(&self, event: SyncEvent) {
        self.events.lock().push(event);
    }

    fn on_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_diagnostic(&self, diagnostic: &Diagnostic) {
        self.diagnostics.lock().push(diagnostic.clone());
    }
}

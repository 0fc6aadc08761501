//! In-memory fakes for the runtime and transport traits.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc::{UnboundedSender, unbounded};
use tokio::time::Instant;

use crate::domain::{DiscoveredUnit, EventFilter, EventKind, EventRecord, UnitState};
use crate::heartbeat::{HeartbeatTransport, TransportError};
use crate::runtime::{ContainerRuntime, DiscoveryStream, EventStream, RuntimeError};

/// Scripted reply of [`RecordingTransport`].
#[derive(Debug, Clone, Copy)]
pub enum TransportReply {
    Status(u16),
    Refused,
    /// Never answers.
    Hang,
    /// Panics inside the request.
    Panic,
}

/// Transport that records every request and answers from a script.
pub struct RecordingTransport {
    replies: Mutex<VecDeque<TransportReply>>,
    fallback: TransportReply,
    requests: Mutex<Vec<(String, Instant)>>,
}

impl RecordingTransport {
    pub fn always(reply: TransportReply) -> Self {
        Self::scripted(Vec::new(), reply)
    }

    pub fn ok() -> Self {
        Self::always(TransportReply::Status(200))
    }

    pub fn scripted(replies: Vec<TransportReply>, fallback: TransportReply) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    pub fn request_times(&self) -> Vec<Instant> {
        self.requests.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn count_url(&self, url: &str) -> usize {
        self.urls().iter().filter(|u| u.as_str() == url).count()
    }
}

#[async_trait]
impl HeartbeatTransport for RecordingTransport {
    async fn get(&self, url: &str) -> Result<u16, TransportError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);
        match reply {
            TransportReply::Status(status) => Ok(status),
            TransportReply::Refused => Err(TransportError::new("connection refused")),
            TransportReply::Hang => futures::future::pending().await,
            TransportReply::Panic => panic!("transport exploded"),
        }
    }
}

/// Scripted answer to a state query.
#[derive(Debug, Clone)]
pub enum FakeState {
    State(UnitState),
    NotFound,
    Failed,
}

#[derive(Default)]
struct StateScript {
    queue: VecDeque<FakeState>,
    fallback: Option<FakeState>,
}

#[derive(Default)]
struct FakeUnitEvents {
    preloaded: Vec<EventKind>,
    close_after_preload: bool,
    fail_subscription: bool,
    sender: Option<UnboundedSender<EventRecord>>,
    subscriptions: usize,
}

/// Runtime fake with scripted states and channel-fed event feeds.
#[derive(Default)]
pub struct FakeRuntime {
    states: Mutex<HashMap<String, StateScript>>,
    inspections: Mutex<HashMap<String, usize>>,
    events: Mutex<HashMap<String, FakeUnitEvents>>,
    existing: Mutex<Vec<DiscoveredUnit>>,
    creations: Mutex<Option<UnboundedSender<DiscoveredUnit>>>,
    fail_listing: Mutex<bool>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every query for `id` with `state`.
    pub fn set_state(&self, id: &str, state: FakeState) {
        let mut states = self.states.lock().unwrap();
        let script = states.entry(id.to_string()).or_default();
        script.queue.clear();
        script.fallback = Some(state);
    }

    /// Answer the next queries for `id` from `states`, then with `fallback`.
    pub fn script_states(&self, id: &str, states: Vec<FakeState>, fallback: FakeState) {
        self.states.lock().unwrap().insert(
            id.to_string(),
            StateScript {
                queue: states.into(),
                fallback: Some(fallback),
            },
        );
    }

    pub fn inspections(&self, id: &str) -> usize {
        self.inspections
            .lock()
            .unwrap()
            .get(id)
            .copied()
            .unwrap_or_default()
    }

    /// Events delivered as soon as `id` subscribes.
    pub fn preload_events(&self, id: &str, kinds: Vec<EventKind>, close_after: bool) {
        let mut events = self.events.lock().unwrap();
        let unit = events.entry(id.to_string()).or_default();
        unit.preloaded = kinds;
        unit.close_after_preload = close_after;
    }

    pub fn fail_subscriptions(&self, id: &str) {
        self.events
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .fail_subscription = true;
    }

    pub fn subscriptions(&self, id: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .get(id)
            .map(|unit| unit.subscriptions)
            .unwrap_or_default()
    }

    /// Push an event into the live feed of `id`. Returns false if nobody listens.
    pub fn emit(&self, id: &str, kind: EventKind) -> bool {
        let events = self.events.lock().unwrap();
        match events.get(id).and_then(|unit| unit.sender.as_ref()) {
            Some(sender) => sender
                .unbounded_send(EventRecord::new(id, kind))
                .is_ok(),
            None => false,
        }
    }

    /// End the live feed of `id`.
    pub fn close_events(&self, id: &str) {
        if let Some(unit) = self.events.lock().unwrap().get_mut(id) {
            unit.sender = None;
        }
    }

    pub fn add_existing(&self, unit: DiscoveredUnit) {
        self.existing.lock().unwrap().push(unit);
    }

    pub fn fail_listing(&self) {
        *self.fail_listing.lock().unwrap() = true;
    }

    /// Announce a newly created container. Returns false if nobody listens.
    pub fn announce(&self, unit: DiscoveredUnit) -> bool {
        match self.creations.lock().unwrap().as_ref() {
            Some(sender) => sender.unbounded_send(unit).is_ok(),
            None => false,
        }
    }

    pub fn close_creations(&self) {
        *self.creations.lock().unwrap() = None;
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn inspect_state(&self, id: &str) -> Result<UnitState, RuntimeError> {
        *self
            .inspections
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default() += 1;

        let next = {
            let mut states = self.states.lock().unwrap();
            states.get_mut(id).and_then(|script| {
                script
                    .queue
                    .pop_front()
                    .or_else(|| script.fallback.clone())
            })
        };

        match next {
            Some(FakeState::State(state)) => Ok(state),
            Some(FakeState::Failed) => Err(RuntimeError::CommandFailed {
                command: "inspect".to_string(),
                message: "daemon unavailable".to_string(),
            }),
            Some(FakeState::NotFound) | None => Err(RuntimeError::NotFound(id.to_string())),
        }
    }

    async fn subscribe_events(&self, filter: &EventFilter) -> Result<EventStream, RuntimeError> {
        let id = filter.unit_id.clone().unwrap_or_default();
        let mut events = self.events.lock().unwrap();
        let unit = events.entry(id.clone()).or_default();
        unit.subscriptions += 1;

        if unit.fail_subscription {
            return Err(RuntimeError::CommandFailed {
                command: "events".to_string(),
                message: "permission denied".to_string(),
            });
        }

        let (tx, rx) = unbounded();
        for kind in unit.preloaded.drain(..) {
            let _ = tx.unbounded_send(EventRecord::new(id.clone(), kind));
        }
        unit.sender = if unit.close_after_preload {
            None
        } else {
            Some(tx)
        };

        Ok(rx.boxed())
    }

    async fn list_units(&self, _label: &str) -> Result<Vec<DiscoveredUnit>, RuntimeError> {
        if *self.fail_listing.lock().unwrap() {
            return Err(RuntimeError::CommandFailed {
                command: "ps".to_string(),
                message: "daemon unavailable".to_string(),
            });
        }
        Ok(self.existing.lock().unwrap().clone())
    }

    async fn subscribe_creations(&self, _label: &str) -> Result<DiscoveryStream, RuntimeError> {
        let (tx, rx) = unbounded();
        *self.creations.lock().unwrap() = Some(tx);
        Ok(rx.boxed())
    }
}

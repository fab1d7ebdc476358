use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::channel::{
    Acker, BrokerConnection, Channel, Connection, Connector, Delivery, DeliveryStream,
    ErrorObserver,
};
use crate::{BrokerError, Result};

#[derive(Debug, Clone)]
struct Envelope {
    body: Vec<u8>,
    redelivered: bool,
}

struct Consumer {
    channel_id: u64,
    sender: mpsc::UnboundedSender<Result<Delivery>>,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Envelope>,
    consumers: Vec<Consumer>,
    next_consumer: usize,
    next_tag: u64,
    // delivery tag -> (channel id, envelope)
    unacked: HashMap<u64, (u64, Envelope)>,
    rejected: Vec<Vec<u8>>,
}

struct ChannelEntry {
    connection_id: u64,
    open: bool,
    degraded: Option<String>,
    observers: Vec<ErrorObserver>,
}

struct ConnectionEntry {
    open: bool,
    observers: Vec<ErrorObserver>,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, Vec<String>>,
    queues: HashMap<String, QueueState>,
    channels: HashMap<u64, ChannelEntry>,
    connections: HashMap<u64, ConnectionEntry>,
    published: Vec<(String, Vec<u8>)>,
    connect_failures_remaining: u32,
    connect_attempts: u32,
    fail_on_publish: bool,
    next_id: u64,
}

impl BrokerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn ensure_usable(&self, channel_id: u64) -> Result<()> {
        match self.channels.get(&channel_id) {
            Some(entry) if !entry.open => Err(BrokerError::Closed),
            Some(entry) => match &entry.degraded {
                Some(reason) => Err(BrokerError::Channel(reason.clone())),
                None => Ok(()),
            },
            None => Err(BrokerError::Closed),
        }
    }

    fn close_channel(&mut self, channel_id: u64) {
        if let Some(entry) = self.channels.get_mut(&channel_id) {
            entry.open = false;
        }
        for queue in self.queues.values_mut() {
            queue.consumers.retain(|c| c.channel_id != channel_id);
            let orphaned: Vec<u64> = queue
                .unacked
                .iter()
                .filter(|(_, (owner, _))| *owner == channel_id)
                .map(|(tag, _)| *tag)
                .collect();
            for tag in orphaned {
                if let Some((_, mut envelope)) = queue.unacked.remove(&tag) {
                    envelope.redelivered = true;
                    queue.ready.push_front(envelope);
                }
            }
        }
    }
}

type SharedState = Arc<Mutex<BrokerState>>;
type StateGuard<'a> = MutexGuard<'a, BrokerState>;

fn lock(state: &SharedState) -> MutexGuard<'_, BrokerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Hands ready messages of `queue` to its live consumers, round-robin.
fn dispatch(shared: &SharedState, state: &mut BrokerState, queue_name: &str) {
    let Some(queue) = state.queues.get_mut(queue_name) else {
        return;
    };
    loop {
        queue.consumers.retain(|c| !c.sender.is_closed());
        if queue.consumers.is_empty() {
            break;
        }
        let Some(envelope) = queue.ready.pop_front() else {
            break;
        };
        queue.next_tag += 1;
        let tag = queue.next_tag;
        let index = queue.next_consumer % queue.consumers.len();
        queue.next_consumer = queue.next_consumer.wrapping_add(1);
        let consumer = &queue.consumers[index];

        let acker = InMemoryAcker {
            state: Arc::clone(shared),
            queue: queue_name.to_string(),
            tag,
        };
        let delivery = Delivery::new(
            tag,
            envelope.redelivered,
            envelope.body.clone(),
            Box::new(acker),
        );
        let channel_id = consumer.channel_id;
        // A receiver dropped since the retain above leaves the entry unacked
        // until its channel closes, like a real broker.
        let _ = consumer.sender.send(Ok(delivery));
        queue.unacked.insert(tag, (channel_id, envelope));
    }
}

/// In-memory fan-out broker for tests.
///
/// Models the parts of AMQP the runtime relies on: fan-out exchanges,
/// durable queues that hold messages until a consumer appears, explicit
/// acknowledgement, and redelivery of unacknowledged messages when their
/// channel closes. Failure toggles simulate an unreachable broker, failing
/// publishes, and asynchronous channel errors.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: SharedState,
}

impl InMemoryBroker {
    /// Creates a new empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        lock(&self.state).connect_failures_remaining = count;
    }

    /// Configures every publish to fail.
    pub fn set_fail_on_publish(&self, fail: bool) {
        lock(&self.state).fail_on_publish = fail;
    }

    /// Degrades every open channel as if the broker raised a channel error.
    ///
    /// Registered observers are notified; subsequent operations on those
    /// channels fail.
    pub fn break_channels(&self, reason: &str) {
        let observers: Vec<ErrorObserver> = {
            let mut state = lock(&self.state);
            state
                .channels
                .values_mut()
                .filter(|entry| entry.open)
                .flat_map(|entry| {
                    entry.degraded = Some(reason.to_string());
                    entry.observers.clone()
                })
                .collect()
        };
        let error = BrokerError::Channel(reason.to_string());
        for observer in observers {
            observer(&error);
        }
    }

    /// Reports an asynchronous error on every open connection.
    pub fn report_connection_error(&self, reason: &str) {
        let observers: Vec<ErrorObserver> = {
            let state = lock(&self.state);
            state
                .connections
                .values()
                .filter(|entry| entry.open)
                .flat_map(|entry| entry.observers.clone())
                .collect()
        };
        let error = BrokerError::Connection(reason.to_string());
        for observer in observers {
            observer(&error);
        }
    }

    /// Returns the number of connection attempts made so far.
    pub fn connect_attempts(&self) -> u32 {
        lock(&self.state).connect_attempts
    }

    /// Returns true if `exchange` has been declared.
    pub fn has_exchange(&self, exchange: &str) -> bool {
        lock(&self.state).exchanges.contains_key(exchange)
    }

    /// Returns true if `queue` has been declared.
    pub fn has_queue(&self, queue: &str) -> bool {
        lock(&self.state).queues.contains_key(queue)
    }

    /// Returns the queues bound to `exchange`.
    pub fn bindings(&self, exchange: &str) -> Vec<String> {
        lock(&self.state)
            .exchanges
            .get(exchange)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns every payload published so far, with its exchange.
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        lock(&self.state).published.clone()
    }

    /// Returns the number of messages waiting for a consumer on `queue`.
    pub fn ready_count(&self, queue: &str) -> usize {
        lock(&self.state)
            .queues
            .get(queue)
            .map(|q| q.ready.len())
            .unwrap_or(0)
    }

    /// Returns the number of delivered but unsettled messages on `queue`.
    pub fn unacked_count(&self, queue: &str) -> usize {
        lock(&self.state)
            .queues
            .get(queue)
            .map(|q| q.unacked.len())
            .unwrap_or(0)
    }

    /// Returns payloads rejected from `queue` without requeue.
    pub fn rejected(&self, queue: &str) -> Vec<Vec<u8>> {
        lock(&self.state)
            .queues
            .get(queue)
            .map(|q| q.rejected.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Connector for InMemoryBroker {
    async fn connect(&self) -> Result<BrokerConnection> {
        let mut state = lock(&self.state);
        state.connect_attempts += 1;
        if state.connect_failures_remaining > 0 {
            state.connect_failures_remaining -= 1;
            return Err(BrokerError::Connection("connection refused".to_string()));
        }

        let connection_id = state.next_id();
        state.connections.insert(
            connection_id,
            ConnectionEntry {
                open: true,
                observers: Vec::new(),
            },
        );
        let channel_id = state.next_id();
        state.channels.insert(
            channel_id,
            ChannelEntry {
                connection_id,
                open: true,
                degraded: None,
                observers: Vec::new(),
            },
        );

        let connection = InMemoryConnection {
            state: Arc::clone(&self.state),
            id: connection_id,
        };
        let channel = InMemoryChannel {
            state: Arc::clone(&self.state),
            id: channel_id,
        };
        Ok(BrokerConnection::new(Arc::new(connection), Arc::new(channel)))
    }
}

struct InMemoryConnection {
    state: SharedState,
    id: u64,
}

#[async_trait]
impl Connection for InMemoryConnection {
    fn on_error(&self, observer: ErrorObserver) {
        if let Some(entry) = lock(&self.state).connections.get_mut(&self.id) {
            entry.observers.push(observer);
        }
    }

    async fn close(&self) -> Result<()> {
        let mut state = lock(&self.state);
        match state.connections.get_mut(&self.id) {
            Some(entry) if entry.open => entry.open = false,
            _ => return Err(BrokerError::Closed),
        }
        let owned: Vec<u64> = state
            .channels
            .iter()
            .filter(|(_, entry)| entry.connection_id == self.id && entry.open)
            .map(|(id, _)| *id)
            .collect();
        for channel_id in owned {
            state.close_channel(channel_id);
        }
        let queues: Vec<String> = state.queues.keys().cloned().collect();
        for queue in queues {
            dispatch(&self.state, &mut state, &queue);
        }
        Ok(())
    }
}

struct InMemoryChannel {
    state: SharedState,
    id: u64,
}

#[async_trait]
impl Channel for InMemoryChannel {
    async fn declare_fanout_exchange(&self, exchange: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.ensure_usable(self.id)?;
        state.exchanges.entry(exchange.to_string()).or_default();
        Ok(())
    }

    async fn declare_queue(&self, queue: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.ensure_usable(self.id)?;
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, _routing_key: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.ensure_usable(self.id)?;
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::Channel(format!("no queue '{queue}'")));
        }
        let bound = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::Channel(format!("no exchange '{exchange}'")))?;
        if !bound.iter().any(|q| q == queue) {
            bound.push(queue.to_string());
        }
        Ok(())
    }

    async fn publish(&self, exchange: &str, _routing_key: &str, payload: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        state.ensure_usable(self.id)?;
        if state.fail_on_publish {
            return Err(BrokerError::Channel("publish rejected".to_string()));
        }
        let bound = state
            .exchanges
            .get(exchange)
            .cloned()
            .ok_or_else(|| BrokerError::Channel(format!("no exchange '{exchange}'")))?;
        state
            .published
            .push((exchange.to_string(), payload.to_vec()));

        for queue_name in bound {
            if let Some(queue) = state.queues.get_mut(&queue_name) {
                queue.ready.push_back(Envelope {
                    body: payload.to_vec(),
                    redelivered: false,
                });
            }
            dispatch(&self.state, &mut state, &queue_name);
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, _consumer_tag: &str) -> Result<DeliveryStream> {
        let mut state = lock(&self.state);
        state.ensure_usable(self.id)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::Channel(format!("no queue '{queue}'")))?
            .consumers
            .push(Consumer {
                channel_id: self.id,
                sender,
            });
        dispatch(&self.state, &mut state, queue);

        let stream = futures_util::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|item| (item, receiver))
        });
        Ok(Box::pin(stream))
    }

    fn on_error(&self, observer: ErrorObserver) {
        if let Some(entry) = lock(&self.state).channels.get_mut(&self.id) {
            entry.observers.push(observer);
        }
    }

    async fn close(&self) -> Result<()> {
        let mut state = lock(&self.state);
        match state.channels.get(&self.id) {
            Some(entry) if entry.open => {}
            _ => return Err(BrokerError::Closed),
        }
        state.close_channel(self.id);
        let queues: Vec<String> = state.queues.keys().cloned().collect();
        for queue in queues {
            dispatch(&self.state, &mut state, &queue);
        }
        Ok(())
    }
}

struct InMemoryAcker {
    state: SharedState,
    queue: String,
    tag: u64,
}

impl InMemoryAcker {
    fn settle(&self) -> Result<(StateGuard<'_>, Envelope)> {
        let mut state = lock(&self.state);
        let owner = state
            .queues
            .get(&self.queue)
            .and_then(|q| q.unacked.get(&self.tag))
            .map(|(owner, _)| *owner)
            .ok_or_else(|| BrokerError::Channel(format!("unknown delivery tag {}", self.tag)))?;
        state.ensure_usable(owner)?;
        let (_, envelope) = state
            .queues
            .get_mut(&self.queue)
            .and_then(|q| q.unacked.remove(&self.tag))
            .ok_or_else(|| BrokerError::Channel(format!("unknown delivery tag {}", self.tag)))?;
        Ok((state, envelope))
    }
}

#[async_trait]
impl Acker for InMemoryAcker {
    async fn ack(&self) -> Result<()> {
        self.settle().map(|_| ())
    }

    async fn reject(&self, requeue: bool) -> Result<()> {
        let (mut state, mut envelope) = self.settle()?;
        if let Some(queue) = state.queues.get_mut(&self.queue) {
            if requeue {
                envelope.redelivered = true;
                queue.ready.push_front(envelope);
            } else {
                queue.rejected.push(envelope.body);
            }
        }
        if requeue {
            dispatch(&self.state, &mut state, &self.queue);
        }
        Ok(())
    }
}

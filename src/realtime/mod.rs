//! Shared push channel
//!
//! One connection serves the whole process. It is opened on first use and
//! lives until the last [`RealtimeChannel`] clone is dropped. Controllers
//! join per-equipment rooms and register handlers; every registration hands
//! back a guard that removes it exactly once.
//!
//! Disconnects are not retried. Pushes missed while disconnected are gone,
//! which the controllers tolerate because REST stays the source of truth.

pub mod codec;
pub mod events;

pub use events::{EventKind, RoomCommand, ServerEvent};

use crate::models::EquipmentId;
use codec::Frame;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

/// Callback invoked for each matching event
pub type Handler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

/// Which events of a kind a subscription receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Only events whose equipment id matches
    Room(EquipmentId),
    /// Every event of the kind, whatever room it belongs to
    Broadcast,
}

impl Topic {
    fn accepts(&self, event: &ServerEvent) -> bool {
        match self {
            Topic::Broadcast => true,
            Topic::Room(id) => *id == event.equipment_id(),
        }
    }
}

struct Entry {
    id: u64,
    kind: EventKind,
    topic: Topic,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<Entry>,
    rooms: HashMap<EquipmentId, usize>,
}

type SharedRegistry = Arc<Mutex<Registry>>;

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

/// Routes decoded events to the handlers registered for them.
#[derive(Clone)]
struct Dispatcher {
    registry: SharedRegistry,
}

impl Dispatcher {
    fn dispatch(&self, event: &ServerEvent) {
        // Handlers run unlocked so they may dispose subscriptions.
        let handlers: Vec<Handler> = {
            let registry = lock(&self.registry);
            registry
                .entries
                .iter()
                .filter(|e| e.kind == event.kind() && e.topic.accepts(event))
                .map(|e| Arc::clone(&e.handler))
                .collect()
        };
        log::trace!(
            "{} for equipment {} -> {} handler(s)",
            event.kind().name(),
            event.equipment_id(),
            handlers.len()
        );
        for handler in handlers {
            handler(event);
        }
    }
}

enum Link {
    Socket { url: String },
    Loopback { commands: mpsc::UnboundedSender<RoomCommand> },
}

struct Inner {
    link: Link,
    outbound: Mutex<Option<mpsc::UnboundedSender<RoomCommand>>>,
    registry: SharedRegistry,
}

/// Handle to the process-wide realtime connection
///
/// Clones share the connection and the subscription registry.
#[derive(Clone)]
pub struct RealtimeChannel {
    inner: Arc<Inner>,
}

impl RealtimeChannel {
    /// Channel that connects to a Socket.IO endpoint on first use.
    pub fn connect_lazy(url: impl Into<String>) -> Self {
        Self::with_link(Link::Socket { url: url.into() })
    }

    /// Channel without a socket
    ///
    /// The returned [`Loopback`] plays the server: it sees the room commands
    /// and injects events.
    pub fn loopback() -> (Self, Loopback) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Self::with_link(Link::Loopback { commands: tx });
        let loopback = Loopback {
            dispatcher: channel.dispatcher(),
            commands: rx,
        };
        (channel, loopback)
    }

    fn with_link(link: Link) -> Self {
        Self {
            inner: Arc::new(Inner {
                link,
                outbound: Mutex::new(None),
                registry: Arc::new(Mutex::new(Registry::default())),
            }),
        }
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher {
            registry: Arc::clone(&self.inner.registry),
        }
    }

    /// Ask the server to deliver room events for `equipment_id`.
    ///
    /// Memberships are counted per room; the server is told to leave only
    /// when the last membership for that room is released.
    pub fn join_room(&self, equipment_id: EquipmentId) -> RoomMembership {
        let first = {
            let mut registry = lock(&self.inner.registry);
            let count = registry.rooms.entry(equipment_id).or_insert(0);
            *count += 1;
            *count == 1
        };
        if first {
            self.send(RoomCommand::Join(equipment_id));
        }
        RoomMembership {
            equipment_id,
            channel: Arc::downgrade(&self.inner),
            active: true,
        }
    }

    fn leave_room(inner: &Arc<Inner>, equipment_id: EquipmentId) {
        let last = {
            let mut registry = lock(&inner.registry);
            match registry.rooms.get_mut(&equipment_id) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    registry.rooms.remove(&equipment_id);
                    true
                }
                None => false,
            }
        };
        if last {
            RealtimeChannel {
                inner: Arc::clone(inner),
            }
            .send(RoomCommand::Leave(equipment_id));
        }
    }

    /// Register `handler` for events of `kind` on `topic`.
    ///
    /// The handler stays registered until the returned [`Subscription`] is
    /// disposed or dropped.
    pub fn on<F>(&self, kind: EventKind, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.ensure_started();
        let id = {
            let mut registry = lock(&self.inner.registry);
            registry.next_id += 1;
            let id = registry.next_id;
            registry.entries.push(Entry {
                id,
                kind,
                topic,
                handler: Arc::new(handler),
            });
            id
        };
        Subscription {
            id,
            registry: Arc::downgrade(&self.inner.registry),
            active: true,
        }
    }

    /// Number of live handler registrations.
    pub fn subscription_count(&self) -> usize {
        lock(&self.inner.registry).entries.len()
    }

    /// Rooms currently joined.
    pub fn joined_rooms(&self) -> Vec<EquipmentId> {
        let mut rooms: Vec<_> = lock(&self.inner.registry).rooms.keys().copied().collect();
        rooms.sort_unstable();
        rooms
    }

    fn send(&self, command: RoomCommand) {
        if let Some(tx) = self.ensure_started() {
            if tx.send(command).is_err() {
                log::debug!("Realtime connection gone; dropped {:?}", command);
            }
        }
    }

    fn ensure_started(&self) -> Option<mpsc::UnboundedSender<RoomCommand>> {
        let mut outbound = self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = outbound.as_ref() {
            return Some(tx.clone());
        }
        let tx = match &self.inner.link {
            Link::Loopback { commands } => commands.clone(),
            Link::Socket { url } => {
                let runtime = match tokio::runtime::Handle::try_current() {
                    Ok(handle) => handle,
                    Err(_) => {
                        log::warn!("No async runtime; realtime connection deferred");
                        return None;
                    }
                };
                let (tx, rx) = mpsc::unbounded_channel();
                runtime.spawn(run_connection(url.clone(), rx, self.dispatcher()));
                tx
            }
        };
        *outbound = Some(tx.clone());
        Some(tx)
    }
}

/// Registered handler; removed on [`Subscription::dispose`] or drop
#[must_use = "dropping a Subscription removes its handler"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
    active: bool,
}

impl Subscription {
    pub fn dispose(mut self) {
        self.release();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    fn release(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).entries.retain(|e| e.id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// Membership in one equipment room; left on [`RoomMembership::leave`] or drop
#[must_use = "dropping a RoomMembership leaves the room"]
pub struct RoomMembership {
    equipment_id: EquipmentId,
    channel: Weak<Inner>,
    active: bool,
}

impl RoomMembership {
    pub fn equipment_id(&self) -> EquipmentId {
        self.equipment_id
    }

    pub fn leave(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }
        if let Some(inner) = self.channel.upgrade() {
            RealtimeChannel::leave_room(&inner, self.equipment_id);
        }
    }
}

impl Drop for RoomMembership {
    fn drop(&mut self) {
        self.release();
    }
}

/// Server side of a loopback channel
pub struct Loopback {
    dispatcher: Dispatcher,
    commands: mpsc::UnboundedReceiver<RoomCommand>,
}

impl Loopback {
    /// Deliver `event` as if the server had pushed it.
    pub fn emit(&self, event: ServerEvent) {
        self.dispatcher.dispatch(&event);
    }

    /// Room commands sent since the last call, in order.
    pub fn take_commands(&mut self) -> Vec<RoomCommand> {
        let mut commands = Vec::new();
        while let Ok(command) = self.commands.try_recv() {
            commands.push(command);
        }
        commands
    }
}

async fn run_connection(
    url: String,
    mut commands: mpsc::UnboundedReceiver<RoomCommand>,
    dispatcher: Dispatcher,
) {
    let (stream, _) = match connect_async(url.as_str()).await {
        Ok(connected) => connected,
        Err(e) => {
            log::warn!("Realtime connection to {} failed: {}", url, e);
            return;
        }
    };
    let (mut write, mut read) = stream.split();

    if let Err(e) = handshake(&mut write, &mut read).await {
        log::warn!("Realtime handshake with {} failed: {}", url, e);
        return;
    }
    log::info!("Realtime channel connected to {}", url);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => {
                    log::debug!("Realtime {:?}", command);
                    let frame = codec::encode_event(command.event_name(), &command.payload());
                    if let Err(e) = write.send(Message::Text(frame)).await {
                        log::warn!("Realtime send failed: {}", e);
                        break;
                    }
                }
                None => {
                    let _ = write.send(Message::Text(codec::CLOSE.to_string())).await;
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if !handle_frame(&text, &mut write, &dispatcher).await {
                        log::warn!("Realtime server disconnected; live updates stopped");
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    log::warn!("Realtime connection closed; live updates stopped");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::warn!("Realtime connection error: {}", e);
                    break;
                }
            },
        }
    }
}

/// Wait for the Engine.IO open packet, then connect the default namespace.
async fn handshake<W, R>(write: &mut W, read: &mut R) -> Result<(), String>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let mut opened = false;
    while let Some(message) = read.next().await {
        let text = match message.map_err(|e| e.to_string())? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        match codec::decode(&text).map_err(|e| e.to_string())? {
            Frame::Open(handshake) if !opened => {
                log::debug!("Realtime session {}", handshake.sid);
                opened = true;
                write
                    .send(Message::Text(codec::CONNECT.to_string()))
                    .await
                    .map_err(|e| e.to_string())?;
            }
            Frame::Connect if opened => return Ok(()),
            Frame::Ping(payload) => {
                write
                    .send(Message::Text(codec::encode_pong(&payload)))
                    .await
                    .map_err(|e| e.to_string())?;
            }
            Frame::ConnectError(message) => return Err(message),
            Frame::Close | Frame::Disconnect => break,
            _ => {}
        }
    }
    Err("connection closed during handshake".to_string())
}

/// Process one frame; `false` once the server has hung up.
async fn handle_frame<W>(text: &str, write: &mut W, dispatcher: &Dispatcher) -> bool
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let frame = match codec::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            log::warn!("Ignoring realtime frame: {}", e);
            return true;
        }
    };
    match frame {
        Frame::Ping(payload) => write
            .send(Message::Text(codec::encode_pong(&payload)))
            .await
            .is_ok(),
        Frame::Event { name, data } => {
            match ServerEvent::from_wire(&name, data) {
                Ok(Some(event)) => dispatcher.dispatch(&event),
                Ok(None) => log::debug!("Unhandled realtime event {}", name),
                Err(e) => log::warn!("Malformed {} payload: {}", name, e),
            }
            true
        }
        Frame::Close | Frame::Disconnect => false,
        _ => true,
    }
}

//! TCP message broker
//!
//! A minimal subject-based publish/subscribe hub for the bus topology. Every
//! connection starts with a `Hello` carrying the protocol version; after that
//! a client may `Subscribe` to subjects and `Publish` payloads. Each publish is
//! delivered once to every connection currently subscribed to its subject,
//! including the publisher's own connection when it is subscribed.
//!
//! Subscriptions live exactly as long as their connection. Nothing is
//! persisted or replayed: a message published before a subscription exists is
//! never seen by that subscriber.
//!
//! Delivery queues are unbounded on both ends, so a subscriber that reads
//! slowly falls behind but does not miss messages. Publishing from a
//! [`TcpBus`] waits when its outbound queue is full.
//!
//! [`TcpBus`] is the client side and implements [`MessageBus`].

use crate::bus::{MessageBus, Subscription};
use crate::distributed::protocol::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Frames a [`TcpBus`] queues toward the broker before publishers wait
const OUTBOUND_CAPACITY: usize = 1024;

#[derive(Default)]
struct BrokerState {
    next_connection: AtomicU64,

    /// subject → connection id → outbound queue
    subscriptions: Mutex<HashMap<String, HashMap<u64, mpsc::UnboundedSender<BusFrame>>>>,
}

impl BrokerState {
    fn subscribe(&self, subject: String, connection: u64, outbound: mpsc::UnboundedSender<BusFrame>) {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(subject)
            .or_default()
            .insert(connection, outbound);
    }

    fn publish(&self, message: PublishMessage) -> usize {
        let subscriptions = self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(subscribers) = subscriptions.get(&message.subject) else {
            return 0;
        };

        subscribers
            .values()
            .filter(|outbound| outbound.send(BusFrame::Deliver(message.clone())).is_ok())
            .count()
    }

    fn disconnect(&self, connection: u64) {
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner);
        for subscribers in subscriptions.values_mut() {
            subscribers.remove(&connection);
        }
        subscriptions.retain(|_, subscribers| !subscribers.is_empty());
    }

    fn subscriber_count(&self, subject: &str) -> usize {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(subject)
            .map_or(0, |s| s.len())
    }
}

/// Bound broker, ready to accept connections
pub struct Broker {
    listener: TcpListener,
    state: Arc<BrokerState>,
}

/// A broker running on a background task
pub struct BrokerHandle {
    local_addr: SocketAddr,
    state: Arc<BrokerState>,
    task: JoinHandle<Result<()>>,
}

impl BrokerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connections currently subscribed to `subject`
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.state.subscriber_count(subject)
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}

impl Broker {
    /// Bind the broker (port 0 picks a free port)
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind broker on {}", addr))?;

        Ok(Self {
            listener,
            state: Arc::new(BrokerState::default()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("Failed to read broker address")
    }

    /// Accept connections until the task is dropped
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await
                .context("Failed to accept connection")?;

            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(state, stream, peer).await {
                    log::warn!("Connection {} ended with error: {:#}", peer, e);
                }
            });
        }
    }

    /// Run the accept loop on a background task
    pub fn spawn(self) -> Result<BrokerHandle> {
        let local_addr = self.local_addr()?;
        let state = Arc::clone(&self.state);
        let task = tokio::spawn(self.run());

        Ok(BrokerHandle {
            local_addr,
            state,
            task,
        })
    }
}

async fn handle_connection(state: Arc<BrokerState>, stream: TcpStream, peer: SocketAddr) -> Result<()> {
    stream.set_nodelay(true).ok();
    let (mut reader, mut writer) = stream.into_split();

    let client_name = match read_frame(&mut reader).await? {
        BusFrame::Hello(hello) if hello.protocol_version == PROTOCOL_VERSION => hello.client_name,
        BusFrame::Hello(hello) => {
            let error = format!(
                "Protocol version mismatch: broker={}, client={}",
                PROTOCOL_VERSION, hello.protocol_version
            );
            write_frame(&mut writer, &BusFrame::Error { error: error.clone() }).await?;
            anyhow::bail!(error);
        }
        other => {
            let error = format!("Expected HELLO, got {}", frame_name(&other));
            write_frame(&mut writer, &BusFrame::Error { error: error.clone() }).await?;
            anyhow::bail!(error);
        }
    };

    let connection = state.next_connection.fetch_add(1, Ordering::Relaxed);
    log::info!("🔌 {} connected from {} (connection {})", client_name, peer, connection);

    let (outbound, mut queue) = mpsc::unbounded_channel::<BusFrame>();
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = queue.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                log::debug!("Writer for connection {} stopped: {:#}", connection, e);
                break;
            }
        }
    });

    loop {
        // EOF and transport errors both end the connection
        let frame = match read_frame(&mut reader).await {
            Ok(frame) => frame,
            Err(_) => break,
        };

        match frame {
            BusFrame::Subscribe { subject } => {
                log::debug!("Connection {} subscribed to {}", connection, subject);
                state.subscribe(subject, connection, outbound.clone());
            }
            BusFrame::Publish(message) => {
                let delivered = state.publish(message);
                log::trace!("Connection {} published to {} subscribers", connection, delivered);
            }
            other => {
                log::warn!("Connection {} sent unexpected {}", connection, frame_name(&other));
            }
        }
    }

    state.disconnect(connection);
    drop(outbound);
    writer_task.abort();
    log::info!("🔌 {} disconnected (connection {})", client_name, connection);

    Ok(())
}

fn frame_name(frame: &BusFrame) -> &'static str {
    match frame {
        BusFrame::Hello(_) => "HELLO",
        BusFrame::Subscribe { .. } => "SUBSCRIBE",
        BusFrame::Publish(_) => "PUBLISH",
        BusFrame::Deliver(_) => "DELIVER",
        BusFrame::Error { .. } => "ERROR",
    }
}

type LocalSubscribers = Arc<Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>>>;

/// Message bus client over one broker connection
pub struct TcpBus {
    outbound: mpsc::Sender<BusFrame>,
    subscribers: LocalSubscribers,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl TcpBus {
    /// Connect and complete the handshake
    pub async fn connect(addr: &str, client_name: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("Failed to connect to broker at {}", addr))?;
        stream.set_nodelay(true).ok();
        let (mut read_half, mut write_half) = stream.into_split();

        let hello = BusFrame::Hello(HelloMessage {
            protocol_version: PROTOCOL_VERSION,
            client_name: client_name.to_string(),
        });
        write_frame(&mut write_half, &hello).await.context("Failed to send HELLO")?;

        let (outbound, mut queue) = mpsc::channel::<BusFrame>(OUTBOUND_CAPACITY);
        let writer = tokio::spawn(async move {
            while let Some(frame) = queue.recv().await {
                if let Err(e) = write_frame(&mut write_half, &frame).await {
                    log::error!("Broker connection lost while writing: {:#}", e);
                    break;
                }
            }
        });

        let subscribers: LocalSubscribers = Arc::new(Mutex::new(HashMap::new()));
        let routes = Arc::clone(&subscribers);
        let reader = tokio::spawn(async move {
            loop {
                match read_frame(&mut read_half).await {
                    Ok(BusFrame::Deliver(message)) => deliver_local(&routes, message),
                    Ok(BusFrame::Error { error }) => {
                        log::error!("❌ Broker rejected connection: {}", error);
                        break;
                    }
                    Ok(other) => log::warn!("Ignoring unexpected {} from broker", frame_name(&other)),
                    Err(e) => {
                        log::warn!("Broker connection closed: {:#}", e);
                        break;
                    }
                }
            }
            // Ends every local subscription
            routes.lock().unwrap_or_else(PoisonError::into_inner).clear();
        });

        Ok(Self {
            outbound,
            subscribers,
            reader,
            writer,
        })
    }

    /// False once the broker connection is gone
    pub fn is_connected(&self) -> bool {
        !self.reader.is_finished() && !self.writer.is_finished()
    }
}

fn deliver_local(routes: &LocalSubscribers, message: PublishMessage) {
    let mut routes = routes.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(senders) = routes.get_mut(&message.subject) {
        senders.retain(|s| !s.is_closed());
        for sender in senders.iter() {
            let _ = sender.send(message.payload.clone());
        }
    }
}

#[async_trait]
impl MessageBus for TcpBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> crate::Result<()> {
        if !self.is_connected() {
            anyhow::bail!("Broker connection closed");
        }

        let frame = BusFrame::Publish(PublishMessage {
            subject: subject.to_string(),
            payload,
        });
        self.outbound
            .send(frame)
            .await
            .map_err(|_| anyhow::anyhow!("Broker connection closed"))
    }

    async fn subscribe(&self, subject: &str) -> crate::Result<Subscription> {
        if !self.is_connected() {
            anyhow::bail!("Broker connection closed");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let first = {
            let mut routes = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
            let senders = routes.entry(subject.to_string()).or_default();
            senders.push(tx);
            senders.len() == 1
        };

        // One broker subscription per subject; local fan-out covers the rest
        if first {
            self.outbound
                .send(BusFrame::Subscribe {
                    subject: subject.to_string(),
                })
                .await
                .map_err(|_| anyhow::anyhow!("Broker connection closed"))?;
        }

        Ok(Subscription::new(subject, rx))
    }
}

impl Drop for TcpBus {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

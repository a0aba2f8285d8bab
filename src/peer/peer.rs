use std::{
    collections::VecDeque,
    sync::{
        Arc,
        Mutex,
    },
};

use anyhow::{
    Error,
    Result,
};
use tokio::sync::Notify;

use crate::message::message::Message;

/// Bound on each direction of a peer link.
///
/// A full queue applies backpressure to reliable messages and drops the oldest entry for events.
const QUEUE_CAPACITY: usize = 64;

#[derive(Default)]
#[derive(Debug)]
struct ChannelState {
    queue: VecDeque<Message>,
    closed: bool,
}

/// One direction of a peer link: a bounded FIFO of decoded messages.
#[derive(Debug)]
struct Channel {
    state: Mutex<ChannelState>,
    readable: Notify,
    writable: Notify,
}

impl Channel {
    fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState::default()),
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    async fn send(&self, message: Message) -> Result<()> {
        let mut message = Some(message);
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if state.closed {
                    return Err(Error::msg("peer link closed"));
                }
                if state.queue.len() < QUEUE_CAPACITY {
                    state.queue.push_back(message.take().unwrap());
                    self.readable.notify_one();
                    return Ok(());
                }
            }
            self.writable.notified().await;
        }
    }

    fn send_dropping_oldest(&self, message: Message) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        if state.queue.len() >= QUEUE_CAPACITY {
            // Sacrifice the oldest queued event; never a reliable message. If the queue is all
            // reliable messages, the incoming message is the one dropped.
            match state
                .queue
                .iter()
                .position(|queued| matches!(queued, Message::Event(_)))
            {
                Some(index) => {
                    state.queue.remove(index);
                }
                None => return,
            }
        }
        state.queue.push_back(message);
        self.readable.notify_one();
    }

    async fn recv(&self) -> Option<Message> {
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if let Some(message) = state.queue.pop_front() {
                    self.writable.notify_one();
                    return Some(message);
                }
                if state.closed {
                    return None;
                }
            }
            self.readable.notified().await;
        }
    }

    fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }
}

/// One endpoint of a bidirectional in-memory message pipe.
///
/// [`Peer::linked`] produces the two endpoints of a link: what one endpoint sends, the other
/// receives. The router speaks to every attached session through one endpoint of such a link;
/// the other endpoint belongs to the client (directly in tests, or held by a transport adapter
/// that bridges it to a real connection).
#[derive(Clone, Debug)]
pub struct Peer {
    tx: Arc<Channel>,
    rx: Arc<Channel>,
}

impl Peer {
    /// Creates a linked pair of peers.
    pub fn linked() -> (Peer, Peer) {
        let a = Arc::new(Channel::new());
        let b = Arc::new(Channel::new());
        (
            Peer {
                tx: a.clone(),
                rx: b.clone(),
            },
            Peer { tx: b, rx: a },
        )
    }

    /// Sends a message to the linked peer.
    ///
    /// Waits for queue space when the outbound queue is full, so delivery of reliable messages
    /// applies backpressure to the sender. Fails once the link is closed.
    pub async fn send(&self, message: Message) -> Result<()> {
        self.tx.send(message).await
    }

    /// Sends an event message to the linked peer, without blocking.
    ///
    /// When the outbound queue is full, the oldest queued message is dropped to make room. A slow
    /// consumer loses old events rather than stalling the router.
    pub fn send_event(&self, message: Message) {
        self.tx.send_dropping_oldest(message)
    }

    /// Receives the next message from the linked peer.
    ///
    /// Messages queued before the link closed are still delivered; returns `None` once the link
    /// is closed and drained.
    pub async fn recv(&self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Closes both directions of the link. Idempotent.
    pub fn close(&self) {
        self.tx.close();
        self.rx.close();
    }
}

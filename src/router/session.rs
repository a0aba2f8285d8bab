use std::sync::Arc;

use anyhow::Result;

use crate::{
    core::{
        id::Id,
        roles::PeerRoles,
    },
    message::message::Message,
    peer::Peer,
};

/// The authentication identity established when a session joined its realm.
///
/// Only the `anonymous` method is supported; the identity is synthesized at handshake time and
/// surfaced by `wamp.session.get`.
#[derive(Debug, Clone)]
pub struct Identity {
    pub authid: String,
    pub authrole: String,
    pub authmethod: String,
    pub authprovider: String,
}

impl Identity {
    /// The identity of an anonymously-authenticated session.
    pub fn anonymous(session: Id) -> Self {
        Self {
            authid: session.to_string(),
            authrole: "anonymous".to_owned(),
            authmethod: "anonymous".to_owned(),
            authprovider: "static".to_owned(),
        }
    }
}

struct SessionInner {
    id: Id,
    peer: Peer,
    roles: PeerRoles,
    identity: Identity,
}

/// The router end of an established WAMP session.
///
/// The realm's session table owns the handle; the broker and dealer refer to sessions by ID only
/// and resolve the handle through that table, so nothing keeps a session alive past its removal.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl SessionHandle {
    pub fn new(id: Id, peer: Peer, roles: PeerRoles, identity: Identity) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                peer,
                roles,
                identity,
            }),
        }
    }

    /// The session ID, as reported out to the peer.
    pub fn id(&self) -> Id {
        self.inner.id
    }

    /// The roles and features the peer advertised in its HELLO message.
    pub fn roles(&self) -> &PeerRoles {
        &self.inner.roles
    }

    /// The identity established when the session joined the realm.
    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    /// Sends a reliable message to the peer, applying backpressure on a full queue.
    pub async fn send(&self, message: Message) -> Result<()> {
        self.inner.peer.send(message).await
    }

    /// Sends a message to the peer on the lossy path: a full queue drops its oldest entry.
    ///
    /// Used for EVENT delivery and for shutdown notices, where dropping old messages beats
    /// stalling the router on a slow consumer.
    pub fn send_lossy(&self, message: Message) {
        self.inner.peer.send_event(message)
    }

    /// Receives the next inbound message from the peer.
    pub async fn recv(&self) -> Option<Message> {
        self.inner.peer.recv().await
    }

    /// Closes the underlying peer link.
    pub fn close(&self) {
        self.inner.peer.close()
    }
}

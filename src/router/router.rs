use std::sync::{
    atomic::{
        AtomicBool,
        Ordering,
    },
    Arc,
};

use anyhow::{
    Error,
    Result,
};
use futures_util::future::join_all;
use log::{
    debug,
    info,
};
use tokio::sync::Mutex;

use crate::{
    core::{
        close::CloseReason,
        error::InteractionError,
        hash::{
            HashMap,
            HashSet,
        },
        id::{
            Id,
            IdAllocator,
            RandomIdAllocator,
        },
        roles::RouterRole,
        uri::{
            validate_strict_uri,
            Uri,
        },
    },
    message::{
        common::abort_message_for_error,
        message::{
            HelloMessage,
            Message,
        },
    },
    peer::Peer,
    router::realm::{
        Realm,
        RealmConfig,
    },
};

const DEFAULT_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "-", env!("CARGO_PKG_VERSION"));

/// Configuration for a [`Router`].
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Agent name, communicated to peers.
    pub agent: String,
    /// Roles implemented by the router.
    pub roles: HashSet<RouterRole>,
    /// Creates a realm on demand when a peer says HELLO to an unknown one.
    pub auto_realm: bool,
    /// Enforces the strict URI discipline on realm, topic, and procedure URIs.
    pub strict_uri: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            agent: DEFAULT_AGENT.to_owned(),
            roles: HashSet::from_iter([RouterRole::Broker, RouterRole::Dealer]),
            auto_realm: false,
            strict_uri: false,
        }
    }
}

/// A WAMP router: a process-wide container of realms.
///
/// Peers attach through [`Router::attach`] with one end of a [`Peer`] link; the router performs
/// the handshake against the requested realm and drives the session from its own task until the
/// peer leaves.
pub struct Router {
    config: RouterConfig,
    realms: Mutex<HashMap<Uri, Arc<Realm>>>,
    id_allocator: Arc<Box<dyn IdAllocator>>,
    closed: AtomicBool,
}

impl Router {
    /// Creates a new [`Router`].
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            realms: Mutex::new(HashMap::default()),
            id_allocator: Arc::new(Box::new(RandomIdAllocator::default())),
            closed: AtomicBool::new(false),
        }
    }

    /// Adds a realm to the router.
    ///
    /// Idempotent on the realm URI: adding a URI that already exists keeps the existing realm
    /// untouched.
    pub async fn add_realm(&self, config: RealmConfig) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::msg("router is closed"));
        }
        if self.config.strict_uri && validate_strict_uri(&config.uri).is_err() {
            return Err(InteractionError::InvalidUri.into());
        }
        let mut realms = self.realms.lock().await;
        if realms.contains_key(&config.uri) {
            debug!("Realm {} already exists", config.uri);
            return Ok(());
        }
        let uri = config.uri.clone();
        let realm = Realm::new(config, &self.config, self.id_allocator.clone()).await;
        info!("Added realm {uri}");
        realms.insert(uri, Arc::new(realm));
        Ok(())
    }

    async fn realm(&self, uri: &Uri) -> Result<Arc<Realm>> {
        let mut realms = self.realms.lock().await;
        if let Some(realm) = realms.get(uri) {
            return Ok(realm.clone());
        }
        if !self.config.auto_realm {
            return Err(InteractionError::NoSuchRealm.into());
        }
        let realm = Arc::new(
            Realm::new(
                RealmConfig {
                    name: uri.to_string(),
                    uri: uri.clone(),
                    anonymous_auth: true,
                    allow_disclose: false,
                },
                &self.config,
                self.id_allocator.clone(),
            )
            .await,
        );
        info!("Automatically created realm {uri}");
        realms.insert(uri.clone(), realm.clone());
        Ok(realm)
    }

    /// Attaches a peer to the router, performing the session handshake.
    ///
    /// Expects the peer's HELLO as its first message. Returns the new session ID once WELCOME
    /// has been delivered; any earlier failure sends ABORT, closes the peer, and returns the
    /// error.
    pub async fn attach(&self, peer: Peer) -> Result<Id> {
        match self.attach_peer(&peer).await {
            Ok(session) => Ok(session),
            Err(err) => {
                peer.send(abort_message_for_error(&err)).await.ok();
                peer.close();
                Err(err)
            }
        }
    }

    async fn attach_peer(&self, peer: &Peer) -> Result<Id> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::msg("router is closed"));
        }
        let hello = match peer.recv().await {
            Some(Message::Hello(hello)) => hello,
            Some(message) => {
                return Err(InteractionError::ProtocolViolation(format!(
                    "expected HELLO, received {}",
                    message.message_name()
                ))
                .into())
            }
            None => return Err(Error::msg("peer disconnected before HELLO")),
        };
        self.attach_to_realm(peer, &hello).await
    }

    async fn attach_to_realm(&self, peer: &Peer, hello: &HelloMessage) -> Result<Id> {
        if self.config.strict_uri && validate_strict_uri(&hello.realm).is_err() {
            return Err(InteractionError::InvalidUri.into());
        }
        let realm = self.realm(&hello.realm).await?;
        realm.attach(peer.clone(), hello).await
    }

    /// Closes the router, shutting down each realm and every session in it. Idempotent.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let realms = self
            .realms
            .lock()
            .await
            .drain()
            .map(|(_, realm)| realm)
            .collect::<Vec<_>>();
        join_all(
            realms
                .iter()
                .map(|realm| realm.shut_down(CloseReason::SystemShutdown)),
        )
        .await;
    }
}

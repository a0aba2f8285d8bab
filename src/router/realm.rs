use std::{
    sync::Arc,
    time::Duration,
};

use anyhow::Result;
use log::{
    debug,
    error,
    info,
    warn,
};
use tokio::sync::Mutex;

use crate::{
    core::{
        close::CloseReason,
        error::{
            BasicError,
            InteractionError,
        },
        hash::{
            HashMap,
            HashSet,
        },
        id::{
            Id,
            IdAllocator,
        },
        roles::{
            router_roles_details,
            PeerRoles,
            RouterRole,
        },
        types::{
            Dictionary,
            Value,
        },
        uri::Uri,
    },
    message::{
        common::{
            abort_message_for_error,
            error_for_request,
            goodbye_and_out,
            goodbye_with_close_reason,
        },
        message::{
            CallMessage,
            CancelMessage,
            ErrorMessage,
            HelloMessage,
            Message,
            PublishMessage,
            RegisterMessage,
            SubscribeMessage,
            UnregisterMessage,
            UnsubscribeMessage,
            WelcomeMessage,
            YieldMessage,
        },
    },
    peer::Peer,
    router::{
        broker::Broker,
        dealer::Dealer,
        meta::{
            self,
            META_SESSION_ID,
        },
        router::RouterConfig,
        session::{
            Identity,
            SessionHandle,
        },
    },
};

/// Configuration for a [`Realm`].
#[derive(Debug, Clone)]
pub struct RealmConfig {
    pub name: String,
    pub uri: Uri,
    /// Accepts peers using the `anonymous` authentication method.
    pub anonymous_auth: bool,
    /// Allows publishers and callers to disclose their session ID to the receiving side.
    pub allow_disclose: bool,
}

/// The shared mutable state of a realm: its session table, broker, and dealer.
///
/// One lock serializes all mutations, which preserves the ordering of operations from a single
/// session and lets confirmations be queued to peers before anything that logically follows
/// them.
pub(crate) struct RealmState {
    pub sessions: HashMap<Id, SessionHandle>,
    pub broker: Broker,
    pub dealer: Dealer,
}

/// An isolated namespace of sessions, subscriptions, and registrations.
///
/// The realm owns its session table exclusively; the broker and dealer refer to sessions by ID.
/// Each attached session runs its inbound loop in its own task.
pub struct Realm {
    config: RealmConfig,
    agent: String,
    roles: HashSet<RouterRole>,
    id_allocator: Arc<Box<dyn IdAllocator>>,
    state: Mutex<RealmState>,
}

impl Realm {
    /// Creates a new realm, with the meta-procedures registered on the reserved meta session.
    pub(crate) async fn new(
        config: RealmConfig,
        router_config: &RouterConfig,
        id_allocator: Arc<Box<dyn IdAllocator>>,
    ) -> Self {
        let broker = Broker::new(
            id_allocator.clone(),
            router_config.strict_uri,
            config.allow_disclose,
        );
        let mut dealer = Dealer::new(
            id_allocator.clone(),
            router_config.strict_uri,
            config.allow_disclose,
        );
        for procedure in meta::meta_procedures() {
            dealer.register_meta_procedure(procedure).await;
        }
        Self {
            config,
            agent: router_config.agent.clone(),
            roles: router_config.roles.clone(),
            id_allocator,
            state: Mutex::new(RealmState {
                sessions: HashMap::default(),
                broker,
                dealer,
            }),
        }
    }

    pub fn uri(&self) -> &Uri {
        &self.config.uri
    }

    fn ensure_role(&self, role: RouterRole) -> Result<()> {
        if !self.roles.contains(&role) {
            return Err(BasicError::NotAllowed(format!(
                "router is not a {}",
                role.key_for_details()
            ))
            .into());
        }
        Ok(())
    }

    fn authenticate(&self, details: &Dictionary) -> Result<()> {
        // Absent authmethods are treated as a request for anonymous authentication.
        let anonymous_requested = match details.get("authmethods").and_then(|value| value.list()) {
            Some(methods) => methods
                .iter()
                .any(|method| method.string() == Some("anonymous")),
            None => true,
        };
        if !anonymous_requested || !self.config.anonymous_auth {
            return Err(InteractionError::AuthenticationFailed.into());
        }
        Ok(())
    }

    /// Establishes a session for a peer that sent the given HELLO message.
    ///
    /// Sends WELCOME (always the first message the peer receives) and spawns the session's
    /// inbound loop.
    pub(crate) async fn attach(self: &Arc<Self>, peer: Peer, message: &HelloMessage) -> Result<Id> {
        self.authenticate(&message.details)?;
        let roles = PeerRoles::from_hello_details(&message.details);

        let mut state = self.state.lock().await;
        let id = loop {
            let id = self.id_allocator.generate_id().await;
            if id != META_SESSION_ID && !state.sessions.contains_key(&id) {
                break id;
            }
        };
        let session = SessionHandle::new(id, peer, roles, Identity::anonymous(id));
        let details = Dictionary::from_iter([
            ("agent".to_owned(), Value::from(self.agent.clone())),
            ("roles".to_owned(), router_roles_details(&self.roles)),
        ]);
        session
            .send(Message::Welcome(WelcomeMessage {
                session: id,
                details,
            }))
            .await?;
        state.sessions.insert(id, session.clone());
        drop(state);

        info!("Session {id} joined realm {}", self.uri());
        tokio::spawn(Self::session_loop(self.clone(), session));
        Ok(id)
    }

    async fn session_loop(realm: Arc<Realm>, session: SessionHandle) {
        loop {
            match session.recv().await {
                None => break,
                Some(Message::Goodbye(_)) => {
                    session.send(goodbye_and_out()).await.ok();
                    break;
                }
                Some(Message::Abort(message)) => {
                    warn!("Session {} aborted by peer: {message:?}", session.id());
                    break;
                }
                Some(message) => {
                    if let Err(err) = realm.handle_message(&session, message).await {
                        error!("Session {} failed: {err:#}", session.id());
                        session.send(abort_message_for_error(&err)).await.ok();
                        break;
                    }
                }
            }
        }
        realm.remove_session(session.id()).await;
        session.close();
    }

    /// Dispatches one inbound message from an established session.
    ///
    /// Request-scoped failures answer the request with an ERROR; returning an error from here
    /// aborts the session.
    async fn handle_message(
        self: &Arc<Self>,
        session: &SessionHandle,
        message: Message,
    ) -> Result<()> {
        debug!(
            "Received {} message from session {}",
            message.message_name(),
            session.id()
        );
        match message {
            ref message @ Message::Subscribe(ref subscribe_message) => {
                if let Err(err) = self.handle_subscribe(session, subscribe_message).await {
                    session.send(error_for_request(message, &err)).await?;
                }
                Ok(())
            }
            ref message @ Message::Unsubscribe(ref unsubscribe_message) => {
                if let Err(err) = self.handle_unsubscribe(session, unsubscribe_message).await {
                    session.send(error_for_request(message, &err)).await?;
                }
                Ok(())
            }
            ref message @ Message::Publish(ref publish_message) => {
                if let Err(err) = self.handle_publish(session, publish_message).await {
                    session.send(error_for_request(message, &err)).await?;
                }
                Ok(())
            }
            ref message @ Message::Register(ref register_message) => {
                if let Err(err) = self.handle_register(session, register_message).await {
                    session.send(error_for_request(message, &err)).await?;
                }
                Ok(())
            }
            ref message @ Message::Unregister(ref unregister_message) => {
                if let Err(err) = self.handle_unregister(session, unregister_message).await {
                    session.send(error_for_request(message, &err)).await?;
                }
                Ok(())
            }
            ref message @ Message::Call(ref call_message) => {
                if let Err(err) = self.handle_call(session, call_message).await {
                    session.send(error_for_request(message, &err)).await?;
                }
                Ok(())
            }
            Message::Cancel(ref cancel_message) => {
                self.handle_cancel(session, cancel_message).await
            }
            Message::Yield(ref yield_message) => self.handle_yield(session, yield_message).await,
            Message::Error(ref error_message) => {
                if error_message.request_type != Message::INVOCATION_TAG {
                    return Err(InteractionError::ProtocolViolation(format!(
                        "received ERROR message with request type {}",
                        error_message.request_type
                    ))
                    .into());
                }
                self.handle_error(session, error_message).await
            }
            message => Err(InteractionError::ProtocolViolation(format!(
                "received {} message on an established session",
                message.message_name()
            ))
            .into()),
        }
    }

    async fn handle_subscribe(
        &self,
        session: &SessionHandle,
        message: &SubscribeMessage,
    ) -> Result<()> {
        self.ensure_role(RouterRole::Broker)?;
        let mut state = self.state.lock().await;
        let subscribed = state.broker.subscribe(session, message).await?;
        // Queued while the realm lock is held, so no event published afterwards can precede the
        // confirmation.
        session.send(Message::Subscribed(subscribed)).await
    }

    async fn handle_unsubscribe(
        &self,
        session: &SessionHandle,
        message: &UnsubscribeMessage,
    ) -> Result<()> {
        self.ensure_role(RouterRole::Broker)?;
        let mut state = self.state.lock().await;
        let unsubscribed = state.broker.unsubscribe(session.id(), message)?;
        session.send(Message::Unsubscribed(unsubscribed)).await
    }

    async fn handle_publish(
        &self,
        session: &SessionHandle,
        message: &PublishMessage,
    ) -> Result<()> {
        self.ensure_role(RouterRole::Broker)?;
        let mut state = self.state.lock().await;
        let state = &mut *state;
        let published = state
            .broker
            .publish(&state.sessions, session, message)
            .await?;
        if let Some(published) = published {
            session.send(Message::Published(published)).await?;
        }
        Ok(())
    }

    async fn handle_register(
        &self,
        session: &SessionHandle,
        message: &RegisterMessage,
    ) -> Result<()> {
        self.ensure_role(RouterRole::Dealer)?;
        let mut state = self.state.lock().await;
        let registered = state.dealer.register(session, message).await?;
        // As with subscriptions: no invocation can be queued ahead of the confirmation.
        session.send(Message::Registered(registered)).await
    }

    async fn handle_unregister(
        &self,
        session: &SessionHandle,
        message: &UnregisterMessage,
    ) -> Result<()> {
        self.ensure_role(RouterRole::Dealer)?;
        let mut state = self.state.lock().await;
        let unregistered = state.dealer.unregister(session.id(), message)?;
        session.send(Message::Unregistered(unregistered)).await
    }

    async fn handle_call(
        self: &Arc<Self>,
        session: &SessionHandle,
        message: &CallMessage,
    ) -> Result<()> {
        self.ensure_role(RouterRole::Dealer)?;
        let mut state = self.state.lock().await;
        let state = &mut *state;
        let routing = state.dealer.call(&state.sessions, session, message).await?;

        if routing.callee == META_SESSION_ID {
            let response = meta::dispatch(state, &message.procedure, &message.arguments);
            let outbound = match response {
                Ok(arguments) => state
                    .dealer
                    .yield_invocation(
                        META_SESSION_ID,
                        &YieldMessage {
                            invocation_request: routing.invocation_id,
                            arguments,
                            ..Default::default()
                        },
                    )
                    .map(|(caller, result)| (caller, Message::Result(result))),
                Err(err) => {
                    debug!("Meta procedure {} failed: {err}", message.procedure);
                    state
                        .dealer
                        .error_invocation(
                            META_SESSION_ID,
                            &ErrorMessage {
                                request_type: Message::INVOCATION_TAG,
                                request: routing.invocation_id,
                                details: Dictionary::from_iter([(
                                    "message".to_owned(),
                                    Value::from(err.to_string()),
                                )]),
                                error: Uri::for_error(&err),
                                ..Default::default()
                            },
                        )
                        .map(|(caller, error)| (caller, Message::Error(error)))
                }
            };
            if let Some((to, message)) = outbound {
                Self::deliver(state, to, message).await;
            }
            return Ok(());
        }

        let callee = match state.sessions.get(&routing.callee).cloned() {
            Some(callee) => callee,
            None => {
                state.dealer.discard_invocation(routing.invocation_id);
                return Err(InteractionError::NoSuchProcedure.into());
            }
        };
        if callee.send(Message::Invocation(routing.invocation)).await.is_err() {
            state.dealer.discard_invocation(routing.invocation_id);
            return Err(InteractionError::Canceled.into());
        }
        if let Some(timeout) = routing.timeout {
            tokio::spawn(Self::expire_invocation(
                self.clone(),
                routing.invocation_id,
                timeout,
            ));
        }
        Ok(())
    }

    async fn handle_cancel(
        &self,
        session: &SessionHandle,
        message: &CancelMessage,
    ) -> Result<()> {
        self.ensure_role(RouterRole::Dealer)?;
        let mut state = self.state.lock().await;
        let state = &mut *state;
        for (to, message) in state.dealer.cancel(session.id(), message) {
            Self::deliver(state, to, message).await;
        }
        Ok(())
    }

    async fn handle_yield(&self, session: &SessionHandle, message: &YieldMessage) -> Result<()> {
        self.ensure_role(RouterRole::Dealer)?;
        let mut state = self.state.lock().await;
        let state = &mut *state;
        // A YIELD for an unknown invocation (completed, canceled, or timed out) is dropped.
        if let Some((caller, result)) = state.dealer.yield_invocation(session.id(), message) {
            Self::deliver(state, caller, Message::Result(result)).await;
        }
        Ok(())
    }

    async fn handle_error(&self, session: &SessionHandle, message: &ErrorMessage) -> Result<()> {
        self.ensure_role(RouterRole::Dealer)?;
        let mut state = self.state.lock().await;
        let state = &mut *state;
        if let Some((caller, error)) = state.dealer.error_invocation(session.id(), message) {
            Self::deliver(state, caller, Message::Error(error)).await;
        }
        Ok(())
    }

    async fn expire_invocation(realm: Arc<Realm>, invocation: Id, timeout: Duration) {
        tokio::time::sleep(timeout).await;
        let mut state = realm.state.lock().await;
        let state = &mut *state;
        let outbound = state.dealer.expire_invocation(invocation);
        if !outbound.is_empty() {
            debug!("Invocation {invocation} timed out");
        }
        for (to, message) in outbound {
            Self::deliver(state, to, message).await;
        }
    }

    /// Delivers a routed message to a session, best effort.
    ///
    /// EVENTs take the lossy path. A recipient that is gone, or whose link closed underneath a
    /// reliable delivery, just loses the message; its own session loop handles the teardown.
    async fn deliver(state: &RealmState, to: Id, message: Message) {
        let session = match state.sessions.get(&to) {
            Some(session) => session,
            None => {
                debug!(
                    "Dropping {} message for unknown session {to}",
                    message.message_name()
                );
                return;
            }
        };
        match message {
            message @ Message::Event(_) => session.send_lossy(message),
            message => {
                let message_name = message.message_name();
                if let Err(err) = session.send(message).await {
                    debug!("Failed to deliver {message_name} message to session {to}: {err}");
                }
            }
        }
    }

    /// Removes a session and evicts its broker and dealer state.
    pub(crate) async fn remove_session(&self, session: Id) {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        if state.sessions.remove(&session).is_none() {
            return;
        }
        state.broker.session_closed(session);
        for (to, message) in state.dealer.session_closed(session) {
            Self::deliver(state, to, message).await;
        }
        info!("Session {session} left realm {}", self.uri());
    }

    /// Closes every session in the realm.
    ///
    /// Shutdown GOODBYEs take the lossy path: a peer that stopped reading loses them rather than
    /// stalling the realm, and pending outbound messages may be dropped.
    pub async fn shut_down(&self, close_reason: CloseReason) {
        let mut state = self.state.lock().await;
        info!("Shutting down realm {}", self.uri());
        for (_, session) in state.sessions.drain() {
            session.send_lossy(goodbye_with_close_reason(close_reason));
            session.close();
        }
    }
}

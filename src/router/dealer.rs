use std::{
    sync::Arc,
    time::Duration,
};

use anyhow::Result;

use crate::{
    core::{
        cancel::CallCancelMode,
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
        invocation_policy::InvocationPolicy,
        match_style::MatchStyle,
        types::{
            Dictionary,
            Value,
        },
        uri::{
            Uri,
            validate_strict_uri,
            validate_strict_wildcard_uri,
        },
    },
    message::message::{
        CallMessage,
        CancelMessage,
        ErrorMessage,
        InterruptMessage,
        InvocationMessage,
        Message,
        RegisterMessage,
        RegisteredMessage,
        ResultMessage,
        UnregisterMessage,
        UnregisteredMessage,
        YieldMessage,
    },
    router::{
        matcher::PatternIndex,
        meta::META_SESSION_ID,
        session::SessionHandle,
    },
};

/// A registered procedure: its callee and the invocation policy it was registered with.
///
/// A registration has a single authoritative callee. The invocation policy is recorded and
/// surfaced by the registration meta-procedures; duplicate registration of a structurally
/// identical (procedure, match style) fails regardless of policy.
pub struct Registration {
    pub callee: Id,
    pub invocation_policy: InvocationPolicy,
}

/// The in-flight half of a call, linking caller and callee.
pub struct Invocation {
    pub call_request: Id,
    pub caller: Id,
    pub callee: Id,
    pub registration: Id,
    pub receive_progress: bool,
}

/// The routing decision made for one CALL message.
pub struct CallRouting {
    pub callee: Id,
    pub invocation_id: Id,
    pub invocation: InvocationMessage,
    pub timeout: Option<Duration>,
}

/// The realm's RPC engine: the registration table and CALL/INVOCATION/YIELD/RESULT bookkeeping.
pub struct Dealer {
    procedures: PatternIndex<Registration>,
    registrations_by_session: HashMap<Id, HashSet<Id>>,
    invocations: HashMap<Id, Invocation>,
    invocations_by_call: HashMap<(Id, Id), Id>,
    invocations_by_caller: HashMap<Id, HashSet<Id>>,
    invocations_by_callee: HashMap<Id, HashSet<Id>>,
    id_allocator: Arc<Box<dyn IdAllocator>>,
    strict_uri: bool,
    allow_disclose: bool,
}

impl Dealer {
    pub fn new(
        id_allocator: Arc<Box<dyn IdAllocator>>,
        strict_uri: bool,
        allow_disclose: bool,
    ) -> Self {
        Self {
            procedures: PatternIndex::default(),
            registrations_by_session: HashMap::default(),
            invocations: HashMap::default(),
            invocations_by_call: HashMap::default(),
            invocations_by_caller: HashMap::default(),
            invocations_by_callee: HashMap::default(),
            id_allocator,
            strict_uri,
            allow_disclose,
        }
    }

    /// The registration table, for the registration meta-procedures.
    pub fn procedures(&self) -> &PatternIndex<Registration> {
        &self.procedures
    }

    async fn allocate_registration_id(&self) -> Id {
        loop {
            let id = self.id_allocator.generate_id().await;
            if !self.procedures.contains_id(id) {
                return id;
            }
        }
    }

    async fn allocate_invocation_id(&self) -> Id {
        loop {
            let id = self.id_allocator.generate_id().await;
            if !self.invocations.contains_key(&id) {
                return id;
            }
        }
    }

    /// Registers a router-internal procedure on the reserved meta session.
    pub async fn register_meta_procedure(&mut self, procedure: Uri) {
        let registration = self.allocate_registration_id().await;
        self.procedures.insert(
            registration,
            procedure.into(),
            MatchStyle::Exact,
            Registration {
                callee: META_SESSION_ID,
                invocation_policy: InvocationPolicy::Single,
            },
        );
        self.registrations_by_session
            .entry(META_SESSION_ID)
            .or_default()
            .insert(registration);
    }

    /// Registers a procedure for a callee session.
    pub async fn register(
        &mut self,
        session: &SessionHandle,
        message: &RegisterMessage,
    ) -> Result<RegisteredMessage> {
        if session.roles().callee.is_none() {
            return Err(BasicError::NotAllowed("peer is not a callee".to_owned()).into());
        }
        if self.strict_uri && validate_strict_wildcard_uri(&message.procedure).is_err() {
            return Err(InteractionError::InvalidUri.into());
        }
        let match_style = message
            .options
            .get("match")
            .and_then(|value| value.string())
            .and_then(|value| MatchStyle::try_from(value).ok())
            .unwrap_or_default();
        let invocation_policy = message
            .options
            .get("invoke")
            .and_then(|value| value.string())
            .and_then(|value| InvocationPolicy::try_from(value).ok())
            .unwrap_or_default();
        if self.procedures.lookup(&message.procedure, match_style).is_some() {
            return Err(InteractionError::ProcedureAlreadyExists.into());
        }
        let registration = self.allocate_registration_id().await;
        self.procedures.insert(
            registration,
            message.procedure.clone(),
            match_style,
            Registration {
                callee: session.id(),
                invocation_policy,
            },
        );
        self.registrations_by_session
            .entry(session.id())
            .or_default()
            .insert(registration);
        Ok(RegisteredMessage {
            register_request: message.request,
            registration,
        })
    }

    /// Unregisters a procedure the session registered.
    pub fn unregister(
        &mut self,
        session: Id,
        message: &UnregisterMessage,
    ) -> Result<UnregisteredMessage> {
        let registration = message.registered_registration;
        let owned = self
            .procedures
            .get(registration)
            .is_some_and(|entry| entry.value.callee == session);
        if !owned {
            return Err(InteractionError::NoSuchRegistration.into());
        }
        self.procedures.remove(registration);
        if let Some(registrations) = self.registrations_by_session.get_mut(&session) {
            registrations.remove(&registration);
        }
        Ok(UnregisteredMessage {
            unregister_request: message.request,
        })
    }

    /// Routes a CALL to the authoritative registration for its procedure.
    ///
    /// Records the invocation and produces the INVOCATION message; the realm delivers it (or
    /// dispatches it to the meta backend) and arms the timeout.
    pub async fn call(
        &mut self,
        sessions: &HashMap<Id, SessionHandle>,
        caller: &SessionHandle,
        message: &CallMessage,
    ) -> Result<CallRouting> {
        if caller.roles().caller.is_none() {
            return Err(BasicError::NotAllowed("peer is not a caller".to_owned()).into());
        }
        if self.strict_uri && validate_strict_uri(&message.procedure).is_err() {
            return Err(InteractionError::InvalidUri.into());
        }
        let registration = self
            .procedures
            .best_match(&message.procedure)
            .ok_or(InteractionError::NoSuchProcedure)?;
        let callee = self
            .procedures
            .get(registration)
            .expect("registration was just matched")
            .value
            .callee;

        let receive_progress = message
            .options
            .get("receive_progress")
            .and_then(|value| value.bool())
            .unwrap_or(false);
        let disclose_me = message
            .options
            .get("disclose_me")
            .and_then(|value| value.bool())
            .unwrap_or(false);
        let timeout = message
            .options
            .get("timeout")
            .and_then(|value| value.integer())
            .filter(|timeout| *timeout > 0)
            .map(Duration::from_millis);

        let callee_features = sessions
            .get(&callee)
            .and_then(|session| session.roles().callee.clone());
        let receive_progress = receive_progress
            && callee_features
                .as_ref()
                .is_some_and(|features| features.progressive_call_results);

        let mut details = Dictionary::from_iter([(
            "procedure".to_owned(),
            Value::from(message.procedure.clone()),
        )]);
        if receive_progress {
            details.insert("receive_progress".to_owned(), Value::Bool(true));
        }
        if let Some(timeout) = timeout {
            // Forwarded for callees that run their own deadline; the dealer-side timer stays
            // authoritative either way.
            if callee_features.as_ref().is_some_and(|features| features.call_timeout) {
                details.insert(
                    "timeout".to_owned(),
                    Value::Integer(timeout.as_millis() as u64),
                );
            }
        }
        if disclose_me && self.allow_disclose {
            details.insert("caller".to_owned(), Value::from(caller.id()));
        }

        let invocation_id = self.allocate_invocation_id().await;
        self.invocations.insert(
            invocation_id,
            Invocation {
                call_request: message.request,
                caller: caller.id(),
                callee,
                registration,
                receive_progress,
            },
        );
        self.invocations_by_call
            .insert((caller.id(), message.request), invocation_id);
        self.invocations_by_caller
            .entry(caller.id())
            .or_default()
            .insert(invocation_id);
        self.invocations_by_callee
            .entry(callee)
            .or_default()
            .insert(invocation_id);

        Ok(CallRouting {
            callee,
            invocation_id,
            invocation: InvocationMessage {
                request: invocation_id,
                registered_registration: registration,
                details,
                call_arguments: message.arguments.clone(),
                call_arguments_keyword: message.arguments_keyword.clone(),
            },
            timeout,
        })
    }

    fn remove_invocation(&mut self, invocation_id: Id) -> Option<Invocation> {
        let invocation = self.invocations.remove(&invocation_id)?;
        self.invocations_by_call
            .remove(&(invocation.caller, invocation.call_request));
        if let Some(invocations) = self.invocations_by_caller.get_mut(&invocation.caller) {
            invocations.remove(&invocation_id);
        }
        if let Some(invocations) = self.invocations_by_callee.get_mut(&invocation.callee) {
            invocations.remove(&invocation_id);
        }
        Some(invocation)
    }

    /// Discards an invocation whose INVOCATION message could not be delivered.
    pub fn discard_invocation(&mut self, invocation_id: Id) {
        self.remove_invocation(invocation_id);
    }

    /// Translates a YIELD from a callee into the caller's RESULT.
    ///
    /// A YIELD for an unknown invocation (or from the wrong session) is dropped. A progressive
    /// YIELD keeps the invocation open; a final YIELD destroys it.
    pub fn yield_invocation(
        &mut self,
        callee: Id,
        message: &YieldMessage,
    ) -> Option<(Id, ResultMessage)> {
        let invocation_id = message.invocation_request;
        let invocation = self.invocations.get(&invocation_id)?;
        if invocation.callee != callee {
            return None;
        }
        let progress = invocation.receive_progress
            && message
                .options
                .get("progress")
                .and_then(|value| value.bool())
                .unwrap_or(false);
        let mut details = Dictionary::default();
        if progress {
            details.insert("progress".to_owned(), Value::Bool(true));
        }
        let caller = invocation.caller;
        let result = ResultMessage {
            call_request: invocation.call_request,
            details,
            yield_arguments: message.arguments.clone(),
            yield_arguments_keyword: message.arguments_keyword.clone(),
        };
        if !progress {
            self.remove_invocation(invocation_id);
        }
        Some((caller, result))
    }

    /// Translates an invocation ERROR from a callee into the caller's call ERROR.
    pub fn error_invocation(
        &mut self,
        callee: Id,
        message: &ErrorMessage,
    ) -> Option<(Id, ErrorMessage)> {
        let invocation_id = message.request;
        let invocation = self.invocations.get(&invocation_id)?;
        if invocation.callee != callee {
            return None;
        }
        let invocation = self
            .remove_invocation(invocation_id)
            .expect("invocation was just resolved");
        Some((
            invocation.caller,
            ErrorMessage {
                request_type: Message::CALL_TAG,
                request: invocation.call_request,
                details: message.details.clone(),
                error: message.error.clone(),
                arguments: message.arguments.clone(),
                arguments_keyword: message.arguments_keyword.clone(),
            },
        ))
    }

    fn canceled_error(call_request: Id) -> ErrorMessage {
        ErrorMessage {
            request_type: Message::CALL_TAG,
            request: call_request,
            details: Dictionary::from_iter([(
                "message".to_owned(),
                Value::String("canceled".to_owned()),
            )]),
            error: Uri::from_known("wamp.error.canceled"),
            ..Default::default()
        }
    }

    /// Cancels a pending call on behalf of its caller.
    ///
    /// `skip` answers the caller immediately without touching the callee; `kill` (the default)
    /// interrupts the callee and leaves the invocation open for its acknowledgement;
    /// `killnowait` interrupts the callee and answers the caller immediately.
    pub fn cancel(&mut self, caller: Id, message: &CancelMessage) -> Vec<(Id, Message)> {
        let invocation_id = match self.invocations_by_call.get(&(caller, message.call_request)) {
            Some(invocation_id) => *invocation_id,
            None => return Vec::new(),
        };
        let mode = message
            .options
            .get("mode")
            .and_then(|value| value.string())
            .and_then(|value| CallCancelMode::try_from(value).ok())
            .unwrap_or_default();

        let mut outbound = Vec::new();
        if mode != CallCancelMode::Skip {
            let callee = self.invocations[&invocation_id].callee;
            outbound.push((
                callee,
                Message::Interrupt(InterruptMessage {
                    invocation_request: invocation_id,
                    options: message.options.clone(),
                }),
            ));
        }
        if mode != CallCancelMode::Kill {
            if let Some(invocation) = self.remove_invocation(invocation_id) {
                outbound.push((
                    invocation.caller,
                    Message::Error(Self::canceled_error(invocation.call_request)),
                ));
            }
        }
        outbound
    }

    /// Expires an invocation whose call timeout elapsed.
    ///
    /// Behaves as a cancel with `killnowait`: the callee is interrupted and the caller receives
    /// `wamp.error.canceled`. Does nothing if the invocation already completed.
    pub fn expire_invocation(&mut self, invocation_id: Id) -> Vec<(Id, Message)> {
        let invocation = match self.remove_invocation(invocation_id) {
            Some(invocation) => invocation,
            None => return Vec::new(),
        };
        Vec::from_iter([
            (
                invocation.callee,
                Message::Interrupt(InterruptMessage {
                    invocation_request: invocation_id,
                    options: Dictionary::from_iter([(
                        "mode".to_owned(),
                        Value::from(Into::<&'static str>::into(CallCancelMode::KillNoWait)),
                    )]),
                }),
            ),
            (
                invocation.caller,
                Message::Error(Self::canceled_error(invocation.call_request)),
            ),
        ])
    }

    /// Evicts all state owned by a closed session.
    ///
    /// Open invocations the session was serving fail back to their callers with
    /// `wamp.error.canceled`; calls it had pending are discarded, interrupting their callees.
    pub fn session_closed(&mut self, session: Id) -> Vec<(Id, Message)> {
        let mut outbound = Vec::new();

        if let Some(registrations) = self.registrations_by_session.remove(&session) {
            for registration in registrations {
                self.procedures.remove(registration);
            }
        }

        if let Some(invocations) = self.invocations_by_callee.remove(&session) {
            for invocation_id in invocations {
                if let Some(invocation) = self.remove_invocation(invocation_id) {
                    outbound.push((
                        invocation.caller,
                        Message::Error(Self::canceled_error(invocation.call_request)),
                    ));
                }
            }
        }

        if let Some(invocations) = self.invocations_by_caller.remove(&session) {
            for invocation_id in invocations {
                if let Some(invocation) = self.remove_invocation(invocation_id) {
                    outbound.push((
                        invocation.callee,
                        Message::Interrupt(InterruptMessage {
                            invocation_request: invocation_id,
                            ..Default::default()
                        }),
                    ));
                }
            }
        }

        outbound
    }
}

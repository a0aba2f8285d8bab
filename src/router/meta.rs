//! Router-internal meta-procedures exposing live session and registration state.
//!
//! Meta-procedures share the dealer's registration table with user registrations: they are
//! registered on a reserved session ID at realm creation, so ordinary CALL dispatch resolves
//! them. The realm intercepts INVOCATIONs addressed to that session and answers them here,
//! synchronously, under the same realm lock as the dispatching call.

use std::time::{
    SystemTime,
    UNIX_EPOCH,
};

use anyhow::Result;

use crate::{
    core::{
        error::{
            BasicError,
            InteractionError,
        },
        id::Id,
        match_style::MatchStyle,
        types::{
            Dictionary,
            Integer,
            List,
            Value,
        },
        uri::{
            Uri,
            WildcardUri,
        },
    },
    router::realm::RealmState,
};

/// The session ID reserved for the router-internal meta-callee.
///
/// Never allocated to a peer, absent from the session table, and excluded from all session
/// meta results.
pub(crate) const META_SESSION_ID: Id = Id::from_known(1);

const SESSION_COUNT: &str = "wamp.session.count";
const SESSION_LIST: &str = "wamp.session.list";
const SESSION_GET: &str = "wamp.session.get";
const REGISTRATION_LIST: &str = "wamp.registration.list";
const REGISTRATION_LOOKUP: &str = "wamp.registration.lookup";
const REGISTRATION_MATCH: &str = "wamp.registration.match";
const REGISTRATION_GET: &str = "wamp.registration.get";
const REGISTRATION_LIST_CALLEES: &str = "wamp.registration.list_callees";
const REGISTRATION_COUNT_CALLEES: &str = "wamp.registration.count_callees";

/// The procedures the meta-callee serves, registered in the dealer at realm creation.
pub(crate) fn meta_procedures() -> impl Iterator<Item = Uri> {
    [
        SESSION_COUNT,
        SESSION_LIST,
        SESSION_GET,
        REGISTRATION_LIST,
        REGISTRATION_LOOKUP,
        REGISTRATION_MATCH,
        REGISTRATION_GET,
        REGISTRATION_LIST_CALLEES,
        REGISTRATION_COUNT_CALLEES,
    ]
    .into_iter()
    .map(Uri::from_known)
}

/// Answers one meta-procedure call with its result arguments.
pub(crate) fn dispatch(state: &RealmState, procedure: &Uri, arguments: &List) -> Result<List> {
    match procedure.as_ref() {
        SESSION_COUNT => Ok(session_count(state)),
        SESSION_LIST => Ok(session_list(state)),
        SESSION_GET => session_get(state, arguments),
        REGISTRATION_LIST => Ok(registration_list(state)),
        REGISTRATION_LOOKUP => registration_lookup(state, arguments),
        REGISTRATION_MATCH => registration_match(state, arguments),
        REGISTRATION_GET => registration_get(state, arguments),
        REGISTRATION_LIST_CALLEES => registration_list_callees(state, arguments),
        REGISTRATION_COUNT_CALLEES => registration_count_callees(state, arguments),
        _ => Err(InteractionError::NoSuchProcedure.into()),
    }
}

fn unix_millis(time: SystemTime) -> Integer {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Integer
}

fn id_list(ids: impl IntoIterator<Item = Id>) -> Value {
    Value::List(ids.into_iter().map(Value::from).collect())
}

fn id_argument(arguments: &List, name: &str) -> Result<Id> {
    arguments
        .first()
        .and_then(|value| value.id())
        .ok_or_else(|| BasicError::InvalidArgument(format!("expected {name} argument")).into())
}

fn uri_argument(arguments: &List) -> Result<WildcardUri> {
    arguments
        .first()
        .and_then(|value| value.string())
        .and_then(|value| WildcardUri::try_from(value).ok())
        .ok_or_else(|| BasicError::InvalidArgument("expected URI argument".to_owned()).into())
}

fn session_count(state: &RealmState) -> List {
    List::from_iter([Value::Integer(state.sessions.len() as Integer)])
}

fn session_list(state: &RealmState) -> List {
    let mut sessions = state.sessions.keys().copied().collect::<Vec<_>>();
    sessions.sort_unstable();
    List::from_iter([id_list(sessions)])
}

fn session_get(state: &RealmState, arguments: &List) -> Result<List> {
    let session = id_argument(arguments, "session ID")?;
    let session = state
        .sessions
        .get(&session)
        .ok_or(InteractionError::NoSuchSession)?;
    let identity = session.identity();
    Ok(List::from_iter([Value::Dictionary(Dictionary::from_iter([
        ("session".to_owned(), Value::from(session.id())),
        ("authid".to_owned(), Value::from(identity.authid.clone())),
        ("authrole".to_owned(), Value::from(identity.authrole.clone())),
        (
            "authmethod".to_owned(),
            Value::from(identity.authmethod.clone()),
        ),
        (
            "authprovider".to_owned(),
            Value::from(identity.authprovider.clone()),
        ),
    ]))]))
}

fn registration_list(state: &RealmState) -> List {
    let lists = state.dealer.procedures().list();
    List::from_iter([Value::Dictionary(Dictionary::from_iter([
        ("exact".to_owned(), id_list(lists.exact)),
        ("prefix".to_owned(), id_list(lists.prefix)),
        ("wildcard".to_owned(), id_list(lists.wildcard)),
    ]))])
}

fn registration_lookup(state: &RealmState, arguments: &List) -> Result<List> {
    let procedure = uri_argument(arguments)?;
    let match_style = arguments
        .get(1)
        .and_then(|value| value.dictionary())
        .and_then(|options| options.get("match"))
        .and_then(|value| value.string())
        .and_then(|value| MatchStyle::try_from(value).ok())
        .unwrap_or_default();
    Ok(state
        .dealer
        .procedures()
        .lookup(&procedure, match_style)
        .map(|registration| List::from_iter([Value::from(registration)]))
        .unwrap_or_default())
}

fn registration_match(state: &RealmState, arguments: &List) -> Result<List> {
    let procedure = Uri::try_from(&uri_argument(arguments)?)
        .map_err(|_| BasicError::InvalidArgument("expected a concrete URI".to_owned()))?;
    Ok(state
        .dealer
        .procedures()
        .best_match(&procedure)
        .map(|registration| List::from_iter([Value::from(registration)]))
        .unwrap_or_default())
}

fn registration_get(state: &RealmState, arguments: &List) -> Result<List> {
    let registration = id_argument(arguments, "registration ID")?;
    let entry = state
        .dealer
        .procedures()
        .get(registration)
        .ok_or(InteractionError::NoSuchRegistration)?;
    Ok(List::from_iter([Value::Dictionary(Dictionary::from_iter([
        ("id".to_owned(), Value::from(entry.id)),
        ("created".to_owned(), Value::Integer(unix_millis(entry.created))),
        ("uri".to_owned(), Value::from(entry.uri.to_string())),
        ("match".to_owned(), Value::from(String::from(entry.match_style))),
        (
            "invoke".to_owned(),
            Value::from(String::from(entry.value.invocation_policy)),
        ),
    ]))]))
}

fn registration_list_callees(state: &RealmState, arguments: &List) -> Result<List> {
    let registration = id_argument(arguments, "registration ID")?;
    let entry = state
        .dealer
        .procedures()
        .get(registration)
        .ok_or(InteractionError::NoSuchRegistration)?;
    Ok(List::from_iter([id_list([entry.value.callee])]))
}

fn registration_count_callees(state: &RealmState, arguments: &List) -> Result<List> {
    let registration = id_argument(arguments, "registration ID")?;
    if state.dealer.procedures().get(registration).is_none() {
        return Err(InteractionError::NoSuchRegistration.into());
    }
    Ok(List::from_iter([Value::Integer(1)]))
}

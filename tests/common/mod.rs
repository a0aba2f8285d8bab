#![allow(dead_code)]

use std::{
    sync::Once,
    time::Duration,
};

use anyhow::{
    Error,
    Result,
};
use nexus_router::{
    core::{
        id::Id,
        types::{
            Dictionary,
            List,
            Value,
        },
        uri::Uri,
    },
    message::message::{
        HelloMessage,
        Message,
    },
    peer::Peer,
    router::{
        RealmConfig,
        Router,
        RouterConfig,
    },
};

pub const REALM: &str = "nexus.test.realm";
pub const PROCEDURE: &str = "nexus.test.endpoint";
pub const PROCEDURE_WILDCARD: &str = "nexus..endpoint";

static INIT: Once = Once::new();

pub fn setup_test_environment() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing_core::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
    });
}

pub fn id(value: u64) -> Id {
    Id::try_from(value).unwrap()
}

fn role_with_features<'s>(features: impl IntoIterator<Item = (&'s str, bool)>) -> Value {
    Value::Dictionary(Dictionary::from_iter([(
        "features".to_owned(),
        Value::Dictionary(Dictionary::from_iter(
            features
                .into_iter()
                .map(|(feature, enabled)| (feature.to_owned(), Value::Bool(enabled))),
        )),
    )]))
}

/// HELLO details advertising all four client roles, with the features the tests rely on.
pub fn client_roles() -> Dictionary {
    Dictionary::from_iter([
        (
            "roles".to_owned(),
            Value::Dictionary(Dictionary::from_iter([
                (
                    "subscriber".to_owned(),
                    role_with_features([("publisher_identification", true)]),
                ),
                (
                    "publisher".to_owned(),
                    Value::Dictionary(Dictionary::default()),
                ),
                (
                    "callee".to_owned(),
                    role_with_features([
                        ("call_canceling", true),
                        ("call_timeout", true),
                        ("progressive_call_results", true),
                    ]),
                ),
                ("caller".to_owned(), role_with_features([("call_timeout", true)])),
            ])),
        ),
        (
            "authmethods".to_owned(),
            Value::List(List::from_iter([
                Value::from("anonymous"),
                Value::from("ticket"),
            ])),
        ),
    ])
}

pub async fn new_test_router() -> Result<Router> {
    let router = Router::new(RouterConfig::default());
    router
        .add_realm(RealmConfig {
            name: "test".to_owned(),
            uri: Uri::try_from(REALM)?,
            anonymous_auth: true,
            allow_disclose: false,
        })
        .await?;
    Ok(router)
}

/// Attaches a fresh peer pair to the router and completes the handshake.
///
/// Returns the client end and the session ID carried by WELCOME, which is always the first
/// message delivered.
pub async fn handshake(router: &Router) -> Result<(Peer, Id)> {
    handshake_with_details(router, client_roles()).await
}

pub async fn handshake_with_details(router: &Router, details: Dictionary) -> Result<(Peer, Id)> {
    let (client, server) = Peer::linked();
    client
        .send(Message::Hello(HelloMessage {
            realm: Uri::try_from(REALM)?,
            details,
        }))
        .await?;
    let session = router.attach(server).await?;
    match recv(&client).await? {
        Message::Welcome(welcome) => {
            if welcome.session != session {
                return Err(Error::msg("WELCOME carries the wrong session ID"));
            }
        }
        message => {
            return Err(Error::msg(format!(
                "expected WELCOME, received {}",
                message.message_name()
            )))
        }
    }
    Ok((client, session))
}

/// Receives the peer's next message, failing the test after one second of silence.
pub async fn recv(peer: &Peer) -> Result<Message> {
    tokio::time::timeout(Duration::from_secs(1), peer.recv())
        .await
        .map_err(|_| Error::msg("timed out waiting for message"))?
        .ok_or_else(|| Error::msg("peer closed"))
}

/// Asserts that the peer receives nothing for 200 milliseconds.
pub async fn expect_silence(peer: &Peer) {
    match tokio::time::timeout(Duration::from_millis(200), peer.recv()).await {
        Err(_) => (),
        Ok(message) => panic!("expected silence, received {message:?}"),
    }
}

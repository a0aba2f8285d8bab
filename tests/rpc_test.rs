mod common;

use std::time::Duration;

use nexus_router::{
    core::{
        id::Id,
        types::{
            Dictionary,
            List,
            Value,
        },
        uri::{
            Uri,
            WildcardUri,
        },
    },
    message::message::{
        CallMessage,
        CancelMessage,
        ErrorMessage,
        Message,
        RegisterMessage,
        UnregisterMessage,
        YieldMessage,
    },
    peer::Peer,
    router::{
        RealmConfig,
        Router,
        RouterConfig,
    },
};

use crate::common::{
    expect_silence,
    handshake,
    id,
    new_test_router,
    recv,
    PROCEDURE,
    PROCEDURE_WILDCARD,
};

async fn register(callee: &Peer, request: u64, procedure: &str, options: Dictionary) -> Id {
    callee
        .send(Message::Register(RegisterMessage {
            request: id(request),
            options,
            procedure: WildcardUri::try_from(procedure).unwrap(),
        }))
        .await
        .unwrap();
    assert_matches::assert_matches!(recv(callee).await, Ok(Message::Registered(registered)) => {
        assert_eq!(registered.register_request, id(request));
        registered.registration
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn call_routes_invocation_and_result() {
    common::setup_test_environment();

    let router = new_test_router().await.unwrap();
    let (callee, _) = handshake(&router).await.unwrap();
    let (caller, _) = handshake(&router).await.unwrap();

    let registration = register(&callee, 1, PROCEDURE, Dictionary::default()).await;

    caller
        .send(Message::Call(CallMessage {
            request: id(2),
            procedure: Uri::try_from(PROCEDURE).unwrap(),
            arguments: List::from_iter([Value::from("input")]),
            ..Default::default()
        }))
        .await
        .unwrap();

    let invocation = assert_matches::assert_matches!(
        recv(&callee).await,
        Ok(Message::Invocation(invocation)) => {
            assert_eq!(invocation.registered_registration, registration);
            assert_eq!(
                invocation.details.get("procedure").and_then(|procedure| procedure.string()),
                Some(PROCEDURE)
            );
            assert_eq!(invocation.call_arguments, List::from_iter([Value::from("input")]));
            invocation.request
        }
    );

    callee
        .send(Message::Yield(YieldMessage {
            invocation_request: invocation,
            arguments: List::from_iter([Value::from("output")]),
            ..Default::default()
        }))
        .await
        .unwrap();

    assert_matches::assert_matches!(recv(&caller).await, Ok(Message::Result(result)) => {
        assert_eq!(result.call_request, id(2));
        assert_eq!(result.yield_arguments, List::from_iter([Value::from("output")]));
    });

    router.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn call_without_registration_fails() {
    common::setup_test_environment();

    let router = new_test_router().await.unwrap();
    let (caller, _) = handshake(&router).await.unwrap();

    caller
        .send(Message::Call(CallMessage {
            request: id(1),
            procedure: Uri::try_from("nexus.test.missing").unwrap(),
            ..Default::default()
        }))
        .await
        .unwrap();
    assert_matches::assert_matches!(recv(&caller).await, Ok(Message::Error(error)) => {
        assert_eq!(error.request_type, Message::CALL_TAG);
        assert_eq!(error.request, id(1));
        assert_eq!(error.error.as_ref(), "wamp.error.no_such_procedure");
    });

    router.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_registration_fails() {
    common::setup_test_environment();

    let router = new_test_router().await.unwrap();
    let (callee, _) = handshake(&router).await.unwrap();
    let (other, _) = handshake(&router).await.unwrap();

    register(&callee, 1, PROCEDURE, Dictionary::default()).await;

    other
        .send(Message::Register(RegisterMessage {
            request: id(2),
            procedure: WildcardUri::try_from(PROCEDURE).unwrap(),
            ..Default::default()
        }))
        .await
        .unwrap();
    assert_matches::assert_matches!(recv(&other).await, Ok(Message::Error(error)) => {
        assert_eq!(error.request, id(2));
        assert_eq!(error.error.as_ref(), "wamp.error.procedure_already_exists");
    });

    router.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unregister_removes_procedure() {
    common::setup_test_environment();

    let router = new_test_router().await.unwrap();
    let (callee, _) = handshake(&router).await.unwrap();
    let (caller, _) = handshake(&router).await.unwrap();

    let registration = register(&callee, 1, PROCEDURE, Dictionary::default()).await;

    // Only the owning session may unregister.
    caller
        .send(Message::Unregister(UnregisterMessage {
            request: id(2),
            registered_registration: registration,
        }))
        .await
        .unwrap();
    assert_matches::assert_matches!(recv(&caller).await, Ok(Message::Error(error)) => {
        assert_eq!(error.error.as_ref(), "wamp.error.no_such_registration");
    });

    callee
        .send(Message::Unregister(UnregisterMessage {
            request: id(3),
            registered_registration: registration,
        }))
        .await
        .unwrap();
    assert_matches::assert_matches!(
        recv(&callee).await,
        Ok(Message::Unregistered(unregistered)) => {
            assert_eq!(unregistered.unregister_request, id(3));
        }
    );

    caller
        .send(Message::Call(CallMessage {
            request: id(4),
            procedure: Uri::try_from(PROCEDURE).unwrap(),
            ..Default::default()
        }))
        .await
        .unwrap();
    assert_matches::assert_matches!(recv(&caller).await, Ok(Message::Error(error)) => {
        assert_eq!(error.error.as_ref(), "wamp.error.no_such_procedure");
    });

    router.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn callee_error_routed_to_caller() {
    common::setup_test_environment();

    let router = new_test_router().await.unwrap();
    let (callee, _) = handshake(&router).await.unwrap();
    let (caller, _) = handshake(&router).await.unwrap();

    register(&callee, 1, PROCEDURE, Dictionary::default()).await;

    caller
        .send(Message::Call(CallMessage {
            request: id(2),
            procedure: Uri::try_from(PROCEDURE).unwrap(),
            ..Default::default()
        }))
        .await
        .unwrap();
    let invocation = assert_matches::assert_matches!(
        recv(&callee).await,
        Ok(Message::Invocation(invocation)) => invocation.request
    );

    callee
        .send(Message::Error(ErrorMessage {
            request_type: Message::INVOCATION_TAG,
            request: invocation,
            error: Uri::try_from("nexus.test.error.failed").unwrap(),
            arguments: List::from_iter([Value::from("details")]),
            ..Default::default()
        }))
        .await
        .unwrap();

    assert_matches::assert_matches!(recv(&caller).await, Ok(Message::Error(error)) => {
        assert_eq!(error.request_type, Message::CALL_TAG);
        assert_eq!(error.request, id(2));
        assert_eq!(error.error.as_ref(), "nexus.test.error.failed");
        assert_eq!(error.arguments, List::from_iter([Value::from("details")]));
    });

    router.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_killnowait_interrupts_callee_and_fails_call() {
    common::setup_test_environment();

    let router = new_test_router().await.unwrap();
    let (callee, _) = handshake(&router).await.unwrap();
    let (caller, _) = handshake(&router).await.unwrap();

    register(&callee, 1, PROCEDURE, Dictionary::default()).await;

    caller
        .send(Message::Call(CallMessage {
            request: id(2),
            procedure: Uri::try_from(PROCEDURE).unwrap(),
            ..Default::default()
        }))
        .await
        .unwrap();
    let invocation = assert_matches::assert_matches!(
        recv(&callee).await,
        Ok(Message::Invocation(invocation)) => invocation.request
    );

    caller
        .send(Message::Cancel(CancelMessage {
            call_request: id(2),
            options: Dictionary::from_iter([("mode".to_owned(), Value::from("killnowait"))]),
        }))
        .await
        .unwrap();

    assert_matches::assert_matches!(recv(&callee).await, Ok(Message::Interrupt(interrupt)) => {
        assert_eq!(interrupt.invocation_request, invocation);
    });
    assert_matches::assert_matches!(recv(&caller).await, Ok(Message::Error(error)) => {
        assert_eq!(error.request_type, Message::CALL_TAG);
        assert_eq!(error.request, id(2));
        assert_eq!(error.error.as_ref(), "wamp.error.canceled");
    });

    // A YIELD for the destroyed invocation is dropped.
    callee
        .send(Message::Yield(YieldMessage {
            invocation_request: invocation,
            ..Default::default()
        }))
        .await
        .unwrap();
    expect_silence(&caller).await;

    router.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_default_mode_waits_for_callee() {
    common::setup_test_environment();

    let router = new_test_router().await.unwrap();
    let (callee, _) = handshake(&router).await.unwrap();
    let (caller, _) = handshake(&router).await.unwrap();

    register(&callee, 1, PROCEDURE, Dictionary::default()).await;

    caller
        .send(Message::Call(CallMessage {
            request: id(2),
            procedure: Uri::try_from(PROCEDURE).unwrap(),
            ..Default::default()
        }))
        .await
        .unwrap();
    let invocation = assert_matches::assert_matches!(
        recv(&callee).await,
        Ok(Message::Invocation(invocation)) => invocation.request
    );

    caller
        .send(Message::Cancel(CancelMessage {
            call_request: id(2),
            options: Dictionary::default(),
        }))
        .await
        .unwrap();
    assert_matches::assert_matches!(recv(&callee).await, Ok(Message::Interrupt(interrupt)) => {
        assert_eq!(interrupt.invocation_request, invocation);
    });
    // The invocation stays open until the callee acknowledges the interrupt.
    expect_silence(&caller).await;

    callee
        .send(Message::Error(ErrorMessage {
            request_type: Message::INVOCATION_TAG,
            request: invocation,
            error: Uri::try_from("wamp.error.canceled").unwrap(),
            ..Default::default()
        }))
        .await
        .unwrap();
    assert_matches::assert_matches!(recv(&caller).await, Ok(Message::Error(error)) => {
        assert_eq!(error.request, id(2));
        assert_eq!(error.error.as_ref(), "wamp.error.canceled");
    });

    router.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn call_timeout_cancels_invocation() {
    common::setup_test_environment();

    let router = new_test_router().await.unwrap();
    let (callee, _) = handshake(&router).await.unwrap();
    let (caller, _) = handshake(&router).await.unwrap();

    register(&callee, 1, PROCEDURE, Dictionary::default()).await;

    caller
        .send(Message::Call(CallMessage {
            request: id(2),
            options: Dictionary::from_iter([("timeout".to_owned(), Value::Integer(100))]),
            procedure: Uri::try_from(PROCEDURE).unwrap(),
            ..Default::default()
        }))
        .await
        .unwrap();
    let invocation = assert_matches::assert_matches!(
        recv(&callee).await,
        Ok(Message::Invocation(invocation)) => {
            // The callee advertised call_timeout support, so the deadline is forwarded.
            assert_eq!(
                invocation.details.get("timeout").and_then(|timeout| timeout.integer()),
                Some(100)
            );
            invocation.request
        }
    );

    // The callee never yields; the dealer expires the invocation.
    assert_matches::assert_matches!(recv(&caller).await, Ok(Message::Error(error)) => {
        assert_eq!(error.request, id(2));
        assert_eq!(error.error.as_ref(), "wamp.error.canceled");
    });
    assert_matches::assert_matches!(recv(&callee).await, Ok(Message::Interrupt(interrupt)) => {
        assert_eq!(interrupt.invocation_request, invocation);
    });

    router.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn progressive_results_keep_invocation_open() {
    common::setup_test_environment();

    let router = new_test_router().await.unwrap();
    let (callee, _) = handshake(&router).await.unwrap();
    let (caller, _) = handshake(&router).await.unwrap();

    register(&callee, 1, PROCEDURE, Dictionary::default()).await;

    caller
        .send(Message::Call(CallMessage {
            request: id(2),
            options: Dictionary::from_iter([(
                "receive_progress".to_owned(),
                Value::Bool(true),
            )]),
            procedure: Uri::try_from(PROCEDURE).unwrap(),
            ..Default::default()
        }))
        .await
        .unwrap();
    let invocation = assert_matches::assert_matches!(
        recv(&callee).await,
        Ok(Message::Invocation(invocation)) => {
            assert_eq!(
                invocation.details.get("receive_progress").and_then(|value| value.bool()),
                Some(true)
            );
            invocation.request
        }
    );

    for i in 0..2 {
        callee
            .send(Message::Yield(YieldMessage {
                invocation_request: invocation,
                options: Dictionary::from_iter([("progress".to_owned(), Value::Bool(true))]),
                arguments: List::from_iter([Value::Integer(i)]),
                ..Default::default()
            }))
            .await
            .unwrap();
        assert_matches::assert_matches!(recv(&caller).await, Ok(Message::Result(result)) => {
            assert_eq!(result.call_request, id(2));
            assert_eq!(result.details.get("progress").and_then(|value| value.bool()), Some(true));
            assert_eq!(result.yield_arguments, List::from_iter([Value::Integer(i)]));
        });
    }

    callee
        .send(Message::Yield(YieldMessage {
            invocation_request: invocation,
            arguments: List::from_iter([Value::from("final")]),
            ..Default::default()
        }))
        .await
        .unwrap();
    assert_matches::assert_matches!(recv(&caller).await, Ok(Message::Result(result)) => {
        assert_eq!(result.details.get("progress"), None);
        assert_eq!(result.yield_arguments, List::from_iter([Value::from("final")]));
    });

    // The final result destroyed the invocation.
    callee
        .send(Message::Yield(YieldMessage {
            invocation_request: invocation,
            ..Default::default()
        }))
        .await
        .unwrap();
    expect_silence(&caller).await;

    router.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn callee_disconnect_fails_open_invocations() {
    common::setup_test_environment();

    let router = new_test_router().await.unwrap();
    let (callee, _) = handshake(&router).await.unwrap();
    let (caller, _) = handshake(&router).await.unwrap();

    register(&callee, 1, PROCEDURE, Dictionary::default()).await;

    caller
        .send(Message::Call(CallMessage {
            request: id(2),
            procedure: Uri::try_from(PROCEDURE).unwrap(),
            ..Default::default()
        }))
        .await
        .unwrap();
    assert_matches::assert_matches!(recv(&callee).await, Ok(Message::Invocation(_)));

    callee.close();

    assert_matches::assert_matches!(recv(&caller).await, Ok(Message::Error(error)) => {
        assert_eq!(error.request, id(2));
        assert_eq!(error.error.as_ref(), "wamp.error.canceled");
    });

    router.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn exact_registration_wins_over_wildcard() {
    common::setup_test_environment();

    let router = new_test_router().await.unwrap();
    let (exact_callee, _) = handshake(&router).await.unwrap();
    let (wildcard_callee, _) = handshake(&router).await.unwrap();
    let (caller, _) = handshake(&router).await.unwrap();

    let wildcard_registration = register(
        &wildcard_callee,
        1,
        PROCEDURE_WILDCARD,
        Dictionary::from_iter([("match".to_owned(), Value::from("wildcard"))]),
    )
    .await;
    let exact_registration = register(&exact_callee, 2, PROCEDURE, Dictionary::default()).await;

    caller
        .send(Message::Call(CallMessage {
            request: id(3),
            procedure: Uri::try_from(PROCEDURE).unwrap(),
            ..Default::default()
        }))
        .await
        .unwrap();
    assert_matches::assert_matches!(
        recv(&exact_callee).await,
        Ok(Message::Invocation(invocation)) => {
            assert_eq!(invocation.registered_registration, exact_registration);
        }
    );

    // A concrete URI only the wildcard matches routes to the wildcard callee.
    caller
        .send(Message::Call(CallMessage {
            request: id(4),
            procedure: Uri::try_from("nexus.other.endpoint").unwrap(),
            ..Default::default()
        }))
        .await
        .unwrap();
    assert_matches::assert_matches!(
        recv(&wildcard_callee).await,
        Ok(Message::Invocation(invocation)) => {
            assert_eq!(invocation.registered_registration, wildcard_registration);
            assert_eq!(
                invocation.details.get("procedure").and_then(|procedure| procedure.string()),
                Some("nexus.other.endpoint")
            );
        }
    );

    router.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn disclose_me_reveals_caller_when_realm_allows() {
    common::setup_test_environment();

    let router = Router::new(RouterConfig::default());
    router
        .add_realm(RealmConfig {
            name: "test".to_owned(),
            uri: Uri::try_from(common::REALM).unwrap(),
            anonymous_auth: true,
            allow_disclose: true,
        })
        .await
        .unwrap();
    let (callee, _) = handshake(&router).await.unwrap();
    let (caller, caller_session) = handshake(&router).await.unwrap();

    register(&callee, 1, PROCEDURE, Dictionary::default()).await;

    caller
        .send(Message::Call(CallMessage {
            request: id(2),
            options: Dictionary::from_iter([("disclose_me".to_owned(), Value::Bool(true))]),
            procedure: Uri::try_from(PROCEDURE).unwrap(),
            ..Default::default()
        }))
        .await
        .unwrap();
    assert_matches::assert_matches!(recv(&callee).await, Ok(Message::Invocation(invocation)) => {
        assert_eq!(
            invocation.details.get("caller").and_then(|caller| caller.id()),
            Some(caller_session)
        );
    });

    router.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn disclose_me_is_ignored_when_realm_denies() {
    common::setup_test_environment();

    let router = new_test_router().await.unwrap();
    let (callee, _) = handshake(&router).await.unwrap();
    let (caller, _) = handshake(&router).await.unwrap();

    register(&callee, 1, PROCEDURE, Dictionary::default()).await;

    caller
        .send(Message::Call(CallMessage {
            request: id(2),
            options: Dictionary::from_iter([("disclose_me".to_owned(), Value::Bool(true))]),
            procedure: Uri::try_from(PROCEDURE).unwrap(),
            ..Default::default()
        }))
        .await
        .unwrap();
    assert_matches::assert_matches!(recv(&callee).await, Ok(Message::Invocation(invocation)) => {
        assert_eq!(invocation.details.get("caller"), None);
    });

    router.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_of_unknown_call_is_ignored() {
    common::setup_test_environment();

    let router = new_test_router().await.unwrap();
    let (caller, _) = handshake(&router).await.unwrap();

    caller
        .send(Message::Cancel(CancelMessage {
            call_request: id(999),
            options: Dictionary::default(),
        }))
        .await
        .unwrap();
    expect_silence(&caller).await;

    router.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_handshake_still_attaches() {
    common::setup_test_environment();

    // Attach blocks until the peer's HELLO arrives.
    let router = new_test_router().await.unwrap();
    let (client, server) = Peer::linked();
    let send = {
        let client = client.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            client
                .send(Message::Hello(nexus_router::message::message::HelloMessage {
                    realm: Uri::try_from(common::REALM).unwrap(),
                    details: common::client_roles(),
                }))
                .await
                .unwrap();
        })
    };
    assert_matches::assert_matches!(router.attach(server).await, Ok(_));
    send.await.unwrap();
    assert_matches::assert_matches!(recv(&client).await, Ok(Message::Welcome(_)));

    router.close().await;
}

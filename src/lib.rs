//! # nexus-router
//!
//! **nexus-router** is the core message router of a WAMP (Web Application Messaging Protocol)
//! broker/dealer, written for Rust on top of [`tokio`](https://tokio.rs).
//!
//! WAMP is a session-oriented protocol that multiplexes two messaging patterns over a single
//! bidirectional peer connection: Publish & Subscribe and routed Remote Procedure Calls. The
//! router mediates between anonymous peers, forwarding messages so that publishers and
//! subscribers, and callers and callees, never address each other directly.
//!
//! This crate implements the realm-scoped routing engine itself. Transport adapters and wire
//! serialization are collaborators: the router operates on decoded
//! [`Message`][`crate::message::message::Message`] records flowing over an in-memory
//! [`Peer`][`crate::peer::Peer`] link, which doubles as the server-side adapter for any
//! transport that can produce such records.
//!
//! ## Routers
//!
//! A [`Router`][`crate::router::Router`] is a process-wide container of realms, each an isolated
//! namespace of sessions, subscriptions, and registrations.
//!
//! ```
//! use nexus_router::{
//!     core::uri::Uri,
//!     message::message::{
//!         HelloMessage,
//!         Message,
//!     },
//!     peer::Peer,
//!     router::{
//!         RealmConfig,
//!         Router,
//!         RouterConfig,
//!     },
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let router = Router::new(RouterConfig::default());
//!     router
//!         .add_realm(RealmConfig {
//!             name: "Test Realm".to_owned(),
//!             uri: Uri::try_from("com.example.realm")?,
//!             anonymous_auth: true,
//!             allow_disclose: false,
//!         })
//!         .await?;
//!
//!     // A transport adapter hands one end of a linked peer pair to the router. The other end
//!     // belongs to the client.
//!     let (client, server) = Peer::linked();
//!
//!     // The client initiates the handshake, and the router drives the session until the peer
//!     // says GOODBYE or disconnects.
//!     client
//!         .send(Message::Hello(HelloMessage {
//!             realm: Uri::try_from("com.example.realm")?,
//!             ..Default::default()
//!         }))
//!         .await?;
//!     let session = router.attach(server).await?;
//!     println!("session {session} attached");
//!
//!     router.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Sessions
//!
//! A peer attaches to a realm by sending HELLO and receiving WELCOME with a fresh session ID.
//! From then on, the realm pumps the session's inbound messages through the broker
//! (SUBSCRIBE, UNSUBSCRIBE, PUBLISH) and the dealer (REGISTER, UNREGISTER, CALL, CANCEL, YIELD),
//! delivering outbound messages back through the peer link.
//!
//! The dealer also exposes **meta-procedures** (`wamp.session.*`, `wamp.registration.*`) that
//! report live session and registration state. They are registered on a reserved in-process
//! session, so ordinary CALL dispatch reaches them.

pub mod core;
pub mod message;
pub mod peer;
pub mod router;

use std::sync::Arc;

use anyhow::Result;

use crate::{
    core::{
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
        match_style::MatchStyle,
        types::{
            Dictionary,
            Value,
        },
        uri::{
            validate_strict_uri,
            validate_strict_wildcard_uri,
        },
    },
    message::message::{
        EventMessage,
        Message,
        PublishMessage,
        PublishedMessage,
        SubscribeMessage,
        SubscribedMessage,
        UnsubscribeMessage,
        UnsubscribedMessage,
    },
    router::{
        matcher::PatternIndex,
        session::SessionHandle,
    },
};

/// A subscription: the set of sessions subscribed to one (topic, match style) pair.
///
/// There is exactly one subscription object per pair, shared by all its subscribers; a session
/// is a member at most once.
#[derive(Default)]
pub struct Subscription {
    pub subscribers: HashSet<Id>,
}

/// The realm's PubSub engine: the subscription table and PUBLISH fan-out.
pub struct Broker {
    topics: PatternIndex<Subscription>,
    subscriptions_by_session: HashMap<Id, HashSet<Id>>,
    id_allocator: Arc<Box<dyn IdAllocator>>,
    strict_uri: bool,
    allow_disclose: bool,
}

impl Broker {
    pub fn new(
        id_allocator: Arc<Box<dyn IdAllocator>>,
        strict_uri: bool,
        allow_disclose: bool,
    ) -> Self {
        Self {
            topics: PatternIndex::default(),
            subscriptions_by_session: HashMap::default(),
            id_allocator,
            strict_uri,
            allow_disclose,
        }
    }

    async fn allocate_subscription_id(&self) -> Id {
        loop {
            let id = self.id_allocator.generate_id().await;
            if !self.topics.contains_id(id) {
                return id;
            }
        }
    }

    /// Subscribes a session to a topic.
    pub async fn subscribe(
        &mut self,
        session: &SessionHandle,
        message: &SubscribeMessage,
    ) -> Result<SubscribedMessage> {
        if session.roles().subscriber.is_none() {
            return Err(BasicError::NotAllowed("peer is not a subscriber".to_owned()).into());
        }
        if self.strict_uri && validate_strict_wildcard_uri(&message.topic).is_err() {
            return Err(InteractionError::InvalidUri.into());
        }
        let match_style = message
            .options
            .get("match")
            .and_then(|value| value.string())
            .and_then(|value| MatchStyle::try_from(value).ok())
            .unwrap_or_default();
        let subscription = match self.topics.lookup(&message.topic, match_style) {
            Some(subscription) => subscription,
            None => {
                let subscription = self.allocate_subscription_id().await;
                self.topics.insert(
                    subscription,
                    message.topic.clone(),
                    match_style,
                    Subscription::default(),
                );
                subscription
            }
        };
        self.topics
            .get_mut(subscription)
            .expect("subscription was just resolved")
            .value
            .subscribers
            .insert(session.id());
        self.subscriptions_by_session
            .entry(session.id())
            .or_default()
            .insert(subscription);
        Ok(SubscribedMessage {
            subscribe_request: message.request,
            subscription,
        })
    }

    /// Unsubscribes a session from a subscription it owns.
    pub fn unsubscribe(
        &mut self,
        session: Id,
        message: &UnsubscribeMessage,
    ) -> Result<UnsubscribedMessage> {
        let subscription = message.subscribed_subscription;
        let removed = self
            .topics
            .get_mut(subscription)
            .is_some_and(|entry| entry.value.subscribers.remove(&session));
        if !removed {
            return Err(InteractionError::NoSuchSubscription.into());
        }
        if self
            .topics
            .get(subscription)
            .is_some_and(|entry| entry.value.subscribers.is_empty())
        {
            self.topics.remove(subscription);
        }
        if let Some(subscriptions) = self.subscriptions_by_session.get_mut(&session) {
            subscriptions.remove(&subscription);
        }
        Ok(UnsubscribedMessage {
            unsubscribe_request: message.request,
        })
    }

    /// Publishes an event to all subscriptions matching the topic.
    ///
    /// Events go out on the lossy path directly from here. Returns the PUBLISHED
    /// acknowledgement for the publisher if it asked for one.
    pub async fn publish(
        &mut self,
        sessions: &HashMap<Id, SessionHandle>,
        publisher: &SessionHandle,
        message: &PublishMessage,
    ) -> Result<Option<PublishedMessage>> {
        if publisher.roles().publisher.is_none() {
            return Err(BasicError::NotAllowed("peer is not a publisher".to_owned()).into());
        }
        if self.strict_uri && validate_strict_uri(&message.topic).is_err() {
            return Err(InteractionError::InvalidUri.into());
        }
        let acknowledge = message
            .options
            .get("acknowledge")
            .and_then(|value| value.bool())
            .unwrap_or(false);
        let exclude_me = message
            .options
            .get("exclude_me")
            .and_then(|value| value.bool())
            .unwrap_or(true);
        let disclose_me = message
            .options
            .get("disclose_me")
            .and_then(|value| value.bool())
            .unwrap_or(false);

        let publication = self.id_allocator.generate_id().await;
        let identify_publisher = publisher
            .roles()
            .publisher
            .as_ref()
            .is_some_and(|features| features.publisher_identification);

        for subscription in self.topics.matches(&message.topic) {
            let entry = match self.topics.get(subscription) {
                Some(entry) => entry,
                None => continue,
            };
            for subscriber in &entry.value.subscribers {
                if *subscriber == publisher.id() && exclude_me {
                    continue;
                }
                let subscriber = match sessions.get(subscriber) {
                    Some(subscriber) => subscriber,
                    None => continue,
                };
                let mut details = Dictionary::default();
                if entry.match_style != MatchStyle::Exact {
                    // Pattern subscribers cannot recover the concrete topic from the
                    // subscription alone.
                    details.insert("topic".to_owned(), Value::from(message.topic.clone()));
                }
                let subscriber_wants_publisher = subscriber
                    .roles()
                    .subscriber
                    .as_ref()
                    .is_some_and(|features| features.publisher_identification);
                if (disclose_me && self.allow_disclose)
                    || (identify_publisher && subscriber_wants_publisher)
                {
                    details.insert("publisher".to_owned(), Value::from(publisher.id()));
                }
                subscriber.send_lossy(Message::Event(EventMessage {
                    subscribed_subscription: subscription,
                    published_publication: publication,
                    details,
                    publish_arguments: message.arguments.clone(),
                    publish_arguments_keyword: message.arguments_keyword.clone(),
                }));
            }
        }

        Ok(acknowledge.then(|| PublishedMessage {
            publish_request: message.request,
            publication,
        }))
    }

    /// Evicts all subscriptions owned by a closed session.
    pub fn session_closed(&mut self, session: Id) {
        let subscriptions = match self.subscriptions_by_session.remove(&session) {
            Some(subscriptions) => subscriptions,
            None => return,
        };
        for subscription in subscriptions {
            let empty = self
                .topics
                .get_mut(subscription)
                .map(|entry| {
                    entry.value.subscribers.remove(&session);
                    entry.value.subscribers.is_empty()
                })
                .unwrap_or(false);
            if empty {
                self.topics.remove(subscription);
            }
        }
    }
}

use crate::core::{
    hash::HashSet,
    types::{
        Dictionary,
        Value,
    },
};

/// A role a peer may advertise when joining a realm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerRole {
    // Calls RPC endpoints.
    Caller,
    // Registers RPC endpoints.
    Callee,
    // Publishes events to topics.
    Publisher,
    // Subscribes to events for topics.
    Subscriber,
}

impl PeerRole {
    pub fn key_for_details(&self) -> &str {
        match self {
            Self::Caller => "caller",
            Self::Callee => "callee",
            Self::Publisher => "publisher",
            Self::Subscriber => "subscriber",
        }
    }
}

/// A role implemented by a router.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RouterRole {
    // Supports RPC calls.
    Dealer,
    // Supports pub/sub.
    Broker,
}

impl RouterRole {
    pub fn key_for_details(&self) -> &str {
        match self {
            Self::Dealer => "dealer",
            Self::Broker => "broker",
        }
    }
}

/// Features advertised by a publisher.
#[derive(Debug, Default, Clone)]
pub struct PublisherFeatures {
    pub publisher_identification: bool,
}

/// Features advertised by a subscriber.
#[derive(Debug, Default, Clone)]
pub struct SubscriberFeatures {
    pub publisher_identification: bool,
}

/// Features advertised by a caller.
#[derive(Debug, Default, Clone)]
pub struct CallerFeatures {
    pub call_timeout: bool,
    pub call_canceling: bool,
    pub progressive_call_results: bool,
}

/// Features advertised by a callee.
#[derive(Debug, Default, Clone)]
pub struct CalleeFeatures {
    pub call_timeout: bool,
    pub call_canceling: bool,
    pub progressive_call_results: bool,
}

/// The roles (and per-role features) a peer advertised in its HELLO message.
///
/// A missing `roles` dictionary enables every role with default features, so that minimal peers
/// remain usable; a present dictionary enables exactly the roles it names.
#[derive(Debug, Clone)]
pub struct PeerRoles {
    pub publisher: Option<PublisherFeatures>,
    pub subscriber: Option<SubscriberFeatures>,
    pub caller: Option<CallerFeatures>,
    pub callee: Option<CalleeFeatures>,
}

impl PeerRoles {
    /// Reads advertised roles out of HELLO details.
    pub fn from_hello_details(details: &Dictionary) -> Self {
        let roles = match details.get("roles").and_then(|value| value.dictionary()) {
            Some(roles) => roles,
            None => return Self::all(),
        };
        Self {
            publisher: roles.get(PeerRole::Publisher.key_for_details()).map(|role| {
                PublisherFeatures {
                    publisher_identification: feature_enabled(role, "publisher_identification"),
                }
            }),
            subscriber: roles
                .get(PeerRole::Subscriber.key_for_details())
                .map(|role| SubscriberFeatures {
                    publisher_identification: feature_enabled(role, "publisher_identification"),
                }),
            caller: roles
                .get(PeerRole::Caller.key_for_details())
                .map(|role| CallerFeatures {
                    call_timeout: feature_enabled(role, "call_timeout"),
                    call_canceling: feature_enabled(role, "call_canceling"),
                    progressive_call_results: feature_enabled(role, "progressive_call_results"),
                }),
            callee: roles
                .get(PeerRole::Callee.key_for_details())
                .map(|role| CalleeFeatures {
                    call_timeout: feature_enabled(role, "call_timeout"),
                    call_canceling: feature_enabled(role, "call_canceling"),
                    progressive_call_results: feature_enabled(role, "progressive_call_results"),
                }),
        }
    }

    fn all() -> Self {
        Self {
            publisher: Some(PublisherFeatures::default()),
            subscriber: Some(SubscriberFeatures::default()),
            caller: Some(CallerFeatures::default()),
            callee: Some(CalleeFeatures::default()),
        }
    }
}

fn feature_enabled(role: &Value, feature: &str) -> bool {
    role.dictionary()
        .and_then(|role| role.get("features"))
        .and_then(|features| features.dictionary())
        .and_then(|features| features.get(feature))
        .and_then(|value| value.bool())
        .unwrap_or(false)
}

/// The `roles` dictionary a router advertises in WELCOME details.
pub fn router_roles_details(roles: &HashSet<RouterRole>) -> Value {
    let mut details = Dictionary::default();
    for role in roles {
        let features = match role {
            RouterRole::Broker => Dictionary::from_iter([
                ("publisher_identification".to_owned(), Value::Bool(true)),
                ("pattern_based_subscription".to_owned(), Value::Bool(true)),
            ]),
            RouterRole::Dealer => Dictionary::from_iter([
                ("call_canceling".to_owned(), Value::Bool(true)),
                ("call_timeout".to_owned(), Value::Bool(true)),
                ("progressive_call_results".to_owned(), Value::Bool(true)),
                ("pattern_based_registration".to_owned(), Value::Bool(true)),
                ("session_meta_api".to_owned(), Value::Bool(true)),
                ("registration_meta_api".to_owned(), Value::Bool(true)),
            ]),
        };
        details.insert(
            role.key_for_details().to_owned(),
            Value::Dictionary(Dictionary::from_iter([(
                "features".to_owned(),
                Value::Dictionary(features),
            )])),
        );
    }
    Value::Dictionary(details)
}

#[cfg(test)]
mod roles_test {
    use crate::core::{
        roles::PeerRoles,
        types::{
            Dictionary,
            Value,
        },
    };

    #[test]
    fn reads_roles_and_features_from_details() {
        let details = Dictionary::from_iter([(
            "roles".to_owned(),
            Value::Dictionary(Dictionary::from_iter([
                (
                    "subscriber".to_owned(),
                    Value::Dictionary(Dictionary::from_iter([(
                        "features".to_owned(),
                        Value::Dictionary(Dictionary::from_iter([(
                            "publisher_identification".to_owned(),
                            Value::Bool(true),
                        )])),
                    )])),
                ),
                ("publisher".to_owned(), Value::Dictionary(Dictionary::default())),
                (
                    "caller".to_owned(),
                    Value::Dictionary(Dictionary::from_iter([(
                        "features".to_owned(),
                        Value::Dictionary(Dictionary::from_iter([(
                            "call_timeout".to_owned(),
                            Value::Bool(true),
                        )])),
                    )])),
                ),
            ])),
        )]);
        let roles = PeerRoles::from_hello_details(&details);
        assert_matches::assert_matches!(roles.subscriber, Some(features) => {
            assert!(features.publisher_identification);
        });
        assert_matches::assert_matches!(roles.publisher, Some(features) => {
            assert!(!features.publisher_identification);
        });
        assert_matches::assert_matches!(roles.caller, Some(features) => {
            assert!(features.call_timeout);
            assert!(!features.call_canceling);
        });
        assert_matches::assert_matches!(roles.callee, None);
    }

    #[test]
    fn missing_roles_enable_everything() {
        let roles = PeerRoles::from_hello_details(&Dictionary::default());
        assert!(roles.publisher.is_some());
        assert!(roles.subscriber.is_some());
        assert!(roles.caller.is_some());
        assert!(roles.callee.is_some());
    }
}

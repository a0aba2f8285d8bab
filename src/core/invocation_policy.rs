/// How a callee should be selected for invocations of a shared registration.
///
/// This router admits a single callee per registration, so the policy only affects what
/// `wamp.registration.get` reports; it is parsed and recorded for forward compatibility.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum InvocationPolicy {
    /// Invocation is sent to a single callee.
    #[default]
    Single,
    /// Invocation is sent to a callee in order of registration.
    RoundRobin,
    /// Invocation is sent to a random callee.
    Random,
    /// Invocation is sent to the first callee.
    First,
    /// Invocation is sent to the last callee.
    Last,
}

impl TryFrom<&str> for InvocationPolicy {
    type Error = anyhow::Error;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "single" => Ok(Self::Single),
            "roundrobin" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            _ => Err(Self::Error::msg(format!(
                "invalid invocation policy: {value}"
            ))),
        }
    }
}

impl From<InvocationPolicy> for &'static str {
    fn from(value: InvocationPolicy) -> Self {
        match value {
            InvocationPolicy::Single => "single",
            InvocationPolicy::RoundRobin => "roundrobin",
            InvocationPolicy::Random => "random",
            InvocationPolicy::First => "first",
            InvocationPolicy::Last => "last",
        }
    }
}

impl From<InvocationPolicy> for String {
    fn from(value: InvocationPolicy) -> Self {
        Into::<&'static str>::into(value).to_owned()
    }
}

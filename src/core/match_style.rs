/// How a procedure registration or subscription should be matched against concrete URIs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchStyle {
    /// The stored URI must equal the concrete URI.
    #[default]
    Exact,
    /// The stored URI must be a prefix of the concrete URI, aligned on component boundaries.
    Prefix,
    /// Empty components in the stored URI match any single component of the concrete URI.
    Wildcard,
}

impl TryFrom<&str> for MatchStyle {
    type Error = anyhow::Error;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "exact" => Ok(Self::Exact),
            "prefix" => Ok(Self::Prefix),
            "wildcard" => Ok(Self::Wildcard),
            _ => Err(Self::Error::msg(format!("invalid match style: {value}"))),
        }
    }
}

impl From<MatchStyle> for &'static str {
    fn from(value: MatchStyle) -> Self {
        match value {
            MatchStyle::Exact => "exact",
            MatchStyle::Prefix => "prefix",
            MatchStyle::Wildcard => "wildcard",
        }
    }
}

impl From<MatchStyle> for String {
    fn from(value: MatchStyle) -> Self {
        Into::<&'static str>::into(value).to_owned()
    }
}

impl std::fmt::Display for MatchStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Into::<&'static str>::into(*self).fmt(f)
    }
}

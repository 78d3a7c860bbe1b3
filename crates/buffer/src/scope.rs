use std::fmt;
use std::str::FromStr;

use bud_domain::error::Error;

/// Buffer scope — a channel or a focus item.
///
/// Rendered as `channel:<id>` / `focus:<id>`; that string is the key in
/// `buffers.json`. Equality is by both the tag and the id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Channel(String),
    Focus(String),
}

impl Scope {
    pub fn channel(id: impl Into<String>) -> Self {
        Scope::Channel(id.into())
    }

    pub fn focus(id: impl Into<String>) -> Self {
        Scope::Focus(id.into())
    }

    /// Scope for a message: its channel when it has one, otherwise the
    /// focus item itself.
    pub fn for_message(channel_id: Option<&str>, focus_id: &str) -> Self {
        match channel_id {
            Some(c) if !c.is_empty() => Scope::Channel(c.to_owned()),
            _ => Scope::Focus(focus_id.to_owned()),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Scope::Channel(id) | Scope::Focus(id) => id,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Channel(id) => write!(f, "channel:{id}"),
            Scope::Focus(id) => write!(f, "focus:{id}"),
        }
    }
}

impl FromStr for Scope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("channel", id)) if !id.is_empty() => Ok(Scope::Channel(id.to_owned())),
            Some(("focus", id)) if !id.is_empty() => Ok(Scope::Focus(id.to_owned())),
            _ => Err(Error::InvalidInput(format!("bad scope key: {s}"))),
        }
    }
}

//! # Dispatched actions and match patterns.
//!
//! An [`Action`] is a typed event: a `kind` discriminant plus a free-form
//! payload map. Actions travel over the [`Bus`](crate::Bus), drive
//! [`Process`](crate::Process) routing and reducers, and wake the supervisor's
//! `take`/`take_within` tasks.
//!
//! [`ActionPattern`] describes which actions an operation is interested in.
//!
//! ## Example
//! ```rust
//! use procvisor::{Action, ActionPattern};
//! use serde_json::json;
//!
//! let action = Action::new("SET_VALUE").with("value", json!(42));
//!
//! assert!(ActionPattern::Kind("SET_VALUE".into()).matches(&action));
//! assert!(ActionPattern::Any.matches(&action));
//! assert_eq!(action.get("value"), Some(&json!(42)));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A dispatched action: a `kind` discriminant plus payload fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Action discriminant, conventionally SCREAMING_SNAKE_CASE.
    #[serde(rename = "type")]
    pub kind: String,

    /// Free-form payload fields.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Action {
    /// Creates an action of the given kind with an empty payload.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: Map::new(),
        }
    }

    /// Attaches a payload field.
    #[inline]
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Returns a payload field, if present.
    #[inline]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

/// Which actions an operation wants to observe.
#[derive(Clone, Debug)]
pub enum ActionPattern {
    /// Every action matches.
    Any,
    /// Exactly one action kind matches.
    Kind(String),
    /// Any of the listed kinds match.
    OneOf(Vec<String>),
}

impl ActionPattern {
    /// Returns true when `action` satisfies this pattern.
    pub fn matches(&self, action: &Action) -> bool {
        match self {
            ActionPattern::Any => true,
            ActionPattern::Kind(kind) => action.kind == *kind,
            ActionPattern::OneOf(kinds) => kinds.iter().any(|k| action.kind == *k),
        }
    }
}

impl From<&str> for ActionPattern {
    fn from(kind: &str) -> Self {
        ActionPattern::Kind(kind.to_string())
    }
}

/// Derives an action type from a creator name.
///
/// Lower camel case becomes SCREAMING_SNAKE_CASE; names that are already
/// constant-case pass through unchanged, so declared reducer keys and derived
/// creator types line up.
///
/// ```rust
/// use procvisor::to_action_type;
///
/// assert_eq!(to_action_type("setUserName"), "SET_USER_NAME");
/// assert_eq!(to_action_type("SET_USER_NAME"), "SET_USER_NAME");
/// ```
pub fn to_action_type(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_breaks = false;
    for ch in name.chars() {
        if ch.is_uppercase() && prev_breaks {
            out.push('_');
        }
        prev_breaks = ch.is_lowercase() || ch.is_ascii_digit();
        out.push(ch.to_ascii_uppercase());
    }
    out
}

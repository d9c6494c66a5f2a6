//! Application message model.
//!
//! Messages are opaque application values. The testkit only needs to know
//! their type, the kind the application's configuration assigns to that type,
//! and how to validate, compare and render them.
//!
//! # Example
//!
//! ```ignore
//! use angzarr_testkit::message::{Message, ValidationError, ValidationScope};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct PlaceOrder {
//!     order_id: String,
//! }
//!
//! impl Message for PlaceOrder {
//!     fn validate(&self, _scope: &ValidationScope) -> Result<(), ValidationError> {
//!         if self.order_id.is_empty() {
//!             return Err(ValidationError::new("order_id must not be empty"));
//!         }
//!         Ok(())
//!     }
//! }
//! ```

use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// The three kinds of message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    /// A request to change state.
    Command,
    /// A fact that has already happened.
    Event,
    /// A self-addressed, deferred message for a process instance.
    Timeout,
}

impl MessageKind {
    /// All kinds, in declaration order.
    pub const ALL: [MessageKind; 3] = [
        MessageKind::Command,
        MessageKind::Event,
        MessageKind::Timeout,
    ];

    /// Lower-case noun, e.g. "command".
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Command => "command",
            MessageKind::Event => "event",
            MessageKind::Timeout => "timeout",
        }
    }

    /// Imperative verb used when describing production of this kind.
    pub fn verb(&self) -> &'static str {
        match self {
            MessageKind::Command => "execute",
            MessageKind::Event => "record",
            MessageKind::Timeout => "schedule",
        }
    }

    /// Past tense of [`MessageKind::verb`].
    pub fn past_tense(&self) -> &'static str {
        match self {
            MessageKind::Command => "executed",
            MessageKind::Event => "recorded",
            MessageKind::Timeout => "scheduled",
        }
    }

    /// Noun prefixed with the indefinite article, e.g. "an event".
    pub fn with_article(&self) -> &'static str {
        match self {
            MessageKind::Command => "a command",
            MessageKind::Event => "an event",
            MessageKind::Timeout => "a timeout",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scope passed to [`Message::validate`].
///
/// Tells the message which kind it is being validated as, so a type that is
/// validated differently as a command and as a timeout can tell the cases apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationScope {
    kind: MessageKind,
}

impl ValidationScope {
    pub(crate) fn new(kind: MessageKind) -> Self {
        Self { kind }
    }

    /// The kind the message is being validated as.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn is_command(&self) -> bool {
        self.kind == MessageKind::Command
    }

    pub fn is_event(&self) -> bool {
        self.kind == MessageKind::Event
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == MessageKind::Timeout
    }
}

/// Returned by [`Message::validate`] when a message is not well-formed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct ValidationError {
    reason: String,
}

impl ValidationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// An application-defined message.
///
/// Implement this for every command, event and timeout type. Types must also
/// be `Clone + PartialEq`, which provides [`DynMessage`] automatically.
pub trait Message: DynMessage + fmt::Debug + Send + Sync + 'static {
    /// Validate the message under the given kind.
    ///
    /// Messages produced by handlers and messages dispatched by a test are
    /// validated before the engine accepts them.
    fn validate(&self, _scope: &ValidationScope) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Object-safe operations every [`Message`] supports.
///
/// Blanket-implemented for any `Message + Clone + PartialEq`.
pub trait DynMessage {
    fn as_any(&self) -> &dyn Any;

    /// True if `other` has the same concrete type and compares equal.
    fn eq_message(&self, other: &dyn Message) -> bool;

    fn clone_message(&self) -> Arc<dyn Message>;

    fn message_type(&self) -> MessageType;
}

impl<T> DynMessage for T
where
    T: Message + Clone + PartialEq,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_message(&self, other: &dyn Message) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| other == self)
    }

    fn clone_message(&self) -> Arc<dyn Message> {
        Arc::new(self.clone())
    }

    fn message_type(&self) -> MessageType {
        MessageType::of::<T>()
    }
}

impl dyn Message {
    /// Downcast to a concrete message type.
    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn is<T: Message>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

/// Runtime identity of a message type.
///
/// Equality and hashing use the [`TypeId`]; ordering uses the type name so
/// that collections keyed by type iterate deterministically.
#[derive(Clone, Copy)]
pub struct MessageType {
    id: TypeId,
    name: &'static str,
}

impl MessageType {
    pub fn of<T: 'static + ?Sized>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Fully-qualified type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name with module paths removed, e.g. `Box<PlaceOrder>`.
    pub fn short_name(&self) -> String {
        short_type_name(self.name)
    }

    /// Number of wrapper layers separating two types.
    ///
    /// `Some(0)` for identical types, `Some(n)` when one type is the other
    /// wrapped `n` times in `Box`, `Arc`, `Rc`, `Option` or a reference, and
    /// `None` when the types are unrelated.
    pub fn indirection_to(&self, other: &MessageType) -> Option<usize> {
        if self.id == other.id {
            return Some(0);
        }
        indirection_distance(self.name, other.name)
            .or_else(|| indirection_distance(other.name, self.name))
    }
}

impl PartialEq for MessageType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MessageType {}

impl Hash for MessageType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for MessageType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MessageType {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(other.name)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_name())
    }
}

const WRAPPERS: [&str; 6] = [
    "alloc::boxed::Box<",
    "alloc::sync::Arc<",
    "alloc::rc::Rc<",
    "core::option::Option<",
    "std::sync::Arc<",
    "std::boxed::Box<",
];

/// Strip one wrapper layer from a type name.
fn unwrap_once(name: &str) -> Option<&str> {
    if let Some(rest) = name.strip_prefix("&mut ") {
        return Some(rest);
    }
    if let Some(rest) = name.strip_prefix('&') {
        return Some(rest);
    }
    WRAPPERS.iter().find_map(|prefix| {
        name.strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix('>'))
    })
}

/// Number of layers to strip from `outer` to reach `inner`.
fn indirection_distance(outer: &str, inner: &str) -> Option<usize> {
    let mut current = outer;
    let mut depth = 0;
    while let Some(next) = unwrap_once(current) {
        depth += 1;
        if next == inner {
            return Some(depth);
        }
        current = next;
    }
    None
}

/// Remove module paths from every path segment in a type name.
pub(crate) fn short_type_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut token = String::new();

    let flush = |token: &mut String, out: &mut String| {
        if !token.is_empty() {
            out.push_str(token.rsplit("::").next().unwrap_or(token.as_str()));
            token.clear();
        }
    };

    for ch in name.chars() {
        match ch {
            '<' | '>' | ',' | '&' | '(' | ')' | '[' | ']' | ';' | ' ' => {
                flush(&mut token, &mut out);
                out.push(ch);
            }
            _ => token.push(ch),
        }
    }
    flush(&mut token, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Ping {
        value: String,
    }

    impl Message for Ping {}

    #[derive(Debug, Clone, PartialEq)]
    struct Pong;

    impl Message for Pong {
        fn validate(&self, scope: &ValidationScope) -> Result<(), ValidationError> {
            if scope.is_timeout() {
                return Err(ValidationError::new("pong is never a timeout"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_eq_message_same_type_and_value() {
        let a = Ping { value: "a".into() };
        let b = Ping { value: "a".into() };
        assert!(a.eq_message(&b));
    }

    #[test]
    fn test_eq_message_different_value() {
        let a = Ping { value: "a".into() };
        let b = Ping { value: "b".into() };
        assert!(!a.eq_message(&b));
    }

    #[test]
    fn test_eq_message_different_type() {
        let a = Ping { value: "a".into() };
        assert!(!a.eq_message(&Pong));
    }

    #[test]
    fn test_downcast_through_dyn() {
        let m: Arc<dyn Message> = Arc::new(Ping { value: "x".into() });
        assert!(m.is::<Ping>());
        assert_eq!(m.downcast_ref::<Ping>().map(|p| p.value.as_str()), Some("x"));
        assert!(m.downcast_ref::<Pong>().is_none());
    }

    #[test]
    fn test_validation_scope_kind() {
        assert!(Pong.validate(&ValidationScope::new(MessageKind::Event)).is_ok());
        let err = Pong
            .validate(&ValidationScope::new(MessageKind::Timeout))
            .unwrap_err();
        assert_eq!(err.reason(), "pong is never a timeout");
    }

    #[test]
    fn test_short_name_strips_paths() {
        assert_eq!(
            short_type_name("alloc::boxed::Box<my_app::orders::PlaceOrder>"),
            "Box<PlaceOrder>"
        );
        assert_eq!(short_type_name("&my_app::Ping"), "&Ping");
        assert_eq!(
            short_type_name("(a::B, c::D)"),
            "(B, D)"
        );
    }

    #[test]
    fn test_indirection_identical() {
        let t = MessageType::of::<Ping>();
        assert_eq!(t.indirection_to(&t), Some(0));
    }

    #[test]
    fn test_indirection_wrapped() {
        let inner = MessageType::of::<Ping>();
        let boxed = MessageType::of::<Box<Ping>>();
        let double = MessageType::of::<Arc<Box<Ping>>>();
        assert_eq!(boxed.indirection_to(&inner), Some(1));
        assert_eq!(inner.indirection_to(&boxed), Some(1));
        assert_eq!(double.indirection_to(&inner), Some(2));
    }

    #[test]
    fn test_indirection_unrelated() {
        let a = MessageType::of::<Ping>();
        let b = MessageType::of::<Box<Pong>>();
        assert_eq!(a.indirection_to(&b), None);
    }

    #[test]
    fn test_kind_phrasing() {
        assert_eq!(MessageKind::Event.with_article(), "an event");
        assert_eq!(MessageKind::Command.past_tense(), "executed");
        assert_eq!(MessageKind::Timeout.verb(), "schedule");
    }
}

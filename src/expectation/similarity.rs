//! Ranking of observed messages against an expected one.

use std::cmp::{Ordering, Reverse};

use crate::message::{Message, MessageType};

/// How closely an observed message resembles the expected one.
///
/// Ordered from least to most similar. Only used to pick the near-miss a
/// failure report explains; never to decide pass or fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Similarity {
    Unrelated,
    /// The types differ by this many wrapper layers (`Box`, `Arc`, …).
    Indirect(usize),
    SameType,
    Equal,
}

impl Similarity {
    /// Compare two messages.
    pub fn of_messages(expected: &dyn Message, actual: &dyn Message) -> Self {
        if expected.eq_message(actual) {
            return Similarity::Equal;
        }
        match Self::of_types(&expected.message_type(), &actual.message_type()) {
            Similarity::Equal => Similarity::SameType,
            other => other,
        }
    }

    /// Compare two message types; identical types are `Equal`.
    pub fn of_types(expected: &MessageType, actual: &MessageType) -> Self {
        match expected.indirection_to(actual) {
            Some(0) => Similarity::Equal,
            Some(n) => Similarity::Indirect(n),
            None => Similarity::Unrelated,
        }
    }

    fn rank(&self) -> (u8, Reverse<usize>) {
        match self {
            Similarity::Unrelated => (0, Reverse(0)),
            Similarity::Indirect(n) => (1, Reverse(*n)),
            Similarity::SameType => (2, Reverse(0)),
            Similarity::Equal => (3, Reverse(0)),
        }
    }
}

impl PartialOrd for Similarity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Similarity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

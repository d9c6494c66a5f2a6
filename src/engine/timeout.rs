//! Pending timeouts of one process handler.

use chrono::{DateTime, Utc};

use crate::envelope::Envelope;

/// Timeouts ordered by due time, ties in insertion order.
#[derive(Debug, Default)]
pub(crate) struct TimeoutQueue {
    entries: Vec<Envelope>,
}

fn due_at(env: &Envelope) -> DateTime<Utc> {
    env.scheduled_for.unwrap_or(env.created_at)
}

impl TimeoutQueue {
    pub fn insert(&mut self, env: Envelope) {
        let at = due_at(&env);
        let index = self.entries.partition_point(|e| due_at(e) <= at);
        self.entries.insert(index, env);
    }

    /// Remove and return every timeout due at or before `now`.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<Envelope> {
        let count = self.entries.partition_point(|e| due_at(e) <= now);
        self.entries.drain(..count).collect()
    }

    /// Drop every timeout scheduled by the given instance.
    pub fn remove_instance(&mut self, instance_id: &str) {
        self.entries
            .retain(|e| e.origin_instance_id() != Some(instance_id));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{MessageId, Origin};
    use crate::handler::{HandlerKind, HandlerRef, Identity};
    use crate::message::Message;
    use chrono::TimeDelta;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    struct Tick;
    impl Message for Tick {}

    fn timeout(id: u64, instance: &str, at: DateTime<Utc>) -> Envelope {
        let root = Envelope::new_command(MessageId::new(0), Arc::new(Tick), at);
        root.new_child_timeout(
            MessageId::new(id),
            Arc::new(Tick),
            at,
            at,
            Origin::new(
                HandlerRef::new(Identity::new("p", "k"), HandlerKind::Process),
                Some(instance.into()),
            ),
        )
    }

    fn ids(envs: &[Envelope]) -> Vec<u64> {
        envs.iter().map(|e| e.message_id.get()).collect()
    }

    #[test]
    fn test_orders_by_due_time_then_insertion() {
        let t0 = Utc::now();
        let mut q = TimeoutQueue::default();
        q.insert(timeout(1, "a", t0 + TimeDelta::seconds(20)));
        q.insert(timeout(2, "a", t0 + TimeDelta::seconds(10)));
        q.insert(timeout(3, "b", t0 + TimeDelta::seconds(10)));
        q.insert(timeout(4, "b", t0 + TimeDelta::seconds(5)));

        let due = q.take_due(t0 + TimeDelta::seconds(10));
        assert_eq!(ids(&due), vec![4, 2, 3]);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_nothing_due_before_time() {
        let t0 = Utc::now();
        let mut q = TimeoutQueue::default();
        q.insert(timeout(1, "a", t0 + TimeDelta::seconds(1)));
        assert!(q.take_due(t0).is_empty());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_remove_instance() {
        let t0 = Utc::now();
        let mut q = TimeoutQueue::default();
        q.insert(timeout(1, "a", t0));
        q.insert(timeout(2, "b", t0));
        q.remove_instance("a");
        assert_eq!(ids(&q.take_due(t0)), vec![2]);
    }
}

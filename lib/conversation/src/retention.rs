//! Retention rules shared by the storage backends.
//!
//! Two policies live here: age-based cleanup of archived conversations, and
//! the per-user conversation cap applied when a conversation is created.
//! Both only ever remove inactive conversations.

use crate::conversation::Conversation;
use chrono::{DateTime, Duration, Utc};
use parley_core::ConversationId;

/// Returns the instant before which archived conversations are stale.
#[must_use]
pub fn cutoff(days: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(i64::from(days))
}

/// True if the conversation is archived and was last updated before `cutoff`.
#[must_use]
pub fn is_stale(conversation: &Conversation, cutoff: DateTime<Utc>) -> bool {
    !conversation.is_active && conversation.updated_at < cutoff
}

/// The fields of a stored conversation the cap needs to look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionCandidate {
    pub conversation_id: ConversationId,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<&Conversation> for RetentionCandidate {
    fn from(conversation: &Conversation) -> Self {
        Self {
            conversation_id: conversation.conversation_id.clone(),
            is_active: conversation.is_active,
            updated_at: conversation.updated_at,
        }
    }
}

/// Picks the conversations to delete so a user holds at most `max`.
///
/// Only inactive conversations are chosen, oldest first. If the user has more
/// active conversations than `max`, the result is short and the user stays
/// over the cap. A `max` of zero means no cap.
#[must_use]
pub fn select_evictions(mut candidates: Vec<RetentionCandidate>, max: usize) -> Vec<ConversationId> {
    if max == 0 || candidates.len() <= max {
        return Vec::new();
    }
    let excess = candidates.len() - max;

    candidates.retain(|c| !c.is_active);
    candidates.sort_by(|a, b| {
        a.updated_at
            .cmp(&b.updated_at)
            .then_with(|| a.conversation_id.cmp(&b.conversation_id))
    });
    candidates
        .into_iter()
        .take(excess)
        .map(|c| c.conversation_id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::UserId;

    fn candidate(id: &str, is_active: bool, age_days: i64) -> RetentionCandidate {
        RetentionCandidate {
            conversation_id: ConversationId::new(id).unwrap(),
            is_active,
            updated_at: Utc::now() - Duration::days(age_days),
        }
    }

    #[test]
    fn stale_requires_archived_and_old() {
        let now = Utc::now();
        let cut = cutoff(30, now);
        let mut conv = Conversation::new(UserId::new("u1").unwrap(), ConversationId::generate());
        conv.updated_at = now - Duration::days(40);
        assert!(!is_stale(&conv, cut));

        conv.is_active = false;
        assert!(is_stale(&conv, cut));

        conv.updated_at = now - Duration::days(10);
        assert!(!is_stale(&conv, cut));
    }

    #[test]
    fn under_cap_evicts_nothing() {
        let candidates = vec![candidate("a", false, 5), candidate("b", true, 1)];
        assert!(select_evictions(candidates, 2).is_empty());
    }

    #[test]
    fn evicts_oldest_inactive_first() {
        let candidates = vec![
            candidate("newest", false, 1),
            candidate("active-old", true, 100),
            candidate("oldest", false, 50),
            candidate("middle", false, 20),
        ];
        let evicted = select_evictions(candidates, 2);
        let names: Vec<&str> = evicted.iter().map(ConversationId::as_str).collect();
        assert_eq!(names, ["oldest", "middle"]);
    }

    #[test]
    fn never_evicts_active() {
        let candidates = vec![
            candidate("a", true, 3),
            candidate("b", true, 2),
            candidate("c", false, 1),
        ];
        let evicted = select_evictions(candidates, 1);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].as_str(), "c");
    }

    #[test]
    fn zero_means_unlimited() {
        let candidates = vec![candidate("a", false, 3), candidate("b", false, 2)];
        assert!(select_evictions(candidates, 0).is_empty());
    }
}

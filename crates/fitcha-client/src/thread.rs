//! Optimistic send and push reconciliation for one message thread.
//!
//! [`Thread`] holds the rendered list of a conversation or a session chat.
//! Sends append a local entry immediately and swap it for the server row
//! once the write resolves; pushed rows are merged without duplicating
//! anything the optimistic path already placed.

use chrono::{DateTime, Utc};

use fitcha_shared::messaging::Message;
use fitcha_shared::session::SessionChatMessage;
use fitcha_shared::types::{MessageId, UserId};
use fitcha_shared::ValidationError;

/// A row that can live in a [`Thread`].
pub trait ThreadMessage: Clone + Send + Sync + 'static {
    fn id(&self) -> MessageId;
    fn sender_id(&self) -> UserId;
    fn created_at(&self) -> DateTime<Utc>;
}

impl ThreadMessage for Message {
    fn id(&self) -> MessageId {
        self.message_id
    }

    fn sender_id(&self) -> UserId {
        self.sender_id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl ThreadMessage for SessionChatMessage {
    fn id(&self) -> MessageId {
        self.id
    }

    fn sender_id(&self) -> UserId {
        self.sender_id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// What [`Thread::apply_remote`] did with a pushed row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Authored by the viewer; the optimistic path owns it.
    SelfEcho,
    /// Already present under its server id.
    Duplicate,
    Appended,
}

#[derive(Debug, Clone)]
pub struct Thread<M> {
    messages: Vec<M>,
    in_flight: Option<MessageId>,
    draft: String,
}

impl<M> Default for Thread<M> {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            in_flight: None,
            draft: String::new(),
        }
    }
}

impl<M: ThreadMessage> Thread<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[M] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, draft: impl Into<String>) {
        self.draft = draft.into();
    }

    pub fn is_sending(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Trimmed body ready to send, or why it cannot be sent.
    pub fn validate(&self, body: &str) -> Result<String, ValidationError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(ValidationError::EmptyBody);
        }
        if self.in_flight.is_some() {
            return Err(ValidationError::SendInFlight);
        }
        Ok(body.to_string())
    }

    /// Append the optimistic entry and clear the draft.
    pub fn begin_send(&mut self, optimistic: M) {
        self.in_flight = Some(optimistic.id());
        self.messages.push(optimistic);
        self.draft.clear();
    }

    /// Swap the optimistic entry for the server row, in place.
    ///
    /// If the server row is somehow already present (pushed from another
    /// session of the same user), the optimistic entry is dropped instead.
    pub fn confirm(&mut self, local: MessageId, confirmed: M) -> bool {
        if self.in_flight == Some(local) {
            self.in_flight = None;
        }
        let Some(index) = self.position(local) else {
            return false;
        };
        if self.position(confirmed.id()).is_some() {
            self.messages.remove(index);
        } else {
            self.messages[index] = confirmed;
        }
        true
    }

    /// Remove the optimistic entry and put `body` back in the draft.
    pub fn rollback(&mut self, local: MessageId, body: String) -> bool {
        if self.in_flight == Some(local) {
            self.in_flight = None;
        }
        self.draft = body;
        match self.position(local) {
            Some(index) => {
                self.messages.remove(index);
                true
            }
            None => false,
        }
    }

    /// Merge a pushed row authored by anyone.
    pub fn apply_remote(&mut self, incoming: M, viewer: &UserId) -> Applied {
        if &incoming.sender_id() == viewer {
            return Applied::SelfEcho;
        }
        if self.position(incoming.id()).is_some() {
            return Applied::Duplicate;
        }
        let at = incoming.created_at();
        let index = self.messages.partition_point(|m| m.created_at() <= at);
        self.messages.insert(index, incoming);
        Applied::Appended
    }

    /// Replace the list with a fresh snapshot, ordered by creation time.
    /// An entry still being sent stays at the end.
    pub fn replace_all(&mut self, mut messages: Vec<M>) {
        messages.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().server().cmp(&b.id().server()))
        });
        if let Some(local) = self.in_flight {
            if let Some(pending) = self.messages.iter().find(|m| m.id() == local).cloned() {
                messages.push(pending);
            }
        }
        self.messages = messages;
    }

    /// Forget everything, including an unresolved send.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.in_flight = None;
        self.draft.clear();
    }

    fn position(&self, id: MessageId) -> Option<usize> {
        self.messages.iter().position(|m| m.id() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use fitcha_shared::types::LocalIdGenerator;

    fn message(id: MessageId, sender: UserId, body: &str, at: DateTime<Utc>) -> Message {
        Message {
            message_id: id,
            sender_id: sender,
            sender_name: String::new(),
            sender_avatar: None,
            content: body.to_string(),
            created_at: at,
            is_read: false,
        }
    }

    #[test]
    fn test_optimistic_round_trip_keeps_position() {
        let ids = LocalIdGenerator::new();
        let me = UserId::new();
        let now = Utc::now();
        let mut thread = Thread::new();
        thread.replace_all(vec![message(MessageId::Server(1), UserId::new(), "hi", now)]);

        let body = thread.validate("  hello ").unwrap();
        let local = MessageId::Local(ids.next_id());
        thread.begin_send(message(local, me, &body, now));
        assert_eq!(thread.len(), 2);
        assert!(thread.is_sending());

        assert!(thread.confirm(local, message(MessageId::Server(42), me, "hello", now)));
        assert_eq!(thread.len(), 2);
        assert_eq!(thread.messages()[1].message_id, MessageId::Server(42));
        assert_eq!(thread.messages()[1].content, "hello");
        assert!(!thread.is_sending());
    }

    #[test]
    fn test_rollback_restores_draft() {
        let ids = LocalIdGenerator::new();
        let me = UserId::new();
        let mut thread: Thread<Message> = Thread::new();
        thread.set_draft("hello");

        let local = MessageId::Local(ids.next_id());
        thread.begin_send(message(local, me, "hello", Utc::now()));
        assert_eq!(thread.draft(), "");

        assert!(thread.rollback(local, "hello".into()));
        assert!(thread.is_empty());
        assert_eq!(thread.draft(), "hello");
        assert!(!thread.is_sending());
    }

    #[test]
    fn test_validation() {
        let ids = LocalIdGenerator::new();
        let mut thread: Thread<Message> = Thread::new();
        assert_eq!(thread.validate("   "), Err(ValidationError::EmptyBody));

        let local = MessageId::Local(ids.next_id());
        thread.begin_send(message(local, UserId::new(), "one", Utc::now()));
        assert_eq!(thread.validate("two"), Err(ValidationError::SendInFlight));
    }

    #[test]
    fn test_self_echo_and_duplicates_are_dropped() {
        let me = UserId::new();
        let other = UserId::new();
        let now = Utc::now();
        let mut thread = Thread::new();
        thread.replace_all(vec![message(MessageId::Server(1), other, "hi", now)]);

        let echo = message(MessageId::Server(2), me, "mine", now);
        assert_eq!(thread.apply_remote(echo, &me), Applied::SelfEcho);

        let dup = message(MessageId::Server(1), other, "hi", now);
        assert_eq!(thread.apply_remote(dup, &me), Applied::Duplicate);

        let new = message(MessageId::Server(3), other, "again", now);
        assert_eq!(thread.apply_remote(new, &me), Applied::Appended);
        assert_eq!(thread.len(), 2);
    }

    #[test]
    fn test_late_push_lands_in_time_order() {
        let me = UserId::new();
        let other = UserId::new();
        let t0 = Utc::now();
        let mut thread = Thread::new();
        thread.replace_all(vec![
            message(MessageId::Server(3), other, "third", t0 + Duration::seconds(2)),
            message(MessageId::Server(1), other, "first", t0),
        ]);
        assert_eq!(thread.messages()[0].content, "first");

        let late = message(MessageId::Server(2), other, "second", t0 + Duration::seconds(1));
        thread.apply_remote(late, &me);
        let bodies: Vec<_> = thread.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(bodies, ["first", "second", "third"]);
    }

    #[test]
    fn test_refetch_keeps_pending_send() {
        let ids = LocalIdGenerator::new();
        let me = UserId::new();
        let now = Utc::now();
        let mut thread = Thread::new();
        let local = MessageId::Local(ids.next_id());
        thread.begin_send(message(local, me, "pending", now));

        thread.replace_all(vec![message(MessageId::Server(1), UserId::new(), "hi", now)]);
        assert_eq!(thread.len(), 2);
        assert_eq!(thread.messages()[1].message_id, local);
    }
}

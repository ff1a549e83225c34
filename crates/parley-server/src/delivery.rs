//! Message lifecycle: `sent -> delivered -> read`, plus the two delete
//! overlays.
//!
//! Every function here is pure. It looks at the current record and answers
//! with the patch that moves it forward, or [`Transition::NoOp`] when the
//! request is redundant. Persisting the patch is the caller's job.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use parley_shared::constants::DELETED_PLACEHOLDER;
use parley_shared::{DeliveryStatus, Target, UserId};
use parley_store::{Message, MessagePatch};

use crate::error::ServerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Apply(MessagePatch),
    NoOp,
}

impl Transition {
    fn from_patch(patch: MessagePatch) -> Self {
        if patch.is_empty() {
            Transition::NoOp
        } else {
            Transition::Apply(patch)
        }
    }
}

/// `sent -> delivered`. Fires only from exactly `sent`.
pub fn deliver(message: &Message, now: DateTime<Utc>) -> Transition {
    if message.status != DeliveryStatus::Sent {
        return Transition::NoOp;
    }
    Transition::Apply(MessagePatch {
        status: Some(DeliveryStatus::Delivered),
        delivered_at: Some(now),
        ..Default::default()
    })
}

/// `sent | delivered -> read` for the shared status, plus `reader`'s own read
/// receipt. `delivered_at` is left untouched, so skipping `delivered` leaves
/// it unset.
pub fn read(message: &Message, reader: UserId, now: DateTime<Utc>) -> Transition {
    let mut patch = MessagePatch::default();
    if message.status != DeliveryStatus::Read {
        patch.status = Some(DeliveryStatus::Read);
        patch.read_at = Some(now);
    }
    if !message.read_by.contains(&reader) {
        patch.read_by = Some(reader);
    }
    Transition::from_patch(patch)
}

/// Hide the message from `user`'s view only.
pub fn delete_for_me(message: &Message, user: UserId) -> Transition {
    if message.deleted_by.contains(&user) {
        return Transition::NoOp;
    }
    Transition::Apply(MessagePatch {
        deleted_by: Some(user),
        ..Default::default()
    })
}

/// Destroy the content for everyone. Sender only; irreversible.
pub fn delete_for_all(message: &Message, caller: UserId) -> Result<Transition, ServerError> {
    if caller != message.sender_id {
        return Err(ServerError::PermissionDenied(
            "only the sender can delete a message for everyone".into(),
        ));
    }
    if message.deleted_for_all {
        return Ok(Transition::NoOp);
    }
    Ok(Transition::Apply(MessagePatch {
        text: Some(DELETED_PLACEHOLDER.to_string()),
        clear_image: true,
        deleted_for_all: true,
        ..Default::default()
    }))
}

/// The users a message is addressed to. For groups `members` is the
/// membership snapshot; the sender is never its own recipient.
pub fn recipients(message: &Message, members: Option<&BTreeSet<UserId>>) -> Vec<UserId> {
    match message.target {
        Target::Direct(receiver) => vec![receiver],
        Target::Group(_) => members
            .into_iter()
            .flatten()
            .copied()
            .filter(|member| *member != message.sender_id)
            .collect(),
    }
}

/// Only an addressed recipient may acknowledge or read a message.
pub fn ensure_recipient(
    message: &Message,
    user: UserId,
    members: Option<&BTreeSet<UserId>>,
) -> Result<(), ServerError> {
    if recipients(message, members).contains(&user) {
        Ok(())
    } else {
        Err(ServerError::PermissionDenied(format!(
            "user {} is not a recipient of message {}",
            user, message.id
        )))
    }
}

/// Sender or recipient.
pub fn ensure_participant(
    message: &Message,
    user: UserId,
    members: Option<&BTreeSet<UserId>>,
) -> Result<(), ServerError> {
    if user == message.sender_id {
        return Ok(());
    }
    ensure_recipient(message, user, members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::{GroupId, MessageId};

    fn message(sender: UserId, target: Target) -> Message {
        Message {
            id: MessageId::new(),
            sender_id: sender,
            target,
            text: Some("hi".into()),
            image: Some("blob://img".into()),
            reply_to: None,
            status: DeliveryStatus::Sent,
            delivered_at: None,
            read_at: None,
            deleted_by: BTreeSet::new(),
            read_by: BTreeSet::new(),
            deleted_for_all: false,
            created_at: Utc::now(),
        }
    }

    fn step(message: &mut Message, f: impl FnOnce(&Message) -> Transition) {
        if let Transition::Apply(patch) = f(message) {
            patch.apply(message);
        }
    }

    #[test]
    fn deliver_is_idempotent() {
        let (a, b) = (UserId::new(), UserId::new());
        let mut msg = message(a, Target::Direct(b));

        step(&mut msg, |m| deliver(m, Utc::now()));
        let once = msg.clone();
        assert_eq!(deliver(&msg, Utc::now()), Transition::NoOp);
        step(&mut msg, |m| deliver(m, Utc::now()));

        assert_eq!(msg, once);
        assert_eq!(msg.status, DeliveryStatus::Delivered);
        assert!(msg.delivered_at.is_some());
    }

    #[test]
    fn read_may_skip_delivered() {
        let (a, b) = (UserId::new(), UserId::new());
        let mut msg = message(a, Target::Direct(b));

        step(&mut msg, |m| read(m, b, Utc::now()));

        assert_eq!(msg.status, DeliveryStatus::Read);
        assert!(msg.read_at.is_some());
        assert!(msg.delivered_at.is_none());

        // Delivered can no longer fire.
        assert_eq!(deliver(&msg, Utc::now()), Transition::NoOp);
    }

    #[test]
    fn reading_twice_keeps_read_at() {
        let (a, b) = (UserId::new(), UserId::new());
        let mut msg = message(a, Target::Direct(b));
        step(&mut msg, |m| read(m, b, Utc::now()));
        let first = msg.read_at;

        assert_eq!(read(&msg, b, Utc::now()), Transition::NoOp);
        assert_eq!(msg.read_at, first);
    }

    #[test]
    fn second_group_reader_only_adds_a_receipt() {
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());
        let mut msg = message(a, Target::Group(GroupId::new()));
        step(&mut msg, |m| read(m, b, Utc::now()));

        match read(&msg, c, Utc::now()) {
            Transition::Apply(patch) => {
                assert_eq!(patch.status, None);
                assert_eq!(patch.read_by, Some(c));
            }
            Transition::NoOp => panic!("expected a receipt for the second reader"),
        }
    }

    #[test]
    fn delete_for_all_is_sender_only_and_final() {
        let (a, b) = (UserId::new(), UserId::new());
        let mut msg = message(a, Target::Direct(b));

        assert!(matches!(
            delete_for_all(&msg, b),
            Err(ServerError::PermissionDenied(_))
        ));

        step(&mut msg, |m| delete_for_all(m, a).unwrap());
        assert!(msg.deleted_for_all);
        assert_eq!(msg.text.as_deref(), Some(DELETED_PLACEHOLDER));
        assert!(msg.image.is_none());

        step(&mut msg, |m| delete_for_me(m, b));
        assert!(msg.deleted_for_all);
        assert_eq!(msg.text.as_deref(), Some(DELETED_PLACEHOLDER));
        assert_eq!(delete_for_all(&msg, a).unwrap(), Transition::NoOp);
    }

    #[test]
    fn delete_for_me_is_per_user() {
        let (a, b) = (UserId::new(), UserId::new());
        let mut msg = message(a, Target::Direct(b));

        step(&mut msg, |m| delete_for_me(m, a));
        assert!(!msg.is_visible_to(a));
        assert!(msg.is_visible_to(b));
        assert_eq!(msg.text.as_deref(), Some("hi"));
        assert_eq!(delete_for_me(&msg, a), Transition::NoOp);
    }

    #[test]
    fn group_recipients_exclude_sender() {
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());
        let msg = message(a, Target::Group(GroupId::new()));
        let members: BTreeSet<UserId> = [a, b, c].into_iter().collect();

        let mut got = recipients(&msg, Some(&members));
        got.sort();
        let mut want = vec![b, c];
        want.sort();
        assert_eq!(got, want);

        assert!(ensure_recipient(&msg, a, Some(&members)).is_err());
        assert!(ensure_participant(&msg, a, Some(&members)).is_ok());
        assert!(ensure_recipient(&msg, UserId::new(), Some(&members)).is_err());
    }
}

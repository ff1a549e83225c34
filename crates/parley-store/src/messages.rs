use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use rusqlite::params;
use rusqlite::types::Type;

use parley_shared::{Conversation, DeliveryStatus, GroupId, MessageId, Target, UserId};

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{Message, MessagePatch, NewMessage};
use crate::rows::{parse, parse_opt, parse_ts, parse_ts_opt, ts};

const MESSAGE_COLUMNS: &str = "m.id, m.sender_id, m.receiver_id, m.group_id, m.text, m.image,
     m.reply_to, m.status, m.delivered_at, m.read_at, m.deleted_for_all, m.created_at";

/// Neither read nor hidden by the user bound to `?1`.
const UNREAD_BY_1: &str = "NOT EXISTS (SELECT 1 FROM message_reads r
                WHERE r.message_id = m.id AND r.user_id = ?1)
     AND NOT EXISTS (SELECT 1 FROM message_deletions d
                WHERE d.message_id = m.id AND d.user_id = ?1)";

impl Database {
    pub fn insert_message(&self, new: NewMessage) -> Result<Message> {
        let message = Message {
            id: MessageId::new(),
            sender_id: new.sender_id,
            target: new.target,
            text: new.text,
            image: new.image,
            reply_to: new.reply_to,
            status: DeliveryStatus::Sent,
            delivered_at: None,
            read_at: None,
            deleted_by: BTreeSet::new(),
            read_by: BTreeSet::new(),
            deleted_for_all: false,
            created_at: Utc::now(),
        };

        let (receiver_id, group_id) = match message.target {
            Target::Direct(receiver) => (Some(receiver.to_string()), None),
            Target::Group(group) => (None, Some(group.to_string())),
        };

        self.conn().execute(
            "INSERT INTO messages (id, sender_id, receiver_id, group_id, text, image, reply_to,
                                   status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.id.to_string(),
                message.sender_id.to_string(),
                receiver_id,
                group_id,
                message.text,
                message.image,
                message.reply_to.map(|id| id.to_string()),
                message.status.as_str(),
                ts(&message.created_at),
            ],
        )?;
        Ok(message)
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        let mut message = self
            .conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(not_found(format!("message {id}")))?;

        self.load_receipts(&mut message)?;
        Ok(message)
    }

    /// Apply `patch` to one message as a single read-modify-write and return
    /// the stored result.
    pub fn apply_message_patch(&self, id: MessageId, patch: &MessagePatch) -> Result<Message> {
        let tx = self.conn().unchecked_transaction()?;

        let mut message = self.get_message(id)?;
        patch.apply(&mut message);

        tx.execute(
            "UPDATE messages
             SET status = ?2, delivered_at = ?3, read_at = ?4, text = ?5, image = ?6,
                 deleted_for_all = ?7
             WHERE id = ?1",
            params![
                id.to_string(),
                message.status.as_str(),
                message.delivered_at.as_ref().map(ts),
                message.read_at.as_ref().map(ts),
                message.text,
                message.image,
                message.deleted_for_all,
            ],
        )?;
        if let Some(user) = patch.read_by {
            tx.execute(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id) VALUES (?1, ?2)",
                params![id.to_string(), user.to_string()],
            )?;
        }
        if let Some(user) = patch.deleted_by {
            tx.execute(
                "INSERT OR IGNORE INTO message_deletions (message_id, user_id) VALUES (?1, ?2)",
                params![id.to_string(), user.to_string()],
            )?;
        }
        tx.commit()?;

        Ok(message)
    }

    /// Messages of one conversation in creation order, minus the ones
    /// `viewer` deleted for themselves.
    pub fn conversation_history(
        &self,
        viewer: UserId,
        conversation: Conversation,
    ) -> Result<Vec<Message>> {
        let (filter, other) = match conversation {
            Conversation::Direct(peer) => (
                "((m.sender_id = ?1 AND m.receiver_id = ?2)
                   OR (m.sender_id = ?2 AND m.receiver_id = ?1))",
                peer.to_string(),
            ),
            Conversation::Group(group) => ("m.group_id = ?2", group.to_string()),
        };

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m
             WHERE {filter}
               AND NOT EXISTS (SELECT 1 FROM message_deletions d
                               WHERE d.message_id = m.id AND d.user_id = ?1)
             ORDER BY m.rowid ASC"
        ))?;
        let rows = stmt.query_map(params![viewer.to_string(), other], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            let mut message = row?;
            self.load_receipts(&mut message)?;
            messages.push(message);
        }
        Ok(messages)
    }

    /// Ids of messages in `conversation` that `recipient` has neither read
    /// nor hidden, oldest first. Group messages sent before the recipient
    /// joined are left out.
    pub fn unread_message_ids(
        &self,
        recipient: UserId,
        conversation: Conversation,
    ) -> Result<Vec<MessageId>> {
        let (filter, other) = match conversation {
            Conversation::Direct(peer) => {
                ("m.sender_id = ?2 AND m.receiver_id = ?1", peer.to_string())
            }
            Conversation::Group(group) => (
                "m.group_id = ?2 AND m.sender_id <> ?1
                 AND m.created_at >= (SELECT gm.joined_at FROM group_members gm
                                      WHERE gm.group_id = m.group_id AND gm.user_id = ?1)",
                group.to_string(),
            ),
        };

        let mut stmt = self.conn().prepare(&format!(
            "SELECT m.id FROM messages m
             WHERE {filter} AND {UNREAD_BY_1}
             ORDER BY m.rowid ASC"
        ))?;
        let rows = stmt.query_map(params![recipient.to_string(), other], |row| {
            let id: String = row.get(0)?;
            parse::<MessageId>(0, &id)
        })?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Unread message count per conversation for `recipient`.
    ///
    /// Group messages only count for groups the recipient is currently a
    /// member of, and only from the moment they joined.
    pub fn unread_counts(&self, recipient: UserId) -> Result<HashMap<Conversation, u32>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT 'direct', m.sender_id, COUNT(*) FROM messages m
             WHERE m.receiver_id = ?1 AND {UNREAD_BY_1}
             GROUP BY m.sender_id
             UNION ALL
             SELECT 'group', m.group_id, COUNT(*) FROM messages m
             JOIN group_members gm ON gm.group_id = m.group_id AND gm.user_id = ?1
             WHERE m.sender_id <> ?1 AND m.created_at >= gm.joined_at AND {UNREAD_BY_1}
             GROUP BY m.group_id"
        ))?;
        let rows = stmt.query_map(params![recipient.to_string()], |row| {
            let kind: String = row.get(0)?;
            let id: String = row.get(1)?;
            let count: u32 = row.get(2)?;
            let conversation = if kind == "direct" {
                Conversation::Direct(parse::<UserId>(1, &id)?)
            } else {
                Conversation::Group(parse::<GroupId>(1, &id)?)
            };
            Ok((conversation, count))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (conversation, count) = row?;
            counts.insert(conversation, count);
        }
        Ok(counts)
    }

    fn load_receipts(&self, message: &mut Message) -> Result<()> {
        message.read_by = self.user_set(
            "SELECT user_id FROM message_reads WHERE message_id = ?1",
            message.id,
        )?;
        message.deleted_by = self.user_set(
            "SELECT user_id FROM message_deletions WHERE message_id = ?1",
            message.id,
        )?;
        Ok(())
    }

    fn user_set(&self, sql: &str, id: MessageId) -> Result<BTreeSet<UserId>> {
        let mut stmt = self.conn().prepare_cached(sql)?;
        let rows = stmt.query_map(params![id.to_string()], |row| {
            let user: String = row.get(0)?;
            parse::<UserId>(0, &user)
        })?;

        let mut users = BTreeSet::new();
        for row in rows {
            users.insert(row?);
        }
        Ok(users)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: String = row.get(0)?;
    let sender: String = row.get(1)?;
    let receiver: Option<String> = row.get(2)?;
    let group: Option<String> = row.get(3)?;
    let reply_to: Option<String> = row.get(6)?;
    let status: String = row.get(7)?;
    let delivered_at: Option<String> = row.get(8)?;
    let read_at: Option<String> = row.get(9)?;
    let created_at: String = row.get(11)?;

    let target = match (
        parse_opt::<UserId>(2, receiver)?,
        parse_opt::<GroupId>(3, group)?,
    ) {
        (Some(receiver), None) => Target::Direct(receiver),
        (None, Some(group)) => Target::Group(group),
        _ => {
            return Err(rusqlite::Error::InvalidColumnType(
                2,
                "receiver_id".to_string(),
                Type::Null,
            ))
        }
    };
    let status = DeliveryStatus::from_db(&status).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(7, "status".to_string(), Type::Text)
    })?;

    Ok(Message {
        id: parse(0, &id)?,
        sender_id: parse(1, &sender)?,
        target,
        text: row.get(4)?,
        image: row.get(5)?,
        reply_to: parse_opt(6, reply_to)?,
        status,
        delivered_at: parse_ts_opt(8, delivered_at)?,
        read_at: parse_ts_opt(9, read_at)?,
        deleted_by: BTreeSet::new(),
        read_by: BTreeSet::new(),
        deleted_for_all: row.get(10)?,
        created_at: parse_ts(11, &created_at)?,
    })
}

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use parley_shared::{GroupId, UserId};

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{Group, NewGroup};
use crate::rows::{parse, parse_ts, ts};

impl Database {
    /// Insert a group and its member list in one transaction. The admin is
    /// always stored as a member.
    pub fn insert_group(&self, new: NewGroup) -> Result<Group> {
        let mut members = new.members;
        members.insert(new.admin);

        let group = Group {
            id: GroupId::new(),
            name: new.name,
            description: new.description,
            admin: new.admin,
            members,
            avatar: new.avatar,
            created_at: Utc::now(),
        };

        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO groups (id, name, description, admin_id, avatar, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                group.id.to_string(),
                group.name,
                group.description,
                group.admin.to_string(),
                group.avatar,
                ts(&group.created_at),
            ],
        )?;
        for member in &group.members {
            tx.execute(
                "INSERT INTO group_members (group_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                params![group.id.to_string(), member.to_string(), ts(&group.created_at)],
            )?;
        }
        tx.commit()?;

        Ok(group)
    }

    pub fn get_group(&self, id: GroupId) -> Result<Group> {
        let mut group = self
            .conn()
            .query_row(
                "SELECT id, name, description, admin_id, avatar, created_at
                 FROM groups WHERE id = ?1",
                params![id.to_string()],
                row_to_group,
            )
            .map_err(not_found(format!("group {id}")))?;

        group.members = self.get_group_members(id)?;
        Ok(group)
    }

    pub fn get_group_members(&self, id: GroupId) -> Result<BTreeSet<UserId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT user_id FROM group_members WHERE group_id = ?1")?;
        let rows = stmt.query_map(params![id.to_string()], |row| {
            let user: String = row.get(0)?;
            parse::<UserId>(0, &user)
        })?;

        let mut members = BTreeSet::new();
        for row in rows {
            members.insert(row?);
        }
        Ok(members)
    }

    /// Returns `false` if the user already was a member; their original
    /// join time is kept.
    pub fn add_group_member(&self, group: GroupId, user: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO group_members (group_id, user_id, joined_at)
             VALUES (?1, ?2, ?3)",
            params![group.to_string(), user.to_string(), ts(&Utc::now())],
        )?;
        Ok(affected > 0)
    }

    /// When `user` joined `group`, or `None` if they are not a member.
    pub fn member_since(&self, group: GroupId, user: UserId) -> Result<Option<DateTime<Utc>>> {
        let joined: Option<String> = self
            .conn()
            .query_row(
                "SELECT joined_at FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                params![group.to_string(), user.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(joined.map(|t| parse_ts(0, &t)).transpose()?)
    }

    /// Returns `false` if the user was not a member.
    pub fn remove_group_member(&self, group: GroupId, user: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
            params![group.to_string(), user.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Every group `user` belongs to, newest first.
    pub fn groups_for_user(&self, user: UserId) -> Result<Vec<Group>> {
        let mut stmt = self.conn().prepare(
            "SELECT g.id, g.name, g.description, g.admin_id, g.avatar, g.created_at
             FROM groups g
             JOIN group_members gm ON gm.group_id = g.id
             WHERE gm.user_id = ?1
             ORDER BY g.created_at DESC",
        )?;
        let rows = stmt.query_map(params![user.to_string()], row_to_group)?;

        let mut groups = Vec::new();
        for row in rows {
            let mut group = row?;
            group.members = self.get_group_members(group.id)?;
            groups.push(group);
        }
        Ok(groups)
    }
}

/// Decode a `groups` row. Members are loaded separately.
fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    let id: String = row.get(0)?;
    let admin: String = row.get(3)?;
    let created_at: String = row.get(5)?;

    Ok(Group {
        id: parse(0, &id)?,
        name: row.get(1)?,
        description: row.get(2)?,
        admin: parse(3, &admin)?,
        members: BTreeSet::new(),
        avatar: row.get(4)?,
        created_at: parse_ts(5, &created_at)?,
    })
}

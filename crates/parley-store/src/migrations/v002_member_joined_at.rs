//! v002 -- Record when each member joined a group.
//!
//! Unseen counts only cover group messages sent after the member joined.
//! Rows that predate this column get the epoch, which keeps their old
//! behaviour of counting every group message.

use rusqlite::Connection;

const UP_SQL: &str = r#"
ALTER TABLE group_members
    ADD COLUMN joined_at TEXT NOT NULL DEFAULT '1970-01-01T00:00:00.000000000Z';
"#;

/// Apply the v002 migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

use rusqlite::{params, Connection, Row};

use super::{get_parsed, get_time, to_sql_time, DatabaseError};
use crate::models::{Action, ObjectType};

fn from_row(row: &Row<'_>) -> Result<Action, rusqlite::Error> {
    Ok(Action {
        id: row.get("id")?,
        created_at: get_time(row, "created_at")?,
        object_type: get_parsed(row, "object_type")?,
        object_id: row.get("object_id")?,
        action_type: get_parsed(row, "action_type")?,
        user_id: row.get("user_id")?,
        message: row.get("message")?,
    })
}

pub fn insert(conn: &Connection, action: &mut Action) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO actions (created_at, object_type, object_id, action_type, user_id, message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            to_sql_time(action.created_at),
            action.object_type.as_str(),
            action.object_id,
            action.action_type.as_str(),
            action.user_id,
            action.message,
        ],
    )?;
    action.id = conn.last_insert_rowid();
    Ok(action.id)
}

/// Actions for one issue or batch in chronological order.
pub fn find_for_object(
    conn: &Connection,
    object_type: ObjectType,
    object_id: i64,
) -> Result<Vec<Action>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM actions WHERE object_type = ?1 AND object_id = ?2 ORDER BY created_at, id",
    )?;
    let rows = stmt
        .query_map(params![object_type.as_str(), object_id], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

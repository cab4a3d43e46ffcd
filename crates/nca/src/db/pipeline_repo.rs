use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{get_opt_time, get_time, opt_sql_time, to_sql_time, DatabaseError};
use crate::models::{ObjectType, Pipeline};

fn from_row(row: &Row<'_>) -> Result<Pipeline, rusqlite::Error> {
    let raw_type: String = row.get("object_type")?;
    let object_type = if raw_type.is_empty() {
        None
    } else {
        Some(raw_type.parse::<ObjectType>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                e.to_string().into(),
            )
        })?)
    };

    Ok(Pipeline {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        object_type,
        object_id: row.get("object_id")?,
        created_at: get_time(row, "created_at")?,
        started_at: get_opt_time(row, "started_at")?,
        completed_at: get_opt_time(row, "completed_at")?,
    })
}

pub fn insert(conn: &Connection, pipeline: &mut Pipeline) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO pipelines (name, description, object_type, object_id, created_at,
         started_at, completed_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            pipeline.name,
            pipeline.description,
            pipeline.object_type.map(|t| t.as_str()).unwrap_or(""),
            pipeline.object_id,
            to_sql_time(pipeline.created_at),
            opt_sql_time(pipeline.started_at),
            opt_sql_time(pipeline.completed_at),
        ],
    )?;
    pipeline.id = conn.last_insert_rowid();
    Ok(pipeline.id)
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Pipeline>, DatabaseError> {
    let pipeline = conn
        .query_row("SELECT * FROM pipelines WHERE id = ?1", params![id], from_row)
        .optional()?;
    Ok(pipeline)
}

/// Pipelines that have not finished, oldest first.
pub fn find_incomplete(conn: &Connection) -> Result<Vec<Pipeline>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM pipelines WHERE completed_at IS NULL ORDER BY created_at, id")?;
    let rows = stmt
        .query_map([], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_insert_and_find() {
        let db = Database::open_in_memory().unwrap();
        let mut p = Pipeline::new(
            "make_batch",
            "make_batch: batch batch_oru_20240101A1JadeYetiEatingKelp_ver01".into(),
            Some(ObjectType::Batch),
            4,
        );
        let mut general = Pipeline::new("sync", "sync: general".into(), None, 0);
        db.with_conn(|c| {
            insert(c, &mut p)?;
            insert(c, &mut general)
        })
        .unwrap();

        let found = db.with_conn(|c| find_by_id(c, p.id)).unwrap().unwrap();
        assert_eq!(found.name, "make_batch");
        assert_eq!(found.object_type, Some(ObjectType::Batch));
        assert_eq!(found.object_id, 4);

        let found = db.with_conn(|c| find_by_id(c, general.id)).unwrap().unwrap();
        assert_eq!(found.object_type, None);

        assert_eq!(db.with_conn(find_incomplete).unwrap().len(), 2);
    }
}

//! Titles, MARC org codes, and users.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;
use crate::models::{Moc, Title, User};

fn title_from_row(row: &Row<'_>) -> Result<Title, rusqlite::Error> {
    Ok(Title {
        id: row.get("id")?,
        lccn: row.get("lccn")?,
        name: row.get("name")?,
        place_of_publication: row.get("place_of_publication")?,
        marc_org_code: row.get("marc_org_code")?,
        lang_code3: row.get("lang_code3")?,
        embargo_period: row.get("embargo_period")?,
        valid_lccn: row.get("valid_lccn")?,
        sftp_user: row.get("sftp_user")?,
    })
}

fn user_from_row(row: &Row<'_>) -> Result<User, rusqlite::Error> {
    let roles: String = row.get("roles")?;
    Ok(User {
        id: row.get("id")?,
        login: row.get("login")?,
        roles: User::parse_roles(&roles),
        deactivated: row.get("deactivated")?,
    })
}

pub fn save_title(conn: &Connection, title: &mut Title) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO titles (id, lccn, name, place_of_publication, marc_org_code, lang_code3,
         embargo_period, valid_lccn, sftp_user)
         VALUES (NULLIF(?1, 0), ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET lccn=excluded.lccn, name=excluded.name,
         place_of_publication=excluded.place_of_publication, marc_org_code=excluded.marc_org_code,
         lang_code3=excluded.lang_code3, embargo_period=excluded.embargo_period,
         valid_lccn=excluded.valid_lccn, sftp_user=excluded.sftp_user",
        params![
            title.id,
            title.lccn,
            title.name,
            title.place_of_publication,
            title.marc_org_code,
            title.lang_code3,
            title.embargo_period,
            title.valid_lccn,
            title.sftp_user,
        ],
    )?;
    if title.id == 0 {
        title.id = conn.last_insert_rowid();
    }
    Ok(())
}

pub fn find_title_by_lccn(conn: &Connection, lccn: &str) -> Result<Option<Title>, DatabaseError> {
    let title = conn
        .query_row(
            "SELECT * FROM titles WHERE lccn = ?1",
            params![lccn],
            title_from_row,
        )
        .optional()?;
    Ok(title)
}

pub fn all_titles(conn: &Connection) -> Result<Vec<Title>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM titles ORDER BY lccn")?;
    let rows = stmt
        .query_map([], title_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn save_moc(conn: &Connection, moc: &mut Moc) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO mocs (code, name) VALUES (?1, ?2)
         ON CONFLICT(code) DO UPDATE SET name = excluded.name",
        params![moc.code, moc.name],
    )?;
    moc.id = conn.query_row(
        "SELECT id FROM mocs WHERE code = ?1",
        params![moc.code],
        |r| r.get(0),
    )?;
    Ok(())
}

pub fn find_moc(conn: &Connection, code: &str) -> Result<Option<Moc>, DatabaseError> {
    let moc = conn
        .query_row(
            "SELECT id, code, name FROM mocs WHERE code = ?1",
            params![code],
            |row| {
                Ok(Moc {
                    id: row.get(0)?,
                    code: row.get(1)?,
                    name: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(moc)
}

pub fn save_user(conn: &Connection, user: &mut User) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO users (login, roles, deactivated) VALUES (?1, ?2, ?3)
         ON CONFLICT(login) DO UPDATE SET roles = excluded.roles, deactivated = excluded.deactivated",
        params![user.login, user.roles_csv(), user.deactivated],
    )?;
    user.id = conn.query_row(
        "SELECT id FROM users WHERE login = ?1",
        params![user.login],
        |r| r.get(0),
    )?;
    Ok(())
}

pub fn find_user(conn: &Connection, id: i64) -> Result<Option<User>, DatabaseError> {
    let user = conn
        .query_row("SELECT * FROM users WHERE id = ?1", params![id], user_from_row)
        .optional()?;
    Ok(user)
}

/// Login for display in logs and action dumps; unknown ids and the system
/// user get a placeholder.
pub fn user_login(conn: &Connection, id: i64) -> Result<String, DatabaseError> {
    if id <= 0 {
        return Ok("System Process".to_string());
    }
    Ok(find_user(conn, id)?
        .map(|u| u.login)
        .unwrap_or_else(|| format!("user #{}", id)))
}

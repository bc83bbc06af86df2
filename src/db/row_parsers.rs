use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::field::{Field, ListItem};
use crate::models::group::Group;
use crate::models::project::Project;
use crate::models::state::State;
use crate::models::template::Template;
use crate::models::user::DbUser;

pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, AppError> {
    let s = s.trim();

    // RFC3339 first (e.g. 2026-01-19T12:34:56Z)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // SQLite default timestamp: "YYYY-MM-DD HH:MM:SS" (optional fraction)
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    if let Ok(naive_date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let ndt = naive_date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| AppError::internal("invalid datetime: date out of range"))?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(AppError::internal(format!("invalid datetime: {}", s)))
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, AppError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name)
        .map_err(|e| AppError::internal(format!("missing {}: {}", name, e)))
}

fn parse_uuid(s: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(s).map_err(|e| AppError::internal(format!("invalid uuid: {}", e)))
}

pub fn uuid_column(row: &SqliteRow, name: &str) -> Result<Uuid, AppError> {
    let s: String = column(row, name)?;
    parse_uuid(&s)
}

fn opt_uuid_column(row: &SqliteRow, name: &str) -> Result<Option<Uuid>, AppError> {
    let s: Option<String> = column(row, name)?;
    s.as_deref().map(parse_uuid).transpose()
}

fn datetime_column(row: &SqliteRow, name: &str) -> Result<DateTime<Utc>, AppError> {
    let s: String = column(row, name)?;
    parse_datetime(&s)
}

fn opt_datetime_column(row: &SqliteRow, name: &str) -> Result<Option<DateTime<Utc>>, AppError> {
    let s: Option<String> = column(row, name)?;
    match s.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => Ok(Some(parse_datetime(s)?)),
        _ => Ok(None),
    }
}

/// Decodes a dictionary code. Unknown stored codes are a data error, not a
/// client error.
pub fn code_column<T: FromStr>(row: &SqliteRow, name: &str) -> Result<T, AppError> {
    let s: String = column(row, name)?;
    s.parse()
        .map_err(|_| AppError::internal(format!("invalid {} code '{}'", name, s)))
}

pub fn project_from_row(row: &SqliteRow) -> Result<Project, AppError> {
    Ok(Project {
        id: uuid_column(row, "id")?,
        name: column(row, "name")?,
        description: column(row, "description")?,
        is_suspended: column(row, "is_suspended")?,
        created_at: datetime_column(row, "created_at")?,
        updated_at: datetime_column(row, "updated_at")?,
    })
}

pub fn template_from_row(row: &SqliteRow) -> Result<Template, AppError> {
    Ok(Template {
        id: uuid_column(row, "id")?,
        project_id: uuid_column(row, "project_id")?,
        name: column(row, "name")?,
        prefix: column(row, "prefix")?,
        description: column(row, "description")?,
        critical_age: column(row, "critical_age")?,
        frozen_time: column(row, "frozen_time")?,
        is_locked: column(row, "is_locked")?,
        created_at: datetime_column(row, "created_at")?,
        updated_at: datetime_column(row, "updated_at")?,
    })
}

pub fn state_from_row(row: &SqliteRow) -> Result<State, AppError> {
    Ok(State {
        id: uuid_column(row, "id")?,
        template_id: uuid_column(row, "template_id")?,
        name: column(row, "name")?,
        state_type: code_column(row, "type")?,
        responsible: code_column(row, "responsible")?,
        created_at: datetime_column(row, "created_at")?,
        updated_at: datetime_column(row, "updated_at")?,
    })
}

pub fn field_from_row(row: &SqliteRow) -> Result<Field, AppError> {
    let parameters: String = column(row, "parameters")?;
    let parameters = serde_json::from_str(&parameters)
        .map_err(|e| AppError::internal(format!("invalid field parameters: {}", e)))?;

    Ok(Field {
        id: uuid_column(row, "id")?,
        state_id: uuid_column(row, "state_id")?,
        name: column(row, "name")?,
        field_type: code_column(row, "type")?,
        description: column(row, "description")?,
        is_required: column(row, "is_required")?,
        parameters,
        created_at: datetime_column(row, "created_at")?,
        updated_at: datetime_column(row, "updated_at")?,
    })
}

pub fn list_item_from_row(row: &SqliteRow) -> Result<ListItem, AppError> {
    Ok(ListItem {
        id: uuid_column(row, "id")?,
        field_id: uuid_column(row, "field_id")?,
        value: column(row, "value")?,
        text: column(row, "text")?,
    })
}

pub fn group_from_row(row: &SqliteRow) -> Result<Group, AppError> {
    Ok(Group {
        id: uuid_column(row, "id")?,
        project_id: opt_uuid_column(row, "project_id")?,
        name: column(row, "name")?,
        description: column(row, "description")?,
        created_at: datetime_column(row, "created_at")?,
        updated_at: datetime_column(row, "updated_at")?,
    })
}

pub fn db_user_from_row(row: &SqliteRow) -> Result<DbUser, AppError> {
    Ok(DbUser {
        id: uuid_column(row, "id")?,
        email: column(row, "email")?,
        fullname: column(row, "fullname")?,
        password_hash: column(row, "password_hash")?,
        is_admin: column(row, "is_admin")?,
        is_disabled: column(row, "is_disabled")?,
        locale: column(row, "locale")?,
        theme: column(row, "theme")?,
        timezone: column(row, "timezone")?,
        auth_failures: column(row, "auth_failures")?,
        locked_until: opt_datetime_column(row, "locked_until")?,
        created_at: datetime_column(row, "created_at")?,
        updated_at: datetime_column(row, "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stored_timestamp_formats() {
        let rfc = parse_datetime("2026-03-01T10:00:00+00:00").unwrap();
        let sqlite = parse_datetime("2026-03-01 10:00:00").unwrap();
        assert_eq!(rfc, sqlite);
        assert!(parse_datetime("2026-03-01").is_ok());
        assert!(matches!(parse_datetime("yesterday"), Err(AppError::Internal(_))));
    }
}

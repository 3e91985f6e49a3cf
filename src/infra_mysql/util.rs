use crate::domain_model::{UserId, deadline_after};
use crate::domain_port::StoreError;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::mysql::MySqlDatabaseError;
use uuid::Uuid;

pub fn is_dup_key(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db) = err {
        if let Some(mysql_err) = db.try_downcast_ref::<MySqlDatabaseError>() {
            return mysql_err.number() == 1062; // ER_DUP_ENTRY
        }
    }

    false
}

pub fn store_err(err: sqlx::Error) -> StoreError {
    if is_dup_key(&err) {
        return StoreError::Duplicate;
    }
    StoreError::Unavailable(err.to_string())
}

/// Last instant a DATETIME column holds.
pub fn datetime_ceiling() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `now + remaining`, clamped to what a DATETIME column can store.
pub fn deadline_for_column(now: DateTime<Utc>, remaining: std::time::Duration) -> DateTime<Utc> {
    let ceiling = datetime_ceiling();
    deadline_after(now, remaining)
        .filter(|at| *at < ceiling)
        .unwrap_or(ceiling)
}

#[inline]
pub fn uid_as_bytes(id: &UserId) -> &[u8] {
    id.0.as_bytes()
}

#[inline]
pub fn uid_from_bytes(id: &[u8]) -> Result<UserId, StoreError> {
    Ok(UserId(uuid_from_bytes(id)?))
}

#[inline]
pub fn uuid_from_bytes(id: &[u8]) -> Result<Uuid, StoreError> {
    Uuid::from_slice(id).map_err(|e| StoreError::Unavailable(format!("corrupt uuid column: {e}")))
}

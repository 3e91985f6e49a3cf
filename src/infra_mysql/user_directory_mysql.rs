use super::util::{store_err, uid_as_bytes, uid_from_bytes};
use crate::domain_model::*;
use crate::domain_port::*;
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlPool, Row};

pub struct MySqlUserDirectory {
    pool: MySqlPool,
}

impl MySqlUserDirectory {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlUserDirectory { pool }
    }

    fn row_to_principal(row: MySqlRow) -> Result<Principal, StoreError> {
        let user_id: Vec<u8> = row.try_get("user_id").map_err(store_err)?;
        let email: String = row.try_get("email").map_err(store_err)?;
        let password_hash: String = row.try_get("password_hash").map_err(store_err)?;
        Ok(Principal::new(uid_from_bytes(&user_id)?, email, password_hash))
    }
}

#[async_trait::async_trait]
impl UserDirectory for MySqlUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, StoreError> {
        let row: Option<MySqlRow> = sqlx::query(
            r#"
SELECT user_id, email, password_hash
FROM user_account
WHERE email = ? AND is_active = 1
"#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(Self::row_to_principal).transpose()
    }

    async fn find_by_id(&self, user_id: UserId) -> Result<Option<Principal>, StoreError> {
        let row: Option<MySqlRow> = sqlx::query(
            r#"
SELECT user_id, email, password_hash
FROM user_account
WHERE user_id = ? AND is_active = 1
"#,
        )
        .bind(uid_as_bytes(&user_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(Self::row_to_principal).transpose()
    }

    async fn update(&self, principal: &Principal) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
UPDATE user_account
SET email = ?, password_hash = ?
WHERE user_id = ?
"#,
        )
        .bind(&principal.email)
        .bind(principal.password_hash())
        .bind(uid_as_bytes(&principal.id))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::future::Future;

pub const USER_STATUS_NORMAL: i16 = 1;
pub const USER_STATUS_BANNED: i16 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub mobile: String,
    pub email: Option<String>,
    pub avatar: Option<String>,
    pub status: i16,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("user not found: {0}")]
    NotFound(i64),
    #[error("user not found: mobile={0}")]
    NotFoundByMobile(String),
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
}

/// The lookup surface the service logic consumes. Only normal-status users
/// are visible through it.
pub trait UserLookup: Send + Sync {
    fn get_by_id(&self, user_id: i64) -> impl Future<Output = Result<User, RepoError>> + Send;
}

#[derive(Clone)]
pub struct PgUserRepo {
    pool: PgPool,
}

impl PgUserRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_mobile(&self, mobile: &str) -> Result<User, RepoError> {
        let row = sqlx::query(
            "SELECT id, username, mobile, email, avatar, status, create_time, update_time \
             FROM \"user\" WHERE mobile = $1 AND status = $2",
        )
        .bind(mobile)
        .bind(USER_STATUS_NORMAL)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepoError::NotFoundByMobile(mobile.to_string()))?;
        Ok(user_from_row(&row)?)
    }

    pub async fn create(&self, user: &User) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO \"user\" (id, username, mobile, email, avatar, status, create_time, update_time) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.mobile)
        .bind(user.email.as_deref())
        .bind(user.avatar.as_deref())
        .bind(user.status)
        .bind(user.create_time)
        .bind(user.update_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update(&self, user: &User) -> Result<(), RepoError> {
        let result = sqlx::query(
            "UPDATE \"user\" SET username = $1, mobile = $2, email = $3, avatar = $4, \
             status = $5, update_time = $6 WHERE id = $7",
        )
        .bind(&user.username)
        .bind(&user.mobile)
        .bind(user.email.as_deref())
        .bind(user.avatar.as_deref())
        .bind(user.status)
        .bind(Utc::now())
        .bind(user.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(user.id));
        }
        Ok(())
    }
}

impl UserLookup for PgUserRepo {
    async fn get_by_id(&self, user_id: i64) -> Result<User, RepoError> {
        let row = sqlx::query(
            "SELECT id, username, mobile, email, avatar, status, create_time, update_time \
             FROM \"user\" WHERE id = $1 AND status = $2",
        )
        .bind(user_id)
        .bind(USER_STATUS_NORMAL)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepoError::NotFound(user_id))?;
        Ok(user_from_row(&row)?)
    }
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        mobile: row.try_get("mobile")?,
        email: row.try_get("email")?,
        avatar: row.try_get("avatar")?,
        status: row.try_get("status")?,
        create_time: row.try_get("create_time")?,
        update_time: row.try_get("update_time")?,
    })
}

use anyhow::Context;
use axum::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, User, UserUpdate};

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// A unique column already holds the value. Carries the column name.
    #[error("{0} already taken")]
    Conflict(&'static str),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Persistence for user records. Every write touches a single row.
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create(&self, new: NewUser) -> Result<User, RepoError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepoError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepoError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepoError>;
    async fn update_fields(&self, id: Uuid, update: UserUpdate) -> Result<Option<User>, RepoError>;
    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<bool, RepoError>;
    async fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> Result<bool, RepoError>;
}

const USER_COLUMNS: &str = "id, username, email, fullname, avatar, cover_image, \
                            password_hash, refresh_token, created_at, updated_at";

#[derive(Clone)]
pub struct PgUserRepo {
    db: PgPool,
}

impl PgUserRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn find_one(&self, column: &str, value: &str) -> Result<Option<User>, RepoError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(value)
            .fetch_optional(&self.db)
            .await
            .with_context(|| format!("find user by {column}"))?;
        Ok(user)
    }
}

/// Maps Postgres unique violations on the users table to `RepoError::Conflict`.
fn classify(err: sqlx::Error, what: &'static str) -> RepoError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            match db_err.constraint() {
                Some("uq_users_username") => return RepoError::Conflict("username"),
                Some("uq_users_email") => return RepoError::Conflict("email"),
                _ => {}
            }
        }
    }
    RepoError::Other(anyhow::Error::new(err).context(what))
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn create(&self, new: NewUser) -> Result<User, RepoError> {
        let sql = format!(
            r#"
            INSERT INTO users (id, username, email, fullname, password_hash, avatar, cover_image)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(new.id)
            .bind(&new.username)
            .bind(&new.email)
            .bind(&new.fullname)
            .bind(&new.password_hash)
            .bind(&new.avatar)
            .bind(&new.cover_image)
            .fetch_one(&self.db)
            .await
            .map_err(|e| classify(e, "insert user"))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepoError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("find user by id")?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepoError> {
        self.find_one("email", email).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepoError> {
        self.find_one("username", username).await
    }

    async fn update_fields(&self, id: Uuid, update: UserUpdate) -> Result<Option<User>, RepoError> {
        if update.is_empty() {
            return self.find_by_id(id).await;
        }
        let sql = format!(
            r#"
            UPDATE users
               SET fullname    = COALESCE($2, fullname),
                   email       = COALESCE($3, email),
                   avatar      = COALESCE($4, avatar),
                   cover_image = COALESCE($5, cover_image),
                   updated_at  = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(&update.fullname)
            .bind(&update.email)
            .bind(&update.avatar)
            .bind(&update.cover_image)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| classify(e, "update user"))
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<bool, RepoError> {
        let res = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.db)
        .await
        .context("update password hash")?;
        Ok(res.rows_affected() > 0)
    }

    async fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> Result<bool, RepoError> {
        let res = sqlx::query("UPDATE users SET refresh_token = $2 WHERE id = $1")
            .bind(id)
            .bind(token)
            .execute(&self.db)
            .await
            .context("update refresh token")?;
        Ok(res.rows_affected() > 0)
    }
}

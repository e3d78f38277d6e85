use std::collections::HashMap;
use std::sync::Mutex;

use axum::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo::{RepoError, UserRepo};
use crate::auth::repo_types::{NewUser, User, UserUpdate};

/// In-memory `UserRepo` enforcing the same unique constraints as the users table.
#[derive(Default)]
pub struct MemoryUserRepo {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserRepo {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_where(&self, pred: impl Fn(&User) -> bool) -> Option<User> {
        self.users.lock().unwrap().values().find(|u| pred(u)).cloned()
    }
}

#[async_trait]
impl UserRepo for MemoryUserRepo {
    async fn create(&self, new: NewUser) -> Result<User, RepoError> {
        let mut users = self.users.lock().unwrap();
        if users.values().any(|u| u.username == new.username) {
            return Err(RepoError::Conflict("username"));
        }
        if users.values().any(|u| u.email == new.email) {
            return Err(RepoError::Conflict("email"));
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: new.id,
            username: new.username,
            email: new.email,
            fullname: new.fullname,
            avatar: new.avatar,
            cover_image: new.cover_image,
            password_hash: new.password_hash,
            refresh_token: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepoError> {
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepoError> {
        Ok(self.find_where(|u| u.email == email))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepoError> {
        Ok(self.find_where(|u| u.username == username))
    }

    async fn update_fields(&self, id: Uuid, update: UserUpdate) -> Result<Option<User>, RepoError> {
        let mut users = self.users.lock().unwrap();
        if let Some(email) = &update.email {
            if users.values().any(|u| u.id != id && &u.email == email) {
                return Err(RepoError::Conflict("email"));
            }
        }
        let Some(user) = users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(v) = update.fullname {
            user.fullname = v;
        }
        if let Some(v) = update.email {
            user.email = v;
        }
        if let Some(v) = update.avatar {
            user.avatar = Some(v);
        }
        if let Some(v) = update.cover_image {
            user.cover_image = Some(v);
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<bool, RepoError> {
        let mut users = self.users.lock().unwrap();
        Ok(users
            .get_mut(&id)
            .map(|u| {
                u.password_hash = password_hash.to_string();
                u.updated_at = OffsetDateTime::now_utc();
            })
            .is_some())
    }

    async fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> Result<bool, RepoError> {
        let mut users = self.users.lock().unwrap();
        Ok(users
            .get_mut(&id)
            .map(|u| u.refresh_token = token.map(str::to_string))
            .is_some())
    }
}

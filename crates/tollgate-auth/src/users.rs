//! User lookup and creation used when deciding whether to issue a token.

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::claims::EmbeddedUser;
use crate::error::UserStoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub email: String,
}

impl From<User> for EmbeddedUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
        }
    }
}

/// Login input. Only ever compared, never stored.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewUser")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Persistence capability behind register and login.
#[async_trait]
pub trait UserStore: Send + Sync + std::fmt::Debug {
    /// Return the user whose email and password both match.
    async fn find_by_credentials(
        &self,
        credentials: &Credentials,
    ) -> Result<Option<User>, UserStoreError>;

    async fn create_user(&self, new_user: NewUser) -> Result<User, UserStoreError>;
}

#[derive(Debug, Clone)]
struct StoredUser {
    user: User,
    password_digest: Vec<u8>,
}

fn digest(password: &str) -> Vec<u8> {
    Sha256::digest(password.as_bytes()).to_vec()
}

/// Process-local user store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: RwLock<Vec<StoredUser>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding the demo account `test@example.com` / `password` with id 1.
    pub fn seeded() -> Self {
        let demo = StoredUser {
            user: User {
                id: 1,
                name: "Test User".to_owned(),
                email: "test@example.com".to_owned(),
            },
            password_digest: digest("password"),
        };
        Self {
            users: RwLock::new(vec![demo]),
        }
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_credentials(
        &self,
        credentials: &Credentials,
    ) -> Result<Option<User>, UserStoreError> {
        let candidate = digest(&credentials.password);
        let users = self.users.read().await;
        Ok(users
            .iter()
            .find(|stored| {
                stored.user.email == credentials.email && stored.password_digest == candidate
            })
            .map(|stored| stored.user.clone()))
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User, UserStoreError> {
        let mut users = self.users.write().await;

        if users
            .iter()
            .any(|stored| stored.user.email.eq_ignore_ascii_case(&new_user.email))
        {
            return Err(UserStoreError::EmailTaken(new_user.email));
        }

        let id = users.iter().map(|stored| stored.user.id).max().unwrap_or(0) + 1;
        let user = User {
            id,
            name: new_user.name,
            email: new_user.email,
        };
        users.push(StoredUser {
            user: user.clone(),
            password_digest: digest(&new_user.password),
        });

        tracing::debug!(user_id = id, "User created");
        Ok(user)
    }
}

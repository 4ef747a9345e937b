//! Persistent records of the data model and the payloads used to create or
//! mutate them. Every backend in [`crate::store`] reads and writes these.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A registered account. Accounts are tombstoned through `deleted_at`,
/// never removed, so posts and follow edges keep a valid owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    /// PHC formatted hash, never the plaintext
    pub password_hash: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    /// Image reference used as profile picture
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub display_name: Option<String>,
}

/// Field updates for a user. `None` leaves a field untouched; an empty
/// string clears an optional profile field.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<String>,
    pub password_hash: Option<String>,
}

impl UserChanges {
    pub(crate) fn apply(&self, user: &mut User) {
        if let Some(display_name) = &self.display_name {
            user.display_name = non_empty(display_name);
        }
        if let Some(bio) = &self.bio {
            user.bio = non_empty(bio);
        }
        if let Some(avatar) = &self.avatar {
            user.avatar = non_empty(avatar);
        }
        if let Some(hash) = &self.password_hash {
            user.password_hash = hash.clone();
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// An image post. Only the caption is mutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: Uuid,
    pub owner_id: Uuid,
    /// URL or `/images/<name>` pointer to the uploaded blob
    pub image_ref: String,
    pub caption: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Post {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub owner_id: Uuid,
    pub image_ref: String,
    pub caption: String,
}

/// Directed follow edge: `follower_id` follows `followee_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Follower {
    pub follower_id: Uuid,
    pub followee_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Like {
    pub user_id: Uuid,
    pub post_id: Uuid,
    pub created_at: DateTime<Utc>,
}

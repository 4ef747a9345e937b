//! Persistence handlers.
//!
//! [`DatabaseHandler`] is the capability set the API layer talks to. The
//! concrete backend is chosen at startup from [`DatabaseSettings`] by
//! [`connect`]; callers only ever hold an `Arc<dyn DatabaseHandler>`.
//!
//! All backends share the same error taxonomy: lookups of missing or
//! tombstoned rows fail with [`StoreError::NotFound`], writes that break a
//! uniqueness, foreign-key or self-follow rule fail with
//! [`StoreError::ConstraintViolation`].

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::{DatabaseBackend, DatabaseSettings};
use crate::core::errors::{StoreError, StoreResult};
use crate::core::query_params::Page;
use crate::models::{Follower, Like, NewPost, NewUser, Post, User, UserChanges};

pub mod memory;
pub mod sql;

pub use memory::MemoryStore;
pub use sql::SqlStore;

const DEFAULT_SQLITE_URL: &str = "sqlite://image_share.db?mode=rwc";

#[async_trait]
pub trait DatabaseHandler: Send + Sync {
    // === Users ===
    async fn create_user(&self, new_user: NewUser) -> StoreResult<User>;
    async fn get_user(&self, id: Uuid) -> StoreResult<User>;
    async fn get_user_by_username(&self, username: &str) -> StoreResult<User>;
    async fn get_user_by_email(&self, email: &str) -> StoreResult<User>;
    async fn update_user(&self, id: Uuid, changes: UserChanges) -> StoreResult<User>;
    /// Tombstones the user and every post they own.
    async fn soft_delete_user(&self, id: Uuid) -> StoreResult<()>;

    // === Posts ===
    async fn create_post(&self, new_post: NewPost) -> StoreResult<Post>;
    async fn get_post(&self, id: Uuid) -> StoreResult<Post>;
    async fn update_post_caption(&self, id: Uuid, caption: &str) -> StoreResult<Post>;
    async fn soft_delete_post(&self, id: Uuid) -> StoreResult<()>;
    /// Live posts of one owner, newest first.
    async fn list_user_posts(&self, owner_id: Uuid, page: Page) -> StoreResult<Vec<Post>>;
    /// Live posts of every live account `user_id` follows, newest first.
    async fn feed(&self, user_id: Uuid, page: Page) -> StoreResult<Vec<Post>>;

    // === Followers ===
    async fn follow(&self, follower_id: Uuid, followee_id: Uuid) -> StoreResult<Follower>;
    async fn unfollow(&self, follower_id: Uuid, followee_id: Uuid) -> StoreResult<()>;
    async fn is_following(&self, follower_id: Uuid, followee_id: Uuid) -> StoreResult<bool>;
    /// Live accounts following `user_id`, oldest edge first.
    async fn list_followers(&self, user_id: Uuid) -> StoreResult<Vec<User>>;
    /// Live accounts `user_id` follows, oldest edge first.
    async fn list_following(&self, user_id: Uuid) -> StoreResult<Vec<User>>;

    // === Likes ===
    async fn like_post(&self, user_id: Uuid, post_id: Uuid) -> StoreResult<Like>;
    async fn unlike_post(&self, user_id: Uuid, post_id: Uuid) -> StoreResult<()>;
    async fn count_likes(&self, post_id: Uuid) -> StoreResult<u64>;
}

/// Builds the backend named by `settings.backend`.
pub async fn connect(settings: &DatabaseSettings) -> StoreResult<Arc<dyn DatabaseHandler>> {
    match settings.backend {
        DatabaseBackend::Memory => {
            log::info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        DatabaseBackend::Sqlite => {
            let url = settings.url.as_deref().unwrap_or(DEFAULT_SQLITE_URL);
            if !url.starts_with("sqlite:") {
                return Err(StoreError::Backend(format!(
                    "sqlite backend needs a sqlite: url, got {}",
                    url
                )));
            }
            Ok(Arc::new(SqlStore::connect(url, settings.max_connections).await?))
        }
        DatabaseBackend::Postgres => {
            let url = settings.url.as_deref().ok_or_else(|| {
                StoreError::Backend("database.url is required for the postgres backend".to_string())
            })?;
            Ok(Arc::new(SqlStore::connect(url, settings.max_connections).await?))
        }
    }
}

/// Behaviour every backend must share. Each backend's test module runs
/// these against a fresh instance.
#[cfg(test)]
pub(crate) mod conformance {
    use super::*;

    pub fn new_user(name: &str) -> NewUser {
        NewUser {
            username: name.to_string(),
            email: format!("{}@example.com", name),
            password_hash: format!("$argon2id$v=19$stub${}", name),
            display_name: None,
        }
    }

    pub fn new_post(owner_id: Uuid, caption: &str) -> NewPost {
        NewPost {
            owner_id,
            image_ref: format!("https://img.example.com/{}.png", caption.replace(' ', "-")),
            caption: caption.to_string(),
        }
    }

    pub async fn user_lifecycle(store: &dyn DatabaseHandler) {
        let alice = store.create_user(new_user("alice")).await.unwrap();
        assert!(alice.is_active());

        assert_eq!(store.get_user(alice.id).await.unwrap(), alice);
        assert_eq!(store.get_user_by_username("alice").await.unwrap().id, alice.id);
        assert_eq!(
            store.get_user_by_email("alice@example.com").await.unwrap().id,
            alice.id
        );

        let updated = store
            .update_user(
                alice.id,
                UserChanges {
                    bio: Some("hi".to_string()),
                    display_name: Some("Alice A.".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.bio.as_deref(), Some("hi"));
        assert_eq!(updated.display_name.as_deref(), Some("Alice A."));
        assert!(updated.updated_at.is_some());
        assert_eq!(store.get_user(alice.id).await.unwrap(), updated);

        assert!(matches!(
            store.get_user(Uuid::new_v4()).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.get_user_by_username("nobody").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    pub async fn duplicate_username_is_rejected(store: &dyn DatabaseHandler) {
        store.create_user(new_user("bob")).await.unwrap();

        let mut clash = new_user("bob");
        clash.email = "someone.else@example.com".to_string();
        assert!(matches!(
            store.create_user(clash).await,
            Err(StoreError::ConstraintViolation(_))
        ));

        let mut clash = new_user("bobby");
        clash.email = "bob@example.com".to_string();
        assert!(matches!(
            store.create_user(clash).await,
            Err(StoreError::ConstraintViolation(_))
        ));
    }

    pub async fn follow_edges(store: &dyn DatabaseHandler) {
        let a = store.create_user(new_user("fa")).await.unwrap();
        let b = store.create_user(new_user("fb")).await.unwrap();

        assert!(matches!(
            store.follow(a.id, a.id).await,
            Err(StoreError::ConstraintViolation(_))
        ));

        let edge = store.follow(a.id, b.id).await.unwrap();
        assert_eq!((edge.follower_id, edge.followee_id), (a.id, b.id));
        assert!(matches!(
            store.follow(a.id, b.id).await,
            Err(StoreError::ConstraintViolation(_))
        ));

        assert!(store.is_following(a.id, b.id).await.unwrap());
        assert!(!store.is_following(b.id, a.id).await.unwrap());
        let followers = store.list_followers(b.id).await.unwrap();
        assert_eq!(followers.iter().map(|u| u.id).collect::<Vec<_>>(), vec![a.id]);
        let following = store.list_following(a.id).await.unwrap();
        assert_eq!(following.iter().map(|u| u.id).collect::<Vec<_>>(), vec![b.id]);

        assert!(matches!(
            store.follow(a.id, Uuid::new_v4()).await,
            Err(StoreError::ConstraintViolation(_))
        ));

        store.unfollow(a.id, b.id).await.unwrap();
        assert!(!store.is_following(a.id, b.id).await.unwrap());
        assert!(matches!(
            store.unfollow(a.id, b.id).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    pub async fn post_round_trip(store: &dyn DatabaseHandler) {
        let owner = store.create_user(new_user("poster")).await.unwrap();
        let post = store.create_post(new_post(owner.id, "first light")).await.unwrap();

        let fetched = store.get_post(post.id).await.unwrap();
        assert_eq!(fetched, post);
        assert_eq!(fetched.caption, "first light");
        assert_eq!(fetched.owner_id, owner.id);

        let edited = store.update_post_caption(post.id, "golden hour").await.unwrap();
        assert_eq!(edited.caption, "golden hour");
        assert_eq!(edited.image_ref, post.image_ref);
        assert!(edited.updated_at.is_some());

        store.soft_delete_post(post.id).await.unwrap();
        assert!(matches!(
            store.get_post(post.id).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.soft_delete_post(post.id).await,
            Err(StoreError::NotFound { .. })
        ));

        assert!(matches!(
            store.create_post(new_post(Uuid::new_v4(), "orphan")).await,
            Err(StoreError::ConstraintViolation(_))
        ));
    }

    pub async fn feed_contains_only_followed_posts(store: &dyn DatabaseHandler) {
        let reader = store.create_user(new_user("reader")).await.unwrap();
        let followed = store.create_user(new_user("followed")).await.unwrap();
        let stranger = store.create_user(new_user("stranger")).await.unwrap();
        store.follow(reader.id, followed.id).await.unwrap();

        let own = store.create_post(new_post(reader.id, "own")).await.unwrap();
        let older = store.create_post(new_post(followed.id, "older")).await.unwrap();
        let other = store.create_post(new_post(stranger.id, "other")).await.unwrap();
        let newer = store.create_post(new_post(followed.id, "newer")).await.unwrap();

        let feed = store.feed(reader.id, Page::default()).await.unwrap();
        let ids: Vec<Uuid> = feed.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
        assert!(!ids.contains(&own.id));
        assert!(!ids.contains(&other.id));

        let first_page = store.feed(reader.id, Page::new(1, 1)).await.unwrap();
        assert_eq!(first_page.len(), 1);
        assert_eq!(first_page[0].id, newer.id);

        store.soft_delete_post(newer.id).await.unwrap();
        let feed = store.feed(reader.id, Page::default()).await.unwrap();
        assert_eq!(feed.iter().map(|p| p.id).collect::<Vec<_>>(), vec![older.id]);

        store.unfollow(reader.id, followed.id).await.unwrap();
        assert!(store.feed(reader.id, Page::default()).await.unwrap().is_empty());
    }

    pub async fn soft_deleted_user_cascades(store: &dyn DatabaseHandler) {
        let reader = store.create_user(new_user("cascade_reader")).await.unwrap();
        let gone = store.create_user(new_user("cascade_gone")).await.unwrap();
        store.follow(reader.id, gone.id).await.unwrap();
        let post = store.create_post(new_post(gone.id, "farewell")).await.unwrap();

        store.soft_delete_user(gone.id).await.unwrap();

        assert!(matches!(
            store.get_user(gone.id).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.get_post(post.id).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(store.feed(reader.id, Page::default()).await.unwrap().is_empty());
        assert!(store.list_following(reader.id).await.unwrap().is_empty());

        // the name stays taken
        assert!(matches!(
            store.create_user(new_user("cascade_gone")).await,
            Err(StoreError::ConstraintViolation(_))
        ));
        assert!(matches!(
            store.create_post(new_post(gone.id, "ghost")).await,
            Err(StoreError::ConstraintViolation(_))
        ));
    }

    pub async fn likes(store: &dyn DatabaseHandler) {
        let owner = store.create_user(new_user("liked_owner")).await.unwrap();
        let fan = store.create_user(new_user("liked_fan")).await.unwrap();
        let post = store.create_post(new_post(owner.id, "likeable")).await.unwrap();

        store.like_post(fan.id, post.id).await.unwrap();
        store.like_post(owner.id, post.id).await.unwrap();
        assert!(matches!(
            store.like_post(fan.id, post.id).await,
            Err(StoreError::ConstraintViolation(_))
        ));
        assert_eq!(store.count_likes(post.id).await.unwrap(), 2);

        store.unlike_post(fan.id, post.id).await.unwrap();
        assert_eq!(store.count_likes(post.id).await.unwrap(), 1);
        assert!(matches!(
            store.unlike_post(fan.id, post.id).await,
            Err(StoreError::NotFound { .. })
        ));

        store.soft_delete_post(post.id).await.unwrap();
        assert!(matches!(
            store.like_post(fan.id, post.id).await,
            Err(StoreError::ConstraintViolation(_))
        ));
    }
}

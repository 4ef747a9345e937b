use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use super::DatabaseHandler;
use crate::core::errors::{StoreError, StoreResult};
use crate::core::helpers::now;
use crate::core::query_params::Page;
use crate::models::{Follower, Like, NewPost, NewUser, Post, User, UserChanges};

#[derive(Default)]
struct Tables {
    // Insertion order is kept; it breaks ties between equal timestamps.
    users: Vec<User>,
    posts: Vec<Post>,
    followers: Vec<Follower>,
    likes: Vec<Like>,
}

impl Tables {
    fn user(&self, id: Uuid) -> Option<&User> {
        self.users.iter().find(|u| u.id == id)
    }

    fn active_user(&self, id: Uuid) -> Option<&User> {
        self.user(id).filter(|u| u.is_active())
    }

    fn active_user_mut(&mut self, id: Uuid) -> StoreResult<&mut User> {
        self.users
            .iter_mut()
            .find(|u| u.id == id && u.is_active())
            .ok_or_else(|| StoreError::not_found("User"))
    }

    fn active_post(&self, id: Uuid) -> Option<&Post> {
        self.posts.iter().find(|p| p.id == id && p.is_active())
    }

    fn active_post_mut(&mut self, id: Uuid) -> StoreResult<&mut Post> {
        self.posts
            .iter_mut()
            .find(|p| p.id == id && p.is_active())
            .ok_or_else(|| StoreError::not_found("Post"))
    }

    fn has_edge(&self, follower_id: Uuid, followee_id: Uuid) -> bool {
        self.followers
            .iter()
            .any(|f| f.follower_id == follower_id && f.followee_id == followee_id)
    }

    /// Newest first; equal timestamps keep reverse insertion order.
    fn newest_first(&self, keep: impl Fn(&Post) -> bool) -> Vec<Post> {
        let mut posts: Vec<Post> = self
            .posts
            .iter()
            .rev()
            .filter(|p| p.is_active() && keep(p))
            .cloned()
            .collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        posts
    }
}

/// Process-local backend for tests and throwaway local runs. A single
/// mutex serialises writes the way a database's constraints would; it is
/// never held across an await point.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl DatabaseHandler for MemoryStore {
    async fn create_user(&self, new_user: NewUser) -> StoreResult<User> {
        let mut tables = self.tables()?;

        if tables.users.iter().any(|u| u.username == new_user.username) {
            return Err(StoreError::conflict("Username exists"));
        }
        if tables.users.iter().any(|u| u.email == new_user.email) {
            return Err(StoreError::conflict("Email exists"));
        }

        let user = User {
            id: Uuid::new_v4(),
            username: new_user.username,
            email: new_user.email,
            password_hash: new_user.password_hash,
            display_name: new_user.display_name,
            bio: None,
            avatar: None,
            created_at: now(),
            updated_at: None,
            deleted_at: None,
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<User> {
        self.tables()?
            .active_user(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("User"))
    }

    async fn get_user_by_username(&self, username: &str) -> StoreResult<User> {
        self.tables()?
            .users
            .iter()
            .find(|u| u.username == username && u.is_active())
            .cloned()
            .ok_or_else(|| StoreError::not_found("User"))
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<User> {
        self.tables()?
            .users
            .iter()
            .find(|u| u.email == email && u.is_active())
            .cloned()
            .ok_or_else(|| StoreError::not_found("User"))
    }

    async fn update_user(&self, id: Uuid, changes: UserChanges) -> StoreResult<User> {
        let mut tables = self.tables()?;
        let user = tables.active_user_mut(id)?;
        changes.apply(user);
        user.updated_at = Some(now());
        Ok(user.clone())
    }

    async fn soft_delete_user(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables()?;
        let ts = now();
        tables.active_user_mut(id)?.deleted_at = Some(ts);
        for post in tables
            .posts
            .iter_mut()
            .filter(|p| p.owner_id == id && p.is_active())
        {
            post.deleted_at = Some(ts);
        }
        Ok(())
    }

    async fn create_post(&self, new_post: NewPost) -> StoreResult<Post> {
        let mut tables = self.tables()?;
        if tables.active_user(new_post.owner_id).is_none() {
            return Err(StoreError::conflict("Post owner does not exist"));
        }

        let post = Post {
            id: Uuid::new_v4(),
            owner_id: new_post.owner_id,
            image_ref: new_post.image_ref,
            caption: new_post.caption,
            created_at: now(),
            updated_at: None,
            deleted_at: None,
        };
        tables.posts.push(post.clone());
        Ok(post)
    }

    async fn get_post(&self, id: Uuid) -> StoreResult<Post> {
        self.tables()?
            .active_post(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Post"))
    }

    async fn update_post_caption(&self, id: Uuid, caption: &str) -> StoreResult<Post> {
        let mut tables = self.tables()?;
        let post = tables.active_post_mut(id)?;
        post.caption = caption.to_string();
        post.updated_at = Some(now());
        Ok(post.clone())
    }

    async fn soft_delete_post(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables()?;
        tables.active_post_mut(id)?.deleted_at = Some(now());
        Ok(())
    }

    async fn list_user_posts(&self, owner_id: Uuid, page: Page) -> StoreResult<Vec<Post>> {
        let tables = self.tables()?;
        let posts = tables.newest_first(|p| p.owner_id == owner_id);
        Ok(page.apply(posts.into_iter()))
    }

    async fn feed(&self, user_id: Uuid, page: Page) -> StoreResult<Vec<Post>> {
        let tables = self.tables()?;
        let posts = tables.newest_first(|p| {
            tables.has_edge(user_id, p.owner_id) && tables.active_user(p.owner_id).is_some()
        });
        Ok(page.apply(posts.into_iter()))
    }

    async fn follow(&self, follower_id: Uuid, followee_id: Uuid) -> StoreResult<Follower> {
        if follower_id == followee_id {
            return Err(StoreError::conflict("Users cannot follow themselves"));
        }

        let mut tables = self.tables()?;
        if tables.active_user(follower_id).is_none() || tables.active_user(followee_id).is_none() {
            return Err(StoreError::conflict("Both users must exist"));
        }
        if tables.has_edge(follower_id, followee_id) {
            return Err(StoreError::conflict("Already following user"));
        }

        let edge = Follower {
            follower_id,
            followee_id,
            created_at: now(),
        };
        tables.followers.push(edge.clone());
        Ok(edge)
    }

    async fn unfollow(&self, follower_id: Uuid, followee_id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables()?;
        let before = tables.followers.len();
        tables
            .followers
            .retain(|f| !(f.follower_id == follower_id && f.followee_id == followee_id));

        if tables.followers.len() == before {
            return Err(StoreError::not_found("Follow"));
        }
        Ok(())
    }

    async fn is_following(&self, follower_id: Uuid, followee_id: Uuid) -> StoreResult<bool> {
        Ok(self.tables()?.has_edge(follower_id, followee_id))
    }

    async fn list_followers(&self, user_id: Uuid) -> StoreResult<Vec<User>> {
        let tables = self.tables()?;
        Ok(tables
            .followers
            .iter()
            .filter(|f| f.followee_id == user_id)
            .filter_map(|f| tables.active_user(f.follower_id).cloned())
            .collect())
    }

    async fn list_following(&self, user_id: Uuid) -> StoreResult<Vec<User>> {
        let tables = self.tables()?;
        Ok(tables
            .followers
            .iter()
            .filter(|f| f.follower_id == user_id)
            .filter_map(|f| tables.active_user(f.followee_id).cloned())
            .collect())
    }

    async fn like_post(&self, user_id: Uuid, post_id: Uuid) -> StoreResult<Like> {
        let mut tables = self.tables()?;
        if tables.active_user(user_id).is_none() || tables.active_post(post_id).is_none() {
            return Err(StoreError::conflict("Post or user does not exist"));
        }
        if tables
            .likes
            .iter()
            .any(|l| l.user_id == user_id && l.post_id == post_id)
        {
            return Err(StoreError::conflict("Post already liked"));
        }

        let like = Like {
            user_id,
            post_id,
            created_at: now(),
        };
        tables.likes.push(like.clone());
        Ok(like)
    }

    async fn unlike_post(&self, user_id: Uuid, post_id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables()?;
        let before = tables.likes.len();
        tables
            .likes
            .retain(|l| !(l.user_id == user_id && l.post_id == post_id));

        if tables.likes.len() == before {
            return Err(StoreError::not_found("Like"));
        }
        Ok(())
    }

    async fn count_likes(&self, post_id: Uuid) -> StoreResult<u64> {
        Ok(self
            .tables()?
            .likes
            .iter()
            .filter(|l| l.post_id == post_id)
            .count() as u64)
    }
}

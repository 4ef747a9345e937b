use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use super::DatabaseHandler;
use crate::core::errors::{StoreError, StoreResult};
use crate::core::helpers::{format_timestamp, now, parse_timestamp};
use crate::core::query_params::Page;
use crate::models::{Follower, Like, NewPost, NewUser, Post, User, UserChanges};

// Portable between SQLite and Postgres: ids and timestamps are TEXT, see
// `format_timestamp` for why ordering on them is sound.
const SCHEMA: [&str; 6] = [
    "create table if not exists users (
        id text primary key,
        username text not null unique,
        email text not null unique,
        password_hash text not null,
        display_name text,
        bio text,
        avatar text,
        created_at text not null,
        updated_at text,
        deleted_at text
    )",
    "create table if not exists posts (
        id text primary key,
        owner_id text not null references users(id),
        image_ref text not null,
        caption text not null,
        created_at text not null,
        updated_at text,
        deleted_at text
    )",
    "create index if not exists posts_owner_created on posts(owner_id, created_at)",
    "create table if not exists followers (
        follower_id text not null references users(id),
        followee_id text not null references users(id),
        created_at text not null,
        primary key (follower_id, followee_id),
        check (follower_id <> followee_id)
    )",
    "create index if not exists followers_followee on followers(followee_id)",
    "create table if not exists likes (
        user_id text not null references users(id),
        post_id text not null references posts(id),
        created_at text not null,
        primary key (user_id, post_id)
    )",
];

const USER_COLUMNS: &str = "u.id, u.username, u.email, u.password_hash, u.display_name, u.bio, \
    u.avatar, u.created_at, u.updated_at, u.deleted_at";
const POST_COLUMNS: &str =
    "p.id, p.owner_id, p.image_ref, p.caption, p.created_at, p.updated_at, p.deleted_at";

/// Relational backend over sqlx's `Any` driver: the url scheme picks
/// SQLite (`sqlite:`) or Postgres (`postgres:`).
#[derive(Clone)]
pub struct SqlStore {
    pool: AnyPool,
}

impl SqlStore {
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        sqlx::any::install_default_drivers();

        // every connection to an in-memory SQLite database is a new database
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let options = if in_memory {
            AnyPoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            AnyPoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = options.connect(url).await.map_err(map_err)?;
        let store = Self { pool };
        store.migrate().await?;
        log::info!("Connected to {}", redact(url));
        Ok(store)
    }

    async fn migrate(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
        }
        Ok(())
    }

    async fn fetch_user(&self, column: &str, value: String) -> StoreResult<User> {
        let sql = format!(
            "select {} from users u where u.{} = $1 and u.deleted_at is null",
            USER_COLUMNS, column
        );
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?
            .ok_or_else(|| StoreError::not_found("User"))?;
        user_from_row(&row)
    }

    async fn exists(&self, sql: &str, value: String) -> StoreResult<bool> {
        let row = sqlx::query(sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(row.is_some())
    }

    async fn is_active_user(&self, id: Uuid) -> StoreResult<bool> {
        self.exists(
            "select id from users where id = $1 and deleted_at is null",
            id.to_string(),
        )
        .await
    }

    async fn is_active_post(&self, id: Uuid) -> StoreResult<bool> {
        self.exists(
            "select id from posts where id = $1 and deleted_at is null",
            id.to_string(),
        )
        .await
    }

    async fn fetch_posts(&self, sql: &str, user_id: Uuid, page: Page) -> StoreResult<Vec<Post>> {
        let rows = sqlx::query(sql)
            .bind(user_id.to_string())
            .bind(to_i64(page.limit))
            .bind(to_i64(page.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
        rows.iter().map(post_from_row).collect()
    }

    async fn fetch_users(&self, sql: &str, user_id: Uuid) -> StoreResult<Vec<User>> {
        let rows = sqlx::query(sql)
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
        rows.iter().map(user_from_row).collect()
    }
}

#[async_trait]
impl DatabaseHandler for SqlStore {
    async fn create_user(&self, new_user: NewUser) -> StoreResult<User> {
        if self
            .exists("select id from users where username = $1", new_user.username.clone())
            .await?
        {
            return Err(StoreError::conflict("Username exists"));
        }
        if self
            .exists("select id from users where email = $1", new_user.email.clone())
            .await?
        {
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

        sqlx::query(
            "insert into users (id, username, email, password_hash, display_name, created_at) \
             values ($1, $2, $3, $4, $5, $6)",
        )
        .bind(user.id.to_string())
        .bind(user.username.clone())
        .bind(user.email.clone())
        .bind(user.password_hash.clone())
        .bind(user.display_name.clone())
        .bind(format_timestamp(&user.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_as(e, "Username or email exists"))?;

        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<User> {
        self.fetch_user("id", id.to_string()).await
    }

    async fn get_user_by_username(&self, username: &str) -> StoreResult<User> {
        self.fetch_user("username", username.to_string()).await
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<User> {
        self.fetch_user("email", email.to_string()).await
    }

    async fn update_user(&self, id: Uuid, changes: UserChanges) -> StoreResult<User> {
        let mut user = self.get_user(id).await?;
        changes.apply(&mut user);
        user.updated_at = Some(now());

        let result = sqlx::query(
            "update users set display_name = $1, bio = $2, avatar = $3, password_hash = $4, \
             updated_at = $5 where id = $6 and deleted_at is null",
        )
        .bind(user.display_name.clone())
        .bind(user.bio.clone())
        .bind(user.avatar.clone())
        .bind(user.password_hash.clone())
        .bind(user.updated_at.as_ref().map(format_timestamp))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("User"));
        }
        Ok(user)
    }

    async fn soft_delete_user(&self, id: Uuid) -> StoreResult<()> {
        let ts = format_timestamp(&now());
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        let result = sqlx::query("update users set deleted_at = $1 where id = $2 and deleted_at is null")
            .bind(ts.clone())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("User"));
        }

        sqlx::query("update posts set deleted_at = $1 where owner_id = $2 and deleted_at is null")
            .bind(ts)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;

        tx.commit().await.map_err(map_err)
    }

    async fn create_post(&self, new_post: NewPost) -> StoreResult<Post> {
        if !self.is_active_user(new_post.owner_id).await? {
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

        sqlx::query(
            "insert into posts (id, owner_id, image_ref, caption, created_at) \
             values ($1, $2, $3, $4, $5)",
        )
        .bind(post.id.to_string())
        .bind(post.owner_id.to_string())
        .bind(post.image_ref.clone())
        .bind(post.caption.clone())
        .bind(format_timestamp(&post.created_at))
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        Ok(post)
    }

    async fn get_post(&self, id: Uuid) -> StoreResult<Post> {
        let sql = format!(
            "select {} from posts p where p.id = $1 and p.deleted_at is null",
            POST_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?
            .ok_or_else(|| StoreError::not_found("Post"))?;
        post_from_row(&row)
    }

    async fn update_post_caption(&self, id: Uuid, caption: &str) -> StoreResult<Post> {
        let result = sqlx::query(
            "update posts set caption = $1, updated_at = $2 where id = $3 and deleted_at is null",
        )
        .bind(caption.to_string())
        .bind(format_timestamp(&now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Post"));
        }
        self.get_post(id).await
    }

    async fn soft_delete_post(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("update posts set deleted_at = $1 where id = $2 and deleted_at is null")
            .bind(format_timestamp(&now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Post"));
        }
        Ok(())
    }

    async fn list_user_posts(&self, owner_id: Uuid, page: Page) -> StoreResult<Vec<Post>> {
        let sql = format!(
            "select {} from posts p \
             where p.owner_id = $1 and p.deleted_at is null \
             order by p.created_at desc, p.id desc limit $2 offset $3",
            POST_COLUMNS
        );
        self.fetch_posts(&sql, owner_id, page).await
    }

    async fn feed(&self, user_id: Uuid, page: Page) -> StoreResult<Vec<Post>> {
        let sql = format!(
            "select {} from posts p \
             join followers f on f.followee_id = p.owner_id \
             join users u on u.id = p.owner_id \
             where f.follower_id = $1 and p.deleted_at is null and u.deleted_at is null \
             order by p.created_at desc, p.id desc limit $2 offset $3",
            POST_COLUMNS
        );
        self.fetch_posts(&sql, user_id, page).await
    }

    async fn follow(&self, follower_id: Uuid, followee_id: Uuid) -> StoreResult<Follower> {
        if follower_id == followee_id {
            return Err(StoreError::conflict("Users cannot follow themselves"));
        }
        if !self.is_active_user(follower_id).await? || !self.is_active_user(followee_id).await? {
            return Err(StoreError::conflict("Both users must exist"));
        }

        let edge = Follower {
            follower_id,
            followee_id,
            created_at: now(),
        };
        sqlx::query("insert into followers (follower_id, followee_id, created_at) values ($1, $2, $3)")
            .bind(follower_id.to_string())
            .bind(followee_id.to_string())
            .bind(format_timestamp(&edge.created_at))
            .execute(&self.pool)
            .await
            .map_err(|e| conflict_as(e, "Already following user"))?;

        Ok(edge)
    }

    async fn unfollow(&self, follower_id: Uuid, followee_id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("delete from followers where follower_id = $1 and followee_id = $2")
            .bind(follower_id.to_string())
            .bind(followee_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Follow"));
        }
        Ok(())
    }

    async fn is_following(&self, follower_id: Uuid, followee_id: Uuid) -> StoreResult<bool> {
        let row = sqlx::query("select follower_id from followers where follower_id = $1 and followee_id = $2")
            .bind(follower_id.to_string())
            .bind(followee_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(row.is_some())
    }

    async fn list_followers(&self, user_id: Uuid) -> StoreResult<Vec<User>> {
        let sql = format!(
            "select {} from followers f join users u on u.id = f.follower_id \
             where f.followee_id = $1 and u.deleted_at is null \
             order by f.created_at, u.id",
            USER_COLUMNS
        );
        self.fetch_users(&sql, user_id).await
    }

    async fn list_following(&self, user_id: Uuid) -> StoreResult<Vec<User>> {
        let sql = format!(
            "select {} from followers f join users u on u.id = f.followee_id \
             where f.follower_id = $1 and u.deleted_at is null \
             order by f.created_at, u.id",
            USER_COLUMNS
        );
        self.fetch_users(&sql, user_id).await
    }

    async fn like_post(&self, user_id: Uuid, post_id: Uuid) -> StoreResult<Like> {
        if !self.is_active_user(user_id).await? || !self.is_active_post(post_id).await? {
            return Err(StoreError::conflict("Post or user does not exist"));
        }

        let like = Like {
            user_id,
            post_id,
            created_at: now(),
        };
        sqlx::query("insert into likes (user_id, post_id, created_at) values ($1, $2, $3)")
            .bind(user_id.to_string())
            .bind(post_id.to_string())
            .bind(format_timestamp(&like.created_at))
            .execute(&self.pool)
            .await
            .map_err(|e| conflict_as(e, "Post already liked"))?;

        Ok(like)
    }

    async fn unlike_post(&self, user_id: Uuid, post_id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("delete from likes where user_id = $1 and post_id = $2")
            .bind(user_id.to_string())
            .bind(post_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Like"));
        }
        Ok(())
    }

    async fn count_likes(&self, post_id: Uuid) -> StoreResult<u64> {
        let row = sqlx::query("select count(*) as n from likes where post_id = $1")
            .bind(post_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
        let n: i64 = row.try_get("n").map_err(map_err)?;
        Ok(n.max(0) as u64)
    }
}

fn map_err(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::conflict("Duplicate entry")
        }
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            StoreError::conflict("Referenced record does not exist")
        }
        sqlx::Error::Database(db) if db.is_check_violation() => {
            StoreError::conflict(format!("Constraint failed: {}", db.message()))
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

/// Like `map_err`, with a caller-chosen message for unique violations.
fn conflict_as(err: sqlx::Error, msg: &str) -> StoreError {
    match map_err(err) {
        StoreError::ConstraintViolation(_) => StoreError::conflict(msg),
        other => other,
    }
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn redact(url: &str) -> String {
    match url.split_once('@') {
        Some((_, host)) => format!("{}://***@{}", url.split(':').next().unwrap_or(""), host),
        None => url.to_string(),
    }
}

fn uuid_col(row: &AnyRow, col: &str) -> StoreResult<Uuid> {
    let raw: String = row.try_get(col).map_err(map_err)?;
    Uuid::parse_str(&raw).map_err(|e| StoreError::Backend(format!("bad uuid in {}: {}", col, e)))
}

fn ts_col(row: &AnyRow, col: &str) -> StoreResult<DateTime<Utc>> {
    let raw: String = row.try_get(col).map_err(map_err)?;
    parse_timestamp(&raw).map_err(|e| StoreError::Backend(format!("bad timestamp in {}: {}", col, e)))
}

fn opt_ts_col(row: &AnyRow, col: &str) -> StoreResult<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.try_get(col).map_err(map_err)?;
    raw.map(|v| {
        parse_timestamp(&v)
            .map_err(|e| StoreError::Backend(format!("bad timestamp in {}: {}", col, e)))
    })
    .transpose()
}

fn user_from_row(row: &AnyRow) -> StoreResult<User> {
    Ok(User {
        id: uuid_col(row, "id")?,
        username: row.try_get("username").map_err(map_err)?,
        email: row.try_get("email").map_err(map_err)?,
        password_hash: row.try_get("password_hash").map_err(map_err)?,
        display_name: row.try_get("display_name").map_err(map_err)?,
        bio: row.try_get("bio").map_err(map_err)?,
        avatar: row.try_get("avatar").map_err(map_err)?,
        created_at: ts_col(row, "created_at")?,
        updated_at: opt_ts_col(row, "updated_at")?,
        deleted_at: opt_ts_col(row, "deleted_at")?,
    })
}

fn post_from_row(row: &AnyRow) -> StoreResult<Post> {
    Ok(Post {
        id: uuid_col(row, "id")?,
        owner_id: uuid_col(row, "owner_id")?,
        image_ref: row.try_get("image_ref").map_err(map_err)?,
        caption: row.try_get("caption").map_err(map_err)?,
        created_at: ts_col(row, "created_at")?,
        updated_at: opt_ts_col(row, "updated_at")?,
        deleted_at: opt_ts_col(row, "deleted_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;

    async fn store() -> SqlStore {
        SqlStore::connect("sqlite::memory:", 1).await.unwrap()
    }

    #[tokio::test]
    async fn user_lifecycle() {
        conformance::user_lifecycle(&store().await).await;
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        conformance::duplicate_username_is_rejected(&store().await).await;
    }

    #[tokio::test]
    async fn follow_edges() {
        conformance::follow_edges(&store().await).await;
    }

    #[tokio::test]
    async fn post_round_trip() {
        conformance::post_round_trip(&store().await).await;
    }

    #[tokio::test]
    async fn feed_contains_only_followed_posts() {
        conformance::feed_contains_only_followed_posts(&store().await).await;
    }

    #[tokio::test]
    async fn soft_deleted_user_cascades() {
        conformance::soft_deleted_user_cascades(&store().await).await;
    }

    #[tokio::test]
    async fn likes() {
        conformance::likes(&store().await).await;
    }

    #[tokio::test]
    async fn duplicate_follow_leaves_single_row() {
        let store = store().await;
        let a = store.create_user(conformance::new_user("x")).await.unwrap();
        let b = store.create_user(conformance::new_user("y")).await.unwrap();

        store.follow(a.id, b.id).await.unwrap();
        assert!(store.follow(a.id, b.id).await.is_err());

        let row = sqlx::query("select count(*) as n from followers")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(row.try_get::<i64, _>("n").unwrap(), 1);
    }

    #[tokio::test]
    async fn schema_enforces_no_self_follow() {
        let store = store().await;
        let a = store.create_user(conformance::new_user("selfish")).await.unwrap();

        let err = sqlx::query("insert into followers (follower_id, followee_id, created_at) values ($1, $2, $3)")
            .bind(a.id.to_string())
            .bind(a.id.to_string())
            .bind(format_timestamp(&now()))
            .execute(&store.pool)
            .await
            .unwrap_err();
        assert!(matches!(map_err(err), StoreError::ConstraintViolation(_)));
    }

    #[test]
    fn credentials_are_redacted() {
        assert_eq!(
            redact("postgres://app:secret@db:5432/share"),
            "postgres://***@db:5432/share"
        );
        assert_eq!(redact("sqlite::memory:"), "sqlite::memory:");
    }
}

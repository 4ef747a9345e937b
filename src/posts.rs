use actix_web::{web, HttpResponse};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::core::errors::{ApiError, StoreResult};
use crate::core::query_params::PageQuery;
use crate::models::{NewPost, Post};
use crate::schemas::{CreatePostRequest, PostOut, UpdatePostRequest};
use crate::store::DatabaseHandler;
use crate::AppState;

/// Attaches like counts for the response.
pub async fn with_likes(store: &dyn DatabaseHandler, posts: Vec<Post>) -> StoreResult<Vec<PostOut>> {
    let mut out = Vec::with_capacity(posts.len());
    for post in &posts {
        out.push(PostOut::new(post, store.count_likes(post.id).await?));
    }
    Ok(out)
}

/// Loads a live post and checks that `caller` owns it.
async fn owned_post(state: &AppState, caller: AuthUser, post_id: Uuid) -> Result<Post, ApiError> {
    let post = state.store.get_post(post_id).await?;
    if post.owner_id != caller.id {
        log::warn!("User {} tried to modify post {} of {}", caller.id, post.id, post.owner_id);
        return Err(ApiError::Forbidden("You do not own this post".to_string()));
    }
    Ok(post)
}

// === HTTP Handlers ===

pub async fn create_post(
    state: web::Data<AppState>,
    caller: AuthUser,
    body: web::Json<CreatePostRequest>,
) -> Result<HttpResponse, ApiError> {
    let draft = body.into_inner().validate()?;

    let post = state
        .store
        .create_post(NewPost {
            owner_id: caller.id,
            image_ref: draft.image_ref,
            caption: draft.caption,
        })
        .await?;

    log::info!("User {} created post {}", caller.id, post.id);
    Ok(HttpResponse::Created().json(PostOut::new(&post, 0)))
}

pub async fn get_post(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let post = state.store.get_post(path.into_inner()).await?;
    let likes = state.store.count_likes(post.id).await?;
    Ok(HttpResponse::Ok().json(PostOut::new(&post, likes)))
}

pub async fn edit_post(
    state: web::Data<AppState>,
    caller: AuthUser,
    path: web::Path<Uuid>,
    body: web::Json<UpdatePostRequest>,
) -> Result<HttpResponse, ApiError> {
    let caption = body.into_inner().validate()?;
    let post = owned_post(&state, caller, path.into_inner()).await?;

    let post = state.store.update_post_caption(post.id, &caption).await?;
    let likes = state.store.count_likes(post.id).await?;
    Ok(HttpResponse::Ok().json(PostOut::new(&post, likes)))
}

pub async fn delete_post(
    state: web::Data<AppState>,
    caller: AuthUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let post = owned_post(&state, caller, path.into_inner()).await?;
    state.store.soft_delete_post(post.id).await?;

    log::info!("User {} deleted post {}", caller.id, post.id);
    Ok(HttpResponse::NoContent().finish())
}

pub async fn like_post(
    state: web::Data<AppState>,
    caller: AuthUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let post = state.store.get_post(path.into_inner()).await?;
    state.store.like_post(caller.id, post.id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({"status": "liked"})))
}

pub async fn unlike_post(
    state: web::Data<AppState>,
    caller: AuthUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    state.store.unlike_post(caller.id, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({"status": "unliked"})))
}

/// Posts of the users the caller follows, newest first.
pub async fn get_feed(
    state: web::Data<AppState>,
    caller: AuthUser,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let posts = state.store.feed(caller.id, query.into_inner().into()).await?;
    Ok(HttpResponse::Ok().json(with_likes(state.store.as_ref(), posts).await?))
}

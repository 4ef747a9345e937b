use std::collections::HashSet;

use actix_web::{web, HttpResponse};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::core::errors::{ApiError, StoreResult};
use crate::models::User;
use crate::schemas::PublicUserOut;
use crate::store::DatabaseHandler;
use crate::AppState;

/// Users following both `a` and `b`, in `a`'s follower order.
pub async fn mutual_followers(store: &dyn DatabaseHandler, a: Uuid, b: Uuid) -> StoreResult<Vec<User>> {
    let of_b: HashSet<Uuid> = store
        .list_followers(b)
        .await?
        .into_iter()
        .map(|u| u.id)
        .collect();

    Ok(store
        .list_followers(a)
        .await?
        .into_iter()
        .filter(|u| of_b.contains(&u.id))
        .collect())
}

fn public(users: &[User]) -> Vec<PublicUserOut> {
    users.iter().map(PublicUserOut::from).collect()
}

// === HTTP Handlers ===

pub async fn handle_follow(
    state: web::Data<AppState>,
    caller: AuthUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let target = state.store.get_user(path.into_inner()).await?;
    state.store.follow(caller.id, target.id).await?;

    log::info!("User {} followed {}", caller.id, target.id);
    Ok(HttpResponse::Ok().json(serde_json::json!({"status": "followed"})))
}

pub async fn handle_unfollow(
    state: web::Data<AppState>,
    caller: AuthUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let target_id = path.into_inner();
    state.store.unfollow(caller.id, target_id).await?;

    log::info!("User {} unfollowed {}", caller.id, target_id);
    Ok(HttpResponse::Ok().json(serde_json::json!({"status": "unfollowed"})))
}

pub async fn get_followers_list(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let user = state.store.get_user(path.into_inner()).await?;
    let followers = state.store.list_followers(user.id).await?;
    Ok(HttpResponse::Ok().json(public(&followers)))
}

pub async fn get_followings_list(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let user = state.store.get_user(path.into_inner()).await?;
    let following = state.store.list_following(user.id).await?;
    Ok(HttpResponse::Ok().json(public(&following)))
}

pub async fn get_mutual_followers(
    state: web::Data<AppState>,
    path: web::Path<(Uuid, Uuid)>,
) -> Result<HttpResponse, ApiError> {
    let (a, b) = path.into_inner();
    let a = state.store.get_user(a).await?;
    let b = state.store.get_user(b).await?;

    let mutual = mutual_followers(state.store.as_ref(), a.id, b.id).await?;
    Ok(HttpResponse::Ok().json(public(&mutual)))
}

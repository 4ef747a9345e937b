use actix_web::{web, HttpResponse};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::core::errors::ApiError;
use crate::core::query_params::PageQuery;
use crate::models::{NewUser, UserChanges};
use crate::posts::with_likes;
use crate::schemas::{PublicUserOut, RegisterRequest, UpdateProfileRequest, UserOut};
use crate::AppState;

// === HTTP Handlers ===

pub async fn register(
    state: web::Data<AppState>,
    body: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    let reg = body.into_inner().validate()?;
    let password_hash = state.auth.hash_password(&reg.password).await?;

    let user = state
        .store
        .create_user(NewUser {
            username: reg.username,
            email: reg.email,
            password_hash,
            display_name: reg.display_name,
        })
        .await?;

    log::info!("Registered user {} ({})", user.username, user.id);
    Ok(HttpResponse::Created().json(UserOut::from(&user)))
}

pub async fn get_profile(
    state: web::Data<AppState>,
    caller: AuthUser,
) -> Result<HttpResponse, ApiError> {
    let user = state.store.get_user(caller.id).await?;
    Ok(HttpResponse::Ok().json(UserOut::from(&user)))
}

pub async fn update_profile(
    state: web::Data<AppState>,
    caller: AuthUser,
    body: web::Json<UpdateProfileRequest>,
) -> Result<HttpResponse, ApiError> {
    let update = body.into_inner().validate()?;

    let password_hash = match update.password {
        Some(change) => {
            let user = state.store.get_user(caller.id).await?;
            // The old password must still match before it can be replaced.
            state
                .auth
                .verify_credentials(&user.username, &change.old_password)
                .await?;
            Some(state.auth.hash_password(&change.new_password).await?)
        }
        None => None,
    };

    let changes = UserChanges {
        display_name: update.display_name,
        bio: update.bio,
        avatar: update.avatar,
        password_hash,
    };
    let password_changed = changes.password_hash.is_some();

    let user = state.store.update_user(caller.id, changes).await?;
    if password_changed {
        log::info!("User {} changed their password", user.id);
    }

    Ok(HttpResponse::Ok().json(UserOut::from(&user)))
}

pub async fn delete_profile(
    state: web::Data<AppState>,
    caller: AuthUser,
) -> Result<HttpResponse, ApiError> {
    state.store.soft_delete_user(caller.id).await?;
    log::info!("User {} deleted their account", caller.id);
    Ok(HttpResponse::NoContent().finish())
}

pub async fn get_user_details(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let user = state.store.get_user(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(PublicUserOut::from(&user)))
}

pub async fn list_user_posts(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let owner = state.store.get_user(path.into_inner()).await?;
    let posts = state
        .store
        .list_user_posts(owner.id, query.into_inner().into())
        .await?;

    Ok(HttpResponse::Ok().json(with_likes(state.store.as_ref(), posts).await?))
}

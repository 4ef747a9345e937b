//! Backend for an image sharing service: accounts, follow edges, image
//! posts and a feed, served as a JSON API over actix-web.

use std::sync::Arc;

use actix_web::{web, HttpResponse};

pub mod auth;
pub mod config;
pub mod core;
pub mod follow;
pub mod images;
pub mod models;
pub mod posts;
pub mod schemas;
pub mod store;
pub mod users;

use crate::auth::AuthHandler;
use crate::config::UploadSettings;
use crate::core::errors::{ApiError, ValidationError};
use crate::store::DatabaseHandler;

/// Everything a request handler needs, shared by all workers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DatabaseHandler>,
    pub auth: Arc<dyn AuthHandler>,
    pub uploads: UploadSettings,
}

fn bad_input(field: &str, err: impl std::fmt::Display) -> actix_web::Error {
    ApiError::from(ValidationError::single(field, err.to_string())).into()
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"status": "ok"}))
}

async fn no_route() -> HttpResponse {
    HttpResponse::NotFound().json(serde_json::json!({"error": "No route found", "code": "not_found"}))
}

/// Registers state, extractor limits and every route on an actix app.
pub fn configure_app(state: AppState) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg: &mut web::ServiceConfig| {
        let max_upload = state.uploads.max_bytes;

        cfg.app_data(web::Data::new(state))
            .app_data(web::JsonConfig::default().error_handler(|err, _| bad_input("body", err)))
            .app_data(web::PathConfig::default().error_handler(|err, _| bad_input("path", err)))
            .app_data(web::QueryConfig::default().error_handler(|err, _| bad_input("query", err)))
            .app_data(web::PayloadConfig::new(max_upload))
            .route("/health", web::get().to(health))
            // === Accounts ===
            .route("/register", web::post().to(users::register))
            .route("/login", web::post().to(auth::login_user))
            .service(
                web::resource("/profile")
                    .route(web::get().to(users::get_profile))
                    .route(web::put().to(users::update_profile))
                    .route(web::delete().to(users::delete_profile)),
            )
            .route("/users/{id}", web::get().to(users::get_user_details))
            .route("/users/{id}/posts", web::get().to(users::list_user_posts))
            .route("/users/{id}/followers", web::get().to(follow::get_followers_list))
            .route("/users/{id}/following", web::get().to(follow::get_followings_list))
            .route(
                "/users/{id}/mutual-followers/{other}",
                web::get().to(follow::get_mutual_followers),
            )
            // === Posts ===
            .route("/posts", web::post().to(posts::create_post))
            .service(
                web::resource("/posts/{id}")
                    .route(web::get().to(posts::get_post))
                    .route(web::put().to(posts::edit_post))
                    .route(web::delete().to(posts::delete_post)),
            )
            .service(
                web::resource("/posts/{id}/like")
                    .route(web::post().to(posts::like_post))
                    .route(web::delete().to(posts::unlike_post)),
            )
            .route("/feed", web::get().to(posts::get_feed))
            // === Follows ===
            .service(
                web::resource("/follow/{user_id}")
                    .route(web::post().to(follow::handle_follow))
                    .route(web::delete().to(follow::handle_unfollow)),
            )
            // === Images ===
            .route("/images", web::post().to(images::upload_image))
            .route("/images/{name}", web::get().to(images::serve_image))
            .default_service(web::route().to(no_route));
    }
}

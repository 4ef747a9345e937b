use actix_web::middleware::Logger;
use actix_web::{App, HttpServer};
use anyhow::Context;
use log::{info, warn};

use image_share::config::{Settings, DEFAULT_TOKEN_SECRET};
use image_share::core::db::init_demo_data;
use image_share::{auth, configure_app, store, AppState};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();

    let settings = Settings::load().context("loading configuration")?;
    if settings.auth.secret == DEFAULT_TOKEN_SECRET {
        warn!("Using the default token secret, set IMAGESHARE__AUTH__SECRET in production");
    }

    let db = store::connect(&settings.database)
        .await
        .context("connecting to the database")?;
    let auth = auth::from_settings(&settings.auth, db.clone()).context("configuring auth")?;

    if settings.seed_demo_data {
        init_demo_data(db.as_ref(), auth.as_ref()).await?;
    }

    let state = AppState {
        store: db,
        auth,
        uploads: settings.uploads.clone(),
    };

    info!(
        "Listening on http://{} ({:?} backend)",
        settings.listen, settings.database.backend
    );

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .configure(configure_app(state.clone()))
    });
    if let Some(workers) = settings.workers {
        server = server.workers(workers);
    }

    server.bind(&settings.listen)?.run().await?;
    Ok(())
}

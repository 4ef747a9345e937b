use crate::auth::AuthHandler;
use crate::core::errors::StoreError;
use crate::models::{NewPost, NewUser, User};
use crate::store::DatabaseHandler;

/// Password of every seeded account.
pub const DEMO_PASSWORD: &str = "demo-password";

const DEMO_USERS: [(&str, &str, &[&str]); 3] = [
    ("alice", "Alice", &["Morning light over the harbour", "Fresh bread from the corner bakery"]),
    ("bob", "Bob", &["Summit at last", "Trail mix, mostly raisins"]),
    ("carol", "Carol", &["New mural downtown"]),
];

/// Creates the demo users, their posts and an `alice -> bob` follow edge.
/// Accounts that already exist are left alone, so running this on every
/// start is safe. A demo account that was deleted keeps its name taken and
/// is skipped.
pub async fn init_demo_data(store: &dyn DatabaseHandler, auth: &dyn AuthHandler) -> anyhow::Result<()> {
    let mut seeded: Vec<Option<User>> = Vec::new();

    for (username, display_name, captions) in DEMO_USERS {
        match store.get_user_by_username(username).await {
            Ok(existing) => {
                seeded.push(Some(existing));
                continue;
            }
            Err(StoreError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let created = store
            .create_user(NewUser {
                username: username.to_string(),
                email: format!("{}@example.com", username),
                password_hash: auth.hash_password(DEMO_PASSWORD).await?,
                display_name: Some(display_name.to_string()),
            })
            .await;
        let user = match created {
            Ok(user) => user,
            Err(StoreError::ConstraintViolation(reason)) => {
                log::warn!("Skipping demo user {}: {}", username, reason);
                seeded.push(None);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        for (i, caption) in captions.iter().enumerate() {
            store
                .create_post(NewPost {
                    owner_id: user.id,
                    image_ref: format!("https://picsum.photos/seed/{}-{}/800/600", username, i),
                    caption: caption.to_string(),
                })
                .await?;
        }

        log::info!("Seeded demo user {}", username);
        seeded.push(Some(user));
    }

    if let (Some(Some(alice)), Some(Some(bob))) = (seeded.first(), seeded.get(1)) {
        if !store.is_following(alice.id, bob.id).await? {
            store.follow(alice.id, bob.id).await?;
        }
    }

    Ok(())
}

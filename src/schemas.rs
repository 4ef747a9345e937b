//! Request and response shapes of the JSON API.
//!
//! Request structs accept every field as optional so that `validate()` can
//! report all missing and malformed fields in one [`ValidationError`].
//! Unknown fields are rejected. Response structs are built from the models
//! and never carry the password hash.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::*;
use crate::core::errors::ValidationError;
use crate::models::{Post, User};

fn email_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("Regex should compile")
    })
}

fn username_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.]+$").expect("Regex should compile"))
}

fn url_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^https?://[^\s/?#]+[^\s]*$").expect("Regex should compile"))
}

/// Trimmed, non-empty value or a "required" error.
fn required<'a>(errors: &mut ValidationError, field: &str, value: &'a Option<String>) -> Option<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Some(v),
        _ => {
            errors.push(field, format!("{} is required", field));
            None
        }
    }
}

fn check_length(errors: &mut ValidationError, field: &str, value: &str, min: usize, max: usize) -> bool {
    let len = value.chars().count();
    if len < min || len > max {
        errors.push(field, format!("{} must be {}-{} characters", field, min, max));
        false
    } else {
        true
    }
}

fn check_password(errors: &mut ValidationError, field: &str, password: &str) {
    check_length(errors, field, password, MIN_PASSWORD_LENGTH, MAX_PASSWORD_LENGTH);
}

/// `http(s)://` URL or a `/images/<name>` upload reference.
pub fn check_image_ref(errors: &mut ValidationError, field: &str, value: &str) {
    if value.len() > MAX_IMAGE_REF_LENGTH {
        errors.push(field, format!("{} must be at most {} characters", field, MAX_IMAGE_REF_LENGTH));
        return;
    }

    let local_ok = value
        .strip_prefix(IMAGES_ROUTE_PREFIX)
        .map(|name| !name.is_empty() && !name.contains('/') && !name.contains(".."))
        .unwrap_or(false);

    if !local_ok && !url_regex().is_match(value) {
        errors.push(field, format!("{} must be an http(s) URL or an uploaded image", field));
    }
}

/// Trimmed free text, stored as sent. Escaping is up to whoever renders
/// it. `None` when the input was absent.
fn optional_text(errors: &mut ValidationError, field: &str, value: &Option<String>, max: usize) -> Option<String> {
    let value = value.as_deref()?.trim();
    check_length(errors, field, value, 0, max).then(|| value.to_string())
}

fn caption(errors: &mut ValidationError, value: &Option<String>) -> Option<String> {
    let caption = required(errors, "caption", value)?;
    check_length(errors, "caption", caption, 1, MAX_CAPTION_LENGTH).then(|| caption.to_string())
}

// === Requests ===

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    /// Lower-cased
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
}

impl RegisterRequest {
    pub fn validate(self) -> Result<Registration, ValidationError> {
        let mut errors = ValidationError::new();

        let username = required(&mut errors, "username", &self.username);
        if let Some(name) = username {
            if check_length(&mut errors, "username", name, MIN_USERNAME_LENGTH, MAX_USERNAME_LENGTH)
                && !username_regex().is_match(name)
            {
                errors.push("username", "username may only contain letters, digits, '_' and '.'");
            }
        }

        let email = required(&mut errors, "email", &self.email);
        if let Some(email) = email {
            if email.len() > MAX_EMAIL_LENGTH || !email_regex().is_match(email) {
                errors.push("email", "email is not a valid address");
            }
        }

        // passwords are not trimmed
        let password = match self.password.as_deref() {
            Some(p) if !p.is_empty() => {
                check_password(&mut errors, "password", p);
                Some(p)
            }
            _ => {
                errors.push("password", "password is required");
                None
            }
        };

        let display_name = optional_text(&mut errors, "display_name", &self.display_name, MAX_DISPLAY_NAME_LENGTH);

        errors.into_result()?;
        Ok(Registration {
            username: username.unwrap_or_default().to_string(),
            email: email.unwrap_or_default().to_lowercase(),
            password: password.unwrap_or_default().to_string(),
            display_name: display_name.filter(|d| !d.is_empty()),
        })
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl LoginRequest {
    pub fn validate(self) -> Result<Credentials, ValidationError> {
        let mut errors = ValidationError::new();
        let username = required(&mut errors, "username", &self.username).map(str::to_string);
        let password = match self.password {
            Some(p) if !p.is_empty() => Some(p),
            _ => {
                errors.push("password", "password is required");
                None
            }
        };

        errors.into_result()?;
        Ok(Credentials {
            username: username.unwrap_or_default(),
            password: password.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePostRequest {
    pub caption: Option<String>,
    pub image_ref: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PostDraft {
    pub caption: String,
    pub image_ref: String,
}

impl CreatePostRequest {
    pub fn validate(self) -> Result<PostDraft, ValidationError> {
        let mut errors = ValidationError::new();
        let caption = caption(&mut errors, &self.caption);
        let image_ref = required(&mut errors, "image_ref", &self.image_ref);
        if let Some(image_ref) = image_ref {
            check_image_ref(&mut errors, "image_ref", image_ref);
        }

        errors.into_result()?;
        Ok(PostDraft {
            caption: caption.unwrap_or_default(),
            image_ref: image_ref.unwrap_or_default().to_string(),
        })
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatePostRequest {
    pub caption: Option<String>,
}

impl UpdatePostRequest {
    /// The trimmed caption.
    pub fn validate(self) -> Result<String, ValidationError> {
        let mut errors = ValidationError::new();
        let caption = caption(&mut errors, &self.caption);
        errors.into_result()?;
        Ok(caption.unwrap_or_default())
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<String>,
    pub old_password: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PasswordChange {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    /// `Some("")` clears the field
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<String>,
    pub password: Option<PasswordChange>,
}

impl UpdateProfileRequest {
    pub fn validate(self) -> Result<ProfileUpdate, ValidationError> {
        let mut errors = ValidationError::new();

        let display_name = optional_text(&mut errors, "display_name", &self.display_name, MAX_DISPLAY_NAME_LENGTH);
        let bio = optional_text(&mut errors, "bio", &self.bio, MAX_BIO_LENGTH);

        let avatar = self.avatar.as_deref().map(str::trim).map(|a| {
            if !a.is_empty() {
                check_image_ref(&mut errors, "avatar", a);
            }
            a.to_string()
        });

        let password = match (self.old_password, self.new_password) {
            (_, None) => None,
            (old, Some(new)) => {
                check_password(&mut errors, "new_password", &new);
                match old.filter(|o| !o.is_empty()) {
                    Some(old) => Some(PasswordChange {
                        old_password: old,
                        new_password: new,
                    }),
                    None => {
                        errors.push("old_password", "old_password is required to change the password");
                        None
                    }
                }
            }
        };

        if errors.is_empty()
            && display_name.is_none()
            && bio.is_none()
            && avatar.is_none()
            && password.is_none()
        {
            errors.push("body", "no changes supplied");
        }

        errors.into_result()?;
        Ok(ProfileUpdate {
            display_name,
            bio,
            avatar,
            password,
        })
    }
}

// === Responses ===

/// The caller's own account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserOut {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserOut {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            bio: user.bio.clone(),
            avatar: user.avatar.clone(),
            created_at: user.created_at,
        }
    }
}

/// Somebody else's account, without contact details.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicUserOut {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for PublicUserOut {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            bio: user.bio.clone(),
            avatar: user.avatar.clone(),
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenOut {
    pub access_token: String,
    pub token_type: String,
    /// Seconds
    pub expires_in: i64,
}

impl TokenOut {
    pub fn bearer(access_token: String, expires_in: i64) -> Self {
        Self {
            access_token,
            token_type: "bearer".to_string(),
            expires_in,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostOut {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub caption: String,
    pub image_ref: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub likes: u64,
}

impl PostOut {
    pub fn new(post: &Post, likes: u64) -> Self {
        Self {
            id: post.id,
            owner_id: post.owner_id,
            caption: post.caption.clone(),
            image_ref: post.image_ref.clone(),
            created_at: post.created_at,
            updated_at: post.updated_at,
            likes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageOut {
    pub image_ref: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn registration_reports_every_missing_field() {
        let err = RegisterRequest::default().validate().unwrap_err();
        assert!(err.has("username"));
        assert!(err.has("email"));
        assert!(err.has("password"));
        assert_eq!(err.fields.len(), 3);
    }

    #[test]
    fn registration_reports_every_malformed_field() {
        let err = RegisterRequest {
            username: some("a b"),
            email: some("not-an-email"),
            password: some("short"),
            display_name: Some("x".repeat(MAX_DISPLAY_NAME_LENGTH + 1)),
        }
        .validate()
        .unwrap_err();

        for field in ["username", "email", "password", "display_name"] {
            assert!(err.has(field), "{} should be reported: {:?}", field, err);
        }
    }

    #[test]
    fn valid_registration_is_normalised() {
        let reg = RegisterRequest {
            username: some("  alice_1 "),
            email: some("Alice@Example.COM"),
            password: some("long enough"),
            display_name: some("  Alice & Co "),
        }
        .validate()
        .unwrap();

        assert_eq!(reg.username, "alice_1");
        assert_eq!(reg.email, "alice@example.com");
        assert_eq!(reg.password, "long enough");
        assert_eq!(reg.display_name.as_deref(), Some("Alice & Co"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let parsed: Result<RegisterRequest, _> = serde_json::from_value(serde_json::json!({
            "username": "alice",
            "email": "alice@example.com",
            "password": "long enough",
            "is_admin": true
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn login_requires_both_fields() {
        let err = LoginRequest::default().validate().unwrap_err();
        assert!(err.has("username") && err.has("password"));

        let creds = LoginRequest {
            username: some("bob"),
            password: some(" spaced "),
        }
        .validate()
        .unwrap();
        assert_eq!(creds.password, " spaced ");
    }

    #[test]
    fn post_caption_and_image_ref_are_checked() {
        let err = CreatePostRequest {
            caption: Some("x".repeat(MAX_CAPTION_LENGTH + 1)),
            image_ref: some("ftp://example.com/a.png"),
        }
        .validate()
        .unwrap_err();
        assert!(err.has("caption") && err.has("image_ref"));

        let err = CreatePostRequest {
            caption: some("   "),
            image_ref: some("/images/../secret"),
        }
        .validate()
        .unwrap_err();
        assert!(err.has("caption") && err.has("image_ref"));

        assert!(CreatePostRequest {
            caption: Some("x".repeat(MAX_CAPTION_LENGTH)),
            image_ref: some("https://cdn.example.com/long.jpg"),
        }
        .validate()
        .is_ok());

        assert!(CreatePostRequest {
            caption: some("local"),
            image_ref: some("/images/3f2a.png"),
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn free_text_is_kept_verbatim() {
        let draft = CreatePostRequest {
            caption: some(" Fish & chips, 3 < 4 <b>not bold</b> "),
            image_ref: some("https://cdn.example.com/fish.jpg"),
        }
        .validate()
        .unwrap();
        assert_eq!(draft.caption, "Fish & chips, 3 < 4 <b>not bold</b>");

        // length is counted on the stored value
        let at_limit = "&".repeat(MAX_BIO_LENGTH);
        let update = UpdateProfileRequest {
            bio: Some(at_limit.clone()),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(update.bio, Some(at_limit));
    }

    #[test]
    fn profile_update_needs_old_password_for_new_one() {
        let err = UpdateProfileRequest {
            new_password: some("brand new password"),
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert!(err.has("old_password"));

        let update = UpdateProfileRequest {
            bio: some("Hello, I'm Alice!"),
            old_password: some("old password"),
            new_password: some("brand new password"),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(update.bio.as_deref(), Some("Hello, I'm Alice!"));
        assert!(update.password.is_some());
    }

    #[test]
    fn empty_profile_update_is_rejected() {
        let err = UpdateProfileRequest::default().validate().unwrap_err();
        assert!(err.has("body"));
    }

    #[test]
    fn user_output_never_contains_password_hash() {
        let user = User {
            id: Uuid::new_v4(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            display_name: None,
            bio: None,
            avatar: None,
            created_at: Utc::now(),
            updated_at: None,
            deleted_at: None,
        };

        let own = serde_json::to_string(&UserOut::from(&user)).unwrap();
        let public = serde_json::to_string(&PublicUserOut::from(&user)).unwrap();
        assert!(!own.contains("argon2") && !own.contains("password"));
        assert!(!public.contains("argon2") && !public.contains("email"));
    }
}

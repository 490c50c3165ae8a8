use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Public view of a local account.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub profile_picture: Option<String>,
}

/// Profile attributes returned by the identity provider for a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleProfile {
    /// Provider subject id. Immutable, the lookup key on re-login.
    pub google_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub profile_picture: Option<String>,
}

impl GoogleProfile {
    pub fn new(google_id: String, email: String, name: &str, picture: &str) -> Self {
        let (first_name, last_name) = split_display_name(name);
        let picture = picture.trim();
        Self {
            google_id,
            email,
            first_name,
            last_name,
            profile_picture: (!picture.is_empty()).then(|| picture.to_string()),
        }
    }
}

/// Split a display name into `(given, family)`.
///
/// The first whitespace-delimited token is the given name; the rest are
/// rejoined with single spaces.
pub fn split_display_name(name: &str) -> (String, String) {
    let mut parts = name.split_whitespace();
    let given = parts.next().unwrap_or_default().to_string();
    let family = parts.collect::<Vec<_>>().join(" ");
    (given, family)
}

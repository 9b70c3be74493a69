use serde::{Deserialize, Serialize};

/// Body of a successful `POST /token`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

impl TokenResponse {
    pub fn bearer(access_token: String) -> Self {
        Self {
            access_token,
            token_type: "bearer".to_string(),
        }
    }
}

/// Form fields of `POST /token`. Never logged as a whole.
#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

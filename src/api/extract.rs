//! Login form extractor. Browsers posting `FormData` send
//! `multipart/form-data`; scripted clients usually send urlencoded bodies.
//! Both are accepted, and rejections come back as `{"detail": ...}`.

use axum::{
    async_trait,
    extract::{FromRequest, Multipart, Request},
    http::header,
    Form,
};

use crate::errors::AppError;
use crate::models::token::LoginForm;

#[async_trait]
impl<S> FromRequest<S> for LoginForm
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if is_multipart(&req) {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| AppError::InvalidForm(e.body_text()))?;
            return from_multipart(multipart).await;
        }

        let Form(form) = Form::<LoginForm>::from_request(req, state)
            .await
            .map_err(|e| AppError::InvalidForm(e.body_text()))?;
        Ok(form)
    }
}

fn is_multipart(req: &Request) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| {
            ct.trim_start()
                .to_ascii_lowercase()
                .starts_with("multipart/form-data")
        })
}

async fn from_multipart(mut multipart: Multipart) -> Result<LoginForm, AppError> {
    let mut username = None;
    let mut password = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidForm(e.to_string()))?
    {
        let name = field.name().map(str::to_string);
        let slot = match name.as_deref() {
            Some("username") => &mut username,
            Some("password") => &mut password,
            // grant_type, scope, client_id ... are ignored
            _ => continue,
        };
        let value = field
            .text()
            .await
            .map_err(|e| AppError::InvalidForm(e.to_string()))?;
        *slot = Some(value);
    }

    match (username, password) {
        (Some(username), Some(password)) => Ok(LoginForm { username, password }),
        (None, _) => Err(AppError::InvalidForm("missing field `username`".to_string())),
        (_, None) => Err(AppError::InvalidForm("missing field `password`".to_string())),
    }
}

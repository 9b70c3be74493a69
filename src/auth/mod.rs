pub mod credentials;
pub mod token;

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::errors::AppError;
use crate::AppState;
use token::AuthError;

/// Authenticated caller, inserted into request extensions by [`require_bearer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser(pub String);

/// Middleware: validates `Authorization: Bearer <token>` and attaches the
/// caller's username. Whether an unknown subject is a 401 here or a 403 at
/// the route depends on `strict_subjects`.
pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&req).ok_or(AuthError::Missing)?;

    let username = if state.config.strict_subjects {
        state.tokens.validate_known(token, &state.policy)?
    } else {
        state.tokens.validate(token)?
    };

    req.extensions_mut().insert(CurrentUser(username));
    Ok(next.run(req).await)
}

fn bearer_token(req: &Request) -> Option<&str> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

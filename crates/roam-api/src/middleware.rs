use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

/// Resolve the bearer token to a user and attach it to the request as
/// `Extension<User>`. First-time users get a profile.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(ApiError::Unauthorized)?;

    let identity = state
        .gateway
        .resolver
        .resolve(bearer.token())
        .await
        .ok_or_else(|| {
            debug!("Rejected bearer token for {} {}", req.method(), req.uri());
            ApiError::Unauthorized
        })?;

    let user = state
        .db(move |db| db.ensure_user(identity.id, &identity.username, &identity.discriminator))
        .await?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

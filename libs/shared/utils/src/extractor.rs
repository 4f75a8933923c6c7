use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::jwt::validate_token;

/// Validates the bearer token and stores the caller in request extensions.
///
/// Browsers cannot set headers on a websocket upgrade, so an `access_token`
/// query parameter is accepted when the header is absent.
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&request)
        .or_else(|| query_token(&request))
        .ok_or_else(|| AppError::Auth("Missing authorization header".to_string()))??;

    let user = validate_token(&token, &config.supabase_jwt_secret)
        .map_err(|e| AppError::Auth(e.to_string()))?;

    debug!("Authenticated request from {}", user.id);
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

fn bearer_token<B>(request: &Request<B>) -> Option<Result<String, AppError>> {
    let header = request.headers().get("Authorization")?;

    Some(
        header
            .to_str()
            .ok()
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::to_string)
            .ok_or_else(|| AppError::Auth("Invalid authorization header format".to_string())),
    )
}

fn query_token<B>(request: &Request<B>) -> Option<Result<String, AppError>> {
    request
        .uri()
        .query()?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "access_token")
        .map(|(_, value)| Ok(value.to_string()))
}

pub async fn extract_user<B>(request: &Request<B>) -> Result<User, AppError> {
    request
        .extensions()
        .get::<User>()
        .cloned()
        .ok_or_else(|| AppError::Auth("User not found in request extensions".to_string()))
}

/// Mutations are limited to clinic staff.
pub fn require_staff(user: &User) -> Result<(), AppError> {
    if user.is_staff() {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "Role {} may not modify clinic data",
            user.role.as_deref().unwrap_or("none")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    use crate::test_utils::TestUser;

    #[test]
    fn token_can_come_from_query_string() {
        let request = Request::builder()
            .uri("/ws/queues/1?view=staff&access_token=abc.def.ghi")
            .body(Body::empty())
            .unwrap();

        assert!(bearer_token(&request).is_none());
        assert_matches!(query_token(&request), Some(Ok(token)) if token == "abc.def.ghi");
    }

    #[test]
    fn malformed_header_is_rejected() {
        let request = Request::builder()
            .uri("/queues")
            .header("Authorization", "Token abc")
            .body(Body::empty())
            .unwrap();

        assert_matches!(bearer_token(&request), Some(Err(AppError::Auth(_))));
    }

    #[test]
    fn patients_are_not_staff() {
        assert!(require_staff(&TestUser::staff("desk@example.com").to_user()).is_ok());
        assert_matches!(
            require_staff(&TestUser::patient("p@example.com").to_user()),
            Err(AppError::Forbidden(_))
        );
    }
}

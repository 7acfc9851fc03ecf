use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use commandrelay_auth::Role;
use commandrelay_core::TargetId;

use crate::context::PrincipalContext;

/// Caller email, set by the upstream gateway after authentication.
pub const PRINCIPAL_EMAIL_HEADER: &str = "x-principal-email";
/// Comma-separated role names.
pub const PRINCIPAL_ROLES_HEADER: &str = "x-principal-roles";

pub async fn principal_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let identity = extract_identity(req.headers())?;
    let roles = extract_roles(req.headers());

    req.extensions_mut()
        .insert(PrincipalContext::new(identity, roles));

    Ok(next.run(req).await)
}

fn extract_identity(headers: &HeaderMap) -> Result<TargetId, StatusCode> {
    let header = headers
        .get(PRINCIPAL_EMAIL_HEADER)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    TargetId::parse(header).map_err(|_| StatusCode::UNAUTHORIZED)
}

fn extract_roles(headers: &HeaderMap) -> Vec<Role> {
    headers
        .get(PRINCIPAL_ROLES_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|raw| raw.split(',').filter_map(Role::parse).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn identity_is_normalized() {
        let mut headers = HeaderMap::new();
        headers.insert(PRINCIPAL_EMAIL_HEADER, HeaderValue::from_static(" Ana@Example.COM "));

        let id = extract_identity(&headers).unwrap();
        assert_eq!(id.as_str(), "ana@example.com");
    }

    #[test]
    fn missing_or_blank_identity_is_unauthorized() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_identity(&headers), Err(StatusCode::UNAUTHORIZED));

        headers.insert(PRINCIPAL_EMAIL_HEADER, HeaderValue::from_static("   "));
        assert_eq!(extract_identity(&headers), Err(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn roles_skip_blank_entries() {
        let mut headers = HeaderMap::new();
        headers.insert(PRINCIPAL_ROLES_HEADER, HeaderValue::from_static("Supervisor, ,observer"));

        assert_eq!(extract_roles(&headers), vec![Role::SUPERVISOR, Role::OBSERVER]);
        assert!(extract_roles(&HeaderMap::new()).is_empty());
    }
}

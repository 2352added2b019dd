use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::AppError;
use crate::models::UserRole;
use crate::services::AppState;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JwtClaims {
    pub sub: String,  // user id
    pub role: String, // student | teacher
    pub sid: String,  // login session token, must match the profile's active_session
    pub exp: usize,
    pub iat: usize,
}

impl JwtClaims {
    pub fn is_teacher(&self) -> bool {
        self.role == UserRole::Teacher.as_str()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    ExpiredToken,
    #[error("Missing authorization token")]
    MissingToken,
    #[error("Invalid token signature")]
    InvalidSignature,
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Unauthorized(err.to_string())
    }
}

#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn generate_token(&self, claims: &JwtClaims) -> Result<String, AuthError> {
        encode(&Header::default(), claims, &self.encoding_key).map_err(|_| AuthError::InvalidToken)
    }

    pub fn validate_token(&self, token: &str) -> Result<JwtClaims, AuthError> {
        decode::<JwtClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::InvalidToken,
            })
    }
}

/// Bearer header, or `access_token` query parameter for EventSource clients.
fn extract_token<'a>(headers: &'a HeaderMap, request: &'a Request) -> Option<&'a str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| {
            request.uri().query().and_then(|query| {
                query
                    .split('&')
                    .find_map(|pair| pair.strip_prefix("access_token="))
            })
        })
}

/// Validates the JWT and enforces the single-login convention.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token(&headers, &request).ok_or(AuthError::MissingToken)?;

    let claims = state.jwt.validate_token(token).map_err(|e| {
        tracing::warn!("JWT validation failed: {}", e);
        e
    })?;

    let profile = match state.profile_service().get(&claims.sub).await {
        Ok(profile) => profile,
        Err(AppError::NotFound(_)) => {
            return Err(AppError::Unauthorized("Unknown user".to_string()));
        }
        Err(e) => {
            tracing::error!("Profile lookup failed for user {}: {}", claims.sub, e);
            return Err(e);
        }
    };

    if profile.active_session.as_deref() != Some(claims.sid.as_str()) {
        tracing::warn!("Rejected superseded session for user {}", claims.sub);
        return Err(AppError::Unauthorized(
            "Session ended: this account signed in elsewhere".to_string(),
        ));
    }

    tracing::debug!("Authenticated user: {} (role: {})", claims.sub, claims.role);

    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

pub async fn teacher_guard_middleware(request: Request, next: Next) -> Result<Response, AppError> {
    if let Some(claims) = request.extensions().get::<JwtClaims>() {
        if claims.is_teacher() {
            return Ok(next.run(request).await);
        }
    }
    tracing::warn!("Access denied: teacher role required");
    Err(AppError::Forbidden("Teacher role required".to_string()))
}

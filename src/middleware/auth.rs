//! Request authentication.
//!
//! Session issuance lives in the external identity service; requests arrive
//! with a JWT it signed. These extractors validate the token and expose the
//! caller's identity and role to handlers. `GuideUser` and `AdminUser` add
//! the role gate on top.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::Json;
use axum_extra::TypedHeader;
use headers::authorization::Bearer;
use headers::Authorization;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::ApiResponse;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Trekker,
    Guide,
}

/// Claims issued by the identity service.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthClaims {
    pub sub: Uuid,
    pub role: Role,
    pub user_type: UserType,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub exp: usize,
}

/// An authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub role: Role,
    pub user_type: UserType,
    pub email: Option<String>,
    pub name: Option<String>,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Caller that must be a guide.
#[derive(Debug, Clone)]
pub struct GuideUser(pub AuthenticatedUser);

/// Caller that must be an admin.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthenticatedUser);

/// Caller identity when present; anonymous requests pass through as `None`.
#[derive(Debug, Clone)]
pub struct OptionalUser(pub Option<AuthenticatedUser>);

type AuthRejection = (StatusCode, Json<ApiResponse<()>>);

fn reject(status: StatusCode, message: &str) -> AuthRejection {
    (status, Json(ApiResponse::err(message)))
}

fn decode_user(token: &str, secret: &str) -> Result<AuthenticatedUser, AuthRejection> {
    let data = decode::<AuthClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| reject(StatusCode::UNAUTHORIZED, "Token inválido ou expirado"))?;

    let claims = data.claims;
    Ok(AuthenticatedUser {
        id: claims.sub,
        role: claims.role,
        user_type: claims.user_type,
        email: claims.email,
        name: claims.name,
    })
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| reject(StatusCode::UNAUTHORIZED, "Autenticação necessária"))?;
        decode_user(bearer.token(), &state.jwt_secret)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for GuideUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;
        if user.user_type != UserType::Guide {
            return Err(reject(StatusCode::FORBIDDEN, "Acesso restrito a guias"));
        }
        Ok(GuideUser(user))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;
        if user.role != Role::Admin {
            return Err(reject(
                StatusCode::FORBIDDEN,
                "Acesso restrito a administradores",
            ));
        }
        Ok(AdminUser(user))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for OptionalUser {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(OptionalUser(
            AuthenticatedUser::from_request_parts(parts, state).await.ok(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, role: Role, user_type: UserType) -> String {
        let claims = AuthClaims {
            sub: Uuid::new_v4(),
            role,
            user_type,
            email: Some("trekker@example.com".to_string()),
            name: Some("Test".to_string()),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn decodes_valid_token() {
        let t = token("s3cret", Role::User, UserType::Trekker);
        let user = decode_user(&t, "s3cret").unwrap();
        assert_eq!(user.role, Role::User);
        assert_eq!(user.user_type, UserType::Trekker);
    }

    #[test]
    fn rejects_wrong_secret() {
        let t = token("s3cret", Role::User, UserType::Trekker);
        assert!(decode_user(&t, "other").is_err());
    }

    #[test]
    fn rejects_garbage_token() {
        assert!(decode_user("not-a-jwt", "s3cret").is_err());
    }
}

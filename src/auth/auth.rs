use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload};
use futures::future::{Ready, ready};

use crate::auth::account::AccountStatus;
use crate::error::AppError;
use crate::model::role::Role;
use crate::models::{Claims, TokenType};

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: u64,
    pub username: String,
    pub role: Role,
}

impl AuthUser {
    /// Accepts an access token only for an existing, active account.
    /// The role comes from the stored account, not from the token.
    pub fn resolve(claims: Claims, account: Option<AccountStatus>) -> Result<Self, AppError> {
        if claims.token_type != TokenType::Access {
            return Err(AppError::unauthorized("Access token required"));
        }

        let Some(account) = account else {
            return Err(AppError::unauthorized("User not found"));
        };

        if !account.is_active {
            return Err(AppError::unauthorized("Inactive user"));
        }

        Ok(AuthUser {
            user_id: claims.user_id,
            username: claims.sub,
            role: account.role,
        })
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.role.can_administer() {
            Ok(())
        } else {
            Err(AppError::forbidden("Admin only"))
        }
    }

    pub fn require_manager(&self) -> Result<(), AppError> {
        if self.role.can_manage() {
            Ok(())
        } else {
            Err(AppError::forbidden("Not enough permissions"))
        }
    }

    /// Owners may always act on their own records; managers on anyone's.
    pub fn require_owner_or_manager(&self, owner_id: u64) -> Result<(), AppError> {
        if self.user_id == owner_id || self.role.can_manage() {
            Ok(())
        } else {
            Err(AppError::forbidden("Not enough permissions"))
        }
    }
}

pub fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// Only the auth middleware creates an `AuthUser`; handlers outside its
/// scope get a 401.
impl FromRequest for AuthUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let result: Result<Self, Self::Error> = req
            .extensions()
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| AppError::unauthorized("Not authenticated").into());

        ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    fn claims(token_type: TokenType, role: Role) -> Claims {
        Claims {
            user_id: 10,
            sub: "jane".into(),
            role: role.id(),
            exp: usize::MAX,
            jti: "test-jti".into(),
            token_type,
        }
    }

    fn account(role: Role, is_active: bool) -> Option<AccountStatus> {
        Some(AccountStatus { role, is_active })
    }

    fn user(role: Role) -> AuthUser {
        AuthUser {
            user_id: 10,
            username: "jane".into(),
            role,
        }
    }

    #[test]
    fn capability_checks() {
        assert!(user(Role::Employee).require_manager().is_err());
        assert!(user(Role::Manager).require_manager().is_ok());
        assert!(user(Role::Manager).require_admin().is_err());
        assert!(user(Role::Admin).require_admin().is_ok());

        assert!(user(Role::Employee).require_owner_or_manager(10).is_ok());
        assert!(user(Role::Employee).require_owner_or_manager(11).is_err());
        assert!(user(Role::Manager).require_owner_or_manager(11).is_ok());
    }

    #[test]
    fn active_account_resolves() {
        let auth = AuthUser::resolve(claims(TokenType::Access, Role::Manager), account(Role::Manager, true)).unwrap();
        assert_eq!(auth.user_id, 10);
        assert_eq!(auth.username, "jane");
        assert_eq!(auth.role, Role::Manager);
    }

    #[test]
    fn deactivated_account_is_refused_with_a_live_token() {
        let err = AuthUser::resolve(claims(TokenType::Access, Role::Employee), account(Role::Employee, false))
            .unwrap_err();
        assert_eq!(err.to_string(), "Inactive user");
    }

    #[test]
    fn demoted_manager_loses_rights_before_token_expiry() {
        let auth = AuthUser::resolve(claims(TokenType::Access, Role::Manager), account(Role::Employee, true)).unwrap();
        assert_eq!(auth.role, Role::Employee);
        assert!(auth.require_manager().is_err());
    }

    #[test]
    fn deleted_account_is_refused() {
        let err = AuthUser::resolve(claims(TokenType::Access, Role::Admin), None).unwrap_err();
        assert_eq!(err.to_string(), "User not found");
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let err = AuthUser::resolve(claims(TokenType::Refresh, Role::Employee), account(Role::Employee, true))
            .unwrap_err();
        assert_eq!(err.to_string(), "Access token required");
    }

    #[actix_web::test]
    async fn extracts_user_stored_by_middleware() {
        let req = TestRequest::default().to_http_request();
        req.extensions_mut().insert(user(Role::Manager));

        let auth = AuthUser::extract(&req).await.unwrap();
        assert_eq!(auth.role, Role::Manager);
    }

    #[actix_web::test]
    async fn unauthenticated_request_is_rejected() {
        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer not-checked-here"))
            .to_http_request();
        assert!(AuthUser::extract(&req).await.is_err());
    }
}

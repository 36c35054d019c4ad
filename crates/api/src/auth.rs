//! Caller identity forwarded by the upstream auth layer.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::{Role, UserId};

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// The authenticated caller, read from trusted headers.
///
/// A missing role header means `customer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub role: Role,
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, USER_ID_HEADER)?
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {USER_ID_HEADER} header")))?
            .trim()
            .parse::<UserId>()
            .map_err(|_| ApiError::Unauthorized(format!("{USER_ID_HEADER} is not a valid id")))?;
        let role = match header(parts, USER_ROLE_HEADER)? {
            Some(raw) => raw
                .parse::<Role>()
                .map_err(|e| ApiError::Unauthorized(e.to_string()))?,
            None => Role::Customer,
        };

        Ok(Caller { user_id, role })
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<Option<&'a str>, ApiError> {
    parts
        .headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| ApiError::Unauthorized(format!("{name} is not valid text")))
        })
        .transpose()
}

/// A caller that must hold the admin role.
#[derive(Debug, Clone, Copy)]
pub struct Admin(pub Caller);

impl<S: Send + Sync> FromRequestParts<S> for Admin {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let caller = Caller::from_request_parts(parts, state).await?;
        if !caller.role.is_admin() {
            tracing::warn!(user_id = %caller.user_id, "non-admin caller rejected");
            return Err(ApiError::Forbidden("admin role required".to_string()));
        }
        Ok(Admin(caller))
    }
}

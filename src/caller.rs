//! Caller identity forwarded by the authenticating gateway.
//!
//! Tokens are verified upstream; requests reach this service with the
//! resolved member id in `x-member-id` and, for administrators,
//! `x-member-role: admin`.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};

use crate::error::{EngagementError, Result};

pub const MEMBER_ID_HEADER: &str = "x-member-id";
pub const MEMBER_ROLE_HEADER: &str = "x-member-role";

/// Possibly anonymous caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Caller {
    pub member: Option<i64>,
    pub admin: bool,
}

impl Caller {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let member = headers
            .get(MEMBER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|id| *id > 0);
        let admin = member.is_some()
            && headers
                .get(MEMBER_ROLE_HEADER)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|role| role.eq_ignore_ascii_case("admin"));
        Self { member, admin }
    }

    /// Member id, or `Unauthenticated` for anonymous callers
    pub fn member(&self) -> Result<i64> {
        self.member.ok_or(EngagementError::Unauthenticated)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = EngagementError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        Ok(Caller::from_headers(&parts.headers))
    }
}

/// Caller holding the administrator role
#[derive(Debug, Clone, Copy)]
pub struct Admin {
    pub member: i64,
}

#[async_trait]
impl<S> FromRequestParts<S> for Admin
where
    S: Send + Sync,
{
    type Rejection = EngagementError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let caller = Caller::from_headers(&parts.headers);
        let member = caller.member()?;
        if !caller.admin {
            return Err(EngagementError::Forbidden);
        }
        Ok(Admin { member })
    }
}

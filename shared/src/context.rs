//! Request context handed to both services by the authenticating gateway.
//!
//! Token validation happens upstream; the services trust `X-Tenant-Id` and
//! `X-Role` and only forward the bearer token when calling each other.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request},
    http::{request::Parts, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
pub const TENANT_ID_HEADER: &str = "x-tenant-id";
pub const ROLE_HEADER: &str = "x-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    PubOwner,
    Staff,
    Customer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::PubOwner => "PubOwner",
            Role::Staff => "Staff",
            Role::Customer => "Customer",
        }
    }

    pub fn can_manage_stock(self) -> bool {
        matches!(self, Role::Admin | Role::PubOwner)
    }

    pub fn can_manage_orders(self) -> bool {
        matches!(self, Role::Admin | Role::PubOwner | Role::Staff)
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "pubowner" => Ok(Role::PubOwner),
            "staff" => Ok(Role::Staff),
            "customer" => Ok(Role::Customer),
            _ => Err(()),
        }
    }
}

/// Authenticated caller: tenant, role, and the raw authorization header.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub role: Role,
    pub authorization: Option<String>,
}

impl TenantContext {
    pub fn new(tenant_id: Uuid, role: Role) -> Self {
        Self {
            tenant_id,
            role,
            authorization: None,
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant_id = header_str(&parts.headers, TENANT_ID_HEADER)
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({ "error": "missing or invalid tenant" })),
                )
            })?;
        let role = header_str(&parts.headers, ROLE_HEADER)
            .and_then(|v| v.parse().ok())
            .unwrap_or(Role::Customer);
        let authorization = header_str(&parts.headers, "authorization").map(str::to_string);

        Ok(Self {
            tenant_id,
            role,
            authorization,
        })
    }
}

/// Opaque trace identifier forwarded unchanged through every hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Uses the supplied value, or generates one if it is blank.
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() => Self(v.to_string()),
            _ => Self::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<CorrelationId>() {
            return Ok(id.clone());
        }
        Ok(Self::from_header(header_str(&parts.headers, CORRELATION_ID_HEADER)))
    }
}

/// Middleware: resolves the correlation id once per request and echoes it back.
pub async fn propagate_correlation_id(mut request: Request, next: Next) -> Response {
    let id = CorrelationId::from_header(header_str(request.headers(), CORRELATION_ID_HEADER));
    request.extensions_mut().insert(id.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(id.as_str()) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_id_is_generated_when_blank() {
        let id = CorrelationId::from_header(Some("   "));
        assert_eq!(id.as_str().len(), 32);
        assert_eq!(CorrelationId::from_header(Some("abc")).as_str(), "abc");
    }

    #[test]
    fn parses_roles_case_insensitively() {
        assert_eq!("PubOwner".parse::<Role>(), Ok(Role::PubOwner));
        assert_eq!("STAFF".parse::<Role>(), Ok(Role::Staff));
        assert!("root".parse::<Role>().is_err());
        assert!(!Role::Staff.can_manage_stock());
        assert!(Role::Staff.can_manage_orders());
    }
}

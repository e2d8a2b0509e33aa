use async_trait::async_trait;
use reqwest::StatusCode;
use shared::context::{CORRELATION_ID_HEADER, ROLE_HEADER, TENANT_ID_HEADER};
use shared::{CorrelationId, ReserveConflict, ReserveRequest, ReserveResponse, TenantContext};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Closed set of reservation failures seen by the order service.
#[derive(Debug, Clone, Error)]
pub enum ReservationError {
    #[error("reservation rejected: {0}")]
    Validation(String),

    #[error("not enough stock: {0}")]
    Conflict(ReserveConflict),

    #[error("inventory reserve timed out: {0}")]
    Timeout(String),

    #[error("inventory service unreachable: {0}")]
    Unreachable(String),

    #[error("inventory reserve failed: {0}")]
    BadGateway(String),
}

/// Synchronous call into the stock ledger.
#[async_trait]
pub trait ReservationClient: Send + Sync {
    async fn reserve(
        &self,
        tenant: &TenantContext,
        correlation_id: &CorrelationId,
        request: &ReserveRequest,
    ) -> Result<ReserveResponse, ReservationError>;
}

pub struct HttpReservationClient {
    http: reqwest::Client,
    reserve_url: String,
}

impl HttpReservationClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            http,
            reserve_url: format!("{}/api/inventory/reserve", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl ReservationClient for HttpReservationClient {
    async fn reserve(
        &self,
        tenant: &TenantContext,
        correlation_id: &CorrelationId,
        request: &ReserveRequest,
    ) -> Result<ReserveResponse, ReservationError> {
        let mut builder = self
            .http
            .post(&self.reserve_url)
            .header(TENANT_ID_HEADER, tenant.tenant_id.to_string())
            .header(ROLE_HEADER, tenant.role.as_str())
            .header(CORRELATION_ID_HEADER, correlation_id.as_str())
            .json(request);
        if let Some(authorization) = &tenant.authorization {
            builder = builder.header(reqwest::header::AUTHORIZATION, authorization);
        }

        let response = builder.send().await.map_err(classify_transport)?;
        let status = response.status();
        let body = response.text().await.map_err(classify_transport)?;
        debug!(%status, "Inventory reserve answered");

        interpret_response(status, &body)
    }
}

fn classify_transport(e: reqwest::Error) -> ReservationError {
    if e.is_timeout() {
        ReservationError::Timeout(e.to_string())
    } else {
        ReservationError::Unreachable(e.to_string())
    }
}

/// Maps the ledger's HTTP answer onto the reservation outcome.
pub fn interpret_response(status: StatusCode, body: &str) -> Result<ReserveResponse, ReservationError> {
    match status {
        s if s.is_success() => serde_json::from_str(body).map_err(|e| {
            ReservationError::BadGateway(format!("unreadable reserve response: {}", e))
        }),
        StatusCode::CONFLICT => Err(ReservationError::Conflict(
            serde_json::from_str(body).unwrap_or_else(|_| ReserveConflict {
                error: body.to_string(),
                sku: String::new(),
                available: None,
            }),
        )),
        StatusCode::BAD_REQUEST => Err(ReservationError::Validation(body.to_string())),
        other => Err(ReservationError::BadGateway(format!("{}: {}", other, body))),
    }
}

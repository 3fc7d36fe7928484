use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use super::{AccrualOracle, OracleError, OracleOutcome};
use crate::Amount;
use crate::config::OracleConfig;
use crate::model::{OrderNumber, OrderStatus};

/// Body of `GET /api/orders/{number}`.
#[derive(Debug, Deserialize)]
struct AccrualResponse {
    order: String,
    status: String,
    #[serde(default)]
    accrual: Option<Decimal>,
}

/// Oracle client speaking the accrual HTTP protocol.
#[derive(Debug, Clone)]
pub struct HttpOracle {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOracle {
    pub fn new(config: &OracleConfig) -> Result<Self, reqwest::Error> {
        // The oracle has no contractual timeout, so every request gets ours.
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn order_url(&self, order: &OrderNumber) -> String {
        format!("{}/api/orders/{}", self.base_url, order)
    }
}

#[async_trait]
impl AccrualOracle for HttpOracle {
    async fn lookup(&self, order: &OrderNumber) -> OracleOutcome {
        let response = match self.client.get(self.order_url(order)).send().await {
            Ok(response) => response,
            Err(e) => return OracleOutcome::failed(transport_error(&e)),
        };

        let status = response.status();
        debug!(order = %order, status = status.as_u16(), "oracle responded");

        match status {
            StatusCode::OK => {}
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = parse_retry_after(response.headers());
                // Drain so the connection can be reused.
                let _ = response.bytes().await;
                return OracleOutcome::RateLimited { retry_after };
            }
            StatusCode::NO_CONTENT => return OracleOutcome::failed(OracleError::NotRegistered),
            other => return OracleOutcome::failed(OracleError::UnexpectedStatus(other.as_u16())),
        }

        match response.bytes().await {
            Ok(body) => parse_accrual_body(order, &body),
            Err(e) => OracleOutcome::failed(transport_error(&e)),
        }
    }
}

fn transport_error(err: &reqwest::Error) -> OracleError {
    if err.is_timeout() {
        OracleError::Timeout
    } else {
        OracleError::Network(err.to_string())
    }
}

/// `Retry-After` in delta-seconds; HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Classify a `200 OK` body for `order`.
pub fn parse_accrual_body(order: &OrderNumber, body: &[u8]) -> OracleOutcome {
    let response: AccrualResponse = match serde_json::from_slice(body) {
        Ok(response) => response,
        Err(e) => return OracleOutcome::failed(OracleError::MalformedBody(e.to_string())),
    };

    if response.order != order.as_str() {
        return OracleOutcome::failed(OracleError::OrderMismatch {
            expected: order.to_string(),
            received: response.order,
        });
    }

    match response.status.parse::<OrderStatus>() {
        Ok(status @ (OrderStatus::Registered | OrderStatus::Processing)) => {
            OracleOutcome::Pending(status)
        }
        Ok(OrderStatus::Invalid) => OracleOutcome::Settled {
            status: OrderStatus::Invalid,
            accrual: Amount::ZERO,
        },
        Ok(OrderStatus::Processed) => match response.accrual.map(Amount::from) {
            Some(accrual) if accrual.is_negative() => {
                OracleOutcome::failed(OracleError::NegativeAccrual(accrual.to_string()))
            }
            Some(accrual) => OracleOutcome::Settled {
                status: OrderStatus::Processed,
                accrual,
            },
            None => OracleOutcome::failed(OracleError::MissingAccrual),
        },
        // NEW is a local status only; the oracle never reports it.
        Ok(OrderStatus::New) | Err(_) => {
            OracleOutcome::failed(OracleError::UnknownStatus(response.status))
        }
    }
}

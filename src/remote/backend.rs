use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::location::GeoPoint;
use crate::models::order::Order;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptResponse {
    pub success: bool,
    #[serde(default)]
    pub order: Option<Order>,
}

/// The system of record for orders. `accept_order` must be an atomic
/// compare-and-set on the assigned partner; the lifecycle calls validate
/// against the same transition table as the local state machine.
#[async_trait]
pub trait OrderBackend: Send + Sync {
    async fn accept_order(&self, order_id: Uuid, partner_id: Uuid)
    -> Result<AcceptResponse, AppError>;

    async fn pickup_order(
        &self,
        order_id: Uuid,
        partner_id: Uuid,
        location: GeoPoint,
    ) -> Result<Order, AppError>;

    async fn mark_delivered(
        &self,
        order_id: Uuid,
        partner_id: Uuid,
        location: GeoPoint,
    ) -> Result<Order, AppError>;

    async fn confirm_receipt(&self, order_id: Uuid) -> Result<Order, AppError>;

    async fn cancel_order(&self, order_id: Uuid, reason: Option<String>)
    -> Result<Order, AppError>;

    async fn fetch_order(&self, order_id: Uuid) -> Result<Order, AppError>;

    async fn available_orders(&self, branch_id: Uuid) -> Result<Vec<Order>, AppError>;
}

pub struct HttpOrderBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOrderBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::Internal(format!("failed to build http client: {err}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, AppError> {
        let response = self.client.post(self.url(path)).json(&body).send().await?;
        decode(response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, AppError> {
        let response = self.client.get(self.url(path)).send().await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, AppError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|err| AppError::Transport(format!("malformed backend response: {err}")));
    }

    let detail = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => AppError::NotFound(detail),
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => AppError::Rejected(detail),
        other => AppError::Transport(format!("backend returned {other}: {detail}")),
    })
}

#[async_trait]
impl OrderBackend for HttpOrderBackend {
    async fn accept_order(
        &self,
        order_id: Uuid,
        partner_id: Uuid,
    ) -> Result<AcceptResponse, AppError> {
        self.post(
            &format!("/orders/{order_id}/accept"),
            json!({ "partner_id": partner_id }),
        )
        .await
    }

    async fn pickup_order(
        &self,
        order_id: Uuid,
        partner_id: Uuid,
        location: GeoPoint,
    ) -> Result<Order, AppError> {
        self.post(
            &format!("/orders/{order_id}/pickup"),
            json!({ "partner_id": partner_id, "location": location }),
        )
        .await
    }

    async fn mark_delivered(
        &self,
        order_id: Uuid,
        partner_id: Uuid,
        location: GeoPoint,
    ) -> Result<Order, AppError> {
        self.post(
            &format!("/orders/{order_id}/deliver"),
            json!({ "partner_id": partner_id, "location": location }),
        )
        .await
    }

    async fn confirm_receipt(&self, order_id: Uuid) -> Result<Order, AppError> {
        self.post(&format!("/orders/{order_id}/confirm"), json!({}))
            .await
    }

    async fn cancel_order(
        &self,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<Order, AppError> {
        self.post(
            &format!("/orders/{order_id}/cancel"),
            json!({ "reason": reason }),
        )
        .await
    }

    async fn fetch_order(&self, order_id: Uuid) -> Result<Order, AppError> {
        self.get(&format!("/orders/{order_id}")).await
    }

    async fn available_orders(&self, branch_id: Uuid) -> Result<Vec<Order>, AppError> {
        self.get(&format!("/branches/{branch_id}/orders/available"))
            .await
    }
}

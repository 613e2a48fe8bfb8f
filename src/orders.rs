use crate::types::{
    Address, CancelAck, CancelRequest, OrderAck, OrderBookSnapshot, OrderIntent,
    OrderServiceConfig, RemoteServiceError, ServiceEndpoints, Side, WithdrawalAck,
    WithdrawalRequest,
};
use async_trait::async_trait;
use log::{debug, error};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT},
    multipart, Client, RequestBuilder,
};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

/// Trait for talking to the remote matching service
///
/// Plain request/response. Nothing is retried: the service is not known to
/// be idempotent, so a resend could place a second order.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn place_order(&self, intent: &OrderIntent) -> Result<OrderAck, RemoteServiceError>;

    async fn cancel_order(
        &self,
        order_id: &str,
        side: Side,
        base_asset: &str,
        quote_asset: &str,
    ) -> Result<CancelAck, RemoteServiceError>;

    async fn fetch_order_book(&self, symbol: &str) -> Result<OrderBookSnapshot, RemoteServiceError>;

    async fn request_withdrawal(
        &self,
        account: &Address,
        asset: &str,
        amount: &str,
    ) -> Result<WithdrawalAck, RemoteServiceError>;
}

/// Order service over HTTP/JSON
pub struct HttpOrderGateway {
    client: Client,
    base_url: String,
    endpoints: ServiceEndpoints,
}

impl HttpOrderGateway {
    pub fn new(config: &OrderServiceConfig) -> Result<Self, RemoteServiceError> {
        let base_url = config.active_base_url().trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| RemoteServiceError::Transport {
                endpoint: base_url.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url,
            endpoints: config.endpoints.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    async fn post_json<B, R>(&self, endpoint: &str, body: &B) -> Result<R, RemoteServiceError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let request = self.client.post(self.url(endpoint)).json(body);
        self.send(endpoint, request).await
    }

    async fn send<R: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: RequestBuilder,
    ) -> Result<R, RemoteServiceError> {
        debug!("POST {}", self.url(endpoint));

        let response = request.send().await.map_err(|e| {
            error!("Order service request to {} failed: {}", endpoint, e);
            RemoteServiceError::Transport {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteServiceError::Transport {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;

        if !status.is_success() {
            error!("Order service returned {} for {}: {}", status, endpoint, body);
            return Err(RemoteServiceError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| RemoteServiceError::Malformed {
            endpoint: endpoint.to_string(),
            body,
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl OrderGateway for HttpOrderGateway {
    async fn place_order(&self, intent: &OrderIntent) -> Result<OrderAck, RemoteServiceError> {
        self.post_json(&self.endpoints.limit_order, intent).await
    }

    async fn cancel_order(
        &self,
        order_id: &str,
        side: Side,
        base_asset: &str,
        quote_asset: &str,
    ) -> Result<CancelAck, RemoteServiceError> {
        let request = CancelRequest {
            order_id: order_id.to_string(),
            side,
            base_asset: base_asset.to_string(),
            quote_asset: quote_asset.to_string(),
        };
        self.post_json(&self.endpoints.cancel_order, &request).await
    }

    async fn fetch_order_book(&self, symbol: &str) -> Result<OrderBookSnapshot, RemoteServiceError> {
        let endpoint = &self.endpoints.order_book;
        let payload = serde_json::json!({ "symbol": symbol }).to_string();
        let form = multipart::Form::new().text("payload", payload);

        let request = self.client.post(self.url(endpoint)).multipart(form);
        self.send(endpoint, request).await
    }

    async fn request_withdrawal(
        &self,
        account: &Address,
        asset: &str,
        amount: &str,
    ) -> Result<WithdrawalAck, RemoteServiceError> {
        let request = WithdrawalRequest {
            account: account.clone(),
            asset: asset.to_string(),
            amount: amount.to_string(),
        };
        self.post_json(&self.endpoints.initiate_withdrawal, &request).await
    }
}

//! HTTP balance provider
//!
//! Endpoints, relative to the base URL:
//! - `GET  /accounts/{ref}` -> `{"balance": f64}`
//! - `GET  /accounts/{ref}/transactions?start_date=YYYY-MM-DD` -> `{"items": [...]}`
//! - `POST /accounts/{ref}/adjustments` with `{"amount", "description"}`
//! - `GET  /accounts/{ref}/status` -> `{"active": bool}`

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{AdjustmentReceipt, BalanceProvider};
use crate::error::Result;
use crate::models::TransactionRecord;

#[derive(Deserialize)]
struct BalanceResponse {
    #[serde(default)]
    balance: f64,
}

#[derive(Deserialize)]
struct TransactionsResponse {
    #[serde(default)]
    items: Vec<TransactionRecord>,
}

#[derive(Deserialize)]
struct StatusResponse {
    #[serde(default)]
    active: bool,
}

/// Adjustment acknowledgement; every field is optional
#[derive(Deserialize, Default)]
#[serde(default)]
struct AdjustmentResponse {
    id: Option<String>,
    amount: Option<f64>,
    description: Option<String>,
}

#[derive(Serialize)]
struct AdjustmentRequest<'a> {
    amount: f64,
    description: &'a str,
}

/// REST client for the balance provider
#[derive(Clone)]
pub struct HttpProvider {
    http_client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpProvider {
    /// Create a client with a per-request timeout
    pub fn new(base_url: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(|k| k.to_string()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// The API key is sent as the basic-auth username
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.basic_auth(key, None::<&str>),
            None => request,
        }
    }
}

#[async_trait]
impl BalanceProvider for HttpProvider {
    async fn get_balance(&self, external_ref: &str) -> Result<f64> {
        let response = self
            .authorize(self.http_client.get(self.url(&format!("accounts/{}", external_ref))))
            .send()
            .await?
            .error_for_status()?;

        let body: BalanceResponse = response.json().await?;
        debug!(external_ref, balance = body.balance, "Fetched provider balance");
        Ok(body.balance)
    }

    async fn get_transactions(
        &self,
        external_ref: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TransactionRecord>> {
        let start_date = since.format("%Y-%m-%d").to_string();
        let response = self
            .authorize(
                self.http_client
                    .get(self.url(&format!("accounts/{}/transactions", external_ref)))
                    .query(&[("start_date", start_date.as_str())]),
            )
            .send()
            .await?
            .error_for_status()?;

        let body: TransactionsResponse = response.json().await?;
        // start_date has day granularity; trim to the exact instant
        Ok(body
            .items
            .into_iter()
            .filter(|t| t.created_at >= since)
            .collect())
    }

    async fn create_adjustment(
        &self,
        external_ref: &str,
        amount: f64,
        description: &str,
    ) -> Result<AdjustmentReceipt> {
        let response = self
            .authorize(
                self.http_client
                    .post(self.url(&format!("accounts/{}/adjustments", external_ref)))
                    .json(&AdjustmentRequest {
                        amount,
                        description,
                    }),
            )
            .send()
            .await?
            .error_for_status()?;

        // Any 2xx means the provider applied the adjustment, whatever the body
        let body = response.text().await.unwrap_or_default();
        let ack = match serde_json::from_str::<AdjustmentResponse>(&body) {
            Ok(ack) => ack,
            Err(e) => {
                warn!(external_ref, "Unrecognized adjustment acknowledgement: {}", e);
                AdjustmentResponse::default()
            }
        };

        Ok(AdjustmentReceipt {
            id: ack.id,
            amount: ack.amount.unwrap_or(amount),
            description: ack
                .description
                .unwrap_or_else(|| description.to_string()),
        })
    }

    async fn verify_reachable(&self, external_ref: &str) -> bool {
        let request = self.authorize(
            self.http_client
                .get(self.url(&format!("accounts/{}/status", external_ref))),
        );
        let response = match request.send().await.and_then(|r| r.error_for_status()) {
            Ok(response) => response,
            Err(e) => {
                warn!(external_ref, "Provider status check failed: {}", e);
                return false;
            }
        };
        match response.json::<StatusResponse>().await {
            Ok(status) => status.active,
            Err(e) => {
                warn!(external_ref, "Unreadable provider status: {}", e);
                false
            }
        }
    }

    fn host(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::test_utils::MockProviderServer;
    use chrono::Duration as ChronoDuration;

    fn client(server: &MockProviderServer) -> HttpProvider {
        HttpProvider::new(&server.url(), Some("secret"), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_balance_and_status() {
        let server = MockProviderServer::start().await;
        server.set_balance("acc_1", 120.5);

        let provider = client(&server);
        assert_eq!(provider.get_balance("acc_1").await.unwrap(), 120.5);
        assert!(provider.verify_reachable("acc_1").await);
        assert!(!provider.verify_reachable("missing").await);
        assert!(matches!(
            provider.get_balance("missing").await,
            Err(Error::Http(_))
        ));
    }

    #[tokio::test]
    async fn test_transactions_filtered_by_since() {
        let server = MockProviderServer::start().await;
        server.set_balance("acc_1", 0.0);
        let now = Utc::now();
        server.push_transaction("acc_1", 5.0, now - ChronoDuration::hours(2));
        server.push_transaction("acc_1", 7.0, now - ChronoDuration::days(40));

        let provider = client(&server);
        let txns = provider
            .get_transactions("acc_1", now - ChronoDuration::days(30))
            .await
            .unwrap();
        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].amount, 5.0);
    }

    #[tokio::test]
    async fn test_adjustment_posts_body() {
        let server = MockProviderServer::start().await;
        server.set_balance("acc_1", 10.0);

        let provider = client(&server);
        let receipt = provider
            .create_adjustment("acc_1", -2.5, "test adjustment")
            .await
            .unwrap();
        assert_eq!(receipt.amount, -2.5);
        assert_eq!(server.adjustments(), vec![("acc_1".to_string(), -2.5)]);
        // basic auth with the API key as username: base64("secret:")
        assert_eq!(
            server.last_authorization().as_deref(),
            Some("Basic c2VjcmV0Og==")
        );
    }

    #[tokio::test]
    async fn test_adjustment_accepted_without_receipt_fields() {
        let server = MockProviderServer::start().await;
        server.set_balance("acc_1", 10.0);
        server.set_adjustment_reply(serde_json::json!({ "id": "adj_99" }));

        let provider = client(&server);
        let receipt = provider
            .create_adjustment("acc_1", 4.25, "manual fix")
            .await
            .unwrap();
        assert_eq!(receipt.id.as_deref(), Some("adj_99"));
        assert_eq!(receipt.amount, 4.25);
        assert_eq!(receipt.description, "manual fix");

        // Bodies that are not JSON objects still count as accepted
        server.set_adjustment_reply(serde_json::json!("ok"));
        let receipt = provider
            .create_adjustment("acc_1", -1.0, "second")
            .await
            .unwrap();
        assert_eq!(receipt.id, None);
        assert_eq!(receipt.amount, -1.0);
        assert_eq!(server.adjustments().len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_host() {
        let provider =
            HttpProvider::new("http://127.0.0.1:9", None, Duration::from_millis(200)).unwrap();
        assert!(!provider.verify_reachable("acc").await);
        assert!(provider.get_balance("acc").await.is_err());
    }
}

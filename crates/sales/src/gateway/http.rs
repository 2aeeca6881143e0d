use std::time::Duration;

use async_trait::async_trait;
use common::{ApiResponse, ProductId, ProductResponse, StockChangeRequest};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

use super::{InventoryGateway, ProductLookup, Release, Reservation, StockCheck, unavailable};

/// Message the inventory service answers a refused decrement with.
const INSUFFICIENT_STOCK_MESSAGE: &str = "Insufficient stock";

/// Inventory gateway over the inventory service's HTTP API.
///
/// Every request carries the service bearer token and is bounded by the
/// client timeout.
#[derive(Clone)]
pub struct HttpInventoryGateway {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpInventoryGateway {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> Result<Response, String> {
        self.client
            .get(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))
    }

    async fn post(&self, path: &str, body: &StockChangeRequest) -> Result<Response, String> {
        self.client
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))
    }
}

/// Decodes an envelope and returns its payload.
async fn payload<T: DeserializeOwned>(response: Response) -> Result<T, String> {
    let envelope: ApiResponse<T> = response
        .json()
        .await
        .map_err(|e| format!("malformed response: {e}"))?;
    envelope
        .into_data()
        .ok_or_else(|| "response carried no data".to_string())
}

/// Reads the envelope message of a failed response, if it has one.
async fn failure_message(response: Response) -> Option<String> {
    response
        .json::<ApiResponse<serde_json::Value>>()
        .await
        .ok()
        .map(|envelope| envelope.message)
}

fn unexpected_status(status: StatusCode) -> String {
    format!("unexpected status {status}")
}

#[async_trait]
impl InventoryGateway for HttpInventoryGateway {
    #[tracing::instrument(skip(self), fields(product_id = %id))]
    async fn fetch_product(&self, id: ProductId) -> ProductLookup {
        let response = match self.get(&format!("/products/{id}")).await {
            Ok(response) => response,
            Err(reason) => return ProductLookup::Unavailable(unavailable("fetch_product", reason)),
        };

        match response.status() {
            StatusCode::NOT_FOUND => ProductLookup::NotFound,
            status if status.is_success() => match payload(response).await {
                Ok(product) => ProductLookup::Found(product),
                Err(reason) => ProductLookup::Unavailable(unavailable("fetch_product", reason)),
            },
            status => {
                ProductLookup::Unavailable(unavailable("fetch_product", unexpected_status(status)))
            }
        }
    }

    #[tracing::instrument(skip(self), fields(product_id = %id))]
    async fn check_stock(&self, id: ProductId, quantity: u32) -> StockCheck {
        let path = format!("/products/{id}/validate-stock/{quantity}");
        let response = match self.get(&path).await {
            Ok(response) => response,
            Err(reason) => return StockCheck::Unavailable(unavailable("check_stock", reason)),
        };

        let status = response.status();
        if !status.is_success() {
            return StockCheck::Unavailable(unavailable("check_stock", unexpected_status(status)));
        }

        match payload::<bool>(response).await {
            Ok(true) => StockCheck::Available,
            Ok(false) => StockCheck::Insufficient,
            Err(reason) => StockCheck::Unavailable(unavailable("check_stock", reason)),
        }
    }

    #[tracing::instrument(skip(self, reason), fields(product_id = %id))]
    async fn reserve_stock(
        &self,
        id: ProductId,
        quantity: u32,
        key: &str,
        reason: &str,
    ) -> Reservation {
        let body = StockChangeRequest {
            quantity: i64::from(quantity),
            reason: Some(reason.to_string()),
            reservation_key: Some(key.to_string()),
        };
        let response = match self.post(&format!("/products/{id}/update-stock"), &body).await {
            Ok(response) => response,
            Err(reason) => return Reservation::Unavailable(unavailable("reserve_stock", reason)),
        };

        match response.status() {
            StatusCode::NOT_FOUND => Reservation::NotFound,
            StatusCode::BAD_REQUEST => match failure_message(response).await {
                Some(message) if message == INSUFFICIENT_STOCK_MESSAGE => Reservation::Insufficient,
                Some(message) => {
                    Reservation::Unavailable(unavailable("reserve_stock", format!("rejected: {message}")))
                }
                None => Reservation::Unavailable(unavailable(
                    "reserve_stock",
                    unexpected_status(StatusCode::BAD_REQUEST),
                )),
            },
            status if status.is_success() => match payload::<bool>(response).await {
                Ok(true) => Reservation::Reserved,
                Ok(false) => Reservation::Insufficient,
                Err(reason) => Reservation::Unavailable(unavailable("reserve_stock", reason)),
            },
            status => {
                Reservation::Unavailable(unavailable("reserve_stock", unexpected_status(status)))
            }
        }
    }

    /// Any 2xx means the key holds nothing any more, whether this call gave
    /// the stock back or an earlier one did.
    #[tracing::instrument(skip(self, reason), fields(product_id = %id))]
    async fn release_stock(
        &self,
        id: ProductId,
        quantity: u32,
        key: &str,
        reason: &str,
    ) -> Release {
        let body = StockChangeRequest {
            quantity: i64::from(quantity),
            reason: Some(reason.to_string()),
            reservation_key: Some(key.to_string()),
        };
        let response = match self.post(&format!("/products/{id}/release-stock"), &body).await {
            Ok(response) => response,
            Err(reason) => return Release::Unavailable(unavailable("release_stock", reason)),
        };

        match response.status() {
            StatusCode::NOT_FOUND => Release::NotFound,
            status if status.is_success() => Release::Released,
            status => Release::Unavailable(unavailable("release_stock", unexpected_status(status))),
        }
    }

    async fn list_available(&self) -> Result<Vec<ProductResponse>, String> {
        let response = self
            .get("/products/with-stock")
            .await
            .map_err(|reason| unavailable("list_available", reason))?;

        let status = response.status();
        if !status.is_success() {
            return Err(unavailable("list_available", unexpected_status(status)));
        }

        payload(response)
            .await
            .map_err(|reason| unavailable("list_available", reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_drops_trailing_slash() {
        let gateway =
            HttpInventoryGateway::new("http://inventory:5001/", "token", Duration::from_secs(1))
                .unwrap();
        assert_eq!(gateway.base_url(), "http://inventory:5001");
        assert_eq!(gateway.url("/products/1"), "http://inventory:5001/products/1");
    }
}

//! Rendered-Payload Fetcher (§4.D): retrieves base64 ESC/POS payloads from
//! the cloud HTTP surface.

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

const DEFAULT_PAPER_WIDTH: u32 = 80;

#[derive(Debug, Clone, Deserialize)]
pub struct StationPrinterConfig {
    pub printer_name: String,
    pub copies: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationTicketPayload {
    pub station_id: String,
    pub station_name: String,
    pub printer_config: StationPrinterConfig,
    pub escpos_base64: String,
}

pub struct PayloadFetcher {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl PayloadFetcher {
    pub fn new(client: Client, base_url: String, anon_key: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_for_payload(&self, path: &str, body: Value) -> Option<String> {
        let response = self
            .client
            .post(self.url(path))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.anon_key))
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(status = %response.status(), path, "payload fetch returned non-2xx");
                return None;
            }
            Err(e) => {
                warn!(error = %e, path, "payload fetch transport error");
                return None;
            }
        };

        let parsed: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, path, "payload response parse failed");
                return None;
            }
        };

        extract_payload(&parsed)
    }

    /// Kitchen-single (§4.D.1).
    pub async fn fetch_kitchen_single(&self, order_id: &str, paper_width: Option<u32>) -> Option<String> {
        self.post_for_payload(
            "/tickets/generate-escpos",
            json!({
                "order_id": order_id,
                "ticket_type": "kitchen",
                "paper_width": paper_width.unwrap_or(DEFAULT_PAPER_WIDTH),
            }),
        )
        .await
    }

    /// Per-station split (§4.D.2). Non-2xx or unparsable responses yield an
    /// empty list, which callers treat the same as "no station split".
    pub async fn fetch_station_tickets(
        &self,
        order_id: &str,
        paper_width: Option<u32>,
    ) -> Vec<StationTicketPayload> {
        let response = self
            .client
            .post(self.url("/tickets/generate-station-tickets"))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.anon_key))
            .json(&json!({
                "order_id": order_id,
                "paper_width": paper_width.unwrap_or(DEFAULT_PAPER_WIDTH),
            }))
            .send()
            .await;

        let response = match response {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(status = %response.status(), "station ticket fetch returned non-2xx");
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, "station ticket fetch transport error");
                return Vec::new();
            }
        };

        match response.json::<Vec<StationTicketPayload>>().await {
            Ok(tickets) => tickets,
            Err(e) => {
                warn!(error = %e, "station ticket response parse failed");
                Vec::new()
            }
        }
    }

    /// Customer (§4.D.3).
    pub async fn fetch_customer(&self, order_id: &str, paper_width: Option<u32>) -> Option<String> {
        self.post_for_payload(
            "/tickets/generate-escpos",
            json!({
                "order_id": order_id,
                "ticket_type": "customer",
                "paper_width": paper_width.unwrap_or(DEFAULT_PAPER_WIDTH),
            }),
        )
        .await
    }

    /// Addition (§4.D.4).
    pub async fn fetch_addition(
        &self,
        order_id: &str,
        addition_group_id: &str,
        paper_width: Option<u32>,
    ) -> Option<String> {
        self.post_for_payload(
            "/tickets/generate-escpos",
            json!({
                "order_id": order_id,
                "ticket_type": "addition",
                "addition_group_id": addition_group_id,
                "paper_width": paper_width.unwrap_or(DEFAULT_PAPER_WIDTH),
            }),
        )
        .await
    }

    /// Cash report (§4.D.5).
    pub async fn fetch_cash_report(&self, report_id: &str, paper_width: Option<u32>) -> Option<String> {
        self.post_for_payload(
            "/cash/generate-report-escpos",
            json!({
                "report_id": report_id,
                "paper_width": paper_width.unwrap_or(DEFAULT_PAPER_WIDTH),
            }),
        )
        .await
    }
}

/// Accepts either key `escposBase64` or `data` for the payload (§4.D).
fn extract_payload(value: &Value) -> Option<String> {
    value
        .get("escposBase64")
        .or_else(|| value.get("data"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_payload_prefers_escpos_base64_key() {
        let value = json!({"escposBase64": "AAA", "data": "BBB"});
        assert_eq!(extract_payload(&value).as_deref(), Some("AAA"));
    }

    #[test]
    fn extract_payload_falls_back_to_data_key() {
        let value = json!({"data": "BBB"});
        assert_eq!(extract_payload(&value).as_deref(), Some("BBB"));
    }

    #[test]
    fn extract_payload_is_none_when_absent() {
        let value = json!({"other": "field"});
        assert_eq!(extract_payload(&value), None);
    }
}

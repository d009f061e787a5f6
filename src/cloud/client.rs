//! Cloud Claim Client (§4.C): mutual exclusion of jobs across a daemon
//! fleet via server-side atomicity.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::errors::Result;

#[derive(Debug, Clone, Serialize, Default)]
pub struct ClaimKeys {
    pub order_id: Option<String>,
    pub ticket_id: Option<String>,
    pub report_id: Option<String>,
    pub addition_group_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaimResponse {
    pub success: bool,
    pub job_id: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatPayload {
    pub status: String,
    pub printer_status: String,
    pub uptime_seconds: u64,
    pub mode: String,
}

/// Dual-purpose RPC client for the claim/complete/heartbeat surface. Uses
/// the anon key for gateway auth on every REST RPC call; every operation
/// here runs post-setup, so there is no separate "setup mode".
pub struct CloudClient {
    client: Client,
    base_url: String,
    anon_key: String,
    tenant_id: String,
    device_id: String,
}

impl CloudClient {
    pub fn new(base_url: String, anon_key: String, tenant_id: String, device_id: String) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build custom HTTP client, using default");
                Client::new()
            });

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key,
            tenant_id,
            device_id,
        }
    }

    fn rpc_url(&self, name: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, name)
    }

    /// §4.C: any transport error is treated as `success=false` — we would
    /// rather skip a print than double-print.
    pub async fn claim(&self, job_kind: &str, keys: ClaimKeys, ttl_seconds: u64) -> ClaimResponse {
        let body = json!({
            "tenant_id": self.tenant_id,
            "job_type": job_kind,
            "order_id": keys.order_id,
            "ticket_id": keys.ticket_id,
            "report_id": keys.report_id,
            "addition_group_id": keys.addition_group_id,
            "device_id": self.device_id,
            "ttl_seconds": ttl_seconds,
        });

        let result = self
            .client
            .post(self.rpc_url("claim_print_job"))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.anon_key))
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                match response.json::<ClaimResponse>().await {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!(error = %e, "claim response parse failed");
                        ClaimResponse { success: false, job_id: None, reason: Some(e.to_string()) }
                    }
                }
            }
            Ok(response) => {
                let status = response.status();
                warn!(%status, job_kind, "claim RPC returned non-success status");
                ClaimResponse {
                    success: false,
                    job_id: None,
                    reason: Some(format!("status {status}")),
                }
            }
            Err(e) => {
                warn!(error = %e, job_kind, "claim RPC transport error");
                ClaimResponse { success: false, job_id: None, reason: Some(e.to_string()) }
            }
        }
    }

    /// Idempotent from the caller's point of view; transport errors are
    /// logged and swallowed (§4.C).
    pub async fn complete(&self, job_id: &str, success: bool, error: Option<&str>) {
        let body = json!({
            "job_id": job_id,
            "device_id": self.device_id,
            "success": success,
            "error_message": error,
        });

        if let Err(e) = self
            .client
            .post(self.rpc_url("complete_print_job"))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.anon_key))
            .json(&body)
            .send()
            .await
        {
            warn!(error = %e, job_id, "complete_print_job transport error (swallowed)");
        }
    }

    /// Periodic upsert into the heartbeat table (§4.C), invoked by the
    /// caller every 60 seconds.
    pub async fn heartbeat(&self, payload: HeartbeatPayload) -> Result<()> {
        let body = json!({
            "device_id": self.device_id,
            "status": payload.status,
            "printer_status": payload.printer_status,
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": payload.uptime_seconds,
            "connection_mode": payload.mode,
        });

        debug!(device_id = %self.device_id, "sending heartbeat");

        let response = self
            .client
            .post(self.rpc_url("upsert_daemon_heartbeat"))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.anon_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| crate::errors::DaemonError::CloudUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(crate::errors::DaemonError::CloudUnavailable(format!(
                "heartbeat upsert failed: {status}"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_slash_from_base_url() {
        let client = CloudClient::new(
            "https://example.supabase.co/".to_string(),
            "anon".to_string(),
            "tenant-1".to_string(),
            "device-1".to_string(),
        );
        assert_eq!(client.base_url, "https://example.supabase.co");
    }

    #[tokio::test]
    async fn claim_against_unreachable_host_reports_failure() {
        let client = CloudClient::new(
            "https://127.0.0.1.invalid".to_string(),
            "anon".to_string(),
            "tenant-1".to_string(),
            "device-1".to_string(),
        );
        let result = client.claim("kitchen_order", ClaimKeys::default(), 30).await;
        assert!(!result.success);
    }
}

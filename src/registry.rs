//! Printer Registry (§4.B): single source of truth for configured printers
//! and role routing; serializes concurrent prints.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::escpos::{build_test_page, CASH_DRAWER_KICK};
use crate::transport::{Transport, TransportKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrinterStatus {
    Ready,
    Error,
    Disconnected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrinterDescriptor {
    pub id: String,
    pub name: String,
    pub transport: TransportKind,
    #[serde(default = "default_status")]
    pub status: PrinterStatus,
}

fn default_status() -> PrinterStatus {
    PrinterStatus::Disconnected
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    CustomerTicket,
    KitchenDefault,
    Fiscal,
    Station,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub role: Role,
    pub printer_id: String,
    /// Only meaningful (and required) for `Role::Station`.
    pub station_id: Option<String>,
    pub station_name: Option<String>,
    #[serde(default = "one")]
    pub copies: u32,
    #[serde(default)]
    pub cash_drawer_enabled: bool,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize)]
pub struct PrintResult {
    pub success: bool,
    pub printer_id: Option<String>,
    pub printer_name: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StationTicket {
    pub station_id: String,
    pub copies: u32,
    pub payload_base64: String,
}

const DEFAULT_PRINTER_ID: &str = "migrated-default";

struct PrinterEntry {
    descriptor: PrinterDescriptor,
    write_lock: Arc<Mutex<()>>,
    breaker: Arc<CircuitBreaker>,
}

pub struct PrinterRegistry {
    /// Insertion order, used to resolve "the default printer" (§4.B: "the
    /// first registered printer").
    order: RwLock<Vec<String>>,
    printers: RwLock<HashMap<String, PrinterEntry>>,
    assignments: RwLock<Vec<RoleAssignment>>,
}

impl PrinterRegistry {
    pub fn new() -> Self {
        Self {
            order: RwLock::new(Vec::new()),
            printers: RwLock::new(HashMap::new()),
            assignments: RwLock::new(Vec::new()),
        }
    }

    /// Idempotent: registering the same id twice replaces the descriptor
    /// without disturbing insertion order or the per-printer write lock.
    pub async fn register(&self, descriptor: PrinterDescriptor) {
        let mut printers = self.printers.write().await;
        let mut order = self.order.write().await;

        if let Some(entry) = printers.get_mut(&descriptor.id) {
            entry.descriptor = descriptor;
            return;
        }

        order.push(descriptor.id.clone());
        printers.insert(
            descriptor.id.clone(),
            PrinterEntry {
                descriptor,
                write_lock: Arc::new(Mutex::new(())),
                breaker: Arc::new(CircuitBreaker::new(
                    "printer".to_string(),
                    CircuitBreakerConfig::default(),
                )),
            },
        );
    }

    /// Idempotent: unregistering an unknown id is a no-op. Purges every
    /// role assignment pointing at this id.
    pub async fn unregister(&self, id: &str) {
        let mut printers = self.printers.write().await;
        let mut order = self.order.write().await;
        if printers.remove(id).is_some() {
            order.retain(|existing| existing != id);
        }

        let mut assignments = self.assignments.write().await;
        assignments.retain(|a| a.printer_id != id);
    }

    pub async fn set_assignments(&self, assignments: Vec<RoleAssignment>) {
        let mut guard = self.assignments.write().await;
        *guard = assignments;
    }

    /// Auto-registers a legacy single-printer config under the synthetic id
    /// `"migrated-default"`, bound to all non-station roles, if no printers
    /// or assignments exist yet (§9 legacy migration).
    pub async fn migrate_legacy(&self, transport: TransportKind, name: String) {
        let has_printers = !self.order.read().await.is_empty();
        if has_printers {
            return;
        }

        self.register(PrinterDescriptor {
            id: DEFAULT_PRINTER_ID.to_string(),
            name,
            transport,
            status: PrinterStatus::Disconnected,
        })
        .await;

        self.set_assignments(vec![
            RoleAssignment {
                role: Role::CustomerTicket,
                printer_id: DEFAULT_PRINTER_ID.to_string(),
                station_id: None,
                station_name: None,
                copies: 1,
                cash_drawer_enabled: false,
            },
            RoleAssignment {
                role: Role::KitchenDefault,
                printer_id: DEFAULT_PRINTER_ID.to_string(),
                station_id: None,
                station_name: None,
                copies: 1,
                cash_drawer_enabled: false,
            },
            RoleAssignment {
                role: Role::Fiscal,
                printer_id: DEFAULT_PRINTER_ID.to_string(),
                station_id: None,
                station_name: None,
                copies: 1,
                cash_drawer_enabled: false,
            },
        ])
        .await;
    }

    /// Role resolution order (§4.B tie-breaks): exact `(role, station_id)`
    /// → exact role → default printer → failure. On station mismatch, fall
    /// back to `kitchen_default`, then default, then failure.
    pub async fn get_printer_for_role(&self, role: Role, station_id: Option<&str>) -> Option<String> {
        let assignments = self.assignments.read().await;
        let printers = self.printers.read().await;
        let order = self.order.read().await;

        let known = |id: &str| printers.contains_key(id);

        if role == Role::Station {
            if let Some(station_id) = station_id {
                if let Some(found) = assignments.iter().find(|a| {
                    a.role == Role::Station && a.station_id.as_deref() == Some(station_id)
                }) {
                    if known(&found.printer_id) {
                        return Some(found.printer_id.clone());
                    }
                }
            }
            // Station role mismatch: fall back to kitchen_default, then default.
            if let Some(found) = assignments
                .iter()
                .find(|a| a.role == Role::KitchenDefault && known(&a.printer_id))
            {
                return Some(found.printer_id.clone());
            }
            return order.first().cloned();
        }

        if let Some(found) = assignments.iter().find(|a| a.role == role && known(&a.printer_id)) {
            return Some(found.printer_id.clone());
        }

        order.first().cloned()
    }

    async fn write_to_printer(&self, printer_id: &str, bytes: &[u8]) -> PrintResult {
        let (transport, name, write_lock, breaker) = {
            let printers = self.printers.read().await;
            match printers.get(printer_id) {
                Some(entry) => (
                    entry.descriptor.transport.clone(),
                    entry.descriptor.name.clone(),
                    entry.write_lock.clone(),
                    entry.breaker.clone(),
                ),
                None => {
                    return PrintResult {
                        success: false,
                        printer_id: Some(printer_id.to_string()),
                        printer_name: None,
                        error: Some("printer not found".to_string()),
                    }
                }
            }
        };

        // Serialize writes per printer id (§5): no suspension point inside
        // the critical section is observable until the write completes.
        let _guard = write_lock.lock().await;
        let bytes = bytes.to_vec();

        let outcome = breaker
            .execute(|| async move {
                if transport.write(&bytes).await {
                    Ok(())
                } else {
                    Err(crate::errors::DaemonError::PrintJob(format!(
                        "transport write failed for printer {printer_id}"
                    )))
                }
            })
            .await;

        match outcome {
            Ok(()) => {
                self.set_status(printer_id, PrinterStatus::Ready).await;
                PrintResult {
                    success: true,
                    printer_id: Some(printer_id.to_string()),
                    printer_name: Some(name),
                    error: None,
                }
            }
            Err(e) => {
                warn!(printer_id, error = %e, "print write failed");
                self.set_status(printer_id, PrinterStatus::Error).await;
                PrintResult {
                    success: false,
                    printer_id: Some(printer_id.to_string()),
                    printer_name: Some(name),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn set_status(&self, printer_id: &str, status: PrinterStatus) {
        let mut printers = self.printers.write().await;
        if let Some(entry) = printers.get_mut(printer_id) {
            entry.descriptor.status = status;
        }
    }

    pub async fn print_by_role(
        &self,
        role: Role,
        bytes: &[u8],
        station_id: Option<&str>,
    ) -> PrintResult {
        match self.get_printer_for_role(role, station_id).await {
            Some(printer_id) => self.write_to_printer(&printer_id, bytes).await,
            None => PrintResult {
                success: false,
                printer_id: None,
                printer_name: None,
                error: Some("no printer configured for role".to_string()),
            },
        }
    }

    pub async fn print_station_tickets(&self, tickets: Vec<StationTicket>) -> Vec<PrintResult> {
        let mut results = Vec::new();
        for ticket in tickets {
            let bytes = match base64::engine::general_purpose::STANDARD.decode(&ticket.payload_base64) {
                Ok(bytes) => bytes,
                Err(e) => {
                    results.push(PrintResult {
                        success: false,
                        printer_id: None,
                        printer_name: None,
                        error: Some(format!("invalid base64 payload: {e}")),
                    });
                    continue;
                }
            };

            let copies = ticket.copies.max(1);
            for _ in 0..copies {
                let result = self
                    .print_by_role(Role::Station, &bytes, Some(&ticket.station_id))
                    .await;
                results.push(result);
            }
        }
        results
    }

    /// Sends the cash-drawer kick sequence to the printer resolved for
    /// `role` (default `customer_ticket`).
    pub async fn open_cash_drawer_by_role(&self, role: Role) -> bool {
        self.print_by_role(role, &CASH_DRAWER_KICK, None).await.success
    }

    pub async fn test_printer(&self, id: &str) -> bool {
        let printers = self.printers.read().await;
        match printers.get(id) {
            Some(entry) => entry.descriptor.transport.test().await,
            None => false,
        }
    }

    pub async fn test_all(&self) -> HashMap<String, bool> {
        let ids: Vec<String> = self.order.read().await.clone();
        let mut results = HashMap::new();
        for id in ids {
            results.insert(id.clone(), self.test_printer(&id).await);
        }
        results
    }

    pub async fn test_page(&self, id: &str) -> PrintResult {
        let name = {
            let printers = self.printers.read().await;
            match printers.get(id) {
                Some(entry) => entry.descriptor.name.clone(),
                None => {
                    return PrintResult {
                        success: false,
                        printer_id: Some(id.to_string()),
                        printer_name: None,
                        error: Some("printer not found".to_string()),
                    }
                }
            }
        };
        let bytes = build_test_page(&name);
        self.write_to_printer(id, &bytes).await
    }

    /// Whether an explicit assignment exists for `role`, independent of
    /// the default-printer fallback (used by callers that need to choose
    /// between two *roles*, e.g. cash-report falling back to
    /// `customer_ticket` only when `fiscal` has no assignment at all).
    pub async fn has_assignment_for_role(&self, role: Role) -> bool {
        let assignments = self.assignments.read().await;
        let printers = self.printers.read().await;
        assignments
            .iter()
            .any(|a| a.role == role && printers.contains_key(&a.printer_id))
    }

    pub async fn cash_drawer_enabled_for_role(&self, role: Role) -> bool {
        let assignments = self.assignments.read().await;
        assignments
            .iter()
            .find(|a| a.role == role)
            .map(|a| a.cash_drawer_enabled)
            .unwrap_or(false)
    }

    pub async fn printer_count(&self) -> usize {
        self.order.read().await.len()
    }

    pub async fn role_availability(&self) -> HashMap<String, bool> {
        let assignments = self.assignments.read().await;
        let printers = self.printers.read().await;
        let mut map = HashMap::new();
        for role in [Role::CustomerTicket, Role::KitchenDefault, Role::Fiscal] {
            let available = assignments
                .iter()
                .any(|a| a.role == role && printers.contains_key(&a.printer_id))
                || !printers.is_empty();
            map.insert(format!("{role:?}"), available);
        }
        map
    }
}

impl Default for PrinterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_descriptor(id: &str) -> PrinterDescriptor {
        PrinterDescriptor {
            id: id.to_string(),
            name: format!("Printer {id}"),
            transport: TransportKind::NetworkSocket { host: "127.0.0.1".to_string(), port: 1 },
            status: PrinterStatus::Disconnected,
        }
    }

    #[tokio::test]
    async fn register_unregister_round_trip_is_identity() {
        let registry = PrinterRegistry::new();
        registry.register(fake_descriptor("p1")).await;
        assert_eq!(registry.printer_count().await, 1);

        registry.unregister("p1").await;
        assert_eq!(registry.printer_count().await, 0);
    }

    #[tokio::test]
    async fn unregister_purges_assignments() {
        let registry = PrinterRegistry::new();
        registry.register(fake_descriptor("p1")).await;
        registry
            .set_assignments(vec![RoleAssignment {
                role: Role::KitchenDefault,
                printer_id: "p1".to_string(),
                station_id: None,
                station_name: None,
                copies: 1,
                cash_drawer_enabled: false,
            }])
            .await;

        registry.unregister("p1").await;
        let resolved = registry.get_printer_for_role(Role::KitchenDefault, None).await;
        assert_eq!(resolved, None);
    }

    #[tokio::test]
    async fn role_resolution_falls_back_to_default_printer() {
        let registry = PrinterRegistry::new();
        registry.register(fake_descriptor("p1")).await;
        // No assignments configured at all.
        let resolved = registry.get_printer_for_role(Role::Fiscal, None).await;
        assert_eq!(resolved.as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn role_resolution_fails_when_no_printers_exist() {
        let registry = PrinterRegistry::new();
        let resolved = registry.get_printer_for_role(Role::KitchenDefault, None).await;
        assert_eq!(resolved, None);
    }

    #[tokio::test]
    async fn station_role_matches_exact_station_id() {
        let registry = PrinterRegistry::new();
        registry.register(fake_descriptor("p1")).await;
        registry.register(fake_descriptor("p2")).await;
        registry
            .set_assignments(vec![RoleAssignment {
                role: Role::Station,
                printer_id: "p2".to_string(),
                station_id: Some("grill".to_string()),
                station_name: Some("Grill".to_string()),
                copies: 1,
                cash_drawer_enabled: false,
            }])
            .await;

        let resolved = registry.get_printer_for_role(Role::Station, Some("grill")).await;
        assert_eq!(resolved.as_deref(), Some("p2"));
    }

    #[tokio::test]
    async fn station_mismatch_falls_back_to_kitchen_default_then_default() {
        let registry = PrinterRegistry::new();
        registry.register(fake_descriptor("p1")).await;
        registry
            .set_assignments(vec![RoleAssignment {
                role: Role::KitchenDefault,
                printer_id: "p1".to_string(),
                station_id: None,
                station_name: None,
                copies: 1,
                cash_drawer_enabled: false,
            }])
            .await;

        // Station id present, no matching station assignment.
        let resolved = registry.get_printer_for_role(Role::Station, Some("unknown")).await;
        assert_eq!(resolved.as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn set_assignments_is_idempotent() {
        let registry = PrinterRegistry::new();
        let assignments = vec![RoleAssignment {
            role: Role::KitchenDefault,
            printer_id: "p1".to_string(),
            station_id: None,
            station_name: None,
            copies: 1,
            cash_drawer_enabled: false,
        }];
        registry.set_assignments(assignments.clone()).await;
        registry.set_assignments(assignments).await;
        assert_eq!(registry.assignments.read().await.len(), 1);
    }

    #[tokio::test]
    async fn print_by_role_fails_cleanly_with_no_registry_state() {
        let registry = PrinterRegistry::new();
        let result = registry.print_by_role(Role::KitchenDefault, b"hello", None).await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }
}

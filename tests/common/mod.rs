// Common test fixtures shared across integration test binaries.

/// Create a realistic order-change payload shaped like the rows the event
/// pipeline would see over the realtime change feed.
#[allow(dead_code)]
pub fn create_test_print_job(order_id: &str, station: &str) -> serde_json::Value {
    serde_json::json!({
        "job_id": format!("job_{}", uuid::Uuid::new_v4()),
        "order_id": order_id,
        "station": station,
        "items": [
            {
                "name": "Test Item 1",
                "quantity": 2,
                "price": 10.50,
                "modifiers": ["No onions"]
            },
            {
                "name": "Test Item 2",
                "quantity": 1,
                "price": 15.00,
                "modifiers": []
            }
        ],
        "table_number": "T-05",
        "order_number": "R001-20260128-0042",
        "timestamp": chrono::Utc::now().timestamp()
    })
}

//! Drives the store the way the dashboard's table and chart panels do.
//!
//! Run with `RUST_LOG=statekeeper=debug` to see commit logging.

use serde_json::{json, Value};
use statekeeper::{defaults, FileStorage, Patch, Snapshot, StateValue, Store};
use tracing_subscriber::EnvFilter;

fn applications(state: &Snapshot) -> Vec<Value> {
    state
        .get("applications")
        .and_then(StateValue::as_json)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn str_of<'a>(state: &'a Snapshot, key: &str) -> &'a str {
    state
        .get(key)
        .and_then(StateValue::as_json)
        .and_then(Value::as_str)
        .unwrap_or("")
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("=== Dashboard state demo ===\n");

    let data_dir = std::env::temp_dir().join("statekeeper-demo");
    let store = Store::open(
        defaults::dashboard_config().with_log_changes(true),
        defaults::dashboard_defaults(),
        FileStorage::open(&data_dir)?,
    )?;
    println!("1. Opened store at {}", data_dir.display());
    println!("   Loaded {} application(s)", store.read(|s| applications(s).len()));

    // Table panel: re-render whenever the rows, search or paging change.
    let table = store.subscribe(
        ["applications", "searchTerm", "currentPageNumber"],
        |change| {
            println!("   [table] {} changed", change.key);
            Ok(())
        },
    )?;

    // Search results are derived, and only recomputed when their inputs change.
    let visible = store.create_computed(
        |s| {
            let term = str_of(s, "searchTerm").to_lowercase();
            applications(s)
                .into_iter()
                .filter(|app| {
                    app["app_name"]
                        .as_str()
                        .is_some_and(|name| name.to_lowercase().contains(&term))
                })
                .count()
        },
        ["applications", "searchTerm"],
    )?;

    println!("\n2. Adding applications in one batch");
    let report = store.batch(|s| {
        s.set_state(Patch::new().set(
            "applications",
            json!([
                {"id": 1, "app_name": "Billing", "owner": "finance"},
                {"id": 2, "app_name": "Grafana", "owner": "ops"},
                {"id": 3, "app_name": "Billing Reports", "owner": "finance"}
            ]),
        ))?;
        s.set_state(Patch::new().set("currentPageNumber", json!(1)))?;
        Ok(())
    })?;
    println!("   Committed {:?}", report.changed_keys);

    println!("\n3. Searching");
    store.set_state(
        Patch::new()
            .set("searchTerm", json!("billing"))
            .set("currentPageNumber", json!(1)),
    )?;
    println!("   {} application(s) match", visible.get());

    println!("\n4. Chart panel stores a live handle");
    struct LiveChart {
        series: usize,
    }
    store.set_state(Patch::new().set("charts", StateValue::handle(LiveChart { series: 3 })))?;
    if let Some(chart) = store.get("charts")?.and_then(|v| v.downcast_handle::<LiveChart>()) {
        println!("   chart has {} series", chart.series);
    }

    println!("\n5. Clearing the search");
    store.reset_keys("searchTerm")?;
    println!("   {} application(s) match", visible.get());

    table.unsubscribe();

    println!("\n6. History:");
    for entry in store.get_history(None) {
        println!("   #{} {:?}", entry.sequence, entry.changed_keys);
    }
    println!("\n7. Stats: {}", serde_json::to_string_pretty(&store.get_stats())?);

    println!("\n✓ Demo complete!");
    Ok(())
}

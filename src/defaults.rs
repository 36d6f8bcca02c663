//! Initial state for the admin dashboard.
//!
//! | Key                 | Default                        | Persisted |
//! |---------------------|--------------------------------|-----------|
//! | `applications`      | `[]`                           | yes       |
//! | `dashboardData`     | `null`                         |           |
//! | `currentPage`       | `"dashboard"`                  |           |
//! | `loading`           | `false`                        |           |
//! | `error`             | `null`                         |           |
//! | `currentEditingApp` | `null`                         |           |
//! | `searchTerm`        | `""`                           |           |
//! | `sortField`         | `"app_name"`                   |           |
//! | `sortDirection`     | `"asc"`                        |           |
//! | `currentPageNumber` | `1`                            |           |
//! | `itemsPerPage`      | `10`                           |           |
//! | `charts`            | `{}`                           |           |
//! | `chartsInitialized` | `false`                        |           |
//! | `activeModal`       | `null`                         |           |
//! | `modalData`         | `null`                         |           |
//! | `userPreferences`   | theme/language/refresh options | yes       |
//! | `isOnline`          | `true`                         |           |
//! | `lastUpdated`       | `null`                         |           |
//! | `version`           | [`SCHEMA_VERSION`]             |           |

use crate::config::StoreConfig;
use crate::value::{Patch, Snapshot};
use serde_json::json;

/// Version of the default state layout.
pub const SCHEMA_VERSION: &str = "1.0.0";

pub const DASHBOARD_NAMESPACE: &str = "dashboard_state";

pub const PERSISTENT_KEYS: [&str; 2] = ["applications", "userPreferences"];

pub fn dashboard_defaults() -> Snapshot {
    let patch = Patch::new()
        .set("applications", json!([]))
        .set("dashboardData", json!(null))
        .set("currentPage", json!("dashboard"))
        .set("loading", json!(false))
        .set("error", json!(null))
        .set("currentEditingApp", json!(null))
        .set("searchTerm", json!(""))
        .set("sortField", json!("app_name"))
        .set("sortDirection", json!("asc"))
        .set("currentPageNumber", json!(1))
        .set("itemsPerPage", json!(10))
        .set("charts", json!({}))
        .set("chartsInitialized", json!(false))
        .set("activeModal", json!(null))
        .set("modalData", json!(null))
        .set(
            "userPreferences",
            json!({
                "theme": "dark",
                "language": "en",
                "autoRefresh": true,
                "refreshInterval": 30000
            }),
        )
        .set("isOnline", json!(true))
        .set("lastUpdated", json!(null))
        .set("version", json!(SCHEMA_VERSION));
    patch.apply_to(&Snapshot::new())
}

pub fn dashboard_config() -> StoreConfig {
    StoreConfig::default()
        .with_namespace(DASHBOARD_NAMESPACE)
        .with_persistent_keys(PERSISTENT_KEYS)
}

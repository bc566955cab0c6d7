//! # Mock Data Provider
//!
//! Deterministic synthetic responses for every procedure of the
//! unit-management API.
//!
//! ## Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  provide("getUnit", {"id": "unit-007"})                                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  generators["getUnit"] ──► same input, same output, every time          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  { id, name, status, location, capacity, occupancy,                     │
//! │    assignedTo, updatedAt }   ← field set == LIVE_SCHEMA["getUnit"]      │
//! │                                                                         │
//! │  provide("getWidgets", …) ──► Err(UnsupportedProcedure)                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Values are synthetic, shapes are not: field names and JSON types match the
//! live schema so screens render mock data the same way as real data.

use chrono::DateTime;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Live Schema
// =============================================================================

const UNIT_FIELDS: &[&str] = &[
    "id",
    "name",
    "status",
    "location",
    "capacity",
    "occupancy",
    "assignedTo",
    "updatedAt",
];

/// Top-level field set of each live procedure response.
pub const LIVE_SCHEMA: &[(&str, &[&str])] = &[
    ("getUnits", &["units", "total", "page", "pageSize"]),
    ("getUnit", UNIT_FIELDS),
    (
        "getUnitStats",
        &["total", "active", "maintenance", "inactive", "occupancyRate"],
    ),
    ("getNotifications", &["notifications", "unreadCount"]),
    ("getProfile", &["id", "name", "email", "role"]),
    ("createUnit", UNIT_FIELDS),
    ("updateUnit", UNIT_FIELDS),
    ("deleteUnit", &["id", "deleted"]),
    ("markNotificationRead", &["id", "read"]),
];

/// Field set of a notification inside `getNotifications`.
pub const NOTIFICATION_FIELDS: &[&str] = &["id", "title", "body", "read", "createdAt"];

/// Documented live field set for a procedure.
pub fn live_fields(procedure: &str) -> Option<&'static [&'static str]> {
    LIVE_SCHEMA
        .iter()
        .find(|(name, _)| *name == procedure)
        .map(|(_, fields)| *fields)
}

// =============================================================================
// Synthetic Records
// =============================================================================

/// Number of units in the synthetic fleet.
pub const MOCK_UNIT_COUNT: u64 = 42;

const UNIT_NAMES: &[&str] = &[
    "Alpha Block",
    "Birch Suite",
    "Cedar Loft",
    "Delta Wing",
    "Elm Studio",
    "Fir Annex",
    "Grove House",
];

const UNIT_STATUSES: &[&str] = &["active", "active", "maintenance", "active", "inactive"];

const LOCATIONS: &[&str] = &["Building A", "Building B", "Building C", "North Yard"];

const OPERATORS: &[&str] = &["j.alvarez", "m.chen", "r.okafor"];

/// Identifiers map onto this many synthetic records.
const INDEX_SPAN: u64 = 1_000;

/// 2024-01-01T00:00:00Z
const EPOCH_SECS: i64 = 1_704_067_200;

fn timestamp(offset_hours: u64) -> String {
    i64::try_from(offset_hours)
        .ok()
        .and_then(|hours| hours.checked_mul(3_600))
        .and_then(|secs| secs.checked_add(EPOCH_SECS))
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

fn pick<'a>(table: &[&'a str], index: u64) -> &'a str {
    table[(index % table.len() as u64) as usize]
}

fn unit(index: u64) -> Value {
    let capacity = 4 + (index % 5) * 2;
    let occupancy = (index * 3) % (capacity + 1);
    let assigned_to = if index % 4 == 3 {
        Value::Null
    } else {
        Value::String(pick(OPERATORS, index).to_string())
    };

    json!({
        "id": format!("unit-{:03}", index),
        "name": format!("{} {}", pick(UNIT_NAMES, index), index),
        "status": pick(UNIT_STATUSES, index),
        "location": pick(LOCATIONS, index),
        "capacity": capacity,
        "occupancy": occupancy,
        "assignedTo": assigned_to,
        "updatedAt": timestamp(index),
    })
}

/// Stable index in `0..INDEX_SPAN` for an identifier: trailing digits if
/// present, otherwise an FNV-1a fold of the string.
fn index_for(id: &str) -> u64 {
    let digits: String = id
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    if let Ok(n) = digits.parse::<u64>() {
        return n % INDEX_SPAN;
    }

    id.bytes().fold(0xcbf2_9ce4_8422_2325u64, |hash, b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    }) % INDEX_SPAN
}

fn str_field<'a>(payload: &'a Value, field: &str) -> Option<&'a str> {
    payload.get(field).and_then(Value::as_str)
}

fn u64_field(payload: &Value, field: &str) -> Option<u64> {
    payload.get(field).and_then(Value::as_u64)
}

/// Copies the unit fields present in `patch` over `base`, except `id` and
/// `updatedAt`.
fn merge_unit(mut base: Value, patch: &Value) -> Value {
    if let (Some(target), Some(source)) = (base.as_object_mut(), patch.as_object()) {
        for field in UNIT_FIELDS {
            if matches!(*field, "id" | "updatedAt") {
                continue;
            }
            if let Some(value) = source.get(*field) {
                target.insert((*field).to_string(), value.clone());
            }
        }
    }
    base
}

// =============================================================================
// Generators
// =============================================================================

fn get_units(payload: &Value) -> Value {
    let page = u64_field(payload, "page").unwrap_or(1).max(1);
    let page_size = u64_field(payload, "pageSize").unwrap_or(20).clamp(1, 100);
    let start = (page - 1).saturating_mul(page_size);
    let end = start.saturating_add(page_size).min(MOCK_UNIT_COUNT);

    let units: Vec<Value> = (start..end).map(|i| unit(i + 1)).collect();

    json!({
        "units": units,
        "total": MOCK_UNIT_COUNT,
        "page": page,
        "pageSize": page_size,
    })
}

fn get_unit(payload: &Value) -> Value {
    let id = str_field(payload, "id").unwrap_or("unit-001");
    let mut record = unit(index_for(id));
    record["id"] = Value::String(id.to_string());
    record
}

fn get_unit_stats(_payload: &Value) -> Value {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    let mut capacity = 0u64;
    let mut occupancy = 0u64;

    for i in 1..=MOCK_UNIT_COUNT {
        let record = unit(i);
        let status = pick(UNIT_STATUSES, i);
        *counts.entry(status).or_default() += 1;
        capacity += record["capacity"].as_u64().unwrap_or(0);
        occupancy += record["occupancy"].as_u64().unwrap_or(0);
    }

    let rate = if capacity == 0 {
        0.0
    } else {
        ((occupancy as f64 / capacity as f64) * 100.0).round() / 100.0
    };

    json!({
        "total": MOCK_UNIT_COUNT,
        "active": counts.get("active").copied().unwrap_or(0),
        "maintenance": counts.get("maintenance").copied().unwrap_or(0),
        "inactive": counts.get("inactive").copied().unwrap_or(0),
        "occupancyRate": rate,
    })
}

fn get_notifications(_payload: &Value) -> Value {
    let notifications: Vec<Value> = (1..=5u64)
        .map(|i| {
            json!({
                "id": format!("notif-{:03}", i),
                "title": format!("{} needs attention", pick(UNIT_NAMES, i)),
                "body": format!("Scheduled check for unit-{:03}", i),
                "read": i % 2 == 0,
                "createdAt": timestamp(i * 24),
            })
        })
        .collect();

    let unread = notifications
        .iter()
        .filter(|n| n["read"] == Value::Bool(false))
        .count();

    json!({
        "notifications": notifications,
        "unreadCount": unread,
    })
}

fn get_profile(_payload: &Value) -> Value {
    json!({
        "id": "user-001",
        "name": "Demo Operator",
        "email": "demo.operator@example.com",
        "role": "manager",
    })
}

fn create_unit(payload: &Value) -> Value {
    let index = index_for(&payload.to_string());
    let mut record = merge_unit(unit(index), payload);
    record["id"] = Value::String(format!("unit-draft-{:03}", index));
    record
}

fn update_unit(payload: &Value) -> Value {
    merge_unit(get_unit(payload), payload)
}

fn delete_unit(payload: &Value) -> Value {
    json!({
        "id": str_field(payload, "id").unwrap_or_default(),
        "deleted": true,
    })
}

fn mark_notification_read(payload: &Value) -> Value {
    json!({
        "id": str_field(payload, "id").unwrap_or_default(),
        "read": true,
    })
}

// =============================================================================
// Provider
// =============================================================================

type Generator = Box<dyn Fn(&Value) -> Value + Send + Sync>;

/// Registry of procedure name → deterministic generator.
pub struct MockDataProvider {
    generators: HashMap<String, Generator>,
}

impl MockDataProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        MockDataProvider {
            generators: HashMap::new(),
        }
    }

    /// Creates a provider with a generator for every procedure in
    /// [`LIVE_SCHEMA`].
    pub fn with_defaults() -> Self {
        let mut provider = Self::new();
        provider.register("getUnits", get_units);
        provider.register("getUnit", get_unit);
        provider.register("getUnitStats", get_unit_stats);
        provider.register("getNotifications", get_notifications);
        provider.register("getProfile", get_profile);
        provider.register("createUnit", create_unit);
        provider.register("updateUnit", update_unit);
        provider.register("deleteUnit", delete_unit);
        provider.register("markNotificationRead", mark_notification_read);
        provider
    }

    /// Registers (or replaces) the generator for a procedure.
    pub fn register<F>(&mut self, procedure: impl Into<String>, generator: F)
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.generators.insert(procedure.into(), Box::new(generator));
    }

    pub fn supports(&self, procedure: &str) -> bool {
        self.generators.contains_key(procedure)
    }

    /// Registered procedure names, sorted.
    pub fn procedures(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.generators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Produces a synthetic response.
    ///
    /// ## Errors
    /// [`CoreError::UnsupportedProcedure`] if no generator is registered.
    pub fn provide(&self, procedure: &str, payload: &Value) -> CoreResult<Value> {
        let generator = self
            .generators
            .get(procedure)
            .ok_or_else(|| CoreError::UnsupportedProcedure(procedure.to_string()))?;
        Ok(generator(payload))
    }
}

impl Default for MockDataProvider {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for MockDataProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDataProvider")
            .field("procedures", &self.procedures())
            .finish()
    }
}

/// Keys of a JSON object, sorted. Empty for non-objects.
pub fn field_set(value: &Value) -> Vec<&str> {
    let mut keys: Vec<&str> = value
        .as_object()
        .map(Map::keys)
        .into_iter()
        .flatten()
        .map(String::as_str)
        .collect();
    keys.sort_unstable();
    keys
}

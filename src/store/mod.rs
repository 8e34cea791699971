//! Persistence of named calculator states.
//!
//! The whole collection lives as one JSON array under a single namespaced key of
//! a [`KeyValueStore`]. Every write is a full read-modify-write of that array with
//! no isolation, so callers sharing one store across tasks must serialize writes
//! themselves (the HTTP server does this with a mutex).

mod backend;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

pub use backend::{FileStore, KeyValueStore, MemoryStore};

use crate::core::CalculatorKind;
use crate::error::StoreError;

/// Key the collection is stored under unless a store is built with another one.
pub const STATES_KEY: &str = "scenario-planner.calculator-states";

/// A named snapshot of one calculator's working data.
///
/// `timestamp` is epoch milliseconds. `data` is untyped by default; use
/// [`CalculatorState::into_typed`] or [`StateStore::load_typed`] to apply a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculatorState<T = Value> {
    pub id: String,
    pub name: String,
    pub timestamp: i64,
    pub calculator_type: String,
    pub data: T,
}

impl CalculatorState<Value> {
    /// New record with a fresh id and the current time.
    pub fn new(name: impl Into<String>, calculator_type: impl Into<String>, data: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            calculator_type: calculator_type.into(),
            data,
        }
    }

    /// New record whose discriminator comes from the payload type.
    pub fn for_payload<T: CalculatorKind>(
        name: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(name, T::CALCULATOR_TYPE, serde_json::to_value(payload)?))
    }

    /// Applies `T`'s schema to `data`. Fails on a discriminator or shape mismatch.
    pub fn into_typed<T: CalculatorKind>(self) -> Result<CalculatorState<T>, StoreError> {
        if self.calculator_type != T::CALCULATOR_TYPE {
            return Err(StoreError::TypeMismatch {
                id: self.id,
                expected: T::CALCULATOR_TYPE.to_string(),
                actual: self.calculator_type,
            });
        }
        let data = serde_json::from_value(self.data).map_err(|e| StoreError::InvalidPayload {
            id: self.id.clone(),
            reason: e.to_string(),
        })?;
        Ok(CalculatorState {
            id: self.id,
            name: self.name,
            timestamp: self.timestamp,
            calculator_type: self.calculator_type,
            data,
        })
    }
}

/// A stored record that failed validation and was left out of a read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedRecord {
    /// Position in the stored collection; `None` when rejected after filtering.
    pub index: Option<usize>,
    pub id: Option<String>,
    /// The record's `calculatorType`, when it could be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculator_type: Option<String>,
    pub reason: String,
}

/// Result of a soft read: whatever could be recovered plus what was dropped.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub states: Vec<CalculatorState>,
    pub rejected: Vec<RejectedRecord>,
    /// Set when the collection as a whole could not be read; `states` is then empty.
    pub error: Option<StoreError>,
}

#[derive(Debug)]
pub struct TypedLoad<T> {
    pub states: Vec<CalculatorState<T>>,
    pub rejected: Vec<RejectedRecord>,
}

pub struct StateStore<S> {
    backend: S,
    key: String,
}

impl<S: KeyValueStore> StateStore<S> {
    pub fn new(backend: S) -> Self {
        Self::with_key(backend, STATES_KEY)
    }

    pub fn with_key(backend: S, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
        }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Inserts `state`, replacing any record with the same id.
    pub fn save_state<T: Serialize>(&self, state: &CalculatorState<T>) -> Result<(), StoreError> {
        let mut records = self.read_for_write()?;
        records.retain(|record| record_id(record) != Some(state.id.as_str()));
        records.push(serde_json::to_value(state)?);
        self.write(&records)?;
        debug!(id = %state.id, calculator_type = %state.calculator_type, "saved calculator state");
        Ok(())
    }

    /// Every valid record in stored order. Never fails; see [`StateStore::load_report`].
    pub fn get_all_states(&self) -> Vec<CalculatorState> {
        self.load_report().states
    }

    /// Records of one calculator type, newest first. Equal timestamps keep stored order.
    pub fn get_states_by_type(&self, calculator_type: &str) -> Vec<CalculatorState> {
        self.load_report_by_type(calculator_type).states
    }

    pub fn get_state(&self, id: &str) -> Option<CalculatorState> {
        self.get_all_states().into_iter().find(|state| state.id == id)
    }

    /// Removes the record with `id`. Absent ids leave the store untouched.
    pub fn delete_state(&self, id: &str) -> Result<(), StoreError> {
        let mut records = self.read_for_write()?;
        let before = records.len();
        records.retain(|record| record_id(record) != Some(id));
        if records.len() == before {
            debug!(id, "delete of unknown calculator state ignored");
            return Ok(());
        }
        self.write(&records)
    }

    pub fn clear_all_states(&self) -> Result<(), StoreError> {
        self.backend.remove(&self.key)
    }

    /// Soft read of the whole collection.
    ///
    /// Records that fail validation are dropped individually and listed in
    /// `rejected`. A collection that cannot be read at all yields no states and
    /// sets `error`. Both cases are also reported through `tracing`.
    pub fn load_report(&self) -> LoadReport {
        let raw = match self.backend.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return LoadReport::default(),
            Err(err) => {
                error!(operation = "get_all_states", error = %err, "state store read failed");
                return LoadReport {
                    error: Some(err),
                    ..LoadReport::default()
                };
            }
        };

        let records = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(records)) => records,
            Ok(other) => {
                return self.unreadable(format!("expected a JSON array, found {}", kind_of(&other)));
            }
            Err(err) => return self.unreadable(err.to_string()),
        };

        let mut report = LoadReport::default();
        for (index, record) in records.into_iter().enumerate() {
            match validate_record(&record) {
                Ok(state) => report.states.push(state),
                Err(reason) => {
                    let id = record_id(&record).map(str::to_string);
                    let calculator_type = record
                        .get("calculatorType")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    warn!(
                        operation = "get_all_states",
                        index,
                        id = id.as_deref().unwrap_or("<none>"),
                        error = %reason,
                        "dropping invalid calculator state"
                    );
                    report.rejected.push(RejectedRecord {
                        index: Some(index),
                        id,
                        calculator_type,
                        reason,
                    });
                }
            }
        }
        report
    }

    /// [`StateStore::load_report`] restricted to one type and sorted newest first.
    ///
    /// Rejected records of other types are left out; rejects whose type could not be
    /// read are kept, since they may belong to this one.
    pub fn load_report_by_type(&self, calculator_type: &str) -> LoadReport {
        let mut report = self.load_report();
        report
            .states
            .retain(|state| state.calculator_type == calculator_type);
        report.rejected.retain(|rejected| {
            rejected
                .calculator_type
                .as_deref()
                .is_none_or(|kind| kind == calculator_type)
        });
        report
            .states
            .sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        report
    }

    /// Records of `T`'s type with `T`'s schema applied, newest first.
    pub fn load_typed<T: CalculatorKind>(&self) -> TypedLoad<T> {
        let report = self.load_report_by_type(T::CALCULATOR_TYPE);
        let mut rejected = report.rejected;
        let mut states = Vec::with_capacity(report.states.len());
        for state in report.states {
            let id = state.id.clone();
            match state.into_typed::<T>() {
                Ok(typed) => states.push(typed),
                Err(err) => {
                    warn!(
                        operation = "load_typed",
                        id = %id,
                        error = %err,
                        "dropping calculator state with invalid payload"
                    );
                    rejected.push(RejectedRecord {
                        index: None,
                        id: Some(id),
                        calculator_type: Some(T::CALCULATOR_TYPE.to_string()),
                        reason: err.to_string(),
                    });
                }
            }
        }
        TypedLoad { states, rejected }
    }

    fn unreadable(&self, reason: String) -> LoadReport {
        let err = StoreError::Corrupt {
            key: self.key.clone(),
            reason,
        };
        error!(operation = "get_all_states", error = %err, "state store collection unreadable");
        LoadReport {
            error: Some(err),
            ..LoadReport::default()
        }
    }

    fn read_for_write(&self) -> Result<Vec<Value>, StoreError> {
        let Some(raw) = self.backend.get(&self.key)? else {
            return Ok(Vec::new());
        };
        serde_json::from_str::<Vec<Value>>(&raw).map_err(|e| StoreError::Corrupt {
            key: self.key.clone(),
            reason: e.to_string(),
        })
    }

    fn write(&self, records: &[Value]) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(records)?;
        self.backend.set(&self.key, &serialized).inspect_err(|err| {
            error!(operation = "write", error = %err, "state store write failed");
        })
    }
}

fn record_id(record: &Value) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

fn validate_record(record: &Value) -> Result<CalculatorState, String> {
    let object = record
        .as_object()
        .ok_or_else(|| format!("expected an object, found {}", kind_of(record)))?;

    let string_field = |field: &str| -> Result<String, String> {
        match object.get(field) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Err(format!("`{field}` must be a string, found {}", kind_of(other))),
            None => Err(format!("missing `{field}`")),
        }
    };

    let id = string_field("id")?;
    let name = string_field("name")?;
    let calculator_type = string_field("calculatorType")?;
    let timestamp = match object.get("timestamp") {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            })
            .ok_or_else(|| format!("`timestamp` must be whole epoch milliseconds, found {n}"))?,
        Some(other) => {
            return Err(format!("`timestamp` must be a number, found {}", kind_of(other)));
        }
        None => return Err("missing `timestamp`".to_string()),
    };
    let data = object
        .get("data")
        .cloned()
        .ok_or_else(|| "missing `data`".to_string())?;

    Ok(CalculatorState {
        id,
        name,
        timestamp,
        calculator_type,
        data,
    })
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ScenarioData;
    use serde_json::json;

    fn memory_store() -> StateStore<MemoryStore> {
        StateStore::new(MemoryStore::new())
    }

    fn state(id: &str, name: &str, calculator_type: &str, timestamp: i64) -> CalculatorState {
        CalculatorState {
            id: id.to_string(),
            name: name.to_string(),
            timestamp,
            calculator_type: calculator_type.to_string(),
            data: json!({ "value": id }),
        }
    }

    fn ids(states: &[CalculatorState]) -> Vec<&str> {
        states.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn save_replaces_record_with_same_id() {
        let store = memory_store();
        store.save_state(&state("a", "first", "t", 1)).unwrap();
        store.save_state(&state("b", "other", "t", 2)).unwrap();
        store.save_state(&state("a", "second", "t", 3)).unwrap();

        let all = store.get_all_states();
        assert_eq!(all.len(), 2);
        let matching: Vec<_> = all.iter().filter(|s| s.id == "a").collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].name, "second");
        // Replacement moves the record to the end of the collection.
        assert_eq!(ids(&all), vec!["b", "a"]);
    }

    #[test]
    fn states_by_type_are_newest_first() {
        let store = memory_store();
        store.save_state(&state("old", "x", "scenario-planner", 100)).unwrap();
        store.save_state(&state("new", "x", "scenario-planner", 300)).unwrap();
        store.save_state(&state("mid", "x", "scenario-planner", 200)).unwrap();
        store.save_state(&state("other", "x", "break-even", 400)).unwrap();

        let states = store.get_states_by_type("scenario-planner");
        let timestamps: Vec<i64> = states.iter().map(|s| s.timestamp).collect();
        assert_eq!(timestamps, vec![300, 200, 100]);
    }

    #[test]
    fn states_by_type_keeps_stored_order_for_equal_timestamps() {
        let store = memory_store();
        for id in ["first", "second", "third"] {
            store.save_state(&state(id, "x", "t", 50)).unwrap();
        }
        store.save_state(&state("newest", "x", "t", 60)).unwrap();
        assert_eq!(
            ids(&store.get_states_by_type("t")),
            vec!["newest", "first", "second", "third"]
        );
    }

    #[test]
    fn invalid_record_is_dropped_and_reported() {
        let store = memory_store();
        let raw = json!([
            { "id": "good", "name": "ok", "timestamp": 1, "calculatorType": "t", "data": {} },
            { "id": "bad", "name": "no type", "timestamp": 2, "data": {} }
        ]);
        store
            .backend()
            .set(STATES_KEY, &raw.to_string())
            .unwrap();

        assert_eq!(ids(&store.get_all_states()), vec!["good"]);

        let report = store.load_report();
        assert!(report.error.is_none());
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].index, Some(1));
        assert_eq!(report.rejected[0].id.as_deref(), Some("bad"));
        assert!(report.rejected[0].reason.contains("calculatorType"));
    }

    #[test]
    fn mistyped_fields_are_rejected() {
        let store = memory_store();
        let raw = json!([
            { "id": 7, "name": "n", "timestamp": 1, "calculatorType": "t", "data": 1 },
            { "id": "a", "name": "n", "timestamp": "yesterday", "calculatorType": "t", "data": 1 },
            { "id": "b", "name": "n", "timestamp": 1.5, "calculatorType": "t", "data": 1 },
            { "id": "c", "name": "n", "timestamp": 2.0, "calculatorType": "t", "data": null },
            { "id": "d", "name": "n", "timestamp": 3, "calculatorType": "t" },
            "not a record"
        ]);
        store.backend().set(STATES_KEY, &raw.to_string()).unwrap();

        let report = store.load_report();
        assert_eq!(ids(&report.states), vec!["c"]);
        assert_eq!(report.states[0].timestamp, 2);
        assert_eq!(report.rejected.len(), 5);
    }

    #[test]
    fn unreadable_collection_reads_as_empty() {
        let store = memory_store();
        store.backend().set(STATES_KEY, "{not json").unwrap();
        assert!(store.get_all_states().is_empty());
        assert!(matches!(
            store.load_report().error,
            Some(StoreError::Corrupt { .. })
        ));

        store.backend().set(STATES_KEY, r#"{"id":"a"}"#).unwrap();
        assert!(store.get_all_states().is_empty());
    }

    #[test]
    fn writes_refuse_to_overwrite_unreadable_collection() {
        let store = memory_store();
        store.backend().set(STATES_KEY, "{not json").unwrap();
        let err = store.save_state(&state("a", "x", "t", 1)).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
        assert_eq!(
            store.backend().get(STATES_KEY).unwrap().as_deref(),
            Some("{not json")
        );
    }

    #[test]
    fn writes_preserve_records_that_fail_validation() {
        let store = memory_store();
        let raw = json!([{ "id": "legacy", "name": "no type", "timestamp": 1, "data": {} }]);
        store.backend().set(STATES_KEY, &raw.to_string()).unwrap();

        store.save_state(&state("fresh", "x", "t", 2)).unwrap();
        let stored: Vec<Value> =
            serde_json::from_str(&store.backend().get(STATES_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0]["id"], "legacy");
    }

    #[test]
    fn delete_unknown_id_is_a_no_op() {
        let store = memory_store();
        store.save_state(&state("a", "x", "t", 1)).unwrap();
        let before = store.backend().get(STATES_KEY).unwrap();

        store.delete_state("missing").unwrap();
        assert_eq!(store.backend().get(STATES_KEY).unwrap(), before);

        let empty = memory_store();
        empty.delete_state("missing").unwrap();
        assert_eq!(empty.backend().get(STATES_KEY).unwrap(), None);
    }

    #[test]
    fn delete_removes_only_matching_record() {
        let store = memory_store();
        store.save_state(&state("a", "x", "t", 1)).unwrap();
        store.save_state(&state("b", "x", "t", 2)).unwrap();
        store.delete_state("a").unwrap();
        assert_eq!(ids(&store.get_all_states()), vec!["b"]);
        assert!(store.get_state("a").is_none());
        assert_eq!(store.get_state("b").unwrap().timestamp, 2);
    }

    #[test]
    fn clear_empties_the_store() {
        let store = memory_store();
        store.save_state(&state("a", "x", "t", 1)).unwrap();
        store.clear_all_states().unwrap();
        assert!(store.get_all_states().is_empty());
        store.clear_all_states().unwrap();
    }

    #[test]
    fn stores_with_different_keys_are_independent() {
        let backend = MemoryStore::new();
        let first = StateStore::with_key(&backend, "profile-a");
        let second = StateStore::with_key(&backend, "profile-b");
        first.save_state(&state("a", "x", "t", 1)).unwrap();
        assert!(second.get_all_states().is_empty());
        assert_eq!(first.key(), "profile-a");
    }

    #[test]
    fn typed_load_applies_payload_schema() {
        let store = memory_store();
        let good = CalculatorState::for_payload("plan", &ScenarioData::default()).unwrap();
        store.save_state(&good).unwrap();
        let mut broken = state("broken", "x", "scenario-planner", good.timestamp + 1);
        broken.data = json!({ "scenarios": "nope" });
        store.save_state(&broken).unwrap();

        let typed = store.load_typed::<ScenarioData>();
        assert_eq!(typed.states.len(), 1);
        assert_eq!(typed.states[0].id, good.id);
        assert_eq!(typed.states[0].data, ScenarioData::default());
        assert_eq!(typed.rejected.len(), 1);
        assert_eq!(typed.rejected[0].id.as_deref(), Some("broken"));
    }

    #[test]
    fn into_typed_reports_mismatch_and_bad_payload() {
        let foreign = state("f", "x", "break-even", 1);
        match foreign.into_typed::<ScenarioData>() {
            Err(StoreError::TypeMismatch { id, actual, .. }) => {
                assert_eq!(id, "f");
                assert_eq!(actual, "break-even");
            }
            other => panic!("expected a type mismatch, got {other:?}"),
        }

        let mut broken = state("b", "x", "scenario-planner", 1);
        broken.data = json!([1, 2]);
        assert!(matches!(
            broken.into_typed::<ScenarioData>(),
            Err(StoreError::InvalidPayload { ref id, .. }) if id == "b"
        ));
    }

    #[test]
    fn rejects_by_type_leave_out_other_types() {
        let store = memory_store();
        let raw = json!([
            { "id": "mine", "name": "n", "timestamp": "late", "calculatorType": "t", "data": {} },
            { "id": "theirs", "name": "n", "timestamp": "late", "calculatorType": "other", "data": {} },
            { "id": "unknown", "name": "n", "timestamp": 1, "data": {} }
        ]);
        store.backend().set(STATES_KEY, &raw.to_string()).unwrap();

        assert_eq!(store.load_report().rejected.len(), 3);
        let report = store.load_report_by_type("t");
        let rejected: Vec<_> = report
            .rejected
            .iter()
            .filter_map(|r| r.id.as_deref())
            .collect();
        assert_eq!(rejected, vec!["mine", "unknown"]);
    }

    #[test]
    fn saved_scenarios_keep_exact_floats() {
        let store = memory_store();
        let mut data = ScenarioData::default();
        data.scenarios.base.metrics.revenue = 9_147_058.05;
        data.adjustments
            .get_mut(&crate::core::MetricName::Revenue)
            .unwrap()
            .optimistic_multiplier = 1.15;
        let data = crate::core::recalculate(&data).unwrap();
        let saved = CalculatorState::for_payload("exact", &data).unwrap();
        store.save_state(&saved).unwrap();

        let loaded = store
            .get_state(&saved.id)
            .unwrap()
            .into_typed::<ScenarioData>()
            .unwrap();
        assert_eq!(loaded.data, data);
        assert_eq!(
            loaded.data.scenarios.optimistic.metrics.revenue,
            loaded.data.scenarios.base.metrics.revenue * 1.15
        );
    }

    #[test]
    fn new_states_get_unique_ids_and_current_time() {
        let before = chrono::Utc::now().timestamp_millis();
        let a = CalculatorState::new("a", "t", json!(null));
        let b = CalculatorState::new("b", "t", json!(null));
        assert_ne!(a.id, b.id);
        assert!(a.timestamp >= before);
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = StateStore::new(FileStore::open(dir.path()).unwrap());
            store.save_state(&state("a", "kept", "t", 1)).unwrap();
        }
        let reopened = StateStore::new(FileStore::open(dir.path()).unwrap());
        assert_eq!(reopened.get_state("a").unwrap().name, "kept");
    }
}

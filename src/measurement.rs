use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One environmental reading. Fields are independently nullable: a
/// missing sensor or failed read leaves its field empty without
/// discarding the others. Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub time: DateTime<Utc>,
    /// Temperature in degrees Celsius
    pub temperature: Option<f64>,
    /// Relative humidity in percent
    pub humidity: Option<f64>,
    /// Absolute pressure in hPa
    pub pressure: Option<f64>,
}

impl Measurement {
    pub fn now(temperature: Option<f64>, humidity: Option<f64>, pressure: Option<f64>) -> Self {
        Self {
            time: Utc::now(),
            temperature,
            humidity,
            pressure,
        }
    }

    pub fn has_any_value(&self) -> bool {
        self.temperature.is_some() || self.humidity.is_some() || self.pressure.is_some()
    }
}

/// Persistence seam owned by the storage layer: one call per logging
/// tick, true on success. Failures are the caller's problem to log;
/// implementations must not panic.
pub trait MeasurementStore: Send + Sync {
    fn log(&self, measurement: &Measurement) -> bool;
}

/// In-memory store for tests and standalone runs.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<Measurement>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<Measurement> {
        self.rows.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

impl MeasurementStore for MemoryStore {
    fn log(&self, measurement: &Measurement) -> bool {
        self.rows.lock().push(measurement.clone());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_measurement_has_no_values() {
        let m = Measurement::now(None, None, None);
        assert!(!m.has_any_value());
        let m = Measurement::now(None, Some(55.0), None);
        assert!(m.has_any_value());
    }

    #[test]
    fn memory_store_keeps_rows_in_order() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        assert!(store.log(&Measurement::now(Some(20.0), None, None)));
        assert!(store.log(&Measurement::now(Some(21.0), None, None)));

        let rows = store.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].temperature, Some(20.0));
        assert_eq!(rows[1].temperature, Some(21.0));
    }
}

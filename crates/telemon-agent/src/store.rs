//! Agent-side metric store.
//!
//! Every record keeps its current value next to the value last acknowledged
//! by the server. The sender takes a [`Diff`] (values and markers observed
//! under one lock), releases the lock for the network call and, once the
//! server acknowledges, commits exactly what it observed. Polls that land in
//! between stay uncommitted and ride along with the next send.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use telemon_common::types::Metric;

#[derive(Debug, Clone, Copy)]
struct Record<T> {
    value: T,
    committed: Option<T>,
}

impl<T: Copy + PartialEq> Record<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            committed: None,
        }
    }

    fn changed(&self) -> bool {
        self.committed != Some(self.value)
    }
}

#[derive(Debug, Default)]
struct State {
    counters: HashMap<String, Record<i64>>,
    gauges: HashMap<String, Record<f64>>,
}

/// Counter entry of a [`Diff`]: the wire delta and the total it was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterDiff {
    pub delta: i64,
    pub total: i64,
}

/// Uncommitted changes observed at one instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    pub counters: BTreeMap<String, CounterDiff>,
    pub gauges: BTreeMap<String, f64>,
}

impl Diff {
    pub fn len(&self) -> usize {
        self.counters.len() + self.gauges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wire batch: counters then gauges, each sorted by key.
    pub fn to_metrics(&self) -> Vec<Metric> {
        let counters = self
            .counters
            .iter()
            .map(|(key, c)| Metric::counter(key.as_str(), c.delta));
        let gauges = self
            .gauges
            .iter()
            .map(|(key, v)| Metric::gauge(key.as_str(), *v));
        counters.chain(gauges).collect()
    }
}

#[derive(Debug, Default)]
pub struct MetricStore {
    state: Mutex<State>,
}

impl MetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Replaces the running total of `key`.
    pub fn set_counter(&self, key: &str, total: i64) {
        let mut state = self.lock();
        match state.counters.get_mut(key) {
            Some(record) => record.value = total,
            None => {
                state.counters.insert(key.to_string(), Record::new(total));
            }
        }
    }

    /// Adds `amount` to the running total of `key` and returns the new total.
    pub fn add_counter(&self, key: &str, amount: i64) -> i64 {
        let mut state = self.lock();
        let record = state
            .counters
            .entry(key.to_string())
            .or_insert_with(|| Record::new(0));
        record.value = record.value.saturating_add(amount);
        record.value
    }

    pub fn set_gauge(&self, key: &str, value: f64) {
        let mut state = self.lock();
        set_gauge_locked(&mut state, key, value);
    }

    pub fn set_gauges<'a>(&self, values: impl IntoIterator<Item = (&'a str, f64)>) {
        let mut state = self.lock();
        for (key, value) in values {
            set_gauge_locked(&mut state, key, value);
        }
    }

    /// Current total and whether the counter exists.
    pub fn get_counter(&self, key: &str) -> (i64, bool) {
        match self.lock().counters.get(key) {
            Some(record) => (record.value, true),
            None => (0, false),
        }
    }

    pub fn get_gauge(&self, key: &str) -> (f64, bool) {
        match self.lock().gauges.get(key) {
            Some(record) => (record.value, true),
            None => (0.0, false),
        }
    }

    /// Changes since the last acknowledged send.
    pub fn uncommitted_diff(&self) -> Diff {
        let state = self.lock();
        let counters = state
            .counters
            .iter()
            .filter(|(_, r)| r.changed())
            .map(|(key, r)| {
                let delta = r.value.wrapping_sub(r.committed.unwrap_or(0));
                (
                    key.clone(),
                    CounterDiff {
                        delta,
                        total: r.value,
                    },
                )
            })
            .collect();
        let gauges = state
            .gauges
            .iter()
            .filter(|(_, r)| r.changed())
            .map(|(key, r)| (key.clone(), r.value))
            .collect();
        Diff { counters, gauges }
    }

    /// Adopts the observed values of `diff` as acknowledged.
    pub fn commit(&self, diff: &Diff) {
        let mut state = self.lock();
        for (key, c) in &diff.counters {
            if let Some(record) = state.counters.get_mut(key) {
                record.committed = Some(c.total);
            }
        }
        for (key, value) in &diff.gauges {
            if let Some(record) = state.gauges.get_mut(key) {
                record.committed = Some(*value);
            }
        }
    }
}

fn set_gauge_locked(state: &mut State, key: &str, value: f64) {
    match state.gauges.get_mut(key) {
        Some(record) => record.value = value,
        None => {
            state.gauges.insert(key.to_string(), Record::new(value));
        }
    }
}

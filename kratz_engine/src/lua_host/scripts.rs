use std::collections::BTreeMap;

use mlua::RegistryKey;
use thiserror::Error;

/// The closed set of reasons a script step may suspend with. The scheduler's
/// pass-termination and re-arm policies match on these exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendReason {
    /// One iteration of a bounded repeat finished; eligible again in the
    /// next pass of the same tick.
    EndOfIteration,
    /// A timed wait has not reached its deadline; re-armed only after the
    /// current tick's pass loop exits.
    Waiting,
}

/// Outcome of advancing a script coroutine by one resumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStep {
    Completed,
    Suspended(SuspendReason),
    /// The body raised an error; the thread was discarded and the record
    /// marked dead. The fault stays contained to this script.
    Faulted,
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("script {label} yielded unknown suspension tag: {tag}")]
    UnknownSuspension { label: String, tag: String },
}

#[derive(Debug)]
pub(super) struct ScriptRecord {
    label: String,
    sprite: u32,
    key: String,
    ready: bool,
    dead: bool,
    thread: Option<RegistryKey>,
    callable: RegistryKey,
    runs: u32,
    yields: u32,
}

impl ScriptRecord {
    pub(super) fn sprite(&self) -> u32 {
        self.sprite
    }
}

/// Owns every script registration for the stage. Handles ascend from 1, so
/// iterating the backing map visits scripts in registration order.
#[derive(Debug, Default)]
pub(super) struct ScriptRuntime {
    next_handle: u32,
    records: BTreeMap<u32, ScriptRecord>,
}

impl ScriptRuntime {
    pub(super) fn new() -> Self {
        ScriptRuntime {
            next_handle: 1,
            records: BTreeMap::new(),
        }
    }

    pub(super) fn bind(
        &mut self,
        sprite: u32,
        key: String,
        label: String,
        callable: RegistryKey,
    ) -> (u32, String) {
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        let event = format!("script.bind {key} -> {label} (#{handle})");
        self.records.insert(
            handle,
            ScriptRecord {
                label,
                sprite,
                key,
                ready: false,
                dead: false,
                thread: None,
                callable,
                runs: 0,
                yields: 0,
            },
        );
        (handle, event)
    }

    /// Marks the script ready. Idempotent; a dead script stays inert.
    pub(super) fn arm(&mut self, handle: u32) -> bool {
        match self.records.get_mut(&handle) {
            Some(record) if !record.dead => {
                let changed = !record.ready;
                record.ready = true;
                changed
            }
            _ => false,
        }
    }

    pub(super) fn clear_ready(&mut self, handle: u32) {
        if let Some(record) = self.records.get_mut(&handle) {
            record.ready = false;
        }
    }

    pub(super) fn is_ready(&self, handle: u32) -> bool {
        self.records
            .get(&handle)
            .map(|record| record.ready)
            .unwrap_or(false)
    }

    pub(super) fn is_dead(&self, handle: u32) -> bool {
        self.records
            .get(&handle)
            .map(|record| record.dead)
            .unwrap_or(false)
    }

    pub(super) fn thread_key(&self, handle: u32) -> Option<&RegistryKey> {
        self.records
            .get(&handle)
            .and_then(|record| record.thread.as_ref())
    }

    pub(super) fn callable_key(&self, handle: u32) -> Option<&RegistryKey> {
        self.records.get(&handle).map(|record| &record.callable)
    }

    pub(super) fn attach_thread(&mut self, handle: u32, key: RegistryKey) {
        if let Some(record) = self.records.get_mut(&handle) {
            record.thread = Some(key);
            record.runs = record.runs.saturating_add(1);
        }
    }

    pub(super) fn record_yield(&mut self, handle: u32) {
        if let Some(record) = self.records.get_mut(&handle) {
            record.yields = record.yields.saturating_add(1);
        }
    }

    /// Drops the suspended thread on completion. The callable stays behind
    /// so the script can be re-armed and rerun from the top.
    pub(super) fn complete(&mut self, handle: u32) -> (Option<RegistryKey>, Option<String>) {
        match self.records.get_mut(&handle) {
            Some(record) => {
                record.ready = false;
                let event = format!(
                    "script.complete {} (#{handle}) runs={} yields={}",
                    record.label, record.runs, record.yields
                );
                (record.thread.take(), Some(event))
            }
            None => (None, None),
        }
    }

    /// Poisons a faulted script: the thread is discarded and further arming
    /// becomes a no-op.
    pub(super) fn mark_dead(&mut self, handle: u32) -> (Option<RegistryKey>, Option<String>) {
        match self.records.get_mut(&handle) {
            Some(record) => {
                record.ready = false;
                record.dead = true;
                let event = format!("script.dead {} (#{handle})", record.label);
                (record.thread.take(), Some(event))
            }
            None => (None, None),
        }
    }

    pub(super) fn label(&self, handle: u32) -> Option<&str> {
        self.records
            .get(&handle)
            .map(|record| record.label.as_str())
    }

    pub(super) fn get(&self, handle: u32) -> Option<&ScriptRecord> {
        self.records.get(&handle)
    }

    pub(super) fn handles_for_key(&self, key: &str) -> Vec<u32> {
        self.records
            .iter()
            .filter_map(|(handle, record)| (record.key == key && !record.dead).then_some(*handle))
            .collect()
    }
}

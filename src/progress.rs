//! Progress counting, observations and commit scheduling.
//!
//! Every processed item ticks the counter of its category. Each
//! `report_interval` ticks an observation is logged and handed to the
//! observer; each `commit_interval` ticks the caller is told a commit is due.
//! With N ticks that gives `N / report_interval` observations and
//! `N / commit_interval` interval commits.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::error::CombineError;

/// Callback receiving progress observations.
pub type ProgressFn = Arc<dyn Fn(&ProgressObservation) + Send + Sync>;

/// Counter category, one per phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressCategory {
    /// Phase A elements.
    Elements,
    /// Content of deferred partitions.
    PartitionElements,
    /// Reference relationships.
    Relationships,
}

impl std::fmt::Display for ProgressCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Elements => write!(f, "elements"),
            Self::PartitionElements => write!(f, "partition elements"),
            Self::Relationships => write!(f, "relationships"),
        }
    }
}

/// Processed/total pair for one category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressCounter {
    /// Items processed so far.
    pub processed: u64,
    /// Items expected.
    pub total: u64,
}

/// Memory used by the current process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Resident set size in bytes.
    pub resident_bytes: u64,
    /// Virtual memory size in bytes.
    pub virtual_bytes: u64,
}

impl MemorySnapshot {
    /// Resident size in MiB.
    pub fn resident_mb(&self) -> f64 {
        self.resident_bytes as f64 / (1024.0 * 1024.0)
    }

    /// Virtual size in MiB.
    pub fn virtual_mb(&self) -> f64 {
        self.virtual_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Reads the memory usage of the current process.
pub struct MemoryProbe {
    system: sysinfo::System,
    pid: Option<sysinfo::Pid>,
}

impl MemoryProbe {
    /// Create a reader for the current process.
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!(target: "graph_combiner::memory", error = e, "cannot resolve current pid, memory snapshots disabled");
                None
            }
        };
        Self {
            system: sysinfo::System::new(),
            pid,
        }
    }

    /// Take a snapshot. Returns zeros when the process cannot be inspected.
    pub fn snapshot(&mut self) -> MemorySnapshot {
        let Some(pid) = self.pid else {
            return MemorySnapshot::default();
        };
        if !self.system.refresh_process(pid) {
            return MemorySnapshot::default();
        }
        self.system
            .process(pid)
            .map(|process| MemorySnapshot {
                resident_bytes: process.memory(),
                virtual_bytes: process.virtual_memory(),
            })
            .unwrap_or_default()
    }
}

impl Default for MemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryProbe").field("pid", &self.pid).finish()
    }
}

/// A progress report emitted every report interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressObservation {
    /// Category being counted.
    pub category: ProgressCategory,
    /// Items processed in the category.
    pub processed: u64,
    /// Items expected in the category.
    pub total: u64,
    /// Minutes since the tracker started.
    pub elapsed_minutes: f64,
    /// Process memory at the time of the observation.
    pub memory: MemorySnapshot,
}

/// Outcome of one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tick {
    /// Observation, when the tick landed on a report interval.
    pub observation: Option<ProgressObservation>,
    /// Whether the tick landed on a commit interval.
    pub commit_due: bool,
}

/// Per-category progress counters with interval scheduling.
pub struct ProgressTracker {
    report_interval: u64,
    commit_interval: u64,
    started: Instant,
    counters: BTreeMap<ProgressCategory, ProgressCounter>,
    memory: MemoryProbe,
    observer: Option<ProgressFn>,
}

impl ProgressTracker {
    /// Create a tracker.
    ///
    /// Both intervals must be positive and `commit_interval` must be a
    /// multiple of `report_interval`, so every commit follows an observation.
    pub fn new(report_interval: u64, commit_interval: u64) -> Result<Self, CombineError> {
        if report_interval == 0 || commit_interval == 0 {
            return Err(CombineError::config("progress intervals must be positive"));
        }
        if commit_interval % report_interval != 0 {
            return Err(CombineError::Configuration(format!(
                "commit interval {commit_interval} is not a multiple of report interval {report_interval}"
            )));
        }
        Ok(Self {
            report_interval,
            commit_interval,
            started: Instant::now(),
            counters: BTreeMap::new(),
            memory: MemoryProbe::new(),
            observer: None,
        })
    }

    /// Attach an observer.
    pub fn with_observer(mut self, observer: Option<ProgressFn>) -> Self {
        self.observer = observer;
        self
    }

    /// Start (or restart) a category with its expected total.
    pub fn begin(&mut self, category: ProgressCategory, total: u64) {
        self.counters.insert(category, ProgressCounter { processed: 0, total });
    }

    /// Count one processed item.
    pub fn tick(&mut self, category: ProgressCategory) -> Tick {
        let counter = self.counters.entry(category).or_default();
        counter.processed += 1;
        let ProgressCounter { processed, total } = *counter;

        if processed % self.report_interval != 0 {
            return Tick::default();
        }

        let observation = ProgressObservation {
            category,
            processed,
            total,
            elapsed_minutes: self.elapsed_minutes(),
            memory: self.memory.snapshot(),
        };
        tracing::info!(
            target: "graph_combiner::progress",
            category = %category,
            processed,
            total,
            elapsed_minutes = %format!("{:.2}", observation.elapsed_minutes),
            "Processed {processed}/{total} {category}"
        );
        tracing::debug!(
            target: "graph_combiner::memory",
            resident_mb = %format!("{:.1}", observation.memory.resident_mb()),
            virtual_mb = %format!("{:.1}", observation.memory.virtual_mb()),
            "memory snapshot"
        );
        if let Some(observer) = &self.observer {
            observer(&observation);
        }

        Tick {
            observation: Some(observation),
            commit_due: processed % self.commit_interval == 0,
        }
    }

    /// Drop one item from a category's expected total without processing it.
    pub fn skip(&mut self, category: ProgressCategory) {
        let counter = self.counters.entry(category).or_default();
        counter.total = counter.total.saturating_sub(1);
    }

    /// Counter for a category.
    pub fn counter(&self, category: ProgressCategory) -> ProgressCounter {
        self.counters.get(&category).copied().unwrap_or_default()
    }

    /// Items processed in a category.
    pub fn processed(&self, category: ProgressCategory) -> u64 {
        self.counter(category).processed
    }

    /// Minutes since the tracker was created.
    pub fn elapsed_minutes(&self) -> f64 {
        self.started.elapsed().as_secs_f64() / 60.0
    }

    /// Snapshot of current process memory.
    pub fn memory_snapshot(&mut self) -> MemorySnapshot {
        self.memory.snapshot()
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("report_interval", &self.report_interval)
            .field("commit_interval", &self.commit_interval)
            .field("counters", &self.counters)
            .field("observer", &self.observer.as_ref().map(|_| "..."))
            .finish()
    }
}

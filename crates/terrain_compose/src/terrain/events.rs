//! Event types and sinks for observing update cycles.
//!
//! [`crate::terrain::Terrain::tick_with_events`] reports cycle boundaries, phase barriers,
//! region lifecycle changes and retained work through an [`EventSink`].
use crate::backend::BackendError;
use crate::layer::LayerId;
use crate::pipeline::Phase;
use crate::region::RegionCoord;
use crate::scheduler::TaskId;
use crate::terrain::cycle::{CycleId, CycleMode, CycleReport};

#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum TerrainEvent {
    /// A cycle was built and starts draining.
    CycleStarted {
        cycle: CycleId,
        mode: CycleMode,
        /// Regions with tasks.
        regions: usize,
        tasks: usize,
        /// Dependency edges followed while expanding the dirty set.
        edges: usize,
    },

    /// Every task of `phase` settled, for every region of the cycle.
    PhasePassed {
        cycle: CycleId,
        phase: Phase,
        tick: u64,
    },

    /// A compute batch failed; the rest of its region's chain is cancelled.
    TaskFailed {
        cycle: CycleId,
        task: TaskId,
        label: String,
        error: BackendError,
    },

    /// Work left out of a cycle and kept dirty.
    LayerRetained {
        /// `None` when a whole region was left out.
        layer: Option<LayerId>,
        region: RegionCoord,
        reason: String,
    },

    RegionActivated {
        region: RegionCoord,
    },

    RegionCommitted {
        region: RegionCoord,
        revision: u64,
    },

    RegionDeactivated {
        region: RegionCoord,
    },

    /// An interactive cycle was discarded; its items return to the tracker.
    CycleSuperseded {
        cycle: CycleId,
        retained: usize,
    },

    CycleCompleted {
        report: CycleReport,
    },

    /// Non-fatal warning.
    Warning {
        context: String,
        message: String,
    },
}

/// Discriminant of a [`TerrainEvent`], used by [`EventSink::wants`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TerrainEventKind {
    CycleStarted,
    PhasePassed,
    TaskFailed,
    LayerRetained,
    RegionActivated,
    RegionCommitted,
    RegionDeactivated,
    CycleSuperseded,
    CycleCompleted,
    Warning,
}

impl TerrainEvent {
    pub fn kind(&self) -> TerrainEventKind {
        match self {
            TerrainEvent::CycleStarted { .. } => TerrainEventKind::CycleStarted,
            TerrainEvent::PhasePassed { .. } => TerrainEventKind::PhasePassed,
            TerrainEvent::TaskFailed { .. } => TerrainEventKind::TaskFailed,
            TerrainEvent::LayerRetained { .. } => TerrainEventKind::LayerRetained,
            TerrainEvent::RegionActivated { .. } => TerrainEventKind::RegionActivated,
            TerrainEvent::RegionCommitted { .. } => TerrainEventKind::RegionCommitted,
            TerrainEvent::RegionDeactivated { .. } => TerrainEventKind::RegionDeactivated,
            TerrainEvent::CycleSuperseded { .. } => TerrainEventKind::CycleSuperseded,
            TerrainEvent::CycleCompleted { .. } => TerrainEventKind::CycleCompleted,
            TerrainEvent::Warning { .. } => TerrainEventKind::Warning,
        }
    }
}

/// A generic event sink that accepts [`TerrainEvent`]s.
pub trait EventSink {
    fn send(&mut self, event: TerrainEvent);

    /// Whether events of `kind` should be built at all. Defaults to everything.
    fn wants(&self, _kind: TerrainEventKind) -> bool {
        true
    }

    fn send_many<I>(&mut self, events: I)
    where
        Self: Sized,
        I: IntoIterator<Item = TerrainEvent>,
    {
        for e in events {
            self.send(e);
        }
    }
}

/// A no-op event sink.
impl EventSink for () {
    #[inline]
    fn send(&mut self, _event: TerrainEvent) {}

    #[inline]
    fn wants(&self, _kind: TerrainEventKind) -> bool {
        false
    }
}

/// An event sink that forwards to a user-provided closure.
pub struct FnSink<F>
where
    F: FnMut(TerrainEvent),
{
    f: F,
}

impl<F> FnSink<F>
where
    F: FnMut(TerrainEvent),
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> EventSink for FnSink<F>
where
    F: FnMut(TerrainEvent),
{
    #[inline]
    fn send(&mut self, event: TerrainEvent) {
        (self.f)(event);
    }
}

/// An event sink that collects events in a `Vec`, optionally filtered by kind.
#[derive(Default)]
pub struct VecSink {
    events: Vec<TerrainEvent>,
    only: Option<Vec<TerrainEventKind>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects only events of the given kinds.
    pub fn only(kinds: impl IntoIterator<Item = TerrainEventKind>) -> Self {
        Self {
            events: Vec::new(),
            only: Some(kinds.into_iter().collect()),
        }
    }

    pub fn into_inner(self) -> Vec<TerrainEvent> {
        self.events
    }

    pub fn as_slice(&self) -> &[TerrainEvent] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn count(&self, kind: TerrainEventKind) -> usize {
        self.events.iter().filter(|e| e.kind() == kind).count()
    }
}

impl EventSink for VecSink {
    #[inline]
    fn send(&mut self, event: TerrainEvent) {
        if self.wants(event.kind()) {
            self.events.push(event);
        }
    }

    fn wants(&self, kind: TerrainEventKind) -> bool {
        self.only.as_ref().is_none_or(|kinds| kinds.contains(&kind))
    }
}

/// Fan-out sink that forwards each event to all contained sinks that want it.
pub struct MultiSink<S: EventSink> {
    pub(crate) sinks: Vec<S>,
}

impl<S: EventSink> MultiSink<S> {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with_sinks(sinks: Vec<S>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: S) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn into_inner(self) -> Vec<S> {
        self.sinks
    }
}

impl<S: EventSink> Default for MultiSink<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: EventSink> EventSink for MultiSink<S> {
    fn send(&mut self, event: TerrainEvent) {
        let kind = event.kind();
        let targets: Vec<usize> = (0..self.sinks.len())
            .filter(|&i| self.sinks[i].wants(kind))
            .collect();
        let Some((&last, rest)) = targets.split_last() else {
            return;
        };
        for &i in rest {
            self.sinks[i].send(event.clone());
        }
        self.sinks[last].send(event);
    }

    fn wants(&self, kind: TerrainEventKind) -> bool {
        self.sinks.iter().any(|s| s.wants(kind))
    }
}

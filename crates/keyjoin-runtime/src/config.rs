#![forbid(unsafe_code)]

//! Configuration for mirrors and joins.

/// Configuration for an [`OrderedMirror`](crate::OrderedMirror).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorConfig {
    /// Subscribe to the source's value events and forward them as
    /// [`ListEvent::DataChanged`](crate::ListEvent::DataChanged).
    pub forward_value_events: bool,
    /// Keep the last bulk snapshot for `last_snapshot()` and for priming
    /// late value subscribers.
    pub track_snapshot: bool,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            forward_value_events: true,
            track_snapshot: true,
        }
    }
}

impl MirrorConfig {
    /// Toggle value-event forwarding.
    #[must_use]
    pub fn with_value_events(mut self, enabled: bool) -> Self {
        self.forward_value_events = enabled;
        self
    }

    /// Toggle snapshot tracking.
    #[must_use]
    pub fn with_snapshot_tracking(mut self, enabled: bool) -> Self {
        self.track_snapshot = enabled;
        self
    }
}

/// Configuration for a [`JoinEngine`](crate::JoinEngine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinConfig {
    /// After every downstream structural event, also emit a value event
    /// carrying the affected element, so value listeners see one batch
    /// boundary per change.
    pub value_after_each_change: bool,
    /// Discard a selection entry when its key leaves the selection. Entries
    /// swapped out by a `changed` event are always kept.
    pub evict_on_remove: bool,
    /// Treat a delivered snapshot with no value as resolved. When false, an
    /// empty target stays hidden until it holds a value, and a target that
    /// becomes empty is removed downstream.
    pub surface_null_targets: bool,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            value_after_each_change: true,
            evict_on_remove: true,
            surface_null_targets: true,
        }
    }
}

impl JoinConfig {
    /// Toggle per-change value events.
    #[must_use]
    pub fn with_value_after_each_change(mut self, enabled: bool) -> Self {
        self.value_after_each_change = enabled;
        self
    }

    /// Toggle entry eviction on selection removal.
    #[must_use]
    pub fn with_evict_on_remove(mut self, enabled: bool) -> Self {
        self.evict_on_remove = enabled;
        self
    }

    /// Toggle surfacing of empty targets.
    #[must_use]
    pub fn with_surface_null_targets(mut self, enabled: bool) -> Self {
        self.surface_null_targets = enabled;
        self
    }
}

//! Applied/pending pairs for values that change across the whole pipeline.
//!
//! Version and quota both follow the same rule: a new desired value is
//! parked as `pending` and only becomes `applied` on a pass where every
//! stage reports Completed.

use std::mem;

/// What happens to an existing pending value when a different desired value
/// shows up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingPolicy {
    /// Leave an in-flight value alone until it is committed.
    Keep,
    /// Always track the latest desired value.
    Replace,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DualTrack {
    pub applied: String,
    pub pending: String,
}

impl DualTrack {
    pub fn new(applied: &str, pending: &str) -> Self {
        Self {
            applied: applied.to_string(),
            pending: pending.to_string(),
        }
    }

    /// Nothing has ever been resolved.
    pub fn is_unset(&self) -> bool {
        self.applied.is_empty() && self.pending.is_empty()
    }

    /// Enter a transition towards `desired` when the track is unset or the
    /// applied value differs.  Returns whether a transition is underway.
    ///
    /// A desired value back at `applied` abandons any in-flight value, so a
    /// later commit cannot promote something no pass converged under.
    pub fn begin(&mut self, desired: &str, policy: PendingPolicy) -> bool {
        if !self.is_unset() && desired == self.applied {
            self.pending.clear();
            return false;
        }
        match policy {
            PendingPolicy::Keep if !self.pending.is_empty() => {}
            _ => self.pending = desired.to_string(),
        }
        true
    }

    /// Promote the pending value.  Returns the newly applied value, or `None`
    /// when nothing was pending.
    pub fn commit(&mut self) -> Option<&str> {
        if self.pending.is_empty() {
            return None;
        }
        self.applied = mem::take(&mut self.pending);
        Some(&self.applied)
    }
}

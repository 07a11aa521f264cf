//! Update coalescing.
//!
//! Inbound updates are buffered per [`ChangeKind`] and deduplicated by entity
//! id: a newer update for the same id replaces the older one and moves to the
//! end of the sequence. The buffer is flushed as one batch per kind once no
//! update has arrived for the notification delay.

use std::time::Duration;

use boardsync_protocol::{ChangeKind, Entity};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Buffered updates, one ordered sequence per kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingUpdates {
    blocks: Vec<Entity>,
    categories: Vec<Entity>,
}

impl PendingUpdates {
    /// Insert an update, evicting any buffered entity with the same id.
    pub fn insert(&mut self, kind: ChangeKind, entity: Entity) {
        let sequence = self.sequence_mut(kind);
        sequence.retain(|e| e.id != entity.id);
        sequence.push(entity);
    }

    pub fn get(&self, kind: ChangeKind) -> &[Entity] {
        match kind {
            ChangeKind::Block => &self.blocks,
            ChangeKind::Category => &self.categories,
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len() + self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.categories.is_empty()
    }

    fn sequence_mut(&mut self, kind: ChangeKind) -> &mut Vec<Entity> {
        match kind {
            ChangeKind::Block => &mut self.blocks,
            ChangeKind::Category => &mut self.categories,
        }
    }
}

/// Buffer plus its debounce timer.
#[derive(Default)]
pub(crate) struct Coalescer {
    pending: PendingUpdates,
    timer: Option<JoinHandle<()>>,
    /// When the first update of the current buffer epoch arrived
    epoch_started: Option<Instant>,
}

impl Coalescer {
    /// Buffer an update and return how long the flush timer should wait.
    ///
    /// Without a ceiling this is always `delay`. With one, the wait shrinks
    /// so that no update stays buffered longer than `ceiling`.
    pub fn push(
        &mut self,
        kind: ChangeKind,
        entity: Entity,
        now: Instant,
        delay: Duration,
        ceiling: Option<Duration>,
    ) -> Duration {
        self.pending.insert(kind, entity);
        let started = *self.epoch_started.get_or_insert(now);
        match ceiling {
            Some(max) => delay.min(max.saturating_sub(now.duration_since(started))),
            None => delay,
        }
    }

    /// Install a new flush timer, aborting the previous one.
    pub fn arm(&mut self, timer: JoinHandle<()>) {
        if let Some(previous) = self.timer.replace(timer) {
            previous.abort();
        }
    }

    /// Swap the buffer out for an empty one and start a new epoch.
    pub fn take(&mut self) -> PendingUpdates {
        self.timer = None;
        self.epoch_started = None;
        std::mem::take(&mut self.pending)
    }

    /// Abort the flush timer and drop whatever is buffered.
    pub fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.epoch_started = None;
        self.pending = PendingUpdates::default();
    }

    #[cfg(test)]
    pub fn pending(&self) -> &PendingUpdates {
        &self.pending
    }
}

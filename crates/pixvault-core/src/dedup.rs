//! Process-wide fingerprint index with atomic reserve-or-read.
//!
//! Exactly one task wins the reservation for a fingerprint. Other tasks
//! computing the same fingerprint wait until the winner either commits an
//! image id (they then see `Existing`) or drops its reservation (one of them
//! then wins in turn).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

use crate::types::{Fingerprint, ImageId};

enum Slot {
    Committed(ImageId),
    /// Closed when the owning reservation commits or drops.
    Pending(watch::Receiver<()>),
}

/// Answer to [`DedupIndex::lookup_or_reserve`].
pub enum Lookup {
    Existing(ImageId),
    Reserved(Reservation),
}

/// In-memory map from fingerprint to image identity.
#[derive(Default)]
pub struct DedupIndex {
    slots: Mutex<HashMap<Fingerprint, Slot>>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an image that is already persisted, e.g. when reopening a store.
    pub fn insert_committed(&self, fingerprint: Fingerprint, id: ImageId) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.insert(fingerprint, Slot::Committed(id));
    }

    /// Resolve `fingerprint` to an existing image, or reserve it for the caller.
    ///
    /// If another task holds the reservation this waits for it to resolve
    /// and then looks again.
    pub async fn lookup_or_reserve(self: &Arc<Self>, fingerprint: &Fingerprint) -> Lookup {
        loop {
            let mut pending = {
                let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
                match slots.get(fingerprint) {
                    Some(Slot::Committed(id)) => return Lookup::Existing(*id),
                    Some(Slot::Pending(rx)) => rx.clone(),
                    None => {
                        let (tx, rx) = watch::channel(());
                        slots.insert(fingerprint.clone(), Slot::Pending(rx));
                        return Lookup::Reserved(Reservation {
                            index: Arc::clone(self),
                            fingerprint: fingerprint.clone(),
                            _tx: tx,
                            committed: false,
                        });
                    }
                }
            };

            // Err means the sender dropped, which is the wake-up we want.
            let _ = pending.changed().await;
        }
    }

    /// Current committed id for a fingerprint, without reserving.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<ImageId> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        match slots.get(fingerprint) {
            Some(Slot::Committed(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .values()
            .filter(|slot| matches!(slot, Slot::Committed(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive right to create the image for one fingerprint.
///
/// Dropping it without [`commit`](Reservation::commit) releases the
/// fingerprint so a later task can try again.
pub struct Reservation {
    index: Arc<DedupIndex>,
    fingerprint: Fingerprint,
    // Held only so waiters wake when it drops.
    _tx: watch::Sender<()>,
    committed: bool,
}

impl Reservation {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Publish the winning image id. Waiters resolve to `Existing(id)`.
    pub fn commit(mut self, id: ImageId) {
        let mut slots = self
            .index
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        slots.insert(self.fingerprint.clone(), Slot::Committed(id));
        self.committed = true;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut slots = self
            .index
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if matches!(slots.get(&self.fingerprint), Some(Slot::Pending(_))) {
            slots.remove(&self.fingerprint);
        }
        tracing::trace!("Released dedup reservation for {}", self.fingerprint);
    }
}

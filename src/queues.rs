//! The three access-order queues (Window, Probation, Protected) as
//! doubly-linked lists threaded through `Link::prev`/`Link::next` slab
//! indices.
//!
//! All mutation here happens under the maintenance lock (see
//! `maintenance.rs`); per Design Notes §9 the links themselves need no
//! atomicity. Grounded on the teacher's `memory/buffer_pool/arc.rs`
//! segmented-list structure (T1/T2/B1/B2 as separate `VecDeque<PageId>`s),
//! generalized from owning `VecDeque`s to intrusive links over the shared
//! slab so moves between regions are O(1) instead of O(n) `retain`.

use crate::entry::{Link, QueueTag};
use crate::slab::{EntryId, Slab};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum QueueId {
    Window,
    Probation,
    Protected,
}

impl QueueId {
    fn tag(self) -> QueueTag {
        match self {
            QueueId::Window => QueueTag::Window,
            QueueId::Probation => QueueTag::Probation,
            QueueId::Protected => QueueTag::Protected,
        }
    }
}

#[derive(Default)]
struct Region {
    head: Option<EntryId>,
    tail: Option<EntryId>,
    weight: u64,
    len: u64,
}

/// Owns the head/tail pointers and weight totals for all three regions.
/// The entries themselves (and their prev/next links) live in the shared
/// `Slab` passed into every method.
pub(crate) struct Queues {
    window: Region,
    probation: Region,
    protected: Region,
}

impl Queues {
    pub fn new() -> Self {
        Queues { window: Region::default(), probation: Region::default(), protected: Region::default() }
    }

    fn region(&self, id: QueueId) -> &Region {
        match id {
            QueueId::Window => &self.window,
            QueueId::Probation => &self.probation,
            QueueId::Protected => &self.protected,
        }
    }

    fn region_mut(&mut self, id: QueueId) -> &mut Region {
        match id {
            QueueId::Window => &mut self.window,
            QueueId::Probation => &mut self.probation,
            QueueId::Protected => &mut self.protected,
        }
    }

    pub fn weight(&self, id: QueueId) -> u64 {
        self.region(id).weight
    }

    pub fn len(&self, id: QueueId) -> u64 {
        self.region(id).len
    }

    pub fn head(&self, id: QueueId) -> Option<EntryId> {
        self.region(id).head
    }

    /// Unlinks `entry_id` from whichever region it currently belongs to.
    /// No-op if the entry is already `Dead`/unlinked.
    pub fn unlink<K>(&mut self, slab: &mut Slab<Link<K>>, entry_id: EntryId) {
        let (queue, prev, next, weight) = match slab.get(entry_id) {
            Some(entry) if entry.queue != QueueTag::Dead => (entry.queue, entry.prev, entry.next, entry.weight),
            _ => return,
        };
        let id = match tag_to_id(queue) {
            Some(id) => id,
            None => return,
        };

        match prev {
            Some(p) => slab.get_mut(p).expect("prev link must be live").next = next,
            None => self.region_mut(id).head = next,
        }
        match next {
            Some(n) => slab.get_mut(n).expect("next link must be live").prev = prev,
            None => self.region_mut(id).tail = prev,
        }

        let region = self.region_mut(id);
        region.weight = region.weight.saturating_sub(weight as u64);
        region.len = region.len.saturating_sub(1);

        let entry = slab.get_mut(entry_id).expect("entry just read must still exist");
        entry.prev = None;
        entry.next = None;
        entry.queue = QueueTag::Dead;
    }

    /// Appends `entry_id` to the tail of `id`'s region. The entry must not
    /// already belong to a region.
    pub fn append_tail<K>(&mut self, slab: &mut Slab<Link<K>>, id: QueueId, entry_id: EntryId) {
        let weight = {
            let entry = slab.get_mut(entry_id).expect("entry must exist to be appended");
            debug_assert_eq!(entry.queue, QueueTag::Dead, "append_tail requires an unlinked entry");
            entry.queue = id.tag();
            entry.prev = self.region(id).tail;
            entry.next = None;
            entry.weight
        };

        let old_tail = self.region(id).tail;
        match old_tail {
            Some(t) => slab.get_mut(t).expect("old tail must be live").next = Some(entry_id),
            None => self.region_mut(id).head = Some(entry_id),
        }
        let region = self.region_mut(id);
        region.tail = Some(entry_id);
        region.weight += weight as u64;
        region.len += 1;
    }

    /// Moves an already-linked entry to the tail of its current region.
    pub fn move_to_tail<K>(&mut self, slab: &mut Slab<Link<K>>, entry_id: EntryId) {
        let queue = match slab.get(entry_id) {
            Some(entry) => entry.queue,
            None => return,
        };
        let id = match tag_to_id(queue) {
            Some(id) => id,
            None => return,
        };
        if self.region(id).tail == Some(entry_id) {
            return;
        }
        self.unlink(slab, entry_id);
        self.append_tail(slab, id, entry_id);
    }

    /// Moves an entry that belongs to one region directly into another's
    /// tail (used for W→P and P→M transitions).
    pub fn move_to_queue<K>(&mut self, slab: &mut Slab<Link<K>>, entry_id: EntryId, target: QueueId) {
        self.unlink(slab, entry_id);
        self.append_tail(slab, target, entry_id);
    }

    /// Iterates a region from head (coldest) to tail (warmest), returning
    /// owned ids so callers may safely mutate the slab between steps.
    pub fn iter_from_head<K>(&self, slab: &Slab<Link<K>>, id: QueueId) -> Vec<EntryId> {
        let mut out = Vec::with_capacity(self.len(id) as usize);
        let mut cursor = self.region(id).head;
        while let Some(current) = cursor {
            out.push(current);
            cursor = slab.get(current).and_then(|e| e.next);
        }
        out
    }

    /// Iterates a region from tail (warmest) to head (coldest).
    pub fn iter_from_tail<K>(&self, slab: &Slab<Link<K>>, id: QueueId) -> Vec<EntryId> {
        let mut out = Vec::with_capacity(self.len(id) as usize);
        let mut cursor = self.region(id).tail;
        while let Some(current) = cursor {
            out.push(current);
            cursor = slab.get(current).and_then(|e| e.prev);
        }
        out
    }

    /// Applies a signed weight delta to whichever region `tag` names, for
    /// an entry whose own `Link::weight` has already been updated by the
    /// caller (an `UpdateTask`). No-op for `QueueTag::Dead`.
    pub fn adjust_weight_for_tag(&mut self, tag: QueueTag, delta: i64) {
        if let Some(id) = tag_to_id(tag) {
            let region = self.region_mut(id);
            if delta >= 0 {
                region.weight += delta as u64;
            } else {
                region.weight = region.weight.saturating_sub((-delta) as u64);
            }
        }
    }
}

fn tag_to_id(tag: QueueTag) -> Option<QueueId> {
    match tag {
        QueueTag::Window => Some(QueueId::Window),
        QueueTag::Probation => Some(QueueId::Probation),
        QueueTag::Protected => Some(QueueId::Protected),
        QueueTag::Dead => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_entry(slab: &mut Slab<Link<u32>>, key: u32) -> EntryId {
        slab.insert(Link::new(key, 1))
    }

    #[test]
    fn append_and_unlink_maintain_head_tail() {
        let mut slab = Slab::new();
        let mut queues = Queues::new();
        let a = new_entry(&mut slab, 1);
        let b = new_entry(&mut slab, 2);
        let c = new_entry(&mut slab, 3);
        queues.append_tail(&mut slab, QueueId::Window, a);
        queues.append_tail(&mut slab, QueueId::Window, b);
        queues.append_tail(&mut slab, QueueId::Window, c);

        assert_eq!(queues.iter_from_head(&slab, QueueId::Window), vec![a, b, c]);
        assert_eq!(queues.weight(QueueId::Window), 3);

        queues.unlink(&mut slab, b);
        assert_eq!(queues.iter_from_head(&slab, QueueId::Window), vec![a, c]);
        assert_eq!(queues.weight(QueueId::Window), 2);
        assert_eq!(slab.get(b).unwrap().queue, QueueTag::Dead);
    }

    #[test]
    fn move_to_tail_reorders_without_changing_membership() {
        let mut slab = Slab::new();
        let mut queues = Queues::new();
        let a = new_entry(&mut slab, 1);
        let b = new_entry(&mut slab, 2);
        queues.append_tail(&mut slab, QueueId::Probation, a);
        queues.append_tail(&mut slab, QueueId::Probation, b);

        queues.move_to_tail(&mut slab, a);
        assert_eq!(queues.iter_from_head(&slab, QueueId::Probation), vec![b, a]);
        assert_eq!(queues.len(QueueId::Probation), 2);
    }

    #[test]
    fn move_to_queue_transfers_weight_between_regions() {
        let mut slab = Slab::new();
        let mut queues = Queues::new();
        let a = new_entry(&mut slab, 1);
        queues.append_tail(&mut slab, QueueId::Window, a);
        queues.move_to_queue(&mut slab, a, QueueId::Probation);

        assert_eq!(queues.weight(QueueId::Window), 0);
        assert_eq!(queues.weight(QueueId::Probation), 1);
        assert_eq!(slab.get(a).unwrap().queue, QueueTag::Probation);
    }

    #[test]
    fn adjust_weight_for_tag_tracks_increases_and_decreases() {
        let mut slab = Slab::new();
        let mut queues = Queues::new();
        let a = new_entry(&mut slab, 1);
        queues.append_tail(&mut slab, QueueId::Window, a);
        queues.adjust_weight_for_tag(QueueTag::Window, 4);
        assert_eq!(queues.weight(QueueId::Window), 5);
        queues.adjust_weight_for_tag(QueueTag::Window, -2);
        assert_eq!(queues.weight(QueueId::Window), 3);
    }
}

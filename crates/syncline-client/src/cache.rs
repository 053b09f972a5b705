//! Message cache reconciler.
//!
//! Merges inbound and optimistic message events into an ordered, paginated,
//! deduplicated store keyed by room. The dedup rule is replace-in-place by
//! id, which makes re-application of the same record idempotent: at most one
//! visible copy per id regardless of how the optimistic send and the server
//! echo interleave.
//!
//! # Invariants
//!
//! - Within a room, an id appears in at most one page.
//! - The flattened view is ordered by `(created_at, id)` ascending.
//! - Appending new inbound messages targets the last (most recent) page;
//!   older history is prepended as a new earliest page.

use std::collections::HashMap;

use syncline_core::{Delivery, Message, MessageId, RoomId};

/// Ordered page sequence for one room, oldest page first.
#[derive(Debug, Clone, Default)]
struct PageStore {
    pages: Vec<Vec<Message>>,
}

impl PageStore {
    /// Locate a message by id. Returns (page index, index within page).
    fn position(&self, id: MessageId) -> Option<(usize, usize)> {
        self.pages.iter().enumerate().find_map(|(pi, page)| {
            page.iter().position(|m| m.id == id).map(|mi| (pi, mi))
        })
    }

    fn contains(&self, id: MessageId) -> bool {
        self.position(id).is_some()
    }

    /// Insert into the last page at the message's `(created_at, id)`
    /// position, preserving the ordering invariant for late arrivals.
    fn insert_last_sorted(&mut self, message: Message) {
        if self.pages.is_empty() {
            self.pages.push(Vec::new());
        }
        // Index is valid: the store always has at least one page here.
        if let Some(last) = self.pages.last_mut() {
            let key = message.sort_key();
            let at = last.partition_point(|m| m.sort_key() <= key);
            last.insert(at, message);
        }
    }

    fn flattened(&self) -> impl Iterator<Item = &Message> {
        self.pages.iter().flatten()
    }
}

/// Per-room message store with optimistic reconciliation.
///
/// Mutated only through this API; the UI layer reads the flattened view and
/// never writes. Confirmed records whose optimistic placeholder was evicted
/// (room switched away mid-flight) are parked per room and drained when the
/// room is attached again, so they are neither lost nor force-rendered into
/// an inactive room's transient state.
#[derive(Debug, Clone, Default)]
pub struct MessageCache {
    rooms: HashMap<RoomId, PageStore>,
    parked: HashMap<RoomId, Vec<Message>>,
}

impl MessageCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a server-pushed message into its room's store.
    ///
    /// If the id already exists anywhere, the existing entry is replaced in
    /// place (edits arrive as fresh full records); otherwise the message is
    /// inserted into the last page at its ordering position.
    pub fn apply_inbound(&mut self, message: Message) {
        let store = self.rooms.entry(message.room_id).or_default();
        if let Some((pi, mi)) = store.position(message.id) {
            store.pages[pi][mi] = message;
        } else {
            store.insert_last_sorted(message);
        }
    }

    /// Append an optimistic local entry to the last page.
    ///
    /// The entry should carry a [`MessageId::Local`] placeholder id and
    /// `Delivery::Pending`.
    pub fn apply_optimistic(&mut self, message: Message) {
        self.rooms.entry(message.room_id).or_default().insert_last_sorted(message);
    }

    /// Replace the optimistic placeholder `temp_id` with the confirmed
    /// record, preserving its position (and therefore visual ordering).
    ///
    /// Returns `false` when no placeholder exists in the confirmed record's
    /// room (it was evicted by a switch); the caller decides whether to park
    /// the record or merge it directly. If the confirmed id already arrived
    /// through [`MessageCache::apply_inbound`] (server echo raced the
    /// confirmation), the placeholder is simply dropped.
    pub fn reconcile(&mut self, temp_id: MessageId, confirmed: Message) -> bool {
        let Some(store) = self.rooms.get_mut(&confirmed.room_id) else {
            return false;
        };
        let Some((pi, mi)) = store.position(temp_id) else {
            return false;
        };

        if store.contains(confirmed.id) {
            store.pages[pi].remove(mi);
        } else {
            store.pages[pi][mi] = confirmed;
        }
        true
    }

    /// Mark an optimistic entry as rejected. The bubble stays visible with
    /// a failure indicator rather than silently disappearing.
    pub fn mark_failed(&mut self, room_id: RoomId, temp_id: MessageId) -> bool {
        let Some(store) = self.rooms.get_mut(&room_id) else {
            return false;
        };
        let Some((pi, mi)) = store.position(temp_id) else {
            return false;
        };
        store.pages[pi][mi].delivery = Delivery::Failed;
        true
    }

    /// Remove a message. Returns the removed record for rollback stashing.
    pub fn remove(&mut self, room_id: RoomId, id: MessageId) -> Option<Message> {
        let store = self.rooms.get_mut(&room_id)?;
        let (pi, mi) = store.position(id)?;
        Some(store.pages[pi].remove(mi))
    }

    /// Read a message by id.
    pub fn get(&self, room_id: RoomId, id: MessageId) -> Option<&Message> {
        let store = self.rooms.get(&room_id)?;
        let (pi, mi) = store.position(id)?;
        Some(&store.pages[pi][mi])
    }

    /// Insert an older history page before the current earliest page.
    ///
    /// Messages already present in any page are skipped, so the
    /// no-cross-page-duplicates invariant holds even when page boundaries
    /// overlap.
    pub fn prepend_page(&mut self, room_id: RoomId, older: Vec<Message>) {
        let store = self.rooms.entry(room_id).or_default();
        let page: Vec<Message> = older.into_iter().filter(|m| !store.contains(m.id)).collect();
        if !page.is_empty() {
            store.pages.insert(0, page);
        }
    }

    /// Discard the entire cache for a room.
    ///
    /// Called when leaving a room so a later return starts from a fresh
    /// fetch instead of stale pages. Parked confirmations survive.
    pub fn invalidate(&mut self, room_id: RoomId) {
        self.rooms.remove(&room_id);
    }

    /// Park a confirmed record for a room that is not currently attached.
    pub fn park(&mut self, message: Message) {
        self.parked.entry(message.room_id).or_default().push(message);
    }

    /// Take all parked confirmations for a room, to be merged through
    /// [`MessageCache::apply_inbound`] on attach.
    pub fn drain_parked(&mut self, room_id: RoomId) -> Vec<Message> {
        self.parked.remove(&room_id).unwrap_or_default()
    }

    /// Flattened, ordered view of a room's messages.
    pub fn messages(&self, room_id: RoomId) -> Vec<&Message> {
        self.rooms.get(&room_id).map_or_else(Vec::new, |s| s.flattened().collect())
    }

    /// Number of pages held for a room.
    pub fn page_count(&self, room_id: RoomId) -> usize {
        self.rooms.get(&room_id).map_or(0, |s| s.pages.len())
    }
}

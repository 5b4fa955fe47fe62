//! The slotted-page node: header, slot directory, and heap, all packed into
//! one fixed-size 4096-byte page. Grounded in the teacher's `basic_node.rs`
//! (space accounting, `request_space`/compaction, hints) and
//! `head_stripped_node.rs` (head/remainder slot split), unified here into a
//! single node type instead of the teacher's tagged union of node variants:
//! the spec names one concrete byte layout, not a dispatch-over-variants
//! system, so there is exactly one `Node` struct for both inner and leaf
//! pages (`header.is_leaf` distinguishes them, same as the teacher's own
//! node headers do).

use std::cmp::Ordering;
use std::mem::size_of;

use smallvec::SmallVec;

use crate::eytzinger;
use crate::find_separator::find_separator;
use crate::util::{common_prefix_len, head};

/// Whole-page size; every node is exactly this many bytes.
pub const PAGE_SIZE: usize = 4096;
/// Coarse search-acceleration samples kept per node.
pub const HINT_COUNT: usize = 16;
/// `remainder_len` value reserved to mean "see the explicit 2-byte length
/// that follows the slot header instead".
const LARGE_SENTINEL: u8 = 255;
/// A key remainder (bytes beyond the 4-byte head) longer than this needs
/// the explicit large-entry encoding.
const MAX_INLINE_REMAINDER: usize = LARGE_SENTINEL as usize - 1;
/// Byte size of one slot-directory entry.
const SLOT_SIZE: usize = size_of::<Slot>();

/// One 8-byte slot-directory entry: a heap offset plus enough of the key to
/// usually decide an ordering comparison without touching the heap at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct Slot {
    offset: u16,
    head_len: u8,
    remainder_len: u8,
    head: u32,
}

/// Locates a fence key (or the empty slice, meaning -infinity/+infinity)
/// in the heap.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
struct FenceSlot {
    offset: u16,
    len: u16,
}

#[repr(C)]
struct Header {
    is_leaf: bool,
    is_sorted: bool,
    count: u16,
    space_used: u16,
    free_offset: u16,
    prefix_len: u16,
    lower_fence: FenceSlot,
    upper_fence: FenceSlot,
    /// Rightmost child pointer for inner nodes; bit pattern of `*mut Node`.
    /// Unused (left zero) for leaves.
    upper_child: usize,
    hint: [u32; HINT_COUNT],
}

/// A fixed 4096-byte slotted page: header, a slot directory growing from
/// byte 0 of `data` upward, and a heap growing down from the top of `data`.
/// Every stored key is implicitly prefixed with `prefix()`; only the bytes
/// beyond that are ever written into a slot's head/heap record.
#[repr(C)]
pub struct Node {
    header: Header,
    data: [u8; Node::DATA_LEN],
}

const _: () = assert!(size_of::<Slot>() == 8);
const _: () = assert!(size_of::<Node>() == PAGE_SIZE);

enum Payload<'a> {
    Leaf(&'a [u8]),
    Child(*mut Node),
}

enum PrefixCmp<'a> {
    Before,
    After,
    Within(&'a [u8]),
}

struct RecordLoc {
    header_off: u16,
    trailing_off: u16,
    trailing_len: u16,
    payload_off: u16,
}

impl Node {
    pub const DATA_LEN: usize = PAGE_SIZE - size_of::<Header>();

    pub fn new(is_leaf: bool) -> Self {
        Node {
            header: Header {
                is_leaf,
                is_sorted: true,
                count: 0,
                space_used: 0,
                free_offset: Self::DATA_LEN as u16,
                prefix_len: 0,
                lower_fence: FenceSlot::default(),
                upper_fence: FenceSlot::default(),
                upper_child: 0,
                hint: [0; HINT_COUNT],
            },
            data: [0; Self::DATA_LEN],
        }
    }

    pub fn new_boxed(is_leaf: bool) -> *mut Node {
        Box::into_raw(Box::new(Self::new(is_leaf)))
    }

    pub fn new_inner_boxed(upper_child: *mut Node) -> *mut Node {
        let mut n = Self::new(false);
        n.header.upper_child = upper_child as usize;
        Box::into_raw(Box::new(n))
    }

    /// Recursively frees `ptr` and, for inner nodes, every descendant. Not a
    /// `Drop` impl: scratch nodes are built up piecemeal on the stack during
    /// split/merge and must never be torn down just because a local binding
    /// went out of scope before being committed into the tree.
    ///
    /// # Safety
    /// `ptr` must be a live, uniquely-owned node (and, transitively, its
    /// children) not referenced anywhere else.
    pub unsafe fn destroy(ptr: *mut Node) {
        let n = &*ptr;
        if !n.header.is_leaf {
            for i in 0..n.count() {
                Self::destroy(n.child_at_slot(i));
            }
            if n.header.upper_child != 0 {
                Self::destroy(n.header.upper_child as *mut Node);
            }
        }
        Self::dealloc_page(ptr);
    }

    /// Frees just this page, without recursing into children. Used after a
    /// merge has already transferred a left sibling's children into the
    /// surviving node.
    ///
    /// # Safety
    /// `ptr` must be a live, uniquely-owned page whose children (if any)
    /// are owned elsewhere now.
    unsafe fn dealloc_page(ptr: *mut Node) {
        drop(Box::from_raw(ptr));
    }

    // ---- basic accessors ----------------------------------------------

    pub fn is_leaf(&self) -> bool {
        self.header.is_leaf
    }

    pub fn is_sorted(&self) -> bool {
        self.header.is_sorted
    }

    pub fn count(&self) -> usize {
        self.header.count as usize
    }

    pub fn prefix_len(&self) -> usize {
        self.header.prefix_len as usize
    }

    fn prefix(&self) -> &[u8] {
        &self.lower_fence_bytes()[..self.prefix_len()]
    }

    pub fn lower_fence_bytes(&self) -> &[u8] {
        &self.data[self.header.lower_fence.offset as usize..][..self.header.lower_fence.len as usize]
    }

    pub fn upper_fence_bytes(&self) -> &[u8] {
        &self.data[self.header.upper_fence.offset as usize..][..self.header.upper_fence.len as usize]
    }

    /// Sets both fence keys (full, untruncated bytes; an empty slice means
    /// -infinity for the lower fence or +infinity for the upper one) and
    /// recomputes `prefix_len` from them. Must be called before any entries
    /// are inserted (it rewrites the heap from scratch).
    pub fn set_fences(&mut self, lower: &[u8], upper: &[u8]) {
        debug_assert_eq!(self.header.count, 0);
        let upper_off = self.write_data(upper);
        self.header.upper_fence = FenceSlot { offset: upper_off, len: upper.len() as u16 };
        let lower_off = self.write_data(lower);
        self.header.lower_fence = FenceSlot { offset: lower_off, len: lower.len() as u16 };
        self.header.prefix_len = if lower.is_empty() || upper.is_empty() {
            0
        } else {
            common_prefix_len(lower, upper) as u16
        };
    }

    /// True once post-compaction free space would reach the 60% threshold.
    pub fn is_underfull(&self) -> bool {
        self.free_space_after_compaction() * 5 >= Self::DATA_LEN * 3
    }

    // ---- space accounting -----------------------------------------------

    fn free_space(&self) -> usize {
        self.header.free_offset as usize - self.count() * SLOT_SIZE
    }

    fn free_space_after_compaction(&self) -> usize {
        Self::DATA_LEN - self.header.space_used as usize - self.count() * SLOT_SIZE
    }

    /// Ensures at least `n` contiguous bytes are available, compacting in
    /// place if the space exists but is fragmented. Fails only if `n` bytes
    /// could never fit even after compaction.
    fn request_space(&mut self, n: usize) -> Result<(), ()> {
        if n <= self.free_space() {
            return Ok(());
        }
        if n > self.free_space_after_compaction() {
            return Err(());
        }
        self.compactify();
        debug_assert!(n <= self.free_space());
        Ok(())
    }

    fn compactify(&mut self) {
        let mut tmp = Node::new(self.header.is_leaf);
        tmp.set_fences(self.lower_fence_bytes(), self.upper_fence_bytes());
        tmp.header.upper_child = self.header.upper_child;
        for i in 0..self.count() {
            self.copy_entry(i, &mut tmp).expect("compaction cannot grow total size");
        }
        // Compaction walks physical slots in their existing order, Eytzinger
        // or sorted; it must carry that flag over rather than default to
        // `Node::new`'s "freshly sorted" state, or a compacted Eytzinger
        // node would be misread as sorted by later lookups.
        tmp.header.is_sorted = self.header.is_sorted;
        tmp.make_hint();
        *self = tmp;
    }

    /// Writes `bytes` at the top of the heap (free_offset decreases),
    /// returning the offset the data now starts at. Successive calls land
    /// at successively lower addresses, so building a multi-field record
    /// that must read low-to-high means writing its fields high-to-low.
    fn write_data(&mut self, bytes: &[u8]) -> u16 {
        debug_assert!(bytes.len() <= self.free_space());
        self.header.free_offset -= bytes.len() as u16;
        let off = self.header.free_offset;
        self.data[off as usize..][..bytes.len()].copy_from_slice(bytes);
        self.header.space_used += bytes.len() as u16;
        off
    }

    // ---- slot directory ---------------------------------------------------

    fn slot(&self, i: usize) -> Slot {
        debug_assert!(i < self.count());
        let off = i * SLOT_SIZE;
        let bytes: [u8; 8] = self.data[off..off + 8].try_into().unwrap();
        Slot {
            offset: u16::from_ne_bytes(bytes[0..2].try_into().unwrap()),
            head_len: bytes[2],
            remainder_len: bytes[3],
            head: u32::from_ne_bytes(bytes[4..8].try_into().unwrap()),
        }
    }

    fn set_slot(&mut self, i: usize, s: Slot) {
        let off = i * SLOT_SIZE;
        self.data[off..off + 2].copy_from_slice(&s.offset.to_ne_bytes());
        self.data[off + 2] = s.head_len;
        self.data[off + 3] = s.remainder_len;
        self.data[off + 4..off + 8].copy_from_slice(&s.head.to_ne_bytes());
    }

    fn record_loc(&self, s: Slot) -> RecordLoc {
        let header_off = s.offset;
        let (trailing_off, trailing_len) = if s.remainder_len == LARGE_SENTINEL {
            let len_bytes: [u8; 2] = self.data[header_off as usize + 8..][..2].try_into().unwrap();
            (header_off + 8 + 2, u16::from_ne_bytes(len_bytes))
        } else {
            (header_off + 8, s.remainder_len as u16)
        };
        RecordLoc { header_off, trailing_off, trailing_len, payload_off: trailing_off + trailing_len }
    }

    fn slot_trailing(&self, s: Slot) -> &[u8] {
        let rec = self.record_loc(s);
        &self.data[rec.trailing_off as usize..][..rec.trailing_len as usize]
    }

    /// The stored key remainder (after this node's prefix) for slot `idx`,
    /// reconstructed from the packed head plus the heap trailing bytes.
    /// Owned rather than borrowed: when the remainder is entirely inline
    /// (fits in the 4-byte head) there is no heap slice to borrow from.
    fn full_remainder(&self, idx: usize) -> SmallVec<[u8; 32]> {
        let s = self.slot(idx);
        let mut v = SmallVec::new();
        v.extend_from_slice(&s.head.to_be_bytes()[..s.head_len as usize]);
        v.extend_from_slice(self.slot_trailing(s));
        v
    }

    /// The complete, un-truncated key stored at slot `idx`.
    pub fn full_key(&self, idx: usize) -> SmallVec<[u8; 64]> {
        let mut v = SmallVec::new();
        v.extend_from_slice(self.prefix());
        v.extend_from_slice(&self.full_remainder(idx));
        v
    }

    pub fn value_at(&self, idx: usize) -> &[u8] {
        debug_assert!(self.header.is_leaf);
        let s = self.slot(idx);
        let rec = self.record_loc(s);
        let len_bytes: [u8; 8] = self.data[rec.header_off as usize..][..8].try_into().unwrap();
        let len = u64::from_ne_bytes(len_bytes) as usize;
        &self.data[rec.payload_off as usize..][..len]
    }

    fn child_at_slot(&self, idx: usize) -> *mut Node {
        debug_assert!(!self.header.is_leaf);
        let s = self.slot(idx);
        let bytes: [u8; 8] = self.data[s.offset as usize..][..8].try_into().unwrap();
        u64::from_ne_bytes(bytes) as usize as *mut Node
    }

    /// Child responsible for `idx`: a regular slot's child for `idx <
    /// count`, or `upper_child` for `idx == count`.
    pub fn child_at(&self, idx: usize) -> *mut Node {
        if idx == self.count() {
            self.header.upper_child as *mut Node
        } else {
            self.child_at_slot(idx)
        }
    }

    // ---- comparisons and search --------------------------------------------

    fn split_query(truncated: &[u8]) -> (u32, &[u8]) {
        let head_len = truncated.len().min(4);
        (head(truncated), &truncated[head_len..])
    }

    fn cmp_entry_to_query(&self, s: Slot, q_head: u32, q_trailing: &[u8], q_len: usize) -> Ordering {
        s.head
            .cmp(&q_head)
            .then_with(|| self.slot_trailing(s).cmp(q_trailing))
            .then_with(|| (s.head_len as usize + self.record_loc(s).trailing_len as usize).cmp(&q_len))
    }

    fn cmp_slots(&self, a: Slot, b: Slot) -> Ordering {
        a.head
            .cmp(&b.head)
            .then_with(|| self.slot_trailing(a).cmp(self.slot_trailing(b)))
            .then_with(|| {
                (a.head_len as usize + self.record_loc(a).trailing_len as usize)
                    .cmp(&(b.head_len as usize + self.record_loc(b).trailing_len as usize))
            })
    }

    fn lower_bound_local(&self, truncated: &[u8]) -> (usize, bool) {
        let (q_head, q_trailing) = Self::split_query(truncated);
        let q_len = truncated.len();
        let count = self.count();
        let (mut lo, mut hi) = if count > HINT_COUNT * 2 {
            self.search_hint(q_head)
        } else {
            (0, count)
        };
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.cmp_entry_to_query(self.slot(mid), q_head, q_trailing, q_len) {
                Ordering::Less => lo = mid + 1,
                _ => hi = mid,
            }
        }
        let found = lo < count
            && self.cmp_entry_to_query(self.slot(lo), q_head, q_trailing, q_len) == Ordering::Equal;
        (lo, found)
    }

    /// Eytzinger-ordered descent over the physical slot array (inner nodes
    /// only, when `!is_sorted()`). See `crate::eytzinger::lower_bound`.
    fn eytzinger_lower_bound(&self, truncated: &[u8]) -> usize {
        let (q_head, q_trailing) = Self::split_query(truncated);
        let q_len = truncated.len();
        eytzinger::lower_bound(self.count(), |i| {
            self.cmp_entry_to_query(self.slot(i), q_head, q_trailing, q_len)
        })
    }

    fn search_hint(&self, target_head: u32) -> (usize, usize) {
        let count = self.count();
        let dist = count / (HINT_COUNT + 1);
        let mut lo = 0;
        let mut hi = HINT_COUNT;
        while lo < hi && self.header.hint[lo] < target_head {
            lo += 1;
        }
        while hi > lo && self.header.hint[hi - 1] > target_head {
            hi -= 1;
        }
        let lower = lo * dist;
        let upper = if hi == HINT_COUNT { count } else { (hi + 1) * dist };
        (lower, upper.min(count))
    }

    fn make_hint(&mut self) {
        let count = self.count();
        let dist = count / (HINT_COUNT + 1);
        if dist == 0 {
            return;
        }
        for i in 0..HINT_COUNT {
            self.header.hint[i] = self.slot(dist * (i + 1)).head;
        }
    }

    fn update_hint(&mut self, slot_id: usize) {
        let count = self.count();
        let dist = count / (HINT_COUNT + 1);
        if dist == 0 {
            return;
        }
        // A partial refresh from `slot_id`'s neighborhood is only valid when
        // this insert left `dist` unchanged from what it was for the
        // previous `count - 1`: if `dist` just grew, every earlier hint was
        // filled from stale (smaller) slot positions and must be rebuilt.
        let start = if count > HINT_COUNT * 2 + 1 && (count - 1) / (HINT_COUNT + 1) == dist && slot_id / dist > 1 {
            slot_id / dist - 1
        } else {
            0
        };
        for i in start..HINT_COUNT {
            let pos = dist * (i + 1);
            if pos >= count {
                break;
            }
            self.header.hint[i] = self.slot(pos).head;
        }
    }

    fn compare_prefix<'a>(&self, key: &'a [u8]) -> PrefixCmp<'a> {
        let prefix = self.prefix();
        let c = common_prefix_len(key, prefix);
        if c < prefix.len() {
            if c == key.len() || key[c] < prefix[c] {
                PrefixCmp::Before
            } else {
                PrefixCmp::After
            }
        } else {
            PrefixCmp::Within(&key[prefix.len()..])
        }
    }

    /// Finds the lower-bound position of `key` (a full, untruncated key)
    /// within this node: index of the first slot whose full key is >=
    /// `key`, or `count()` if none is, plus whether that slot is an exact
    /// match. Works for leaves (sorted) and inner nodes (sorted or
    /// Eytzinger).
    pub fn lower_bound(&self, key: &[u8]) -> (usize, bool) {
        match self.compare_prefix(key) {
            PrefixCmp::Before => (0, false),
            PrefixCmp::After => (self.count(), false),
            PrefixCmp::Within(truncated) => {
                if self.header.is_sorted {
                    self.lower_bound_local(truncated)
                } else {
                    (self.eytzinger_lower_bound(truncated), false)
                }
            }
        }
    }

    /// Routes `key` to a child index (0..=count()); `count()` means
    /// `upper_child`.
    pub fn find_child_index(&self, key: &[u8]) -> usize {
        debug_assert!(!self.header.is_leaf);
        self.lower_bound(key).0
    }

    // ---- Eytzinger conversion --------------------------------------------

    pub fn to_eytzinger(&mut self) {
        debug_assert!(!self.header.is_leaf);
        if !self.header.is_sorted {
            return;
        }
        let count = self.count();
        if count == 0 {
            self.header.is_sorted = false;
            return;
        }
        let sorted: Vec<Slot> = (0..count).map(|i| self.slot(i)).collect();
        let mut out = vec![sorted[0]; count];
        eytzinger::build(&sorted, &mut out);
        for (i, s) in out.into_iter().enumerate() {
            self.set_slot(i, s);
        }
        self.header.is_sorted = false;
    }

    /// Converts back to sorted order. Per the original source this is
    /// "trivial, just sort it": slot directory entries move but heap bytes
    /// never do, so this is an O(n log n) permutation of 8-byte records,
    /// not a rewrite of any key/value data.
    pub fn to_sorted(&mut self) {
        debug_assert!(!self.header.is_leaf);
        if self.header.is_sorted {
            return;
        }
        let count = self.count();
        let mut slots: Vec<Slot> = (0..count).map(|i| self.slot(i)).collect();
        slots.sort_by(|&a, &b| self.cmp_slots(a, b));
        for (i, s) in slots.into_iter().enumerate() {
            self.set_slot(i, s);
        }
        self.header.is_sorted = true;
        self.make_hint();
    }

    fn ensure_sorted(&mut self) {
        if !self.header.is_leaf && !self.header.is_sorted {
            self.to_sorted();
        }
    }

    // ---- writing entries --------------------------------------------------

    fn entry_heap_bytes(key_len_after_prefix: usize, val_len: usize, is_leaf: bool) -> usize {
        let head_len = key_len_after_prefix.min(4);
        let trailing_len = key_len_after_prefix - head_len;
        let large = trailing_len > MAX_INLINE_REMAINDER;
        8 + if large { 2 } else { 0 } + trailing_len + if is_leaf { val_len } else { 0 }
    }

    fn space_needed(key_len_after_prefix: usize, val_len: usize, is_leaf: bool) -> usize {
        SLOT_SIZE + Self::entry_heap_bytes(key_len_after_prefix, val_len, is_leaf)
    }

    /// Whether a single entry could ever fit in a brand-new, empty page —
    /// the "fatal, oversized entry" precondition check at the tree level.
    pub fn fits_in_empty_page(key_len: usize, val_len: usize) -> bool {
        Self::space_needed(key_len, val_len, true) <= Self::DATA_LEN
    }

    fn write_heap_record(&mut self, remainder: &[u8], payload: Payload) -> Slot {
        let head_len = remainder.len().min(4);
        let trailing = &remainder[head_len..];
        let large = trailing.len() > MAX_INLINE_REMAINDER;

        if let Payload::Leaf(value) = payload {
            self.write_data(value);
        }
        self.write_data(trailing);
        if large {
            self.write_data(&(trailing.len() as u16).to_ne_bytes());
        }
        let header_bytes: u64 = match payload {
            Payload::Leaf(value) => value.len() as u64,
            Payload::Child(child) => child as usize as u64,
        };
        let header_off = self.write_data(&header_bytes.to_ne_bytes());

        Slot {
            offset: header_off,
            head_len: head_len as u8,
            remainder_len: if large { LARGE_SENTINEL } else { trailing.len() as u8 },
            head: head(remainder),
        }
    }

    fn slot_heap_bytes(&self, s: Slot) -> usize {
        let rec = self.record_loc(s);
        let base = 8 + if s.remainder_len == LARGE_SENTINEL { 2 } else { 0 } + rec.trailing_len as usize;
        if self.header.is_leaf {
            let len_bytes: [u8; 8] = self.data[rec.header_off as usize..][..8].try_into().unwrap();
            base + u64::from_ne_bytes(len_bytes) as usize
        } else {
            base
        }
    }

    fn insert_slot_at(&mut self, pos: usize, remainder: &[u8], payload: Payload) {
        let slot = self.write_heap_record(remainder, payload);
        let count = self.count();
        for i in (pos..count).rev() {
            let s = self.slot(i);
            self.set_slot(i + 1, s);
        }
        self.set_slot(pos, slot);
        self.header.count += 1;
    }

    fn remove_slot_at(&mut self, pos: usize) {
        let s = self.slot(pos);
        self.header.space_used -= self.slot_heap_bytes(s) as u16;
        let count = self.count();
        for i in pos + 1..count {
            let s = self.slot(i);
            self.set_slot(i - 1, s);
        }
        self.header.count -= 1;
    }

    /// Appends `s` from `self` into `dst`, adjusting for any difference in
    /// prefix length between the two nodes: `dst`'s fences (already set)
    /// may cover a narrower range than `self`'s (split: `dst.prefix_len()
    /// >= self.prefix_len()`, extra leading bytes of the remainder get
    /// dropped since `dst`'s own prefix now covers them) or a wider one
    /// (merge: `dst.prefix_len() <= self.prefix_len()`, the missing leading
    /// bytes are recovered from `self`'s own lower fence, which always
    /// holds its full, untruncated prefix).
    fn copy_entry(&self, idx: usize, dst: &mut Node) -> Result<(), ()> {
        let remainder = self.full_remainder(idx);
        let src_prefix_len = self.prefix_len();
        let dst_prefix_len = dst.prefix_len();
        let adjusted: SmallVec<[u8; 80]> = if dst_prefix_len >= src_prefix_len {
            let drop = dst_prefix_len - src_prefix_len;
            SmallVec::from_slice(&remainder[drop..])
        } else {
            let extra = &self.lower_fence_bytes()[dst_prefix_len..src_prefix_len];
            let mut v = SmallVec::new();
            v.extend_from_slice(extra);
            v.extend_from_slice(&remainder);
            v
        };
        if self.header.is_leaf {
            dst.append_raw(&adjusted, Payload::Leaf(self.value_at(idx)))
        } else {
            dst.append_raw(&adjusted, Payload::Child(self.child_at_slot(idx)))
        }
    }

    fn append_raw(&mut self, remainder: &[u8], payload: Payload) -> Result<(), ()> {
        let val_len = match &payload {
            Payload::Leaf(v) => v.len(),
            Payload::Child(_) => 0,
        };
        self.request_space(Self::space_needed(remainder.len(), val_len, self.header.is_leaf))?;
        self.insert_slot_at(self.count(), remainder, payload);
        Ok(())
    }

    // ---- public mutation surface ------------------------------------------

    /// Inserts `key`/`value` (both full, untruncated) into a leaf. The
    /// caller is responsible for removing any existing entry for `key`
    /// first (tree-level replace-if-present semantics).
    pub fn insert_leaf(&mut self, key: &[u8], value: &[u8]) -> Result<(), ()> {
        debug_assert!(self.header.is_leaf);
        let truncated = &key[self.prefix_len()..];
        self.request_space(Self::space_needed(truncated.len(), value.len(), true))?;
        let (pos, found) = self.lower_bound_local(truncated);
        debug_assert!(!found, "caller must remove an existing key before inserting it again");
        self.insert_slot_at(pos, truncated, Payload::Leaf(value));
        self.update_hint(pos);
        Ok(())
    }

    pub fn remove_key(&mut self, key: &[u8]) -> bool {
        debug_assert!(self.header.is_leaf);
        let (pos, found) = self.lower_bound(key);
        if found {
            self.remove_slot_at(pos);
            self.make_hint();
        }
        found
    }

    /// Inserts a new separator `key` (full, untruncated) routing to `child`,
    /// shifting any existing entries right of it. The insertion position is
    /// always recomputed from `key` after sorting (never trusted from the
    /// caller): a position captured during an Eytzinger-ordered descent
    /// would otherwise be invalidated by the `ensure_sorted` conversion
    /// below, since that permutes every slot's physical position.
    fn insert_child(&mut self, key: &[u8], child: *mut Node) -> Result<(), ()> {
        debug_assert!(!self.header.is_leaf);
        self.ensure_sorted();
        let index = self.find_child_index(key);
        let truncated = &key[self.prefix_len()..];
        self.request_space(Self::space_needed(truncated.len(), 0, false))?;
        self.insert_slot_at(index, truncated, Payload::Child(child));
        self.update_hint(index);
        Ok(())
    }

    fn request_space_for_child(&mut self, full_key_len: usize) -> Result<(), ()> {
        let truncated_len = full_key_len.saturating_sub(self.prefix_len());
        self.request_space(Self::space_needed(truncated_len, 0, false))
    }

    /// Fills `left`/`right` (fences already set) from `self`'s entries
    /// around `sep_slot`, a separate method rather than a closure so the
    /// borrow of `self` it needs ends at the call site, before `split`
    /// goes on to overwrite `*self`.
    fn fill_split_halves(&self, sep_slot: usize, count: usize, left: &mut Node, right: &mut Node) -> Result<(), ()> {
        if self.header.is_leaf {
            for i in 0..=sep_slot {
                self.copy_entry(i, left)?;
            }
            for i in sep_slot + 1..count {
                self.copy_entry(i, right)?;
            }
        } else {
            for i in 0..sep_slot {
                self.copy_entry(i, left)?;
            }
            left.header.upper_child = self.child_at_slot(sep_slot) as usize;
            for i in sep_slot + 1..count {
                self.copy_entry(i, right)?;
            }
            right.header.upper_child = self.header.upper_child;
        }
        Ok(())
    }

    /// Splits this node around a chosen separator: a new left sibling is
    /// allocated and linked into `parent`; this node's own page is
    /// overwritten in place to become the right sibling (the "source page
    /// aliases the right sibling" trick — it avoids having to fix up
    /// whatever already points at this page's address). `parent` must
    /// already have a child pointer reaching `self`'s page at the
    /// appropriate position (it does: that pointer is untouched by the
    /// split, only a new sibling is inserted before it).
    pub fn split(&mut self, parent: &mut Node) -> Result<(), ()> {
        self.ensure_sorted();
        let count = self.count();
        debug_assert!(count > 1);
        let is_leaf = self.header.is_leaf;

        let (sep_slot, sep_remainder) = find_separator(count, is_leaf, |i| self.full_remainder(i));
        let mut full_sep: SmallVec<[u8; 80]> = SmallVec::new();
        full_sep.extend_from_slice(self.prefix());
        full_sep.extend_from_slice(&sep_remainder);

        parent.request_space_for_child(full_sep.len())?;

        let left_ptr = Node::new_boxed(is_leaf);
        let left = unsafe { &mut *left_ptr };
        left.set_fences(self.lower_fence_bytes(), &full_sep);

        let mut right = Node::new(is_leaf);
        right.set_fences(&full_sep, self.upper_fence_bytes());

        if self.fill_split_halves(sep_slot, count, left, &mut right).is_err() {
            unsafe { Self::dealloc_page(left_ptr) };
            return Err(());
        }
        left.make_hint();
        right.make_hint();

        parent
            .insert_child(&full_sep, left_ptr)
            .expect("space was already reserved above");

        *self = right;
        Ok(())
    }

    /// Fills `tmp` (fences already set) from `self`'s and `right`'s
    /// entries, folding in the pulled-down separator for inner merges.
    fn fill_merge(&self, right: &Node, separator: &[u8], tmp: &mut Node) -> Result<(), ()> {
        for i in 0..self.count() {
            self.copy_entry(i, tmp)?;
        }
        if !self.header.is_leaf {
            let truncated = &separator[tmp.prefix_len()..];
            tmp.append_raw(truncated, Payload::Child(self.header.upper_child as *mut Node))?;
        }
        for i in 0..right.count() {
            right.copy_entry(i, tmp)?;
        }
        Ok(())
    }

    /// Attempts to merge `self` (the left sibling) into `right`, folding in
    /// `separator` (the parent's full, untruncated separator key between
    /// them) as a real key for inner merges. On success `right` now holds
    /// the union and `self`'s page is the caller's to free (its children,
    /// if any, are not touched — they are now reachable through `right`).
    fn try_merge_right(&mut self, right: &mut Node, separator: &[u8]) -> Result<(), ()> {
        debug_assert_eq!(self.header.is_leaf, right.header.is_leaf);
        self.ensure_sorted();
        right.ensure_sorted();
        let is_leaf = self.header.is_leaf;

        let mut tmp = Node::new(is_leaf);
        tmp.set_fences(self.lower_fence_bytes(), right.upper_fence_bytes());
        if !is_leaf {
            tmp.header.upper_child = right.header.upper_child;
        }

        self.fill_merge(right, separator, &mut tmp)?;
        tmp.make_hint();
        *right = tmp;
        Ok(())
    }

    /// Merges the child reached by `key` with its immediate right sibling,
    /// provided both are under-full, folding the left page into the right
    /// sibling's and removing the separator slot from `self`. Returns `Err`
    /// (a no-op) if that child is the rightmost one (no right sibling
    /// exists) or the merge wouldn't fit in one page.
    ///
    /// Takes `key` rather than a precomputed slot index, like
    /// [`Node::insert_child`]: `self` is forced into sorted order here
    /// first, and only then is the index looked up, so a position captured
    /// before `self` was last sorted can never go stale underneath this
    /// call.
    pub fn try_merge_child(&mut self, key: &[u8]) -> Result<(), ()> {
        debug_assert!(!self.header.is_leaf);
        self.ensure_sorted();
        let index = self.find_child_index(key);
        if index >= self.count() {
            return Err(());
        }
        let left_ptr = self.child_at_slot(index);
        let right_ptr = self.child_at(index + 1);
        let left = unsafe { &mut *left_ptr };
        let right = unsafe { &mut *right_ptr };
        if !left.is_underfull() || !right.is_underfull() {
            return Err(());
        }
        let separator = self.full_key(index);
        left.try_merge_right(right, &separator)?;
        unsafe { Self::dealloc_page(left_ptr) };
        self.remove_slot_at(index);
        Ok(())
    }

    // ---- validation (debug-only self-check) --------------------------------

    /// Cross-checks structural invariants: slot ordering, prefix
    /// consistency, and fence containment. Grounded in the original
    /// source's `tester_btree.hpp` post-mutation self-check, kept here as a
    /// `debug_assert!`-gated function rather than a counter-sampled one.
    #[cfg(debug_assertions)]
    pub fn validate(&self) {
        let count = self.count();
        assert!(self.header.prefix_len as usize <= self.lower_fence_bytes().len() || self.lower_fence_bytes().is_empty());
        if self.header.is_sorted {
            for i in 1..count {
                let a = self.slot(i - 1);
                let b = self.slot(i);
                assert_ne!(self.cmp_slots(a, b), Ordering::Greater, "slots out of order at {i}");
            }
        }
        if !self.lower_fence_bytes().is_empty() && !self.upper_fence_bytes().is_empty() {
            assert_ne!(self.lower_fence_bytes().cmp(self.upper_fence_bytes()), Ordering::Greater);
        }
        for i in 0..count {
            let key = self.full_key(i);
            if !self.lower_fence_bytes().is_empty() {
                assert_eq!(key.as_slice().cmp(self.lower_fence_bytes()), Ordering::Greater);
            }
            if !self.upper_fence_bytes().is_empty() {
                assert_ne!(key.as_slice().cmp(self.upper_fence_bytes()), Ordering::Greater);
            }
        }
    }
}

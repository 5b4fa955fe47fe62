//! Separator choice for node splits (spec §4.1 "Separator choice").

use smallvec::SmallVec;

use crate::util::common_prefix_len;

type KeyBuf = SmallVec<[u8; 32]>;

/// Picks the slot a split occurs around and returns `(slot_id, separator)`.
///
/// `k(i)` reconstructs the full (prefix-truncated) remainder of slot `i`;
/// it returns an owned buffer rather than a borrowed slice because a short
/// key can live entirely inside a slot's packed head, with no contiguous
/// heap bytes to borrow from.
///
/// For inner nodes the separator is always the exact middle slot's key, in
/// full (inner separators are never shortened, so both children's fence
/// keys stay exact). For leaves it is chosen within
/// `[count/2 - count/16, count/2]`, favoring the slot that shares the
/// longest prefix with slot 0 so the right sibling's lower fence compresses
/// well; if the winning slot and its successor share more than 4 prefix
/// bytes and both keys are strictly longer than that shared prefix, the
/// separator is truncated to `common_prefix + 1` bytes taken from the
/// successor, producing a short in-between key rather than a full one.
pub fn find_separator<F: FnMut(usize) -> KeyBuf>(count: usize, is_leaf: bool, mut k: F) -> (usize, KeyBuf) {
    debug_assert!(count > 1);
    if !is_leaf {
        let slot_id = count / 2;
        return (slot_id, k(slot_id));
    }

    let best_slot = if count >= 16 {
        let lower = count / 2 - count / 16;
        let upper = count / 2;
        let k0 = k(0);
        let best_prefix_len = common_prefix_len(&k0, &k(lower));
        (lower + 1..=upper)
            .rev()
            .find(|&i| common_prefix_len(&k0, &k(i)) == best_prefix_len)
            .unwrap_or(lower)
    } else {
        (count - 1) / 2
    };

    if best_slot + 1 < count {
        let a = k(best_slot);
        let b = k(best_slot + 1);
        let common = common_prefix_len(&a, &b);
        if common > 4 && a.len() > common && b.len() > common {
            return (best_slot, KeyBuf::from_slice(&b[..common + 1]));
        }
    }
    (best_slot, k(best_slot))
}

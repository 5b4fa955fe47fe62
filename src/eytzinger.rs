//! Eytzinger (BFS) layout conversion and search, adapted from
//! `btree/eytzinger.h` in the original source this tree was distilled from.
//!
//! A node's slot directory can temporarily hold its entries in Eytzinger
//! order instead of sorted order: entry `i` (0-indexed) has children at
//! `2*i+1` and `2*i+2`, exactly as in `eytzinger.h`'s `buildEytzinger`. This
//! lets branchless-ish binary descent skip the usual cache-hostile jumps of
//! plain binary search. Only inner nodes ever use it; leaves are always
//! sorted (spec requirement, and there would be no benefit: leaf scans need
//! sorted order anyway).

use std::cmp::Ordering;

/// Builds the Eytzinger-ordered permutation of `sorted` into `out` (both
/// length `n`). Mirrors `buildEytzinger`'s recursive in-order fill.
pub fn build<T: Copy>(sorted: &[T], out: &mut [T]) {
    debug_assert_eq!(sorted.len(), out.len());
    fn rec<T: Copy>(sorted: &[T], out: &mut [T], i: usize, pos: &mut usize) {
        if i < out.len() {
            rec(sorted, out, 2 * i + 1, pos);
            out[i] = sorted[*pos];
            *pos += 1;
            rec(sorted, out, 2 * i + 2, pos);
        }
    }
    let mut pos = 0;
    rec(sorted, out, 0, &mut pos);
}

/// Lower-bound search directly over an Eytzinger-ordered sequence of length
/// `n`, returning the *physical* (Eytzinger) index of the first element not
/// less than the query, or `n` if every element is less than it.
///
/// This is the descent from `eytzingerSearch` (`index = 2*index+1+(cmp)`)
/// generalized from equality to lower-bound by remembering the last index
/// at which the branch went left (element not less than the query). That
/// index is immediately usable as a storage position (the key and its
/// associated child/value live at that same physical slot), which is why
/// the tree uses this form rather than [`rank_lower_bound`]'s sorted rank.
pub fn lower_bound(n: usize, mut cmp: impl FnMut(usize) -> Ordering) -> usize {
    let mut k = 0usize;
    let mut result = n;
    while k < n {
        if cmp(k) != Ordering::Less {
            result = k;
            k = 2 * k + 1;
        } else {
            k = 2 * k + 2;
        }
    }
    result
}

/// The classic 1-indexed Eytzinger "rank of lower bound" bit trick: given a
/// predicate `lt(i)` answering whether the element at 1-indexed Eytzinger
/// position `i` is less than the search target, returns the 1-indexed
/// sorted rank of the lower bound, or `0` if nothing in the array is `>=`
/// the target. Standalone and not used by [`crate::node::Node`]'s routing
/// (which wants a physical slot, not a sorted rank — see [`lower_bound`]);
/// kept as a direct, separately-tested rendition of the technique named in
/// the design notes.
pub fn rank_lower_bound(n: usize, mut lt: impl FnMut(usize) -> bool) -> usize {
    let mut k = 1usize;
    while k <= n {
        k = 2 * k + usize::from(lt(k));
    }
    let shift = (!k).trailing_zeros() + 1;
    k >> shift
}

//! The total order over chores.
//!
//! Two chores are compared on four tiers: the macro phase (work before the
//! journal flush, the flush itself, visible work after it, and the terminal
//! sentinel), the owners' document order, the kind's micro rank within a
//! phase, and finally the declaration index. The drain engine never relies on
//! insertion time beyond FIFO among fully-equal chores.

use std::cmp::Ordering;
use std::rc::Rc;

use crate::chore::Chore;
use crate::owners::OwnerRegistry;

/// The coarse execution tier of a chore.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum MacroPhase {
    /// Recomputation, rendering, and reconciliation ahead of the flush.
    BeforeFlush,
    /// The single batched application of pending tree mutations.
    Flush,
    /// Work that may observe the updated tree, e.g. visible tasks.
    AfterFlush,
    /// The `WaitForAll` sentinel. Always last.
    Terminal,
}

/// The tertiary tie-break of a chore's ordering key.
///
/// Tasks carry their intra-host declaration order as a numeric sequence;
/// property writes and reference resolutions are keyed by a string. The two
/// shapes never occur within the same micro phase, so they are never compared
/// against each other: mixed or string ties report `Equal`, which keeps FIFO
/// insertion order and lets coalescing match by identity instead.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ChoreIndex {
    None,
    Seq(u32),
    Key(Rc<str>),
}

impl ChoreIndex {
    pub(crate) fn cmp_within_kind(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ChoreIndex::Seq(a), ChoreIndex::Seq(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

/// Everything the comparator needs beyond the two chores themselves.
pub(crate) struct OrderingCx<'a> {
    pub registry: &'a OwnerRegistry,
}

/// Total order over chores. Consistent with the invariant that an ancestor's
/// chore always compares before a descendant's within the same macro phase.
pub(crate) fn compare_chores(a: &Chore, b: &Chore, cx: &OrderingCx<'_>) -> Ordering {
    a.macro_phase()
        .cmp(&b.macro_phase())
        // Chores flagged by the streaming-order check sort to the end of
        // their phase.
        .then_with(|| a.ordered_last().cmp(&b.ordered_last()))
        .then_with(|| match (a.owner(), b.owner()) {
            (Some(left), Some(right)) => cx.registry.document_order(left, right),
            // Ownerless chores (reference resolution, the global flush) skip
            // the tree tier and fall through to the micro rank.
            _ => Ordering::Equal,
        })
        .then_with(|| a.micro_rank().cmp(&b.micro_rank()))
        .then_with(|| a.index().cmp_within_kind(b.index()))
}

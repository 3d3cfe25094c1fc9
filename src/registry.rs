//! Correlation state for in-flight requests.
//!
//! The registry is the only ordering authority between requests and the
//! responses the BMC may reorder: entries are keyed by the 6-bit requestor
//! sequence number, deadlines live in a min-heap, and inbound session
//! sequence numbers pass through a replay window before any lookup.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::Result;

/// Sink an in-flight request's outcome is delivered to.
pub(crate) type ResponseSink = oneshot::Sender<Result<Vec<u8>>>;

struct Pending {
    sink: ResponseSink,
    deadline: Instant,
}

/// Table of in-flight requests keyed by requestor sequence number.
#[derive(Default)]
pub(crate) struct Registry {
    entries: HashMap<u8, Pending>,
    // Lazily pruned: completed entries leave stale heap items behind, which
    // are skipped when they no longer match the table.
    deadlines: BinaryHeap<Reverse<(Instant, u8)>>,
    next_seq: u8,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
            deadlines: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Allocate the next free requestor sequence number.
    ///
    /// Numbers wrap modulo 64 and skip values still in flight; `None` means
    /// all 64 are busy.
    pub(crate) fn allocate(&mut self) -> Option<u8> {
        for _ in 0..64 {
            let seq = self.next_seq;
            self.next_seq = (self.next_seq + 1) & 0x3F;
            if !self.entries.contains_key(&seq) {
                return Some(seq);
            }
        }
        None
    }

    pub(crate) fn insert(&mut self, seq: u8, sink: ResponseSink, deadline: Instant) {
        self.deadlines.push(Reverse((deadline, seq)));
        self.entries.insert(seq, Pending { sink, deadline });
    }

    /// Remove and return the sink waiting on `seq`, if any.
    pub(crate) fn complete(&mut self, seq: u8) -> Option<ResponseSink> {
        self.entries.remove(&seq).map(|pending| pending.sink)
    }

    /// The nearest in-flight deadline.
    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, seq))) = self.deadlines.peek().copied() {
            match self.entries.get(&seq) {
                Some(pending) if pending.deadline == deadline => return Some(deadline),
                _ => {
                    self.deadlines.pop();
                }
            }
        }
        None
    }

    /// Remove every entry whose deadline has passed.
    pub(crate) fn expire(&mut self, now: Instant) -> Vec<(u8, ResponseSink)> {
        let mut fired = Vec::new();
        while let Some(Reverse((deadline, seq))) = self.deadlines.peek().copied() {
            if deadline > now {
                break;
            }
            self.deadlines.pop();
            let elapsed = self
                .entries
                .get(&seq)
                .is_some_and(|pending| pending.deadline == deadline);
            if elapsed {
                if let Some(pending) = self.entries.remove(&seq) {
                    fired.push((seq, pending.sink));
                }
            }
        }
        fired
    }

    /// Remove entries whose caller has gone away, reclaiming their sequence
    /// numbers. A response that still arrives for one of these is dropped by
    /// the normal no-requestor path.
    pub(crate) fn purge_cancelled(&mut self) {
        self.entries.retain(|_, pending| !pending.sink.is_closed());
    }

    /// Remove every entry, returning the sinks.
    pub(crate) fn drain(&mut self) -> Vec<ResponseSink> {
        self.deadlines.clear();
        self.entries
            .drain()
            .map(|(_, pending)| pending.sink)
            .collect()
    }
}

/// Inbound session-sequence tracking with a window of 8.
///
/// A packet is dropped when its sequence number has already been seen or lies
/// at or below `max - 8`. Comparisons wrap, so a sequence that jumps past
/// `u32::MAX` keeps working.
pub(crate) struct ReplayWindow {
    max: u32,
    seen: u8,
    primed: bool,
}

impl ReplayWindow {
    pub(crate) const SPAN: u32 = 8;

    pub(crate) fn new() -> Self {
        Self {
            max: 0,
            seen: 0,
            primed: false,
        }
    }

    /// Record `seq`; returns true when the packet is fresh and accepted.
    pub(crate) fn observe(&mut self, seq: u32) -> bool {
        if !self.primed {
            self.primed = true;
            self.max = seq;
            self.seen = 1;
            return true;
        }

        let ahead = seq.wrapping_sub(self.max);
        if ahead != 0 && ahead < u32::MAX / 2 {
            // Newer than anything seen: slide the window forward.
            if ahead >= Self::SPAN {
                self.seen = 1;
            } else {
                self.seen = (self.seen << ahead) | 1;
            }
            self.max = seq;
            return true;
        }

        let behind = self.max.wrapping_sub(seq);
        if behind >= Self::SPAN {
            return false;
        }
        let bit = 1u8 << behind;
        if self.seen & bit != 0 {
            return false;
        }
        self.seen |= bit;
        true
    }
}

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use super::{Apid, PrimaryHeader};

/// Number of packets missing between sequence count `last` and the following count `cur`,
/// modulo 2^14. A repeated count reads as a full cycle missing.
#[must_use]
pub fn missing_packets(cur: u16, last: u16) -> u16 {
    cur.wrapping_sub(last).wrapping_sub(1) & PrimaryHeader::SEQ_MAX
}

/// Per-APID sequence counts.
///
/// Cloning shares the underlying counts, which is how several links are made to use a single
/// counter space. Each operation takes the lock once, so a clone used from several threads
/// never observes a partial update.
#[derive(Debug, Clone, Default)]
pub struct SequenceCounters {
    counts: Arc<Mutex<HashMap<Apid, u16>>>,
}

impl SequenceCounters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next sequence count for `apid`. The first count for an APID is 0, after
    /// which counts increase modulo 2^14.
    pub fn next(&self, apid: Apid) -> u16 {
        let mut counts = self.counts.lock();
        let seq = match counts.get(&apid) {
            Some(last) => (last + 1) & PrimaryHeader::SEQ_MAX,
            None => 0,
        };
        counts.insert(apid, seq);
        seq
    }

    /// Record `seq` as the latest count seen for `apid`, returning the previous one.
    pub fn swap(&self, apid: Apid, seq: u16) -> Option<u16> {
        self.counts
            .lock()
            .insert(apid, seq & PrimaryHeader::SEQ_MAX)
    }

    /// The latest count for `apid`, if any.
    #[must_use]
    pub fn get(&self, apid: Apid) -> Option<u16> {
        self.counts.lock().get(&apid).copied()
    }
}

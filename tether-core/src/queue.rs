//! Bounded FIFO of encoded frames waiting for an open socket.
//!
//! Every entry gets a sequence number at enqueue time. Numbers are
//! monotonic per queue and never reused, even across `clear()`. An entry
//! stays at the head until the socket accepts it; only then is it popped.
//!
//! The parts of one chunked send form a run. Eviction under `drop-oldest`
//! removes whole runs, so the receiver never sees an incomplete set.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;

use crate::codec::WireMessage;
use crate::config::{OverflowPolicy, QueueConfig};
use crate::error::TransportError;

/// Queue shared by session handles, the session task and the lifecycle
/// bridge. Lock order: a caller holding the bridge's tracking lock may take
/// this one, never the reverse.
pub(crate) type SharedQueue = Arc<Mutex<OutboundQueue>>;

pub(crate) fn lock(queue: &Mutex<OutboundQueue>) -> MutexGuard<'_, OutboundQueue> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One queued frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEnvelope {
    pub seq: u64,
    /// The send this entry belongs to.
    pub ticket: SendTicket,
    pub payload: WireMessage,
    pub enqueued_at: Instant,
}

/// Sequence numbers assigned to one `send()`. A frame that was chunked
/// spans several contiguous numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendTicket {
    pub first: u64,
    pub last: u64,
}

impl SendTicket {
    pub fn parts(&self) -> u64 {
        self.last - self.first + 1
    }

    pub fn contains(&self, seq: u64) -> bool {
        (self.first..=self.last).contains(&seq)
    }
}

#[derive(Debug)]
pub struct OutboundQueue {
    config: QueueConfig,
    entries: VecDeque<OutboundEnvelope>,
    next_seq: u64,
}

impl OutboundQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            entries: VecDeque::new(),
            next_seq: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Enqueue the parts of one send as a contiguous run.
    ///
    /// Under `drop-oldest` whole runs are evicted from the head until the
    /// new run fits, and returned so the caller can report them. Under
    /// `reject-newest` nothing is enqueued when the whole run does not fit.
    /// A run longer than the capacity is always rejected.
    pub fn push_all(
        &mut self,
        payloads: Vec<WireMessage>,
        now: Instant,
    ) -> Result<(SendTicket, Vec<OutboundEnvelope>), TransportError> {
        let capacity = self.config.capacity;
        let incoming = payloads.len();
        if incoming == 0 || incoming > capacity {
            return Err(TransportError::QueueFull { capacity });
        }

        let mut dropped = Vec::new();
        let overflow = (self.entries.len() + incoming).saturating_sub(capacity);
        if overflow > 0 {
            match self.config.overflow {
                OverflowPolicy::RejectNewest => {
                    return Err(TransportError::QueueFull { capacity });
                }
                OverflowPolicy::DropOldest => {
                    while self.entries.len() + incoming > capacity {
                        let Some(run) = self.entries.front().map(|e| e.ticket) else {
                            break;
                        };
                        while let Some(head) = self.entries.pop_front() {
                            if head.ticket != run {
                                self.entries.push_front(head);
                                break;
                            }
                            dropped.push(head);
                        }
                    }
                }
            }
        }

        let ticket = SendTicket {
            first: self.next_seq,
            last: self.next_seq + incoming as u64 - 1,
        };
        for payload in payloads {
            self.entries.push_back(OutboundEnvelope {
                seq: self.next_seq,
                ticket,
                payload,
                enqueued_at: now,
            });
            self.next_seq += 1;
        }
        Ok((ticket, dropped))
    }

    /// Enqueue a single frame.
    pub fn push(
        &mut self,
        payload: WireMessage,
        now: Instant,
    ) -> Result<(u64, Vec<OutboundEnvelope>), TransportError> {
        self.push_all(vec![payload], now)
            .map(|(ticket, dropped)| (ticket.first, dropped))
    }

    /// The entry the drain loop should send next.
    pub fn front(&self) -> Option<&OutboundEnvelope> {
        self.entries.front()
    }

    /// Pop the head, but only if it is still `seq`. The head can change
    /// between peek and pop when `clear()` or an eviction runs meanwhile.
    pub fn pop_front_if(&mut self, seq: u64) -> Option<OutboundEnvelope> {
        if self.entries.front().map(|e| e.seq) == Some(seq) {
            self.entries.pop_front()
        } else {
            None
        }
    }

    /// Remove every entry of one send that is still queued. Returns how
    /// many entries were discarded.
    pub fn remove_ticket(&mut self, ticket: &SendTicket) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.ticket != *ticket);
        before - self.entries.len()
    }

    /// Remove everything. Returns how many entries were discarded.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    /// Sequence numbers currently queued, head first.
    pub fn seqs(&self) -> Vec<u64> {
        self.entries.iter().map(|e| e.seq).collect()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> WireMessage {
        WireMessage::Text(s.to_owned())
    }

    fn queue(capacity: usize, overflow: OverflowPolicy) -> OutboundQueue {
        OutboundQueue::new(QueueConfig { capacity, overflow })
    }

    #[test]
    fn fifo_with_monotonic_seqs() {
        let mut q = queue(10, OverflowPolicy::DropOldest);
        let now = Instant::now();
        for s in ["a", "b", "c"] {
            q.push(text(s), now).unwrap();
        }
        assert_eq!(q.seqs(), vec![1, 2, 3]);

        let head = q.front().unwrap().clone();
        assert_eq!(head.payload, text("a"));
        assert_eq!(q.pop_front_if(head.seq).unwrap().seq, 1);
        assert_eq!(q.front().unwrap().payload, text("b"));
    }

    #[test]
    fn pop_requires_matching_head() {
        let mut q = queue(10, OverflowPolicy::DropOldest);
        q.push(text("a"), Instant::now()).unwrap();
        assert!(q.pop_front_if(99).is_none());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn seqs_survive_clear() {
        let mut q = queue(10, OverflowPolicy::DropOldest);
        let now = Instant::now();
        q.push(text("a"), now).unwrap();
        q.push(text("b"), now).unwrap();
        assert_eq!(q.clear(), 2);
        let (seq, _) = q.push(text("c"), now).unwrap();
        assert_eq!(seq, 3);
    }

    #[test]
    fn drop_oldest_evicts_and_reports() {
        let mut q = queue(2, OverflowPolicy::DropOldest);
        let now = Instant::now();
        q.push(text("a"), now).unwrap();
        q.push(text("b"), now).unwrap();
        let (seq, dropped) = q.push(text("c"), now).unwrap();
        assert_eq!(seq, 3);
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].seq, 1);
        assert_eq!(q.seqs(), vec![2, 3]);
    }

    #[test]
    fn reject_newest_leaves_queue_alone() {
        let mut q = queue(2, OverflowPolicy::RejectNewest);
        let now = Instant::now();
        q.push(text("a"), now).unwrap();
        q.push(text("b"), now).unwrap();
        let err = q.push(text("c"), now).unwrap_err();
        assert_eq!(err, TransportError::QueueFull { capacity: 2 });
        assert_eq!(q.seqs(), vec![1, 2]);
        // The rejected frame did not consume a number.
        q.pop_front_if(1);
        assert_eq!(q.push(text("c"), now).unwrap().0, 3);
    }

    #[test]
    fn chunk_run_is_contiguous() {
        let mut q = queue(10, OverflowPolicy::DropOldest);
        let now = Instant::now();
        q.push(text("solo"), now).unwrap();
        let (ticket, _) = q
            .push_all(vec![text("p0"), text("p1"), text("p2")], now)
            .unwrap();
        assert_eq!(ticket, SendTicket { first: 2, last: 4 });
        assert_eq!(ticket.parts(), 3);
        assert!(ticket.contains(3));
        assert!(!ticket.contains(5));
    }

    #[test]
    fn drop_oldest_evicts_whole_chunk_runs() {
        let mut q = queue(5, OverflowPolicy::DropOldest);
        let now = Instant::now();
        let (run, _) = q
            .push_all(vec![text("p0"), text("p1"), text("p2"), text("p3")], now)
            .unwrap();
        q.push(text("a"), now).unwrap();

        let (_, dropped) = q.push(text("b"), now).unwrap();
        let dropped: Vec<u64> = dropped.iter().map(|e| e.seq).collect();
        assert_eq!(dropped, vec![1, 2, 3, 4]);
        assert!(dropped.iter().all(|seq| run.contains(*seq)));
        assert_eq!(q.seqs(), vec![5, 6]);
    }

    #[test]
    fn partially_sent_run_is_evicted_as_a_unit() {
        let mut q = queue(3, OverflowPolicy::DropOldest);
        let now = Instant::now();
        q.push_all(vec![text("p0"), text("p1"), text("p2")], now).unwrap();
        q.pop_front_if(1);

        let (seq, dropped) = q.push(text("next"), now).unwrap();
        assert!(dropped.is_empty());
        let (_, dropped) = q.push(text("after"), now).unwrap();
        assert_eq!(dropped.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(q.seqs(), vec![seq, seq + 1]);
    }

    #[test]
    fn remove_ticket_takes_only_that_send() {
        let mut q = queue(10, OverflowPolicy::DropOldest);
        let now = Instant::now();
        q.push(text("keep"), now).unwrap();
        let (run, _) = q.push_all(vec![text("p0"), text("p1")], now).unwrap();
        q.push(text("keep too"), now).unwrap();

        assert_eq!(q.remove_ticket(&run), 2);
        assert_eq!(q.seqs(), vec![1, 4]);
        assert_eq!(q.remove_ticket(&run), 0);
    }

    #[test]
    fn run_longer_than_capacity_is_rejected() {
        let mut q = queue(2, OverflowPolicy::DropOldest);
        let err = q
            .push_all(vec![text("a"), text("b"), text("c")], Instant::now())
            .unwrap_err();
        assert!(matches!(err, TransportError::QueueFull { .. }));
        assert!(q.is_empty());
    }
}

//! Application-level chunking for frames larger than the socket allows.
//!
//! ## Wire format
//!
//! A large frame is encoded to JSON text, split on character boundaries,
//! and each slice is sent as
//!
//! ```text
//! {"type":"chunk","messageId":…,"partIndex":i,"totalParts":n,"data":…}
//! ```
//!
//! The receiver buffers parts per `messageId`, and once all `n` are present
//! concatenates `data` in `partIndex` order and decodes the result as a
//! frame.

use std::collections::{BTreeMap, HashMap};

use tokio::time::Instant;

use crate::config::ChunkConfig;
use crate::error::CodecError;
use crate::protocol::Frame;

/// Smallest `data` budget per part, whatever `max_frame_bytes` says.
pub const MIN_PART_BYTES: usize = 64;

/// Bookkeeping charged per buffered part on top of its data, so that a
/// flood of empty parts still counts against `max_message_bytes`.
const PART_COST: usize = 64;

// ── Splitting ────────────────────────────────────────────────────

/// Bytes a char takes once JSON-escaped inside the `data` string.
///
/// `encoded` is itself serializer output, so it never holds raw control
/// characters; only quotes and backslashes grow.
fn escaped_len(c: char) -> usize {
    match c {
        '"' | '\\' => 2,
        other => other.len_utf8(),
    }
}

/// Split an encoded frame into `chunk` frames that each encode to at most
/// `max_frame_bytes`.
///
/// The `data` budget per part never drops below [`MIN_PART_BYTES`], so
/// when `max_frame_bytes` is smaller than the chunk envelope plus that
/// floor, each part encodes to the envelope plus [`MIN_PART_BYTES`]
/// instead.
pub fn split(encoded: &str, message_id: &str, max_frame_bytes: usize) -> Vec<Frame> {
    let envelope = Frame::Chunk {
        message_id: message_id.to_owned(),
        part_index: u32::MAX,
        total_parts: u32::MAX,
        data: String::new(),
    };
    // serde_json cannot fail on this shape; fall back to a generous guess.
    let overhead = serde_json::to_string(&envelope)
        .map(|s| s.len())
        .unwrap_or(256);
    let budget = max_frame_bytes.saturating_sub(overhead).max(MIN_PART_BYTES);

    let mut parts: Vec<&str> = Vec::new();
    let mut start = 0;
    let mut used = 0;
    for (idx, c) in encoded.char_indices() {
        let cost = escaped_len(c);
        if used + cost > budget && idx > start {
            parts.push(&encoded[start..idx]);
            start = idx;
            used = 0;
        }
        used += cost;
    }
    if start < encoded.len() || parts.is_empty() {
        parts.push(&encoded[start..]);
    }

    let total = parts.len() as u32;
    parts
        .into_iter()
        .enumerate()
        .map(|(i, data)| Frame::Chunk {
            message_id: message_id.to_owned(),
            part_index: i as u32,
            total_parts: total,
            data: data.to_owned(),
        })
        .collect()
}

// ── Reassembler ──────────────────────────────────────────────────

#[derive(Debug)]
struct Partial {
    total: u32,
    parts: BTreeMap<u32, String>,
    /// Data bytes plus [`PART_COST`] per buffered part.
    buffered: usize,
    first_seen: Instant,
}

/// Buffers inbound chunk parts until every part of a message is present.
#[derive(Debug)]
pub struct Reassembler {
    config: ChunkConfig,
    pending: HashMap<String, Partial>,
}

impl Reassembler {
    pub fn new(config: ChunkConfig) -> Self {
        Self {
            config,
            pending: HashMap::new(),
        }
    }

    /// Number of messages with parts still missing.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Add one part. Returns the joined payload once the message is whole.
    ///
    /// Duplicate parts are ignored. A part whose `total_parts` disagrees
    /// with earlier parts of the same message is rejected. A message that
    /// would buffer more than `max_message_bytes` is rejected and its
    /// parts discarded.
    pub fn accept(
        &mut self,
        message_id: &str,
        part_index: u32,
        total_parts: u32,
        data: String,
        now: Instant,
    ) -> Result<Option<String>, CodecError> {
        let invalid = |reason| CodecError::InvalidChunk {
            message_id: message_id.to_owned(),
            reason,
        };
        if total_parts == 0 {
            return Err(invalid("zero total parts"));
        }
        if part_index >= total_parts {
            return Err(invalid("part index out of range"));
        }
        let limit = self.config.max_message_bytes;
        if (total_parts as usize).saturating_mul(PART_COST) > limit {
            self.pending.remove(message_id);
            return Err(invalid("message exceeds size limit"));
        }

        if !self.pending.contains_key(message_id) {
            self.make_room();
            self.pending.insert(
                message_id.to_owned(),
                Partial {
                    total: total_parts,
                    parts: BTreeMap::new(),
                    buffered: 0,
                    first_seen: now,
                },
            );
        }
        let Some(partial) = self.pending.get_mut(message_id) else {
            return Ok(None);
        };
        if partial.total != total_parts {
            return Err(invalid("total parts changed"));
        }
        if partial.parts.contains_key(&part_index) {
            return Ok(None);
        }
        let buffered = partial.buffered + data.len() + PART_COST;
        if buffered > limit {
            self.pending.remove(message_id);
            return Err(invalid("message exceeds size limit"));
        }
        partial.buffered = buffered;
        partial.parts.insert(part_index, data);

        if partial.parts.len() < partial.total as usize {
            return Ok(None);
        }
        Ok(self
            .pending
            .remove(message_id)
            .map(|done| done.parts.into_values().collect()))
    }

    /// Drop partial messages older than the reassembly timeout. Returns the
    /// evicted message ids.
    pub fn evict_expired(&mut self, now: Instant) -> Vec<String> {
        let timeout = self.config.reassembly_timeout();
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.first_seen) >= timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.pending.remove(id);
        }
        expired
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    fn make_room(&mut self) {
        let limit = self.config.max_pending_messages.max(1);
        while self.pending.len() >= limit {
            let oldest = self
                .pending
                .iter()
                .min_by_key(|(_, p)| p.first_seen)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    self.pending.remove(&id);
                }
                None => break,
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn reassembler() -> Reassembler {
        Reassembler::new(ChunkConfig {
            max_frame_bytes: 1024,
            reassembly_timeout_ms: 1_000,
            max_pending_messages: 2,
            max_message_bytes: 4 * 1024,
        })
    }

    fn parts_of(frames: &[Frame]) -> Vec<(u32, u32, String)> {
        frames
            .iter()
            .map(|f| match f {
                Frame::Chunk {
                    part_index,
                    total_parts,
                    data,
                    ..
                } => (*part_index, *total_parts, data.clone()),
                other => panic!("not a chunk: {other:?}"),
            })
            .collect()
    }

    #[test]
    fn split_respects_frame_limit() {
        let big = format!(r#"{{"type":"shell-output","data":"{}"}}"#, "x\\\"y".repeat(2_000));
        let frames = split(&big, "m-1", 1_024);
        assert!(frames.len() > 1);
        for f in &frames {
            let encoded = serde_json::to_string(f).unwrap();
            assert!(encoded.len() <= 1_024, "part encoded to {} bytes", encoded.len());
        }
        let joined: String = parts_of(&frames).into_iter().map(|(_, _, d)| d).collect();
        assert_eq!(joined, big);
    }

    #[test]
    fn split_keeps_multibyte_chars_whole() {
        let text = "ü".repeat(500);
        let frames = split(&text, "m", 200);
        for (_, _, data) in parts_of(&frames) {
            assert!(data.chars().all(|c| c == 'ü'));
        }
    }

    #[test]
    fn split_indices_are_contiguous() {
        let frames = split(&"a".repeat(1_000), "m", 300);
        let parts = parts_of(&frames);
        let total = parts.len() as u32;
        for (i, (idx, tot, _)) in parts.iter().enumerate() {
            assert_eq!(*idx, i as u32);
            assert_eq!(*tot, total);
        }
    }

    #[test]
    fn reassembles_out_of_order() {
        let mut r = reassembler();
        let now = Instant::now();
        assert_eq!(r.accept("m", 2, 3, "c".into(), now).unwrap(), None);
        assert_eq!(r.accept("m", 0, 3, "a".into(), now).unwrap(), None);
        assert_eq!(r.pending(), 1);
        assert_eq!(
            r.accept("m", 1, 3, "b".into(), now).unwrap(),
            Some("abc".to_owned())
        );
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn duplicates_are_ignored() {
        let mut r = reassembler();
        let now = Instant::now();
        r.accept("m", 0, 2, "a".into(), now).unwrap();
        assert_eq!(r.accept("m", 0, 2, "zzz".into(), now).unwrap(), None);
        assert_eq!(r.accept("m", 1, 2, "b".into(), now).unwrap(), Some("ab".into()));
    }

    #[test]
    fn inconsistent_total_is_rejected() {
        let mut r = reassembler();
        let now = Instant::now();
        r.accept("m", 0, 2, "a".into(), now).unwrap();
        let err = r.accept("m", 1, 3, "b".into(), now).unwrap_err();
        assert!(matches!(err, CodecError::InvalidChunk { reason: "total parts changed", .. }));
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut r = reassembler();
        assert!(r.accept("m", 3, 3, "x".into(), Instant::now()).is_err());
        assert!(r.accept("m", 0, 0, "x".into(), Instant::now()).is_err());
    }

    #[test]
    fn stale_partials_are_evicted() {
        let mut r = reassembler();
        let t0 = Instant::now();
        r.accept("old", 0, 2, "a".into(), t0).unwrap();
        r.accept("new", 0, 2, "a".into(), t0 + Duration::from_millis(600)).unwrap();

        let evicted = r.evict_expired(t0 + Duration::from_millis(1_000));
        assert_eq!(evicted, vec!["old".to_owned()]);
        assert_eq!(r.pending(), 1);
    }

    #[test]
    fn pending_limit_drops_oldest() {
        let mut r = reassembler();
        let t0 = Instant::now();
        r.accept("a", 0, 2, "1".into(), t0).unwrap();
        r.accept("b", 0, 2, "1".into(), t0 + Duration::from_millis(1)).unwrap();
        r.accept("c", 0, 2, "1".into(), t0 + Duration::from_millis(2)).unwrap();
        assert_eq!(r.pending(), 2);
        // "a" was evicted, so its second part starts a fresh partial.
        assert_eq!(r.accept("a", 1, 2, "2".into(), t0).unwrap(), None);
    }

    #[test]
    fn tiny_limit_falls_back_to_the_part_floor() {
        let text = "a".repeat(1_000);
        let frames = split(&text, "m", 10);
        let envelope = serde_json::to_string(&Frame::Chunk {
            message_id: "m".into(),
            part_index: u32::MAX,
            total_parts: u32::MAX,
            data: String::new(),
        })
        .unwrap()
        .len();
        for f in &frames {
            let encoded = serde_json::to_string(f).unwrap();
            assert!(encoded.len() <= envelope + MIN_PART_BYTES);
        }
        assert_eq!(frames.len(), 1_000usize.div_ceil(MIN_PART_BYTES));
    }

    #[test]
    fn oversized_message_is_discarded() {
        let mut r = reassembler();
        let now = Instant::now();
        r.accept("big", 0, 3, "x".repeat(2_000), now).unwrap();
        let err = r.accept("big", 1, 3, "x".repeat(2_000), now).unwrap_err();
        assert!(matches!(err, CodecError::InvalidChunk { reason: "message exceeds size limit", .. }));
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn absurd_part_count_is_rejected_up_front() {
        let mut r = reassembler();
        let err = r.accept("flood", 0, u32::MAX, String::new(), Instant::now()).unwrap_err();
        assert!(matches!(err, CodecError::InvalidChunk { reason: "message exceeds size limit", .. }));
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn split_then_reassemble() {
        let text = format!(r#"{{"type":"message","content":"{}"}}"#, "word ".repeat(400));
        let mut r = reassembler();
        let now = Instant::now();
        let mut out = None;
        for f in split(&text, "id", 512).into_iter().rev() {
            if let Frame::Chunk {
                message_id,
                part_index,
                total_parts,
                data,
            } = f
            {
                out = r.accept(&message_id, part_index, total_parts, data, now).unwrap();
            }
        }
        assert_eq!(out.as_deref(), Some(text.as_str()));
    }
}

//! Receive window: reordering, deduplication, and in-order delivery

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use crate::segment::{seq_before, Segment, SeqNum, Timestamp};

/// Reorders and deduplicates inbound segments into an in-order byte stream
/// and generates the acknowledgments to send back.
#[derive(Debug)]
pub struct RecvWindow {
    /// Out-of-order segments, kept sorted by sequence number
    segments: VecDeque<Segment>,
    /// In-order payloads ready for [`RecvWindow::drain`]
    ready: VecDeque<Bytes>,
    /// Next sequence number expected in order
    rcv_nxt: SeqNum,
    capacity: u32,
    /// Pending acknowledgments as (sn, echoed timestamp)
    acks: Vec<(SeqNum, Timestamp)>,
}

impl RecvWindow {
    pub fn new(capacity: u32) -> Self {
        Self {
            segments: VecDeque::new(),
            ready: VecDeque::new(),
            rcv_nxt: 0,
            capacity,
            acks: Vec::new(),
        }
    }

    /// Next expected sequence number; the cumulative-ack threshold
    /// advertised to the peer.
    pub fn next_expected(&self) -> SeqNum {
        self.rcv_nxt
    }

    /// Unused window slots to advertise on outgoing segments
    pub fn unused(&self) -> u16 {
        (self.capacity as usize).saturating_sub(self.ready.len()) as u16
    }

    /// Segments buffered out of order (stats)
    pub fn buffered(&self) -> usize {
        self.segments.len()
    }

    /// In-order payloads awaiting drain
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn set_capacity(&mut self, capacity: u32) {
        self.capacity = capacity;
    }

    pub fn has_acks(&self) -> bool {
        !self.acks.is_empty()
    }

    /// Take the pending acknowledgment list for flushing
    pub fn take_acks(&mut self) -> Vec<(SeqNum, Timestamp)> {
        std::mem::take(&mut self.acks)
    }

    /// Accept one inbound data segment.
    ///
    /// In-window arrivals are acknowledged even when duplicated, so lost
    /// acks are repaired. Arrivals beyond the window are discarded without
    /// acknowledgment; the shrunken advertised window signals backpressure.
    pub fn on_segment(&mut self, segment: Segment) {
        let sn = segment.header.sn;

        if !seq_before(sn, self.rcv_nxt.wrapping_add(self.capacity)) {
            return;
        }

        self.acks.push((sn, segment.header.ts));

        if seq_before(sn, self.rcv_nxt) {
            return; // already delivered
        }

        self.insert_sorted(segment);
        self.promote();
    }

    /// Produce up to `max` in-order bytes. Stops at the first gap; a
    /// partially consumed payload is kept for the next call, so repeated
    /// drains reproduce the sent byte stream exactly.
    pub fn drain(&mut self, max: usize) -> Bytes {
        if max == 0 || self.ready.is_empty() {
            return Bytes::new();
        }

        // Fast path: serve from a single chunk without copying
        if let Some(front) = self.ready.front_mut() {
            if front.len() >= max {
                let out = front.split_to(max);
                if front.is_empty() {
                    self.ready.pop_front();
                    self.promote();
                }
                return out;
            }
            if self.ready.len() == 1 {
                let out = self.ready.pop_front().unwrap_or_default();
                self.promote();
                return out;
            }
        }

        let available: usize = self.ready.iter().map(|chunk| chunk.len()).sum();
        let mut out = BytesMut::with_capacity(max.min(available));
        while out.len() < max {
            let Some(front) = self.ready.front_mut() else {
                break;
            };
            let take = front.len().min(max - out.len());
            out.extend_from_slice(&front.split_to(take));
            if front.is_empty() {
                self.ready.pop_front();
            }
        }

        self.promote();
        out.freeze()
    }

    /// Drop all buffered state
    pub fn clear(&mut self) {
        self.segments.clear();
        self.ready.clear();
        self.acks.clear();
    }

    /// Insert in sequence order, scanning from the back since arrivals are
    /// usually nearly in order. Duplicates are discarded.
    fn insert_sorted(&mut self, segment: Segment) {
        let sn = segment.header.sn;
        let mut insert_pos = self.segments.len();

        for (i, existing) in self.segments.iter().enumerate().rev() {
            if existing.header.sn == sn {
                return; // duplicate of a buffered segment
            }
            if seq_before(sn, existing.header.sn) {
                insert_pos = i;
            } else {
                break;
            }
        }

        if insert_pos == self.segments.len() {
            self.segments.push_back(segment);
        } else {
            self.segments.insert(insert_pos, segment);
        }
    }

    /// Move consecutive segments into the ready queue while the window
    /// has room for them.
    fn promote(&mut self) {
        while let Some(front) = self.segments.front() {
            if front.header.sn != self.rcv_nxt || self.ready.len() >= self.capacity as usize {
                break;
            }
            let segment = self.segments.pop_front().unwrap();
            self.ready.push_back(segment.payload);
            self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Segment;

    fn push(sn: SeqNum, data: &'static [u8]) -> Segment {
        let mut seg = Segment::push(1, sn, 0, Bytes::from_static(data));
        seg.header.ts = 100 + sn;
        seg
    }

    #[test]
    fn in_order_delivery() {
        let mut wnd = RecvWindow::new(32);
        wnd.on_segment(push(0, b"ab"));
        wnd.on_segment(push(1, b"cd"));

        assert_eq!(&wnd.drain(16)[..], b"abcd");
        assert_eq!(wnd.next_expected(), 2);
    }

    #[test]
    fn out_of_order_arrivals_are_reordered() {
        let mut wnd = RecvWindow::new(32);
        wnd.on_segment(push(2, b"ef"));
        wnd.on_segment(push(0, b"ab"));

        // Gap at 1: only sn 0 is deliverable
        assert_eq!(&wnd.drain(16)[..], b"ab");
        assert!(wnd.drain(16).is_empty());

        wnd.on_segment(push(1, b"cd"));
        assert_eq!(&wnd.drain(16)[..], b"cdef");
    }

    #[test]
    fn duplicates_have_no_observable_effect_but_are_acked() {
        let mut wnd = RecvWindow::new(32);
        wnd.on_segment(push(0, b"ab"));
        wnd.on_segment(push(0, b"ab")); // duplicate of queued data
        assert_eq!(&wnd.drain(16)[..], b"ab");

        wnd.on_segment(push(0, b"ab")); // duplicate of delivered data
        wnd.on_segment(push(1, b"cd"));
        wnd.on_segment(push(1, b"cd")); // duplicate of buffered data

        assert_eq!(&wnd.drain(16)[..], b"cd");
        assert!(wnd.drain(16).is_empty());

        // Every in-window arrival produced an ack
        assert_eq!(wnd.take_acks().len(), 5);
        assert!(!wnd.has_acks());
    }

    #[test]
    fn drain_respects_max_and_splits_payloads() {
        let mut wnd = RecvWindow::new(32);
        wnd.on_segment(push(0, b"abcdef"));
        wnd.on_segment(push(1, b"ghij"));

        assert_eq!(&wnd.drain(4)[..], b"abcd");
        assert_eq!(&wnd.drain(4)[..], b"efgh");
        assert_eq!(&wnd.drain(4)[..], b"ij");
        assert!(wnd.drain(4).is_empty());
    }

    #[test]
    fn overflow_segments_are_dropped_without_ack() {
        let mut wnd = RecvWindow::new(2);
        wnd.on_segment(push(3, b"dd")); // beyond rcv_nxt + capacity
        assert!(!wnd.has_acks());
        assert_eq!(wnd.buffered(), 0);

        wnd.on_segment(push(0, b"aa"));
        wnd.on_segment(push(1, b"bb"));
        assert_eq!(wnd.take_acks().len(), 2);
        assert_eq!(wnd.unused(), 0);

        // Draining reopens the window; the dropped segment arrives again
        assert_eq!(&wnd.drain(16)[..], b"aabb");
        assert_eq!(wnd.unused(), 2);
        wnd.on_segment(push(2, b"cc"));
        wnd.on_segment(push(3, b"dd"));
        assert_eq!(&wnd.drain(16)[..], b"ccdd");
    }

    #[test]
    fn advertised_window_shrinks_with_ready_data() {
        let mut wnd = RecvWindow::new(4);
        assert_eq!(wnd.unused(), 4);
        wnd.on_segment(push(0, b"aa"));
        wnd.on_segment(push(1, b"bb"));
        assert_eq!(wnd.unused(), 2);
        wnd.drain(64);
        assert_eq!(wnd.unused(), 4);
    }
}

//! Send window: outbound segments awaiting acknowledgment

use std::collections::VecDeque;

use bytes::Bytes;

use crate::config::DelayConfig;
use crate::error::{ArqError, Result};
use crate::segment::{constants, seq_before, time_diff, ConvId, Segment, SeqNum, Timestamp};

/// One unacknowledged outbound segment plus its retransmission bookkeeping
#[derive(Debug, Clone)]
pub(crate) struct SendEntry {
    pub sn: SeqNum,
    pub frg: u8,
    pub payload: Bytes,
    /// Retransmission timeout currently applied to this entry
    pub rto: u32,
    /// Deadline for the next (re)transmission
    pub resend_at: Timestamp,
    /// Times this entry was skipped by out-of-order acks
    pub fastack: u32,
    /// Transmission count (0 = never sent)
    pub xmit: u32,
}

/// Parameters the connection engine supplies to [`SendWindow::flush`]
#[derive(Debug, Clone, Copy)]
pub(crate) struct FlushContext {
    pub now: Timestamp,
    pub conv: ConvId,
    /// Receiver-side unused window to advertise on outgoing segments
    pub wnd_unused: u16,
    /// Transmission gate: min(send, remote[, congestion]) window
    pub effective_wnd: u32,
    /// Current estimator RTO for first transmissions
    pub rto: u32,
    pub delay: DelayConfig,
    pub max_retries: u32,
}

/// Result of one flush pass, used to drive congestion control
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct FlushOutcome {
    /// At least one entry hit its RTO deadline
    pub lost: bool,
    /// At least one entry was fast-retransmitted
    pub fast_resend: bool,
    /// Timeout retransmissions emitted
    pub retransmits: u32,
    /// Fast retransmissions emitted
    pub fast_retransmits: u32,
    /// Segments handed to the emitter
    pub emitted: u32,
}

/// Tracks outbound segments until they are cumulatively or selectively
/// acknowledged, and schedules their retransmission.
#[derive(Debug)]
pub struct SendWindow {
    entries: VecDeque<SendEntry>,
    snd_una: SeqNum,
    snd_nxt: SeqNum,
    capacity: u32,
    mss: usize,
}

impl SendWindow {
    pub fn new(capacity: u32, mss: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            snd_una: 0,
            snd_nxt: 0,
            capacity,
            mss,
        }
    }

    /// Earliest unacknowledged sequence number
    pub fn una(&self) -> SeqNum {
        self.snd_una
    }

    /// Next sequence number to assign
    pub fn next_sn(&self) -> SeqNum {
        self.snd_nxt
    }

    /// Unacknowledged entries currently buffered
    pub fn in_flight(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set_capacity(&mut self, capacity: u32) {
        self.capacity = capacity;
    }

    pub fn set_mss(&mut self, mss: usize) {
        self.mss = mss;
    }

    /// Fragment `data` into MSS-sized entries and assign sequence numbers.
    ///
    /// Fails with [`ArqError::WindowFull`] when the resulting entry count
    /// would exceed the send window; the window state is left untouched so
    /// the caller can retry after acknowledgments arrive.
    pub fn enqueue(&mut self, data: Bytes) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let count = data.len().div_ceil(self.mss);
        if self.entries.len() + count > self.capacity as usize {
            return Err(ArqError::WindowFull {
                in_flight: self.entries.len(),
                capacity: self.capacity as usize,
            });
        }

        let mut offset = 0;
        for i in 0..count {
            let size = self.mss.min(data.len() - offset);
            let fragment = data.slice(offset..offset + size);
            offset += size;

            self.entries.push_back(SendEntry {
                sn: self.snd_nxt,
                // Remaining-fragment count; advisory, saturates for huge sends
                frg: (count - i - 1).min(u8::MAX as usize) as u8,
                payload: fragment,
                rto: 0,
                resend_at: 0,
                fastack: 0,
                xmit: 0,
            });
            self.snd_nxt = self.snd_nxt.wrapping_add(1);
        }

        Ok(())
    }

    /// Selective acknowledgment of one sequence number.
    /// Returns true if a matching in-flight entry was removed.
    pub fn on_ack(&mut self, sn: SeqNum) -> bool {
        if seq_before(sn, self.snd_una) || !seq_before(sn, self.snd_nxt) {
            return false;
        }

        let before = self.entries.len();
        self.entries.retain(|entry| entry.sn != sn);
        let removed = self.entries.len() != before;
        self.shrink();
        removed
    }

    /// Cumulative acknowledgment: drop every entry below `una`
    pub fn on_ack_range(&mut self, una: SeqNum) {
        while let Some(entry) = self.entries.front() {
            if seq_before(entry.sn, una) {
                self.entries.pop_front();
            } else {
                break;
            }
        }
        self.shrink();
    }

    /// Count out-of-order ack evidence: every entry below `sn` was skipped
    /// by the acknowledgment that just arrived.
    pub fn on_fast_ack(&mut self, sn: SeqNum) {
        if seq_before(sn, self.snd_una) || !seq_before(sn, self.snd_nxt) {
            return;
        }

        for entry in self.entries.iter_mut() {
            if seq_before(entry.sn, sn) {
                entry.fastack += 1;
            } else {
                break;
            }
        }
    }

    /// Transmit due entries: first transmissions (gated by the effective
    /// window), RTO expirations with exponential backoff, and fast
    /// retransmissions past the configured skip threshold.
    ///
    /// Fails with [`ArqError::LinkDead`] as soon as any entry exceeds the
    /// retransmission budget; nothing further is emitted for it.
    pub(crate) fn flush(
        &mut self,
        ctx: FlushContext,
        emit: &mut dyn FnMut(Segment),
    ) -> Result<FlushOutcome> {
        let resend_threshold = if ctx.delay.resend > 0 {
            ctx.delay.resend
        } else {
            u32::MAX
        };
        let rtomin = if ctx.delay.nodelay { 0 } else { ctx.rto / 8 };
        let xmit_limit = self.snd_una.wrapping_add(ctx.effective_wnd);

        let mut outcome = FlushOutcome::default();

        for entry in self.entries.iter_mut() {
            let mut needsend = false;

            if entry.xmit == 0 {
                // First transmission; entries are sequence-ordered, so the
                // first fresh entry past the window ends the pass.
                if !seq_before(entry.sn, xmit_limit) {
                    break;
                }
                needsend = true;
                entry.xmit = 1;
                entry.rto = ctx.rto;
                entry.resend_at = ctx.now.wrapping_add(entry.rto + rtomin);
            } else if time_diff(ctx.now, entry.resend_at) >= 0 {
                // Timeout retransmission with bounded exponential backoff
                needsend = true;
                entry.xmit += 1;
                if ctx.delay.nodelay {
                    entry.rto += entry.rto / 2;
                } else {
                    entry.rto += entry.rto.max(ctx.delay.interval);
                }
                entry.rto = entry.rto.min(constants::RTO_MAX);
                entry.resend_at = ctx.now.wrapping_add(entry.rto);
                outcome.lost = true;
                outcome.retransmits += 1;
            } else if entry.fastack >= resend_threshold
                && entry.xmit <= constants::FASTACK_LIMIT
            {
                // Fast retransmission ahead of the timer
                needsend = true;
                entry.xmit += 1;
                entry.fastack = 0;
                entry.resend_at = ctx.now.wrapping_add(entry.rto);
                outcome.fast_resend = true;
                outcome.fast_retransmits += 1;
            }

            if entry.xmit > ctx.max_retries {
                return Err(ArqError::LinkDead {
                    sn: entry.sn,
                    max_retries: ctx.max_retries,
                });
            }

            if needsend {
                let mut segment = Segment::push(ctx.conv, entry.sn, entry.frg, entry.payload.clone());
                segment.header.ts = ctx.now;
                segment.header.wnd = ctx.wnd_unused;
                emit(segment);
                outcome.emitted += 1;
            }
        }

        Ok(outcome)
    }

    /// Drop all buffered entries
    pub fn clear(&mut self) {
        self.entries.clear();
        self.snd_una = self.snd_nxt;
    }

    fn shrink(&mut self) {
        self.snd_una = match self.entries.front() {
            Some(entry) => entry.sn,
            None => self.snd_nxt,
        };
    }
}

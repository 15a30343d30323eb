//! Connection engine orchestrating the send/receive windows, RTT
//! estimation, and the tick-driven update loop for one conversation.

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::config::{ArqConfig, DelayConfig};
use crate::error::{ArqError, Result};
use crate::recv_window::RecvWindow;
use crate::rtt::{CongestionWindow, RttEstimator};
use crate::segment::{
    constants, seq_after, time_diff, Command, ConvId, Segment, SeqNum, Timestamp,
};
use crate::send_window::{FlushContext, SendWindow};

/// Synchronous datagram sink injected into a connection.
///
/// `emit` is called during `update`/`flush` with one encoded datagram of at
/// most MTU bytes (possibly several packed segments). It must not block.
pub trait Output {
    fn emit(&mut self, datagram: &[u8]);
}

impl<F: FnMut(&[u8])> Output for F {
    fn emit(&mut self, datagram: &[u8]) {
        self(datagram)
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Created, no data traffic yet
    Idle,
    /// Data has been sent or received
    Active,
    /// Teardown requested; pending acks and retransmits still drain
    Closing,
    /// Terminal; all buffered state released
    Closed,
}

/// Per-connection counters and estimator snapshots
#[derive(Debug, Default, Clone)]
pub struct ArqStats {
    /// Application bytes accepted by `send`
    pub bytes_sent: u64,
    /// Application bytes delivered by `recv`
    pub bytes_received: u64,
    /// Segments handed to the output sink
    pub segments_sent: u64,
    /// Data segments accepted from `input`
    pub segments_received: u64,
    /// Timeout retransmissions
    pub retransmissions: u64,
    /// Fast retransmissions
    pub fast_retransmissions: u64,
    /// Smoothed RTT in milliseconds
    pub srtt: u32,
    /// RTT variance
    pub rttvar: u32,
    /// Current retransmission timeout
    pub rto: u32,
    /// Congestion window in segments
    pub cwnd: u32,
    /// Unacknowledged segments in the send window
    pub snd_in_flight: u32,
    /// Out-of-order segments buffered in the receive window
    pub rcv_buffered: u32,
}

/// Window probe scheduling state
#[derive(Debug, Default)]
struct ProbeState {
    /// A probe request should go out
    ask: bool,
    /// A window advertisement should go out
    tell: bool,
    /// Current probe backoff in milliseconds
    wait: u32,
    /// Deadline for the next probe
    ts: Timestamp,
}

/// A reliable-ARQ connection over an unreliable datagram channel.
///
/// All operations are synchronous and must be serialized by the caller.
/// Time-sensitive calls take a caller-supplied monotonic `now` in
/// milliseconds; the engine keeps no clocks or timers of its own.
pub struct Connection {
    conv: ConvId,
    config: ArqConfig,
    state: State,

    snd: SendWindow,
    rcv: RecvWindow,
    rtt: RttEstimator,
    cwnd: CongestionWindow,

    /// Most recent window advertised by the peer, in segments
    rmt_wnd: u32,
    probe: ProbeState,

    /// Last `now` observed from the caller
    current: Timestamp,
    last_flush: Timestamp,
    updated: bool,

    output: Option<Box<dyn Output + Send>>,
    stats: ArqStats,
    /// Set when a segment exhausts its retransmission budget
    dead: Option<SeqNum>,
}

impl Connection {
    /// Create a new connection in `Idle` for the given conversation id
    pub fn new(conv: ConvId, config: ArqConfig) -> Result<Self> {
        config.validate()?;

        let mss = config.mss();
        let min_rto = if config.delay.nodelay {
            constants::RTO_NODELAY_MIN
        } else {
            constants::RTO_MIN
        };

        Ok(Self {
            conv,
            state: State::Idle,
            snd: SendWindow::new(config.snd_wnd, mss),
            rcv: RecvWindow::new(config.rcv_wnd),
            rtt: RttEstimator::new(min_rto),
            cwnd: CongestionWindow::new(config.snd_wnd, mss as u32),
            rmt_wnd: constants::WND_RCV,
            probe: ProbeState::default(),
            current: 0,
            last_flush: 0,
            updated: false,
            output: None,
            stats: ArqStats::default(),
            dead: None,
            config,
        })
    }

    /// Inject the datagram sink. Until one is set, `update`/`flush` keep
    /// all state but emit nothing.
    pub fn set_output(&mut self, output: impl Output + Send + 'static) {
        self.output = Some(Box::new(output));
    }

    /// Conversation id
    pub fn conv(&self) -> ConvId {
        self.conv
    }

    /// Current lifecycle state
    pub fn state(&self) -> State {
        self.state
    }

    /// Current configuration
    pub fn config(&self) -> &ArqConfig {
        &self.config
    }

    /// Counters and estimator snapshot
    pub fn stats(&self) -> &ArqStats {
        &self.stats
    }

    /// True once a segment has exhausted its retransmission budget
    pub fn is_dead(&self) -> bool {
        self.dead.is_some()
    }

    /// Enqueue application bytes for reliable delivery.
    ///
    /// Fails with [`ArqError::WindowFull`] when the send window cannot
    /// admit every fragment; retry after acknowledgments arrive.
    pub fn send(&mut self, data: Bytes) -> Result<()> {
        self.check_open()?;
        if self.state == State::Closing {
            return Err(ArqError::InvalidHandle);
        }
        if data.is_empty() {
            return Ok(());
        }

        let len = data.len();
        self.snd.enqueue(data)?;
        self.touch();
        self.stats.bytes_sent += len as u64;

        trace!(conv = self.conv, bytes = len, "data queued for sending");
        Ok(())
    }

    /// Take up to `max_bytes` of in-order received data. Returns an empty
    /// buffer when nothing is deliverable; never blocks.
    pub fn recv(&mut self, max_bytes: usize) -> Result<Bytes> {
        self.check_open()?;

        let was_limited = self.rcv.unused() == 0;
        let data = self.rcv.drain(max_bytes);
        self.stats.bytes_received += data.len() as u64;

        // Window recovered after being full: tell the peer unprompted
        if was_limited && self.rcv.unused() > 0 {
            self.probe.tell = true;
        }

        if !data.is_empty() {
            trace!(conv = self.conv, bytes = data.len(), "data delivered");
        }
        Ok(data)
    }

    /// Feed one received datagram (one or more packed segments).
    ///
    /// Malformed trailing bytes are dropped with a warning; the call still
    /// succeeds. Segments for other conversations are ignored.
    pub fn input(&mut self, data: Bytes, now: Timestamp) -> Result<()> {
        self.check_open()?;
        self.current = now;

        let mut buf = data;
        let prev_una = self.snd.una();
        let mut max_ack: Option<SeqNum> = None;

        while !buf.is_empty() {
            let segment = match Segment::decode(&mut buf) {
                Ok(segment) => segment,
                Err(err) => {
                    warn!(conv = self.conv, %err, "dropping malformed input");
                    break;
                }
            };

            if segment.header.conv != self.conv {
                warn!(
                    conv = self.conv,
                    segment_conv = segment.header.conv,
                    "conversation id mismatch, segment ignored"
                );
                continue;
            }

            self.rmt_wnd = segment.header.wnd as u32;
            self.touch();

            match segment.header.cmd {
                Command::Ack => {
                    let ts = segment.header.ts;
                    if time_diff(now, ts) >= 0 {
                        let interval = self.config.delay.interval;
                        self.rtt.sample(now.wrapping_sub(ts), interval);
                        self.stats.srtt = self.rtt.srtt();
                        self.stats.rttvar = self.rtt.rttvar();
                        self.stats.rto = self.rtt.rto();
                    }

                    if let Some(una) = segment.ack_una() {
                        self.snd.on_ack_range(una);
                    }
                    self.snd.on_ack(segment.header.sn);

                    match max_ack {
                        Some(prev) if !seq_after(segment.header.sn, prev) => {}
                        _ => max_ack = Some(segment.header.sn),
                    }
                }

                Command::Push => {
                    self.rcv.on_segment(segment);
                    self.stats.segments_received += 1;
                }

                Command::Probe => {
                    self.probe.tell = true;
                }

                Command::ProbeReply => {
                    // Window advertisement already captured from the header
                }
            }
        }

        if let Some(sn) = max_ack {
            self.snd.on_fast_ack(sn);
        }

        // Cumulative progress grows the congestion window
        if seq_after(self.snd.una(), prev_una) && self.config.delay.flow_control {
            self.cwnd.on_progress(self.rmt_wnd);
            self.stats.cwnd = self.cwnd.window();
        }

        self.stats.snd_in_flight = self.snd.in_flight() as u32;
        self.stats.rcv_buffered = self.rcv.buffered() as u32;

        Ok(())
    }

    /// Advance the tick-driven update loop.
    ///
    /// Flushes on the first call and thereafter once per configured
    /// interval. Must be called periodically (every 10-100 ms); pending
    /// retransmission timers fire only here.
    pub fn update(&mut self, now: Timestamp) -> Result<()> {
        self.check_open()?;
        self.current = now;

        if !self.updated {
            self.updated = true;
            self.last_flush = now;
            return self.flush(now);
        }

        let mut elapsed = time_diff(now, self.last_flush);
        if elapsed < 0 {
            // Clock went backwards; resynchronize
            self.last_flush = now;
            elapsed = 0;
        }

        if elapsed >= self.config.delay.interval as i32 {
            self.last_flush = now;
            return self.flush(now);
        }

        Ok(())
    }

    /// Flush pending acknowledgments, window probes, and due data
    /// segments to the output sink immediately.
    pub fn flush(&mut self, now: Timestamp) -> Result<()> {
        self.check_open()?;
        if let Some(sn) = self.dead {
            return Err(ArqError::LinkDead {
                sn,
                max_retries: self.config.max_retries,
            });
        }

        self.current = now;

        let Some(mut output) = self.output.take() else {
            return Ok(());
        };
        let result = self.flush_inner(now, output.as_mut());
        self.output = Some(output);

        if self.state == State::Closing && self.snd.is_empty() && !self.rcv.has_acks() {
            debug!(conv = self.conv, "close drain complete");
            self.finish_close();
        }

        result
    }

    /// Request teardown. Pending acknowledgments and retransmissions keep
    /// draining through `update` until the connection reaches `Closed`.
    pub fn close(&mut self) {
        match self.state {
            State::Idle => self.finish_close(),
            State::Active => {
                debug!(conv = self.conv, "closing");
                self.state = State::Closing;
            }
            State::Closing | State::Closed => {}
        }
    }

    /// Release the connection immediately, freeing all buffered state.
    /// Every subsequent operation fails with [`ArqError::InvalidHandle`].
    pub fn release(&mut self) {
        if self.state != State::Closed {
            debug!(conv = self.conv, "released");
        }
        self.finish_close();
    }

    /// Switch delay/retransmission mode. Prior settings are retained when
    /// the new ones are rejected.
    pub fn set_nodelay(&mut self, delay: DelayConfig) -> Result<()> {
        self.check_open()?;
        delay.validate()?;

        self.rtt.set_min_rto(if delay.nodelay {
            constants::RTO_NODELAY_MIN
        } else {
            constants::RTO_MIN
        });
        self.config.delay = delay;
        Ok(())
    }

    /// Resize the send and receive windows
    pub fn set_window_size(&mut self, snd_wnd: u32, rcv_wnd: u32) -> Result<()> {
        self.check_open()?;

        let mut candidate = self.config.clone();
        candidate.snd_wnd = snd_wnd;
        candidate.rcv_wnd = rcv_wnd;
        candidate.validate()?;

        self.config = candidate;
        self.snd.set_capacity(snd_wnd);
        self.rcv.set_capacity(rcv_wnd);
        Ok(())
    }

    /// Change the MTU; affects the fragmentation threshold for subsequent
    /// sends and the datagram packing limit.
    pub fn set_mtu(&mut self, mtu: u32) -> Result<()> {
        self.check_open()?;

        let mut candidate = self.config.clone();
        candidate.mtu = mtu;
        candidate.validate()?;

        self.config = candidate;
        self.snd.set_mss(self.config.mss());
        self.cwnd.set_mss(self.config.mss() as u32);
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.state == State::Closed {
            return Err(ArqError::InvalidHandle);
        }
        Ok(())
    }

    fn touch(&mut self) {
        if self.state == State::Idle {
            self.state = State::Active;
        }
    }

    fn finish_close(&mut self) {
        self.state = State::Closed;
        self.snd.clear();
        self.rcv.clear();
        self.output = None;
        self.probe = ProbeState::default();
    }

    fn flush_inner(&mut self, now: Timestamp, output: &mut dyn Output) -> Result<()> {
        let mut packer = Packer::new(self.config.mtu as usize);
        let wnd_unused = self.rcv.unused();
        let una = self.rcv.next_expected();

        // Acknowledgments first so the peer's estimator sees fresh echoes
        for (sn, ts) in self.rcv.take_acks() {
            let mut ack = Segment::ack(self.conv, sn, ts, una);
            ack.header.wnd = wnd_unused;
            packer.push(&ack, output);
            self.stats.segments_sent += 1;
        }

        self.schedule_probe(now);
        if self.probe.ask {
            let mut probe = Segment::probe(self.conv);
            probe.header.wnd = wnd_unused;
            packer.push(&probe, output);
            self.stats.segments_sent += 1;
        }
        if self.probe.tell {
            let mut reply = Segment::probe_reply(self.conv);
            reply.header.wnd = wnd_unused;
            packer.push(&reply, output);
            self.stats.segments_sent += 1;
        }
        self.probe.ask = false;
        self.probe.tell = false;

        // Data: remote window gates transmission; the congestion window
        // joins in unless flow control is disabled.
        let mut effective_wnd = self.config.snd_wnd.min(self.rmt_wnd);
        if self.config.delay.flow_control {
            effective_wnd = effective_wnd.min(self.cwnd.window());
        }

        let ctx = FlushContext {
            now,
            conv: self.conv,
            wnd_unused,
            effective_wnd,
            rto: self.rtt.rto(),
            delay: self.config.delay,
            max_retries: self.config.max_retries,
        };

        let flushed = self.snd.flush(ctx, &mut |segment| {
            packer.push(&segment, output);
        });

        let outcome = match flushed {
            Ok(outcome) => outcome,
            Err(err) => {
                if let ArqError::LinkDead { sn, .. } = err {
                    warn!(conv = self.conv, sn, "retransmission budget exhausted");
                    self.dead = Some(sn);
                }
                packer.finish(output);
                return Err(err);
            }
        };

        packer.finish(output);

        self.stats.segments_sent += outcome.emitted as u64;
        self.stats.retransmissions += outcome.retransmits as u64;
        self.stats.fast_retransmissions += outcome.fast_retransmits as u64;

        if self.config.delay.flow_control {
            if outcome.fast_resend {
                let inflight = self.snd.next_sn().wrapping_sub(self.snd.una());
                self.cwnd.on_fast_resend(inflight, self.config.delay.resend);
            }
            if outcome.lost {
                self.cwnd.on_loss();
            }
            self.stats.cwnd = self.cwnd.window();
        }

        self.stats.snd_in_flight = self.snd.in_flight() as u32;
        self.stats.rcv_buffered = self.rcv.buffered() as u32;

        trace!(
            conv = self.conv,
            emitted = outcome.emitted,
            in_flight = self.snd.in_flight(),
            "flush complete"
        );
        Ok(())
    }

    /// Schedule window probes while the remote advertises a zero window
    fn schedule_probe(&mut self, now: Timestamp) {
        if self.rmt_wnd != 0 {
            self.probe.ts = 0;
            self.probe.wait = 0;
            return;
        }

        if self.probe.wait == 0 {
            self.probe.wait = constants::PROBE_INIT;
            self.probe.ts = now.wrapping_add(self.probe.wait);
        } else if time_diff(now, self.probe.ts) >= 0 {
            self.probe.wait += self.probe.wait / 2;
            if self.probe.wait > constants::PROBE_LIMIT {
                self.probe.wait = constants::PROBE_LIMIT;
            }
            self.probe.ts = now.wrapping_add(self.probe.wait);
            self.probe.ask = true;
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("conv", &self.conv)
            .field("state", &self.state)
            .field("in_flight", &self.snd.in_flight())
            .field("rcv_buffered", &self.rcv.buffered())
            .field("dead", &self.dead)
            .finish()
    }
}

/// Packs consecutive segments into MTU-sized datagrams for the sink
struct Packer {
    buf: BytesMut,
    mtu: usize,
}

impl Packer {
    fn new(mtu: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(mtu),
            mtu,
        }
    }

    fn push(&mut self, segment: &Segment, output: &mut dyn Output) {
        if !self.buf.is_empty() && self.buf.len() + segment.wire_size() > self.mtu {
            output.emit(&self.buf);
            self.buf.clear();
        }
        segment.encode(&mut self.buf);
    }

    fn finish(&mut self, output: &mut dyn Output) {
        if !self.buf.is_empty() {
            output.emit(&self.buf);
            self.buf.clear();
        }
    }
}

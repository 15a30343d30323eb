//! Wire segment types and codec for the ARQ protocol

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ArqError, Result};

/// Protocol constants
pub mod constants {
    pub const RTO_NODELAY_MIN: u32 = 30; // min rto in nodelay mode
    pub const RTO_MIN: u32 = 100; // min rto in standard mode
    pub const RTO_DEFAULT: u32 = 200; // rto before the first sample
    pub const RTO_MAX: u32 = 60000; // rto clamp ceiling
    pub const WND_SND: u32 = 32; // default send window
    pub const WND_RCV: u32 = 128; // default receive window
    pub const MTU_DEFAULT: u32 = 1400; // default mtu
    pub const INTERVAL_DEFAULT: u32 = 40; // default update interval
    pub const RESEND_DEFAULT: u32 = 2; // default fast-retransmit skip count
    pub const MAX_RETRIES_DEFAULT: u32 = 20; // default retransmit budget
    pub const THRESH_INIT: u32 = 2; // initial slow start threshold
    pub const THRESH_MIN: u32 = 2; // min slow start threshold
    pub const PROBE_INIT: u32 = 7000; // 7 secs before first window probe
    pub const PROBE_LIMIT: u32 = 120000; // probe backoff ceiling
    pub const FASTACK_LIMIT: u32 = 5; // max fast retransmits per segment
}

/// Conversation ID type
pub type ConvId = u32;

/// Sequence number type
pub type SeqNum = u32;

/// Timestamp type (caller-supplied monotonic milliseconds)
pub type Timestamp = u32;

/// Segment command on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Application data
    Push = 0,
    /// Acknowledgment; payload carries the cumulative-ack threshold
    Ack = 1,
    /// Window probe request
    Probe = 2,
    /// Window probe reply
    ProbeReply = 3,
}

impl Command {
    /// Decode a wire command byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Command::Push),
            1 => Some(Command::Ack),
            2 => Some(Command::Probe),
            3 => Some(Command::ProbeReply),
            _ => None,
        }
    }

    /// Command name for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Push => "PUSH",
            Command::Ack => "ACK",
            Command::Probe => "PROBE",
            Command::ProbeReply => "PROBE_REPLY",
        }
    }
}

/// Segment header structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub conv: ConvId,
    pub cmd: Command,
    pub frg: u8,
    pub wnd: u16,
    pub ts: Timestamp,
    pub sn: SeqNum,
    pub len: u32,
}

impl Header {
    /// Size of the wire header in bytes
    pub const SIZE: usize = 20;

    /// Create a new header
    pub fn new(conv: ConvId, cmd: Command) -> Self {
        Self {
            conv,
            cmd,
            frg: 0,
            wnd: 0,
            ts: 0,
            sn: 0,
            len: 0,
        }
    }

    /// Encode header into buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.conv);
        buf.put_u8(self.cmd as u8);
        buf.put_u8(self.frg);
        buf.put_u16_le(self.wnd);
        buf.put_u32_le(self.ts);
        buf.put_u32_le(self.sn);
        buf.put_u32_le(self.len);
    }

    /// Decode header from buffer, consuming exactly [`Header::SIZE`] bytes
    /// on success and nothing on failure.
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(ArqError::malformed("truncated header"));
        }

        // Peek the command before committing to the read so a bad byte
        // leaves the buffer untouched.
        let cmd = Command::from_u8(buf[4]).ok_or(ArqError::malformed("unknown command"))?;

        let conv = buf.get_u32_le();
        buf.advance(1); // command byte, validated above
        let frg = buf.get_u8();
        let wnd = buf.get_u16_le();
        let ts = buf.get_u32_le();
        let sn = buf.get_u32_le();
        let len = buf.get_u32_le();

        Ok(Self {
            conv,
            cmd,
            frg,
            wnd,
            ts,
            sn,
            len,
        })
    }
}

/// A wire segment: header plus payload.
///
/// Retransmission bookkeeping lives in the send window's entries, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: Header,
    pub payload: Bytes,
}

impl Segment {
    /// Create a new segment with an empty payload
    pub fn new(conv: ConvId, cmd: Command) -> Self {
        Self {
            header: Header::new(conv, cmd),
            payload: Bytes::new(),
        }
    }

    /// Create a PUSH segment
    pub fn push(conv: ConvId, sn: SeqNum, frg: u8, payload: Bytes) -> Self {
        let mut header = Header::new(conv, Command::Push);
        header.sn = sn;
        header.frg = frg;
        header.len = payload.len() as u32;
        Self { header, payload }
    }

    /// Create an ACK segment. `sn` selectively acknowledges one segment,
    /// `ts` echoes its transmission timestamp for RTT sampling, and `una`
    /// rides in the payload as the cumulative-ack threshold.
    pub fn ack(conv: ConvId, sn: SeqNum, ts: Timestamp, una: SeqNum) -> Self {
        let mut payload = BytesMut::with_capacity(4);
        payload.put_u32_le(una);

        let mut header = Header::new(conv, Command::Ack);
        header.sn = sn;
        header.ts = ts;
        header.len = 4;
        Self {
            header,
            payload: payload.freeze(),
        }
    }

    /// Create a window probe request
    pub fn probe(conv: ConvId) -> Self {
        Self::new(conv, Command::Probe)
    }

    /// Create a window probe reply
    pub fn probe_reply(conv: ConvId) -> Self {
        Self::new(conv, Command::ProbeReply)
    }

    /// Encode segment into buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        debug_assert_eq!(self.header.len as usize, self.payload.len());
        self.header.encode(buf);
        buf.extend_from_slice(&self.payload);
    }

    /// Decode one segment from the front of `buf`, consuming exactly the
    /// bytes it occupies. Remaining bytes belong to the next segment of a
    /// packed datagram.
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let header = Header::decode(buf)?;

        if buf.len() < header.len as usize {
            return Err(ArqError::malformed("payload shorter than declared length"));
        }

        let payload = buf.split_to(header.len as usize);
        Ok(Self { header, payload })
    }

    /// Total encoded size
    pub fn wire_size(&self) -> usize {
        Header::SIZE + self.payload.len()
    }

    /// Cumulative-ack threshold carried by an ACK segment
    pub fn ack_una(&self) -> Option<SeqNum> {
        if self.header.cmd != Command::Ack || self.payload.len() < 4 {
            return None;
        }
        let mut buf = self.payload.clone();
        Some(buf.get_u32_le())
    }
}

/// Calculate time difference handling wrapping
pub fn time_diff(later: Timestamp, earlier: Timestamp) -> i32 {
    later.wrapping_sub(earlier) as i32
}

/// Check if a sequence number is before another (handling wrapping)
pub fn seq_before(seq1: SeqNum, seq2: SeqNum) -> bool {
    (seq1.wrapping_sub(seq2) as i32) < 0
}

/// Check if a sequence number is after another (handling wrapping)
pub fn seq_after(seq1: SeqNum, seq2: SeqNum) -> bool {
    (seq1.wrapping_sub(seq2) as i32) > 0
}

//! Wire formats for the Innosilicon chain protocol.
//!
//! ## Frame Layout
//!
//! Commands start with `[opcode, address]`, where address 0 broadcasts
//! to every chip on the chain. The bus is clocked two bytes at a time,
//! so every frame is padded to an even length.
//!
//! ```text
//! write register  09 aa r0 .. r9 crc_hi crc_lo 00 00
//! write job       sc aa header[63..0] start[..] header[75..64] diff[..] end[..] (crc)
//! read result  <- s8 aa n3 n2 n1 n0 xx xx crc_hi crc_lo
//! ```
//!
//! `s` is the job slot in the high nibble of the opcode byte. CRCs are
//! computed over the word-swapped bytes preceding them; see
//! [`crc`](super::crc).

use strum::{Display, FromRepr};

use super::crc::{crc16_swapped, crc16_swapped_is_valid};
use super::difficulty::DifficultyWord;
use super::error::ProtocolError;

pub const MAX_CHAIN_LENGTH: usize = 64;
pub const WRITE_JOB_LENGTH: usize = 58;
pub const MAX_CMD_LENGTH: usize = WRITE_JOB_LENGTH + MAX_CHAIN_LENGTH * 2 * 2;

/// Address that every chip on the chain answers to.
pub const BROADCAST: u8 = 0x00;

/// Register block length for A4 and A6 chips.
pub const REG_LENGTH: usize = 12;

/// Register writes are clocked out as a fixed 16-byte frame.
pub const REG_WRITE_FRAME_LENGTH: usize = 16;

/// Job frame length without the trailing CRC.
pub const JOB_BODY_LENGTH: usize = 90;
pub const JOB_CRC_LENGTH: usize = 2;

pub const RESULT_LENGTH: usize = 10;

/// Work header bytes carried by a job: 64 bytes of midstate input and 12
/// bytes of block header tail.
pub const HEADER_LENGTH: usize = 76;

/// Marker bytes carried in a job-queue reset.
const RESET_JOB_QUEUE_MARKER: [u8; 2] = [0xED, 0xED];

/// Template for the temperature ADC configuration written through the
/// secondary register. Byte 5 carries the clock divider.
const TSADC_TEMPLATE: [u8; REG_LENGTH] = [
    0x02, 0x50, 0xA0, 0x06, 0x28, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00,
];
const TSADC_DIVIDER_INDEX: usize = 5;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr)]
#[strum(serialize_all = "snake_case")]
pub enum Opcode {
    BistStart = 0x01,
    BistFix = 0x03,
    Reset = 0x04,
    ReadResult = 0x08,
    WriteReg = 0x09,
    ReadReg = 0x0A,
    BistCollect = 0x0B,
    WriteJob = 0x0C,
    WriteSecReg = 0x0D,
    ReadRegResp = 0x1A,
}

impl Opcode {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode the low nibble of a first frame byte, ignoring the slot
    /// carried in the high nibble of job and result frames.
    pub fn from_low_nibble(byte: u8) -> Option<Self> {
        match byte {
            0x1A => Some(Opcode::ReadRegResp),
            _ => Self::from_repr(byte & 0x0f),
        }
    }
}

/// Build a command frame, padding to an even length.
pub fn build_frame(opcode: Opcode, address: u8, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let len = (2 + payload.len() + 1) & !1;
    if len > MAX_CMD_LENGTH {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_CMD_LENGTH,
        });
    }

    let mut frame = Vec::with_capacity(len);
    frame.push(opcode.code());
    frame.push(address);
    frame.extend_from_slice(payload);
    frame.resize(len, 0);
    Ok(frame)
}

/// Frame for resetting a chip's job queue.
pub fn reset_job_queue_frame(address: u8) -> Vec<u8> {
    let mut frame = vec![Opcode::Reset.code(), address];
    frame.extend_from_slice(&RESET_JOB_QUEUE_MARKER);
    frame.resize(6, 0);
    frame
}

/// A chip's register block as read back or about to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register([u8; REG_LENGTH]);

impl Register {
    const STATUS_INDEX: usize = 9;
    const CORE_COUNT_INDEX: usize = 11;

    pub const fn new(bytes: [u8; REG_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.get(..REG_LENGTH)?.try_into().ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; REG_LENGTH] {
        &self.0
    }

    /// Whether the status bit selected by `mask` reports a full queue.
    pub fn is_busy(&self, mask: u8) -> bool {
        self.0[Self::STATUS_INDEX] & mask != 0
    }

    pub fn core_count(&self) -> u8 {
        self.0[Self::CORE_COUNT_INDEX]
    }

    /// 10-bit temperature ADC code stored big-endian at `index`.
    pub fn temperature_code(&self, index: usize) -> u16 {
        0x3ff & u16::from_be_bytes([self.0[index], self.0[index + 1]])
    }

    /// Encode a write of this register to `address`.
    ///
    /// The trailing two register bytes are read-only and not sent; their
    /// place carries the CRC.
    pub fn write_frame(&self, opcode: Opcode, address: u8) -> [u8; REG_WRITE_FRAME_LENGTH] {
        let mut frame = [0u8; REG_WRITE_FRAME_LENGTH];
        frame[0] = opcode.code();
        frame[1] = address;
        frame[2..REG_LENGTH].copy_from_slice(&self.0[..REG_LENGTH - 2]);
        let crc = crc16_swapped(&frame[..REG_LENGTH]);
        frame[REG_LENGTH..REG_LENGTH + 2].copy_from_slice(&crc.to_be_bytes());
        frame
    }

    /// Temperature ADC setup for a chip clocked at `pll_mhz`.
    pub fn tsadc_divider(pll_mhz: u32) -> Self {
        let mut bytes = TSADC_TEMPLATE;
        bytes[TSADC_DIVIDER_INDEX] = ((pll_mhz / 2) * 1000 / 16 / 650) as u8;
        Self(bytes)
    }
}

/// Everything a job frame needs from a unit of work.
#[derive(Debug, Clone, Copy)]
pub struct JobParams<'a> {
    pub header: &'a [u8; HEADER_LENGTH],
    pub nonce_start: u32,
    pub nonce_end: u32,
    pub difficulty: DifficultyWord,
}

/// Encoded job, ready to clock out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFrame(Vec<u8>);

impl JobFrame {
    /// Encode `job` for `slot` on `chip`. With `with_crc`, a CRC over the
    /// word-swapped body is appended.
    pub fn encode(chip: u8, slot: u8, job: &JobParams<'_>, with_crc: bool) -> Self {
        let mut frame = Vec::with_capacity(JOB_BODY_LENGTH + JOB_CRC_LENGTH);
        frame.push((slot << 4) | Opcode::WriteJob.code());
        frame.push(chip);
        frame.extend(job.header[..64].iter().rev());
        frame.extend_from_slice(&job.nonce_start.to_le_bytes());
        frame.extend(job.header[64..].iter().rev());
        frame.extend(job.difficulty.as_bytes().iter().rev());
        frame.extend_from_slice(&job.nonce_end.to_le_bytes());
        if with_crc {
            let crc = crc16_swapped(&frame);
            frame.extend_from_slice(&crc.to_be_bytes());
        }
        Self(frame)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn slot(&self) -> u8 {
        self.0[0] >> 4
    }

    pub fn chip(&self) -> u8 {
        self.0[1]
    }
}

/// A nonce reported by one chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceResult {
    pub slot: u8,
    pub chip: u8,
    pub nonce: u32,
}

impl NonceResult {
    /// Whether the first two polled bytes start a result frame.
    pub fn is_header(first: u8, second: u8) -> bool {
        first & 0x0f == Opcode::ReadResult.code() && second != 0
    }

    /// Decode and CRC-check a complete result frame.
    ///
    /// The nonce is returned in the byte order the job's nonce range was
    /// written in, so it can be compared against that range directly.
    pub fn decode(frame: &[u8; RESULT_LENGTH]) -> Result<Self, ProtocolError> {
        if !crc16_swapped_is_valid(frame) {
            return Err(ProtocolError::Crc {
                computed: crc16_swapped(&frame[..RESULT_LENGTH - 2]),
                received: u16::from_be_bytes([frame[8], frame[9]]),
            });
        }
        Ok(Self {
            slot: frame[0] >> 4,
            chip: frame[1],
            nonce: u32::from_be_bytes([frame[2], frame[3], frame[4], frame[5]]),
        })
    }
}

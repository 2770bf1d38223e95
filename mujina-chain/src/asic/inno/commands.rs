//! Send-then-poll command exchanges over a chain transport.
//!
//! Every command writes a frame, then reads two bytes at a time until the
//! awaited opcode appears, then reads the rest of the response. The poll
//! is bounded twice: by a byte count derived from the chain length and
//! by a monotonic deadline. Nothing here retries; a failed exchange is
//! reported and the caller decides what it means for the chip.

use std::time::{Duration, Instant};

use super::error::ProtocolError;
use super::generation::{ChipGeneration, JobAck, ResponseMatch};
use super::protocol::{
    BROADCAST, JobFrame, NonceResult, Opcode, RESULT_LENGTH, Register, build_frame,
    reset_job_queue_frame,
};
use crate::tracing::prelude::*;
use crate::transport::Transport;

/// Short acknowledgements (reset, BIST) are four bytes.
const ACK_LENGTH: usize = 4;

/// Secondary register echoes carry four bytes beyond the register.
const SEC_REG_ECHO_EXTRA: usize = 4;

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Bounds on a single poll for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Bytes to read before giving up on the awaited opcode.
    pub max_bytes: usize,
    /// Wall-clock bound, checked before every read.
    pub timeout: Duration,
}

impl PollConfig {
    /// Four bytes per chip position, the longest a response can take to
    /// shift through the chain.
    pub fn for_generation(generation: &ChipGeneration, timeout: Duration) -> Self {
        Self {
            max_bytes: generation.poll_chips * 4,
            timeout,
        }
    }
}

/// Command interface to the chips on one chain.
pub struct ChipBus<T> {
    transport: T,
    generation: &'static ChipGeneration,
    poll: PollConfig,
}

impl<T: Transport> ChipBus<T> {
    pub fn new(transport: T, generation: &'static ChipGeneration, poll: PollConfig) -> Self {
        Self {
            transport,
            generation,
            poll,
        }
    }

    pub fn generation(&self) -> &'static ChipGeneration {
        self.generation
    }

    #[cfg(test)]
    pub(crate) fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Full reset of `address`. Broadcast resets re-arm the BIST count.
    pub fn reset(&mut self, address: u8) -> Result<(), ProtocolError> {
        self.simple_command(Opcode::Reset, address)
    }

    /// Clear the job queue of `address` and confirm it reports idle.
    ///
    /// A broadcast reset is confirmed against chip 1.
    pub fn reset_job_queue(&mut self, address: u8) -> Result<(), ProtocolError> {
        let frame = reset_job_queue_frame(address);
        self.send(&frame)?;
        self.expect(Opcode::Reset, ACK_LENGTH)?;

        let probe = if address == BROADCAST { 1 } else { address };
        let register = self.read_register(probe)?;
        if register.is_busy(self.generation.busy_mask) {
            return Err(ProtocolError::ChipStillBusy { chip: probe });
        }
        Ok(())
    }

    /// Start the self test and return the chip count it reports.
    ///
    /// The count is only valid on the first call after a hardware reset.
    pub fn bist_start(&mut self, address: u8) -> Result<u8, ProtocolError> {
        let frame = build_frame(Opcode::BistStart, address, &[0, 0])?;
        self.send(&frame)?;
        let response = self.expect(Opcode::BistStart, ACK_LENGTH)?;
        Ok(response[3])
    }

    pub fn bist_collect(&mut self, address: u8) -> Result<(), ProtocolError> {
        self.simple_command(Opcode::BistCollect, address)
    }

    pub fn bist_fix(&mut self, address: u8) -> Result<(), ProtocolError> {
        self.simple_command(Opcode::BistFix, address)
    }

    pub fn write_register(&mut self, address: u8, register: &Register) -> Result<(), ProtocolError> {
        let frame = register.write_frame(Opcode::WriteReg, address);
        self.send(&frame)?;
        self.expect(Opcode::WriteReg, self.generation.reg_len)?;
        Ok(())
    }

    /// Write the secondary (sensor configuration) register.
    pub fn write_sec_register(
        &mut self,
        address: u8,
        register: &Register,
    ) -> Result<(), ProtocolError> {
        let frame = register.write_frame(Opcode::WriteSecReg, address);
        self.send(&frame)?;
        self.expect(
            Opcode::WriteSecReg,
            self.generation.reg_len + SEC_REG_ECHO_EXTRA,
        )?;
        Ok(())
    }

    /// Read the register block of one chip. Doubles as a liveness probe.
    ///
    /// The whole `reg_len`-byte response is clocked in; the fields decoded
    /// from it live in the first bytes every generation shares.
    pub fn read_register(&mut self, chip: u8) -> Result<Register, ProtocolError> {
        let frame = build_frame(Opcode::ReadReg, chip, &[])?;
        self.send(&frame)?;

        let opcode = Opcode::ReadRegResp.code();
        let response = self
            .poll_for(
                opcode,
                |rx| ResponseMatch::Exact.matches(rx[0], opcode),
                2 + self.generation.reg_len,
            )?
            .ok_or(ProtocolError::NoResponse {
                opcode,
                polled: self.poll.max_bytes,
            })?;

        Register::from_slice(&response[2..]).ok_or(ProtocolError::NoResponse {
            opcode,
            polled: response.len(),
        })
    }

    /// Clock a job frame out to its chip.
    ///
    /// Success means the bus took the bytes. Generations that acknowledge
    /// jobs additionally require the chip to report a busy queue.
    pub fn write_job(&mut self, job: &JobFrame) -> Result<(), ProtocolError> {
        let mut frame = job.as_bytes().to_vec();
        frame.resize(frame.len() + self.generation.job_trailer, 0);
        self.send(&frame)?;

        if self.generation.job_ack == JobAck::WaitBusy {
            let chip = job.chip();
            let register = self.read_register(chip)?;
            if !register.is_busy(self.generation.busy_mask) {
                return Err(ProtocolError::JobNotAccepted { chip });
            }
        }
        Ok(())
    }

    /// Poll the chain for one nonce.
    ///
    /// `Ok(None)` means no chip had a result waiting. A result that fails
    /// its CRC is an error and should be dropped by the caller.
    pub fn read_result(&mut self) -> Result<Option<NonceResult>, ProtocolError> {
        let frame = build_frame(Opcode::ReadResult, BROADCAST, &[])?;
        self.send(&frame)?;

        let opcode = Opcode::ReadResult.code();
        let Some(response) =
            self.poll_for(opcode, |rx| NonceResult::is_header(rx[0], rx[1]), RESULT_LENGTH)?
        else {
            return Ok(None);
        };

        let mut frame = [0u8; RESULT_LENGTH];
        frame.copy_from_slice(&response);
        NonceResult::decode(&frame).map(Some)
    }

    fn simple_command(&mut self, opcode: Opcode, address: u8) -> Result<(), ProtocolError> {
        let frame = build_frame(opcode, address, &[0, 0])?;
        self.send(&frame)?;
        self.expect(opcode, ACK_LENGTH)?;
        Ok(())
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), ProtocolError> {
        trace!(tx = %hex::encode(frame), "SPI write");
        self.transport.write(frame)?;
        Ok(())
    }

    /// Poll for `opcode` using this generation's echo rule.
    fn expect(&mut self, opcode: Opcode, len: usize) -> Result<Vec<u8>, ProtocolError> {
        let code = opcode.code();
        let rule = self.generation.response_match;
        self.poll_for(code, |rx| rule.matches(rx[0], code), len)?
            .ok_or(ProtocolError::NoResponse {
                opcode: code,
                polled: self.poll.max_bytes,
            })
    }

    /// Read two bytes at a time until `is_match` accepts a pair, then read
    /// the remainder of a `len`-byte response.
    ///
    /// Returns `Ok(None)` when the byte bound runs out first.
    fn poll_for(
        &mut self,
        opcode: u8,
        is_match: impl Fn(&[u8; 2]) -> bool,
        len: usize,
    ) -> Result<Option<Vec<u8>>, ProtocolError> {
        let deadline = Instant::now() + self.poll.timeout;
        let mut head = [0u8; 2];
        let mut polled = 0;

        while polled < self.poll.max_bytes {
            if Instant::now() >= deadline {
                return Err(ProtocolError::Timeout { opcode });
            }
            self.transport.read(&mut head)?;
            polled += head.len();

            if is_match(&head) {
                let mut response = vec![0u8; len.max(2)];
                response[..2].copy_from_slice(&head);
                for chunk in response[2..].chunks_mut(2) {
                    self.transport.read(chunk)?;
                }
                trace!(rx = %hex::encode(&response), "SPI response");
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}

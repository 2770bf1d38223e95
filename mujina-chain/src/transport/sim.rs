//! Simulated chip chain for exercising the protocol without hardware.
//!
//! Each write is interpreted the way a chain of chips would interpret it
//! and the reply is queued behind a couple of filler bytes, so readers
//! have to poll for it. Handles are cheap clones sharing one state, so a
//! test can keep one while the chain under test owns another.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use super::{Transport, TransportError};
use crate::asic::inno::crc::{crc16_swapped, crc16_swapped_is_valid};
use crate::asic::inno::generation::ChipGeneration;
use crate::asic::inno::protocol::{
    BROADCAST, JOB_BODY_LENGTH, JOB_CRC_LENGTH, Opcode, REG_LENGTH, RESULT_LENGTH,
};

/// Zero bytes shifted out ahead of every reply.
const FILLER: usize = 4;

#[derive(Debug, Clone)]
struct SimChip {
    cores: u8,
    busy: bool,
    temp_code: u16,
    failing_reads: usize,
    last_job_slot: Option<u8>,
    jobs_received: usize,
}

#[derive(Debug)]
struct SimState {
    generation: &'static ChipGeneration,
    chips: Vec<SimChip>,
    bist_armed: bool,
    reply: VecDeque<u8>,
    results: VecDeque<[u8; RESULT_LENGTH]>,
    writes: Vec<Vec<u8>>,
    failing_writes: usize,
    crc_errors: usize,
    drop_jobs: bool,
    ignore_queue_resets: bool,
    register_writes: Vec<(u8, Vec<u8>)>,
    bytes_read: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct SimChain {
    state: Arc<Mutex<SimState>>,
}

impl SimChain {
    /// A chain of chips with the given core counts, positions 1..=n.
    pub fn new(generation: &'static ChipGeneration, cores: &[u8]) -> Self {
        let chips = cores
            .iter()
            .map(|&cores| SimChip {
                cores,
                busy: false,
                temp_code: 0,
                failing_reads: 0,
                last_job_slot: None,
                jobs_received: 0,
            })
            .collect();
        Self {
            state: Arc::new(Mutex::new(SimState {
                generation,
                chips,
                bist_armed: true,
                reply: VecDeque::new(),
                results: VecDeque::new(),
                writes: Vec::new(),
                failing_writes: 0,
                crc_errors: 0,
                drop_jobs: false,
                ignore_queue_resets: false,
                register_writes: Vec::new(),
                bytes_read: 0,
            })),
        }
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().writes.clone()
    }

    /// Bytes the host has clocked in so far.
    pub fn bytes_read(&self) -> usize {
        self.state.lock().bytes_read
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    pub fn crc_errors(&self) -> usize {
        self.state.lock().crc_errors
    }

    pub fn fail_next_writes(&self, count: usize) {
        self.state.lock().failing_writes = count;
    }

    /// Make `chip` ignore its next `count` register reads.
    pub fn fail_reads(&self, chip: u8, count: usize) {
        self.with_chip(chip, |c| c.failing_reads = count);
    }

    pub fn set_busy(&self, chip: u8, busy: bool) {
        self.with_chip(chip, |c| c.busy = busy);
    }

    pub fn is_busy(&self, chip: u8) -> bool {
        self.chip(chip).busy
    }

    /// Empty every chip's queue, as if all jobs had been hashed.
    pub fn finish_jobs(&self) {
        for chip in self.state.lock().chips.iter_mut() {
            chip.busy = false;
        }
    }

    pub fn set_temp_code(&self, chip: u8, code: u16) {
        self.with_chip(chip, |c| c.temp_code = code);
    }

    pub fn drop_jobs(&self, drop: bool) {
        self.state.lock().drop_jobs = drop;
    }

    pub fn ignore_queue_resets(&self, ignore: bool) {
        self.state.lock().ignore_queue_resets = ignore;
    }

    pub fn last_job_slot(&self, chip: u8) -> Option<u8> {
        self.chip(chip).last_job_slot
    }

    pub fn jobs_received(&self, chip: u8) -> usize {
        self.chip(chip).jobs_received
    }

    /// Register writes seen so far as (opcode, frame).
    pub fn register_writes(&self) -> Vec<(u8, Vec<u8>)> {
        self.state.lock().register_writes.clone()
    }

    pub fn push_result(&self, chip: u8, slot: u8, nonce: u32) {
        let frame = result_frame(chip, slot, nonce);
        self.state.lock().results.push_back(frame);
    }

    pub fn push_corrupt_result(&self, chip: u8, slot: u8, nonce: u32) {
        let mut frame = result_frame(chip, slot, nonce);
        frame[RESULT_LENGTH - 1] ^= 0xff;
        self.state.lock().results.push_back(frame);
    }

    fn chip(&self, chip: u8) -> SimChip {
        self.state.lock().chips[usize::from(chip) - 1].clone()
    }

    fn with_chip(&self, chip: u8, f: impl FnOnce(&mut SimChip)) {
        f(&mut self.state.lock().chips[usize::from(chip) - 1]);
    }
}

fn result_frame(chip: u8, slot: u8, nonce: u32) -> [u8; RESULT_LENGTH] {
    let mut frame = [0u8; RESULT_LENGTH];
    frame[0] = (slot << 4) | Opcode::ReadResult.code();
    frame[1] = chip;
    frame[2..6].copy_from_slice(&nonce.to_be_bytes());
    let crc = crc16_swapped(&frame[..RESULT_LENGTH - 2]);
    frame[RESULT_LENGTH - 2..].copy_from_slice(&crc.to_be_bytes());
    frame
}

impl SimState {
    fn chip_mut(&mut self, address: u8) -> Option<&mut SimChip> {
        match address {
            BROADCAST => None,
            n => self.chips.get_mut(usize::from(n) - 1),
        }
    }

    fn addressed(&mut self, address: u8) -> Vec<&mut SimChip> {
        match address {
            BROADCAST => self.chips.iter_mut().collect(),
            n => self.chips.get_mut(usize::from(n) - 1).into_iter().collect(),
        }
    }

    fn register_of(&self, chip: &SimChip) -> [u8; REG_LENGTH] {
        let mut reg = [0u8; REG_LENGTH];
        reg[..4].copy_from_slice(&[0x06, 0xFA, 0x40, 0x00]);
        let index = self.generation.temp_index;
        reg[index..index + 2].copy_from_slice(&chip.temp_code.to_be_bytes());
        if chip.busy {
            reg[9] |= self.generation.busy_mask;
        } else {
            reg[9] &= !self.generation.busy_mask;
        }
        reg[11] = chip.cores;
        reg
    }

    fn queue_reply(&mut self, bytes: &[u8]) {
        self.reply.extend(std::iter::repeat_n(0u8, FILLER));
        self.reply.extend(bytes.iter().copied());
    }

    fn interpret(&mut self, data: &[u8]) {
        self.reply.clear();
        let (Some(&first), Some(&address)) = (data.first(), data.get(1)) else {
            return;
        };

        match Opcode::from_low_nibble(first) {
            Some(Opcode::Reset) if data.get(2..4) == Some(&[0xED, 0xED][..]) => {
                if !self.ignore_queue_resets {
                    for chip in self.addressed(address) {
                        chip.busy = false;
                    }
                }
                self.queue_reply(&[first, address, 0, 0]);
            }
            Some(Opcode::Reset) => {
                if address == BROADCAST {
                    self.bist_armed = true;
                }
                for chip in self.addressed(address) {
                    chip.busy = false;
                }
                self.queue_reply(&[first, address, 0, 0]);
            }
            Some(Opcode::BistStart) => {
                let count = if self.bist_armed { self.chips.len() as u8 } else { 0 };
                self.bist_armed = false;
                self.queue_reply(&[first, address, 0, count]);
            }
            Some(Opcode::BistCollect | Opcode::BistFix) => {
                self.queue_reply(&[first, address, 0, 0]);
            }
            Some(op @ (Opcode::WriteReg | Opcode::WriteSecReg)) => {
                if data.len() < REG_LENGTH + 2 || !crc16_swapped_is_valid(&data[..REG_LENGTH + 2]) {
                    self.crc_errors += 1;
                    return;
                }
                self.register_writes.push((op.code(), data.to_vec()));
                let reg_len = self.generation.reg_len;
                let echo = if op == Opcode::WriteReg {
                    reg_len
                } else {
                    reg_len + 4
                };
                let mut reply = data[..REG_LENGTH].to_vec();
                reply.resize(echo, 0);
                self.queue_reply(&reply);
            }
            Some(Opcode::ReadReg) => {
                let Some(chip) = self.chip_mut(address) else {
                    return;
                };
                if chip.failing_reads > 0 {
                    chip.failing_reads -= 1;
                    return;
                }
                let chip = chip.clone();
                let mut reply = vec![Opcode::ReadRegResp.code(), address];
                reply.extend_from_slice(&self.register_of(&chip));
                reply.resize(2 + self.generation.reg_len, 0);
                self.queue_reply(&reply);
            }
            Some(Opcode::WriteJob) => {
                let with_crc = self.generation.job_crc;
                let body = JOB_BODY_LENGTH + if with_crc { JOB_CRC_LENGTH } else { 0 };
                if data.len() < body || (with_crc && !crc16_swapped_is_valid(&data[..body])) {
                    self.crc_errors += 1;
                    return;
                }
                if self.drop_jobs {
                    return;
                }
                if let Some(chip) = self.chip_mut(address) {
                    chip.busy = true;
                    chip.last_job_slot = Some(first >> 4);
                    chip.jobs_received += 1;
                }
            }
            Some(Opcode::ReadResult) => {
                if let Some(frame) = self.results.pop_front() {
                    self.queue_reply(&frame);
                }
            }
            _ => {}
        }
    }
}

impl Transport for SimChain {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(TransportError::Io(std::io::Error::other("injected write failure")));
        }
        state.writes.push(data.to_vec());
        state.interpret(data);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.bytes_read += buf.len();
        for byte in buf.iter_mut() {
            *byte = state.reply.pop_front().unwrap_or(0);
        }
        Ok(())
    }
}

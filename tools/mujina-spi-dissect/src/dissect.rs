//! Frame classification for captured SPI transfers.
//!
//! Uses the chain library's own opcode table, CRC and result decoder, so
//! a frame the dissector calls valid is one the daemon would accept.

use colored::Colorize;
use mujina_chain::asic::inno::{
    crc::crc16_swapped_is_valid,
    pll::PllWord,
    protocol::{
        JOB_BODY_LENGTH, JOB_CRC_LENGTH, NonceResult, Opcode, REG_LENGTH, RESULT_LENGTH, Register,
    },
};
use mujina_chain::asic::inno::ProtocolError;

use crate::capture::{Direction, Transfer};

/// Bytes of a register write covered by its CRC.
const REG_WRITE_CRC_SPAN: usize = REG_LENGTH + 2;

/// Offsets of the little-endian nonce bounds in a job frame.
const JOB_NONCE_START: usize = 66;
const JOB_NONCE_END: usize = 86;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcStatus {
    Valid,
    Invalid,
    NotChecked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameContent {
    Command(String),
    Response(String),
    /// Clocking bytes with nothing in them.
    Filler,
    Unknown(String),
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DissectedFrame {
    pub time: f64,
    pub direction: Direction,
    pub content: FrameContent,
    pub crc: CrcStatus,
    pub raw: Vec<u8>,
}

impl DissectedFrame {
    pub fn is_filler(&self) -> bool {
        self.content == FrameContent::Filler
    }

    pub fn format(&self, show_hex: bool) -> String {
        let direction = match self.direction {
            Direction::Mosi => "MOSI →".cyan(),
            Direction::Miso => "MISO ←".magenta(),
        };
        let content = match &self.content {
            FrameContent::Command(text) | FrameContent::Response(text) => text.normal(),
            FrameContent::Filler => "filler".dimmed(),
            FrameContent::Unknown(text) => text.yellow(),
            FrameContent::Invalid(text) => text.red(),
        };

        let mut line = format!("{:>12.6} {} {}", self.time, direction, content);
        match self.crc {
            CrcStatus::Valid => line.push_str(&format!(" [{}]", "CRC ok".green())),
            CrcStatus::Invalid => line.push_str(&format!(" [{}]", "CRC BAD".red().bold())),
            CrcStatus::NotChecked => {}
        }
        if show_hex {
            line.push_str(&format!("\n{:>12} {}", "", hex::encode(&self.raw).dimmed()));
        }
        line
    }
}

pub fn dissect(transfer: &Transfer) -> DissectedFrame {
    let (content, crc) = match transfer.direction {
        Direction::Mosi => dissect_command(&transfer.bytes),
        Direction::Miso => dissect_response(&transfer.bytes),
    };
    DissectedFrame {
        time: transfer.time,
        direction: transfer.direction,
        content,
        crc,
        raw: transfer.bytes.clone(),
    }
}

fn target(address: u8) -> String {
    match address {
        0 => "broadcast".to_string(),
        chip => format!("chip {chip}"),
    }
}

fn pll_label(register_bytes: &[u8]) -> Option<String> {
    let register = Register::from_slice(register_bytes)?;
    PllWord::from_register(&register)
        .frequency_mhz()
        .map(|mhz| format!(" pll {mhz} MHz"))
}

fn dissect_command(bytes: &[u8]) -> (FrameContent, CrcStatus) {
    if bytes.iter().all(|&b| b == 0) {
        return (FrameContent::Filler, CrcStatus::NotChecked);
    }
    let (Some(&first), Some(&address)) = (bytes.first(), bytes.get(1)) else {
        return (
            FrameContent::Invalid(format!("{}-byte command", bytes.len())),
            CrcStatus::NotChecked,
        );
    };
    let Some(opcode) = Opcode::from_low_nibble(first) else {
        return (
            FrameContent::Unknown(format!("opcode {first:#04x} to {}", target(address))),
            CrcStatus::NotChecked,
        );
    };

    match opcode {
        Opcode::WriteJob => dissect_job(bytes, first >> 4, address),
        Opcode::WriteReg | Opcode::WriteSecReg => {
            if bytes.len() < REG_WRITE_CRC_SPAN {
                return (
                    FrameContent::Invalid(format!("{opcode} truncated at {} bytes", bytes.len())),
                    CrcStatus::NotChecked,
                );
            }
            let payload = &bytes[2..REG_LENGTH];
            let mut text = format!("{opcode} {} {}", target(address), hex::encode(payload));
            if opcode == Opcode::WriteReg {
                let mut register = payload.to_vec();
                register.resize(REG_LENGTH, 0);
                text.push_str(&pll_label(&register).unwrap_or_default());
            }
            (
                FrameContent::Command(text),
                crc_status(&bytes[..REG_WRITE_CRC_SPAN]),
            )
        }
        Opcode::Reset if bytes.get(2..4) == Some(&[0xED, 0xED][..]) => (
            FrameContent::Command(format!("reset_job_queue {}", target(address))),
            CrcStatus::NotChecked,
        ),
        _ => (
            FrameContent::Command(format!("{opcode} {}", target(address))),
            CrcStatus::NotChecked,
        ),
    }
}

fn dissect_job(bytes: &[u8], slot: u8, chip: u8) -> (FrameContent, CrcStatus) {
    if bytes.len() < JOB_BODY_LENGTH {
        return (
            FrameContent::Invalid(format!("write_job truncated at {} bytes", bytes.len())),
            CrcStatus::NotChecked,
        );
    }
    let nonce = |at: usize| {
        u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
    };
    let text = format!(
        "write_job {} slot {slot} nonces {:#010x}..={:#010x}",
        target(chip),
        nonce(JOB_NONCE_START),
        nonce(JOB_NONCE_END),
    );

    // A4 jobs carry no CRC; A6 jobs carry one followed by zero padding.
    let with_crc = JOB_BODY_LENGTH + JOB_CRC_LENGTH;
    let crc = if bytes.len() >= with_crc && bytes[JOB_BODY_LENGTH..with_crc] != [0, 0] {
        crc_status(&bytes[..with_crc])
    } else {
        CrcStatus::NotChecked
    };
    (FrameContent::Command(text), crc)
}

fn dissect_response(bytes: &[u8]) -> (FrameContent, CrcStatus) {
    // Replies arrive behind filler, two bytes at a time.
    let start = bytes
        .chunks(2)
        .position(|pair| pair.iter().any(|&b| b != 0))
        .map(|pair| pair * 2);
    let Some(start) = start else {
        return (FrameContent::Filler, CrcStatus::NotChecked);
    };
    let frame = &bytes[start..];
    let first = frame[0];
    let second = frame.get(1).copied().unwrap_or(0);

    if first == Opcode::ReadRegResp.code() {
        let Some(register) = frame.get(2..).and_then(Register::from_slice) else {
            return (
                FrameContent::Invalid(format!("register read truncated at {} bytes", frame.len())),
                CrcStatus::NotChecked,
            );
        };
        let text = format!(
            "read_reg_resp {} {} cores {}{}",
            target(second),
            hex::encode(register.as_bytes()),
            register.core_count(),
            pll_label(register.as_bytes()).unwrap_or_default(),
        );
        return (FrameContent::Response(text), CrcStatus::NotChecked);
    }

    if NonceResult::is_header(first, second) && frame.len() >= RESULT_LENGTH {
        let mut result = [0u8; RESULT_LENGTH];
        result.copy_from_slice(&frame[..RESULT_LENGTH]);
        return match NonceResult::decode(&result) {
            Ok(nonce) => (
                FrameContent::Response(format!(
                    "result chip {} slot {} nonce {:#010x}",
                    nonce.chip, nonce.slot, nonce.nonce
                )),
                CrcStatus::Valid,
            ),
            Err(ProtocolError::Crc { computed, received }) => (
                FrameContent::Response(format!(
                    "result chip {second} slot {} crc {received:#06x} expected {computed:#06x}",
                    first >> 4
                )),
                CrcStatus::Invalid,
            ),
            Err(e) => (FrameContent::Invalid(e.to_string()), CrcStatus::NotChecked),
        };
    }

    match Opcode::from_low_nibble(first) {
        Some(Opcode::BistStart) => {
            let count = frame.get(3).copied().unwrap_or(0);
            (
                FrameContent::Response(format!("bist_start ack {}, {count} chips", target(second))),
                CrcStatus::NotChecked,
            )
        }
        Some(opcode) => (
            FrameContent::Response(format!("{opcode} ack {}", target(second))),
            CrcStatus::NotChecked,
        ),
        None => (
            FrameContent::Unknown(format!("{} unrecognised bytes", frame.len())),
            CrcStatus::NotChecked,
        ),
    }
}

fn crc_status(frame: &[u8]) -> CrcStatus {
    if crc16_swapped_is_valid(frame) {
        CrcStatus::Valid
    } else {
        CrcStatus::Invalid
    }
}

#[cfg(test)]
mod tests {
    use mujina_chain::asic::inno::crc::crc16_swapped;
    use mujina_chain::asic::inno::difficulty::DifficultyWord;
    use mujina_chain::asic::inno::pll;
    use mujina_chain::asic::inno::protocol::{
        HEADER_LENGTH, JobFrame, JobParams, build_frame, reset_job_queue_frame,
    };
    use test_case::test_case;

    use super::*;

    fn mosi(bytes: &[u8]) -> DissectedFrame {
        dissect(&Transfer {
            time: 0.0,
            direction: Direction::Mosi,
            bytes: bytes.to_vec(),
        })
    }

    fn miso(bytes: &[u8]) -> DissectedFrame {
        let mut padded = vec![0; 4];
        padded.extend_from_slice(bytes);
        dissect(&Transfer {
            time: 0.0,
            direction: Direction::Miso,
            bytes: padded,
        })
    }

    fn text(frame: &DissectedFrame) -> &str {
        match &frame.content {
            FrameContent::Command(t)
            | FrameContent::Response(t)
            | FrameContent::Unknown(t)
            | FrameContent::Invalid(t) => t,
            FrameContent::Filler => "",
        }
    }

    fn job(with_crc: bool) -> Vec<u8> {
        let header = [0x11; HEADER_LENGTH];
        let params = JobParams {
            header: &header,
            nonce_start: 0x0198_6d54,
            nonce_end: 0x0198_6d57,
            difficulty: DifficultyWord::for_share(1.0, 8),
        };
        JobFrame::encode(3, 2, &params, with_crc).as_bytes().to_vec()
    }

    fn result(chip: u8, slot: u8, nonce: u32) -> Vec<u8> {
        let mut frame = vec![(slot << 4) | Opcode::ReadResult.code(), chip];
        frame.extend_from_slice(&nonce.to_be_bytes());
        frame.extend_from_slice(&[0, 0]);
        let crc = crc16_swapped(&frame);
        frame.extend_from_slice(&crc.to_be_bytes());
        frame
    }

    #[test]
    fn should_label_job_with_slot_and_range() {
        let frame = mosi(&job(true));
        assert_eq!(
            text(&frame),
            "write_job chip 3 slot 2 nonces 0x01986d54..=0x01986d57"
        );
        assert_eq!(frame.crc, CrcStatus::Valid);
    }

    #[test]
    fn should_flag_corrupt_job_crc() {
        let mut bytes = job(true);
        bytes[10] ^= 0x01;
        assert_eq!(mosi(&bytes).crc, CrcStatus::Invalid);
    }

    #[test]
    fn should_not_check_crc_of_crcless_job() {
        assert_eq!(mosi(&job(false)).crc, CrcStatus::NotChecked);
    }

    #[test]
    fn should_decode_pll_from_register_write() {
        let (register, mhz) = pll::default_register(1000);
        let frame = mosi(&register.write_frame(Opcode::WriteReg, 0));

        assert!(text(&frame).starts_with("write_reg broadcast"));
        assert!(text(&frame).ends_with(&format!("pll {mhz} MHz")));
        assert_eq!(frame.crc, CrcStatus::Valid);
    }

    #[test_case(reset_job_queue_frame(4), "reset_job_queue chip 4"; "queue reset")]
    #[test_case(build_frame(Opcode::ReadReg, 7, &[]).unwrap(), "read_reg chip 7"; "register read")]
    #[test_case(build_frame(Opcode::BistStart, 0, &[0, 0]).unwrap(), "bist_start broadcast"; "bist")]
    fn should_name_short_commands(bytes: Vec<u8>, expected: &str) {
        assert_eq!(text(&mosi(&bytes)), expected);
    }

    #[test]
    fn should_decode_result_nonce() {
        let frame = miso(&result(2, 3, 0xdead_beef));
        assert_eq!(text(&frame), "result chip 2 slot 3 nonce 0xdeadbeef");
        assert_eq!(frame.crc, CrcStatus::Valid);
    }

    #[test]
    fn should_report_result_crc_mismatch() {
        let mut bytes = result(2, 3, 0xdead_beef);
        bytes[9] ^= 0xff;
        let frame = miso(&bytes);
        assert!(text(&frame).starts_with("result chip 2 slot 3 crc"));
        assert_eq!(frame.crc, CrcStatus::Invalid);
    }

    #[test]
    fn should_decode_register_read_reply() {
        let (register, _) = pll::default_register(1000);
        let mut bytes = register.as_bytes().to_vec();
        bytes[11] = 40;
        let mut reply = vec![0x1A, 5];
        reply.extend_from_slice(&bytes);

        let frame = miso(&reply);
        assert!(text(&frame).starts_with("read_reg_resp chip 5"));
        assert!(text(&frame).contains("cores 40 pll 1000 MHz"));
    }

    #[test]
    fn should_read_chip_count_from_bist_reply() {
        let frame = miso(&[0x01, 0x00, 0x00, 0x05]);
        assert_eq!(text(&frame), "bist_start ack broadcast, 5 chips");
    }

    #[test]
    fn should_mark_all_zero_transfers_as_filler() {
        assert!(mosi(&[0; 8]).is_filler());
        assert!(miso(&[0; 8]).is_filler());
    }
}

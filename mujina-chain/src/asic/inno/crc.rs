//! CRC used on register writes, job frames and result frames.
//!
//! The chips compute a reflected CRC-16 (polynomial 0x8005, as in
//! MODBUS) four bits at a time from a 16-entry table, seeded with 0xFFFF.
//! The CRC is always taken over the frame with each 16-bit word byte
//! swapped, since the chip shifts data in as big-endian words.

const CRC16_INIT: u16 = 0xFFFF;

const CRC16_NIBBLE_TABLE: [u16; 16] = [
    0x0000, 0xCC01, 0xD801, 0x1400, 0xF001, 0x3C00, 0x2800, 0xE401, 0xA001, 0x6C00, 0x7800,
    0xB401, 0x5000, 0x9C01, 0x8801, 0x4400,
];

/// CRC-16 over `data` exactly as given, low nibble of each byte first.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(CRC16_INIT, |crc, &byte| {
        let crc = CRC16_NIBBLE_TABLE[((byte ^ crc as u8) & 0x0f) as usize] ^ (crc >> 4);
        CRC16_NIBBLE_TABLE[(((byte >> 4) ^ crc as u8) & 0x0f) as usize] ^ (crc >> 4)
    })
}

/// Exchange the two bytes of every 16-bit word. A trailing odd byte is
/// left where it is.
pub fn swap_words(data: &[u8]) -> Vec<u8> {
    let mut swapped = data.to_vec();
    for pair in swapped.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
    swapped
}

/// CRC as the chip computes it: over the word-swapped bytes.
pub fn crc16_swapped(data: &[u8]) -> u16 {
    crc16(&swap_words(data))
}

/// Check the big-endian CRC trailing `frame` against its payload.
pub fn crc16_swapped_is_valid(frame: &[u8]) -> bool {
    match frame.len().checked_sub(2) {
        Some(split) => {
            let (payload, trailer) = frame.split_at(split);
            crc16_swapped(payload) == u16::from_be_bytes([trailer[0], trailer[1]])
        }
        None => false,
    }
}

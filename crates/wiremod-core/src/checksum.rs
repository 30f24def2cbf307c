//! Frame check sequences: CRC-16/MODBUS for RTU and BIN, LRC for ASCII.

const fn build_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

const CRC16_TABLE: [u16; 256] = build_crc16_table();

/// CRC-16/MODBUS (reflected polynomial 0xA001, initial value 0xFFFF).
///
/// On the wire the result is sent low byte first.
pub fn crc16(data: &[u8]) -> u16 {
    crc16_update(CRC16_INIT, data)
}

pub const CRC16_INIT: u16 = 0xFFFF;

/// Continues a CRC-16 over `data`, for frames assembled from several slices.
pub fn crc16_update(mut crc: u16, data: &[u8]) -> u16 {
    for byte in data {
        let idx = ((crc ^ (*byte as u16)) & 0x00FF) as usize;
        crc = (crc >> 8) ^ CRC16_TABLE[idx];
    }
    crc
}

/// Longitudinal redundancy check: the two's complement of the byte sum.
pub fn lrc(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |acc, byte| acc.wrapping_add(*byte))
        .wrapping_neg()
}

#[cfg(test)]
mod tests {
    use super::{crc16, crc16_update, lrc, CRC16_INIT};

    #[test]
    fn crc16_known_vectors() {
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]), 0xCDC5);
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02]), 0x0BC4);
        assert_eq!(crc16(&[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]), 0x8776);
    }

    #[test]
    fn crc16_update_matches_one_shot() {
        let split = crc16_update(crc16_update(CRC16_INIT, &[0x11]), &[0x03, 0x00, 0x6B, 0x00, 0x03]);
        assert_eq!(split, 0x8776);
    }

    #[test]
    fn crc16_of_empty_input_is_initial_value() {
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn lrc_known_vectors() {
        assert_eq!(lrc(&[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]), 0x7E);
        assert_eq!(lrc(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02]), 0xFA);
        assert_eq!(lrc(&[]), 0x00);
    }

    #[test]
    fn lrc_sum_including_check_is_zero() {
        let data = [0x11u8, 0x03, 0x00, 0x0A, 0x00, 0x02];
        let check = lrc(&data);
        let total = data
            .iter()
            .chain(core::iter::once(&check))
            .fold(0u8, |acc, b| acc.wrapping_add(*b));
        assert_eq!(total, 0);
    }

    #[test]
    fn lrc_detects_every_single_byte_change() {
        let data = [0x11u8, 0x03, 0x00, 0x6B, 0x00, 0x03];
        let expected = lrc(&data);
        for idx in 0..data.len() {
            for delta in 1..=255u8 {
                let mut corrupted = data;
                corrupted[idx] = corrupted[idx].wrapping_add(delta);
                assert_ne!(lrc(&corrupted), expected);
            }
        }
    }
}

//! CRC16-XMODEM checksum.
//!
//! Polynomial 0x1021, initial value 0x0000, no reflection, no final XOR.

/// Compute the CRC16-XMODEM checksum of `data`.
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        // Standard check input for CRC-16/XMODEM
        assert_eq!(crc16_xmodem(b"123456789"), 0x31C3);
    }

    #[test]
    fn test_empty() {
        assert_eq!(crc16_xmodem(&[]), 0);
    }
}

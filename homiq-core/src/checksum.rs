//! Checksum: 8-bit CRC over a frame's canonical payload.
//!
//! The bus uses the Dallas/Maxim 1-Wire CRC-8. Legacy firmware writes it in a
//! feedback form with polynomial 0x18; [`checksum_reflected`] is the textbook
//! reflected form (0x8C). Both must agree on every input.

/// Feedback polynomial as written by the legacy stacks.
pub const FEEDBACK_POLY: u8 = 0x18;

/// Reflected 1-Wire polynomial (x^8 + x^5 + x^4 + 1, LSB first).
pub const REFLECTED_POLY: u8 = 0x8C;

/// Checksum of `payload`, bitwise feedback formulation.
pub fn checksum(payload: &[u8]) -> u8 {
    let mut c: u8 = 0;
    for &byte in payload {
        let mut b = byte;
        for _ in 0..8 {
            let feedback = (c ^ b) & 0x01;
            if feedback == 1 {
                c ^= FEEDBACK_POLY;
            }
            c = (c >> 1) & 0x7F;
            if feedback == 1 {
                c |= 0x80;
            }
            b >>= 1;
        }
    }
    c
}

/// Checksum of `payload`, reflected CRC-8/MAXIM formulation (seed 0x00).
pub fn checksum_reflected(payload: &[u8]) -> u8 {
    let mut crc: u8 = 0;
    for &byte in payload {
        crc ^= byte;
        for _ in 0..8 {
            if crc & 0x01 != 0 {
                crc = (crc >> 1) ^ REFLECTED_POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Verify `payload` against an expected checksum.
pub fn verify(payload: &[u8], expected: u8) -> bool {
    checksum(payload) == expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn empty_payload_is_zero() {
        assert_eq!(checksum(b""), 0);
        assert_eq!(checksum_reflected(b""), 0);
    }

    #[test]
    fn maxim_check_value() {
        // Catalogued check value for CRC-8/MAXIM-DOW.
        assert_eq!(checksum_reflected(b"123456789"), 0xA1);
        assert_eq!(checksum(b"123456789"), 0xA1);
    }

    #[test]
    fn formulations_agree_on_every_byte() {
        for b in 0..=255u8 {
            assert_eq!(checksum(&[b]), checksum_reflected(&[b]), "byte {b:#04x}");
        }
    }

    #[test]
    fn formulations_agree_on_every_byte_pair() {
        for a in 0..=255u8 {
            for b in 0..=255u8 {
                assert_eq!(checksum(&[a, b]), checksum_reflected(&[a, b]));
            }
        }
    }

    #[test]
    fn formulations_agree_on_random_ascii_payloads() {
        let mut rng = StdRng::seed_from_u64(0x486f_6d69);
        for _ in 0..2000 {
            let len = rng.gen_range(0..48);
            let payload: Vec<u8> = (0..len)
                .map(|_| loop {
                    let b = rng.gen_range(0x20..0x7F);
                    if b != b';' {
                        break b;
                    }
                })
                .collect();
            assert_eq!(checksum(&payload), checksum_reflected(&payload));
        }
    }

    #[test]
    fn verify_detects_single_bit_flip() {
        let payload = b"O.3100H5s";
        let crc = checksum(payload);
        assert!(verify(payload, crc));
        // '1' (0x31) and '0' (0x30) differ in one bit.
        assert!(!verify(b"O.3000H5s", crc));
        assert!(!verify(payload, crc ^ 0x01));
    }
}

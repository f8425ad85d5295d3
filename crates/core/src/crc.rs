//! CRC-16/CCITT checksum protecting onboard memory pages.
//!
//! Polynomial 0x1021, seed 0xFFFF, no reflection, no final XOR
//! (CRC-16/CCITT-FALSE). Pages store it big-endian in their last two bytes.

const SEED: u16 = 0xFFFF;
const POLY: u16 = 0x1021;

/// Compute the checksum over `bytes`.
pub fn crc_ccitt(bytes: &[u8]) -> u16 {
    let mut crc = SEED;
    for &b in bytes {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            if (crc & 0x8000) != 0 {
                crc = (crc << 1) ^ POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Stored and recomputed checksum of a page image.
///
/// Returns `None` if the page is too small to carry a trailer.
pub fn page_crc(page: &[u8]) -> Option<(u16, u16)> {
    let body_len = page.len().checked_sub(2)?;
    let stored = u16::from_be_bytes([page[body_len], page[body_len + 1]]);
    Some((stored, crc_ccitt(&page[..body_len])))
}

/// Whether the page trailer matches its contents.
pub fn page_is_valid(page: &[u8]) -> bool {
    matches!(page_crc(page), Some((stored, computed)) if stored == computed)
}

/// Recompute and patch the trailer in place.
pub fn seal_page(page: &mut [u8]) {
    if let Some(body_len) = page.len().checked_sub(2) {
        let crc = crc_ccitt(&page[..body_len]);
        page[body_len..].copy_from_slice(&crc.to_be_bytes());
    }
}

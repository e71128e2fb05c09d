// crates/opensafety-rs/src/frame/codec.rs
//! Bit-exact serializer/deserializer for the dual sub-frame safety frame.
//!
//! A frame is two concatenated sub-frames. Sub-frame one carries the
//! address, id, domain number, length, the low CT byte and the payload;
//! sub-frame two carries the target address, TR, the high CT byte, the
//! echoed length and a second image of the payload, masked with a key
//! derived from the header fields. Each sub-frame is closed by its own
//! CRC (8 bit up to 8 payload bytes, 16 bit above). The transport may
//! deliver the sub-frames in either order; slim SSDO frames use a fixed
//! size sub-frame two prefix without a payload image.

use super::crc::{crc8, crc16};
use super::{FrameHeader, FrameType};
use crate::shnf::SafetyError;
use crate::types::{EPLS_CFG_MAX_PYLD_LEN, EPLS_K_MAX_SADR, EPLS_K_MAX_SDN};
use crate::types::{
    SSC_K_MAX_TEL_LEN_LONG, SSC_K_MAX_TEL_LEN_SHORT, SSC_K_MIN_TEL_LEN_LONG,
    SSC_K_MIN_TEL_LEN_SHORT,
};

/// Payload byte count above which sub-frames switch to the 16 bit CRC.
pub const K_CRC8_MAX_PYLD: u8 = 8;

/// Header overhead of a normal frame: 11 bytes with CRC8, 13 with CRC16.
const K_OVERHEAD_SHORT: usize = 11;
const K_OVERHEAD_LONG: usize = 13;

/// Fixed sub-frame two prefix length of slim frames.
const K_SLIM_SF2_SHORT: usize = 6;
const K_SLIM_SF2_LONG: usize = 7;

/// Offset of the payload inside sub-frame one.
const K_SF1_PYLD_OFS: usize = 5;
/// Offset of the payload image inside a normal sub-frame two.
const K_SF2_PYLD_OFS: usize = 4;

/// Returns the whole-frame length in bytes for a payload of `le` bytes.
pub fn frame_length(le: u8, slim: bool) -> usize {
    if slim {
        slim_sf2_len(le) + sf1_len(le)
    } else if le <= K_CRC8_MAX_PYLD {
        2 * le as usize + K_OVERHEAD_SHORT
    } else {
        2 * le as usize + K_OVERHEAD_LONG
    }
}

fn sf1_len(le: u8) -> usize {
    if le <= K_CRC8_MAX_PYLD {
        le as usize + K_SF1_PYLD_OFS + 1
    } else {
        le as usize + K_SF1_PYLD_OFS + 2
    }
}

fn sf2_len(le: u8) -> usize {
    if le <= K_CRC8_MAX_PYLD {
        le as usize + K_SF2_PYLD_OFS + 1
    } else {
        le as usize + K_SF2_PYLD_OFS + 2
    }
}

fn slim_sf2_len(le: u8) -> usize {
    if le <= K_CRC8_MAX_PYLD {
        K_SLIM_SF2_SHORT
    } else {
        K_SLIM_SF2_LONG
    }
}

/// The eight header bytes every field of the frame contributes to; the
/// per-frame payload mask is derived from them.
fn header_bytes(hdr: &FrameHeader) -> [u8; 8] {
    [
        (hdr.adr & 0xFF) as u8,
        (hdr.frame_type.id() << 2) | ((hdr.adr >> 8) as u8 & 0x03),
        (hdr.sdn & 0xFF) as u8,
        ((hdr.le & 0x3F) << 2) | ((hdr.sdn >> 8) as u8 & 0x03),
        (hdr.ct & 0xFF) as u8,
        (hdr.tadr & 0xFF) as u8,
        ((hdr.tr & 0x3F) << 2) | ((hdr.tadr >> 8) as u8 & 0x03),
        (hdr.ct >> 8) as u8,
    ]
}

fn mask_byte(hdr_bytes: &[u8; 8], index: usize) -> u8 {
    hdr_bytes[index % 8] ^ (index as u8)
}

/// XOR fold of the masked payload; the integrity byte of slim frames.
fn slim_check_byte(hdr_bytes: &[u8; 8], payload: &[u8]) -> u8 {
    let mut check = 0u8;
    for (i, &byte) in payload.iter().enumerate() {
        check ^= byte ^ mask_byte(hdr_bytes, i);
    }
    check
}

fn write_crc(buf: &mut [u8], start: usize, end: usize, le: u8) -> usize {
    if le <= K_CRC8_MAX_PYLD {
        buf[end] = crc8(0, &buf[start..end]);
        end + 1
    } else {
        let crc = crc16(0, &buf[start..end]);
        buf[end] = (crc >> 8) as u8;
        buf[end + 1] = (crc & 0xFF) as u8;
        end + 2
    }
}

fn check_crc(buf: &[u8], start: usize, end: usize, le: u8) -> Result<(), SafetyError> {
    if le <= K_CRC8_MAX_PYLD {
        if crc8(0, &buf[start..end]) != buf[end] {
            return Err(SafetyError::CrcMismatch);
        }
    } else {
        let crc = crc16(0, &buf[start..end]);
        if (crc >> 8) as u8 != buf[end] || (crc & 0xFF) as u8 != buf[end + 1] {
            return Err(SafetyError::CrcMismatch);
        }
    }
    Ok(())
}

/// Serializes a frame into `buf`, which must be exactly
/// `frame_length(hdr.le, slim)` bytes (the SHNF supplied tx memory block).
///
/// Returns the number of bytes written.
pub fn serialize(hdr: &FrameHeader, payload: &[u8], buf: &mut [u8]) -> Result<usize, SafetyError> {
    if payload.len() != hdr.le as usize || hdr.le as usize > EPLS_CFG_MAX_PYLD_LEN {
        return Err(SafetyError::LengthFieldMismatch);
    }
    if hdr.adr > EPLS_K_MAX_SADR || hdr.tadr > EPLS_K_MAX_SADR || hdr.sdn > EPLS_K_MAX_SDN {
        return Err(SafetyError::InvalidAddress);
    }
    let slim = hdr.frame_type.is_slim();
    let total = frame_length(hdr.le, slim);
    if buf.len() != total {
        return Err(SafetyError::BufferTooShort);
    }

    let hb = header_bytes(hdr);
    let (sf1_ofs, sf2_ofs) = if slim {
        (slim_sf2_len(hdr.le), 0)
    } else {
        (0, sf1_len(hdr.le))
    };

    // Sub-frame one: header, payload, CRC.
    buf[sf1_ofs] = hb[0];
    buf[sf1_ofs + 1] = hb[1];
    buf[sf1_ofs + 2] = hb[2];
    buf[sf1_ofs + 3] = hb[3];
    buf[sf1_ofs + 4] = hb[4];
    buf[sf1_ofs + K_SF1_PYLD_OFS..sf1_ofs + K_SF1_PYLD_OFS + payload.len()]
        .copy_from_slice(payload);
    write_crc(
        buf,
        sf1_ofs,
        sf1_ofs + K_SF1_PYLD_OFS + payload.len(),
        hdr.le,
    );

    // Sub-frame two: target header, masked payload image (or the slim
    // check byte), CRC.
    buf[sf2_ofs] = hb[5];
    buf[sf2_ofs + 1] = hb[6];
    buf[sf2_ofs + 2] = hb[7];
    buf[sf2_ofs + 3] = hdr.le;
    if slim {
        buf[sf2_ofs + 4] = slim_check_byte(&hb, payload);
        write_crc(buf, sf2_ofs, sf2_ofs + 5, hdr.le);
    } else {
        for (i, &byte) in payload.iter().enumerate() {
            buf[sf2_ofs + K_SF2_PYLD_OFS + i] = byte ^ mask_byte(&hb, i);
        }
        write_crc(buf, sf2_ofs, sf2_ofs + K_SF2_PYLD_OFS + payload.len(), hdr.le);
    }
    Ok(total)
}

#[derive(Debug, Clone, Copy)]
struct Layout {
    sf1_ofs: usize,
    sf2_ofs: usize,
    le: u8,
    slim: bool,
}

/// Probes the three permitted layouts. A candidate matches when the echoed
/// LE reproduces the received byte count and the id found at the candidate
/// sub-frame one position is a known frame type of matching slimness.
fn locate_subframes(buf: &[u8]) -> Result<Layout, SafetyError> {
    let len = buf.len();

    let id_consistent = |sf1_ofs: usize, slim: bool| -> bool {
        FrameType::try_from(buf[sf1_ofs + 1] >> 2)
            .map(|t| t.is_slim() == slim)
            .unwrap_or(false)
    };

    // Normal order: sub-frame one first, sub-frame two at len/2 + 1.
    let sf2_ofs = len / 2 + 1;
    if sf2_ofs + 3 < len {
        let le = buf[sf2_ofs + 3];
        if frame_length(le, false) == len && id_consistent(0, false) {
            return Ok(Layout {
                sf1_ofs: 0,
                sf2_ofs,
                le,
                slim: false,
            });
        }
    }

    // Swapped order: sub-frame two first, sub-frame one at len/2.
    let le = buf[3];
    if frame_length(le, false) == len && id_consistent(len / 2, false) {
        return Ok(Layout {
            sf1_ofs: len / 2,
            sf2_ofs: 0,
            le,
            slim: false,
        });
    }

    // Slim layout: fixed sub-frame two prefix, sub-frame one at 6 or 7.
    if frame_length(le, true) == len {
        let prefix = slim_sf2_len(le);
        if prefix + 2 < len && id_consistent(prefix, true) {
            return Ok(Layout {
                sf1_ofs: prefix,
                sf2_ofs: 0,
                le,
                slim: true,
            });
        }
    }

    Err(SafetyError::InvalidFrameLength(len))
}

/// Parses a received buffer into a header and a reference to the payload
/// bytes of sub-frame one.
///
/// Both CRCs must verify and the two payload images must agree; any
/// mismatch rejects the frame (a MINOR condition for the caller, never a
/// whole-stack failure).
pub fn deserialize(buf: &[u8]) -> Result<(FrameHeader, &[u8]), SafetyError> {
    let len = buf.len();
    let short = (SSC_K_MIN_TEL_LEN_SHORT..=SSC_K_MAX_TEL_LEN_SHORT).contains(&len);
    let long = (SSC_K_MIN_TEL_LEN_LONG..=SSC_K_MAX_TEL_LEN_LONG).contains(&len);
    if !short && !long {
        return Err(SafetyError::InvalidFrameLength(len));
    }

    let layout = locate_subframes(buf)?;
    if layout.le as usize > EPLS_CFG_MAX_PYLD_LEN {
        return Err(SafetyError::LengthFieldMismatch);
    }

    // Sub-frame one fields.
    let s1 = layout.sf1_ofs;
    let adr = buf[s1] as u16 | (((buf[s1 + 1] & 0x03) as u16) << 8);
    let id = buf[s1 + 1] >> 2;
    let sdn = buf[s1 + 2] as u16 | (((buf[s1 + 3] & 0x03) as u16) << 8);
    let le6 = buf[s1 + 3] >> 2;
    let ct_lo = buf[s1 + 4];

    // Sub-frame two fields.
    let s2 = layout.sf2_ofs;
    let tadr = buf[s2] as u16 | (((buf[s2 + 1] & 0x03) as u16) << 8);
    let tr = buf[s2 + 1] >> 2;
    let ct_hi = buf[s2 + 2];

    if le6 != layout.le & 0x3F {
        return Err(SafetyError::LengthFieldMismatch);
    }

    let frame_type = FrameType::try_from(id)?;
    let hdr = FrameHeader {
        frame_type,
        adr,
        sdn,
        le: layout.le,
        ct: ((ct_hi as u16) << 8) | ct_lo as u16,
        tadr,
        tr,
    };

    check_crc(buf, s1, s1 + K_SF1_PYLD_OFS + layout.le as usize, layout.le)?;
    let payload = &buf[s1 + K_SF1_PYLD_OFS..s1 + K_SF1_PYLD_OFS + layout.le as usize];

    let hb = header_bytes(&hdr);
    if layout.slim {
        check_crc(buf, s2, s2 + 5, layout.le)?;
        if buf[s2 + 4] != slim_check_byte(&hb, payload) {
            return Err(SafetyError::PayloadMismatch);
        }
    } else {
        check_crc(
            buf,
            s2,
            s2 + K_SF2_PYLD_OFS + layout.le as usize,
            layout.le,
        )?;
        for (i, &byte) in payload.iter().enumerate() {
            if buf[s2 + K_SF2_PYLD_OFS + i] ^ mask_byte(&hb, i) != byte {
                return Err(SafetyError::PayloadMismatch);
            }
        }
    }

    Ok((hdr, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    fn header(frame_type: FrameType, le: u8) -> FrameHeader {
        FrameHeader {
            frame_type,
            adr: 0x2A5,
            sdn: 0x101,
            le,
            ct: 0xBEEF,
            tadr: 0x001,
            tr: 0x15,
        }
    }

    fn roundtrip(frame_type: FrameType, le: u8) -> (Vec<u8>, Vec<u8>) {
        let payload: Vec<u8> = (0..le).map(|i| i.wrapping_mul(7).wrapping_add(3)).collect();
        let hdr = header(frame_type, le);
        let mut buf = vec![0u8; frame_length(le, frame_type.is_slim())];
        serialize(&hdr, &payload, &mut buf).unwrap();
        (buf, payload)
    }

    #[test]
    fn test_roundtrip_boundary_lengths() {
        for le in [0u8, 1, 8, 9, 254] {
            let (buf, payload) = roundtrip(FrameType::SsdoServiceRequest, le);
            let (hdr, parsed) = deserialize(&buf).unwrap();
            assert_eq!(hdr, header(FrameType::SsdoServiceRequest, le));
            assert_eq!(parsed, &payload[..], "le = {}", le);
        }
    }

    #[test]
    fn test_roundtrip_slim() {
        for le in [0u8, 4, 8, 9, 40] {
            let (buf, payload) = roundtrip(FrameType::SsdoSlimServiceResponse, le);
            assert_eq!(buf.len(), frame_length(le, true));
            let (hdr, parsed) = deserialize(&buf).unwrap();
            assert_eq!(hdr.frame_type, FrameType::SsdoSlimServiceResponse);
            assert_eq!(parsed, &payload[..]);
        }
    }

    #[test]
    fn test_swapped_subframe_order_parses() {
        let (buf, payload) = roundtrip(FrameType::SnmtServiceRequest, 5);
        // Reassemble with sub-frame two first.
        let split = sf1_len(5);
        let mut swapped = Vec::new();
        swapped.extend_from_slice(&buf[split..]);
        swapped.extend_from_slice(&buf[..split]);
        let (hdr, parsed) = deserialize(&swapped).unwrap();
        assert_eq!(hdr, header(FrameType::SnmtServiceRequest, 5));
        assert_eq!(parsed, &payload[..]);
    }

    #[test]
    fn test_single_bit_flip_rejected() {
        let (buf, _) = roundtrip(FrameType::SsdoServiceRequest, 6);
        for byte in 0..buf.len() {
            for bit in 0..8 {
                let mut corrupted = buf.clone();
                corrupted[byte] ^= 1 << bit;
                assert!(
                    deserialize(&corrupted).is_err(),
                    "flip at byte {} bit {} was accepted",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_payload_mask_differs_between_subframes() {
        // The wire image of the payload must not repeat verbatim.
        let (buf, payload) = roundtrip(FrameType::SsdoServiceRequest, 8);
        let s2 = sf1_len(8);
        let image = &buf[s2 + K_SF2_PYLD_OFS..s2 + K_SF2_PYLD_OFS + 8];
        assert_ne!(image, &payload[..]);
    }

    #[test]
    fn test_length_255_rejected() {
        // LE = 255 cannot be serialized...
        let hdr = header(FrameType::SsdoServiceRequest, 255);
        let payload = vec![0u8; 255];
        let mut buf = vec![0u8; 2 * 255 + 13];
        assert!(serialize(&hdr, &payload, &mut buf).is_err());
        // ...and a frame claiming it is rejected by the length window.
        assert!(matches!(
            deserialize(&vec![0u8; 2 * 255 + 13]),
            Err(SafetyError::InvalidFrameLength(_))
        ));
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let (buf, _) = roundtrip(FrameType::SnmtUdidRequest, 0);
        assert!(deserialize(&buf[..buf.len() - 1]).is_err());
    }
}

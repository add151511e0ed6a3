//! Heuristic decoder for the binary factor reply to `X`.
//!
//! Firmware answers with an echo, a 1.0 float used as a marker, and one
//! IEEE-754 float per active channel. Byte order differs across firmware
//! builds and some replies carry noise before the payload, so decoding
//! searches rather than parsing at a fixed offset.

const ANCHOR_BE: [u8; 4] = [0x3F, 0x80, 0x00, 0x00];
const ANCHOR_LE: [u8; 4] = [0x00, 0x00, 0x80, 0x3F];
/// Largest magnitude accepted as a factor.
const MAX_ABS: f64 = 1e6;
/// A window of values all below this is treated as padding.
const MIN_PLAUSIBLE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endian {
    Big,
    Little,
}

fn decode_at(bytes: &[u8], start: usize, nlcs: usize, endian: Endian) -> Vec<f64> {
    bytes[start..start + 4 * nlcs]
        .chunks_exact(4)
        .map(|c| {
            let word = [c[0], c[1], c[2], c[3]];
            let bits = match endian {
                Endian::Big => u32::from_be_bytes(word),
                Endian::Little => u32::from_le_bytes(word),
            };
            f64::from(f32::from_bits(bits))
        })
        .collect()
}

fn all_valid(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite() && v.abs() <= MAX_ABS)
}

fn any_plausible(values: &[f64]) -> bool {
    values.iter().any(|v| v.abs() > MIN_PLAUSIBLE)
}

/// Recover `nlcs` factors from a raw `X` reply.
///
/// 1. Leftmost 1.0 marker (either byte order) followed by room for `nlcs`
///    floats whose values are all valid, decoded in the marker's order.
/// 2. Otherwise the first `4 * nlcs` window that decodes valid and
///    plausible, big-endian preferred at each position.
pub fn decode_factors(bytes: &[u8], nlcs: usize) -> Option<Vec<f64>> {
    if nlcs == 0 {
        return None;
    }
    let needed = 4 * nlcs;

    for i in 0..bytes.len().saturating_sub(3) {
        if i + 4 + needed > bytes.len() {
            break;
        }
        let endian = match &bytes[i..i + 4] {
            w if w == ANCHOR_BE => Endian::Big,
            w if w == ANCHOR_LE => Endian::Little,
            _ => continue,
        };
        let values = decode_at(bytes, i + 4, nlcs, endian);
        if all_valid(&values) {
            return Some(values);
        }
    }

    for start in 0..=bytes.len().saturating_sub(needed) {
        if start + needed > bytes.len() {
            break;
        }
        for endian in [Endian::Big, Endian::Little] {
            let values = decode_at(bytes, start, nlcs, endian);
            if all_valid(&values) && any_plausible(&values) {
                return Some(values);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn be(v: &[f32]) -> Vec<u8> {
        v.iter().flat_map(|f| f.to_be_bytes()).collect()
    }

    fn le(v: &[f32]) -> Vec<u8> {
        v.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    #[test]
    fn big_endian_anchor() {
        let mut reply = b"01X".to_vec();
        reply.extend(be(&[1.0, 0.5, 0.25]));
        reply.extend_from_slice(b"\r\n");
        assert_eq!(decode_factors(&reply, 2), Some(vec![0.5, 0.25]));
    }

    #[test]
    fn little_endian_anchor() {
        let mut reply = vec![0x55, 0xAA];
        reply.extend(le(&[1.0, 2.0, 0.125, 3.5]));
        assert_eq!(decode_factors(&reply, 3), Some(vec![2.0, 0.125, 3.5]));
    }

    #[test]
    fn anchor_without_room_falls_through_to_window() {
        // Marker at the very end; the window pass still finds the leading floats.
        let mut reply = le(&[0.75, 0.5]);
        reply.extend_from_slice(&ANCHOR_BE);
        assert_eq!(decode_factors(&reply, 2), Some(vec![0.75, 0.5]));
    }

    #[test]
    fn window_prefers_big_endian() {
        let reply = be(&[0.001_5, 42.0]);
        assert_eq!(
            decode_factors(&reply, 2),
            Some(vec![f64::from(0.001_5f32), 42.0])
        );
    }

    #[test]
    fn window_falls_back_to_little_endian() {
        // 0.01 little-endian reads as a NaN-free but huge value big-endian.
        let reply = le(&[0.01]);
        let be_guess = f64::from(f32::from_bits(u32::from_be_bytes([
            reply[0], reply[1], reply[2], reply[3],
        ])));
        assert!(!(be_guess.is_finite() && be_guess.abs() <= MAX_ABS && be_guess.abs() > MIN_PLAUSIBLE));
        assert_eq!(decode_factors(&reply, 1), Some(vec![f64::from(0.01f32)]));
    }

    #[test]
    fn zeros_are_not_plausible() {
        assert_eq!(decode_factors(&[0u8; 16], 2), None);
        assert_eq!(decode_factors(b"", 1), None);
        assert_eq!(decode_factors(b"OK\r\n", 1), None);
    }
}

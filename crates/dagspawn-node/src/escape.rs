//! NUL-free reversible encoding for binary process arguments.
//!
//! `0x00` and the marker `0xFE` are written as the marker followed by the byte
//! minus one; every other byte is copied. The encoded form never contains a
//! `0x00`, so it survives being passed as a C string argument.

use std::fmt;

pub const ESCAPE_MARKER: u8 = 0xFE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeError {
    /// The input ends right after an escape marker.
    Truncated { at: usize },
}

impl fmt::Display for EscapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscapeError::Truncated { at } => {
                write!(f, "escape marker at byte {at} has no following byte")
            }
        }
    }
}

impl std::error::Error for EscapeError {}

/// How far a bounded [`encode_into`] got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub consumed: usize,
    pub written: usize,
}

impl Progress {
    pub fn is_complete(&self, src_len: usize) -> bool {
        self.consumed == src_len
    }
}

pub fn max_encoded_len(src_len: usize) -> usize {
    src_len.saturating_mul(2)
}

fn needs_escape(b: u8) -> bool {
    b == 0 || b == ESCAPE_MARKER
}

/// Encodes as much of `src` as fits in `dst`. An escape pair is never split:
/// if only one byte of room is left for a byte that needs escaping, encoding
/// stops before it.
pub fn encode_into(src: &[u8], dst: &mut [u8]) -> Progress {
    let mut written = 0usize;
    for (consumed, &b) in src.iter().enumerate() {
        if needs_escape(b) {
            if dst.len() - written < 2 {
                return Progress { consumed, written };
            }
            dst[written] = ESCAPE_MARKER;
            dst[written + 1] = b.wrapping_sub(1);
            written += 2;
        } else {
            if written == dst.len() {
                return Progress { consumed, written };
            }
            dst[written] = b;
            written += 1;
        }
    }
    Progress {
        consumed: src.len(),
        written,
    }
}

pub fn encode(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len() + src.len() / 8);
    for &b in src {
        if needs_escape(b) {
            out.push(ESCAPE_MARKER);
            out.push(b.wrapping_sub(1));
        } else {
            out.push(b);
        }
    }
    out
}

pub fn decode(src: &[u8]) -> Result<Vec<u8>, EscapeError> {
    let mut out = Vec::with_capacity(src.len());
    let mut i = 0usize;
    while i < src.len() {
        let b = src[i];
        if b == ESCAPE_MARKER {
            let Some(&next) = src.get(i + 1) else {
                return Err(EscapeError::Truncated { at: i });
            };
            out.push(next.wrapping_add(1));
            i += 2;
        } else {
            out.push(b);
            i += 1;
        }
    }
    Ok(out)
}

/// Decodes a NUL-terminated argument in place and returns the decoded length.
///
/// Decoding stops at the first `0x00` or at the end of `buf`. A marker directly
/// before the terminator is rejected.
pub fn decode_in_place(buf: &mut [u8]) -> Result<usize, EscapeError> {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let mut r = 0usize;
    let mut w = 0usize;
    while r < end {
        let b = buf[r];
        if b == ESCAPE_MARKER {
            if r + 1 >= end {
                return Err(EscapeError::Truncated { at: r });
            }
            buf[w] = buf[r + 1].wrapping_add(1);
            r += 2;
        } else {
            buf[w] = b;
            r += 1;
        }
        w += 1;
    }
    Ok(w)
}

pub fn encode_u64_le(v: u64) -> Vec<u8> {
    encode(&v.to_le_bytes())
}

/// Decodes an argument and returns the 8-byte little-endian value it holds,
/// or `None` when the decoded length is not exactly 8.
pub fn decode_u64_le(arg: &[u8]) -> Result<Option<u64>, EscapeError> {
    let mut raw = arg.to_vec();
    let n = decode_in_place(&mut raw)?;
    Ok(<[u8; 8]>::try_from(&raw[..n]).ok().map(u64::from_le_bytes))
}

pub fn encode_handles(handles: &[u64]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(handles.len() * 8);
    for h in handles {
        raw.extend_from_slice(&h.to_le_bytes());
    }
    encode(&raw)
}

/// Decodes a concatenation of 8-byte little-endian handles. Returns `None`
/// when the decoded length is not exactly `8 * expected`.
pub fn decode_handles(arg: &[u8], expected: usize) -> Result<Option<Vec<u64>>, EscapeError> {
    let mut raw = arg.to_vec();
    let n = decode_in_place(&mut raw)?;
    if Some(n) != expected.checked_mul(8) {
        return Ok(None);
    }
    Ok(Some(
        raw[..n]
            .chunks_exact(8)
            .map(|c| {
                let mut b = [0u8; 8];
                b.copy_from_slice(c);
                u64::from_le_bytes(b)
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_covers_special_bytes() {
        let all: Vec<u8> = (0..=255u8).collect();
        for src in [
            &[][..],
            &[0x00][..],
            &[0xFE][..],
            &[0xFD][..],
            &[0xFF][..],
            &[0xFE, 0xFE, 0x00, 0x00][..],
            &all[..],
        ] {
            assert_eq!(decode(&encode(src)).unwrap(), src);
        }
    }

    #[test]
    fn encoded_output_has_no_nul() {
        let all: Vec<u8> = (0..=255u8).rev().collect();
        let enc = encode(&all);
        assert!(!enc.contains(&0));
        assert!(enc.len() <= max_encoded_len(all.len()));
        assert_eq!(enc.len(), all.len() + 2);
    }

    #[test]
    fn special_bytes_use_documented_pairs() {
        assert_eq!(encode(&[0x00]), vec![0xFE, 0xFF]);
        assert_eq!(encode(&[0xFE]), vec![0xFE, 0xFD]);
        assert_eq!(encode(&[0x41]), vec![0x41]);
    }

    #[test]
    fn bounded_encode_does_not_split_pairs() {
        let src = [0x41, 0x00, 0x42];
        let mut dst = [0u8; 2];
        let p = encode_into(&src, &mut dst);
        assert_eq!(p, Progress { consumed: 1, written: 1 });
        assert!(!p.is_complete(src.len()));

        let mut dst = [0u8; 4];
        let p = encode_into(&src, &mut dst);
        assert!(p.is_complete(src.len()));
        assert_eq!(&dst[..p.written], &[0x41, 0xFE, 0xFF, 0x42]);
    }

    #[test]
    fn trailing_marker_is_rejected() {
        assert_eq!(
            decode(&[0x41, 0xFE]),
            Err(EscapeError::Truncated { at: 1 })
        );
        let mut buf = [0x41, 0xFE, 0x00, 0x42];
        assert_eq!(
            decode_in_place(&mut buf),
            Err(EscapeError::Truncated { at: 1 })
        );
    }

    #[test]
    fn in_place_decode_stops_at_nul() {
        let mut buf = encode(&[1, 0, 2]);
        buf.push(0);
        buf.extend_from_slice(b"ignored");
        let n = decode_in_place(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[1, 0, 2]);
    }

    #[test]
    fn argument_helpers() {
        let arg = encode_u64_le(0x00FE_0000_0000_0001);
        assert_eq!(decode_u64_le(&arg).unwrap(), Some(0x00FE_0000_0000_0001));
        assert_eq!(decode_u64_le(&encode(&[1, 2, 3])).unwrap(), None);

        let arg = encode_handles(&[3, 0, u64::MAX]);
        assert_eq!(
            decode_handles(&arg, 3).unwrap(),
            Some(vec![3, 0, u64::MAX])
        );
        assert_eq!(decode_handles(&arg, 2).unwrap(), None);
        assert_eq!(decode_handles(&[], 0).unwrap(), Some(vec![]));
    }
}

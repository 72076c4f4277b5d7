//! Length-prefixed table/vector layout used by the binary graph.
//!
//! All integers are little-endian. A table or dynamic vector starts with a
//! `u32` total size followed by one `u32` offset per item; a fixed vector
//! starts with a `u32` item count followed by the packed items.

use std::fmt;

const NUM_SIZE: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    TooLarge {
        len: usize,
        max: usize,
    },
    HeaderTooShort {
        what: &'static str,
        len: usize,
    },
    TotalSizeMismatch {
        what: &'static str,
        declared: usize,
        actual: usize,
    },
    BadHeader {
        what: &'static str,
        first_offset: usize,
        total: usize,
    },
    OffsetOutOfOrder {
        what: &'static str,
        index: usize,
    },
    OffsetOutOfBounds {
        what: &'static str,
        index: usize,
        offset: usize,
        total: usize,
    },
    FieldCountTooSmall {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    ExtraFields {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    FixedSize {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    FixvecLength {
        what: &'static str,
        items: usize,
        item_size: usize,
        actual: usize,
    },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::TooLarge { len, max } => {
                write!(f, "graph buffer is {len} bytes, limit is {max}")
            }
            WireError::HeaderTooShort { what, len } => {
                write!(f, "{what}: {len} bytes is too short for a header")
            }
            WireError::TotalSizeMismatch {
                what,
                declared,
                actual,
            } => write!(
                f,
                "{what}: declared total size {declared} but segment is {actual} bytes"
            ),
            WireError::BadHeader {
                what,
                first_offset,
                total,
            } => write!(
                f,
                "{what}: invalid header size {first_offset} (total size {total})"
            ),
            WireError::OffsetOutOfOrder { what, index } => {
                write!(f, "{what}: offset {index} is smaller than its predecessor")
            }
            WireError::OffsetOutOfBounds {
                what,
                index,
                offset,
                total,
            } => write!(
                f,
                "{what}: offset {index} ({offset}) exceeds total size {total}"
            ),
            WireError::FieldCountTooSmall {
                what,
                expected,
                actual,
            } => write!(f, "{what}: expected {expected} fields, found {actual}"),
            WireError::ExtraFields {
                what,
                expected,
                actual,
            } => write!(
                f,
                "{what}: expected {expected} fields, found {actual} (extra fields are not accepted)"
            ),
            WireError::FixedSize {
                what,
                expected,
                actual,
            } => write!(f, "{what}: expected {expected} bytes, found {actual}"),
            WireError::FixvecLength {
                what,
                items,
                item_size,
                actual,
            } => write!(
                f,
                "{what}: {items} items of {item_size} bytes do not fit a {actual}-byte segment"
            ),
        }
    }
}

impl std::error::Error for WireError {}

fn read_num(buf: &[u8], at: usize) -> Option<usize> {
    let b = buf.get(at..at.checked_add(NUM_SIZE)?)?;
    let v = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
    usize::try_from(v).ok()
}

fn total_size(what: &'static str, buf: &[u8]) -> Result<usize, WireError> {
    let declared = read_num(buf, 0).ok_or(WireError::HeaderTooShort {
        what,
        len: buf.len(),
    })?;
    if declared != buf.len() {
        return Err(WireError::TotalSizeMismatch {
            what,
            declared,
            actual: buf.len(),
        });
    }
    Ok(declared)
}

/// Splits a table or dynamic vector into its item segments.
///
/// Every offset is checked before any item is sliced, so a returned segment is
/// always in bounds of `buf`.
pub fn split_offsets<'a>(what: &'static str, buf: &'a [u8]) -> Result<Vec<&'a [u8]>, WireError> {
    let total = total_size(what, buf)?;
    if total == NUM_SIZE {
        return Ok(Vec::new());
    }
    if total < NUM_SIZE * 2 {
        return Err(WireError::HeaderTooShort { what, len: total });
    }

    let first = read_num(buf, NUM_SIZE).ok_or(WireError::HeaderTooShort { what, len: total })?;
    if first % NUM_SIZE != 0 || first < NUM_SIZE * 2 || first > total {
        return Err(WireError::BadHeader {
            what,
            first_offset: first,
            total,
        });
    }

    let count = first / NUM_SIZE - 1;
    let mut offsets = Vec::with_capacity(count + 1);
    for i in 0..count {
        let off = read_num(buf, NUM_SIZE * (i + 1)).ok_or(WireError::BadHeader {
            what,
            first_offset: first,
            total,
        })?;
        if off > total {
            return Err(WireError::OffsetOutOfBounds {
                what,
                index: i,
                offset: off,
                total,
            });
        }
        if offsets.last().is_some_and(|prev| off < *prev) {
            return Err(WireError::OffsetOutOfOrder { what, index: i });
        }
        offsets.push(off);
    }
    offsets.push(total);

    Ok(offsets.windows(2).map(|w| &buf[w[0]..w[1]]).collect())
}

/// Splits a table, requiring exactly `fields` fields.
pub fn split_table<'a>(
    what: &'static str,
    buf: &'a [u8],
    fields: usize,
) -> Result<Vec<&'a [u8]>, WireError> {
    let segs = split_offsets(what, buf)?;
    if segs.len() < fields {
        return Err(WireError::FieldCountTooSmall {
            what,
            expected: fields,
            actual: segs.len(),
        });
    }
    if segs.len() > fields {
        return Err(WireError::ExtraFields {
            what,
            expected: fields,
            actual: segs.len(),
        });
    }
    Ok(segs)
}

pub fn read_uint64(what: &'static str, seg: &[u8]) -> Result<u64, WireError> {
    let raw: [u8; 8] = seg.try_into().map_err(|_| WireError::FixedSize {
        what,
        expected: 8,
        actual: seg.len(),
    })?;
    Ok(u64::from_le_bytes(raw))
}

/// Returns the packed item bytes of a fixed vector after checking that the
/// declared item count matches the segment length exactly.
pub fn read_fixvec<'a>(
    what: &'static str,
    seg: &'a [u8],
    item_size: usize,
) -> Result<&'a [u8], WireError> {
    let items = read_num(seg, 0).ok_or(WireError::HeaderTooShort {
        what,
        len: seg.len(),
    })?;
    let expected = items
        .checked_mul(item_size)
        .and_then(|n| n.checked_add(NUM_SIZE));
    if expected != Some(seg.len()) {
        return Err(WireError::FixvecLength {
            what,
            items,
            item_size,
            actual: seg.len(),
        });
    }
    Ok(&seg[NUM_SIZE..])
}

pub fn read_uint64_fixvec(what: &'static str, seg: &[u8]) -> Result<Vec<u64>, WireError> {
    let raw = read_fixvec(what, seg, 8)?;
    raw.chunks_exact(8)
        .map(|chunk| read_uint64(what, chunk))
        .collect()
}

fn push_num(out: &mut Vec<u8>, n: usize) {
    let v: u32 = n.try_into().unwrap_or(u32::MAX);
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn build_uint64(v: u64) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

pub fn build_fixvec(items: usize, raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(NUM_SIZE + raw.len());
    push_num(&mut out, items);
    out.extend_from_slice(raw);
    out
}

pub fn build_uint64_fixvec(values: &[u64]) -> Vec<u8> {
    let raw: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    build_fixvec(values.len(), &raw)
}

/// Builds a table or dynamic vector from already-encoded items.
pub fn build_offsets(items: &[Vec<u8>]) -> Vec<u8> {
    if items.is_empty() {
        let mut out = Vec::with_capacity(NUM_SIZE);
        push_num(&mut out, NUM_SIZE);
        return out;
    }

    let header = NUM_SIZE * (items.len() + 1);
    let body: usize = items.iter().map(Vec::len).sum();
    let total = header + body;

    let mut out = Vec::with_capacity(total);
    push_num(&mut out, total);
    let mut off = header;
    for item in items {
        push_num(&mut out, off);
        off += item.len();
    }
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

// Copyright (c) 2025-present, the SiloBang authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The on-disk record framing: a fixed 110-byte header followed by the raw
//! payload bytes. This is the only place that knows the wire layout; the
//! segment manager treats encoded records as opaque byte strings.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Read;

/// Magic bytes at the start of every record.
pub const MAGIC: &[u8; 4] = b"MSHB";

/// Current on-disk format version.
pub const CURRENT_VERSION: u16 = 1;

/// Total header size in bytes: magic(4) + version(2) + data_length(8) + hash(64) + reserved(32).
pub const HEADER_LEN: usize = 110;

const HASH_FIELD_LEN: usize = 64;
const RESERVED_LEN: usize = 32;

/// A decoded record header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    /// Format version this record was written with.
    pub version: u16,
    /// Length of the payload in bytes.
    pub data_length: u64,
    /// Hex-encoded BLAKE3 hash of the payload, as stored in the header.
    pub hash: String,
}

/// Encodes a payload into its on-disk record representation (header || payload).
///
/// Deterministic: the same payload always produces the same bytes.
#[must_use]
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let hash = crate::hash::hash_payload(payload);
    debug_assert_eq!(hash.len(), HASH_FIELD_LEN);

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(MAGIC);
    out.write_u16::<LittleEndian>(CURRENT_VERSION)
        .expect("writes to a Vec<u8> never fail");
    out.write_u64::<LittleEndian>(payload.len() as u64)
        .expect("writes to a Vec<u8> never fail");
    out.extend_from_slice(hash.as_bytes());
    out.extend(std::iter::repeat(0u8).take(RESERVED_LEN));
    out.extend_from_slice(payload);
    out
}

/// Decodes one record from `reader`: reads exactly the header, then exactly
/// `data_length` payload bytes.
///
/// When `verify` is `true`, the payload is re-hashed and checked against the
/// header's stored hash, returning [`crate::Error::HashMismatch`] on mismatch.
pub fn decode<R: Read>(reader: &mut R, verify: bool) -> crate::Result<(RecordHeader, Vec<u8>)> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).map_err(map_eof)?;
    if &magic != MAGIC {
        return Err(crate::Error::CorruptMagic);
    }

    let version = reader.read_u16::<LittleEndian>().map_err(map_eof)?;
    if version > CURRENT_VERSION {
        return Err(crate::Error::UnsupportedVersion(version));
    }

    let data_length = reader.read_u64::<LittleEndian>().map_err(map_eof)?;

    let mut hash_buf = [0u8; HASH_FIELD_LEN];
    reader.read_exact(&mut hash_buf).map_err(map_eof)?;
    let hash = String::from_utf8_lossy(&hash_buf).into_owned();

    let mut reserved = [0u8; RESERVED_LEN];
    reader.read_exact(&mut reserved).map_err(map_eof)?;

    let mut payload = vec![0u8; usize::try_from(data_length).unwrap_or(usize::MAX)];
    reader.read_exact(&mut payload).map_err(map_eof)?;

    if verify {
        let actual = crate::hash::hash_payload(&payload);
        if actual != hash {
            return Err(crate::Error::HashMismatch {
                expected: hash,
                actual,
            });
        }
    }

    Ok((
        RecordHeader {
            version,
            data_length,
            hash,
        },
        payload,
    ))
}

fn map_eof(e: std::io::Error) -> crate::Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        crate::Error::ShortRead
    } else {
        crate::Error::Io(e)
    }
}

/// Fills `buf` as much as possible, returning the number of bytes actually
/// read (which may be less than `buf.len()` at a clean end of stream). Unlike
/// `read_exact`, a short read is not itself an error — the caller decides
/// whether a partial fill means "no more records" or "torn tail".
fn read_fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut read = 0;
    while read < buf.len() {
        match reader.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(read)
}

/// Lazily scans records out of a reader, yielding `(offset, header, payload)`.
///
/// Stops cleanly (`None`) at a true end-of-stream that falls exactly on a
/// record boundary. A stream that ends mid-header or mid-payload yields one
/// final `Err(Error::ShortRead)` item describing a torn tail — recovery uses
/// this to find the truncation point.
pub struct ScanIter<R> {
    reader: R,
    offset: u64,
}

impl<R: Read> ScanIter<R> {
    /// Wraps a reader positioned at the start of a segment's record stream.
    pub fn new(reader: R) -> Self {
        Self { reader, offset: 0 }
    }
}

impl<R: Read> Iterator for ScanIter<R> {
    type Item = crate::Result<(u64, RecordHeader, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.offset;

        let mut header_buf = [0u8; HEADER_LEN];
        let n = match read_fill(&mut self.reader, &mut header_buf) {
            Ok(n) => n,
            Err(e) => return Some(Err(crate::Error::Io(e))),
        };
        if n == 0 {
            return None;
        }
        if n < HEADER_LEN {
            return Some(Err(crate::Error::ShortRead));
        }

        if &header_buf[0..4] != MAGIC {
            return Some(Err(crate::Error::CorruptMagic));
        }

        let mut cursor = std::io::Cursor::new(&header_buf[4..]);
        let version = cursor
            .read_u16::<LittleEndian>()
            .expect("in-memory header read cannot fail");
        if version > CURRENT_VERSION {
            return Some(Err(crate::Error::UnsupportedVersion(version)));
        }
        let data_length = cursor
            .read_u64::<LittleEndian>()
            .expect("in-memory header read cannot fail");

        let hash_start = 4 + 2 + 8;
        let hash = String::from_utf8_lossy(&header_buf[hash_start..hash_start + HASH_FIELD_LEN])
            .into_owned();

        let mut payload = vec![0u8; usize::try_from(data_length).unwrap_or(usize::MAX)];
        let pn = match read_fill(&mut self.reader, &mut payload) {
            Ok(n) => n,
            Err(e) => return Some(Err(crate::Error::Io(e))),
        };
        if (pn as u64) < data_length {
            return Some(Err(crate::Error::ShortRead));
        }

        self.offset = start + HEADER_LEN as u64 + data_length;

        Some(Ok((
            start,
            RecordHeader {
                version,
                data_length,
                hash,
            },
            payload,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips() {
        let payload = b"hello world".to_vec();
        let encoded = encode(&payload);
        assert_eq!(encoded.len(), HEADER_LEN + payload.len());

        let (header, decoded) = decode(&mut Cursor::new(&encoded), true).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(header.version, CURRENT_VERSION);
        assert_eq!(header.data_length, payload.len() as u64);
        assert_eq!(header.hash, crate::hash::hash_payload(&payload));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut encoded = encode(b"x");
        encoded[0] = b'Z';
        let err = decode(&mut Cursor::new(&encoded), false).unwrap_err();
        assert!(matches!(err, crate::Error::CorruptMagic));
    }

    #[test]
    fn detects_hash_mismatch_only_when_verifying() {
        let mut encoded = encode(b"hello");
        let payload_start = HEADER_LEN;
        encoded[payload_start] ^= 0xFF;

        assert!(decode(&mut Cursor::new(&encoded), false).is_ok());
        let err = decode(&mut Cursor::new(&encoded), true).unwrap_err();
        assert!(matches!(err, crate::Error::HashMismatch { .. }));
    }

    #[test]
    fn scan_yields_records_in_order() {
        let mut buf = Vec::new();
        buf.extend(encode(b"a"));
        buf.extend(encode(b"bb"));
        buf.extend(encode(b"ccc"));

        let records: Vec<_> = ScanIter::new(Cursor::new(&buf))
            .collect::<crate::Result<Vec<_>>>()
            .unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].0, 0);
        assert_eq!(records[1].0, (HEADER_LEN + 1) as u64);
        assert_eq!(records[2].2, b"ccc");
    }

    #[test]
    fn scan_reports_torn_tail() {
        let mut buf = encode(b"a");
        buf.extend(encode(b"bb"));
        buf.truncate(buf.len() - 1); // chop one byte off the last record

        let mut iter = ScanIter::new(Cursor::new(&buf));
        assert!(iter.next().unwrap().is_ok());
        assert!(matches!(iter.next(), Some(Err(crate::Error::ShortRead))));
        assert!(iter.next().is_none());
    }
}

//! crates/wireq-codec/src/lib.rs
//!
//! # Overview
//!
//! Hand-rolled, little-endian, reflection-free binary codec for the cache
//! record format written to disk by `wireq-cache`. There is no `serde`
//! derive here on purpose: the layout is a fixed byte grammar (magic, a
//! handful of length-prefixed primitives, then raw body bytes to end of
//! file) and a reflective encoder would both be slower and hide the exact
//! wire shape that `wireq-cache`'s filename/collision handling depends on.
//!
//! # Layout
//!
//! ```text
//! magic(u32=0x20150218) | key(string) | etag(string, "" = absent)
//! | server_date(i64) | ttl(i64) | soft_ttl(i64) | keep_until(i64)
//! | is_image(u32; nonzero = true) | response_headers(string_map)
//! | body(bytes to end of file)
//! ```
//!
//! `string` is an `i64` byte-length prefix followed by UTF-8 bytes.
//! `string_map` is a `u32` count followed by that many (string, string)
//! pairs, preserving insertion order.
//!
//! # Invariants
//!
//! - `ttl == i64::MAX` or `soft_ttl == i64::MAX` are reserved sentinels.
//!   [`encode`] refuses to serialize such a record and [`decode`]/
//!   [`decode_header`] fail with [`CodecError::ReservedSentinel`] if they
//!   are ever found on disk. Such records are never written; if one is
//!   found it must be deleted, but the deletion itself is `wireq-cache`'s
//!   job — this crate only refuses to round-trip them.
//! - Decoding fails with [`CodecError::BadMagic`] or
//!   [`CodecError::UnexpectedEof`] rather than panicking on any
//!   short/corrupt input.

#![deny(unsafe_code)]

use std::io::{self, Read, Write};

use thiserror::Error;

/// Magic number stamped at the start of every on-disk cache record.
pub const MAGIC: u32 = 0x2015_0218;

/// Reserved sentinel for `ttl`/`soft_ttl`. Records carrying it are never
/// persisted; if encountered on disk they must be treated as corrupt.
pub const RESERVED_MAX: i64 = i64::MAX;

/// Errors produced while encoding or decoding a cache record.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The stream ended before a full primitive could be read.
    #[error("unexpected end of input while reading {field}")]
    UnexpectedEof {
        /// Name of the field being decoded when the stream ran dry.
        field: &'static str,
    },
    /// The leading magic number did not match [`MAGIC`].
    #[error("bad magic: expected {expected:#010x}, found {found:#010x}")]
    BadMagic {
        /// Expected magic value.
        expected: u32,
        /// Magic value actually read.
        found: u32,
    },
    /// `ttl` or `soft_ttl` carried the reserved sentinel value.
    #[error("record carries the reserved ttl/soft_ttl sentinel and must not be read")]
    ReservedSentinel,
    /// A length prefix described more bytes than can fit in memory/`usize`.
    #[error("invalid length prefix: {0}")]
    InvalidLength(i64),
    /// A string field was not valid UTF-8.
    #[error("invalid utf-8 in {field}")]
    InvalidUtf8 {
        /// Name of the field that failed UTF-8 validation.
        field: &'static str,
    },
    /// Underlying I/O failure while reading or writing.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// The fixed-size, non-body portion of a cache record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheHeader {
    /// The cache key this record was stored under.
    pub key: String,
    /// `ETag` response header, if the server supplied one.
    pub etag: Option<String>,
    /// Wall-clock time (epoch ms) the response was received.
    pub server_date: i64,
    /// Hard expiry (epoch ms). Below this the entry may still be served.
    pub ttl: i64,
    /// Freshness horizon (epoch ms). Below this, a refresh is triggered.
    pub soft_ttl: i64,
    /// Protection deadline (epoch ms); below this the entry is not evicted
    /// except under `ALL`-pass pruning pressure.
    pub keep_until: i64,
    /// Whether this record holds a decoded image payload.
    pub is_image: bool,
    /// Response headers, in server order.
    pub response_headers: Vec<(String, String)>,
}

/// A full cache record: header plus body bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheRecord {
    /// The record's header fields.
    pub header: CacheHeader,
    /// Response body bytes.
    pub body: Vec<u8>,
}

impl CacheRecord {
    /// Returns `true` if this record's ttl/soft_ttl carry the reserved
    /// sentinel and must never be persisted.
    #[must_use]
    pub fn carries_reserved_sentinel(&self) -> bool {
        self.header.ttl == RESERVED_MAX || self.header.soft_ttl == RESERVED_MAX
    }
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_i64(out: &mut Vec<u8>, value: i64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_string(out: &mut Vec<u8>, value: &str) {
    write_i64(out, value.len() as i64);
    out.extend_from_slice(value.as_bytes());
}

fn write_string_map(out: &mut Vec<u8>, map: &[(String, String)]) {
    write_u32(out, map.len() as u32);
    for (k, v) in map {
        write_string(out, k);
        write_string(out, v);
    }
}

/// Encodes a full record, including its body, in on-disk layout.
///
/// # Errors
///
/// Returns [`CodecError::ReservedSentinel`] rather than silently persisting
/// a record whose `ttl`/`soft_ttl` carries [`RESERVED_MAX`].
pub fn encode(record: &CacheRecord) -> Result<Vec<u8>, CodecError> {
    if record.carries_reserved_sentinel() {
        return Err(CodecError::ReservedSentinel);
    }
    let mut out = Vec::with_capacity(64 + record.body.len());
    write_u32(&mut out, MAGIC);
    write_string(&mut out, &record.header.key);
    write_string(&mut out, record.header.etag.as_deref().unwrap_or(""));
    write_i64(&mut out, record.header.server_date);
    write_i64(&mut out, record.header.ttl);
    write_i64(&mut out, record.header.soft_ttl);
    write_i64(&mut out, record.header.keep_until);
    write_u32(&mut out, u32::from(record.header.is_image));
    write_string_map(&mut out, &record.header.response_headers);
    out.extend_from_slice(&record.body);
    Ok(out)
}

fn read_exact(reader: &mut impl Read, buf: &mut [u8], field: &'static str) -> Result<(), CodecError> {
    reader
        .read_exact(buf)
        .map_err(|err| match err.kind() {
            io::ErrorKind::UnexpectedEof => CodecError::UnexpectedEof { field },
            _ => CodecError::Io(err),
        })
}

fn read_u32(reader: &mut impl Read, field: &'static str) -> Result<u32, CodecError> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf, field)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_i64(reader: &mut impl Read, field: &'static str) -> Result<i64, CodecError> {
    let mut buf = [0u8; 8];
    read_exact(reader, &mut buf, field)?;
    Ok(i64::from_le_bytes(buf))
}

fn read_string(reader: &mut impl Read, field: &'static str) -> Result<String, CodecError> {
    let len = read_i64(reader, field)?;
    if len < 0 || len > i64::from(u32::MAX) {
        return Err(CodecError::InvalidLength(len));
    }
    let mut buf = vec![0u8; len as usize];
    read_exact(reader, &mut buf, field)?;
    String::from_utf8(buf).map_err(|_| CodecError::InvalidUtf8 { field })
}

fn read_string_map(reader: &mut impl Read) -> Result<Vec<(String, String)>, CodecError> {
    let count = read_u32(reader, "response_headers.count")?;
    let mut map = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let key = read_string(reader, "response_headers.key")?;
        let value = read_string(reader, "response_headers.value")?;
        map.push((key, value));
    }
    Ok(map)
}

/// Decodes only the fixed-size header portion from `reader`, leaving the
/// body unread. Used by `wireq-cache` for the startup scan and
/// `get_headers`, so callers never pay for loading a body they don't need.
///
/// # Errors
///
/// See [`CodecError`]. Fails with [`CodecError::ReservedSentinel`] if the
/// header carries the reserved ttl/soft_ttl sentinel.
pub fn decode_header(reader: &mut impl Read) -> Result<CacheHeader, CodecError> {
    let magic = read_u32(reader, "magic")?;
    if magic != MAGIC {
        return Err(CodecError::BadMagic {
            expected: MAGIC,
            found: magic,
        });
    }
    let key = read_string(reader, "key")?;
    let etag_raw = read_string(reader, "etag")?;
    let etag = if etag_raw.is_empty() { None } else { Some(etag_raw) };
    let server_date = read_i64(reader, "server_date")?;
    let ttl = read_i64(reader, "ttl")?;
    let soft_ttl = read_i64(reader, "soft_ttl")?;
    let keep_until = read_i64(reader, "keep_until")?;
    let is_image = read_u32(reader, "is_image")? != 0;
    let response_headers = read_string_map(reader)?;

    if ttl == RESERVED_MAX || soft_ttl == RESERVED_MAX {
        return Err(CodecError::ReservedSentinel);
    }

    Ok(CacheHeader {
        key,
        etag,
        server_date,
        ttl,
        soft_ttl,
        keep_until,
        is_image,
        response_headers,
    })
}

/// Decodes a full record (header plus body-to-end-of-stream) from `reader`.
///
/// # Errors
///
/// See [`CodecError`].
pub fn decode(reader: &mut impl Read) -> Result<CacheRecord, CodecError> {
    let header = decode_header(reader)?;
    let mut body = Vec::new();
    reader.read_to_end(&mut body)?;
    Ok(CacheRecord { header, body })
}

/// Convenience wrapper writing an encoded record straight to `writer`.
///
/// # Errors
///
/// Returns [`CodecError::ReservedSentinel`] or the underlying I/O error.
pub fn encode_to(writer: &mut impl Write, record: &CacheRecord) -> Result<(), CodecError> {
    let bytes = encode(record)?;
    writer.write_all(&bytes)?;
    Ok(())
}

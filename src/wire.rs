//! The exact byte layout of the engine boundary, and nothing else.
//!
//! A reply is `u8 tag ‖ u32le count_or_len ‖ payload`. An argument array is
//! `u32le count ‖ { u32le len ‖ len bytes } × count`. All multibyte integers
//! are little-endian, and every payload carries an explicit length, so NUL
//! bytes round-trip everywhere.

use crate::reply::{Reply, ReplyError};
use bytes::{Buf, BufMut, Bytes};
use thiserror::Error;

const TAG_NULL: u8 = 0x00;
const TAG_INT: u8 = 0x01;
const TAG_BULK: u8 = 0x02;
const TAG_ARRAY: u8 = 0x03;
const TAG_STATUS: u8 = 0x04;
const TAG_ERROR: u8 = 0x05;

/// Tag byte plus the four-byte count-or-length field.
const HEADER_LEN: usize = 5;

/// Reply trees deeper than this are refused in both directions, so a crafted
/// buffer or a self-referential table cannot overflow the host stack.
pub const MAX_DEPTH: usize = 128;

#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum WireError {
    #[error("ERR invalid KEYS/ARGV encoding")]
    Args,

    #[error("ERR reply nesting exceeds depth limit")]
    Depth,

    #[error("ERR reply encoding failed")]
    Encoding,

    #[error("ERR reply decoding failed")]
    Truncated,

    #[error("ERR unknown reply type")]
    UnknownTag,
}

impl From<WireError> for ReplyError {
    fn from(error: WireError) -> Self {
        use WireError::*;
        match error {
            Args => ReplyError::ArgDecode,
            Depth => ReplyError::NestingDepth,
            Encoding => ReplyError::Encode,
            Truncated => ReplyError::Decode,
            UnknownTag => ReplyError::UnknownReplyType,
        }
    }
}

/// The size of a reply's encoding, without producing it.
pub fn encoded_len(reply: &Reply) -> usize {
    use Reply::*;
    match reply {
        Null => HEADER_LEN,
        Int(_) => HEADER_LEN + 8,
        Bulk(bytes) | Status(bytes) | Error(bytes) => HEADER_LEN + bytes.len(),
        Array(items) => HEADER_LEN + items.iter().map(encoded_len).sum::<usize>(),
    }
}

/// Encode one reply into an owned buffer.
pub fn encode_reply(reply: &Reply) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::with_capacity(encoded_len(reply));
    write_reply(reply, &mut buf, 0)?;
    Ok(buf)
}

fn write_header(buf: &mut Vec<u8>, tag: u8, count_or_len: u32) {
    buf.put_u8(tag);
    buf.put_u32_le(count_or_len);
}

fn write_reply(reply: &Reply, buf: &mut Vec<u8>, depth: usize) -> Result<(), WireError> {
    use Reply::*;
    if depth > MAX_DEPTH {
        return Err(WireError::Depth);
    }
    match reply {
        Null => write_header(buf, TAG_NULL, 0),
        Int(value) => {
            write_header(buf, TAG_INT, 8);
            buf.put_i64_le(*value);
        }
        Bulk(bytes) => {
            write_header(buf, TAG_BULK, field(bytes.len())?);
            buf.put_slice(bytes);
        }
        Status(bytes) => {
            write_header(buf, TAG_STATUS, field(bytes.len())?);
            buf.put_slice(bytes);
        }
        Error(bytes) => {
            write_header(buf, TAG_ERROR, field(bytes.len())?);
            buf.put_slice(bytes);
        }
        Array(items) => {
            write_header(buf, TAG_ARRAY, field(items.len())?);
            for item in items {
                write_reply(item, buf, depth + 1)?;
            }
        }
    }
    Ok(())
}

fn field(len: usize) -> Result<u32, WireError> {
    u32::try_from(len).map_err(|_| WireError::Encoding)
}

/// Decode one reply from the front of `buf`. Trailing bytes are ignored.
pub fn decode_reply(buf: &[u8]) -> Result<Reply, WireError> {
    let mut buf = buf;
    read_reply(&mut buf, 0)
}

fn read_reply(buf: &mut &[u8], depth: usize) -> Result<Reply, WireError> {
    if depth > MAX_DEPTH {
        return Err(WireError::Depth);
    }
    if buf.remaining() < HEADER_LEN {
        return Err(WireError::Truncated);
    }
    let tag = buf.get_u8();
    let count_or_len = buf.get_u32_le() as usize;

    match tag {
        TAG_NULL => Ok(Reply::Null),
        TAG_INT => {
            // The length field is redundantly 8; accept whatever was written.
            if buf.remaining() < 8 {
                return Err(WireError::Truncated);
            }
            Ok(Reply::Int(buf.get_i64_le()))
        }
        TAG_BULK => Ok(Reply::Bulk(read_payload(buf, count_or_len)?)),
        TAG_STATUS => Ok(Reply::Status(read_payload(buf, count_or_len)?)),
        TAG_ERROR => Ok(Reply::Error(read_payload(buf, count_or_len)?)),
        TAG_ARRAY => {
            // Each element needs at least a header, which bounds any count a
            // non-truncated buffer can honestly claim.
            if count_or_len.saturating_mul(HEADER_LEN) > buf.remaining() {
                return Err(WireError::Truncated);
            }
            let mut items = Vec::with_capacity(count_or_len);
            for _ in 0..count_or_len {
                items.push(read_reply(buf, depth + 1)?);
            }
            Ok(Reply::Array(items))
        }
        _ => Err(WireError::UnknownTag),
    }
}

fn read_payload(buf: &mut &[u8], len: usize) -> Result<Bytes, WireError> {
    if buf.remaining() < len {
        return Err(WireError::Truncated);
    }
    Ok(buf.copy_to_bytes(len))
}

/// Encode an argument array.
pub fn encode_args(args: &[Bytes]) -> Result<Vec<u8>, WireError> {
    let payload: usize = args.iter().map(|arg| 4 + arg.len()).sum();
    let mut buf = Vec::with_capacity(4 + payload);
    buf.put_u32_le(u32::try_from(args.len()).map_err(|_| WireError::Encoding)?);
    for arg in args {
        buf.put_u32_le(u32::try_from(arg.len()).map_err(|_| WireError::Encoding)?);
        buf.put_slice(arg);
    }
    Ok(buf)
}

/// Decode an argument array. Trailing bytes are ignored.
pub fn decode_args(buf: &[u8]) -> Result<Vec<Bytes>, WireError> {
    let mut buf = buf;
    if buf.remaining() < 4 {
        return Err(WireError::Args);
    }
    let count = buf.get_u32_le() as usize;
    if count.saturating_mul(4) > buf.remaining() {
        return Err(WireError::Args);
    }
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        if buf.remaining() < 4 {
            return Err(WireError::Args);
        }
        let len = buf.get_u32_le() as usize;
        if buf.remaining() < len {
            return Err(WireError::Args);
        }
        args.push(buf.copy_to_bytes(len));
    }
    Ok(args)
}

/// Pack a pointer and length into the single-u64 return convention used by
/// 32-bit linear-memory artifacts: pointer in the low half, length in the
/// high half.
pub fn ptr_len_pack(ptr: u32, len: u32) -> u64 {
    u64::from(len) << 32 | u64::from(ptr)
}

/// The inverse of [`ptr_len_pack`].
pub fn ptr_len_unpack(packed: u64) -> (u32, u32) {
    (packed as u32, (packed >> 32) as u32)
}

/// Write the eight-byte `u32le ptr ‖ u32le len` record named by an sret
/// out-pointer.
pub fn ptr_len_write_sret(dst: &mut [u8; 8], ptr: u32, len: u32) {
    dst[..4].copy_from_slice(&ptr.to_le_bytes());
    dst[4..].copy_from_slice(&len.to_le_bytes());
}

/// Read the eight-byte sret record.
pub fn ptr_len_read_sret(src: &[u8; 8]) -> (u32, u32) {
    let ptr = u32::from_le_bytes(src[..4].try_into().unwrap());
    let len = u32::from_le_bytes(src[4..].try_into().unwrap());
    (ptr, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn golden_encodings() {
        assert_eq!(encode_reply(&Reply::Null).unwrap(), [0x00, 0, 0, 0, 0]);
        assert_eq!(
            encode_reply(&Reply::Int(2)).unwrap(),
            [0x01, 8, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(
            encode_reply(&Reply::Bulk(Bytes::from_static(b"hi"))).unwrap(),
            [0x02, 2, 0, 0, 0, b'h', b'i']
        );
        assert_eq!(
            encode_reply(&Reply::ok()).unwrap(),
            [0x04, 2, 0, 0, 0, b'O', b'K']
        );
    }

    #[test]
    fn negative_int() {
        let encoded = encode_reply(&Reply::Int(-1)).unwrap();
        assert_eq!(encoded[5..], [0xff; 8]);
        assert_eq!(decode_reply(&encoded).unwrap(), Reply::Int(-1));
    }

    #[test]
    fn int_length_field_is_ignored() {
        let mut encoded = encode_reply(&Reply::Int(7)).unwrap();
        encoded[1] = 0;
        assert_eq!(decode_reply(&encoded).unwrap(), Reply::Int(7));
    }

    #[test]
    fn nul_bytes_round_trip() {
        let reply = Reply::Bulk(Bytes::from_static(&[0x00, 0x01, 0x00, 0x02]));
        let encoded = encode_reply(&reply).unwrap();
        assert_eq!(decode_reply(&encoded).unwrap(), reply);
    }

    #[test]
    fn empty_array() {
        let reply = Reply::Array(vec![]);
        let encoded = encode_reply(&reply).unwrap();
        assert_eq!(encoded, [0x03, 0, 0, 0, 0]);
        assert_eq!(decode_reply(&encoded).unwrap(), reply);
    }

    #[test]
    fn nested_arrays() {
        let reply = Reply::Array(vec![
            Reply::Int(1),
            Reply::Array(vec![Reply::Null, Reply::Status(Bytes::from_static(b"OK"))]),
            Reply::Error(Bytes::from_static(b"ERR boom")),
        ]);
        let encoded = encode_reply(&reply).unwrap();
        assert_eq!(decode_reply(&encoded).unwrap(), reply);
    }

    #[test]
    fn truncation_fails() {
        let encoded = encode_reply(&Reply::Bulk(Bytes::from_static(b"hello"))).unwrap();
        for cut in 0..encoded.len() {
            assert_eq!(decode_reply(&encoded[..cut]), Err(WireError::Truncated));
        }
    }

    #[test]
    fn unknown_tag_fails() {
        assert_eq!(
            decode_reply(&[0x06, 0, 0, 0, 0]),
            Err(WireError::UnknownTag)
        );
    }

    #[test]
    fn lying_array_count_fails() {
        // Claims a billion elements with five bytes of payload.
        let mut buf = vec![0x03];
        buf.extend_from_slice(&1_000_000_000u32.to_le_bytes());
        buf.extend_from_slice(&[0x00, 0, 0, 0, 0]);
        assert_eq!(decode_reply(&buf), Err(WireError::Truncated));
    }

    #[test]
    fn deep_nesting_fails() {
        let mut buf = Vec::new();
        for _ in 0..MAX_DEPTH + 2 {
            buf.push(TAG_ARRAY);
            buf.extend_from_slice(&1u32.to_le_bytes());
        }
        buf.extend_from_slice(&[TAG_NULL, 0, 0, 0, 0]);
        assert_eq!(decode_reply(&buf), Err(WireError::Depth));
    }

    #[test]
    fn args_round_trip() {
        let args = vec![
            Bytes::from_static(&[0x00, 0x01, 0x02]),
            Bytes::from_static(b""),
            Bytes::from_static(b"SET"),
        ];
        let encoded = encode_args(&args).unwrap();
        assert_eq!(decode_args(&encoded).unwrap(), args);
    }

    #[test]
    fn empty_args() {
        let encoded = encode_args(&[]).unwrap();
        assert_eq!(encoded, [0, 0, 0, 0]);
        assert_eq!(decode_args(&encoded).unwrap(), Vec::<Bytes>::new());
    }

    #[test]
    fn truncated_args_fail() {
        let encoded = encode_args(&[Bytes::from_static(b"abc")]).unwrap();
        for cut in 0..encoded.len() {
            assert_eq!(decode_args(&encoded[..cut]), Err(WireError::Args));
        }
    }

    #[test]
    fn lying_args_count_fails() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&100u32.to_le_bytes());
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(b"abc");
        assert_eq!(decode_args(&buf), Err(WireError::Args));
    }

    #[test]
    fn encoded_len_matches() {
        let reply = Reply::Array(vec![
            Reply::Int(5),
            Reply::Bulk(Bytes::from_static(b"abc")),
            Reply::Null,
        ]);
        assert_eq!(encoded_len(&reply), encode_reply(&reply).unwrap().len());
    }

    #[test]
    fn ptr_len_conventions() {
        assert_eq!(ptr_len_pack(0x1000, 42), 0x0000_002a_0000_1000);
        assert_eq!(ptr_len_unpack(0x0000_002a_0000_1000), (0x1000, 42));

        let mut sret = [0u8; 8];
        ptr_len_write_sret(&mut sret, 0x1000, 42);
        assert_eq!(ptr_len_read_sret(&sret), (0x1000, 42));
    }
}

use bytes::{Buf, BufMut, BytesMut};
use std::fmt::Write as _;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("VarInt too big")]
    VarIntTooBig,
    #[error("Not enough data")]
    NotEnoughData,
    #[error("String too long: {0} > {1}")]
    StringTooLong(usize, usize),
    #[error("Invalid string: {0}")]
    InvalidString(String),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Width of the fixed classic string field.
pub const CLASSIC_STRING_LEN: usize = 64;

fn ensure(buf: &BytesMut, n: usize) -> CodecResult<()> {
    if buf.remaining() < n {
        Err(CodecError::NotEnoughData)
    } else {
        Ok(())
    }
}

pub fn read_u8(buf: &mut BytesMut) -> CodecResult<u8> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn read_i8(buf: &mut BytesMut) -> CodecResult<i8> {
    ensure(buf, 1)?;
    Ok(buf.get_i8())
}

pub fn read_bool(buf: &mut BytesMut) -> CodecResult<bool> {
    Ok(read_u8(buf)? != 0)
}

pub fn read_u16(buf: &mut BytesMut) -> CodecResult<u16> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

pub fn read_i16(buf: &mut BytesMut) -> CodecResult<i16> {
    ensure(buf, 2)?;
    Ok(buf.get_i16())
}

pub fn read_u32(buf: &mut BytesMut) -> CodecResult<u32> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

pub fn read_i32(buf: &mut BytesMut) -> CodecResult<i32> {
    ensure(buf, 4)?;
    Ok(buf.get_i32())
}

pub fn read_i64(buf: &mut BytesMut) -> CodecResult<i64> {
    ensure(buf, 8)?;
    Ok(buf.get_i64())
}

pub fn read_u64(buf: &mut BytesMut) -> CodecResult<u64> {
    ensure(buf, 8)?;
    Ok(buf.get_u64())
}

pub fn read_f32(buf: &mut BytesMut) -> CodecResult<f32> {
    ensure(buf, 4)?;
    Ok(buf.get_f32())
}

pub fn read_f64(buf: &mut BytesMut) -> CodecResult<f64> {
    ensure(buf, 8)?;
    Ok(buf.get_f64())
}

/// Take exactly `len` bytes.
pub fn read_bytes(buf: &mut BytesMut, len: usize) -> CodecResult<BytesMut> {
    ensure(buf, len)?;
    Ok(buf.split_to(len))
}

/// Read a VarInt from the buffer.
pub fn read_varint(buf: &mut BytesMut) -> CodecResult<i32> {
    let mut result: i32 = 0;
    let mut shift: u32 = 0;
    loop {
        if !buf.has_remaining() {
            return Err(CodecError::NotEnoughData);
        }
        let byte = buf.get_u8();
        result |= ((byte & 0x7F) as i32) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 32 {
            return Err(CodecError::VarIntTooBig);
        }
    }
}

/// Write a VarInt to the buffer.
pub fn write_varint(buf: &mut BytesMut, mut value: i32) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value = ((value as u32) >> 7) as i32;
        if value != 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

/// Calculate the byte length of a VarInt.
pub fn varint_len(value: i32) -> usize {
    let mut val = value as u32;
    let mut len = 0;
    loop {
        len += 1;
        val >>= 7;
        if val == 0 {
            break;
        }
    }
    len
}

/// Read a VarInt-prefixed UTF-8 string.
pub fn read_string(buf: &mut BytesMut, max_len: usize) -> CodecResult<String> {
    let len = read_varint(buf)?;
    if len < 0 {
        return Err(CodecError::InvalidValue(format!("negative string length {}", len)));
    }
    let len = len as usize;
    if len > max_len * 4 {
        return Err(CodecError::StringTooLong(len, max_len));
    }
    let bytes = read_bytes(buf, len)?;
    String::from_utf8(bytes.to_vec()).map_err(|e| CodecError::InvalidString(e.to_string()))
}

/// Write a VarInt-prefixed UTF-8 string.
pub fn write_string(buf: &mut BytesMut, s: &str) {
    write_varint(buf, s.len() as i32);
    buf.put_slice(s.as_bytes());
}

/// Read a u16 byte-length-prefixed UTF-8 string.
pub fn read_short_string(buf: &mut BytesMut, max_len: usize) -> CodecResult<String> {
    let len = read_u16(buf)? as usize;
    if len > max_len * 4 {
        return Err(CodecError::StringTooLong(len, max_len));
    }
    let bytes = read_bytes(buf, len)?;
    String::from_utf8(bytes.to_vec()).map_err(|e| CodecError::InvalidString(e.to_string()))
}

pub fn write_short_string(buf: &mut BytesMut, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(u16::MAX as usize);
    buf.put_u16(len as u16);
    buf.put_slice(&bytes[..len]);
}

/// Read a u16 char-count-prefixed UTF-16BE string.
pub fn read_string16(buf: &mut BytesMut, max_chars: usize) -> CodecResult<String> {
    let count = read_u16(buf)? as usize;
    if count > max_chars {
        return Err(CodecError::StringTooLong(count, max_chars));
    }
    ensure(buf, count * 2)?;
    let units: Vec<u16> = (0..count).map(|_| buf.get_u16()).collect();
    String::from_utf16(&units).map_err(|e| CodecError::InvalidString(e.to_string()))
}

pub fn write_string16(buf: &mut BytesMut, s: &str) {
    let units: Vec<u16> = s.encode_utf16().take(u16::MAX as usize).collect();
    buf.put_u16(units.len() as u16);
    for unit in units {
        buf.put_u16(unit);
    }
}

/// Read a fixed 64-byte, space-padded ASCII string.
pub fn read_classic_string(buf: &mut BytesMut) -> CodecResult<String> {
    let bytes = read_bytes(buf, CLASSIC_STRING_LEN)?;
    let text: String = bytes
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { '?' })
        .collect();
    Ok(text.trim_end_matches(' ').to_string())
}

/// Write a fixed 64-byte string, truncating and padding with spaces.
pub fn write_classic_string(buf: &mut BytesMut, s: &str) {
    let mut written = 0;
    for c in s.chars().take(CLASSIC_STRING_LEN) {
        buf.put_u8(if c.is_ascii() { c as u8 } else { b'?' });
        written += 1;
    }
    for _ in written..CLASSIC_STRING_LEN {
        buf.put_u8(b' ');
    }
}

/// Hex rendering of at most `limit` bytes, for logging malformed input.
pub fn hex_dump(data: &[u8], limit: usize) -> String {
    let mut out = String::with_capacity(data.len().min(limit) * 3);
    for (i, byte) in data.iter().take(limit).enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02x}", byte);
    }
    if data.len() > limit {
        let _ = write!(out, " ... ({} bytes)", data.len());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_roundtrip() {
        let values = [0, 1, 127, 128, 255, 25565, 2097151, 2147483647, -1, -2147483648];
        for &val in &values {
            let mut buf = BytesMut::new();
            write_varint(&mut buf, val);
            assert_eq!(buf.len(), varint_len(val));
            let decoded = read_varint(&mut buf).unwrap();
            assert_eq!(val, decoded, "VarInt roundtrip failed for {}", val);
        }
    }

    #[test]
    fn test_varint_too_big() {
        let mut buf = BytesMut::from(&[0xff, 0xff, 0xff, 0xff, 0xff, 0x01][..]);
        assert!(matches!(read_varint(&mut buf), Err(CodecError::VarIntTooBig)));
    }

    #[test]
    fn test_checked_reads_report_short_input() {
        let mut buf = BytesMut::from(&[0x01, 0x02, 0x03][..]);
        assert!(matches!(read_i32(&mut buf), Err(CodecError::NotEnoughData)));
        assert!(matches!(read_bytes(&mut buf, 4), Err(CodecError::NotEnoughData)));
        assert_eq!(read_u16(&mut buf).unwrap(), 0x0102);
        assert_eq!(read_u8(&mut buf).unwrap(), 0x03);
        assert!(matches!(read_bool(&mut buf), Err(CodecError::NotEnoughData)));
    }

    #[test]
    fn test_string_roundtrip() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "Hello, Minecraft!");
        let decoded = read_string(&mut buf, 32767).unwrap();
        assert_eq!(decoded, "Hello, Minecraft!");
    }

    #[test]
    fn test_short_string() {
        let mut buf = BytesMut::new();
        write_short_string(&mut buf, "Notch");
        assert_eq!(&buf[..2], &[0x00, 0x05]);
        assert_eq!(read_short_string(&mut buf, 16).unwrap(), "Notch");
    }

    #[test]
    fn test_string16() {
        let mut buf = BytesMut::new();
        write_string16(&mut buf, "hé");
        assert_eq!(&buf[..], &[0x00, 0x02, 0x00, b'h', 0x00, 0xe9]);
        assert_eq!(read_string16(&mut buf, 16).unwrap(), "hé");

        let mut buf = BytesMut::new();
        write_string16(&mut buf, "toolongname");
        assert!(matches!(
            read_string16(&mut buf, 4),
            Err(CodecError::StringTooLong(11, 4))
        ));
    }

    #[test]
    fn test_classic_string_pads_and_trims() {
        let mut buf = BytesMut::new();
        write_classic_string(&mut buf, "Notch");
        assert_eq!(buf.len(), CLASSIC_STRING_LEN);
        assert_eq!(buf[5], b' ');
        assert_eq!(read_classic_string(&mut buf).unwrap(), "Notch");

        let mut buf = BytesMut::new();
        write_classic_string(&mut buf, &"x".repeat(80));
        assert_eq!(buf.len(), CLASSIC_STRING_LEN);
    }

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(&[0x00, 0xab, 0x10], 8), "00 ab 10");
        assert_eq!(hex_dump(&[1, 2, 3, 4], 2), "01 02 ... (4 bytes)");
    }
}

//! WBXML global tokens and header constants.

/// Change the active code page; followed by one page byte.
pub const SWITCH_PAGE: u8 = 0x00;
/// Close the innermost element or attribute list.
pub const END: u8 = 0x01;
/// Character entity; followed by an mb_u_int32 code point.
pub const ENTITY: u8 = 0x02;
/// Inline NUL-terminated string.
pub const STR_I: u8 = 0x03;
/// Unknown tag or attribute name, indexed into the string table.
pub const LITERAL: u8 = 0x04;
/// Inline string extension 0.
pub const EXT_I_0: u8 = 0x40;
/// Inline string extension 1.
pub const EXT_I_1: u8 = 0x41;
/// Inline string extension 2.
pub const EXT_I_2: u8 = 0x42;
/// Processing instruction.
pub const PI: u8 = 0x43;
/// Literal tag with content.
pub const LITERAL_C: u8 = 0x44;
/// String table extension 0.
pub const EXT_T_0: u8 = 0x80;
/// String table extension 1.
pub const EXT_T_1: u8 = 0x81;
/// String table extension 2.
pub const EXT_T_2: u8 = 0x82;
/// String table reference.
pub const STR_T: u8 = 0x83;
/// Literal tag with attributes.
pub const LITERAL_A: u8 = 0x84;
/// Single-byte extension 0.
pub const EXT_0: u8 = 0xc0;
/// Single-byte extension 1.
pub const EXT_1: u8 = 0xc1;
/// Single-byte extension 2.
pub const EXT_2: u8 = 0xc2;
/// Opaque data; followed by an mb_u_int32 length and the bytes.
pub const OPAQUE: u8 = 0xc3;
/// Literal tag with attributes and content.
pub const LITERAL_AC: u8 = 0xc4;

/// Tag byte flag: element has content and is closed by `END`.
pub const TAG_CONTENT: u8 = 0x40;
/// Tag byte flag: element carries an attribute list closed by `END`.
pub const TAG_ATTRIBUTES: u8 = 0x80;
/// Mask for the token part of a tag byte.
pub const TAG_MASK: u8 = 0x3f;

/// WBXML version 1.3.
pub const VERSION_1_3: u8 = 0x03;
/// Public identifier "unknown or missing", the value ActiveSync sends.
pub const PUBLIC_ID_UNKNOWN: u32 = 0x01;
/// IANA MIBenum for UTF-8.
pub const CHARSET_UTF8: u32 = 0x6a;

/// Header written by the encoder: version 1.3, unknown public id, UTF-8,
/// empty string table.
pub const HEADER: [u8; 4] = [VERSION_1_3, 0x01, 0x6a, 0x00];

/// Longest legal mb_u_int32 encoding.
pub const MAX_MB_UINT_LEN: usize = 5;

/// Append `value` as a big-endian base-128 multi-byte integer.
pub fn write_mb_u_int32(buffer: &mut Vec<u8>, value: u32) {
    let mut tmp = [0u8; MAX_MB_UINT_LEN];
    let mut idx = MAX_MB_UINT_LEN;
    let mut v = value;
    loop {
        idx -= 1;
        #[allow(clippy::cast_possible_truncation)]
        let low = (v & 0x7f) as u8;
        tmp[idx] = if idx == MAX_MB_UINT_LEN - 1 { low } else { low | 0x80 };
        v >>= 7;
        if v == 0 {
            break;
        }
    }
    buffer.extend_from_slice(&tmp[idx..]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mb(value: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        write_mb_u_int32(&mut buf, value);
        buf
    }

    #[test]
    fn mb_u_int32_known_encodings() {
        assert_eq!(mb(0), vec![0x00]);
        assert_eq!(mb(0x7f), vec![0x7f]);
        assert_eq!(mb(0x80), vec![0x81, 0x00]);
        assert_eq!(mb(0xa0), vec![0x81, 0x20]);
        assert_eq!(mb(100_000), vec![0x86, 0x8d, 0x20]);
        assert_eq!(mb(u32::MAX), vec![0x8f, 0xff, 0xff, 0xff, 0x7f]);
    }
}

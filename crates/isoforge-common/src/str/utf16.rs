use crate::types::{endian::{Endian, LittleEndian}, number::U16};

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FixedUtf16Str<const N: usize> {
    data: [U16<LittleEndian>; N],
}

impl<const N: usize> FixedUtf16Str<N> {
    pub fn to_string(&self) -> Result<String, core::char::DecodeUtf16Error> {
        char::decode_utf16(self.data.iter().map(|c| c.get())).collect()
    }
}

unsafe impl<const N: usize> bytemuck::Pod for FixedUtf16Str<N> {}
unsafe impl<const N: usize> bytemuck::Zeroable for FixedUtf16Str<N> {}

/// Encodes `s` as big-endian UTF-16 code units, the byte order Joliet names
/// and the supplementary volume descriptor's fixed-width fields both use.
///
/// Characters outside the Basic Multilingual Plane are encoded as surrogate
/// pairs, each pair counting as two code units toward a name's length limit.
pub fn encode_utf16_be(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() * 2);
    for unit in s.encode_utf16() {
        out.extend_from_slice(&unit.to_be_bytes());
    }
    out
}

/// Decodes a big-endian UTF-16 byte buffer back into a `String`, replacing
/// unpaired surrogates with U+FFFD.
pub fn decode_utf16_be(bytes: &[u8]) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_ascii() {
        let bytes = encode_utf16_be("HELLO");
        assert_eq!(decode_utf16_be(&bytes), "HELLO");
    }

    #[test]
    fn round_trips_non_bmp() {
        let bytes = encode_utf16_be("a\u{1F600}b");
        assert_eq!(decode_utf16_be(&bytes), "a\u{1F600}b");
    }
}

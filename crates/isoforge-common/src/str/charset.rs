//! The fixed character sets ECMA-119 names are drawn from, plus the
//! space-padded fixed- and variable-length string types built on top of them.
//!
//! Every projection tree (primary, Joliet, 1999) validates and pads
//! identifiers through one of these before a directory record or path-table
//! entry is ever built, so the charset rules live here rather than in any one
//! writer.

use core::marker::PhantomData;

/// A character set an ISO 9660 identifier may be validated against.
pub trait Charset: Copy + PartialEq + Eq {
    fn is_valid(chars: &[u8]) -> bool;
}

/// The `a-characters` set: `A-Z`, `0-9`, and a fixed run of punctuation.
/// Used for the volume/publisher/preparer identifiers in the volume descriptor.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct CharsetA;

/// The `d-characters` set: `A-Z`, `0-9`, and `_`. Used for directory
/// identifiers and the numeric fields of the date/time records.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct CharsetD;

/// `d-characters` plus `.` and `;`, i.e. the set a primary-tree file
/// identifier (including its dot and version suffix) is drawn from.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct CharsetFile;

impl Charset for CharsetA {
    fn is_valid(chars: &[u8]) -> bool {
        const VALID_SYMBOLS: &[u8] = b"!\"%$'()*+,-./:;<=>?";
        chars
            .iter()
            .all(|c| c.is_ascii_alphanumeric() || VALID_SYMBOLS.contains(c))
    }
}

impl Charset for CharsetD {
    fn is_valid(chars: &[u8]) -> bool {
        const SPECIAL_CHARS: &[u8] = b"0123456789_";
        chars
            .iter()
            .all(|c| c.is_ascii_uppercase() || SPECIAL_CHARS.contains(c))
    }
}

impl Charset for CharsetFile {
    fn is_valid(chars: &[u8]) -> bool {
        const SPECIAL_CHARS: &[u8] = b"._;";
        chars
            .iter()
            .all(|c| c.is_ascii_alphanumeric() || SPECIAL_CHARS.contains(c))
    }
}

/// A space-padded string with a compile-time-fixed length `N`, used for the
/// fixed-width fields of a volume descriptor (e.g. the 32-byte volume id).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IsoStr<C: Charset, const N: usize> {
    chars: [u8; N],
    _marker: PhantomData<C>,
}

unsafe impl<C: Charset, const N: usize> bytemuck::Zeroable for IsoStr<C, N> {}
unsafe impl<C: Charset + 'static, const N: usize> bytemuck::Pod for IsoStr<C, N> {}

impl<C: Charset, const N: usize> IsoStr<C, N> {
    pub fn empty() -> Self {
        Self {
            chars: [b' '; N],
            _marker: PhantomData,
        }
    }

    pub fn max_len() -> usize {
        N
    }

    pub fn len(&self) -> usize {
        self.chars.iter().position(|&c| c == b' ').unwrap_or(N)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn from_bytes_exact(bytes: [u8; N]) -> Self {
        Self {
            chars: bytes,
            _marker: PhantomData,
        }
    }

    /// Validates, left-justifies, and space-pads `s` into a fixed-width
    /// identifier. Fails if `s` is too long or contains characters outside `C`.
    pub fn from_str(s: &str) -> Result<Self, CharsetError> {
        if s.len() > N {
            return Err(CharsetError::TooLong {
                len: s.len(),
                max: N,
            });
        }
        if !C::is_valid(s.as_bytes()) {
            return Err(CharsetError::InvalidChar);
        }
        let mut chars = [b' '; N];
        chars[..s.len()].copy_from_slice(s.as_bytes());
        Ok(Self {
            chars,
            _marker: PhantomData,
        })
    }

    pub fn to_str(&self) -> &str {
        // SAFETY: every constructor validates against an ASCII-only charset.
        unsafe { core::str::from_utf8_unchecked(&self.chars[..self.len()]) }
    }
}

impl<C: Charset, const N: usize> core::fmt::Display for IsoStr<C, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl<C: Charset, const N: usize> core::fmt::Debug for IsoStr<C, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "\"{}\"", self.to_str())
    }
}

/// A heap-allocated, variable-length counterpart to [`IsoStr`], used for file
/// and directory identifiers whose length is bounded only by the
/// interchange level, not by a fixed struct field.
#[derive(Clone, PartialEq, Eq)]
pub struct IsoString<C: Charset> {
    pub(crate) chars: Vec<u8>,
    _marker: PhantomData<C>,
}

impl<C: Charset> From<Vec<u8>> for IsoString<C> {
    fn from(chars: Vec<u8>) -> Self {
        Self {
            chars,
            _marker: PhantomData,
        }
    }
}

impl<C: Charset> IsoString<C> {
    pub const fn empty() -> Self {
        Self {
            chars: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn with_size(size: usize) -> Self {
        Self {
            chars: vec![b' '; size],
            _marker: PhantomData,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            chars: bytes.to_vec(),
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.chars
    }

    pub fn as_str(&self) -> &str {
        if self.chars.len() == 1 {
            match self.chars[0] {
                b'\x00' => return "\u{0}",
                b'\x01' => return "\u{1}",
                _ => {}
            }
        }
        // SAFETY: constructed only from validated ASCII bytes.
        unsafe { core::str::from_utf8_unchecked(&self.chars) }
    }
}

impl<C: Charset> core::fmt::Display for IsoString<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl<C: Charset> core::fmt::Debug for IsoString<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "\"{}\"", self.as_str())
    }
}

pub type IsoStrA<const N: usize> = IsoStr<CharsetA, N>;
pub type IsoStrD<const N: usize> = IsoStr<CharsetD, N>;
pub type IsoStringFile = IsoString<CharsetFile>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CharsetError {
    #[error("identifier is {len} characters, longer than the {max}-character limit")]
    TooLong { len: usize, max: usize },
    #[error("identifier contains a character outside the allowed charset")]
    InvalidChar,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_and_trims() {
        let s = IsoStrA::<8>::from_str("ABC").unwrap();
        assert_eq!(s.to_str(), "ABC");
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn rejects_too_long() {
        assert!(matches!(
            IsoStrD::<4>::from_str("ABCDE"),
            Err(CharsetError::TooLong { .. })
        ));
    }

    #[test]
    fn rejects_invalid_char() {
        assert!(matches!(
            IsoStrD::<8>::from_str("abc"),
            Err(CharsetError::InvalidChar)
        ));
    }
}

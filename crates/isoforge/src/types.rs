//! Fixed-width identifier strings, date/time encodings, and the
//! little-endian/big-endian paired integers ECMA-119 mandates throughout the
//! volume descriptor and directory record structures.

pub use isoforge_common::str::{
    Charset, CharsetA, CharsetD, CharsetFile, CharsetError, IsoStr, IsoStrA, IsoStrD,
    IsoString, IsoStringFile,
};
pub use isoforge_common::types::endian::*;
pub use isoforge_common::types::number::*;

use std::time::SystemTime;

/// A pair of the same integer encoded once little-endian, once big-endian, as
/// ECMA-119 §7.2/7.3 require for most 16- and 32-bit fields ("both-byte
/// orders").
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LsbMsb<T: Endian> {
    lsb: T::LsbType,
    msb: T::MsbType,
}

unsafe impl<T: Endian> bytemuck::Zeroable for LsbMsb<T> {}
unsafe impl<T: Endian + Copy + 'static> bytemuck::Pod for LsbMsb<T> {}

impl<T: Endian> LsbMsb<T> {
    pub fn new(value: T::Output) -> Self {
        Self {
            lsb: Endian::new(value),
            msb: Endian::new(value),
        }
    }

    pub fn read(&self) -> T::Output {
        #[cfg(target_endian = "little")]
        {
            self.lsb.get()
        }
        #[cfg(target_endian = "big")]
        {
            self.msb.get()
        }
    }

    pub fn write(&mut self, value: T::Output) {
        self.lsb.set(value);
        self.msb.set(value);
    }

    pub fn set(&mut self, value: T::Output) {
        self.write(value);
    }

    pub fn get(&self) -> T::Output {
        self.read()
    }
}

pub type U16LsbMsb = LsbMsb<U16<LittleEndian>>;
pub type U32LsbMsb = LsbMsb<U32<LittleEndian>>;
pub type U64LsbMsb = LsbMsb<U64<LittleEndian>>;

/// The 17-byte "dec-datetime" used by volume descriptors (ECMA-119 §8.4.26.1):
/// four-digit year, then seven 2-digit decimal fields, then a GMT offset.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DecDateTime {
    pub year: IsoStrD<4>,
    pub month: IsoStrD<2>,
    pub day: IsoStrD<2>,
    pub hour: IsoStrD<2>,
    pub minute: IsoStrD<2>,
    pub second: IsoStrD<2>,
    pub hundredths: IsoStrD<2>,
    pub timezone: u8,
}

impl core::fmt::Debug for DecDateTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecDateTime")
            .field(
                "date",
                &format!("{}-{}-{}", self.year, self.month, self.day),
            )
            .field(
                "time",
                &format!(
                    "{}:{}:{}.{:.3}",
                    self.hour, self.minute, self.second, self.hundredths
                ),
            )
            .field("timezone", &self.timezone)
            .finish_non_exhaustive()
    }
}

impl DecDateTime {
    /// An all-zero dec-datetime, meaning "not specified" per ECMA-119 §8.4.26.1.
    pub fn unspecified() -> Self {
        Self {
            year: IsoStrD::from_str("0000").unwrap(),
            month: IsoStrD::from_str("00").unwrap(),
            day: IsoStrD::from_str("00").unwrap(),
            hour: IsoStrD::from_str("00").unwrap(),
            minute: IsoStrD::from_str("00").unwrap(),
            second: IsoStrD::from_str("00").unwrap(),
            hundredths: IsoStrD::from_str("00").unwrap(),
            timezone: 0,
        }
    }

    pub fn now() -> Self {
        use chrono::{DateTime, Datelike, Timelike, Utc};
        let now: DateTime<Utc> = SystemTime::now().into();
        Self::from_chrono(&now)
    }

    pub fn from_chrono(now: &chrono::DateTime<chrono::Utc>) -> Self {
        use chrono::{Datelike, Timelike};
        Self {
            year: IsoStrD::from_str(&format!("{:04}", now.year())).unwrap(),
            month: IsoStrD::from_str(&format!("{:02}", now.month())).unwrap(),
            day: IsoStrD::from_str(&format!("{:02}", now.day())).unwrap(),
            hour: IsoStrD::from_str(&format!("{:02}", now.hour())).unwrap(),
            minute: IsoStrD::from_str(&format!("{:02}", now.minute())).unwrap(),
            second: IsoStrD::from_str(&format!("{:02}", now.second())).unwrap(),
            hundredths: IsoStrD::from_str(&format!("{:02}", now.nanosecond() / 10_000_000))
                .unwrap(),
            timezone: 0,
        }
    }
}

/// The `iso-level` option: which interchange level governs primary-tree
/// identifier length and extent-splitting rules.
///
/// L1 is the classic 8.3 format with contiguous files, L2 allows 30-character
/// identifiers, L3 additionally allows files split across multiple extents.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileInterchange {
    L1 = 1,
    L2 = 2,
    L3 = 3,
    /// Not a conformant level: allows up to 32 characters with no enforced
    /// dot or version suffix. Used by `allow-full-ascii`-style relaxations.
    NonConformant = 255,
}

impl FileInterchange {
    /// Applies name translation + version suffix (projection-tree steps 1-2)
    /// for the primary tree under this interchange level.
    pub fn from_str(&self, s: &str) -> Result<IsoStringFile, CharsetError> {
        match self {
            FileInterchange::L1 => {
                let (base, ext) = s.split_once('.').unwrap_or((s, ""));
                if base.len() > 8 {
                    return Err(CharsetError::TooLong {
                        len: base.len(),
                        max: 8,
                    });
                }
                if ext.len() > 3 {
                    return Err(CharsetError::TooLong {
                        len: ext.len(),
                        max: 3,
                    });
                }
                let mut bytes = Vec::with_capacity(base.len() + ext.len() + 3);
                bytes.extend_from_slice(base.as_bytes());
                bytes.push(b'.');
                bytes.extend_from_slice(ext.as_bytes());
                bytes.extend_from_slice(b";1");
                Ok(bytes.into())
            }
            FileInterchange::L2 | FileInterchange::L3 => {
                if s.len() > 30 {
                    return Err(CharsetError::TooLong {
                        len: s.len(),
                        max: 30,
                    });
                }
                let mut bytes = s.as_bytes().to_vec();
                bytes.extend_from_slice(b";1");
                Ok(bytes.into())
            }
            FileInterchange::NonConformant => {
                if s.len() > 32 {
                    return Err(CharsetError::TooLong {
                        len: s.len(),
                        max: 32,
                    });
                }
                Ok(IsoStringFile::from_bytes(s.as_bytes()))
            }
        }
    }

    /// Strips the version suffix back off a primary-tree identifier,
    /// recovering the original logical name.
    pub fn original(&self, s: &IsoStringFile) -> String {
        let mut out = String::new();
        for &c in s.bytes() {
            if c == b';' {
                break;
            }
            out.push(c as char);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level1_adds_version_suffix() {
        let name = FileInterchange::L1.from_str("HELLO.TXT").unwrap();
        assert_eq!(name.as_str(), "HELLO.TXT;1");
    }

    #[test]
    fn level1_rejects_long_stem() {
        assert!(FileInterchange::L1.from_str("TOOLONGNAME.TXT").is_err());
    }

    #[test]
    fn original_strips_version() {
        let name = FileInterchange::L1.from_str("HELLO.TXT").unwrap();
        assert_eq!(FileInterchange::L1.original(&name), "HELLO.TXT");
    }
}

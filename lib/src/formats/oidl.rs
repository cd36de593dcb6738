//! oiDL: string/data list container (§4.D, §6), grounded in the layout
//! `CAFile_write` builds its embedded name table with (`original_source/
//! src/formats/oiCA/write.c`) and in §6's flag bit assignments.

use crate::error::{OxcError, Result};
use crate::formats::DataSizeType;
use crate::hash;
use crate::macros::bitflags_like;

pub const MAGIC: u32 = 0x4C44_696F; // "oiDL"
const VERSION: u8 = 1;

bitflags_like! {
    /// `EDLSettingsFlags` (§6): `HideMagicNumber=1`, `IsUTF8=2`,
    /// `IsTightlyPacked=4`.
    pub struct DlFlags: u8 {
        const HIDE_MAGIC_NUMBER = 0x1;
        const IS_UTF8 = 0x2;
        const IS_TIGHTLY_PACKED = 0x4;
        const USE_SHA256 = 0x8;
        /// Not in §6's bit table (which only names the three low bits plus
        /// "rest reserved"); needed so `read` can tell a raw-data file from
        /// an ASCII one instead of guessing from `IS_UTF8` alone.
        const IS_DATA = 0x10;
    }
}

/// How the entries of a [`DlFile`] are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlDataType {
    Ascii,
    Utf8,
    Data,
}

/// One entry of a [`DlFile`]: either a string or a raw byte blob, depending
/// on the file's `data_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DlEntry {
    Text(String),
    Data(Vec<u8>),
}

impl DlEntry {
    fn as_bytes(&self) -> &[u8] {
        match self {
            DlEntry::Text(s) => s.as_bytes(),
            DlEntry::Data(d) => d,
        }
    }
}

/// Caller-supplied writer configuration. Mirrors `DLSettings` in the
/// original: a plain struct the caller fills in, not global state.
#[derive(Debug, Clone, Copy, Default)]
pub struct DlSettings {
    pub hide_magic_number: bool,
    pub force_utf8: bool,
    pub use_sha256: bool,
}

/// A parsed or in-construction oiDL file.
#[derive(Debug, Clone, Default)]
pub struct DlFile {
    pub data_type: Option<DlDataType>,
    pub entries: Vec<DlEntry>,
}

impl DlFile {
    pub fn new() -> Self {
        DlFile::default()
    }

    /// Appends one text entry (ASCII or UTF-8; the file's overall
    /// `data_type` is only decided at write time).
    pub fn add_entry_ascii(&mut self, s: impl Into<String>) {
        self.entries.push(DlEntry::Text(s.into()));
    }

    pub fn add_entry_data(&mut self, bytes: impl Into<Vec<u8>>) {
        self.entries.push(DlEntry::Data(bytes.into()));
    }

    fn resolved_data_type(&self, settings: &DlSettings) -> DlDataType {
        if let Some(dt) = self.data_type {
            return dt;
        }
        if self.entries.iter().any(|e| matches!(e, DlEntry::Data(_))) {
            return DlDataType::Data;
        }
        let all_ascii = self
            .entries
            .iter()
            .all(|e| crate::buffer::is_ascii(e.as_bytes(), 0.0));
        if all_ascii && !settings.force_utf8 {
            DlDataType::Ascii
        } else {
            DlDataType::Utf8
        }
    }

    /// Encodes this file per §4.D's write algorithm.
    pub fn write(&self, settings: &DlSettings) -> Result<Vec<u8>> {
        let data_type = self.resolved_data_type(settings);

        let longest = self.entries.iter().map(|e| e.as_bytes().len() as u64).max().unwrap_or(0);
        let size_type = DataSizeType::smallest_fitting(longest);
        let count_type = DataSizeType::smallest_fitting(self.entries.len() as u64);

        let mut flags = DlFlags::empty();
        if settings.hide_magic_number {
            flags |= DlFlags::HIDE_MAGIC_NUMBER;
        }
        match data_type {
            DlDataType::Utf8 => flags |= DlFlags::IS_UTF8,
            DlDataType::Data => flags |= DlFlags::IS_DATA,
            DlDataType::Ascii => {}
        }
        if settings.use_sha256 {
            flags |= DlFlags::USE_SHA256;
        }

        let mut out = Vec::new();

        if !settings.hide_magic_number {
            out.extend_from_slice(&MAGIC.to_le_bytes());
        }

        out.push(VERSION);
        out.push(flags.bits());
        out.push((size_type.bits() << 2) | count_type.bits());

        count_type.write(self.entries.len() as u64, &mut out)?;

        for entry in &self.entries {
            size_type.write(entry.as_bytes().len() as u64, &mut out)?;
        }

        let hash_offset = if settings.use_sha256 {
            let offset = out.len();
            out.extend_from_slice(&[0u8; 32]);
            Some(offset)
        } else {
            None
        };

        let body_start = out.len();
        for entry in &self.entries {
            out.extend_from_slice(entry.as_bytes());
        }

        if let Some(offset) = hash_offset {
            let digest = hash::sha256(&out[body_start..]);
            for (i, word) in digest.iter().enumerate() {
                out[offset + i * 4..offset + i * 4 + 4].copy_from_slice(&word.to_be_bytes());
            }
        }

        Ok(out)
    }

    /// Decodes an oiDL file, requiring that `buf` contain exactly one
    /// encoded file and nothing past it.
    pub fn read(buf: &[u8], expect_magic: bool) -> Result<Self> {
        let (file, consumed) = Self::read_prefix(buf, expect_magic)?;
        if consumed != buf.len() {
            return Err(OxcError::InvalidState(
                "leftover bytes after last oiDL entry".to_string(),
            ));
        }
        Ok(file)
    }

    /// Decodes an oiDL file that may be embedded inside a larger buffer
    /// (e.g. oiCA's name table), returning the number of bytes consumed so
    /// the caller can continue reading right after it.
    /// `expected_magic` is false when the caller already knows the magic was
    /// hidden (e.g. oiCA's embedded table).
    pub fn read_prefix(buf: &[u8], expect_magic: bool) -> Result<(Self, usize)> {
        let mut cursor = buf;

        if expect_magic {
            if cursor.len() < 4 {
                return Err(OxcError::out_of_bounds("DlFile::read magic", 4, cursor.len() as u64));
            }
            let (magic_bytes, rest) = cursor.split_at(4);
            let magic = u32::from_le_bytes(magic_bytes.try_into().unwrap());
            if magic != MAGIC {
                return Err(OxcError::InvalidParameter("oiDL magic mismatch".to_string()));
            }
            cursor = rest;
        }

        if cursor.len() < 3 {
            return Err(OxcError::out_of_bounds("DlFile::read header", 3, cursor.len() as u64));
        }

        let version = cursor[0];
        if version != VERSION {
            return Err(OxcError::InvalidParameter(format!(
                "unsupported oiDL version {version}"
            )));
        }

        let flags = DlFlags::from_bits_truncate(cursor[1]);
        let type_byte = cursor[2];
        if type_byte >> 4 != 0 {
            return Err(OxcError::UnsupportedOperation(
                "oiDL reserved compression bits set",
            ));
        }
        let size_type = DataSizeType::from_bits((type_byte >> 2) & 0x3)?;
        let count_type = DataSizeType::from_bits(type_byte & 0x3)?;
        cursor = &cursor[3..];

        let (count, rest) = count_type.read(cursor)?;
        cursor = rest;

        let mut lengths = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (len, rest) = size_type.read(cursor)?;
            lengths.push(len as usize);
            cursor = rest;
        }

        if flags.contains(DlFlags::USE_SHA256) {
            if cursor.len() < 32 {
                return Err(OxcError::out_of_bounds("DlFile::read hash", 32, cursor.len() as u64));
            }
            let (stored, rest) = cursor.split_at(32);
            let digest = hash::sha256(rest);
            let mut expected = [0u8; 32];
            for (i, word) in digest.iter().enumerate() {
                expected[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
            }
            if stored != expected {
                return Err(OxcError::AuthenticationFailed);
            }
            cursor = rest;
        }

        let data_type = if flags.contains(DlFlags::IS_DATA) {
            DlDataType::Data
        } else if flags.contains(DlFlags::IS_UTF8) {
            DlDataType::Utf8
        } else {
            DlDataType::Ascii
        };

        let mut entries = Vec::with_capacity(count as usize);
        for &len in &lengths {
            if cursor.len() < len {
                return Err(OxcError::out_of_bounds("DlFile::read entry", len as u64, cursor.len() as u64));
            }
            let (body, rest) = cursor.split_at(len);
            cursor = rest;

            let entry = match data_type {
                DlDataType::Data => DlEntry::Data(body.to_vec()),
                DlDataType::Ascii | DlDataType::Utf8 => {
                    let s = std::str::from_utf8(body)
                        .map_err(|_| OxcError::InvalidParameter("oiDL entry is not valid UTF-8".to_string()))?;
                    DlEntry::Text(s.to_string())
                }
            };
            entries.push(entry);
        }

        if count == 0 && !matches!(data_type, DlDataType::Data) {
            return Err(OxcError::InvalidState("oiDL has zero entries".to_string()));
        }

        let consumed = buf.len() - cursor.len();
        Ok((
            DlFile {
                data_type: Some(data_type),
                entries,
            },
            consumed,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_round_trip_s1() {
        let mut file = DlFile::new();
        file.add_entry_ascii("hello");
        file.add_entry_ascii("world");
        file.add_entry_ascii("");

        let settings = DlSettings::default();
        let encoded = file.write(&settings).unwrap();

        assert_eq!(&encoded[0..4], &[0x6F, 0x69, 0x44, 0x4C]);

        let decoded = DlFile::read(&encoded, true).unwrap();
        assert_eq!(decoded.entries.len(), 3);
        assert_eq!(decoded.entries[0], DlEntry::Text("hello".to_string()));
        assert_eq!(decoded.entries[1], DlEntry::Text("world".to_string()));
        assert_eq!(decoded.entries[2], DlEntry::Text("".to_string()));
    }

    #[test]
    fn hidden_magic_round_trips_when_caller_skips_it() {
        let mut file = DlFile::new();
        file.add_entry_ascii("a");
        file.add_entry_ascii("bb");

        let settings = DlSettings {
            hide_magic_number: true,
            ..Default::default()
        };
        let encoded = file.write(&settings).unwrap();
        assert_ne!(&encoded[0..4], &[0x6F, 0x69, 0x44, 0x4C]);

        let decoded = DlFile::read(&encoded, false).unwrap();
        assert_eq!(decoded.entries.len(), 2);
    }

    #[test]
    fn data_entries_round_trip() {
        let mut file = DlFile::new();
        file.add_entry_data(vec![1u8, 2, 3]);
        file.add_entry_data(vec![4u8, 5]);

        let encoded = file.write(&DlSettings::default()).unwrap();
        let decoded = DlFile::read(&encoded, true).unwrap();
        assert_eq!(decoded.entries[0], DlEntry::Data(vec![1, 2, 3]));
        assert_eq!(decoded.entries[1], DlEntry::Data(vec![4, 5]));
    }

    #[test]
    fn sha256_mismatch_is_rejected() {
        let mut file = DlFile::new();
        file.add_entry_ascii("hello");
        let settings = DlSettings {
            use_sha256: true,
            ..Default::default()
        };
        let mut encoded = file.write(&settings).unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(matches!(
            DlFile::read(&encoded, true),
            Err(OxcError::AuthenticationFailed)
        ));
    }

    #[test]
    fn reserved_compression_bits_are_rejected() {
        let mut file = DlFile::new();
        file.add_entry_ascii("x");
        let mut encoded = file.write(&DlSettings::default()).unwrap();
        encoded[6] |= 0x10; // type byte is at offset 4+2
        assert!(DlFile::read(&encoded, true).is_err());
    }
}

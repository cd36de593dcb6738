//! oiCA: directory + file archive built on top of an embedded oiDL name
//! table (§4.F, §6). Grounded in `original_source/src/formats/oiCA/
//! {write,read}.c` — entry sort order, parent resolution by backward scan,
//! and the MS-DOS date packing are line-for-line translations of that
//! file's intent.

use chrono::{Datelike, TimeZone, Timelike, Utc};
use unicase::UniCase;

use crate::aesgcm;
use crate::error::{OxcError, Result};
use crate::formats::oidl::{DlFile, DlSettings};
use crate::formats::DataSizeType;
use crate::macros::bitflags_like;

pub const MAGIC: u32 = 0x4143_696F; // "oiCA"
const VERSION: u8 = 0; // 1.0
const FILE_SIZE_TYPE_SHIFT: u8 = 6;

bitflags_like! {
    /// Header `flags` byte. Bits 6-7 hold the 2-bit `DataSizeType` log and
    /// are deliberately left undeclared here so `from_bits_truncate` strips
    /// them automatically.
    pub struct CaFlags: u8 {
        const USE_SHA256 = 0x1;
        const FILES_HAVE_DATE = 0x2;
        const FILES_HAVE_EXTENDED_DATE = 0x4;
        const FILES_COUNT_LONG = 0x8;
        const DIRECTORIES_COUNT_LONG = 0x10;
        const HAS_EXTENDED_DATA = 0x20;
    }
}

bitflags_like! {
    /// Caller-facing intent, translated into [`CaFlags`] at write time.
    pub struct CaSettingsFlags: u8 {
        const USE_SHA256 = 0x1;
        const INCLUDE_DATE = 0x2;
        const INCLUDE_FULL_DATE = 0x4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionType {
    None,
    Aes256Gcm,
}

/// Caller-supplied writer configuration. Mirrors `CASettings`.
#[derive(Debug, Clone, Default)]
pub struct CaSettings {
    pub flags: CaSettingsFlags,
    pub encryption_type: EncryptionType,
    /// `None` with `encryption_type == Aes256Gcm` asks `write` to generate
    /// one and hand it back.
    pub encryption_key: Option<[u8; 32]>,
}

impl Default for EncryptionType {
    fn default() -> Self {
        EncryptionType::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveEntryKind {
    Directory,
    File,
}

/// One entry of an [`Archive`]: a directory (no data) or a file (data +
/// optional nanosecond timestamp).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: String,
    pub kind: ArchiveEntryKind,
    pub data: Vec<u8>,
    pub timestamp: u64,
}

/// A tree of directories and files, the in-memory counterpart of an oiCA
/// file's contents.
#[derive(Debug, Clone, Default)]
pub struct Archive {
    pub entries: Vec<ArchiveEntry>,
}

fn is_valid_path(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.ends_with('/')
        && !path.contains("//")
        && path.split('/').all(|part| part != "." && part != "..")
}

impl Archive {
    pub fn new() -> Self {
        Archive::default()
    }

    pub fn add_directory(&mut self, path: impl Into<String>) -> Result<()> {
        let path = path.into();
        if !is_valid_path(&path) {
            return Err(OxcError::InvalidParameter(format!(
                "Archive::add_directory invalid path {path:?}"
            )));
        }
        self.entries.push(ArchiveEntry {
            path,
            kind: ArchiveEntryKind::Directory,
            data: Vec::new(),
            timestamp: 0,
        });
        Ok(())
    }

    pub fn add_file(&mut self, path: impl Into<String>, data: Vec<u8>, timestamp: u64) -> Result<()> {
        let path = path.into();
        if !is_valid_path(&path) {
            return Err(OxcError::InvalidParameter(format!(
                "Archive::add_file invalid path {path:?}"
            )));
        }
        self.entries.push(ArchiveEntry {
            path,
            kind: ArchiveEntryKind::File,
            data,
            timestamp,
        });
        Ok(())
    }
}

fn base_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

fn parent_dir(path: &str) -> Option<&str> {
    path.rfind('/').map(|i| &path[..i])
}

/// `sortParentCountAndFileNames`: fewest path separators first, then
/// case-insensitive lexicographic order, so every parent directory sorts
/// before its children.
fn sort_key(path: &str) -> (usize, UniCase<String>) {
    (path.matches('/').count(), UniCase::new(path.to_string()))
}

/// `CAFile_storeDate`: packs a nanosecond timestamp into an MS-DOS
/// time/date pair. Fails for years outside `[1980, 1980+0x7F]`.
fn store_date(ns: u64) -> Option<(u16, u16)> {
    let dt = Utc.timestamp_opt((ns / 1_000_000_000) as i64, (ns % 1_000_000_000) as u32).single()?;
    let year = dt.year();
    if year < 1980 || year > 1980 + 0x7F {
        return None;
    }
    let time = ((dt.second() as u16) >> 1) | ((dt.minute() as u16) << 5) | ((dt.hour() as u16) << 11);
    let date = (dt.day() as u16) | ((dt.month() as u16) << 5) | (((year - 1980) as u16) << 9);
    Some((time, date))
}

/// `CAFile_loadDate`: the inverse of [`store_date`]. Per the MS-DOS date
/// robustness rule, any value that doesn't name a real date decodes to 0
/// rather than erroring.
fn load_date(time: u16, date: u16) -> u64 {
    let year = 1980 + (date >> 9) as i32;
    let month = ((date >> 5) & 0xF) as u32;
    let day = (date & 0x1F) as u32;
    let hour = (time >> 11) as u32;
    let minute = ((time >> 5) & 0x3F) as u32;
    let second = ((time & 0x1F) << 1) as u32;

    chrono::NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .and_then(|dt| dt.and_utc().timestamp_nanos_opt())
        .map(|ns| ns as u64)
        .unwrap_or(0)
}

/// Resolves the parent directory of `path` by scanning `sorted_dirs[..before]`
/// backwards for a case-insensitive match on the prefix up to the last `/`.
/// `before` is excluded, matching the original's "look back from ourselves"
/// rule: a directory can only be the child of something already emitted.
fn resolve_parent(sorted_dirs: &[&ArchiveEntry], path: &str, before: usize) -> Result<u16> {
    let Some(prefix) = parent_dir(path) else {
        return Ok(u16::MAX);
    };
    for j in (0..before).rev() {
        if UniCase::new(sorted_dirs[j].path.as_str()) == UniCase::new(prefix) {
            return Ok(j as u16);
        }
    }
    Err(OxcError::InvalidState(format!(
        "CaFile::write couldn't find parent directory of {path:?}"
    )))
}

/// Encodes `archive` per §4.F's write algorithm. Returns the encoded bytes
/// and, when encryption was requested without an explicit key, the
/// freshly-generated key.
pub fn write(archive: &Archive, settings: &CaSettings) -> Result<(Vec<u8>, Option<[u8; 32]>)> {
    let mut directories: Vec<&ArchiveEntry> = archive
        .entries
        .iter()
        .filter(|e| e.kind == ArchiveEntryKind::Directory)
        .collect();
    let mut files: Vec<&ArchiveEntry> = archive
        .entries
        .iter()
        .filter(|e| e.kind == ArchiveEntryKind::File)
        .collect();

    if directories.len() >= u16::MAX as usize {
        return Err(OxcError::out_of_bounds(
            "CaFile::write directories",
            directories.len() as u64,
            (u16::MAX - 1) as u64,
        ));
    }
    if files.len() >= u32::MAX as usize {
        return Err(OxcError::out_of_bounds(
            "CaFile::write files",
            files.len() as u64,
            (u32::MAX - 1) as u64,
        ));
    }

    directories.sort_by_key(|e| sort_key(&e.path));
    files.sort_by_key(|e| sort_key(&e.path));

    let dir_ref_size: u8 = if directories.len() <= 254 { 1 } else { 2 };
    let file_count_width: u8 = if files.len() <= 65534 { 2 } else { 4 };

    let biggest_file = files.iter().map(|f| f.data.len() as u64).max().unwrap_or(0);
    let size_type = DataSizeType::smallest_fitting(biggest_file);

    let mut dl = DlFile::new();
    for dir in &directories {
        dl.add_entry_ascii(base_name(&dir.path));
    }
    for file in &files {
        dl.add_entry_ascii(base_name(&file.path));
    }
    let dl_bytes = dl.write(&DlSettings { hide_magic_number: true, ..Default::default() })?;

    let mut flags = CaFlags::empty();
    if settings.flags.contains(CaSettingsFlags::USE_SHA256) {
        flags |= CaFlags::USE_SHA256;
    }
    if settings.flags.contains(CaSettingsFlags::INCLUDE_DATE) {
        flags |= CaFlags::FILES_HAVE_DATE;
    }
    if settings.flags.contains(CaSettingsFlags::INCLUDE_FULL_DATE) {
        flags |= CaFlags::FILES_HAVE_DATE | CaFlags::FILES_HAVE_EXTENDED_DATE;
    }
    if file_count_width == 4 {
        flags |= CaFlags::FILES_COUNT_LONG;
    }
    if dir_ref_size == 2 {
        flags |= CaFlags::DIRECTORIES_COUNT_LONG;
    }
    if flags.contains(CaFlags::USE_SHA256) {
        return Err(OxcError::UnsupportedOperation("oiCA SHA256 hashing not supported"));
    }

    let flags_byte = flags.bits() | (size_type.bits() << FILE_SIZE_TYPE_SHIFT);
    let encryption_bits = match settings.encryption_type {
        EncryptionType::None => 0u8,
        EncryptionType::Aes256Gcm => 1u8,
    };

    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC.to_le_bytes());
    out.push(VERSION);
    out.push(flags_byte);
    out.push(encryption_bits);
    out.push(0); // padding

    if file_count_width == 4 {
        out.extend_from_slice(&(files.len() as u32).to_le_bytes());
    } else {
        out.extend_from_slice(&(files.len() as u16).to_le_bytes());
    }
    if dir_ref_size == 2 {
        out.extend_from_slice(&(directories.len() as u16).to_le_bytes());
    } else {
        out.push(directories.len() as u8);
    }

    let header_len_ex_enc = out.len();

    let iv_tag_offset = if settings.encryption_type == EncryptionType::Aes256Gcm {
        let offset = out.len();
        out.extend_from_slice(&[0u8; aesgcm::IV_LEN + aesgcm::TAG_LEN]);
        Some(offset)
    } else {
        None
    };

    let body_start = out.len();
    out.extend_from_slice(&dl_bytes);

    for i in 0..directories.len() {
        let parent = resolve_parent(&directories, &directories[i].path, i)?;
        if dir_ref_size == 2 {
            out.extend_from_slice(&parent.to_le_bytes());
        } else {
            out.push(parent as u8);
        }
    }

    for file in &files {
        let parent = resolve_parent(&directories, &file.path, directories.len())?;
        if dir_ref_size == 2 {
            out.extend_from_slice(&parent.to_le_bytes());
        } else {
            out.push(parent as u8);
        }

        if flags.contains(CaFlags::FILES_HAVE_DATE) {
            if flags.contains(CaFlags::FILES_HAVE_EXTENDED_DATE) {
                out.extend_from_slice(&file.timestamp.to_le_bytes());
            } else {
                let (time, date) = store_date(file.timestamp).ok_or_else(|| {
                    OxcError::InvalidState(format!(
                        "CaFile::write couldn't store file date for {:?}, use IncludeFullDate instead",
                        file.path
                    ))
                })?;
                out.extend_from_slice(&date.to_le_bytes());
                out.extend_from_slice(&time.to_le_bytes());
            }
        }

        size_type.write(file.data.len() as u64, &mut out)?;
    }

    for file in &files {
        out.extend_from_slice(&file.data);
    }

    let mut generated_key = None;

    if let Some(slot) = iv_tag_offset {
        let key = match settings.encryption_key {
            Some(k) => k,
            None => {
                let k = aesgcm::generate_key()?;
                generated_key = Some(k);
                k
            }
        };
        let iv = aesgcm::generate_iv()?;

        let (header_and_slot, body) = out.split_at_mut(body_start);
        let tag = aesgcm::encrypt(&key, &iv, &header_and_slot[..header_len_ex_enc], body)?;

        out[slot..slot + aesgcm::IV_LEN].copy_from_slice(&iv);
        out[slot + aesgcm::IV_LEN..slot + aesgcm::IV_LEN + aesgcm::TAG_LEN].copy_from_slice(&tag);
    }

    Ok((out, generated_key))
}

/// Decodes an oiCA file per §4.F. `encryption_key` must be `Some` iff the
/// stored `type` byte says AES-256-GCM is in use.
pub fn read(buf: &[u8], encryption_key: Option<&[u8; 32]>) -> Result<(Archive, CaSettings)> {
    if buf.len() < 8 {
        return Err(OxcError::out_of_bounds("CaFile::read header", 8, buf.len() as u64));
    }

    let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    if magic != MAGIC {
        return Err(OxcError::InvalidParameter("oiCA magic mismatch".to_string()));
    }
    let version = buf[4];
    if version != VERSION {
        return Err(OxcError::InvalidParameter(format!("unsupported oiCA version {version}")));
    }
    let flags_byte = buf[5];
    let type_byte = buf[6];
    // buf[7] is padding.

    if type_byte >> 4 != 0 {
        return Err(OxcError::UnsupportedOperation("oiCA decompression not supported yet"));
    }
    let encryption_bits = type_byte & 0xF;
    if encryption_bits > 1 {
        return Err(OxcError::InvalidParameter("unsupported oiCA encryption type".to_string()));
    }
    let encryption_type = if encryption_bits == 1 {
        EncryptionType::Aes256Gcm
    } else {
        EncryptionType::None
    };

    if encryption_key.is_some() && encryption_type == EncryptionType::None {
        return Err(OxcError::InvalidOperation(
            "CaFile::read encryption key provided but encryption isn't used".to_string(),
        ));
    }
    if encryption_key.is_none() && encryption_type != EncryptionType::None {
        return Err(OxcError::Unauthorized(
            "CaFile::read encryption key is required if encryption is used".to_string(),
        ));
    }

    let flags = CaFlags::from_bits_truncate(flags_byte);
    if flags.contains(CaFlags::USE_SHA256) {
        return Err(OxcError::UnsupportedOperation("oiCA SHA256 hashing not supported"));
    }
    if flags.contains(CaFlags::HAS_EXTENDED_DATA) {
        return Err(OxcError::UnsupportedOperation("oiCA extended header data not supported"));
    }
    let size_type = DataSizeType::from_bits((flags_byte >> FILE_SIZE_TYPE_SHIFT) & 0x3)?;

    let mut cursor = &buf[8..];

    let file_count_width = if flags.contains(CaFlags::FILES_COUNT_LONG) { 4 } else { 2 };
    let (file_count, rest) = if file_count_width == 4 {
        if cursor.len() < 4 {
            return Err(OxcError::out_of_bounds("CaFile::read fileCount", 4, cursor.len() as u64));
        }
        let (head, tail) = cursor.split_at(4);
        (u32::from_le_bytes(head.try_into().unwrap()) as u64, tail)
    } else {
        if cursor.len() < 2 {
            return Err(OxcError::out_of_bounds("CaFile::read fileCount", 2, cursor.len() as u64));
        }
        let (head, tail) = cursor.split_at(2);
        (u16::from_le_bytes(head.try_into().unwrap()) as u64, tail)
    };
    cursor = rest;
    if file_count >= if file_count_width == 4 { u32::MAX as u64 } else { u16::MAX as u64 } {
        return Err(OxcError::InvalidParameter(
            "CaFile::read file count can't be the max bit value".to_string(),
        ));
    }

    let dir_ref_size = if flags.contains(CaFlags::DIRECTORIES_COUNT_LONG) { 2 } else { 1 };
    let (dir_count, rest) = if dir_ref_size == 2 {
        if cursor.len() < 2 {
            return Err(OxcError::out_of_bounds("CaFile::read dirCount", 2, cursor.len() as u64));
        }
        let (head, tail) = cursor.split_at(2);
        (u16::from_le_bytes(head.try_into().unwrap()), tail)
    } else {
        if cursor.is_empty() {
            return Err(OxcError::out_of_bounds("CaFile::read dirCount", 1, 0));
        }
        let (head, tail) = cursor.split_at(1);
        (head[0] as u16, tail)
    };
    cursor = rest;
    let dir_sentinel = if dir_ref_size == 2 { u16::MAX } else { u8::MAX as u16 };
    if dir_count >= dir_sentinel {
        return Err(OxcError::InvalidParameter(
            "CaFile::read directory count can't be the max bit value".to_string(),
        ));
    }

    let header_len_ex_enc = buf.len() - cursor.len();

    let body_owned;
    let body: &[u8] = if encryption_type == EncryptionType::Aes256Gcm {
        if cursor.len() < aesgcm::IV_LEN + aesgcm::TAG_LEN {
            return Err(OxcError::out_of_bounds(
                "CaFile::read iv+tag",
                (aesgcm::IV_LEN + aesgcm::TAG_LEN) as u64,
                cursor.len() as u64,
            ));
        }
        let iv: [u8; aesgcm::IV_LEN] = cursor[..aesgcm::IV_LEN].try_into().unwrap();
        let tag: [u8; aesgcm::TAG_LEN] =
            cursor[aesgcm::IV_LEN..aesgcm::IV_LEN + aesgcm::TAG_LEN].try_into().unwrap();
        let ciphertext = &cursor[aesgcm::IV_LEN + aesgcm::TAG_LEN..];

        let mut plain = ciphertext.to_vec();
        aesgcm::decrypt(encryption_key.unwrap(), &iv, &buf[..header_len_ex_enc], &mut plain, &tag)?;
        body_owned = plain;
        &body_owned
    } else {
        cursor
    };

    let (names, dl_len) = DlFile::read_prefix(body, false)?;
    if names.data_type != Some(crate::formats::oidl::DlDataType::Ascii) {
        return Err(OxcError::InvalidOperation(
            "CaFile::read embedded oiDL needs to be ascii".to_string(),
        ));
    }
    if names.entries.len() as u64 != file_count + dir_count as u64 {
        return Err(OxcError::InvalidState(
            "CaFile::read embedded oiDL has mismatching name count with file count".to_string(),
        ));
    }

    let mut cursor = &body[dl_len..];

    let has_date = flags.contains(CaFlags::FILES_HAVE_DATE);
    let has_extended_date = flags.contains(CaFlags::FILES_HAVE_EXTENDED_DATE);
    let date_stride: usize = if has_date {
        if has_extended_date {
            8
        } else {
            4
        }
    } else {
        0
    };
    let file_stride = dir_ref_size as usize + size_type.byte_width() + date_stride;
    let dir_stride = dir_ref_size as usize;

    let folder_size = dir_stride * dir_count as usize;
    let file_header_size = file_stride * file_count as usize;
    if cursor.len() < folder_size + file_header_size {
        return Err(OxcError::out_of_bounds(
            "CaFile::read directory+file records",
            (folder_size + file_header_size) as u64,
            cursor.len() as u64,
        ));
    }

    let mut archive = Archive::new();
    let root_dir_sentinel = dir_sentinel;

    let mut dir_paths: Vec<String> = Vec::with_capacity(dir_count as usize);
    for i in 0..dir_count as usize {
        let rec = &cursor[dir_stride * i..dir_stride * i + dir_stride];
        let parent = if dir_ref_size == 2 {
            u16::from_le_bytes([rec[0], rec[1]])
        } else {
            rec[0] as u16
        };

        let name = match &names.entries[i] {
            crate::formats::oidl::DlEntry::Text(s) => s.clone(),
            crate::formats::oidl::DlEntry::Data(_) => {
                return Err(OxcError::InvalidOperation(
                    "CaFile::read embedded oiDL entry should be text".to_string(),
                ));
            }
        };

        let path = if parent != root_dir_sentinel {
            if parent as usize >= i {
                return Err(OxcError::InvalidOperation(
                    "CaFile::read parent directory index of folder out of bounds".to_string(),
                ));
            }
            format!("{}/{}", dir_paths[parent as usize], name)
        } else {
            name
        };

        archive.add_directory(path.clone())?;
        dir_paths.push(path);
    }

    let file_records = &cursor[folder_size..folder_size + file_header_size];
    let body_after_headers = &cursor[folder_size + file_header_size..];
    cursor = body_after_headers;

    for i in 0..file_count as usize {
        let rec = &file_records[file_stride * i..file_stride * i + file_stride];
        let mut off = 0usize;

        let parent = if dir_ref_size == 2 {
            u16::from_le_bytes([rec[0], rec[1]])
        } else {
            rec[0] as u16
        };
        off += dir_stride;

        let name = match &names.entries[dir_count as usize + i] {
            crate::formats::oidl::DlEntry::Text(s) => s.clone(),
            crate::formats::oidl::DlEntry::Data(_) => {
                return Err(OxcError::InvalidOperation(
                    "CaFile::read embedded oiDL entry should be text".to_string(),
                ));
            }
        };

        let path = if parent != root_dir_sentinel {
            if parent as usize >= dir_count as usize {
                return Err(OxcError::InvalidOperation(
                    "CaFile::read parent directory index of file out of bounds".to_string(),
                ));
            }
            format!("{}/{}", dir_paths[parent as usize], name)
        } else {
            name
        };

        let mut timestamp = 0u64;
        if has_date {
            if has_extended_date {
                timestamp = u64::from_le_bytes(rec[off..off + 8].try_into().unwrap());
                off += 8;
            } else {
                let date = u16::from_le_bytes([rec[off], rec[off + 1]]);
                let time = u16::from_le_bytes([rec[off + 2], rec[off + 3]]);
                timestamp = load_date(time, date);
                off += 4;
            }
        }

        let (size, _) = size_type.read(&rec[off..])?;
        let size = size as usize;

        if cursor.len() < size {
            return Err(OxcError::out_of_bounds("CaFile::read file body", size as u64, cursor.len() as u64));
        }
        let (data, rest) = cursor.split_at(size);
        archive.add_file(path, data.to_vec(), timestamp)?;
        cursor = rest;
    }

    if !cursor.is_empty() {
        return Err(OxcError::InvalidState(
            "CaFile::read had leftover data after oiCA, this is illegal".to_string(),
        ));
    }

    let mut settings_flags = CaSettingsFlags::empty();
    if has_extended_date {
        settings_flags |= CaSettingsFlags::INCLUDE_FULL_DATE | CaSettingsFlags::INCLUDE_DATE;
    } else if has_date {
        settings_flags |= CaSettingsFlags::INCLUDE_DATE;
    }

    let settings = CaSettings {
        flags: settings_flags,
        encryption_type,
        encryption_key: None,
    };

    Ok((archive, settings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s4_encrypted_round_trip() {
        let mut archive = Archive::new();
        archive.add_file("readme.txt", b"hi".to_vec(), 1_704_067_200_000_000_000).unwrap();

        let settings = CaSettings {
            flags: CaSettingsFlags::INCLUDE_FULL_DATE,
            encryption_type: EncryptionType::Aes256Gcm,
            encryption_key: Some([0u8; 32]),
        };

        let (encoded, generated) = write(&archive, &settings).unwrap();
        assert!(generated.is_none());
        assert_ne!(&encoded[encoded.len() - 2..], b"hi");

        let (decoded, decoded_settings) = read(&encoded, Some(&[0u8; 32])).unwrap();
        assert_eq!(decoded.entries.len(), 1);
        assert_eq!(decoded.entries[0].path, "readme.txt");
        assert_eq!(decoded.entries[0].data, b"hi");
        assert_eq!(decoded.entries[0].timestamp, 1_704_067_200_000_000_000);
        assert_eq!(decoded_settings.encryption_type, EncryptionType::Aes256Gcm);

        let wrong_key = [1u8; 32];
        assert!(matches!(
            read(&encoded, Some(&wrong_key)),
            Err(OxcError::AuthenticationFailed)
        ));
    }

    #[test]
    fn plain_round_trip_with_directories() {
        let mut archive = Archive::new();
        archive.add_directory("assets").unwrap();
        archive.add_directory("assets/textures").unwrap();
        archive.add_file("assets/textures/a.png", vec![1, 2, 3], 0).unwrap();
        archive.add_file("top.txt", vec![9], 0).unwrap();

        let settings = CaSettings::default();
        let (encoded, generated) = write(&archive, &settings).unwrap();
        assert!(generated.is_none());

        let (decoded, _) = read(&encoded, None).unwrap();
        let mut paths: Vec<&str> = decoded.entries.iter().map(|e| e.path.as_str()).collect();
        paths.sort();
        assert_eq!(paths, vec!["assets", "assets/textures", "assets/textures/a.png", "top.txt"]);

        let file = decoded
            .entries
            .iter()
            .find(|e| e.path == "assets/textures/a.png")
            .unwrap();
        assert_eq!(file.data, vec![1, 2, 3]);
    }

    #[test]
    fn encryption_key_without_encryption_is_rejected() {
        let archive = Archive::new();
        let settings = CaSettings::default();
        let (encoded, _) = write(&archive, &settings).unwrap();
        assert!(matches!(read(&encoded, Some(&[0u8; 32])), Err(OxcError::InvalidOperation(_))));
    }

    #[test]
    fn missing_encryption_key_is_unauthorized() {
        let archive = Archive::new();
        let settings = CaSettings {
            encryption_type: EncryptionType::Aes256Gcm,
            encryption_key: Some([5u8; 32]),
            ..Default::default()
        };
        let (encoded, _) = write(&archive, &settings).unwrap();
        assert!(matches!(read(&encoded, None), Err(OxcError::Unauthorized(_))));
    }

    #[test]
    fn packed_date_round_trips_through_store_and_load() {
        // 2023-06-15T12:34:56Z: month and day differ enough that a wrong
        // shift or an off-by-one month bias would show up as a different
        // calendar date, not just a different second.
        let ns = chrono::NaiveDate::from_ymd_opt(2023, 6, 15)
            .unwrap()
            .and_hms_opt(12, 34, 56)
            .unwrap()
            .and_utc()
            .timestamp_nanos_opt()
            .unwrap() as u64;

        let mut archive = Archive::new();
        archive.add_file("dated.txt", vec![9], ns).unwrap();

        let settings = CaSettings {
            flags: CaSettingsFlags::INCLUDE_DATE,
            ..Default::default()
        };
        let (encoded, _) = write(&archive, &settings).unwrap();
        let (decoded, _) = read(&encoded, None).unwrap();

        // 56 is even, so the 2-second MS-DOS resolution loses nothing here.
        assert_eq!(decoded.entries[0].timestamp, ns);
    }

    #[test]
    fn year_before_1980_is_rejected_without_extended_date() {
        let mut archive = Archive::new();
        archive.add_file("old.txt", vec![1], 0).unwrap();
        let settings = CaSettings {
            flags: CaSettingsFlags::INCLUDE_DATE,
            ..Default::default()
        };
        assert!(write(&archive, &settings).is_err());
    }
}

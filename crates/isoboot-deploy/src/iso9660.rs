//! Minimal ISO 9660 directory reader.
//!
//! Used to classify an image before it is mounted. Only the primary volume
//! descriptor and plain directory records are understood; Rock Ridge, Joliet
//! and UDF extensions are ignored, which is enough to find fixed upper-case
//! paths such as `SOURCES/INSTALL.WIM`.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

const SECTOR_SIZE: u64 = 2048;
const FIRST_DESCRIPTOR_SECTOR: u64 = 16;
const MAX_DESCRIPTORS: u64 = 32;
const ROOT_RECORD_OFFSET: usize = 156;
const MAX_DIRECTORY_BYTES: u32 = 16 * 1024 * 1024;
const FLAG_DIRECTORY: u8 = 0x02;

/// Files whose presence marks an installable Windows image
pub const INSTALL_PAYLOAD_MARKERS: [&str; 2] = ["sources/install.wim", "sources/install.esd"];

#[derive(Debug, Clone, PartialEq, Eq)]
struct DirRecord {
    name: String,
    extent: u32,
    size: u32,
    is_dir: bool,
}

/// Read-only view of an ISO 9660 image
pub struct IsoImage {
    file: File,
    root: DirRecord,
}

impl IsoImage {
    pub fn open(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let root = Self::find_root(&mut file)?;
        Ok(Self { file, root })
    }

    fn find_root(file: &mut File) -> io::Result<DirRecord> {
        let mut sector = [0u8; SECTOR_SIZE as usize];
        for index in 0..MAX_DESCRIPTORS {
            file.seek(SeekFrom::Start((FIRST_DESCRIPTOR_SECTOR + index) * SECTOR_SIZE))?;
            file.read_exact(&mut sector)?;

            if &sector[1..6] != b"CD001" {
                return Err(invalid("missing CD001 signature"));
            }
            match sector[0] {
                1 => {
                    let record = &sector[ROOT_RECORD_OFFSET..ROOT_RECORD_OFFSET + 34];
                    return parse_record(record)
                        .ok_or_else(|| invalid("malformed root directory record"));
                }
                255 => break,
                _ => continue,
            }
        }
        Err(invalid("no primary volume descriptor"))
    }

    fn read_dir(&mut self, dir: &DirRecord) -> io::Result<Vec<DirRecord>> {
        if dir.size > MAX_DIRECTORY_BYTES {
            return Err(invalid("directory extent too large"));
        }
        let mut data = vec![0u8; dir.size as usize];
        self.file
            .seek(SeekFrom::Start(u64::from(dir.extent) * SECTOR_SIZE))?;
        self.file.read_exact(&mut data)?;

        let mut entries = Vec::new();
        let mut offset = 0usize;
        while offset < data.len() {
            let len = data[offset] as usize;
            if len == 0 {
                // Records never straddle sectors; skip the padding
                let next = (offset / SECTOR_SIZE as usize + 1) * SECTOR_SIZE as usize;
                offset = next;
                continue;
            }
            let end = offset + len;
            if end > data.len() {
                break;
            }
            if let Some(record) = parse_record(&data[offset..end]) {
                if record.name != "." && record.name != ".." {
                    entries.push(record);
                }
            }
            offset = end;
        }
        Ok(entries)
    }

    /// Whether a `/`-separated path exists, compared case-insensitively
    pub fn file_exists(&mut self, relative: &str) -> io::Result<bool> {
        let parts: Vec<&str> = relative
            .split(['/', '\\'])
            .filter(|p| !p.is_empty())
            .collect();
        let Some((last, dirs)) = parts.split_last() else {
            return Ok(false);
        };

        let mut current = self.root.clone();
        for part in dirs {
            let entries = self.read_dir(&current)?;
            match entries
                .into_iter()
                .find(|e| e.is_dir && e.name.eq_ignore_ascii_case(part))
            {
                Some(next) => current = next,
                None => return Ok(false),
            }
        }

        Ok(self
            .read_dir(&current)?
            .iter()
            .any(|e| !e.is_dir && e.name.eq_ignore_ascii_case(last)))
    }

    /// Names of the root directory entries
    pub fn root_entries(&mut self) -> io::Result<Vec<String>> {
        let root = self.root.clone();
        Ok(self.read_dir(&root)?.into_iter().map(|e| e.name).collect())
    }
}

fn parse_record(bytes: &[u8]) -> Option<DirRecord> {
    if bytes.len() < 34 {
        return None;
    }
    let name_len = bytes[32] as usize;
    if 33 + name_len > bytes.len() {
        return None;
    }
    let raw = &bytes[33..33 + name_len];
    let name = match raw {
        [0] => ".".to_string(),
        [1] => "..".to_string(),
        _ => clean_name(&String::from_utf8_lossy(raw)),
    };
    Some(DirRecord {
        name,
        extent: u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
        size: u32::from_le_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]),
        is_dir: bytes[25] & FLAG_DIRECTORY != 0,
    })
}

// "INSTALL.WIM;1" -> "INSTALL.WIM", "README.;1" -> "README"
fn clean_name(name: &str) -> String {
    let base = name.split(';').next().unwrap_or(name);
    base.trim_end_matches('.').to_string()
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

/// Classify an image as an installable OS image without mounting it.
///
/// Images that cannot be read as ISO 9660 are treated as generic content.
pub fn has_install_payload(image: &Path) -> bool {
    let mut iso = match IsoImage::open(image) {
        Ok(iso) => iso,
        Err(e) => {
            debug!("Cannot inspect {} as ISO 9660: {}", image.display(), e);
            return false;
        }
    };
    INSTALL_PAYLOAD_MARKERS
        .iter()
        .any(|marker| iso.file_exists(marker).unwrap_or(false))
}

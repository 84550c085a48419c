//! On-disk chunk files and a loader that reads them from a world directory.
//!
//! Layout: a little-endian `u32` header length, the bincode header, then the
//! lz4-compressed (size-prepended) bincode section list.

use mapview_common::{ChunkKey, LoadError, LoadResult, MagicBytes, SchemaVersion};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

use crate::budget::SECTION_FOOTPRINT_BYTES;
use crate::chunk::{Section, MAX_SECTIONS};
use crate::job::ChunkLoader;

/// File extension for stored chunks.
pub const CHUNK_FILE_EXTENSION: &str = "mvc";

/// Largest decompressed section body accepted: sixteen full sections with
/// room to spare for encoding overhead and denser payloads.
pub const MAX_BODY_BYTES: usize = 2 * MAX_SECTIONS * SECTION_FOOTPRINT_BYTES;

/// Chunk file header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkFileHeader {
    /// Magic bytes for format identification
    pub magic: [u8; 4],
    /// Schema version
    pub version: SchemaVersion,
    /// Chunk X coordinate
    pub x: i32,
    /// Chunk Z coordinate
    pub z: i32,
    /// Number of stored sections
    pub section_count: u8,
}

impl ChunkFileHeader {
    /// Creates a header for the given chunk.
    #[must_use]
    pub fn new(key: ChunkKey, section_count: u8) -> Self {
        Self {
            magic: MagicBytes::CHUNK.0,
            version: SchemaVersion::CHUNK_FILE,
            x: key.x,
            z: key.z,
            section_count,
        }
    }

    /// Validates magic and version.
    pub fn validate(&self) -> LoadResult<()> {
        if self.magic != MagicBytes::CHUNK.0 {
            return Err(LoadError::InvalidFormat);
        }
        if !SchemaVersion::CHUNK_FILE.can_read(&self.version) {
            return Err(LoadError::VersionMismatch {
                expected: SchemaVersion::CHUNK_FILE.to_string(),
                actual: self.version.to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct StoredSection {
    index: u8,
    payload: Vec<u8>,
}

/// Path of the file holding chunk `key` under `root`.
#[must_use]
pub fn chunk_path(root: &Path, key: ChunkKey) -> PathBuf {
    root.join("chunks")
        .join(format!("c.{}.{}.{CHUNK_FILE_EXTENSION}", key.x, key.z))
}

/// Encodes a chunk file.
pub fn encode_chunk(key: ChunkKey, sections: &[Section]) -> io::Result<Vec<u8>> {
    if sections.len() > MAX_SECTIONS {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} sections exceed the limit of {MAX_SECTIONS}", sections.len()),
        ));
    }
    let header = ChunkFileHeader::new(key, sections.len() as u8);
    let header_bytes = bincode::serialize(&header)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let stored: Vec<StoredSection> = sections
        .iter()
        .map(|s| StoredSection {
            index: s.index,
            payload: s.payload.to_vec(),
        })
        .collect();
    let body = bincode::serialize(&stored)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if body.len() > MAX_BODY_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("section data of {} bytes exceeds {MAX_BODY_BYTES}", body.len()),
        ));
    }
    let compressed = lz4_flex::compress_prepend_size(&body);

    let mut result = Vec::with_capacity(4 + header_bytes.len() + compressed.len());
    result.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    result.extend_from_slice(&header_bytes);
    result.extend_from_slice(&compressed);
    Ok(result)
}

/// Decodes a chunk file, returning its header and sections.
pub fn decode_chunk(bytes: &[u8]) -> LoadResult<(ChunkFileHeader, Vec<Section>)> {
    if bytes.len() < 4 {
        return Err(LoadError::Corrupt("data too short".into()));
    }

    let header_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let header_end = 4usize
        .checked_add(header_len)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| LoadError::Corrupt("header length mismatch".into()))?;

    let header: ChunkFileHeader = bincode::deserialize(&bytes[4..header_end])
        .map_err(|e| LoadError::Corrupt(e.to_string()))?;
    header.validate()?;

    let compressed = &bytes[header_end..];
    let declared = compressed
        .get(..4)
        .map(|prefix| u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize)
        .ok_or_else(|| LoadError::Corrupt("missing section data".into()))?;
    if declared > MAX_BODY_BYTES {
        return Err(LoadError::Corrupt(format!(
            "declared section data of {declared} bytes exceeds {MAX_BODY_BYTES}"
        )));
    }

    let body = lz4_flex::decompress_size_prepended(compressed)
        .map_err(|e| LoadError::Compression(e.to_string()))?;
    let stored: Vec<StoredSection> =
        bincode::deserialize(&body).map_err(|e| LoadError::Corrupt(e.to_string()))?;

    if stored.len() != usize::from(header.section_count) {
        return Err(LoadError::Corrupt(format!(
            "header declares {} sections, found {}",
            header.section_count,
            stored.len()
        )));
    }

    let sections = stored
        .into_iter()
        .map(|s| Section::new(s.index, s.payload))
        .collect();
    Ok((header, sections))
}

/// Writes chunk `key` under `root`, creating directories as needed.
pub fn write_chunk_file(root: &Path, key: ChunkKey, sections: &[Section]) -> io::Result<PathBuf> {
    let path = chunk_path(root, key);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, encode_chunk(key, sections)?)?;
    Ok(path)
}

/// Loads chunks from `<root>/chunks/c.<x>.<z>.mvc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryLoader;

impl ChunkLoader for DirectoryLoader {
    fn load(&self, root: &Path, key: ChunkKey) -> LoadResult<Vec<Section>> {
        let bytes = match std::fs::read(chunk_path(root, key)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(LoadError::NotFound { x: key.x, z: key.z });
            },
            Err(e) => return Err(e.into()),
        };

        let (header, sections) = decode_chunk(&bytes)?;
        if header.x != key.x || header.z != key.z {
            return Err(LoadError::Corrupt(format!(
                "file for {key} contains chunk ({}, {})",
                header.x, header.z
            )));
        }
        Ok(sections)
    }
}

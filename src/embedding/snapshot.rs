//! Binary snapshot of the reference embeddings.
//!
//! File format: embeddings.bin
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of the extractor model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated):
//! - category: u16 length (little-endian) + utf8 bytes
//! - file_id: u16 length (little-endian) + utf8 bytes
//! - vector: [f32; dimensions] (little-endian)
//!
//! Category and file id are separate fields on disk. The old
//! `CATEGORY__FILENAME` composite key only survives in the legacy JSON import,
//! where the split is done once and the ambiguity stays out of the runtime
//! path.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::embedding::store::EmbeddingRecord;

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

/// Separator of the legacy composite key.
const LEGACY_SEPARATOR: &str = "__";

/// Errors that can occur while reading or writing a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid snapshot format: {0}")]
    InvalidFormat(String),

    #[error("version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("model mismatch: snapshot was built by a different extractor model")]
    ModelMismatch,

    #[error("checksum mismatch: snapshot may be corrupted")]
    ChecksumMismatch,

    #[error("dimension mismatch: expected {expected}, snapshot has {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Reader/writer for the snapshot file.
pub struct Snapshot {
    path: PathBuf,
}

impl Snapshot {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read all records, validating version, checksum, model id and dimension.
    pub fn read(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<Vec<EmbeddingRecord>, SnapshotError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = self.read_header(&mut reader)?;

        if header.model_id != *expected_model_id {
            return Err(SnapshotError::ModelMismatch);
        }
        if header.dimensions as usize != expected_dimensions {
            return Err(SnapshotError::DimensionMismatch {
                expected: expected_dimensions,
                got: header.dimensions as usize,
            });
        }

        let mut records = Vec::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            records.push(self.read_entry(&mut reader, header.dimensions as usize)?);
        }

        Ok(records)
    }

    /// Read only the header, for `inspect`.
    pub fn stat(&self) -> Result<SnapshotStat, SnapshotError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        let header = self.read_header(&mut reader)?;
        Ok(SnapshotStat {
            version: header.version,
            dimensions: header.dimensions as usize,
            entry_count: header.entry_count as usize,
        })
    }

    /// Write records to the snapshot.
    ///
    /// Uses atomic write: temp file -> fsync -> rename
    pub fn write(
        &self,
        records: &[EmbeddingRecord],
        dimensions: usize,
        model_id: &[u8; 32],
    ) -> Result<(), SnapshotError> {
        let temp_path = self.path.with_extension("tmp");

        let result = self.write_to_file(&temp_path, records, dimensions, model_id);

        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    fn write_to_file(
        &self,
        path: &Path,
        records: &[EmbeddingRecord],
        dimensions: usize,
        model_id: &[u8; 32],
    ) -> Result<(), SnapshotError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let header = Header {
            version: FORMAT_VERSION,
            model_id: *model_id,
            dimensions: dimensions as u16,
            entry_count: records.len() as u64,
        };
        self.write_header(&mut writer, &header)?;

        for record in records {
            self.write_entry(&mut writer, record)?;
        }

        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        file.sync_all()?;

        Ok(())
    }

    fn read_header(&self, reader: &mut BufReader<File>) -> Result<Header, SnapshotError> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header_bytes)?;

        let version = header_bytes[0];

        if version > FORMAT_VERSION {
            return Err(SnapshotError::VersionMismatch(version, FORMAT_VERSION));
        }

        let mut model_id = [0u8; 32];
        model_id.copy_from_slice(&header_bytes[1..33]);

        let dimensions = u16::from_le_bytes([header_bytes[33], header_bytes[34]]);
        let entry_count = u64::from_le_bytes([
            header_bytes[35],
            header_bytes[36],
            header_bytes[37],
            header_bytes[38],
            header_bytes[39],
            header_bytes[40],
            header_bytes[41],
            header_bytes[42],
        ]);
        let stored_checksum = u32::from_le_bytes([
            header_bytes[43],
            header_bytes[44],
            header_bytes[45],
            header_bytes[46],
        ]);

        // Checksum covers the header without the checksum field itself
        let computed_checksum = crc32fast::hash(&header_bytes[0..43]);
        if stored_checksum != computed_checksum {
            return Err(SnapshotError::ChecksumMismatch);
        }

        Ok(Header {
            version,
            model_id,
            dimensions,
            entry_count,
        })
    }

    fn write_header(
        &self,
        writer: &mut BufWriter<File>,
        header: &Header,
    ) -> Result<(), SnapshotError> {
        let mut header_bytes = [0u8; HEADER_SIZE];

        header_bytes[0] = header.version;
        header_bytes[1..33].copy_from_slice(&header.model_id);
        header_bytes[33..35].copy_from_slice(&header.dimensions.to_le_bytes());
        header_bytes[35..43].copy_from_slice(&header.entry_count.to_le_bytes());

        let checksum = crc32fast::hash(&header_bytes[0..43]);
        header_bytes[43..47].copy_from_slice(&checksum.to_le_bytes());

        writer.write_all(&header_bytes)?;
        Ok(())
    }

    fn read_entry(
        &self,
        reader: &mut BufReader<File>,
        dimensions: usize,
    ) -> Result<EmbeddingRecord, SnapshotError> {
        let category = self.read_string(reader)?;
        let file_id = self.read_string(reader)?;

        let mut vector = Vec::with_capacity(dimensions);
        for _ in 0..dimensions {
            let mut float_bytes = [0u8; 4];
            reader.read_exact(&mut float_bytes)?;
            vector.push(f32::from_le_bytes(float_bytes));
        }

        Ok(EmbeddingRecord {
            category,
            file_id,
            vector,
        })
    }

    fn write_entry(
        &self,
        writer: &mut BufWriter<File>,
        record: &EmbeddingRecord,
    ) -> Result<(), SnapshotError> {
        self.write_string(writer, &record.category)?;
        self.write_string(writer, &record.file_id)?;

        for &value in &record.vector {
            writer.write_all(&value.to_le_bytes())?;
        }

        Ok(())
    }

    fn read_string(&self, reader: &mut BufReader<File>) -> Result<String, SnapshotError> {
        let mut len_bytes = [0u8; 2];
        reader.read_exact(&mut len_bytes)?;
        let len = u16::from_le_bytes(len_bytes) as usize;

        let mut bytes = vec![0u8; len];
        reader.read_exact(&mut bytes)?;

        String::from_utf8(bytes)
            .map_err(|_| SnapshotError::InvalidFormat("entry key is not valid utf8".to_string()))
    }

    fn write_string(&self, writer: &mut BufWriter<File>, s: &str) -> Result<(), SnapshotError> {
        if s.len() > u16::MAX as usize {
            return Err(SnapshotError::InvalidFormat(format!(
                "entry key longer than {} bytes",
                u16::MAX
            )));
        }
        writer.write_all(&(s.len() as u16).to_le_bytes())?;
        writer.write_all(s.as_bytes())?;
        Ok(())
    }
}

/// Header summary returned by `Snapshot::stat`.
#[derive(Debug)]
pub struct SnapshotStat {
    pub version: u8,
    pub dimensions: usize,
    pub entry_count: usize,
}

/// File header structure.
#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

/// SHA256 of the extractor model name, stored in the header to catch
/// store/extractor version skew at load time.
pub fn model_id_hash(model_name: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    hasher.finalize().into()
}

/// Split a legacy `CATEGORY__FILENAME` composite key on the first separator.
///
/// A key without a separator keeps the whole text as category and an empty
/// file id, matching the original dataset export.
pub fn split_legacy_key(key: &str) -> (String, String) {
    match key.split_once(LEGACY_SEPARATOR) {
        Some((category, file_id)) => (category.to_string(), file_id.to_string()),
        None => (key.to_string(), String::new()),
    }
}

/// Parse a legacy JSON export (an object mapping composite keys to float
/// arrays) into records, splitting each key once.
pub fn import_legacy_json(data: &[u8]) -> Result<Vec<EmbeddingRecord>, SnapshotError> {
    let map: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(data)
        .map_err(|e| SnapshotError::InvalidFormat(format!("legacy export is not valid JSON: {e}")))?;

    let mut records = Vec::with_capacity(map.len());
    for (key, value) in map {
        let vector: Vec<f32> = serde_json::from_value(value).map_err(|e| {
            SnapshotError::InvalidFormat(format!("entry '{key}' is not a float array: {e}"))
        })?;

        let (category, file_id) = split_legacy_key(&key);
        records.push(EmbeddingRecord {
            category,
            file_id,
            vector,
        });
    }

    Ok(records)
}

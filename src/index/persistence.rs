//! On-disk format for similarity indexes.
//!
//! An index is persisted as two co-located files:
//!
//! - `{dir}/{name}.snix`: the native structure. A 16-byte header
//!   (`b"SNIX"`, format version `u32` LE, payload length `u64` LE) followed
//!   by the bincode-encoded [`IndexStructure`].
//! - `{dir}/{name}.snix.meta`: JSON metadata with the ordinal → sentence id
//!   mapping, dimension, variant and a SHA-256 of the native file.
//!
//! Both files are written to a temporary path, synced, then renamed into
//! place. Loading fails closed: a missing file is `IndexError::Unavailable`,
//! anything malformed, truncated or mutually inconsistent is
//! `IndexError::Corrupted`, and an unknown format version is
//! `IndexError::UnsupportedVersion`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bincode::Options;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use super::{IndexStructure, IndexVariant, SearchIndex, VectorIndex};
use crate::error::{IndexError, Result};
use crate::types::{SentenceId, Timestamp};

/// Magic bytes opening every native index file.
pub const MAGIC: &[u8; 4] = b"SNIX";

/// Current format version of both artifacts.
pub const FORMAT_VERSION: u32 = 1;

/// Size of the native file header in bytes.
pub const HEADER_LEN: usize = 16;

/// Metadata file contents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Format version of this metadata file.
    pub format_version: u32,

    /// Vector dimension.
    pub dimension: u32,

    /// Variant and its parameters.
    pub variant: IndexVariant,

    /// Number of vectors in the native file.
    pub ntotal: usize,

    /// `ordinal_to_sentence_id[i]` is the sentence behind ordinal `i`.
    pub ordinal_to_sentence_id: Vec<u64>,

    /// Lowercase hex SHA-256 of the native file.
    pub index_checksum: String,

    /// When the artifacts were written.
    pub created_at: Timestamp,
}

/// Paths of the files making up one persisted index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexPaths {
    /// Native structure file.
    pub index: PathBuf,
    /// Metadata file.
    pub metadata: PathBuf,
    /// Advisory lock file held while writing.
    pub lock: PathBuf,
}

impl IndexPaths {
    /// Resolves the artifact paths for `name` inside `dir`.
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            index: dir.join(format!("{}.snix", name)),
            metadata: dir.join(format!("{}.snix.meta", name)),
            lock: dir.join(format!("{}.snix.lock", name)),
        }
    }

    /// Returns true if both artifacts exist.
    pub fn exist(&self) -> bool {
        self.index.exists() && self.metadata.exists()
    }
}

/// Encodes a structure into native file bytes.
pub fn encode_structure(structure: &IndexStructure) -> Result<Vec<u8>> {
    let payload = bincode::serialize(structure)?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Decodes native file bytes, rejecting anything malformed.
pub fn decode_structure(bytes: &[u8]) -> std::result::Result<IndexStructure, IndexError> {
    if bytes.len() < HEADER_LEN {
        return Err(IndexError::corrupted(format!(
            "index file is {} bytes, shorter than its header",
            bytes.len()
        )));
    }
    if &bytes[..4] != MAGIC {
        return Err(IndexError::corrupted("index file has wrong magic bytes"));
    }

    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[4..8]);
    let version = u32::from_le_bytes(version);
    if version != FORMAT_VERSION {
        return Err(IndexError::UnsupportedVersion {
            expected: FORMAT_VERSION,
            found: version,
        });
    }

    let mut len = [0u8; 8];
    len.copy_from_slice(&bytes[8..16]);
    let payload = &bytes[HEADER_LEN..];
    if u64::from_le_bytes(len) != payload.len() as u64 {
        return Err(IndexError::corrupted(format!(
            "index payload is {} bytes, header declares {}",
            payload.len(),
            u64::from_le_bytes(len)
        )));
    }

    let structure: IndexStructure = bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(payload.len() as u64)
        .deserialize(payload)
        .map_err(|e| IndexError::corrupted(format!("cannot decode index payload: {}", e)))?;
    structure.check_consistency()?;
    Ok(structure)
}

/// Persists an index, replacing any previous artifacts with the same name.
///
/// # Errors
///
/// - `IndexError::ArtifactsLocked` if another writer holds the lock file
/// - `SentenceDBError::Io` if the files cannot be written
#[instrument(skip(index), fields(dir = %dir.display(), ntotal = index.ntotal()))]
pub fn save(index: &SearchIndex, dir: &Path, name: &str) -> Result<()> {
    fs::create_dir_all(dir)?;
    let paths = IndexPaths::new(dir, name);
    let _lock = ArtifactLock::acquire(&paths.lock)?;

    let bytes = encode_structure(index.structure())?;
    let metadata = IndexMetadata {
        format_version: FORMAT_VERSION,
        dimension: index.dimension() as u32,
        variant: index.variant(),
        ntotal: index.ntotal(),
        ordinal_to_sentence_id: index.id_mapping().iter().map(|id| id.get()).collect(),
        index_checksum: checksum(&bytes),
        created_at: Timestamp::now(),
    };
    let json = serde_json::to_vec_pretty(&metadata)
        .map_err(|e| IndexError::internal(format!("cannot encode index metadata: {}", e)))?;

    write_atomic(&paths.index, &bytes)?;
    write_atomic(&paths.metadata, &json)?;

    info!(
        bytes = bytes.len(),
        variant = ?metadata.variant,
        "Index saved"
    );
    Ok(())
}

/// Loads an index, verifying that both artifacts agree.
#[instrument(fields(dir = %dir.display()))]
pub fn load(dir: &Path, name: &str) -> Result<SearchIndex> {
    let paths = IndexPaths::new(dir, name);

    let json = read_artifact(&paths.metadata, "metadata")?;
    let metadata: IndexMetadata = serde_json::from_slice(&json)
        .map_err(|e| IndexError::corrupted(format!("cannot parse index metadata: {}", e)))?;
    if metadata.format_version != FORMAT_VERSION {
        return Err(IndexError::UnsupportedVersion {
            expected: FORMAT_VERSION,
            found: metadata.format_version,
        }
        .into());
    }

    let bytes = read_artifact(&paths.index, "index")?;
    if checksum(&bytes) != metadata.index_checksum {
        warn!("Index file does not match its metadata checksum");
        return Err(IndexError::corrupted("index file does not match metadata checksum").into());
    }
    let structure = decode_structure(&bytes)?;

    if structure.dimension() != metadata.dimension as usize {
        return Err(IndexError::corrupted(format!(
            "metadata dimension {} disagrees with index dimension {}",
            metadata.dimension,
            structure.dimension()
        ))
        .into());
    }
    if structure.variant() != metadata.variant {
        return Err(IndexError::corrupted("metadata variant disagrees with index file").into());
    }
    if structure.len() != metadata.ntotal {
        return Err(IndexError::corrupted(format!(
            "metadata records {} vectors, index file holds {}",
            metadata.ntotal,
            structure.len()
        ))
        .into());
    }

    let id_mapping = metadata
        .ordinal_to_sentence_id
        .into_iter()
        .map(SentenceId::new)
        .collect();
    let index = SearchIndex::from_parts(structure, id_mapping)?;

    info!(ntotal = index.ntotal(), variant = ?index.variant(), "Index loaded");
    Ok(index)
}

/// Removes both artifacts. Missing files are not an error.
pub fn remove_files(dir: &Path, name: &str) -> Result<()> {
    let paths = IndexPaths::new(dir, name);
    for path in [&paths.index, &paths.metadata] {
        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "Removed index artifact"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn read_artifact(path: &Path, what: &str) -> Result<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(IndexError::unavailable(format!(
            "{} file {} is missing",
            what,
            path.display()
        ))
        .into()),
        Err(e) => Err(IndexError::unavailable(format!(
            "cannot read {} file {}: {}",
            what,
            path.display(),
            e
        ))
        .into()),
    }
}

/// Writes `bytes` to a sibling temporary file, syncs it and renames it over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(format!(".tmp.{}", std::process::id()));
    let tmp = PathBuf::from(tmp);

    let result = (|| -> io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        sync_parent_directory(path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    Ok(result?)
}

fn sync_parent_directory(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)?.sync_all()?,
            _ => File::open(".")?.sync_all()?,
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// Exclusive advisory lock on the artifact lock file, released on drop.
struct ArtifactLock {
    file: File,
}

impl ArtifactLock {
    fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        file.try_lock_exclusive()
            .map_err(|_| IndexError::ArtifactsLocked)?;
        Ok(Self { file })
    }
}

impl Drop for ArtifactLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

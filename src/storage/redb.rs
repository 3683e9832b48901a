//! redb storage engine implementation.
//!
//! This module provides the primary storage backend for SentenceDB using
//! [redb](https://docs.rs/redb), a pure Rust embedded key-value store.
//!
//! # Features
//!
//! - ACID transactions with MVCC
//! - Single-writer, multiple-reader concurrency
//! - Automatic crash recovery
//!
//! Every record operation runs in its own write transaction. redb
//! serializes writers, so the check-then-insert in `add_document` and the
//! dimension check in `add_sentence_embedding` cannot race.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use ::redb::{Database, ReadableTable, ReadableTableMetadata, WriteTransaction};
use tracing::{debug, info, instrument, warn};

use super::schema::{
    DatabaseMetadata, DOCUMENTS_BY_PATH_TABLE, DOCUMENTS_TABLE, EMBEDDINGS_TABLE, METADATA_TABLE,
    SCHEMA_VERSION, SENTENCES_BY_POSITION_TABLE, SENTENCES_TABLE,
};
use super::StorageEngine;
use crate::config::{Config, MAX_EMBEDDING_DIMENSION};
use crate::document::{
    validate_document, validate_sentence_text, validate_vector_values, Document, Sentence,
    SentenceRecord, StoreStats,
};
use crate::error::{NotFoundError, Result, SentenceDBError, StorageError, ValidationError};
use crate::types::{
    embedding_from_bytes, embedding_to_bytes, DocumentId, Embedding, SentenceId, Timestamp,
};

/// Metadata key in the metadata table.
const METADATA_KEY: &str = "db_metadata";

/// redb storage engine wrapper.
///
/// Holds the redb database handle and a cached copy of the metadata. The
/// metadata table stays authoritative: writers re-read it inside their
/// transaction and publish the result to the cache after commit.
#[derive(Debug)]
pub struct RedbStorage {
    /// The redb database handle.
    db: Database,

    /// Cached database metadata.
    metadata: RwLock<DatabaseMetadata>,

    /// Path to the database file.
    path: PathBuf,

    /// Use two-phase commit on every write.
    two_phase_commit: bool,

    /// Maximum sentence size in bytes.
    max_sentence_bytes: usize,
}

impl RedbStorage {
    /// Opens or creates a database at the given path.
    ///
    /// If the database doesn't exist, it will be created and initialized
    /// with the configuration settings. If it exists, the configuration
    /// will be validated against the stored metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The database file is corrupted
    /// - The database is locked by another process
    /// - Schema version doesn't match
    /// - The configured dimension disagrees with the established one
    #[instrument(skip(config), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, config: &Config) -> Result<Self> {
        let path = path.as_ref();
        let db_exists = path.exists();

        debug!(db_exists = db_exists, "Opening storage engine");

        let db = Self::create_database(path)?;

        if db_exists {
            Self::open_existing(db, path.to_path_buf(), config)
        } else {
            Self::initialize_new(db, path.to_path_buf(), config)
        }
    }

    /// Creates the redb database handle.
    fn create_database(path: &Path) -> Result<Database> {
        // redb has no typed variant for lock conflicts, so match on the message.
        let db = Database::builder().create(path).map_err(|e| {
            if e.to_string().contains("locked") {
                StorageError::DatabaseLocked
            } else {
                StorageError::Redb(e.to_string())
            }
        })?;

        debug!("Database file opened successfully");
        Ok(db)
    }

    /// Initializes a new database with tables and metadata.
    #[instrument(skip(db, config), fields(path = %path.display()))]
    fn initialize_new(db: Database, path: PathBuf, config: &Config) -> Result<Self> {
        info!("Initializing new database");

        let metadata = DatabaseMetadata::new(config.embedding_dimension);

        let write_txn = db.begin_write().map_err(StorageError::from)?;
        {
            write_metadata(&write_txn, &metadata)?;

            // Tables are created on first open
            let _ = write_txn.open_table(DOCUMENTS_TABLE)?;
            let _ = write_txn.open_table(DOCUMENTS_BY_PATH_TABLE)?;
            let _ = write_txn.open_table(SENTENCES_TABLE)?;
            let _ = write_txn.open_table(SENTENCES_BY_POSITION_TABLE)?;
            let _ = write_txn.open_table(EMBEDDINGS_TABLE)?;
        }
        write_txn.commit().map_err(StorageError::from)?;

        info!(
            schema_version = SCHEMA_VERSION,
            dimension = ?metadata.embedding_dimension,
            "Database initialized"
        );

        Ok(Self::from_parts(db, metadata, path, config))
    }

    /// Opens and validates an existing database.
    #[instrument(skip(db, config), fields(path = %path.display()))]
    fn open_existing(db: Database, path: PathBuf, config: &Config) -> Result<Self> {
        info!("Opening existing database");

        let read_txn = db.begin_read().map_err(StorageError::from)?;
        let metadata = {
            let meta_table = read_txn.open_table(METADATA_TABLE).map_err(|e| {
                StorageError::corrupted(format!("Cannot open metadata table: {}", e))
            })?;

            let metadata_bytes = meta_table
                .get(METADATA_KEY)
                .map_err(StorageError::from)?
                .ok_or_else(|| StorageError::corrupted("Missing database metadata"))?;

            bincode::deserialize::<DatabaseMetadata>(metadata_bytes.value())
                .map_err(|e| StorageError::corrupted(format!("Invalid metadata format: {}", e)))?
        };
        drop(read_txn);

        if !metadata.is_compatible() {
            warn!(
                expected = SCHEMA_VERSION,
                found = metadata.schema_version,
                "Schema version mismatch"
            );
            return Err(SentenceDBError::Storage(
                StorageError::SchemaVersionMismatch {
                    expected: SCHEMA_VERSION,
                    found: metadata.schema_version,
                },
            ));
        }

        let mut metadata = metadata;
        match (metadata.embedding_dimension, config.embedding_dimension) {
            (Some(stored), Some(requested)) if stored != requested => {
                warn!(
                    expected = stored,
                    found = requested,
                    "Embedding dimension mismatch"
                );
                return Err(ValidationError::dimension_mismatch(stored, requested).into());
            }
            (None, Some(requested)) => metadata.embedding_dimension = Some(requested),
            _ => {}
        }
        metadata.touch();

        let write_txn = db.begin_write().map_err(StorageError::from)?;
        write_metadata(&write_txn, &metadata)?;
        write_txn.commit().map_err(StorageError::from)?;

        info!(
            schema_version = metadata.schema_version,
            dimension = ?metadata.embedding_dimension,
            next_sentence_id = metadata.next_sentence_id,
            "Database opened successfully"
        );

        Ok(Self::from_parts(db, metadata, path, config))
    }

    fn from_parts(db: Database, metadata: DatabaseMetadata, path: PathBuf, config: &Config) -> Self {
        Self {
            db,
            metadata: RwLock::new(metadata),
            path,
            two_phase_commit: config.sync_mode.is_paranoid(),
            max_sentence_bytes: config.max_sentence_bytes,
        }
    }

    /// Returns a reference to the underlying redb database.
    #[cfg(test)]
    pub(crate) fn database(&self) -> &Database {
        &self.db
    }

    /// Begins a write transaction honoring the configured sync mode.
    fn begin_write(&self) -> Result<WriteTransaction> {
        let mut txn = self.db.begin_write().map_err(StorageError::from)?;
        if self.two_phase_commit {
            txn.set_two_phase_commit(true);
        }
        Ok(txn)
    }

    /// Merges committed metadata into the cache.
    ///
    /// Writers commit in a total order but may publish out of order, so the
    /// counters only ever move forward and the dimension is only ever set.
    fn publish_metadata(&self, committed: &DatabaseMetadata) {
        let mut cached = self
            .metadata
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if cached.embedding_dimension.is_none() {
            cached.embedding_dimension = committed.embedding_dimension;
        }
        cached.next_document_id = cached.next_document_id.max(committed.next_document_id);
        cached.next_sentence_id = cached.next_sentence_id.max(committed.next_sentence_id);
    }

    /// Shared insert path for sentences with and without an embedding.
    fn insert_sentence(
        &self,
        document_id: DocumentId,
        text: &str,
        position: u32,
        vector: Option<&[f32]>,
    ) -> Result<SentenceId> {
        validate_sentence_text(text, self.max_sentence_bytes)?;
        if let Some(vector) = vector {
            validate_vector_values(vector)?;
        }

        let write_txn = self.begin_write()?;
        let (id, metadata) = {
            let mut metadata = read_metadata(&write_txn)?;

            if let Some(vector) = vector {
                match metadata.embedding_dimension {
                    Some(expected) if expected != vector.len() => {
                        return Err(ValidationError::dimension_mismatch(expected, vector.len()).into());
                    }
                    None if vector.len() > MAX_EMBEDDING_DIMENSION => {
                        return Err(ValidationError::invalid_field(
                            "vector",
                            format!("dimension must not exceed {}", MAX_EMBEDDING_DIMENSION),
                        )
                        .into());
                    }
                    None => {
                        info!(dimension = vector.len(), "Embedding dimension established");
                        metadata.embedding_dimension = Some(vector.len());
                    }
                    Some(_) => {}
                }
            }

            let documents = write_txn.open_table(DOCUMENTS_TABLE)?;
            if documents.get(document_id.get())?.is_none() {
                return Err(StorageError::integrity(format!(
                    "sentence references unknown document {}",
                    document_id
                ))
                .into());
            }

            let mut by_position = write_txn.open_table(SENTENCES_BY_POSITION_TABLE)?;
            if by_position.get((document_id.get(), position))?.is_some() {
                return Err(StorageError::integrity(format!(
                    "document {} already has a sentence at position {}",
                    document_id, position
                ))
                .into());
            }

            let id = SentenceId::new(metadata.next_sentence_id);
            metadata.next_sentence_id += 1;

            let sentence = Sentence {
                id,
                document_id,
                text: text.to_string(),
                position,
                created_at: Timestamp::now(),
            };
            let bytes = bincode::serialize(&sentence)?;

            let mut sentences = write_txn.open_table(SENTENCES_TABLE)?;
            sentences.insert(id.get(), bytes.as_slice())?;
            by_position.insert((document_id.get(), position), id.get())?;

            if let Some(vector) = vector {
                let mut embeddings = write_txn.open_table(EMBEDDINGS_TABLE)?;
                embeddings.insert(id.get(), embedding_to_bytes(vector).as_slice())?;
            }

            write_metadata(&write_txn, &metadata)?;
            (id, metadata)
        };
        write_txn.commit().map_err(StorageError::from)?;

        self.publish_metadata(&metadata);
        debug!(
            id = %id,
            document_id = %document_id,
            position = position,
            embedded = vector.is_some(),
            "Sentence saved"
        );
        Ok(id)
    }
}

impl StorageEngine for RedbStorage {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    fn metadata(&self) -> DatabaseMetadata {
        self.metadata
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    // =========================================================================
    // Documents
    // =========================================================================

    fn add_document(&self, filename: &str, path: &str) -> Result<DocumentId> {
        validate_document(filename, path)?;

        let write_txn = self.begin_write()?;
        let created = {
            let mut by_path = write_txn.open_table(DOCUMENTS_BY_PATH_TABLE)?;
            let existing = by_path.get(path)?.map(|guard| guard.value());

            match existing {
                Some(raw) => Err(DocumentId::new(raw)),
                None => {
                    let mut metadata = read_metadata(&write_txn)?;
                    let id = DocumentId::new(metadata.next_document_id);
                    metadata.next_document_id += 1;

                    let document = Document {
                        id,
                        filename: filename.to_string(),
                        path: path.to_string(),
                        created_at: Timestamp::now(),
                    };
                    let bytes = bincode::serialize(&document)?;

                    let mut documents = write_txn.open_table(DOCUMENTS_TABLE)?;
                    documents.insert(id.get(), bytes.as_slice())?;
                    by_path.insert(path, id.get())?;
                    write_metadata(&write_txn, &metadata)?;
                    Ok((id, metadata))
                }
            }
        };

        match created {
            Ok((id, metadata)) => {
                write_txn.commit().map_err(StorageError::from)?;
                self.publish_metadata(&metadata);
                debug!(id = %id, path = path, "Document saved");
                Ok(id)
            }
            Err(existing) => {
                write_txn.abort().map_err(StorageError::from)?;
                debug!(id = %existing, path = path, "Document already registered");
                Ok(existing)
            }
        }
    }

    fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(DOCUMENTS_TABLE)?;

        match table.get(id.get())? {
            Some(value) => Ok(Some(bincode::deserialize(value.value())?)),
            None => Ok(None),
        }
    }

    fn list_documents(&self) -> Result<Vec<Document>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(DOCUMENTS_TABLE)?;

        let mut documents = Vec::new();
        for result in table.iter()? {
            let (_, value) = result.map_err(StorageError::from)?;
            documents.push(bincode::deserialize(value.value())?);
        }
        Ok(documents)
    }

    // =========================================================================
    // Sentences & embeddings
    // =========================================================================

    fn add_sentence(
        &self,
        document_id: DocumentId,
        text: &str,
        position: u32,
    ) -> Result<SentenceId> {
        self.insert_sentence(document_id, text, position, None)
    }

    fn add_sentence_embedding(
        &self,
        document_id: DocumentId,
        text: &str,
        position: u32,
        vector: &[f32],
    ) -> Result<SentenceId> {
        self.insert_sentence(document_id, text, position, Some(vector))
    }

    fn sentence_by_id(&self, id: SentenceId) -> Result<Option<SentenceRecord>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let sentences = read_txn.open_table(SENTENCES_TABLE)?;

        let sentence: Sentence = match sentences.get(id.get())? {
            Some(value) => bincode::deserialize(value.value())?,
            None => return Ok(None),
        };

        let documents = read_txn.open_table(DOCUMENTS_TABLE)?;
        let document: Document = match documents.get(sentence.document_id.get())? {
            Some(value) => bincode::deserialize(value.value())?,
            None => {
                return Err(StorageError::integrity(format!(
                    "sentence {} references missing document {}",
                    id, sentence.document_id
                ))
                .into())
            }
        };

        Ok(Some(SentenceRecord {
            id: sentence.id,
            text: sentence.text,
            position: sentence.position,
            document_id: document.id,
            filename: document.filename,
            path: document.path,
        }))
    }

    fn document_sentences(&self, document_id: DocumentId) -> Result<Vec<Sentence>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;

        let documents = read_txn.open_table(DOCUMENTS_TABLE)?;
        if documents.get(document_id.get())?.is_none() {
            return Err(NotFoundError::document(document_id).into());
        }

        let by_position = read_txn.open_table(SENTENCES_BY_POSITION_TABLE)?;
        let sentences = read_txn.open_table(SENTENCES_TABLE)?;

        let mut result = Vec::new();
        let doc = document_id.get();
        for entry in by_position.range((doc, 0u32)..=(doc, u32::MAX))? {
            let (_, sentence_id) = entry.map_err(StorageError::from)?;
            let sentence_id = sentence_id.value();
            let value = sentences.get(sentence_id)?.ok_or_else(|| {
                StorageError::corrupted(format!(
                    "position index references missing sentence {}",
                    sentence_id
                ))
            })?;
            result.push(bincode::deserialize(value.value())?);
        }
        Ok(result)
    }

    fn all_embeddings(&self) -> Result<Vec<(SentenceId, Embedding)>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(EMBEDDINGS_TABLE)?;
        let dimension = self.embedding_dimension();

        let mut embeddings = Vec::with_capacity(table.len()? as usize);
        for entry in table.iter()? {
            let (key, value) = entry.map_err(StorageError::from)?;
            let id = SentenceId::new(key.value());
            let vector = embedding_from_bytes(value.value()).ok_or_else(|| {
                StorageError::corrupted(format!("embedding {} has a ragged byte length", id))
            })?;
            if dimension.is_some_and(|d| d != vector.len()) {
                return Err(StorageError::corrupted(format!(
                    "embedding {} has {} components, store dimension is {:?}",
                    id,
                    vector.len(),
                    dimension
                ))
                .into());
            }
            embeddings.push((id, vector));
        }
        Ok(embeddings)
    }

    fn stats(&self) -> Result<StoreStats> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        Ok(StoreStats {
            documents: read_txn.open_table(DOCUMENTS_TABLE)?.len()?,
            sentences: read_txn.open_table(SENTENCES_TABLE)?.len()?,
            embeddings: read_txn.open_table(EMBEDDINGS_TABLE)?.len()?,
        })
    }

    #[instrument(skip(self))]
    fn clear(&self) -> Result<()> {
        let write_txn = self.begin_write()?;
        {
            write_txn.delete_table(DOCUMENTS_TABLE)?;
            write_txn.delete_table(DOCUMENTS_BY_PATH_TABLE)?;
            write_txn.delete_table(SENTENCES_TABLE)?;
            write_txn.delete_table(SENTENCES_BY_POSITION_TABLE)?;
            write_txn.delete_table(EMBEDDINGS_TABLE)?;

            let _ = write_txn.open_table(DOCUMENTS_TABLE)?;
            let _ = write_txn.open_table(DOCUMENTS_BY_PATH_TABLE)?;
            let _ = write_txn.open_table(SENTENCES_TABLE)?;
            let _ = write_txn.open_table(SENTENCES_BY_POSITION_TABLE)?;
            let _ = write_txn.open_table(EMBEDDINGS_TABLE)?;
        }
        write_txn.commit().map_err(StorageError::from)?;

        info!("Store cleared");
        Ok(())
    }
}

/// Reads the metadata record inside a write transaction.
fn read_metadata(txn: &WriteTransaction) -> Result<DatabaseMetadata> {
    let table = txn.open_table(METADATA_TABLE)?;
    let bytes = table
        .get(METADATA_KEY)?
        .ok_or_else(|| StorageError::corrupted("Missing database metadata"))?;
    let metadata = bincode::deserialize(bytes.value())
        .map_err(|e| StorageError::corrupted(format!("Invalid metadata format: {}", e)))?;
    Ok(metadata)
}

/// Writes the metadata record inside a write transaction.
fn write_metadata(txn: &WriteTransaction, metadata: &DatabaseMetadata) -> Result<()> {
    let bytes = bincode::serialize(metadata)
        .map_err(|e| StorageError::serialization(e.to_string()))?;
    let mut table = txn.open_table(METADATA_TABLE)?;
    table.insert(METADATA_KEY, bytes.as_slice())?;
    Ok(())
}

// RedbStorage is auto Send + Sync: Database, RwLock<DatabaseMetadata> and
// PathBuf are all Send + Sync.

//! tus transfer engine.
//!
//! Owns upload sessions from creation to completion: it resolves the
//! destination before the first byte arrives, appends chunks to a working
//! file in the cache directory, and hands the finished file to the
//! completion reconciler exactly when the declared length is reached.

use crate::metrics::{BYTES_RECEIVED, UPLOAD_SESSIONS_CREATED, UPLOAD_SESSIONS_EXPIRED};
use crate::reconciler::{CompletionError, CompletionOutcome, CompletionReconciler};
use crate::resolver::{DestinationError, DestinationResolver};
use berth_core::policy;
use berth_core::{DestinationPath, Disposition, UploadKey, UploadMetadata, UploadState};
use berth_metadata::models::UploadSessionRow;
use berth_metadata::{MetadataError, MetadataStore};
use berth_storage::StorageError;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Sessions removed per expiry sweep batch.
const SWEEP_BATCH_SIZE: u32 = 100;

/// Errors raised by the transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("upload session not found: {0}")]
    NotFound(String),

    #[error("upload session expired: {0}")]
    Expired(String),

    #[error("upload session already exists: {0}")]
    AlreadyExists(String),

    #[error("upload session is {state}, not open")]
    SessionClosed { state: UploadState },

    #[error("upload session is busy: {0}")]
    Busy(String),

    #[error("offset mismatch: session is at {expected}, request sent {actual}")]
    OffsetMismatch { expected: u64, actual: u64 },

    #[error("chunk ends at {end}, past the declared length {length}")]
    ExceedsLength { end: u64, length: u64 },

    #[error("upload length {length} exceeds the server limit of {max} bytes")]
    TooLarge { length: u64, max: u64 },

    #[error("upload incomplete: {offset} of {length} bytes received")]
    Incomplete { offset: u64, length: u64 },

    #[error("inconsistent session state: {0}")]
    InconsistentState(String),

    #[error(transparent)]
    Core(#[from] berth_core::Error),

    #[error(transparent)]
    Destination(#[from] DestinationError),

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("working file error: {0}")]
    Io(#[from] std::io::Error),
}

pub type TransferResult<T> = std::result::Result<T, TransferError>;

/// Snapshot of an upload session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    pub upload_key: UploadKey,
    pub offset: u64,
    pub length: u64,
    pub state: UploadState,
    pub destination: Option<DestinationPath>,
    pub expires_at: OffsetDateTime,
}

impl SessionInfo {
    fn from_row(row: &UploadSessionRow) -> TransferResult<Self> {
        let corrupt = |what: &str| {
            TransferError::InconsistentState(format!("session {} has invalid {what}", row.upload_key))
        };
        Ok(Self {
            upload_key: UploadKey::parse(&row.upload_key)?,
            offset: u64::try_from(row.upload_offset).map_err(|_| corrupt("offset"))?,
            length: u64::try_from(row.upload_length).map_err(|_| corrupt("length"))?,
            state: UploadState::parse(&row.state)?,
            destination: row
                .destination
                .as_deref()
                .map(DestinationPath::parse)
                .transpose()?,
            expires_at: row.expires_at,
        })
    }
}

/// Result of accepting bytes into a session.
#[derive(Clone, Debug)]
pub struct WriteOutcome {
    /// Offset after this write.
    pub offset: u64,
    /// Present when this write finished the upload.
    pub completion: Option<CompletionOutcome>,
}

/// Limits applied by the engine.
#[derive(Clone, Debug)]
pub struct TransferLimits {
    pub max_upload_size: u64,
    pub session_expiry: time::Duration,
}

/// Per-key locks serializing requests on one session.
///
/// An entry lives only while some request holds or waits for its lock.
#[derive(Default)]
struct SessionLocks {
    keys: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionLocks {
    fn lock_for(&self, key: &UploadKey) -> Arc<AsyncMutex<()>> {
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        keys.entry(key.to_string()).or_default().clone()
    }
}

/// Held while a request works on a session; released on drop.
struct InFlight {
    locks: Arc<SessionLocks>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl InFlight {
    /// Take the session lock, or fail with `Busy` if another request holds it.
    fn try_acquire(locks: &Arc<SessionLocks>, key: &UploadKey) -> TransferResult<Self> {
        let guard = locks
            .lock_for(key)
            .try_lock_owned()
            .map_err(|_| TransferError::Busy(key.to_string()))?;
        Ok(Self::held(locks, key, guard))
    }

    /// Wait until the session lock is free.
    async fn acquire(locks: &Arc<SessionLocks>, key: &UploadKey) -> Self {
        let guard = locks.lock_for(key).lock_owned().await;
        Self::held(locks, key, guard)
    }

    fn held(locks: &Arc<SessionLocks>, key: &UploadKey, guard: OwnedMutexGuard<()>) -> Self {
        Self {
            locks: locks.clone(),
            key: key.to_string(),
            guard: Some(guard),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut keys = self.locks.keys.lock().unwrap_or_else(|e| e.into_inner());
        if keys
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            keys.remove(&self.key);
        }
    }
}

/// tus session lifecycle over the metadata store and a local cache directory.
#[derive(Clone)]
pub struct TransferEngine {
    metadata: Arc<dyn MetadataStore>,
    resolver: DestinationResolver,
    reconciler: CompletionReconciler,
    cache_dir: PathBuf,
    limits: TransferLimits,
    in_flight: Arc<SessionLocks>,
}

impl TransferEngine {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        resolver: DestinationResolver,
        reconciler: CompletionReconciler,
        cache_dir: impl Into<PathBuf>,
        limits: TransferLimits,
    ) -> Self {
        Self {
            metadata,
            resolver,
            reconciler,
            cache_dir: cache_dir.into(),
            limits,
            in_flight: Arc::default(),
        }
    }

    pub fn resolver(&self) -> &DestinationResolver {
        &self.resolver
    }

    pub fn reconciler(&self) -> &CompletionReconciler {
        &self.reconciler
    }

    pub fn limits(&self) -> &TransferLimits {
        &self.limits
    }

    /// Working file of a session: `.{upload_key}.part` in the cache directory.
    pub fn working_file(&self, upload_key: &UploadKey) -> PathBuf {
        self.cache_dir.join(format!(".{upload_key}.part"))
    }

    /// Open a new session.
    ///
    /// The destination is resolved and stored before this returns, so every
    /// chunk lands in a session whose placement is already fixed. A zero-length
    /// upload completes immediately.
    #[tracing::instrument(skip(self, metadata_header), fields(upload_key))]
    pub async fn create_session(
        &self,
        upload_key: Option<UploadKey>,
        length: u64,
        metadata_header: &str,
    ) -> TransferResult<(SessionInfo, Option<CompletionOutcome>)> {
        if length > self.limits.max_upload_size {
            return Err(TransferError::TooLarge {
                length,
                max: self.limits.max_upload_size,
            });
        }

        let metadata = UploadMetadata::decode(metadata_header)?;
        let upload_key = upload_key.unwrap_or_default();
        tracing::Span::current().record("upload_key", tracing::field::display(&upload_key));

        // Completion checks these again.
        policy::require_context(&metadata)?;
        let (_, field_policy) = self.resolver.policy_for(&metadata)?;
        policy::validate(&metadata, &field_policy)?;
        if let Some(max) = field_policy.max_size
            && length > max
        {
            return Err(berth_core::Error::FileTooLarge { size: length, max }.into());
        }

        let destination = self.resolver.resolve(&upload_key, &metadata).await?;

        let now = OffsetDateTime::now_utc();
        let row = UploadSessionRow {
            upload_key: upload_key.to_string(),
            metadata_header: metadata_header.to_string(),
            destination: None,
            upload_length: i64::try_from(length).unwrap_or(i64::MAX),
            upload_offset: 0,
            state: UploadState::Open.as_str().to_string(),
            created_at: now,
            updated_at: now,
            expires_at: now + self.limits.session_expiry,
        };
        match self.metadata.create_session(&row).await {
            Ok(()) => {}
            Err(MetadataError::AlreadyExists(_)) => {
                return Err(TransferError::AlreadyExists(upload_key.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        self.metadata
            .set_destination(row.upload_key.as_str(), &destination.to_string(), now)
            .await?;

        if let Err(e) = self.create_working_file(&upload_key).await {
            tracing::error!(error = %e, "Failed to create working file");
            self.metadata.delete_session(upload_key.as_str()).await?;
            return Err(e.into());
        }

        UPLOAD_SESSIONS_CREATED.inc();
        tracing::info!(
            destination = %destination,
            length,
            "Upload session created"
        );

        let info = SessionInfo {
            upload_key: upload_key.clone(),
            offset: 0,
            length,
            state: UploadState::Open,
            destination: Some(destination),
            expires_at: row.expires_at,
        };

        if length == 0 {
            let _in_flight = InFlight::try_acquire(&self.in_flight, &upload_key)?;
            self.metadata
                .update_state(upload_key.as_str(), UploadState::Received.as_str(), now)
                .await?;
            let outcome = self.finish(&upload_key).await?;
            return Ok((
                SessionInfo {
                    state: UploadState::Received,
                    ..info
                },
                Some(outcome),
            ));
        }

        Ok((info, None))
    }

    /// Create an empty working file for a session that was just inserted.
    ///
    /// The key is unique in the session store, so a leftover file under the
    /// same name belongs to no live session and is truncated.
    async fn create_working_file(&self, upload_key: &UploadKey) -> std::io::Result<()> {
        fs::create_dir_all(&self.cache_dir).await?;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.working_file(upload_key))
            .await?;
        Ok(())
    }

    /// Current state of a live session.
    pub async fn session(&self, upload_key: &UploadKey) -> TransferResult<SessionInfo> {
        let row = self.load(upload_key).await?;
        SessionInfo::from_row(&row)
    }

    /// Append `data` at `offset`.
    #[tracing::instrument(skip(self, data), fields(upload_key = %upload_key, size = data.len()))]
    pub async fn write_chunk(
        &self,
        upload_key: &UploadKey,
        offset: u64,
        data: Bytes,
    ) -> TransferResult<WriteOutcome> {
        let _in_flight = InFlight::try_acquire(&self.in_flight, upload_key)?;
        let session = self.session(upload_key).await?;

        if session.state != UploadState::Open {
            return Err(TransferError::SessionClosed {
                state: session.state,
            });
        }
        if offset != session.offset {
            return Err(TransferError::OffsetMismatch {
                expected: session.offset,
                actual: offset,
            });
        }
        let end = offset + data.len() as u64;
        if end > session.length {
            return Err(TransferError::ExceedsLength {
                end,
                length: session.length,
            });
        }

        let path = self.working_file(upload_key);
        let mut file = match fs::OpenOptions::new().append(true).open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(TransferError::InconsistentState(format!(
                    "working file for {upload_key} is missing"
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let on_disk = file.metadata().await?.len();
        if on_disk != offset {
            tracing::error!(on_disk, offset, "Working file length disagrees with session offset");
            return Err(TransferError::InconsistentState(format!(
                "working file for {upload_key} holds {on_disk} bytes, session offset is {offset}"
            )));
        }

        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        let now = OffsetDateTime::now_utc();
        let advanced = self
            .metadata
            .advance_offset(
                upload_key.as_str(),
                offset as i64,
                end as i64,
                now,
                now + self.limits.session_expiry,
            )
            .await?;
        if !advanced {
            // Roll the file back so it keeps matching the stored offset.
            let file = fs::OpenOptions::new().write(true).open(&path).await?;
            file.set_len(offset).await?;
            let current = self.session(upload_key).await?;
            return Err(TransferError::OffsetMismatch {
                expected: current.offset,
                actual: offset,
            });
        }
        BYTES_RECEIVED.inc_by(data.len() as u64);
        tracing::debug!(offset = end, length = session.length, "Chunk appended");

        if end < session.length {
            return Ok(WriteOutcome {
                offset: end,
                completion: None,
            });
        }

        self.metadata
            .update_state(upload_key.as_str(), UploadState::Received.as_str(), now)
            .await?;
        tracing::info!(length = session.length, "Upload received");

        let outcome = self.finish(upload_key).await?;
        Ok(WriteOutcome {
            offset: end,
            completion: Some(outcome),
        })
    }

    /// Retry completion of a received upload.
    ///
    /// Once a session has been committed and deleted, the record it created
    /// is returned instead, so the call is idempotent. A call that arrives
    /// while another request works on the session waits for it.
    #[tracing::instrument(skip(self), fields(upload_key = %upload_key))]
    pub async fn complete(&self, upload_key: &UploadKey) -> TransferResult<CompletionOutcome> {
        let _in_flight = InFlight::acquire(&self.in_flight, upload_key).await;

        let Some(row) = self.metadata.get_session(upload_key.as_str()).await? else {
            let result = self.committed_result(upload_key).await?;
            return Ok(CompletionOutcome {
                result,
                disposition: Disposition::Reused,
                warnings: Vec::new(),
            });
        };

        let session = SessionInfo::from_row(&row)?;
        match session.state {
            UploadState::Received => self.finish(upload_key).await,
            UploadState::Open => Err(TransferError::Incomplete {
                offset: session.offset,
                length: session.length,
            }),
            UploadState::Rejected => Err(TransferError::SessionClosed {
                state: session.state,
            }),
        }
    }

    /// Completion result of the record created by `upload_key`.
    pub async fn committed_result(
        &self,
        upload_key: &UploadKey,
    ) -> TransferResult<berth_core::CompletionResult> {
        let record = self
            .metadata
            .get_objects_by_upload_key(upload_key.as_str())
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TransferError::NotFound(upload_key.to_string()))?;
        Ok(self.reconciler.to_result(&record)?)
    }

    /// Run the reconciler for a received session and settle the session.
    async fn finish(&self, upload_key: &UploadKey) -> TransferResult<CompletionOutcome> {
        let row = self.load(upload_key).await?;
        let destination = row
            .destination
            .as_deref()
            .map(DestinationPath::parse)
            .transpose()?
            .ok_or_else(|| {
                TransferError::InconsistentState(format!("session {upload_key} has no destination"))
            })?;
        let metadata = UploadMetadata::decode(&row.metadata_header)?;
        let working_file = self.working_file(upload_key);

        let now = OffsetDateTime::now_utc();
        match self
            .reconciler
            .complete(upload_key, &destination, &metadata, &working_file)
            .await
        {
            Ok(outcome) => {
                self.metadata.delete_session(upload_key.as_str()).await?;
                remove_if_present(&working_file).await?;
                Ok(outcome)
            }
            Err(e) if e.is_rejection() => {
                self.metadata
                    .update_state(upload_key.as_str(), UploadState::Rejected.as_str(), now)
                    .await?;
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Load a session that exists and has not expired.
    async fn load(&self, upload_key: &UploadKey) -> TransferResult<UploadSessionRow> {
        let row = self
            .metadata
            .get_session(upload_key.as_str())
            .await?
            .ok_or_else(|| TransferError::NotFound(upload_key.to_string()))?;
        if row.expires_at < OffsetDateTime::now_utc() {
            return Err(TransferError::Expired(upload_key.to_string()));
        }
        Ok(row)
    }

    /// Delete sessions that expired before `now` along with their working files.
    ///
    /// Sessions with a request in flight are skipped until the next sweep.
    /// Stored objects and usage are never touched.
    pub async fn sweep_expired(&self, now: OffsetDateTime) -> TransferResult<usize> {
        let mut removed = 0;
        loop {
            let expired = self
                .metadata
                .get_expired_sessions(now, SWEEP_BATCH_SIZE)
                .await?;
            let batch = expired.len();
            let mut removed_in_batch = 0;

            for row in expired {
                let Ok(key) = UploadKey::parse(&row.upload_key) else {
                    self.metadata.delete_session(&row.upload_key).await?;
                    removed_in_batch += 1;
                    continue;
                };
                let Ok(_in_flight) = InFlight::try_acquire(&self.in_flight, &key) else {
                    tracing::debug!(upload_key = %key, "Expired session busy, skipping");
                    continue;
                };

                self.metadata.delete_session(key.as_str()).await?;
                remove_if_present(&self.working_file(&key)).await?;
                UPLOAD_SESSIONS_EXPIRED.inc();
                tracing::debug!(upload_key = %key, state = %row.state, "Expired upload session removed");
                removed_in_batch += 1;
            }

            removed += removed_in_batch;
            // A batch of only busy sessions would come back unchanged.
            if batch < SWEEP_BATCH_SIZE as usize || removed_in_batch == 0 {
                break;
            }
        }
        Ok(removed)
    }
}

async fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

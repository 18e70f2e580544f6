//! File-backed proposal store
//!
//! Layout: `<root>/<network>/<authority>/<nonce>.json`, one JSON record per
//! file, nonces zero-padded so directory listings sort numerically.
//!
//! A record is first written to a private temporary file and then
//! hard-linked to its final name. Linking fails when the name exists, so
//! the final file appears fully written and at most once, even with several
//! processes sharing the directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use dsync_core::{InsertOutcome, NetworkId, ProposalRecord, ProposalStore, StoreError};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Proposal store rooted at a directory
#[derive(Debug, Clone)]
pub struct FileProposalStore {
    root: PathBuf,
}

impl FileProposalStore {
    /// Store rooted at `root`; the directory is created on first insert
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn authority_dir(&self, network: &NetworkId, authority: Address) -> PathBuf {
        self.root
            .join(network.as_str())
            .join(format!("{authority:#x}"))
    }

    fn record_path(&self, record: &ProposalRecord) -> PathBuf {
        self.authority_dir(&record.network, record.authority)
            .join(format!("{:020}.json", record.nonce))
    }

    async fn read_record(path: &Path) -> Result<ProposalRecord, StoreError> {
        let raw = fs::read(path)
            .await
            .map_err(|e| StoreError::unavailable(format!("failed to read {}: {e}", path.display())))?;
        serde_json::from_slice(&raw)
            .map_err(|e| StoreError::corrupt(format!("{} is not a proposal record: {e}", path.display())))
    }

    /// Records of one authority, in nonce order
    async fn authority_records(
        &self,
        network: &NetworkId,
        authority: Address,
    ) -> Result<Vec<ProposalRecord>, StoreError> {
        read_dir_records(&self.authority_dir(network, authority)).await
    }

    async fn network_records(&self, network: &str) -> Result<Vec<ProposalRecord>, StoreError> {
        let mut records = Vec::new();
        for authority_dir in subdirectories(&self.root.join(network)).await? {
            records.extend(read_dir_records(&authority_dir).await?);
        }
        Ok(records)
    }
}

async fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(StoreError::unavailable(format!("failed to list {}: {e}", dir.display())))
        }
    };
    let mut dirs = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StoreError::unavailable(format!("failed to list {}: {e}", dir.display())))?
    {
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

async fn read_dir_records(dir: &Path) -> Result<Vec<ProposalRecord>, StoreError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(StoreError::unavailable(format!("failed to list {}: {e}", dir.display())))
        }
    };
    let mut paths = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StoreError::unavailable(format!("failed to list {}: {e}", dir.display())))?
    {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut records = Vec::with_capacity(paths.len());
    for path in paths {
        records.push(FileProposalStore::read_record(&path).await?);
    }
    Ok(records)
}

#[async_trait]
impl ProposalStore for FileProposalStore {
    async fn insert_if_absent(&self, record: &ProposalRecord) -> Result<InsertOutcome, StoreError> {
        let dir = self.authority_dir(&record.network, record.authority);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::unavailable(format!("failed to create {}: {e}", dir.display())))?;

        let path = self.record_path(record);
        let body = serde_json::to_vec_pretty(record)
            .map_err(|e| StoreError::corrupt(format!("failed to serialize proposal: {e}")))?;

        let tmp = dir.join(format!(
            ".{:020}.{}.{}.tmp",
            record.nonce,
            std::process::id(),
            record.hash
        ));
        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| StoreError::unavailable(format!("failed to create {}: {e}", tmp.display())))?;
        file.write_all(&body)
            .await
            .map_err(|e| StoreError::unavailable(format!("failed to write {}: {e}", tmp.display())))?;
        file.sync_all()
            .await
            .map_err(|e| StoreError::unavailable(format!("failed to sync {}: {e}", tmp.display())))?;
        drop(file);

        let linked = fs::hard_link(&tmp, &path).await;
        // the temporary name is private to this insert
        let _ = fs::remove_file(&tmp).await;

        match linked {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "proposal record written");
                Ok(InsertOutcome::Inserted)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = Self::read_record(&path).await?;
                Ok(InsertOutcome::NonceTaken { holder: holder.hash })
            }
            Err(e) => Err(StoreError::unavailable(format!(
                "failed to publish {}: {e}",
                path.display()
            ))),
        }
    }

    async fn highest_pending_nonce(
        &self,
        authority: Address,
        network: &NetworkId,
    ) -> Result<Option<u64>, StoreError> {
        Ok(self
            .authority_records(network, authority)
            .await?
            .into_iter()
            .filter(ProposalRecord::is_pending)
            .map(|r| r.nonce)
            .max())
    }

    async fn find_pending_by_hash(
        &self,
        authority: Address,
        network: &NetworkId,
        hash: B256,
    ) -> Result<Option<ProposalRecord>, StoreError> {
        Ok(self
            .authority_records(network, authority)
            .await?
            .into_iter()
            .filter(|r| r.hash == hash && r.is_pending())
            .max_by_key(|r| r.nonce))
    }

    async fn list(&self, network: Option<&NetworkId>) -> Result<Vec<ProposalRecord>, StoreError> {
        match network {
            Some(network) => self.network_records(network.as_str()).await,
            None => {
                let mut records = Vec::new();
                for dir in subdirectories(&self.root).await? {
                    if let Some(name) = dir.file_name().and_then(|n| n.to_str()) {
                        records.extend(self.network_records(name).await?);
                    }
                }
                Ok(records)
            }
        }
    }
}

//! Blob Manager - iroh-blobs storage for transferred assets
//!
//! Icons published by the phone are imported here and served to the watch
//! over the blobs protocol. Blobs are identified by BLAKE3 hash, which is
//! also the digest carried in an [`AssetRef`](crate::sync::protocol::AssetRef).
//!
//! # Storage Modes
//!
//! - **Memory**: lost on restart. The default, assets are rebuilt per cycle.
//! - **Persistent**: FsStore under a directory, for long-running phones.

use std::path::Path;

use bytes::Bytes;
use iroh::{Endpoint, EndpointId};
use iroh_blobs::store::fs::FsStore;
use iroh_blobs::store::mem::MemStore;
use iroh_blobs::Hash;
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};

/// Largest asset we accept: 1 MB
///
/// Icons are a few hundred bytes; anything near this is a bug upstream.
pub const MAX_ASSET_SIZE: usize = 1024 * 1024;

enum StoreInner {
    Memory(MemStore),
    Persistent(FsStore),
}

impl std::fmt::Debug for StoreInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreInner::Memory(_) => write!(f, "MemStore"),
            StoreInner::Persistent(_) => write!(f, "FsStore"),
        }
    }
}

/// Content-addressed asset storage
pub struct BlobManager {
    inner: StoreInner,
}

impl Clone for BlobManager {
    fn clone(&self) -> Self {
        match &self.inner {
            StoreInner::Memory(store) => Self {
                inner: StoreInner::Memory(store.clone()),
            },
            StoreInner::Persistent(store) => Self {
                inner: StoreInner::Persistent(store.clone()),
            },
        }
    }
}

impl std::fmt::Debug for BlobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobManager")
            .field("store", &self.inner)
            .finish()
    }
}

impl BlobManager {
    pub fn new_memory() -> Self {
        debug!("Creating in-memory blob manager");
        Self {
            inner: StoreInner::Memory(MemStore::new()),
        }
    }

    /// Persistent storage under `path`, created if missing.
    pub async fn new_persistent(path: &Path) -> SyncResult<Self> {
        tokio::fs::create_dir_all(path).await.map_err(|e| {
            SyncError::Blob(format!("Failed to create blob directory {:?}: {}", path, e))
        })?;

        info!(?path, "Creating persistent blob manager with FsStore");
        let store = FsStore::load(path).await.map_err(|e| {
            SyncError::Blob(format!("Failed to load FsStore at {:?}: {}", path, e))
        })?;

        Ok(Self {
            inner: StoreInner::Persistent(store),
        })
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self.inner, StoreInner::Persistent(_))
    }

    /// The store as the API handle the router and downloader need.
    pub fn store(&self) -> iroh_blobs::api::Store {
        match &self.inner {
            StoreInner::Memory(store) => store.as_ref().clone(),
            StoreInner::Persistent(store) => (*store).clone().into(),
        }
    }

    /// Import an asset, enforcing [`MAX_ASSET_SIZE`].
    pub async fn import_asset(&self, data: impl Into<Bytes>) -> SyncResult<Hash> {
        let data: Bytes = data.into();
        let len = data.len();
        if len > MAX_ASSET_SIZE {
            return Err(SyncError::Blob(format!(
                "Asset too large: {} bytes (max {} bytes)",
                len, MAX_ASSET_SIZE
            )));
        }

        let store = self.store();
        let tag = store
            .blobs()
            .add_bytes(data)
            .temp_tag()
            .await
            .map_err(|e| SyncError::Blob(format!("Failed to import blob: {}", e)))?;

        let hash = tag.hash();
        debug!(?hash, len, "Imported asset");
        Ok(hash)
    }

    /// Bytes for `hash`, or `None` if we do not hold it.
    pub async fn get_bytes(&self, hash: &Hash) -> SyncResult<Option<Bytes>> {
        if !self.has_blob(hash).await? {
            return Ok(None);
        }

        let store = self.store();
        let data = store
            .blobs()
            .get_bytes(*hash)
            .await
            .map_err(|e| SyncError::Blob(format!("Failed to get blob: {}", e)))?;

        Ok(Some(data))
    }

    pub async fn has_blob(&self, hash: &Hash) -> SyncResult<bool> {
        let store = self.store();
        store
            .blobs()
            .has(*hash)
            .await
            .map_err(|e| SyncError::Blob(format!("Failed to check blob: {}", e)))
    }

    /// Fetch `hash` from `provider` into the local store.
    pub async fn download_from(
        &self,
        hash: Hash,
        provider: EndpointId,
        endpoint: &Endpoint,
    ) -> SyncResult<()> {
        debug!(?hash, peer = %provider, "Downloading asset from peer");

        let store = self.store();
        let downloader = store.downloader(endpoint);

        let mut stream = downloader
            .download(hash, vec![provider])
            .stream()
            .await
            .map_err(|e| SyncError::Blob(format!("Failed to start download: {}", e)))?;

        use n0_future::StreamExt;
        while let Some(event) = stream.next().await {
            debug!(?hash, ?event, "Download progress");
        }

        debug!(?hash, "Asset download complete");
        Ok(())
    }

    /// Parse a hash from a hex string.
    pub fn parse_hash(hex_str: &str) -> SyncResult<Hash> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| SyncError::Blob(format!("Invalid hash hex: {}", e)))?;

        let arr: [u8; 32] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            SyncError::Blob(format!(
                "Invalid hash length: expected 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Hash::from_bytes(arr))
    }

    /// Format a hash as a hex string.
    pub fn hash_to_hex(hash: &Hash) -> String {
        hex::encode(hash.as_bytes())
    }

    /// Handler to mount on the router so peers can fetch our assets.
    pub fn protocol(&self) -> iroh_blobs::BlobsProtocol {
        iroh_blobs::BlobsProtocol::new(&self.store(), None)
    }
}

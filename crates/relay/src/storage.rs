//! The narrow object-storage interface the relay consumes. Concrete cloud
//! backends live behind this trait; the relay itself never streams file
//! bytes to clients, it only mints signed URLs and redirects.

use anyhow::Context;
use models::StorageProvider;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct HeadResult {
    pub size_bytes: i64,
    pub etag: String,
    pub content_type: Option<String>,
}

#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    fn provider(&self) -> StorageProvider;

    /// Signed PUT URL plus any headers the uploader must echo.
    async fn generate_upload_url(
        &self,
        bucket: Option<&str>,
        key: &str,
        content_type: &str,
        size_bytes: i64,
        expires_in: std::time::Duration,
    ) -> anyhow::Result<(String, HashMap<String, String>)>;

    /// Signed GET URL; `filename` populates Content-Disposition.
    async fn generate_download_url(
        &self,
        bucket: Option<&str>,
        key: &str,
        expires_in: std::time::Duration,
        filename: Option<&str>,
    ) -> anyhow::Result<String>;

    async fn head_object(&self, bucket: Option<&str>, key: &str) -> anyhow::Result<HeadResult>;

    async fn get_object(&self, bucket: Option<&str>, key: &str) -> anyhow::Result<Vec<u8>>;

    /// Returns the object's ETag: SHA-256 hex when the backend may choose.
    async fn put_object(
        &self,
        bucket: Option<&str>,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> anyhow::Result<String>;

    async fn copy_object(
        &self,
        bucket: Option<&str>,
        src_key: &str,
        dst_key: &str,
    ) -> anyhow::Result<()>;

    /// Idempotent: deleting a missing object succeeds.
    async fn delete_object(&self, bucket: Option<&str>, key: &str) -> anyhow::Result<()>;
}

/// Provider registry: one configured backend per provider.
#[derive(Clone)]
pub struct Storages {
    backends: HashMap<StorageProvider, std::sync::Arc<dyn ObjectStore>>,
}

impl Storages {
    pub fn new(backends: Vec<std::sync::Arc<dyn ObjectStore>>) -> Self {
        Self {
            backends: backends.into_iter().map(|b| (b.provider(), b)).collect(),
        }
    }

    pub fn get(&self, provider: StorageProvider) -> anyhow::Result<&dyn ObjectStore> {
        self.backends
            .get(&provider)
            .map(|b| b.as_ref())
            .with_context(|| format!("no storage backend configured for {provider:?}"))
    }
}

fn sha256_hex(body: &[u8]) -> String {
    use sha2::Digest;
    hex::encode(sha2::Sha256::digest(body))
}

/// Filesystem-backed store for local stacks. Download and upload URLs are
/// signed with an expiring keyed digest and served by a static file proxy
/// outside this process.
pub struct LocalDiskStore {
    root: std::path::PathBuf,
    public_base: url::Url,
    signing_secret: String,
}

impl LocalDiskStore {
    pub fn new(root: std::path::PathBuf, public_base: url::Url, signing_secret: String) -> Self {
        Self {
            root,
            public_base,
            signing_secret,
        }
    }

    fn object_path(&self, key: &str) -> std::path::PathBuf {
        self.root.join(key)
    }

    fn signed_url(
        &self,
        verb: &str,
        key: &str,
        expires_in: std::time::Duration,
        filename: Option<&str>,
    ) -> anyhow::Result<String> {
        let expires_at = chrono::Utc::now()
            + chrono::Duration::from_std(expires_in).context("URL expiry out of range")?;
        let expires_at = expires_at.timestamp();

        let sig = sha256_hex(
            format!("{}|{verb}|{key}|{expires_at}", self.signing_secret).as_bytes(),
        );

        let mut url = self
            .public_base
            .join(key)
            .context("building storage URL")?;
        url.query_pairs_mut()
            .append_pair("expires", &expires_at.to_string())
            .append_pair("signature", &sig);
        if let Some(filename) = filename {
            url.query_pairs_mut().append_pair("filename", filename);
        }
        Ok(url.to_string())
    }
}

#[async_trait::async_trait]
impl ObjectStore for LocalDiskStore {
    fn provider(&self) -> StorageProvider {
        StorageProvider::Local
    }

    async fn generate_upload_url(
        &self,
        _bucket: Option<&str>,
        key: &str,
        content_type: &str,
        _size_bytes: i64,
        expires_in: std::time::Duration,
    ) -> anyhow::Result<(String, HashMap<String, String>)> {
        let url = self.signed_url("put", key, expires_in, None)?;
        let headers =
            HashMap::from([("Content-Type".to_string(), content_type.to_string())]);
        Ok((url, headers))
    }

    async fn generate_download_url(
        &self,
        _bucket: Option<&str>,
        key: &str,
        expires_in: std::time::Duration,
        filename: Option<&str>,
    ) -> anyhow::Result<String> {
        self.signed_url("get", key, expires_in, filename)
    }

    async fn head_object(&self, _bucket: Option<&str>, key: &str) -> anyhow::Result<HeadResult> {
        let path = self.object_path(key);
        let body = tokio::fs::read(&path)
            .await
            .with_context(|| format!("missing object {key}"))?;
        Ok(HeadResult {
            size_bytes: body.len() as i64,
            etag: sha256_hex(&body),
            content_type: None,
        })
    }

    async fn get_object(&self, _bucket: Option<&str>, key: &str) -> anyhow::Result<Vec<u8>> {
        let path = self.object_path(key);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("missing object {key}"))
    }

    async fn put_object(
        &self,
        _bucket: Option<&str>,
        key: &str,
        body: Vec<u8>,
        _content_type: Option<&str>,
    ) -> anyhow::Result<String> {
        let path = self.object_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("creating object directory")?;
        }
        let etag = sha256_hex(&body);
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("writing object {key}"))?;
        Ok(etag)
    }

    async fn copy_object(
        &self,
        bucket: Option<&str>,
        src_key: &str,
        dst_key: &str,
    ) -> anyhow::Result<()> {
        let body = self.get_object(bucket, src_key).await?;
        self.put_object(bucket, dst_key, body, None).await?;
        Ok(())
    }

    async fn delete_object(&self, _bucket: Option<&str>, key: &str) -> anyhow::Result<()> {
        match tokio::fs::remove_file(self.object_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("deleting object {key}")),
        }
    }
}

/// In-process store used by tests.
pub struct MemoryStore {
    provider: StorageProvider,
    objects: std::sync::Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new(provider: StorageProvider) -> Self {
        Self {
            provider,
            objects: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn insert(&self, key: &str, body: Vec<u8>) {
        self.objects.lock().unwrap().insert(key.to_string(), body);
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    fn provider(&self) -> StorageProvider {
        self.provider
    }

    async fn generate_upload_url(
        &self,
        _bucket: Option<&str>,
        key: &str,
        content_type: &str,
        _size_bytes: i64,
        _expires_in: std::time::Duration,
    ) -> anyhow::Result<(String, HashMap<String, String>)> {
        Ok((
            format!("memory://{:?}/{key}", self.provider),
            HashMap::from([("Content-Type".to_string(), content_type.to_string())]),
        ))
    }

    async fn generate_download_url(
        &self,
        _bucket: Option<&str>,
        key: &str,
        expires_in: std::time::Duration,
        _filename: Option<&str>,
    ) -> anyhow::Result<String> {
        Ok(format!(
            "memory://{:?}/{key}?expires_in={}",
            self.provider,
            expires_in.as_secs()
        ))
    }

    async fn head_object(&self, _bucket: Option<&str>, key: &str) -> anyhow::Result<HeadResult> {
        let objects = self.objects.lock().unwrap();
        let body = objects
            .get(key)
            .with_context(|| format!("missing object {key}"))?;
        Ok(HeadResult {
            size_bytes: body.len() as i64,
            etag: sha256_hex(body),
            content_type: None,
        })
    }

    async fn get_object(&self, _bucket: Option<&str>, key: &str) -> anyhow::Result<Vec<u8>> {
        let objects = self.objects.lock().unwrap();
        objects
            .get(key)
            .cloned()
            .with_context(|| format!("missing object {key}"))
    }

    async fn put_object(
        &self,
        _bucket: Option<&str>,
        key: &str,
        body: Vec<u8>,
        _content_type: Option<&str>,
    ) -> anyhow::Result<String> {
        let etag = sha256_hex(&body);
        self.objects.lock().unwrap().insert(key.to_string(), body);
        Ok(etag)
    }

    async fn copy_object(
        &self,
        bucket: Option<&str>,
        src_key: &str,
        dst_key: &str,
    ) -> anyhow::Result<()> {
        let body = self.get_object(bucket, src_key).await?;
        self.put_object(bucket, dst_key, body, None).await?;
        Ok(())
    }

    async fn delete_object(&self, _bucket: Option<&str>, key: &str) -> anyhow::Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_local_disk_store_round_trip_and_signed_urls() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDiskStore::new(
            dir.path().to_owned(),
            url::Url::parse("http://127.0.0.1:8081/storage/").unwrap(),
            "secret".to_string(),
        );

        let etag = store
            .put_object(None, "imports/j1/export.zip", b"zipzip".to_vec(), None)
            .await
            .unwrap();
        assert_eq!(etag.len(), 64);
        assert_eq!(
            store.get_object(None, "imports/j1/export.zip").await.unwrap(),
            b"zipzip"
        );
        let head = store.head_object(None, "imports/j1/export.zip").await.unwrap();
        assert_eq!(head.size_bytes, 6);
        assert_eq!(head.etag, etag);

        let url = store
            .generate_download_url(
                None,
                "imports/j1/export.zip",
                std::time::Duration::from_secs(300),
                Some("export.zip"),
            )
            .await
            .unwrap();
        assert!(url.starts_with("http://127.0.0.1:8081/storage/imports/"));
        assert!(url.contains("expires="));
        assert!(url.contains("signature="));
        assert!(url.contains("filename=export.zip"));

        // Distinct keys sign differently.
        let other = store
            .generate_download_url(
                None,
                "imports/j2/export.zip",
                std::time::Duration::from_secs(300),
                None,
            )
            .await
            .unwrap();
        let sig = |u: &str| {
            u.split("signature=")
                .nth(1)
                .unwrap()
                .split('&')
                .next()
                .unwrap()
                .to_string()
        };
        assert_ne!(sig(&url), sig(&other));
    }

    #[tokio::test]
    async fn test_memory_store_round_trip_and_etag() {
        let store = MemoryStore::new(StorageProvider::R2);
        let etag = store
            .put_object(None, "users/u1/files/f1/report.md", b"hello".to_vec(), None)
            .await
            .unwrap();
        assert_eq!(etag.len(), 64, "etag must be sha-256 hex");

        let head = store
            .head_object(None, "users/u1/files/f1/report.md")
            .await
            .unwrap();
        assert_eq!(head.size_bytes, 5);
        assert_eq!(head.etag, etag);

        store
            .delete_object(None, "users/u1/files/f1/report.md")
            .await
            .unwrap();
        // Idempotent delete.
        store
            .delete_object(None, "users/u1/files/f1/report.md")
            .await
            .unwrap();
        assert!(store.head_object(None, "users/u1/files/f1/report.md").await.is_err());
    }
}

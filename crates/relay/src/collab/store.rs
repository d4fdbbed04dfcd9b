//! Persistence seam for rooms: the append-only update log and the per-room
//! compacted snapshot.

use std::collections::HashMap;

#[async_trait::async_trait]
pub trait DocStore: Send + Sync + 'static {
    /// Atomically append an update blob; returned ids are strictly
    /// monotonic across all rooms.
    async fn append(&self, room_id: &str, blob: &[u8]) -> anyhow::Result<i64>;

    /// Updates with id > `since_id`, in canonical replay order.
    async fn list_since(&self, room_id: &str, since_id: i64)
        -> anyhow::Result<Vec<(i64, Vec<u8>)>>;

    async fn get_snapshot(&self, room_id: &str) -> anyhow::Result<Option<(Vec<u8>, i64)>>;

    /// Overwrite the room snapshot. Racing writers must each record a
    /// consistent (snapshot, watermark) pair; the later write wins.
    async fn put_snapshot(&self, room_id: &str, blob: &[u8], watermark: i64)
        -> anyhow::Result<()>;

    /// Erase log tail and snapshot together.
    async fn delete_all(&self, room_id: &str) -> anyhow::Result<()>;
}

pub struct PgDocStore {
    pool: sqlx::PgPool,
}

impl PgDocStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl DocStore for PgDocStore {
    async fn append(&self, room_id: &str, blob: &[u8]) -> anyhow::Result<i64> {
        Ok(relay_sql::updates::append(room_id, blob, &self.pool).await?)
    }

    async fn list_since(
        &self,
        room_id: &str,
        since_id: i64,
    ) -> anyhow::Result<Vec<(i64, Vec<u8>)>> {
        let rows = relay_sql::updates::list_since(room_id, since_id, &self.pool).await?;
        Ok(rows.into_iter().map(|r| (r.id, r.yupdate)).collect())
    }

    async fn get_snapshot(&self, room_id: &str) -> anyhow::Result<Option<(Vec<u8>, i64)>> {
        let row = relay_sql::updates::get_snapshot(room_id, &self.pool).await?;
        Ok(row.map(|r| (r.snapshot, r.last_update_id)))
    }

    async fn put_snapshot(
        &self,
        room_id: &str,
        blob: &[u8],
        watermark: i64,
    ) -> anyhow::Result<()> {
        Ok(relay_sql::updates::put_snapshot(room_id, blob, watermark, &self.pool).await?)
    }

    async fn delete_all(&self, room_id: &str) -> anyhow::Result<()> {
        let mut txn = self.pool.begin().await?;
        relay_sql::updates::delete_all(room_id, &mut txn).await?;
        txn.commit().await?;
        Ok(())
    }
}

/// In-process store used by tests.
#[derive(Default)]
pub struct MemoryDocStore {
    state: std::sync::Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    log: HashMap<String, Vec<(i64, Vec<u8>)>>,
    snapshots: HashMap<String, (Vec<u8>, i64)>,
}

impl MemoryDocStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, room_id: &str) -> Option<(Vec<u8>, i64)> {
        self.state.lock().unwrap().snapshots.get(room_id).cloned()
    }

    pub fn log_len(&self, room_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .log
            .get(room_id)
            .map(|l| l.len())
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl DocStore for MemoryDocStore {
    async fn append(&self, room_id: &str, blob: &[u8]) -> anyhow::Result<i64> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state
            .log
            .entry(room_id.to_string())
            .or_default()
            .push((id, blob.to_vec()));
        Ok(id)
    }

    async fn list_since(
        &self,
        room_id: &str,
        since_id: i64,
    ) -> anyhow::Result<Vec<(i64, Vec<u8>)>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .log
            .get(room_id)
            .map(|log| {
                log.iter()
                    .filter(|(id, _)| *id > since_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_snapshot(&self, room_id: &str) -> anyhow::Result<Option<(Vec<u8>, i64)>> {
        Ok(self.state.lock().unwrap().snapshots.get(room_id).cloned())
    }

    async fn put_snapshot(
        &self,
        room_id: &str,
        blob: &[u8],
        watermark: i64,
    ) -> anyhow::Result<()> {
        self.state
            .lock()
            .unwrap()
            .snapshots
            .insert(room_id.to_string(), (blob.to_vec(), watermark));
        Ok(())
    }

    async fn delete_all(&self, room_id: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.log.remove(room_id);
        state.snapshots.remove(room_id);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_append_ids_strictly_increase_across_rooms() {
        let store = MemoryDocStore::new();
        let a = store.append("page_a", b"u1").await.unwrap();
        let b = store.append("page_b", b"u2").await.unwrap();
        let c = store.append("page_a", b"u3").await.unwrap();
        assert!(a < b && b < c);

        let replay = store.list_since("page_a", 0).await.unwrap();
        assert_eq!(replay.len(), 2);
        assert!(replay[0].0 < replay[1].0);
        assert_eq!(replay[0].1, b"u1");
        assert_eq!(replay[1].1, b"u3");
    }

    #[tokio::test]
    async fn test_delete_all_clears_log_and_snapshot() {
        let store = MemoryDocStore::new();
        store.append("page_p", b"u1").await.unwrap();
        store.put_snapshot("page_p", b"snap", 1).await.unwrap();

        store.delete_all("page_p").await.unwrap();
        assert!(store.list_since("page_p", 0).await.unwrap().is_empty());
        assert!(store.get_snapshot("page_p").await.unwrap().is_none());
    }
}

//! Process-wide room registry. One lock around the (room id -> room) map
//! makes join and leave race-free; each room is its own task beyond that.

use super::room::{self, ConnHandle, RoomCmd, RoomState};
use super::store::DocStore;
use crate::jobs::JobQueue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

#[derive(Clone)]
pub struct Rooms {
    inner: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<RoomCmd>>>>,
    store: Arc<dyn DocStore>,
    jobs: Arc<dyn JobQueue>,
    quiescence_idle: std::time::Duration,
}

impl Rooms {
    pub fn new(
        store: Arc<dyn DocStore>,
        jobs: Arc<dyn JobQueue>,
        quiescence_idle: std::time::Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            store,
            jobs,
            quiescence_idle,
        }
    }

    /// Attach a connection to the room, spawning and loading the room if it
    /// does not exist. Resolves once the room has emitted the initial sync
    /// into the connection's channel. Retries transparently when the join
    /// races a concurrent room retirement.
    pub async fn join(&self, room_id: &str, conn: ConnHandle) -> anyhow::Result<()> {
        for _ in 0..8 {
            let tx = self.get_or_spawn(room_id);

            let (ack_tx, ack_rx) = oneshot::channel();
            if tx
                .send(RoomCmd::Join {
                    conn: conn.clone(),
                    ack: ack_tx,
                })
                .is_err()
            {
                self.remove_if_closed(room_id);
                continue;
            }
            match ack_rx.await {
                Ok(()) => return Ok(()),
                // The room retired (or failed to load) before processing the
                // join; its channel is gone, so respawn and retry.
                Err(_) => {
                    self.remove_if_closed(room_id);
                    continue;
                }
            }
        }
        anyhow::bail!("failed to join room {room_id}: retirement race did not settle")
    }

    pub fn leave(&self, room_id: &str, conn_id: u64) {
        self.send(room_id, RoomCmd::Leave { conn_id });
    }

    pub fn update(&self, room_id: &str, conn_id: u64, bytes: Vec<u8>) {
        self.send(room_id, RoomCmd::Update { conn_id, bytes });
    }

    /// Send a JSON frame to every connection registered under the room id.
    /// A room with no members simply has nobody to notify.
    pub fn broadcast(&self, room_id: &str, frame: super::protocol::ServerFrame) {
        self.send(room_id, RoomCmd::Broadcast { frame });
    }

    fn send(&self, room_id: &str, cmd: RoomCmd) {
        let tx = {
            let map = self.inner.lock().unwrap();
            map.get(room_id).cloned()
        };
        if let Some(tx) = tx {
            let _ = tx.send(cmd);
        }
    }

    fn get_or_spawn(&self, room_id: &str) -> mpsc::UnboundedSender<RoomCmd> {
        let mut map = self.inner.lock().unwrap();
        if let Some(tx) = map.get(room_id) {
            return tx.clone();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let state = RoomState::new(
            room_id.to_string(),
            self.store.clone(),
            self.jobs.clone(),
            self.quiescence_idle,
        );
        tokio::spawn(room::serve(state, rx, Some(self.clone())));
        map.insert(room_id.to_string(), tx.clone());
        tx
    }

    fn remove_if_closed(&self, room_id: &str) {
        let mut map = self.inner.lock().unwrap();
        if let Some(tx) = map.get(room_id) {
            if tx.is_closed() {
                map.remove(room_id);
            }
        }
    }

    /// Drop the registry entry unconditionally (room failed to load).
    pub(super) fn forget(&self, room_id: &str) {
        self.inner.lock().unwrap().remove(room_id);
    }

    /// Called by an empty room that wants to exit. Holding the map lock,
    /// either hand back a command that raced in (the room keeps running) or
    /// unregister the room and let it stop. Joins that slip through after
    /// unregistration see their ack dropped and retry.
    pub(super) fn try_retire(
        &self,
        room_id: &str,
        rx: &mut mpsc::UnboundedReceiver<RoomCmd>,
    ) -> Option<RoomCmd> {
        let mut map = self.inner.lock().unwrap();
        match rx.try_recv() {
            Ok(cmd) => Some(cmd),
            Err(_) => {
                map.remove(room_id);
                None
            }
        }
    }

    #[cfg(test)]
    pub fn contains(&self, room_id: &str) -> bool {
        self.inner.lock().unwrap().contains_key(room_id)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::collab::room::Outbound;
    use crate::collab::store::MemoryDocStore;
    use crate::jobs::MemoryJobQueue;

    fn rooms() -> (Rooms, Arc<MemoryDocStore>) {
        let store = Arc::new(MemoryDocStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        (
            Rooms::new(store.clone(), queue, std::time::Duration::from_secs(60)),
            store,
        )
    }

    #[tokio::test]
    async fn test_join_creates_room_and_emits_initial_sync() {
        let (rooms, _store) = rooms();
        let (tx, mut rx) = mpsc::unbounded_channel();
        rooms
            .join(
                "page_a",
                ConnHandle {
                    id: 1,
                    user_id: 1,
                    read_only: false,
                    tx,
                },
            )
            .await
            .unwrap();

        assert!(rooms.contains("page_a"));
        match rx.recv().await {
            Some(Outbound::Binary(_)) => (),
            other => panic!("expected initial sync, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_room_retires_after_last_leave() {
        let (rooms, _store) = rooms();
        let (tx, _out) = mpsc::unbounded_channel();
        rooms
            .join(
                "page_a",
                ConnHandle {
                    id: 1,
                    user_id: 1,
                    read_only: false,
                    tx,
                },
            )
            .await
            .unwrap();

        rooms.leave("page_a", 1);

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while rooms.contains("page_a") {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("room must retire once empty");

        // A fresh join after retirement spawns a new room.
        let (tx, mut rx) = mpsc::unbounded_channel();
        rooms
            .join(
                "page_a",
                ConnHandle {
                    id: 2,
                    user_id: 1,
                    read_only: false,
                    tx,
                },
            )
            .await
            .unwrap();
        assert!(matches!(rx.recv().await, Some(Outbound::Binary(_))));
    }
}

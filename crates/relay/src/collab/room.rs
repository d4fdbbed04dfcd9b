//! A room is the in-memory coordinator for one page's edits. The room task
//! owns the authoritative CRDT document: every touch of the document happens
//! on this task, which is the serialisation point the protocol relies on.

use super::protocol::{self, ServerFrame};
use super::registry::Rooms;
use super::store::DocStore;
use crate::jobs::{self, JobQueue};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use yrs::updates::decoder::Decode;
use yrs::{ReadTxn, StateVector, Transact};

/// Messages sent to a connection by its room.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A CRDT payload: the initial sync after join, then rebroadcasts of
    /// other members' updates.
    Binary(Vec<u8>),
    /// A JSON control frame.
    Frame(ServerFrame),
}

/// A connection as its room sees it. A single user may hold several
/// connections (tabs); the room tracks handles, not users.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    pub id: u64,
    pub user_id: i64,
    pub read_only: bool,
    pub tx: mpsc::UnboundedSender<Outbound>,
}

#[derive(Debug)]
pub enum RoomCmd {
    Join {
        conn: ConnHandle,
        ack: oneshot::Sender<()>,
    },
    Leave {
        conn_id: u64,
    },
    Update {
        conn_id: u64,
        bytes: Vec<u8>,
    },
    /// Fan a JSON frame out to every member. Write-permission revocations
    /// additionally flip the affected connections' read-only flag.
    Broadcast {
        frame: ServerFrame,
    },
}

pub(super) struct RoomState {
    pub room_id: String,
    pub store: Arc<dyn DocStore>,
    pub jobs: Arc<dyn JobQueue>,
    pub quiescence_idle: std::time::Duration,

    doc: yrs::Doc,
    conns: Vec<ConnHandle>,
    /// Watermark of the last persisted snapshot.
    watermark: i64,
    /// Highest log id this room has appended or replayed.
    last_update_id: i64,
    /// Updates arrived since the last snapshot.
    dirty: bool,
}

impl RoomState {
    pub fn new(
        room_id: String,
        store: Arc<dyn DocStore>,
        jobs: Arc<dyn JobQueue>,
        quiescence_idle: std::time::Duration,
    ) -> Self {
        Self {
            room_id,
            store,
            jobs,
            quiescence_idle,
            doc: yrs::Doc::new(),
            conns: Vec::new(),
            watermark: 0,
            last_update_id: 0,
            dirty: false,
        }
    }

    /// Load the room: snapshot first, then replay updates past the
    /// watermark into a fresh document.
    async fn load(&mut self) -> anyhow::Result<()> {
        self.doc = yrs::Doc::new();
        let _text = self.doc.get_or_insert_text(protocol::DOC_TEXT_KEY);

        if let Some((snapshot, watermark)) = self.store.get_snapshot(&self.room_id).await? {
            self.apply_blob(&snapshot)?;
            self.watermark = watermark;
            self.last_update_id = watermark;
        }

        for (id, blob) in self.store.list_since(&self.room_id, self.watermark).await? {
            if let Err(err) = self.apply_blob(&blob) {
                tracing::warn!(room = %self.room_id, id, ?err, "skipping bad logged update");
            }
            self.last_update_id = id;
        }
        Ok(())
    }

    fn apply_blob(&mut self, blob: &[u8]) -> anyhow::Result<()> {
        let update = yrs::Update::decode_v1(blob)
            .map_err(|err| anyhow::anyhow!("decoding update: {err}"))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|err| anyhow::anyhow!("applying update: {err}"))?;
        Ok(())
    }

    fn encode_full_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    fn join(&mut self, conn: ConnHandle) {
        // Initial sync goes down the member's own channel before any
        // subsequent fan-out, so it observes updates in order.
        let _ = conn.tx.send(Outbound::Binary(self.encode_full_state()));
        self.conns.push(conn);
    }

    fn leave(&mut self, conn_id: u64) {
        self.conns.retain(|c| c.id != conn_id);
    }

    /// Apply one inbound client update. Returns true when the update was
    /// accepted (and the quiescence timer must reset).
    async fn apply_update(&mut self, conn_id: u64, bytes: Vec<u8>) -> bool {
        let Some(read_only) = self
            .conns
            .iter()
            .find(|c| c.id == conn_id)
            .map(|c| c.read_only)
        else {
            return false;
        };
        // Inbound updates from read-only connections are silently dropped:
        // not applied, not appended, not fanned out.
        if read_only {
            return false;
        }

        if let Err(err) = self.apply_blob(&bytes) {
            tracing::warn!(room = %self.room_id, conn_id, ?err, "rejecting malformed update");
            return false;
        }

        match self.store.append(&self.room_id, &bytes).await {
            Ok(id) => self.last_update_id = id,
            Err(err) => {
                tracing::error!(room = %self.room_id, ?err, "failed to append update");
                // The in-memory doc already advanced; the close-time
                // snapshot reconciles the log gap.
            }
        }
        self.dirty = true;

        // Fan the identical raw bytes out to every other member; never echo
        // back to the sender.
        for conn in &self.conns {
            if conn.id != conn_id {
                let _ = conn.tx.send(Outbound::Binary(bytes.clone()));
            }
        }
        true
    }

    fn broadcast(&mut self, frame: ServerFrame) {
        if let ServerFrame::WritePermissionRevoked { user_id } = &frame {
            for conn in &mut self.conns {
                if conn.user_id == *user_id {
                    conn.read_only = true;
                }
            }
        }
        for conn in &self.conns {
            let _ = conn.tx.send(Outbound::Frame(frame.clone()));
        }
    }

    /// Quiescence: compact the log into a snapshot and hand the text off to
    /// the derived-work dispatcher. A snapshot is written only when at least
    /// one real update has been observed; an untouched (empty) document must
    /// not poison subsequent reconnects with a degenerate snapshot.
    async fn on_quiescence(&mut self) {
        if !self.dirty {
            return;
        }

        let snapshot = self.encode_full_state();
        match self
            .store
            .put_snapshot(&self.room_id, &snapshot, self.last_update_id)
            .await
        {
            Ok(()) => {
                self.watermark = self.last_update_id;
                self.dirty = false;
            }
            Err(err) => {
                tracing::error!(room = %self.room_id, ?err, "failed to write snapshot");
                return;
            }
        }

        // Derived work runs off-task; edits continue immediately.
        if let Err(err) = self
            .jobs
            .enqueue(
                jobs::SYNC_SNAPSHOT_WITH_PAGE,
                serde_json::json!({ "room_id": self.room_id }),
            )
            .await
        {
            tracing::error!(room = %self.room_id, ?err, "failed to enqueue snapshot sync");
        }
    }
}

/// Serve one room until its last member leaves (and the registry retires
/// it) or every command sender is gone.
pub(super) async fn serve(
    mut room: RoomState,
    mut rx: mpsc::UnboundedReceiver<RoomCmd>,
    rooms: Option<Rooms>,
) {
    if let Err(err) = room.load().await {
        tracing::error!(room = %room.room_id, ?err, "failed to load room");
        if let Some(rooms) = &rooms {
            rooms.forget(&room.room_id);
        }
        // Dropping rx drops pending Join acks; joiners retry against a
        // fresh room.
        return;
    }

    let mut quiesce_at: Option<tokio::time::Instant> = None;

    loop {
        let cmd = match quiesce_at {
            Some(at) => tokio::select! {
                cmd = rx.recv() => cmd,
                () = tokio::time::sleep_until(at) => {
                    room.on_quiescence().await;
                    quiesce_at = None;
                    continue;
                }
            },
            None => rx.recv().await,
        };

        let Some(cmd) = cmd else { break };

        match cmd {
            RoomCmd::Join { conn, ack } => {
                room.join(conn);
                let _ = ack.send(());
            }
            RoomCmd::Update { conn_id, bytes } => {
                if room.apply_update(conn_id, bytes).await {
                    // Each accepted update cancels the pending timer and
                    // schedules afresh.
                    quiesce_at =
                        Some(tokio::time::Instant::now() + room.quiescence_idle);
                }
            }
            RoomCmd::Broadcast { frame } => room.broadcast(frame),
            RoomCmd::Leave { conn_id } => {
                room.leave(conn_id);
                if room.conns.is_empty() {
                    // Last member left: compact immediately rather than at
                    // the timer, then retire the room unless a join raced in.
                    room.on_quiescence().await;
                    quiesce_at = None;

                    if let Some(rooms) = &rooms {
                        match rooms.try_retire(&room.room_id, &mut rx) {
                            Some(raced) => {
                                // A command arrived while retiring; keep going.
                                match raced {
                                    RoomCmd::Join { conn, ack } => {
                                        room.join(conn);
                                        let _ = ack.send(());
                                    }
                                    other => {
                                        tracing::debug!(room = %room.room_id, ?other, "command raced room retirement");
                                    }
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        }
    }

    // Flush whatever the timer hadn't captured yet.
    room.on_quiescence().await;
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::collab::store::MemoryDocStore;
    use crate::jobs::MemoryJobQueue;
    use yrs::GetString;

    fn encode_insert(doc: &yrs::Doc, at: u32, text: &str) -> Vec<u8> {
        let t = doc.get_or_insert_text(protocol::DOC_TEXT_KEY);
        let sv = doc.transact().state_vector();
        {
            let mut txn = doc.transact_mut();
            yrs::Text::insert(&t, &mut txn, at, text);
        }
        doc.transact().encode_state_as_update_v1(&sv)
    }

    struct Member {
        conn_id: u64,
        rx: mpsc::UnboundedReceiver<Outbound>,
    }

    fn spawn_room(
        store: Arc<MemoryDocStore>,
        jobs: Arc<MemoryJobQueue>,
        idle: std::time::Duration,
    ) -> mpsc::UnboundedSender<RoomCmd> {
        let room = RoomState::new("page_p1".to_string(), store, jobs, idle);
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(serve(room, rx, None));
        tx
    }

    async fn join(tx: &mpsc::UnboundedSender<RoomCmd>, conn_id: u64, read_only: bool) -> Member {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(RoomCmd::Join {
            conn: ConnHandle {
                id: conn_id,
                user_id: conn_id as i64,
                read_only,
                tx: out_tx,
            },
            ack: ack_tx,
        })
        .unwrap();
        ack_rx.await.unwrap();

        // Every member receives the initial sync payload first.
        match out_rx.recv().await {
            Some(Outbound::Binary(_)) => (),
            other => panic!("expected initial sync, got {other:?}"),
        }
        Member {
            conn_id,
            rx: out_rx,
        }
    }

    #[tokio::test]
    async fn test_update_fans_out_without_echo() {
        let store = Arc::new(MemoryDocStore::new());
        let jobs = Arc::new(MemoryJobQueue::new());
        let tx = spawn_room(store.clone(), jobs, std::time::Duration::from_secs(60));

        let mut a = join(&tx, 1, false).await;
        let mut b = join(&tx, 2, false).await;

        let client = yrs::Doc::new();
        let u1 = encode_insert(&client, 0, "hello");
        tx.send(RoomCmd::Update {
            conn_id: a.conn_id,
            bytes: u1.clone(),
        })
        .unwrap();

        // B receives exactly the raw bytes A sent.
        match b.rx.recv().await {
            Some(Outbound::Binary(bytes)) => assert_eq!(bytes, u1),
            other => panic!("expected rebroadcast, got {other:?}"),
        }
        // A gets no echo.
        assert!(a.rx.try_recv().is_err());

        // The log holds exactly one entry whose blob equals the update.
        let logged = store.list_since("page_p1", 0).await.unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].1, u1);
    }

    #[tokio::test]
    async fn test_read_only_updates_are_dropped() {
        let store = Arc::new(MemoryDocStore::new());
        let jobs = Arc::new(MemoryJobQueue::new());
        let tx = spawn_room(store.clone(), jobs, std::time::Duration::from_secs(60));

        let viewer = join(&tx, 1, true).await;
        let mut editor = join(&tx, 2, false).await;

        let client = yrs::Doc::new();
        tx.send(RoomCmd::Update {
            conn_id: viewer.conn_id,
            bytes: encode_insert(&client, 0, "sneaky"),
        })
        .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(editor.rx.try_recv().is_err(), "viewer update must not fan out");
        assert_eq!(store.log_len("page_p1"), 0, "viewer update must not be logged");
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiescence_writes_one_snapshot() {
        let store = Arc::new(MemoryDocStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let idle = std::time::Duration::from_secs(5);
        let tx = spawn_room(store.clone(), queue.clone(), idle);

        let a = join(&tx, 1, false).await;

        let client = yrs::Doc::new();
        tx.send(RoomCmd::Update {
            conn_id: a.conn_id,
            bytes: encode_insert(&client, 0, "hello"),
        })
        .unwrap();
        tx.send(RoomCmd::Update {
            conn_id: a.conn_id,
            bytes: encode_insert(&client, 5, " world"),
        })
        .unwrap();

        // Let the paused clock pass the idle period once.
        tokio::time::sleep(idle + std::time::Duration::from_secs(1)).await;

        let (snapshot, watermark) = store.snapshot("page_p1").expect("snapshot written");
        assert_eq!(watermark, 2);

        // Replay equivalence: snapshot alone reproduces the document.
        let doc = yrs::Doc::new();
        let t = doc.get_or_insert_text(protocol::DOC_TEXT_KEY);
        doc.transact_mut()
            .apply_update(yrs::Update::decode_v1(&snapshot).unwrap())
            .unwrap();
        assert_eq!(t.get_string(&doc.transact()), "hello world");

        // Derived work was handed off exactly once for this idle period.
        let handoffs = queue.enqueued(crate::jobs::SYNC_SNAPSHOT_WITH_PAGE);
        assert_eq!(handoffs.len(), 1);
        assert_eq!(handoffs[0]["room_id"], "page_p1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_document_writes_no_snapshot() {
        let store = Arc::new(MemoryDocStore::new());
        let jobs = Arc::new(MemoryJobQueue::new());
        let idle = std::time::Duration::from_secs(5);
        let tx = spawn_room(store.clone(), jobs, idle);

        let a = join(&tx, 1, false).await;

        tokio::time::sleep(idle * 3).await;
        assert!(store.snapshot("page_p1").is_none());

        // Leaving (even the last member) still must not write one.
        tx.send(RoomCmd::Leave { conn_id: a.conn_id }).unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert!(store.snapshot("page_p1").is_none());
    }

    #[tokio::test]
    async fn test_last_leave_compacts_immediately() {
        let store = Arc::new(MemoryDocStore::new());
        let jobs = Arc::new(MemoryJobQueue::new());
        // Timer far in the future; only the leave may trigger the write.
        let tx = spawn_room(store.clone(), jobs, std::time::Duration::from_secs(3600));

        let a = join(&tx, 1, false).await;
        let client = yrs::Doc::new();
        tx.send(RoomCmd::Update {
            conn_id: a.conn_id,
            bytes: encode_insert(&client, 0, "bye"),
        })
        .unwrap();
        tx.send(RoomCmd::Leave { conn_id: a.conn_id }).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                if store.snapshot("page_p1").is_some() {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("snapshot after last leave");
    }
}

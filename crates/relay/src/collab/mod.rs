//! The CRDT relay: per-page rooms that fan out binary updates, persist an
//! append-only update log with periodic compacted snapshots, and drive
//! derived work on quiescence.

pub mod connection;
pub mod protocol;
pub mod registry;
pub mod room;
pub mod store;

pub use protocol::{close_code, room_id_for_page, ServerFrame};
pub use registry::Rooms;
pub use room::{ConnHandle, Outbound, RoomCmd};
pub use store::{DocStore, MemoryDocStore, PgDocStore};

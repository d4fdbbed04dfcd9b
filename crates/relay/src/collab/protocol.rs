//! Wire vocabulary of the collaborative protocol.
//!
//! Binary frames carry opaque CRDT updates in both directions: the initial
//! sync payload after load, client updates inbound, and rebroadcasts of
//! other clients' updates outbound. Text frames carry the JSON messages
//! below. A rejected connection is briefly accepted, receives an `error`
//! frame, and is then closed with the matching close code so client
//! libraries surface the reason to application code.
//!
//! Known hazard, deliberately left to clients: when a client builds a
//! document locally while the server independently builds the same-looking
//! document, their operation identifiers differ and merging concatenates
//! the two texts. The relay does not dedupe.

use models::ErrorCode;

/// Server-to-client JSON frames.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Error { code: ErrorCode, message: String },
    LinksUpdated { page_id: String },
    AccessRevoked { user_id: i64 },
    WritePermissionRevoked { user_id: i64 },
}

pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const NOT_AUTHENTICATED: u16 = 4001;
    pub const ACCESS_DENIED: u16 = 4003;
    pub const RATE_LIMITED: u16 = 4029;
}

/// The shared text key every client binds its editor to.
pub const DOC_TEXT_KEY: &str = "codemirror";

pub fn room_id_for_page(page_external_id: models::Id) -> String {
    format!("page_{page_external_id}")
}

/// Inverse of `room_id_for_page`.
pub fn page_external_id_for_room(room_id: &str) -> Option<models::Id> {
    room_id.rsplit('_').next()?.parse().ok()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_error_frame_shape() {
        let frame = ServerFrame::Error {
            code: ErrorCode::RateLimited,
            message: "Too many connection attempts".to_string(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "error",
                "code": "rate_limited",
                "message": "Too many connection attempts",
            })
        );
    }

    #[test]
    fn test_notification_frame_shapes() {
        let json = serde_json::to_value(ServerFrame::LinksUpdated {
            page_id: "08ab45cd12345678".to_string(),
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "links_updated", "page_id": "08ab45cd12345678"})
        );

        let json = serde_json::to_value(ServerFrame::WritePermissionRevoked { user_id: 12 }).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "write_permission_revoked", "user_id": 12})
        );
    }

    #[test]
    fn test_room_id_round_trip() {
        let id: models::Id = "08ab45cd12345678".parse().unwrap();
        let room = room_id_for_page(id);
        assert_eq!(room, "page_08ab45cd12345678");
        assert_eq!(page_external_id_for_room(&room), Some(id));
    }
}

//! Message payload types for inbound and outbound websocket communication.
//!
//! Inbound payloads are the commands a connected client may issue; outbound
//! payloads are the control notifications the server pushes back. Relayed
//! message bodies are opaque text and are delivered unmodified, outside of
//! these types.

use serde::{Deserialize, Serialize};

use crate::{ConnId, GroupId};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(tag = "type")]
pub enum InboundPayload {
    JoinGroup(JoinGroupPayload),
    LeaveGroup(LeaveGroupPayload),
    SendGroup(SendGroupPayload),
    SendTo(SendToPayload),
    Broadcast(BroadcastPayload),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JoinGroupPayload {
    pub group: GroupId,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LeaveGroupPayload {
    pub group: GroupId,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SendGroupPayload {
    pub group: GroupId,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SendToPayload {
    pub connection_id: ConnId,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastPayload {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(tag = "type")]
pub enum OutboundPayload {
    Connected(ConnectedPayload),
    ClientDisconnected(ClientDisconnectedPayload),
    GroupJoined(GroupJoinedPayload),
    GroupLeft(GroupLeftPayload),
    PermissionDenied(PermissionDeniedPayload),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    pub connection_id: ConnId,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ClientDisconnectedPayload {
    pub connection_id: ConnId,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GroupJoinedPayload {
    pub group: GroupId,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GroupLeftPayload {
    pub group: GroupId,
}

/// Which capability a denied request was missing.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PermissionKind {
    Join,
    Send,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PermissionDeniedPayload {
    pub action: PermissionKind,
    pub group: GroupId,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_tagged_inbound_payloads() {
        let payload: InboundPayload =
            serde_json::from_str(r#"{"type":"JOIN_GROUP","group":"lobby"}"#).unwrap();
        assert!(matches!(
            payload,
            InboundPayload::JoinGroup(JoinGroupPayload { ref group }) if group == "lobby"
        ));

        let payload: InboundPayload = serde_json::from_str(
            r#"{"type":"SEND_TO","connectionId":"abc123","message":"hi"}"#,
        )
        .unwrap();
        assert!(matches!(
            payload,
            InboundPayload::SendTo(SendToPayload { ref connection_id, ref message })
                if connection_id == "abc123" && message == "hi"
        ));
    }

    #[test]
    fn rejects_unknown_inbound_type() {
        assert!(serde_json::from_str::<InboundPayload>(r#"{"type":"NOPE"}"#).is_err());
    }

    #[test]
    fn serializes_denial_with_lowercase_action() {
        let payload = OutboundPayload::PermissionDenied(PermissionDeniedPayload {
            action: PermissionKind::Send,
            group: "lobby".to_string(),
        });
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"type":"PERMISSION_DENIED","action":"send","group":"lobby"}"#
        );
    }
}

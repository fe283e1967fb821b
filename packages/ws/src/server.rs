//! The connection registry.
//!
//! A single [`WsServer`] task owns every routing table: live sessions, group
//! membership, and join/send permission grants. All mutation goes through the
//! command channel and is processed strictly in order, so a permission check
//! followed by a membership change is atomic with respect to every other
//! operation.

use std::{
    collections::{BTreeSet, HashMap},
    io,
};

use rand::{distr::Alphanumeric, Rng as _};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::models::{
    ClientDisconnectedPayload, ConnectedPayload, GroupJoinedPayload, GroupLeftPayload,
    OutboundPayload, PermissionDeniedPayload, PermissionKind,
};
use crate::{ConnId, GroupId, Msg};

/// Length of generated connection ids.
const CONN_ID_LEN: usize = 16;

/// A command received by the [`WsServer`].
#[derive(Debug)]
enum Command {
    Connect {
        conn_tx: mpsc::Sender<Msg>,
        res_tx: oneshot::Sender<ConnId>,
    },

    Disconnect {
        conn: ConnId,
    },

    Broadcast {
        msg: Msg,
    },

    JoinGroup {
        conn: ConnId,
        group: GroupId,
    },

    LeaveGroup {
        conn: ConnId,
        group: GroupId,
    },

    SendToGroup {
        group: GroupId,
        sender: ConnId,
        msg: Msg,
    },

    SendToConnection {
        sender: ConnId,
        receiver: ConnId,
        msg: Msg,
    },

    GrantJoinPermission {
        conn: ConnId,
        groups: Vec<GroupId>,
        res_tx: oneshot::Sender<Result<(), PermissionGrantError>>,
    },

    RevokeJoinPermission {
        conn: ConnId,
        groups: Vec<GroupId>,
    },

    GrantSendPermission {
        conn: ConnId,
        groups: Vec<GroupId>,
        res_tx: oneshot::Sender<Result<(), PermissionGrantError>>,
    },

    RevokeSendPermission {
        conn: ConnId,
        groups: Vec<GroupId>,
    },
}

#[derive(Debug, Error)]
pub enum PermissionGrantError {
    #[error("Connection not found for '{0}'")]
    ConnectionNotFound(ConnId),
}

/// The push-messaging server.
///
/// Contains the logic of how connections message each other plus group and
/// permission management.
///
/// Call and spawn [`run`](Self::run) to start processing commands.
#[derive(Debug)]
pub struct WsServer {
    /// Map of connection IDs to their message senders.
    sessions: HashMap<ConnId, mpsc::Sender<Msg>>,

    /// Group name to member set. Groups are created on first join and empty
    /// groups persist.
    groups: HashMap<GroupId, BTreeSet<ConnId>>,

    /// The group each connection currently belongs to, if any.
    conn_groups: HashMap<ConnId, GroupId>,

    /// Groups each connection may join. Entries may outlive the connection.
    join_permissions: HashMap<ConnId, BTreeSet<GroupId>>,

    /// Groups each connection may send to. Entries may outlive the connection.
    send_permissions: HashMap<ConnId, BTreeSet<GroupId>>,

    /// Command receiver.
    cmd_rx: flume::Receiver<Command>,
}

impl WsServer {
    pub fn new() -> (Self, WsServerHandle) {
        let (cmd_tx, cmd_rx) = flume::unbounded();

        (
            Self {
                sessions: HashMap::new(),
                groups: HashMap::new(),
                conn_groups: HashMap::new(),
                join_permissions: HashMap::new(),
                send_permissions: HashMap::new(),
                cmd_rx,
            },
            WsServerHandle { cmd_tx },
        )
    }

    /// Queue a message for one connection.
    ///
    /// Messages for unknown ids are dropped silently. A full or closed queue
    /// marks the connection dead; the caller reaps it once its own iteration
    /// is done.
    fn deliver(&self, id: &ConnId, msg: impl Into<Msg>, dead: &mut Vec<ConnId>) {
        let Some(session) = self.sessions.get(id) else {
            log::trace!("Dropping message for unknown connection {id}");
            return;
        };
        if session.try_send(msg.into()).is_err() {
            log::info!("Outbound queue full or closed for {id}; disconnecting");
            dead.push(id.clone());
        }
    }

    fn deliver_payload(&self, id: &ConnId, payload: &OutboundPayload, dead: &mut Vec<ConnId>) {
        // unwrap: serializing our own payload type cannot fail
        self.deliver(id, serde_json::to_string(payload).unwrap(), dead);
    }

    /// Deregister dead connections, following any further deaths discovered
    /// while broadcasting their departure.
    fn reap(&mut self, mut dead: Vec<ConnId>) {
        while let Some(id) = dead.pop() {
            self.remove_session(&id, &mut dead);
        }
    }

    /// Remove `id` from the session map and its group, then notify every
    /// remaining connection of the departure. No-op for unknown ids, so a
    /// second deregistration never produces a second broadcast.
    fn remove_session(&mut self, id: &ConnId, dead: &mut Vec<ConnId>) {
        if self.sessions.remove(id).is_none() {
            return;
        }

        log::info!("Connection {id} deregistered");

        if let Some(group) = self.conn_groups.remove(id) {
            if let Some(members) = self.groups.get_mut(&group) {
                members.remove(id);
            }
        }

        let payload = OutboundPayload::ClientDisconnected(ClientDisconnectedPayload {
            connection_id: id.clone(),
        });
        // unwrap: serializing our own payload type cannot fail
        let msg = serde_json::to_string(&payload).unwrap();
        for (conn, session) in &self.sessions {
            if session.try_send(msg.clone()).is_err() {
                dead.push(conn.clone());
            }
        }
    }

    /// Register a new session and assign it a unique connection ID.
    fn connect(&mut self, conn_tx: mpsc::Sender<Msg>) -> ConnId {
        let id = generate_conn_id();
        // Ids are random over a space large enough that a collision among
        // live sessions is a programming error, not an operational one.
        assert!(
            !self.sessions.contains_key(&id),
            "connection id collision: {id}"
        );

        log::info!("Connection {id} registered");
        self.sessions.insert(id.clone(), conn_tx);

        let mut dead = Vec::new();
        self.deliver_payload(
            &id,
            &OutboundPayload::Connected(ConnectedPayload {
                connection_id: id.clone(),
            }),
            &mut dead,
        );
        self.reap(dead);

        id
    }

    /// Deregister a connection. Idempotent.
    fn disconnect(&mut self, id: &ConnId) {
        let mut dead = Vec::new();
        self.remove_session(id, &mut dead);
        self.reap(dead);
    }

    /// Deliver a message to every registered connection.
    fn broadcast_all(&mut self, msg: &str) {
        log::debug!("Broadcasting message to all connections");
        let mut dead = Vec::new();
        for (conn, session) in &self.sessions {
            if session.try_send(msg.to_string()).is_err() {
                dead.push(conn.clone());
            }
        }
        self.reap(dead);
    }

    /// Join `conn` to a group, leaving any group it was in before. Requires
    /// join permission; denial is reported to the requester only.
    fn join_group(&mut self, conn: &ConnId, group: &GroupId) {
        let mut dead = Vec::new();

        if self.has_join_permission(conn, group) {
            if let Some(previous) = self.conn_groups.remove(conn) {
                if let Some(members) = self.groups.get_mut(&previous) {
                    members.remove(conn);
                }
            }

            self.groups
                .entry(group.clone())
                .or_default()
                .insert(conn.clone());
            self.conn_groups.insert(conn.clone(), group.clone());

            log::debug!("Connection {conn} joined group {group}");
            self.deliver_payload(
                conn,
                &OutboundPayload::GroupJoined(GroupJoinedPayload {
                    group: group.clone(),
                }),
                &mut dead,
            );
        } else {
            log::debug!("Connection {conn} denied joining group {group}");
            self.deliver_payload(
                conn,
                &OutboundPayload::PermissionDenied(PermissionDeniedPayload {
                    action: PermissionKind::Join,
                    group: group.clone(),
                }),
                &mut dead,
            );
        }

        self.reap(dead);
    }

    /// Remove `conn` from `group`, but only if that is the group it is
    /// currently in. No-op otherwise.
    fn leave_group(&mut self, conn: &ConnId, group: &GroupId) {
        if self.conn_groups.get(conn) != Some(group) {
            return;
        }

        self.conn_groups.remove(conn);
        if let Some(members) = self.groups.get_mut(group) {
            members.remove(conn);
        }

        log::debug!("Connection {conn} left group {group}");
        let mut dead = Vec::new();
        self.deliver_payload(
            conn,
            &OutboundPayload::GroupLeft(GroupLeftPayload {
                group: group.clone(),
            }),
            &mut dead,
        );
        self.reap(dead);
    }

    /// Deliver a message to every member of `group` except the sender.
    /// Requires send permission; denial is reported to the sender only.
    fn send_to_group(&mut self, group: &GroupId, sender: &ConnId, msg: &str) {
        let mut dead = Vec::new();

        if self.has_send_permission(sender, group) {
            let members: Vec<ConnId> = self
                .groups
                .get(group)
                .map(|members| {
                    members
                        .iter()
                        .filter(|member| *member != sender)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();

            for member in &members {
                self.deliver(member, msg, &mut dead);
            }
        } else {
            log::debug!("Connection {sender} denied sending to group {group}");
            self.deliver_payload(
                sender,
                &OutboundPayload::PermissionDenied(PermissionDeniedPayload {
                    action: PermissionKind::Send,
                    group: group.clone(),
                }),
                &mut dead,
            );
        }

        self.reap(dead);
    }

    /// Deliver a message directly to one connection. No permission check is
    /// applied on this path; unknown receivers are dropped silently.
    fn send_to_connection(&mut self, sender: &ConnId, receiver: &ConnId, msg: &str) {
        log::debug!("Direct message from {sender} to {receiver}");
        let mut dead = Vec::new();
        self.deliver(receiver, msg, &mut dead);
        self.reap(dead);
    }

    /// Assign the set of groups `conn` may join. The connection must
    /// currently be registered.
    fn grant_join_permission(
        &mut self,
        conn: &ConnId,
        groups: Vec<GroupId>,
    ) -> Result<(), PermissionGrantError> {
        if !self.sessions.contains_key(conn) {
            return Err(PermissionGrantError::ConnectionNotFound(conn.clone()));
        }
        self.join_permissions
            .insert(conn.clone(), groups.into_iter().collect());
        Ok(())
    }

    /// Remove the named groups from `conn`'s joinable set. Permitted even for
    /// ids that are no longer registered.
    fn revoke_join_permission(&mut self, conn: &ConnId, groups: &[GroupId]) {
        if let Some(permissions) = self.join_permissions.get_mut(conn) {
            for group in groups {
                permissions.remove(group);
            }
        }
    }

    /// Assign the set of groups `conn` may send to. The connection must
    /// currently be registered.
    fn grant_send_permission(
        &mut self,
        conn: &ConnId,
        groups: Vec<GroupId>,
    ) -> Result<(), PermissionGrantError> {
        if !self.sessions.contains_key(conn) {
            return Err(PermissionGrantError::ConnectionNotFound(conn.clone()));
        }
        self.send_permissions
            .insert(conn.clone(), groups.into_iter().collect());
        Ok(())
    }

    /// Remove the named groups from `conn`'s sendable set. Permitted even for
    /// ids that are no longer registered.
    fn revoke_send_permission(&mut self, conn: &ConnId, groups: &[GroupId]) {
        if let Some(permissions) = self.send_permissions.get_mut(conn) {
            for group in groups {
                permissions.remove(group);
            }
        }
    }

    fn has_join_permission(&self, conn: &ConnId, group: &GroupId) -> bool {
        self.join_permissions
            .get(conn)
            .is_some_and(|permissions| permissions.contains(group))
    }

    fn has_send_permission(&self, conn: &ConnId, group: &GroupId) -> bool {
        self.send_permissions
            .get(conn)
            .is_some_and(|permissions| permissions.contains(group))
    }

    fn process(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { conn_tx, res_tx } => {
                let id = self.connect(conn_tx);
                if let Err(error) = res_tx.send(id) {
                    log::error!("Failed to respond to connect: {error:?}");
                }
            }

            Command::Disconnect { conn } => self.disconnect(&conn),

            Command::Broadcast { msg } => self.broadcast_all(&msg),

            Command::JoinGroup { conn, group } => self.join_group(&conn, &group),

            Command::LeaveGroup { conn, group } => self.leave_group(&conn, &group),

            Command::SendToGroup { group, sender, msg } => {
                self.send_to_group(&group, &sender, &msg);
            }

            Command::SendToConnection {
                sender,
                receiver,
                msg,
            } => self.send_to_connection(&sender, &receiver, &msg),

            Command::GrantJoinPermission {
                conn,
                groups,
                res_tx,
            } => {
                if let Err(error) = res_tx.send(self.grant_join_permission(&conn, groups)) {
                    log::error!("Failed to respond to join permission grant: {error:?}");
                }
            }

            Command::RevokeJoinPermission { conn, groups } => {
                self.revoke_join_permission(&conn, &groups);
            }

            Command::GrantSendPermission {
                conn,
                groups,
                res_tx,
            } => {
                if let Err(error) = res_tx.send(self.grant_send_permission(&conn, groups)) {
                    log::error!("Failed to respond to send permission grant: {error:?}");
                }
            }

            Command::RevokeSendPermission { conn, groups } => {
                self.revoke_send_permission(&conn, &groups);
            }
        }
    }

    /// Process commands until every handle has been dropped.
    pub async fn run(mut self) -> io::Result<()> {
        let cmd_rx = self.cmd_rx.clone();
        while let Ok(cmd) = cmd_rx.recv_async().await {
            self.process(cmd);
        }

        Ok(())
    }
}

fn generate_conn_id() -> ConnId {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(CONN_ID_LEN)
        .map(char::from)
        .collect()
}

/// Handle and command sender for the websocket server.
///
/// Reduces boilerplate of setting up response channels in WebSocket handlers.
#[derive(Debug, Clone)]
pub struct WsServerHandle {
    cmd_tx: flume::Sender<Command>,
}

impl WsServerHandle {
    /// Register a client message sender and obtain the assigned connection ID.
    pub async fn connect(&self, conn_tx: mpsc::Sender<Msg>) -> ConnId {
        let (res_tx, res_rx) = oneshot::channel();

        // unwrap: ws server should not have been dropped
        self.cmd_tx
            .send(Command::Connect { conn_tx, res_tx })
            .unwrap();

        // unwrap: ws server does not drop the response channel
        res_rx.await.unwrap()
    }

    /// Deregister a connection. Idempotent.
    pub fn disconnect(&self, conn: ConnId) {
        // unwrap: ws server should not have been dropped
        self.cmd_tx.send(Command::Disconnect { conn }).unwrap();
    }

    /// Deliver a message to every registered connection.
    pub fn broadcast_all(&self, msg: impl Into<Msg>) {
        // unwrap: ws server should not have been dropped
        self.cmd_tx
            .send(Command::Broadcast { msg: msg.into() })
            .unwrap();
    }

    pub fn join_group(&self, conn: ConnId, group: GroupId) {
        // unwrap: ws server should not have been dropped
        self.cmd_tx.send(Command::JoinGroup { conn, group }).unwrap();
    }

    pub fn leave_group(&self, conn: ConnId, group: GroupId) {
        // unwrap: ws server should not have been dropped
        self.cmd_tx
            .send(Command::LeaveGroup { conn, group })
            .unwrap();
    }

    pub fn send_to_group(&self, group: GroupId, sender: ConnId, msg: impl Into<Msg>) {
        // unwrap: ws server should not have been dropped
        self.cmd_tx
            .send(Command::SendToGroup {
                group,
                sender,
                msg: msg.into(),
            })
            .unwrap();
    }

    pub fn send_to_connection(&self, sender: ConnId, receiver: ConnId, msg: impl Into<Msg>) {
        // unwrap: ws server should not have been dropped
        self.cmd_tx
            .send(Command::SendToConnection {
                sender,
                receiver,
                msg: msg.into(),
            })
            .unwrap();
    }

    /// Assign the groups `conn` may join.
    ///
    /// # Errors
    ///
    /// * If `conn` is not a registered connection
    pub async fn grant_join_permission(
        &self,
        conn: ConnId,
        groups: Vec<GroupId>,
    ) -> Result<(), PermissionGrantError> {
        let (res_tx, res_rx) = oneshot::channel();

        // unwrap: ws server should not have been dropped
        self.cmd_tx
            .send(Command::GrantJoinPermission {
                conn,
                groups,
                res_tx,
            })
            .unwrap();

        // unwrap: ws server does not drop the response channel
        res_rx.await.unwrap()
    }

    pub fn revoke_join_permission(&self, conn: ConnId, groups: Vec<GroupId>) {
        // unwrap: ws server should not have been dropped
        self.cmd_tx
            .send(Command::RevokeJoinPermission { conn, groups })
            .unwrap();
    }

    /// Assign the groups `conn` may send to.
    ///
    /// # Errors
    ///
    /// * If `conn` is not a registered connection
    pub async fn grant_send_permission(
        &self,
        conn: ConnId,
        groups: Vec<GroupId>,
    ) -> Result<(), PermissionGrantError> {
        let (res_tx, res_rx) = oneshot::channel();

        // unwrap: ws server should not have been dropped
        self.cmd_tx
            .send(Command::GrantSendPermission {
                conn,
                groups,
                res_tx,
            })
            .unwrap();

        // unwrap: ws server does not drop the response channel
        res_rx.await.unwrap()
    }

    pub fn revoke_send_permission(&self, conn: ConnId, groups: Vec<GroupId>) {
        // unwrap: ws server should not have been dropped
        self.cmd_tx
            .send(Command::RevokeSendPermission { conn, groups })
            .unwrap();
    }
}

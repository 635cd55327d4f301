use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::client::{ClientId, ConnectedClient, ConnectionRegistry, Outbound, OutboundSender};
use super::error::CollabError;
use super::room::{pick_color, Member, SessionRoom};
use crate::config::Config;
use crate::crdt::{MergeDocument, MergeEngine};
use crate::db::{CollabStore, StoreError};
use crate::models::{
    AuthSuccessMessage, ClientInfo, ClientJoinMessage, ClientLeaveMessage, ClientListMessage, CommentBody,
    CommentBroadcastMessage, CursorBroadcastMessage, CursorData, DocumentUpdateMessage, DocumentVersion,
    ErrorMessage, EventType, InitialStateMessage, NewDocumentVersion, NewEvent, NewSession,
    PresenceBroadcastMessage, PresenceState, ServerMessage, WelcomeMessage,
};
use crate::services::auth_service::Authenticator;

/// Tunables of the engine taken from the application config
#[derive(Debug, Clone)]
pub struct HubSettings {
    pub snapshot_min_interval: Duration,
    pub default_document_type: String,
}

impl HubSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            snapshot_min_interval: config.snapshot_min_interval(),
            default_document_type: config.default_document_type.clone(),
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Which logical document a join targets when the session is created
#[derive(Debug, Clone, Default)]
pub struct DocumentRef {
    pub document_type: Option<String>,
    pub document_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct HubStats {
    pub connections: usize,
    pub authenticated: usize,
    pub sessions: usize,
    pub loaded_documents: usize,
    pub dirty_documents: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub archived_sessions: u64,
    pub purged_events: u64,
}

/// Live document contents served to the HTTP API
pub struct LiveDocument {
    pub json: Value,
    pub state: Vec<u8>,
}

/// Connection registry, session registry and document engine of one server.
pub struct CollabHub {
    settings: HubSettings,
    store: Arc<dyn CollabStore>,
    engine: Arc<dyn MergeEngine>,
    auth: Arc<Authenticator>,
    connections: ConnectionRegistry,
    rooms: RwLock<HashMap<String, Arc<Mutex<SessionRoom>>>>,
}

impl CollabHub {
    pub fn new(
        settings: HubSettings,
        store: Arc<dyn CollabStore>,
        engine: Arc<dyn MergeEngine>,
        auth: Arc<Authenticator>,
    ) -> Self {
        info!("Collaboration hub ready (merge engine: {}, store: {})", engine.name(), store.backend());
        Self {
            settings,
            store,
            engine,
            auth,
            connections: ConnectionRegistry::new(),
            rooms: RwLock::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<dyn MergeEngine> {
        &self.engine
    }

    // ---- connections ----

    /// Register a new socket and greet it with its client id
    pub async fn on_connect(&self, tx: OutboundSender) -> ClientId {
        let client = self.connections.register(tx).await;
        info!("Client connected: {}", client.id);
        client.send(ServerMessage::Welcome(WelcomeMessage {
            message: "Connected to collaboration server".to_string(),
            client_id: client.id.clone(),
        }));
        client.id
    }

    /// Tear down everything a socket owned. Safe to call more than once.
    pub async fn on_disconnect(&self, client_id: &str) {
        let Some(client) = self.connections.get(client_id).await else {
            return;
        };
        if client.session_id.is_some() {
            if let Err(e) = self.leave_session(client_id).await {
                warn!("Leave on disconnect failed for client {}: {}", client_id, e);
            }
        }
        if let Some(client) = self.connections.remove(client_id).await {
            let connected_for = Utc::now() - client.connected_at;
            info!("Client disconnected: {} (connected {}s)", client_id, connected_for.num_seconds());
        }
    }

    pub async fn mark_alive(&self, client_id: &str) {
        self.connections.update(client_id, |c| c.alive = true).await;
    }

    /// Best-effort direct message to one client
    pub async fn send_to(&self, client_id: &str, msg: ServerMessage) {
        match self.connections.get(client_id).await {
            Some(client) => {
                if !client.send(msg) {
                    debug!("Writer of client {} is gone", client_id);
                }
            }
            None => debug!("Dropping message for unknown client {}", client_id),
        }
    }

    pub async fn authenticate(
        &self,
        client_id: &str,
        token: &str,
        claimed_user_id: Option<&str>,
        claimed_name: Option<&str>,
    ) {
        let identity = match self.auth.verify(token, claimed_user_id, claimed_name) {
            Ok(identity) => identity,
            Err(e) => {
                warn!("Authentication failed for client {}: {}", client_id, e);
                self.send_to(client_id, ServerMessage::AuthError(ErrorMessage { message: e.to_string() }))
                    .await;
                return;
            }
        };

        let updated = self
            .connections
            .update(client_id, |c| {
                c.authenticated = true;
                c.user_id = Some(identity.user_id.clone());
                c.username = Some(identity.username.clone());
            })
            .await;
        if updated {
            info!("Client {} authenticated as {}", client_id, identity.user_id);
            self.send_to(
                client_id,
                ServerMessage::AuthSuccess(AuthSuccessMessage {
                    user_id: identity.user_id,
                    username: identity.username,
                }),
            )
            .await;
        }
    }

    async fn require_identity(
        &self,
        client_id: &str,
        action: &'static str,
    ) -> Result<(ConnectedClient, String, String), CollabError> {
        let client = self
            .connections
            .get(client_id)
            .await
            .ok_or_else(|| CollabError::UnknownClient(client_id.to_string()))?;
        let (user_id, username) = client
            .identity()
            .map(|(u, n)| (u.to_string(), n.to_string()))
            .ok_or(CollabError::Unauthenticated(action))?;
        Ok((client, user_id, username))
    }

    async fn room(&self, session_id: &str) -> Option<Arc<Mutex<SessionRoom>>> {
        self.rooms.read().await.get(session_id).cloned()
    }

    async fn room_or_create(&self, session_id: &str) -> Arc<Mutex<SessionRoom>> {
        if let Some(room) = self.room(session_id).await {
            return room;
        }
        self.rooms
            .write()
            .await
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SessionRoom::new(session_id))))
            .clone()
    }

    /// Drop the room entry once nobody is in it and nothing else holds it
    async fn reclaim_room(&self, session_id: &str) {
        let mut rooms = self.rooms.write().await;
        let idle = match rooms.get(session_id) {
            Some(room) => Arc::strong_count(room) == 1 && room.try_lock().map(|r| r.is_idle()).unwrap_or(false),
            None => false,
        };
        if idle {
            rooms.remove(session_id);
            debug!("Reclaimed room for session {}", session_id);
        }
    }

    // ---- sessions ----

    pub async fn join_session(
        &self,
        client_id: &str,
        session_id: &str,
        display_name: Option<&str>,
        doc_ref: DocumentRef,
    ) -> Result<(), CollabError> {
        let (client, user_id, username) = self.require_identity(client_id, "join a session").await?;
        if session_id.trim().is_empty() {
            return Err(CollabError::Protocol("sessionId must not be empty".to_string()));
        }
        let username = display_name.filter(|n| !n.trim().is_empty()).map(str::to_string).unwrap_or(username);

        if client.session_id.is_some() {
            self.leave_session(client_id).await?;
        }

        let room_handle = self.room_or_create(session_id).await;
        let result = {
            let mut room = room_handle.lock().await;
            self.join_locked(&mut room, &client, &user_id, &username, doc_ref).await
        };
        drop(room_handle);
        if result.is_err() {
            self.reclaim_room(session_id).await;
        }
        result
    }

    async fn join_locked(
        &self,
        room: &mut SessionRoom,
        client: &ConnectedClient,
        user_id: &str,
        username: &str,
        doc_ref: DocumentRef,
    ) -> Result<(), CollabError> {
        let session_id = room.session_id.clone();

        // Everything fallible first, the registries only change once it all worked
        let session = match self.store.get_session(&session_id).await? {
            Some(session) => session,
            None => {
                let new_session = NewSession {
                    session_id: session_id.clone(),
                    name: format!("{}'s session", username),
                    document_type: doc_ref
                        .document_type
                        .unwrap_or_else(|| self.settings.default_document_type.clone()),
                    document_id: doc_ref.document_id.unwrap_or_else(|| session_id.clone()),
                    owner_id: user_id.to_string(),
                };
                match self.store.create_session(new_session).await {
                    Ok(session) => session,
                    // Lost a creation race against another server
                    Err(StoreError::Conflict(_)) => self
                        .store
                        .get_session(&session_id)
                        .await?
                        .ok_or_else(|| StoreError::NotFound(format!("session {}", session_id)))?,
                    Err(e) => return Err(e.into()),
                }
            }
        };
        self.store.update_last_activity(&session_id).await?;

        let new_doc = match room.doc {
            Some(_) => None,
            None => Some(self.materialize(&session.document_type, &session.document_id).await?),
        };

        let participants = self.store.get_participants(&session_id).await?;
        let color = pick_color(&room.colors_in_use());
        self.store.add_participant(&session_id, user_id, username, &color).await?;

        let state = match (&new_doc, &room.doc) {
            (Some(doc), _) | (None, Some(doc)) => doc.encode_state()?,
            (None, None) => Vec::new(),
        };

        // Commit to the registries
        if let Some(doc) = new_doc {
            room.document_type = session.document_type.clone();
            room.document_id = session.document_id.clone();
            room.doc = Some(doc);
            room.dirty = false;
            room.last_persisted = Some(Instant::now());
        }
        self.connections
            .update(&client.id, |c| {
                c.session_id = Some(session_id.clone());
                c.color = Some(color.clone());
            })
            .await;
        room.members.insert(
            client.id.clone(),
            Member {
                client_id: client.id.clone(),
                user_id: user_id.to_string(),
                username: username.to_string(),
                color: color.clone(),
                tx: client.tx.clone(),
            },
        );

        client.send(ServerMessage::InitialState(InitialStateMessage {
            client_id: client.id.clone(),
            state,
            username: username.to_string(),
            color: color.clone(),
        }));

        let clients = participants
            .into_iter()
            .filter(|p| p.user_id != user_id)
            .map(|p| ClientInfo {
                client_id: room.member_for_user(&p.user_id).map(|m| m.client_id.clone()),
                user_id: p.user_id,
                username: p.display_name,
                color: p.color,
                cursor_position: p.cursor_position,
                selection: p.selection,
                presence: p.presence,
            })
            .collect();
        client.send(ServerMessage::ClientList(ClientListMessage { clients }));

        room.broadcast(
            &ServerMessage::ClientJoin(ClientJoinMessage {
                client_id: client.id.clone(),
                user_id: user_id.to_string(),
                username: username.to_string(),
                color,
            }),
            Some(&client.id),
        );

        info!("Client {} ({}) joined session {}", client.id, user_id, session_id);
        self.record(&session_id, user_id, EventType::Join, &client.id, json!({ "username": username }))
            .await;
        Ok(())
    }

    /// Fresh document seeded from the newest stored version, if any
    async fn materialize(&self, document_type: &str, document_id: &str) -> Result<Box<dyn MergeDocument>, CollabError> {
        let mut doc = self.engine.new_document();
        match self.store.get_latest_document_version(document_type, document_id).await? {
            Some(version) => {
                doc.apply_update(&version.state)?;
                info!(
                    "Recovered {}/{} from version {} ({} bytes)",
                    document_type,
                    document_id,
                    version.version,
                    version.state.len()
                );
            }
            None => debug!("No stored version for {}/{}, starting empty", document_type, document_id),
        }
        Ok(doc)
    }

    pub async fn leave_session(&self, client_id: &str) -> Result<(), CollabError> {
        let client = self
            .connections
            .get(client_id)
            .await
            .ok_or_else(|| CollabError::UnknownClient(client_id.to_string()))?;
        let session_id = client.session_id.clone().ok_or(CollabError::NotInSession)?;
        let user_id = client.user_id.clone().unwrap_or_default();

        let mut user_still_joined = false;
        if let Some(room_handle) = self.room(&session_id).await {
            {
                let mut room = room_handle.lock().await;
                let member = room.members.remove(client_id);
                user_still_joined = room.member_for_user(&user_id).is_some();
                if room.members.is_empty() {
                    let mut saved = true;
                    if room.doc.is_some() && room.dirty {
                        if let Err(e) = self.persist_locked(&mut room, &user_id, "final").await {
                            error!("Final snapshot of session {} failed, document stays loaded: {}", session_id, e);
                            saved = false;
                        }
                    }
                    if saved {
                        room.doc = None;
                        room.dirty = false;
                        debug!("Session {} is empty, document unloaded", session_id);
                    }
                } else if member.is_some() {
                    room.broadcast(
                        &ServerMessage::ClientLeave(ClientLeaveMessage {
                            client_id: client_id.to_string(),
                            user_id: user_id.clone(),
                        }),
                        None,
                    );
                }
            }
            drop(room_handle);
            self.reclaim_room(&session_id).await;
        }

        // Another connection of the same user keeps the participant active
        if !user_still_joined {
            if let Err(e) = self.store.remove_participant(&session_id, &user_id).await {
                error!("Failed to deactivate participant {} in session {}: {}", user_id, session_id, e);
            }
        }
        self.record(&session_id, &user_id, EventType::Leave, client_id, json!({})).await;
        self.connections
            .update(client_id, |c| {
                c.session_id = None;
                c.color = None;
            })
            .await;
        info!("Client {} left session {}", client_id, session_id);
        Ok(())
    }

    async fn joined(&self, client_id: &str, action: &'static str) -> Result<(ConnectedClient, String, String, String), CollabError> {
        let (client, user_id, username) = self.require_identity(client_id, action).await?;
        let session_id = client.session_id.clone().ok_or(CollabError::NotInSession)?;
        Ok((client, user_id, username, session_id))
    }

    // ---- document ----

    pub async fn apply_update(&self, client_id: &str, update: &[u8]) -> Result<(), CollabError> {
        let (_, user_id, _, session_id) = self.joined(client_id, "submit updates").await?;
        let room_handle = self
            .room(&session_id)
            .await
            .ok_or_else(|| CollabError::DocumentNotLoaded(session_id.clone()))?;

        let snapshot_due = {
            let mut room = room_handle.lock().await;
            let doc = room
                .doc
                .as_mut()
                .ok_or_else(|| CollabError::DocumentNotLoaded(session_id.clone()))?;
            doc.apply_update(update)?;
            room.dirty = true;
            room.broadcast(
                &ServerMessage::DocumentUpdate(DocumentUpdateMessage {
                    update: update.to_vec(),
                    client_id: client_id.to_string(),
                }),
                Some(client_id),
            );
            room.take_snapshot_slot(self.settings.snapshot_min_interval)
        };

        if let Err(e) = self.store.update_last_activity(&session_id).await {
            error!("Failed to refresh activity of session {}: {}", session_id, e);
        }
        self.record(&session_id, &user_id, EventType::Update, client_id, json!({})).await;

        if snapshot_due {
            if let Err(e) = self.persist_snapshot(&session_id, &user_id).await {
                error!("Snapshot of session {} failed: {}", session_id, e);
            }
        }
        Ok(())
    }

    /// Write the live document of a session as a new version
    pub async fn persist_snapshot(&self, session_id: &str, user_id: &str) -> Result<Option<DocumentVersion>, CollabError> {
        let Some(room_handle) = self.room(session_id).await else {
            return Ok(None);
        };
        let mut room = room_handle.lock().await;
        if room.doc.is_none() {
            return Ok(None);
        }
        self.persist_locked(&mut room, user_id, "update").await.map(Some)
    }

    async fn persist_locked(&self, room: &mut SessionRoom, user_id: &str, reason: &str) -> Result<DocumentVersion, CollabError> {
        let (state, snapshot) = {
            let doc = room
                .doc
                .as_ref()
                .ok_or_else(|| CollabError::DocumentNotLoaded(room.session_id.clone()))?;
            (doc.encode_state()?, serde_json::to_vec(&doc.to_json()).map_err(StoreError::from)?)
        };

        let previous = self
            .store
            .get_latest_document_version(&room.document_type, &room.document_id)
            .await?;
        let version = previous.map(|v| v.version + 1).unwrap_or(1);

        let saved = self
            .store
            .save_document_version(NewDocumentVersion {
                session_id: room.session_id.clone(),
                document_type: room.document_type.clone(),
                document_id: room.document_id.clone(),
                version,
                snapshot,
                state,
                created_by: user_id.to_string(),
                metadata: json!({
                    "savedAt": Utc::now().to_rfc3339(),
                    "reason": reason,
                    "members": room.members.len(),
                }),
            })
            .await?;
        room.dirty = false;
        room.last_persisted = Some(Instant::now());
        Ok(saved)
    }

    /// Snapshot every loaded document with unsaved updates
    pub async fn persist_dirty(&self, reason: &str) -> usize {
        let rooms: Vec<Arc<Mutex<SessionRoom>>> = self.rooms.read().await.values().cloned().collect();
        let mut saved = 0;
        let mut emptied = Vec::new();
        for room_handle in rooms {
            let mut room = room_handle.lock().await;
            if room.doc.is_none() || !room.dirty {
                continue;
            }
            let author = room.members.values().next().map(|m| m.user_id.clone()).unwrap_or_else(|| "system".to_string());
            match self.persist_locked(&mut room, &author, reason).await {
                Ok(_) => {
                    saved += 1;
                    // Left behind by a failed final snapshot
                    if room.members.is_empty() {
                        room.doc = None;
                        debug!("Session {} is empty, document unloaded", room.session_id);
                        emptied.push(room.session_id.clone());
                    }
                }
                Err(e) => error!("Snapshot of session {} failed: {}", room.session_id, e),
            }
        }
        for session_id in emptied {
            self.reclaim_room(&session_id).await;
        }
        saved
    }

    pub async fn live_document(&self, session_id: &str) -> Result<Option<LiveDocument>, CollabError> {
        let Some(room_handle) = self.room(session_id).await else {
            return Ok(None);
        };
        let room = room_handle.lock().await;
        match &room.doc {
            Some(doc) => Ok(Some(LiveDocument { json: doc.to_json(), state: doc.encode_state()? })),
            None => Ok(None),
        }
    }

    /// Number of clients currently joined to a session
    pub async fn live_members(&self, session_id: &str) -> usize {
        match self.room(session_id).await {
            Some(room) => room.lock().await.members.len(),
            None => 0,
        }
    }

    // ---- presence, cursors, comments ----

    pub async fn update_cursor(&self, client_id: &str, position: Value, selection: Option<Value>) {
        let Ok((_, user_id, _, session_id)) = self.joined(client_id, "share a cursor").await else {
            return;
        };
        if let Err(e) = self
            .store
            .update_cursor_position(&session_id, &user_id, &position, selection.as_ref())
            .await
        {
            debug!("Cursor of {} in session {} not stored: {}", user_id, session_id, e);
        }
        self.fan_out(
            &session_id,
            client_id,
            ServerMessage::Cursor(CursorBroadcastMessage {
                data: CursorData {
                    client_id: client_id.to_string(),
                    user_id,
                    position,
                    selection,
                },
            }),
        )
        .await;
    }

    pub async fn update_presence(&self, client_id: &str, state: PresenceState) {
        let Ok((_, user_id, _, session_id)) = self.joined(client_id, "share presence").await else {
            return;
        };
        if let Err(e) = self.store.update_presence(&session_id, &user_id, &state).await {
            debug!("Presence of {} in session {} not stored: {}", user_id, session_id, e);
        }
        self.fan_out(
            &session_id,
            client_id,
            ServerMessage::Presence(PresenceBroadcastMessage {
                client_id: client_id.to_string(),
                user_id,
                state,
            }),
        )
        .await;
    }

    pub async fn add_comment(&self, client_id: &str, comment: CommentBody) -> Result<(), CollabError> {
        let (_, user_id, username, session_id) = self.joined(client_id, "comment").await?;
        if comment.text.trim().is_empty() {
            return Err(CollabError::Protocol("comment text must not be empty".to_string()));
        }
        self.record(
            &session_id,
            &user_id,
            EventType::Comment,
            client_id,
            json!({ "text": comment.text, "position": comment.position, "range": comment.range }),
        )
        .await;
        self.fan_out(
            &session_id,
            client_id,
            ServerMessage::Comment(CommentBroadcastMessage {
                client_id: client_id.to_string(),
                user_id,
                username,
                text: comment.text,
                position: comment.position,
                range: comment.range,
                timestamp: Utc::now().to_rfc3339(),
            }),
        )
        .await;
        Ok(())
    }

    async fn fan_out(&self, session_id: &str, sender: &str, msg: ServerMessage) {
        if let Some(room) = self.room(session_id).await {
            room.lock().await.broadcast(&msg, Some(sender));
        }
    }

    async fn record(&self, session_id: &str, user_id: &str, event_type: EventType, client_id: &str, payload: Value) {
        let event = NewEvent {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            event_type,
            client_id: client_id.to_string(),
            payload,
        };
        if let Err(e) = self.store.record_event(event).await {
            error!("Failed to record {} event for session {}: {}", event_type.as_str(), session_id, e);
        }
    }

    // ---- lifecycle ----

    /// Ping every socket and evict those that missed the previous ping
    pub async fn heartbeat(&self) -> usize {
        let dead = self.connections.heartbeat().await;
        for client_id in &dead {
            warn!("Client {} missed its heartbeat, terminating", client_id);
            if let Some(client) = self.connections.get(client_id).await {
                let _ = client.tx.send(Outbound::Close);
            }
            self.on_disconnect(client_id).await;
        }
        dead.len()
    }

    pub async fn run_maintenance(&self, archive_after_days: i64, purge_after_days: i64) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        match self.store.cleanup_inactive_sessions(archive_after_days).await {
            Ok(n) => report.archived_sessions = n,
            Err(e) => error!("Session archiving failed: {}", e),
        }
        match self.store.purge_old_events(purge_after_days).await {
            Ok(n) => report.purged_events = n,
            Err(e) => error!("Event purge failed: {}", e),
        }
        info!(
            "Maintenance done: {} sessions archived, {} events purged",
            report.archived_sessions, report.purged_events
        );
        report
    }

    pub async fn stats(&self) -> HubStats {
        let rooms: Vec<Arc<Mutex<SessionRoom>>> = self.rooms.read().await.values().cloned().collect();
        let mut stats = HubStats {
            connections: self.connections.len().await,
            authenticated: self.connections.authenticated_count().await,
            ..HubStats::default()
        };
        for room in rooms {
            let room = room.lock().await;
            if !room.members.is_empty() {
                stats.sessions += 1;
            }
            if room.doc.is_some() {
                stats.loaded_documents += 1;
                if room.dirty {
                    stats.dirty_documents += 1;
                }
            }
        }
        stats
    }
}

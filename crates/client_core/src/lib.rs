use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use futures::StreamExt;
use shared::{
    domain::{RoomId, UserId},
    protocol::{AccountEvent, AccountEventKind, MessagePayload, OutboundMessage, Room, UserSummary},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub mod channel;
pub mod error;
pub mod notify;
pub mod presence;
pub mod rest;
pub mod session;
pub mod stream;
pub mod timeline;
pub mod validate;

use channel::{MissingRoomTransport, RoomConnection, RoomSignal, RoomTransport, WsRoomTransport};
use error::{ChannelError, SessionError};
use notify::{
    MissingNotificationSink, NotificationGate, NotificationIntent, NotificationSink,
    PermissionState,
};
use presence::PresenceSet;
use rest::{AccountUpdate, AuthGrant, NewAccount, RestClient};
use session::{Credential, Session};
use stream::{AccountStreamTransport, MissingAccountStreamTransport, SseTransport};
use timeline::Timeline;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base address of the realtime/API backend.
    pub base_url: String,
    /// Message history page size; the server pins this at 30.
    pub page_size: u32,
    /// Eager room-list pagination cap; see DESIGN.md.
    pub max_room_list_pages: u32,
    /// Raw size cap for an attached file before base64 encoding.
    pub max_attachment_bytes: usize,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            page_size: rest::MESSAGE_PAGE_SIZE,
            max_room_list_pages: 50,
            max_attachment_bytes: 10 * 1000 * 1000,
        }
    }
}

/// Typed events surfaced to the embedding host.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    CredentialChanged,
    /// The session ended: refresh failed, logout, or forced expiry. The
    /// host should route to sign-in.
    CredentialLost,
    /// The cached room list was replaced; re-read it via [`ChatClient::rooms`].
    RoomListStale,
    ProfileStale,
    /// The currently-open room disappeared from a refreshed room list; its
    /// channel has been torn down.
    RemovedFromRoom(RoomId),
    PresenceChanged {
        room_id: RoomId,
        connected: Vec<UserId>,
    },
    MessageAppended {
        room_id: RoomId,
        message: MessagePayload,
    },
    Notification(NotificationIntent),
    StreamError(String),
}

/// Outbound chat message as composed by the host.
#[derive(Debug, Clone, Default)]
pub struct MessageDraft {
    pub content: Option<String>,
    /// Absent means broadcast to the whole room.
    pub receiver_id: Option<UserId>,
    pub file_name: Option<String>,
    pub file_base64: Option<String>,
}

struct ActiveRoom {
    room_id: RoomId,
    connection: Arc<dyn RoomConnection>,
    reader: JoinHandle<()>,
    timeline: Timeline,
    presence: PresenceSet,
}

struct ClientState {
    profile: Option<UserSummary>,
    rooms: Vec<Room>,
    stream_open: bool,
    stream_task: Option<JoinHandle<()>>,
    refresh_task: Option<JoinHandle<()>>,
    active_room: Option<ActiveRoom>,
    /// Bumped on every room open/close; async work captures the value at
    /// request time and discards its result when the epoch has moved on.
    room_epoch: u64,
}

/// The synchronization engine. One instance per authenticated session,
/// shared as `Arc` between the host and its own background tasks.
pub struct ChatClient {
    config: ClientConfig,
    rest: RestClient,
    session: Session,
    stream_transport: Arc<dyn AccountStreamTransport>,
    room_transport: Arc<dyn RoomTransport>,
    sink: Arc<dyn NotificationSink>,
    gate: Mutex<NotificationGate>,
    inner: Mutex<ClientState>,
    events: broadcast::Sender<ClientEvent>,
}

impl ChatClient {
    pub fn new(config: ClientConfig) -> Result<Arc<Self>> {
        let rest = RestClient::new(&config.base_url)?;
        let base = rest.base().clone();
        Self::assemble(
            config,
            rest,
            Arc::new(SseTransport::new(base.clone())),
            Arc::new(WsRoomTransport::new(base)),
            Arc::new(MissingNotificationSink),
        )
    }

    /// Injection constructor for hosts (and tests) that bring their own
    /// transports or notification delivery.
    pub fn with_collaborators(
        config: ClientConfig,
        stream_transport: Arc<dyn AccountStreamTransport>,
        room_transport: Arc<dyn RoomTransport>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Arc<Self>> {
        let rest = RestClient::new(&config.base_url)?;
        Self::assemble(config, rest, stream_transport, room_transport, sink)
    }

    /// A client with no realtime transports at all; REST-only hosts.
    pub fn detached(config: ClientConfig) -> Result<Arc<Self>> {
        Self::with_collaborators(
            config,
            Arc::new(MissingAccountStreamTransport),
            Arc::new(MissingRoomTransport),
            Arc::new(MissingNotificationSink),
        )
    }

    fn assemble(
        config: ClientConfig,
        rest: RestClient,
        stream_transport: Arc<dyn AccountStreamTransport>,
        room_transport: Arc<dyn RoomTransport>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Arc<Self>> {
        let (events, _) = broadcast::channel(1024);
        Ok(Arc::new(Self {
            config,
            rest,
            session: Session::new(),
            stream_transport,
            room_transport,
            sink,
            gate: Mutex::new(NotificationGate::new()),
            inner: Mutex::new(ClientState {
                profile: None,
                rooms: Vec::new(),
                stream_open: false,
                stream_task: None,
                refresh_task: None,
                active_room: None,
                room_epoch: 0,
            }),
            events,
        }))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn require_valid_credential(&self) -> Result<Credential> {
        let credential = self
            .session
            .current()
            .ok_or(SessionError::NotAuthenticated)?;
        if !credential.is_valid() {
            return Err(SessionError::Expired.into());
        }
        Ok(credential)
    }

    pub async fn sign_up(
        self: &Arc<Self>,
        account: NewAccount,
        repeat_password: &str,
    ) -> Result<()> {
        if account.password != repeat_password {
            return Err(anyhow!("Passwords do not match"));
        }
        if !validate::password_is_valid(&account.password) {
            return Err(anyhow!(
                "Password must at least contains 8 characters, 1 uppercase, 1 lowercase & 1 digit"
            ));
        }
        if !validate::email_is_valid(&account.email) {
            return Err(anyhow!("Invalid mail address"));
        }
        let grant = self
            .rest
            .sign_up(&account)
            .await
            .map_err(|_| anyhow!("Login or email already used"))?;
        self.install_grant(grant).await;
        Ok(())
    }

    pub async fn sign_in(self: &Arc<Self>, email: &str, password: &str) -> Result<()> {
        let grant = self
            .rest
            .sign_in(email, password)
            .await
            .map_err(|_| anyhow!("Email or password incorrect"))?;
        self.install_grant(grant).await;
        Ok(())
    }

    async fn install_grant(self: &Arc<Self>, grant: AuthGrant) {
        let now = Utc::now().timestamp();
        let credential = Credential::from_grant(grant.authorization, grant.token_expires_in, now);
        let delay = credential.refresh_delay_at(now);
        self.session.replace(credential);
        self.emit(ClientEvent::CredentialChanged);
        self.schedule_refresh(delay).await;
    }

    /// Exactly one refresh timer is pending at any time; installing a new
    /// credential replaces the previous schedule.
    async fn schedule_refresh(self: &Arc<Self>, delay: Duration) {
        debug!(delay_secs = delay.as_secs(), "session: refresh scheduled");
        let client = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            client.refresh_credential_boxed().await;
        });
        let mut state = self.inner.lock().await;
        if let Some(previous) = state.refresh_task.replace(task) {
            previous.abort();
        }
    }

    /// Concrete-typed indirection so the refresh timer's spawned future does
    /// not recurse through this method's opaque `async fn` type (which would
    /// make the auto-`Send` analysis cyclic at the `tokio::spawn` site).
    fn refresh_credential_boxed(self: Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move { self.refresh_credential().await })
    }

    /// Rotates the credential. On failure the credential is cleared, not
    /// retried: masking an expired session behind backoff would leave every
    /// gated component acting on a dead token.
    pub async fn refresh_credential(self: &Arc<Self>) {
        let Some(credential) = self.session.current() else {
            return;
        };
        if !credential.is_valid() {
            self.end_session("credential expired before refresh").await;
            return;
        }
        match self.rest.refresh_token(&credential).await {
            Ok(grant) => {
                info!("session: credential refreshed");
                self.install_grant(grant).await;
            }
            Err(err) => {
                warn!("session: credential refresh failed: {err}");
                self.end_session("refresh failed").await;
            }
        }
    }

    async fn end_session(&self, reason: &str) {
        let refresh_task = {
            let mut state = self.inner.lock().await;
            state.refresh_task.take()
        };
        if let Some(task) = refresh_task {
            task.abort();
        }
        if self.session.clear() {
            info!("session: ended ({reason})");
            self.emit(ClientEvent::CredentialLost);
        }
    }

    pub async fn logout(self: &Arc<Self>) -> Result<()> {
        self.close_room().await;
        self.close_account_stream().await;
        if let Some(credential) = self.session.current() {
            if let Err(err) = self.rest.logout(&credential).await {
                warn!("session: logout request failed: {err}");
            }
        }
        self.end_session("logged out").await;
        Ok(())
    }

    /// Tab/window teardown: releases both channels best-effort and keeps
    /// the credential for the next launch.
    pub async fn shutdown(&self) {
        self.close_room().await;
        self.close_account_stream().await;
    }

    /// Idempotent: racing triggers (credential just fetched, permission
    /// just granted) collapse into a single live connection.
    pub async fn open_account_stream(self: &Arc<Self>) -> Result<()> {
        let credential = self.require_valid_credential()?;
        {
            let mut state = self.inner.lock().await;
            if state.stream_open {
                debug!("stream: already open; ignoring duplicate trigger");
                return Ok(());
            }
            state.stream_open = true;
        }
        let stream = match self.stream_transport.open(&credential).await {
            Ok(stream) => stream,
            Err(err) => {
                self.inner.lock().await.stream_open = false;
                return Err(err.context("failed to open account stream"));
            }
        };
        info!("stream: opened");
        let client = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut stream = stream;
            while let Some(event) = stream.next().await {
                match event {
                    Ok(event) => client.handle_account_event(event).await,
                    Err(err) => {
                        // Reconnection is left to the surrounding session
                        // lifecycle; the next open trigger re-establishes.
                        warn!("stream: transport error: {err}");
                        client.emit(ClientEvent::StreamError(err.to_string()));
                        break;
                    }
                }
            }
            let mut state = client.inner.lock().await;
            state.stream_open = false;
            state.stream_task = None;
            info!("stream: closed");
        });
        self.inner.lock().await.stream_task = Some(task);
        Ok(())
    }

    pub async fn close_account_stream(&self) {
        let task = {
            let mut state = self.inner.lock().await;
            if !state.stream_open && state.stream_task.is_none() {
                return;
            }
            state.stream_open = false;
            state.stream_task.take()
        };
        // Release the server-side endpoint first so events stop routing
        // before the reader goes away.
        if let Some(credential) = self.session.current() {
            if let Err(err) = self.stream_transport.release(&credential).await {
                warn!("stream: release request failed: {err}");
            }
        }
        if let Some(task) = task {
            task.abort();
        }
    }

    async fn handle_account_event(self: &Arc<Self>, event: AccountEvent) {
        debug!(kind = ?event.kind, "stream: account event");
        match event.kind {
            AccountEventKind::Project => {
                // Push payloads are never trusted as patches; refetch.
                if let Err(err) = self.refresh_rooms().await {
                    warn!("rooms: refresh after project event failed: {err}");
                }
                self.gate
                    .lock()
                    .await
                    .offer(NotificationIntent::new(event.kind, event.message));
            }
            AccountEventKind::User => {
                self.emit(ClientEvent::ProfileStale);
                if let Err(err) = self.refresh_profile().await {
                    warn!("profile: refresh after user event failed: {err}");
                }
                self.gate
                    .lock()
                    .await
                    .offer(NotificationIntent::new(event.kind, event.message));
            }
            AccountEventKind::Message => {
                // Only surfaces while no room is open; an open room renders
                // its messages itself.
                let room_open = self.inner.lock().await.active_room.is_some();
                if !room_open {
                    self.gate
                        .lock()
                        .await
                        .offer(NotificationIntent::new(event.kind, event.message));
                }
            }
        }
        self.flush_notifications().await;
    }

    async fn flush_notifications(&self) {
        let intents = self.gate.lock().await.drain(self.session.is_valid());
        for intent in intents {
            self.emit(ClientEvent::Notification(intent.clone()));
            self.sink.deliver(intent).await;
        }
    }

    pub async fn set_notification_permission(&self, permission: PermissionState) {
        self.gate.lock().await.set_permission(permission);
    }

    pub async fn profile(&self) -> Option<UserSummary> {
        self.inner.lock().await.profile.clone()
    }

    pub async fn rooms(&self) -> Vec<Room> {
        self.inner.lock().await.rooms.clone()
    }

    pub async fn refresh_profile(&self) -> Result<UserSummary> {
        let credential = self.require_valid_credential()?;
        let profile = self.rest.current_user(&credential).await?;
        self.inner.lock().await.profile = Some(profile.clone());
        Ok(profile)
    }

    pub async fn update_account(&self, update: AccountUpdate) -> Result<()> {
        let credential = self.require_valid_credential()?;
        self.rest.update_account(&credential, &update).await?;
        self.refresh_profile().await?;
        self.refresh_rooms().await?;
        Ok(())
    }

    /// Replaces the cached room list from the source of truth, following
    /// `next` links up to the configured cap. Detects the merge conflict of
    /// the open room vanishing and turns it into an explicit signal.
    pub async fn refresh_rooms(&self) -> Result<Vec<Room>> {
        let credential = self.require_valid_credential()?;
        let mut page = self.rest.first_room_page(&credential).await?;
        let mut rooms = std::mem::take(&mut page.data);
        let mut fetched_pages: u32 = 1;
        while page.has_next {
            if fetched_pages >= self.config.max_room_list_pages {
                warn!(
                    pages = fetched_pages,
                    "rooms: room list truncated at page cap"
                );
                break;
            }
            let Some(link) = page.next.take() else {
                break;
            };
            page = self.rest.follow_page::<Room>(&credential, &link).await?;
            rooms.extend(std::mem::take(&mut page.data));
            fetched_pages += 1;
        }

        let removed = {
            let mut state = self.inner.lock().await;
            state.rooms = rooms.clone();
            match &state.active_room {
                Some(active) if !rooms.iter().any(|room| room.id == active.room_id) => {
                    Some(active.room_id)
                }
                _ => None,
            }
        };
        if let Some(room_id) = removed {
            info!(
                room_id = room_id.0,
                "rooms: open room disappeared from refreshed list"
            );
            self.close_room().await;
            self.emit(ClientEvent::RemovedFromRoom(room_id));
        }
        self.emit(ClientEvent::RoomListStale);
        Ok(rooms)
    }

    pub async fn create_room(&self, title: &str) -> Result<Room> {
        let credential = self.require_valid_credential()?;
        let room = self
            .rest
            .create_room(&credential, title)
            .await
            .map_err(|_| anyhow!("Meeting name already used"))?;
        self.inner.lock().await.rooms.push(room.clone());
        self.emit(ClientEvent::RoomListStale);
        Ok(room)
    }

    pub async fn delete_room(&self, room_id: RoomId) -> Result<()> {
        let credential = self.require_valid_credential()?;
        self.rest.delete_room(&credential, room_id).await?;
        self.forget_room(room_id).await;
        Ok(())
    }

    /// Gives up own membership; the owner must delete instead.
    pub async fn leave_room_membership(&self, room_id: RoomId) -> Result<()> {
        let credential = self.require_valid_credential()?;
        self.rest.leave_room(&credential, room_id).await?;
        self.forget_room(room_id).await;
        Ok(())
    }

    async fn forget_room(&self, room_id: RoomId) {
        let was_active = {
            let mut state = self.inner.lock().await;
            state.rooms.retain(|room| room.id != room_id);
            state
                .active_room
                .as_ref()
                .is_some_and(|active| active.room_id == room_id)
        };
        if was_active {
            self.close_room().await;
        }
        self.emit(ClientEvent::RoomListStale);
    }

    pub async fn add_participant(&self, room_id: RoomId, login: &str) -> Result<Room> {
        let credential = self.require_valid_credential()?;
        let candidates = self
            .rest
            .search_users(&credential, login)
            .await
            .map_err(|_| anyhow!("Invalid login"))?;
        let user = candidates
            .data
            .into_iter()
            .find(|user| user.username == login)
            .ok_or_else(|| anyhow!("Invalid login"))?;
        self.rest
            .invite_participant(&credential, room_id, user.id)
            .await
            .map_err(|_| anyhow!("User already added"))?;
        self.apply_room_merge(room_id, |room| room.with_participant(user.clone()))
            .await
    }

    pub async fn remove_participant(&self, room_id: RoomId, user_id: UserId) -> Result<Room> {
        let credential = self.require_valid_credential()?;
        self.rest
            .remove_participant(&credential, room_id, user_id)
            .await?;
        self.apply_room_merge(room_id, |room| room.without_member(user_id))
            .await
    }

    pub async fn designate_coach(&self, room_id: RoomId, user_id: UserId) -> Result<Room> {
        let credential = self.require_valid_credential()?;
        self.rest
            .designate_coach(&credential, room_id, user_id)
            .await?;
        self.apply_room_merge(room_id, |room| room.with_coach(user_id))
            .await
    }

    pub async fn remove_privileges(&self, room_id: RoomId, user_id: UserId) -> Result<Room> {
        let credential = self.require_valid_credential()?;
        self.rest
            .remove_privileges(&credential, room_id, user_id)
            .await?;
        self.apply_room_merge(room_id, |room| room.without_coach(user_id))
            .await
    }

    async fn apply_room_merge<F>(&self, room_id: RoomId, merge: F) -> Result<Room>
    where
        F: FnOnce(&Room) -> Room,
    {
        let mut state = self.inner.lock().await;
        let room = state
            .rooms
            .iter_mut()
            .find(|room| room.id == room_id)
            .ok_or_else(|| anyhow!("unknown room {}", room_id.0))?;
        let merged = merge(room);
        *room = merged.clone();
        Ok(merged)
    }

    /// Opens a room's channel. Any previously open room is left first so
    /// two live channels never double-count presence or double-deliver
    /// messages.
    pub async fn open_room(self: &Arc<Self>, room_id: RoomId) -> Result<()> {
        let credential = self.require_valid_credential()?;
        self.close_room().await;
        let epoch = {
            let mut state = self.inner.lock().await;
            state.room_epoch += 1;
            state.room_epoch
        };

        let connection = self
            .room_transport
            .connect(&credential)
            .await
            .context("failed to connect room channel")?;
        let snapshot = connection
            .join(room_id)
            .await
            .context("failed to join room")?;
        info!(
            room_id = room_id.0,
            connected = snapshot.len(),
            "room: joined"
        );

        let mut signals = connection.signals();
        let client = Arc::clone(self);
        let reader = tokio::spawn(async move {
            loop {
                match signals.recv().await {
                    Ok(signal) => client.handle_room_signal(room_id, epoch, signal).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "room: dropped signals after lag");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let connected = {
            let mut state = self.inner.lock().await;
            if state.room_epoch != epoch {
                // A concurrent switch superseded this join.
                drop(state);
                debug!(room_id = room_id.0, "room: join superseded; discarding");
                reader.abort();
                connection.close().await;
                return Ok(());
            }
            let mut presence = PresenceSet::new();
            presence.add_many(snapshot);
            let connected = presence.snapshot();
            state.active_room = Some(ActiveRoom {
                room_id,
                connection,
                reader,
                timeline: Timeline::new(),
                presence,
            });
            connected
        };
        self.emit(ClientEvent::PresenceChanged { room_id, connected });

        self.load_initial_messages(room_id, epoch).await
    }

    /// Leaves the open room, notifying the server best-effort, and cancels
    /// interest in any in-flight responses for it.
    pub async fn close_room(&self) {
        let active = {
            let mut state = self.inner.lock().await;
            state.room_epoch += 1;
            state.active_room.take()
        };
        if let Some(active) = active {
            info!(room_id = active.room_id.0, "room: leaving");
            active.reader.abort();
            active.connection.close().await;
        }
    }

    pub async fn current_room(&self) -> Option<RoomId> {
        self.inner
            .lock()
            .await
            .active_room
            .as_ref()
            .map(|active| active.room_id)
    }

    async fn handle_room_signal(&self, room_id: RoomId, epoch: u64, signal: RoomSignal) {
        match signal {
            RoomSignal::Message(message) => {
                let appended = {
                    let mut state = self.inner.lock().await;
                    if state.room_epoch != epoch {
                        return;
                    }
                    match state.active_room.as_mut() {
                        Some(active) if active.room_id == room_id => {
                            active.timeline.prepend_live(message.clone())
                        }
                        _ => false,
                    }
                };
                if appended {
                    self.emit(ClientEvent::MessageAppended { room_id, message });
                }
            }
            RoomSignal::Online(user_id) => {
                self.apply_presence(room_id, epoch, |presence| presence.add_many([user_id]))
                    .await;
            }
            RoomSignal::Offline(user_id) => {
                self.apply_presence(room_id, epoch, |presence| presence.remove(user_id))
                    .await;
            }
            RoomSignal::Closed => {
                warn!(room_id = room_id.0, "room: channel transport closed");
            }
        }
    }

    async fn apply_presence<F>(&self, room_id: RoomId, epoch: u64, change: F)
    where
        F: FnOnce(&mut PresenceSet) -> bool,
    {
        let connected = {
            let mut state = self.inner.lock().await;
            if state.room_epoch != epoch {
                return;
            }
            let Some(active) = state
                .active_room
                .as_mut()
                .filter(|active| active.room_id == room_id)
            else {
                return;
            };
            if !change(&mut active.presence) {
                // Duplicate online/offline signals are no-ops.
                return;
            }
            active.presence.snapshot()
        };
        self.emit(ClientEvent::PresenceChanged { room_id, connected });
    }

    async fn load_initial_messages(&self, room_id: RoomId, epoch: u64) -> Result<()> {
        let credential = self.require_valid_credential()?;
        let page = self
            .rest
            .first_message_page(&credential, room_id, self.config.page_size)
            .await
            .context("failed to fetch message history")?;
        let mut state = self.inner.lock().await;
        if state.room_epoch != epoch {
            debug!(
                room_id = room_id.0,
                "room: discarding history page for a stale room"
            );
            return Ok(());
        }
        if let Some(active) = state
            .active_room
            .as_mut()
            .filter(|active| active.room_id == room_id)
        {
            active.timeline.apply_initial_page(page);
        }
        Ok(())
    }

    /// Backward pagination. Returns `false` without a request when a fetch
    /// is already outstanding or the history is exhausted.
    pub async fn load_older_messages(&self) -> Result<bool> {
        let credential = self.require_valid_credential()?;
        let (epoch, link) = {
            let mut state = self.inner.lock().await;
            let epoch = state.room_epoch;
            let Some(active) = state.active_room.as_mut() else {
                return Err(ChannelError::NotJoined.into());
            };
            match active.timeline.begin_older_fetch() {
                Some(link) => (epoch, link),
                None => return Ok(false),
            }
        };
        let result = self
            .rest
            .follow_page::<MessagePayload>(&credential, &link)
            .await;
        let mut state = self.inner.lock().await;
        if state.room_epoch != epoch {
            return Ok(false);
        }
        let Some(active) = state.active_room.as_mut() else {
            return Ok(false);
        };
        match result {
            Ok(page) => {
                active.timeline.apply_older_page(page);
                Ok(true)
            }
            Err(err) => {
                active.timeline.abort_older_fetch();
                Err(err.context("failed to fetch older messages"))
            }
        }
    }

    /// Sends a message over the open room's channel and appends the
    /// server-echoed record. A transport drop before the ack surfaces as a
    /// transient error; resending is the user's call.
    pub async fn send_message(&self, draft: MessageDraft) -> Result<MessagePayload> {
        let has_content = draft
            .content
            .as_deref()
            .is_some_and(|content| !content.trim().is_empty());
        let attachment = match (&draft.file_name, &draft.file_base64) {
            (Some(name), Some(body)) => Some((name.clone(), body.clone())),
            _ => None,
        };
        if !has_content && attachment.is_none() {
            return Err(ChannelError::EmptyMessage.into());
        }
        if let Some((_, body)) = &attachment {
            if attachment_size_estimate(body) > self.config.max_attachment_bytes {
                return Err(ChannelError::AttachmentTooLarge {
                    max_bytes: self.config.max_attachment_bytes,
                }
                .into());
            }
        }

        let (connection, room_id, epoch) = {
            let state = self.inner.lock().await;
            let active = state.active_room.as_ref().ok_or(ChannelError::NotJoined)?;
            (
                Arc::clone(&active.connection),
                active.room_id,
                state.room_epoch,
            )
        };
        let (file_name, file_base64) = match attachment {
            Some((name, body)) => (Some(name), Some(body)),
            None => (None, None),
        };
        let outbound = OutboundMessage {
            room_id,
            content: draft.content.filter(|_| has_content),
            receiver_id: draft.receiver_id,
            file_name,
            file_base64,
        };
        let stored = connection.send(outbound).await?;

        let appended = {
            let mut state = self.inner.lock().await;
            if state.room_epoch != epoch {
                false
            } else {
                match state.active_room.as_mut() {
                    Some(active) if active.room_id == room_id => {
                        active.timeline.prepend_live(stored.clone())
                    }
                    _ => false,
                }
            }
        };
        if appended {
            self.emit(ClientEvent::MessageAppended {
                room_id,
                message: stored.clone(),
            });
        }
        Ok(stored)
    }

    pub async fn presence(&self) -> Vec<UserId> {
        self.inner
            .lock()
            .await
            .active_room
            .as_ref()
            .map(|active| active.presence.snapshot())
            .unwrap_or_default()
    }

    /// Messages in rendering order, oldest first.
    pub async fn messages(&self) -> Vec<MessagePayload> {
        self.inner
            .lock()
            .await
            .active_room
            .as_ref()
            .map(|active| active.timeline.oldest_first().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn history_exhausted(&self) -> bool {
        self.inner
            .lock()
            .await
            .active_room
            .as_ref()
            .is_some_and(|active| active.timeline.is_loaded() && !active.timeline.has_more())
    }

    pub async fn needs_scroll_to_bottom(&self) -> bool {
        self.inner
            .lock()
            .await
            .active_room
            .as_ref()
            .is_some_and(|active| active.timeline.to_scroll())
    }

    pub async fn mark_rendered_to_bottom(&self) {
        if let Some(active) = self.inner.lock().await.active_room.as_mut() {
            active.timeline.mark_rendered_to_bottom();
        }
    }
}

fn attachment_size_estimate(file_base64: &str) -> usize {
    // Attachments arrive as data URLs; only the payload after the comma counts.
    let encoded = file_base64
        .rsplit_once(',')
        .map_or(file_base64, |(_, payload)| payload);
    base64::decoded_len_estimate(encoded.len())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

//! Per-connection handler: route, authenticate, authorize, join, then
//! the message loop.
//!
//! Each accepted connection gets its own Tokio task running
//! [`handle_connection`], plus a writer task that owns the socket's
//! sending side. Everything sent to the client (replies, broadcasts,
//! close frames) goes through the writer's queue, so a client sees
//! messages in the order they were queued for it.
//!
//! The flow is:
//!   1. Route `/lobby/{id}` or `/game/{id}` → connection kind and session
//!   2. Authenticate the `token` query parameter or bearer header
//!   3. Authorize with exactly one of `invite` or `sessionKey`
//!   4. Join: claim a role, greet the client, register, announce
//!   5. Loop: validate envelopes → dispatch to the lobby layer
//!   6. Release the channel and, if the session went idle, its state

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use lobbyforge_lobby::{ChannelSender, Dispatch, LobbyError, Outbound, Recipient};
use lobbyforge_protocol::{
    ChannelName, ClientRequest, CloseReason, Codec, ConnectionKind, GameRequest,
    LobbyRequest, Role, ServerMessage, SessionId, UserId, parse_request,
};
use lobbyforge_session::{
    Authenticator, GameRecords, InviteGuard, InviteVerdict, SessionError, UserIdentity,
};
use lobbyforge_store::SharedStateStore;
use lobbyforge_transport::{ConnectRequest, Connection, WebSocketConnection};
use tokio::sync::mpsc;

use crate::LobbyforgeError;
use crate::config::ServerConfig;
use crate::lifecycle::ConnectionState;
use crate::server::ServerState;

// ---------------------------------------------------------------------------
// Connect-request parsing
// ---------------------------------------------------------------------------

/// Where a connection asked to go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Target {
    pub(crate) kind: ConnectionKind,
    pub(crate) session: SessionId,
}

/// Maps the request path to a connection kind and session id.
pub(crate) fn resolve_route(
    request: &ConnectRequest,
    config: &ServerConfig,
) -> Result<Target, CloseReason> {
    let segments = request.segments();
    let Some((route, rest)) = segments.split_first() else {
        return Err(CloseReason::UnknownRoute);
    };
    let kind = config.route_kind(route).ok_or(CloseReason::UnknownRoute)?;

    match rest {
        [id] => Ok(Target {
            kind,
            session: SessionId::new(*id),
        }),
        [] => Err(match kind {
            ConnectionKind::Lobby => CloseReason::MissingLobbyId,
            ConnectionKind::Game => CloseReason::UnknownRoute,
        }),
        _ => Err(CloseReason::UnknownRoute),
    }
}

/// The credential a connection presented to enter its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Credential<'a> {
    Invite(&'a str),
    SessionKey(&'a str),
}

/// Exactly one of `invite` and `sessionKey` must be present.
pub(crate) fn credential(request: &ConnectRequest) -> Result<Credential<'_>, CloseReason> {
    match (request.query_param("invite"), request.query_param("sessionKey")) {
        (Some(token), None) => Ok(Credential::Invite(token)),
        (None, Some(key)) => Ok(Credential::SessionKey(key)),
        _ => Err(CloseReason::MissingCredentials),
    }
}

/// The auth token: `token` query parameter, else the bearer header.
pub(crate) fn auth_token(request: &ConnectRequest) -> Option<&str> {
    request.query_param("token").or_else(|| request.bearer())
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

/// A connection that passed authentication and authorization.
struct Admission {
    target: Target,
    identity: UserIdentity,
    session_key: String,
}

async fn admit<A, I, R, S>(
    request: &ConnectRequest,
    state: &ServerState<A, I, R, S>,
    lifecycle: &mut ConnectionState,
) -> Result<Admission, CloseReason>
where
    A: Authenticator,
    I: InviteGuard,
    R: GameRecords,
    S: SharedStateStore,
{
    let target = resolve_route(request, &state.config)?;

    lifecycle.advance(ConnectionState::Authenticating);
    let token = auth_token(request).ok_or(CloseReason::Unauthenticated)?;
    let identity = state.auth.authenticate(token).await.map_err(|e| {
        tracing::debug!(error = %e, "authentication failed");
        match e {
            SessionError::Unavailable(_) => CloseReason::ServerError,
            _ => CloseReason::Unauthenticated,
        }
    })?;

    lifecycle.advance(ConnectionState::Authorizing);
    let session_key =
        authorize(state, &target.session, identity.user_id, credential(request)?).await?;

    Ok(Admission {
        target,
        identity,
        session_key,
    })
}

/// Checks the credential and returns the session key to hand out.
async fn authorize<A, I, R, S>(
    state: &ServerState<A, I, R, S>,
    session: &SessionId,
    user: UserId,
    credential: Credential<'_>,
) -> Result<String, CloseReason>
where
    I: InviteGuard,
    R: GameRecords,
    S: SharedStateStore,
{
    let server_error = |e: &dyn std::fmt::Display| {
        tracing::warn!(%session, %user, error = %e, "authorization backend failed");
        CloseReason::ServerError
    };

    match credential {
        Credential::Invite(token) => {
            let verdict = state
                .invites
                .validate(user, session, token)
                .await
                .map_err(|e| server_error(&e))?;
            match verdict {
                InviteVerdict::Accepted(invite) => {
                    tracing::debug!(%session, %user, invite = invite.id, "invite accepted");
                }
                InviteVerdict::Forbidden => return Err(CloseReason::InviteForbidden),
                InviteVerdict::Expired => return Err(CloseReason::InviteExpired),
                InviteVerdict::Invalid => return Err(CloseReason::InviteInvalid),
            }
            state
                .store
                .ensure_session_key(session)
                .await
                .map_err(|e| server_error(&e))
        }
        Credential::SessionKey(key) => {
            let stored = state
                .store
                .session_key(session)
                .await
                .map_err(|e| server_error(&e))?;
            if stored.as_deref() != Some(key) {
                return Err(CloseReason::SessionKeyInvalid);
            }

            let has_role = state
                .store
                .role_of(session, user)
                .await
                .map_err(|e| server_error(&e))?
                .is_some();
            let seated = has_role
                || state
                    .records
                    .get(session)
                    .await
                    .map_err(|e| server_error(&e))?
                    .is_some_and(|record| record.mark_of(user).is_some());
            if !seated {
                return Err(CloseReason::SessionKeyInvalid);
            }
            Ok(key.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<A, I, R, S>(
    conn: WebSocketConnection,
    state: Arc<ServerState<A, I, R, S>>,
) -> Result<(), LobbyforgeError>
where
    A: Authenticator,
    I: InviteGuard,
    R: GameRecords,
    S: SharedStateStore,
{
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    let mut lifecycle = ConnectionState::Connecting;
    tracing::debug!(%conn_id, path = conn.request().path(), "handling new connection");

    let admission = match admit(conn.request(), &state, &mut lifecycle).await {
        Ok(admission) => admission,
        Err(reason) => {
            tracing::info!(%conn_id, %lifecycle, %reason, "connection refused");
            lifecycle.advance(ConnectionState::Closed);
            conn.close_with(reason.code(), reason.description()).await?;
            return Ok(());
        }
    };

    let Admission {
        target,
        identity,
        session_key,
    } = admission;
    let channel = ChannelName::new(&state.config.instance_id, conn_id.into_inner());
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(
        Arc::clone(&conn),
        rx,
        identity.user_id,
        state.codec,
    ));

    // Armed before the first store write so a half-finished join is
    // released too.
    let guard = JoinGuard {
        state: Arc::clone(&state),
        session: target.session.clone(),
        channel: channel.clone(),
        released: AtomicBool::new(false),
    };
    let member = Member {
        state: state.as_ref(),
        kind: target.kind,
        session: target.session,
        identity,
        channel,
        tx,
    };

    if let Err(e) = member.join(session_key).await {
        tracing::error!(
            %conn_id,
            session = %member.session,
            user = %member.identity.user_id,
            error = %e,
            "join failed"
        );
        lifecycle.advance(ConnectionState::Closed);
        guard.release().await;
        send_error(
            &member.tx,
            CloseReason::ServerError.description(),
            Some(CloseReason::ServerError),
        );
        drop(member);
        let _ = writer.await;
        return Ok(());
    }
    lifecycle.advance(ConnectionState::Joined);

    // --- Message loop ---
    let mut leaving = false;
    loop {
        let data = match conn.recv().await {
            Ok(Some(data)) => data,
            Ok(None) => {
                tracing::info!(%conn_id, user = %member.identity.user_id, "connection closed by client");
                break;
            }
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "recv error");
                break;
            }
        };

        match member.handle_frame(&data).await {
            Flow::Continue => {}
            Flow::Stop => break,
            Flow::Leave => {
                leaving = true;
                break;
            }
        }
    }

    lifecycle.advance(ConnectionState::Disconnecting);
    guard.release().await;
    if leaving {
        let _ = member.tx.send(Outbound::Close(CloseReason::Normal));
    }
    // The registry's copy of the sender is gone after release; dropping
    // ours lets the writer drain and exit.
    drop(member);
    let _ = writer.await;
    lifecycle.advance(ConnectionState::Closed);
    tracing::debug!(%conn_id, "connection finished");
    Ok(())
}

/// What the message loop does after a frame.
enum Flow {
    Continue,
    /// Stop reading; a close has already been queued.
    Stop,
    /// `leave_lobby`: clean up, then close normally.
    Leave,
}

/// A joined connection.
struct Member<'a, A, I, R, S> {
    state: &'a ServerState<A, I, R, S>,
    kind: ConnectionKind,
    session: SessionId,
    identity: UserIdentity,
    channel: ChannelName,
    tx: ChannelSender,
}

impl<A, I, R, S> Member<'_, A, I, R, S>
where
    A: Authenticator,
    I: InviteGuard,
    R: GameRecords,
    S: SharedStateStore,
{
    /// Registers the connection and announces it. Any error here refuses
    /// the connection.
    async fn join(&self, session_key: String) -> Result<(), LobbyError> {
        let user = self.identity.user_id;
        let store = &self.state.store;

        store
            .add_player(&self.session, user, &self.identity.display_name)
            .await?;
        store.add_channel(&self.session, &self.channel, user).await?;
        let role = self.claim_role().await?;

        tracing::info!(
            session = %self.session,
            %user,
            channel = %self.channel,
            kind = %self.kind,
            %role,
            "joined session"
        );

        // Queued before registering so no group broadcast can overtake it.
        self.reply(ServerMessage::SessionEstablished {
            session_id: self.session.clone(),
            session_key,
            user_id: user,
            role,
        });
        self.state
            .registry
            .register(&self.session, self.channel.clone(), self.tx.clone())
            .await;
        if self.kind == ConnectionKind::Game {
            match self.state.flow.snapshot(&self.session).await {
                Ok(Some(update)) => self.reply(update),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(session = %self.session, error = %e, "game snapshot skipped");
                }
            }
        }
        broadcast_roster(self.state, &self.session).await;
        Ok(())
    }

    /// The user's role. A player seated in the game record gets that
    /// seat back even if the live role table has moved on without them.
    async fn claim_role(&self) -> Result<Role, LobbyError> {
        let user = self.identity.user_id;
        let role = self.state.roles.assign(&self.session, user).await?;
        let seat = self
            .state
            .records
            .get(&self.session)
            .await?
            .and_then(|record| record.mark_of(user));
        match seat {
            Some(mark) if role != Role::from(mark) => {
                self.state.roles.reseat(&self.session, user, mark).await?;
                Ok(Role::from(mark))
            }
            _ => Ok(role),
        }
    }

    /// Validates one frame and runs the matching handler.
    async fn handle_frame(&self, data: &[u8]) -> Flow {
        let request = match parse_request(self.kind, data) {
            Ok(request) => request,
            Err(e) => {
                let close = self.state.config.policy(self.kind).close_for(&e);
                tracing::debug!(
                    session = %self.session,
                    user = %self.identity.user_id,
                    error = %e,
                    closing = close.is_some(),
                    "bad envelope"
                );
                send_error(&self.tx, &e.to_string(), close);
                return if close.is_some() { Flow::Stop } else { Flow::Continue };
            }
        };

        match self.handle_request(request).await {
            Ok(Some(dispatch)) => {
                self.deliver(dispatch).await;
                Flow::Continue
            }
            Ok(None) => Flow::Leave,
            Err(e) => {
                if e.is_client_error() {
                    tracing::debug!(session = %self.session, error = %e, "request refused");
                } else {
                    tracing::warn!(session = %self.session, error = %e, "request failed");
                }
                send_error(&self.tx, &e.to_string(), None);
                Flow::Continue
            }
        }
    }

    /// Routes a request to its handler. `None` means the client is
    /// leaving.
    async fn handle_request(&self, request: ClientRequest) -> Result<Option<Dispatch>, LobbyError> {
        let session = &self.session;
        let user = self.identity.user_id;
        let state = self.state;

        let dispatch = match request {
            ClientRequest::Lobby(LobbyRequest::JoinLobby) => {
                let role = state.roles.assign(session, user).await?;
                let players = state.roles.roster(session).await?;
                vec![
                    (
                        Recipient::Caller,
                        ServerMessage::JoinLobbySuccess {
                            session_id: session.clone(),
                            role,
                        },
                    ),
                    (Recipient::Group, ServerMessage::UpdatePlayerList { players }),
                ]
            }
            ClientRequest::Lobby(LobbyRequest::LeaveLobby) => return Ok(None),
            ClientRequest::Lobby(LobbyRequest::StartGame) => state.flow.start(session, user).await?,
            ClientRequest::Game(GameRequest::Move { position }) => {
                state.flow.play(session, user, position).await?
            }
            ClientRequest::Game(GameRequest::RematchRequest) => {
                state.rematch.request(session, user).await?
            }
            ClientRequest::Game(GameRequest::RematchAccept) => {
                state.rematch.accept(session, user).await?
            }
            ClientRequest::Game(GameRequest::RematchDecline) => {
                state.rematch.decline(session, user).await?
            }
        };
        Ok(Some(dispatch))
    }

    async fn deliver(&self, dispatch: Dispatch) {
        for (recipient, message) in dispatch {
            match recipient {
                Recipient::Group => {
                    self.state.registry.group_send(&self.session, &message).await;
                }
                Recipient::Caller => self.reply(message),
            }
        }
    }

    fn reply(&self, message: ServerMessage) {
        let _ = self.tx.send(Outbound::Message(message));
    }
}

/// Queues an `error` message for one connection and, if `close` is set,
/// a close frame right after it.
fn send_error(tx: &ChannelSender, message: &str, close: Option<CloseReason>) {
    let _ = tx.send(Outbound::Message(ServerMessage::error(message)));
    if let Some(reason) = close {
        let _ = tx.send(Outbound::Close(reason));
    }
}

/// Sends the current roster to the session. Failures are logged and the
/// broadcast skipped.
async fn broadcast_roster<A, I, R, S>(state: &ServerState<A, I, R, S>, session: &SessionId)
where
    S: SharedStateStore,
{
    match state.roles.roster(session).await {
        Ok(players) => {
            state
                .registry
                .group_send(session, &ServerMessage::UpdatePlayerList { players })
                .await;
        }
        Err(e) => {
            tracing::warn!(%session, error = %e, "roster broadcast skipped");
        }
    }
}

// ---------------------------------------------------------------------------
// Writer task
// ---------------------------------------------------------------------------

/// Drains a channel's queue onto the socket until a close is queued, the
/// socket fails, or every sender is dropped.
async fn write_loop<C: Codec>(
    conn: Arc<WebSocketConnection>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    viewer: UserId,
    codec: C,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Message(mut message) => {
                message.personalize(viewer);
                let bytes = match codec.encode(&message) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(kind = message.kind(), error = %e, "encode failed");
                        continue;
                    }
                };
                if let Err(e) = conn.send(&bytes).await {
                    if e.is_closed() {
                        tracing::debug!(conn_id = %conn.id(), "socket closed, dropping queue");
                    } else {
                        tracing::warn!(conn_id = %conn.id(), error = %e, "send failed");
                    }
                    break;
                }
            }
            Outbound::Close(reason) => {
                if let Err(e) = conn.close_with(reason.code(), reason.description()).await {
                    tracing::debug!(conn_id = %conn.id(), error = %e, "close failed");
                }
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Disconnect
// ---------------------------------------------------------------------------

/// Releases a joined connection's shared state exactly once.
///
/// The handler calls [`release`](Self::release) on every exit path. If
/// the task is cancelled or panics first, `Drop` spawns the release
/// instead.
struct JoinGuard<A, I, R, S>
where
    A: Authenticator,
    I: InviteGuard,
    R: GameRecords,
    S: SharedStateStore,
{
    state: Arc<ServerState<A, I, R, S>>,
    session: SessionId,
    channel: ChannelName,
    released: AtomicBool,
}

impl<A, I, R, S> JoinGuard<A, I, R, S>
where
    A: Authenticator,
    I: InviteGuard,
    R: GameRecords,
    S: SharedStateStore,
{
    async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        release_channel(&self.state, &self.session, &self.channel).await;
    }
}

impl<A, I, R, S> Drop for JoinGuard<A, I, R, S>
where
    A: Authenticator,
    I: InviteGuard,
    R: GameRecords,
    S: SharedStateStore,
{
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let state = Arc::clone(&self.state);
        let session = self.session.clone();
        let channel = self.channel.clone();
        runtime.spawn(async move {
            release_channel(&state, &session, &channel).await;
        });
    }
}

/// Removes a channel from the session.
///
/// While the game is completed the player and role records stay, so a
/// reconnect during the rematch screen keeps its seat; once no channel
/// is left they expire after the configured retention. Otherwise the
/// player is removed (unless another of their channels is still open)
/// and, if no channel is left, the whole session state is cleared.
async fn release_channel<A, I, R, S>(
    state: &ServerState<A, I, R, S>,
    session: &SessionId,
    channel: &ChannelName,
) where
    R: GameRecords,
    S: SharedStateStore,
{
    state.registry.unregister(session, channel).await;

    let completed = match state.records.get(session).await {
        Ok(record) => record.is_some_and(|record| record.completed),
        Err(e) => {
            tracing::warn!(%session, error = %e, "game record unavailable, keeping players");
            true
        }
    };

    let departure = match state.store.release_channel(session, channel, completed).await {
        Ok(departure) => departure,
        Err(e) => {
            tracing::warn!(%session, %channel, error = %e, "channel release failed");
            return;
        }
    };
    tracing::info!(
        %session,
        %channel,
        user = ?departure.user_id,
        player_removed = departure.player_removed,
        remaining = departure.remaining_channels,
        "channel released"
    );

    if departure.remaining_channels > 0 {
        broadcast_roster(state, session).await;
        return;
    }
    if completed {
        match state.store.retain_if_idle(session, state.config.retention).await {
            Ok(true) => {
                tracing::info!(%session, retention = ?state.config.retention, "finished session retained");
            }
            Ok(false) => tracing::debug!(%session, "session rejoined before retention"),
            Err(e) => tracing::warn!(%session, error = %e, "session retention failed"),
        }
        return;
    }
    match state.store.clear_if_idle(session).await {
        Ok(true) => tracing::info!(%session, "session state cleared"),
        Ok(false) => tracing::debug!(%session, "session rejoined before cleanup"),
        Err(e) => tracing::warn!(%session, error = %e, "session cleanup failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> ConnectRequest {
        ConnectRequest::from_uri(uri)
    }

    #[test]
    fn test_resolve_route_lobby_and_game() {
        let config = ServerConfig::default();
        assert_eq!(
            resolve_route(&request("/lobby/42"), &config),
            Ok(Target {
                kind: ConnectionKind::Lobby,
                session: SessionId::from("42"),
            })
        );
        assert_eq!(
            resolve_route(&request("/game/7/"), &config).map(|t| t.kind),
            Ok(ConnectionKind::Game)
        );
    }

    #[test]
    fn test_resolve_route_missing_id_codes_differ_by_kind() {
        let config = ServerConfig::default();
        assert_eq!(
            resolve_route(&request("/lobby/"), &config),
            Err(CloseReason::MissingLobbyId)
        );
        assert_eq!(
            resolve_route(&request("/game"), &config),
            Err(CloseReason::UnknownRoute)
        );
    }

    #[test]
    fn test_resolve_route_unknown_routes() {
        let config = ServerConfig::default();
        for uri in ["/", "/chat/1", "/lobby/1/extra"] {
            assert_eq!(resolve_route(&request(uri), &config), Err(CloseReason::UnknownRoute));
        }
    }

    #[test]
    fn test_credential_requires_exactly_one() {
        assert_eq!(
            credential(&request("/lobby/1?invite=abc")),
            Ok(Credential::Invite("abc"))
        );
        assert_eq!(
            credential(&request("/lobby/1?sessionKey=k")),
            Ok(Credential::SessionKey("k"))
        );
        assert_eq!(
            credential(&request("/lobby/1?invite=a&sessionKey=k")),
            Err(CloseReason::MissingCredentials)
        );
        assert_eq!(
            credential(&request("/lobby/1?invite=")),
            Err(CloseReason::MissingCredentials)
        );
    }

    #[test]
    fn test_auth_token_prefers_query_then_bearer() {
        assert_eq!(auth_token(&request("/lobby/1?token=q")), Some("q"));
        let with_header = ConnectRequest::new("/lobby/1", None, Some("Bearer h"));
        assert_eq!(auth_token(&with_header), Some("h"));
        assert_eq!(auth_token(&request("/lobby/1")), None);
    }

    #[tokio::test]
    async fn test_send_error_queues_message_then_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        send_error(&tx, "nope", Some(CloseReason::ProtocolViolation));
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Message(ServerMessage::error("nope")))
        );
        assert_eq!(rx.recv().await, Some(Outbound::Close(CloseReason::ProtocolViolation)));

        send_error(&tx, "again", None);
        drop(tx);
        assert!(matches!(rx.recv().await, Some(Outbound::Message(_))));
        assert_eq!(rx.recv().await, None);
    }
}

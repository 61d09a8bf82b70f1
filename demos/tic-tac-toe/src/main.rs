//! Development server for the tic-tac-toe lobby.
//!
//! Session `1` is seeded with two accepted invites from user 1: `demo-o`
//! for user 2 and `demo-s` for user 3. Connect with
//! `ws://127.0.0.1:8080/lobby/1?token=1&invite=demo-o` (tokens are
//! `<id>` or `<id>:<name>`).

use std::sync::Arc;

use lobbyforge::prelude::*;
use lobbyforge_session::now_millis;
use tracing_subscriber::EnvFilter;

const DEMO_SESSION: &str = "1";
const INVITE_TTL_MS: u64 = 24 * 60 * 60 * 1000;

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Trusts the token: `<id>` or `<id>:<display name>`.
struct DevAuthenticator;

impl Authenticator for DevAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<UserIdentity, SessionError> {
        parse_token(token)
    }
}

fn parse_token(token: &str) -> Result<UserIdentity, SessionError> {
    let (id, name) = match token.split_once(':') {
        Some((id, name)) if !name.is_empty() => (id, Some(name)),
        _ => (token, None),
    };
    let id: u64 = id
        .parse()
        .map_err(|_| SessionError::AuthFailed("token must be <id> or <id>:<name>".into()))?;
    let name = name.map_or_else(|| format!("player{id}"), str::to_string);
    Ok(UserIdentity::new(UserId(id), name))
}

async fn seeded_invites() -> MemoryInviteGuard {
    let guard = MemoryInviteGuard::new();
    let expires_at = now_millis() + INVITE_TTL_MS;
    for (id, token, to) in [(1, "demo-o", 2), (2, "demo-s", 3)] {
        guard
            .insert(Invite {
                id,
                token: token.into(),
                from_user: UserId(1),
                to_user: UserId(to),
                session_id: SessionId::from(DEMO_SESSION),
                status: InviteStatus::Accepted,
                expires_at,
            })
            .await;
    }
    guard
}

// ---------------------------------------------------------------------------
// Server bootstrap
// ---------------------------------------------------------------------------

async fn serve<S: SharedStateStore>(
    bind: &str,
    store: Arc<S>,
) -> Result<(), Box<dyn std::error::Error>> {
    let server = LobbyforgeServer::builder()
        .bind(bind)
        .build(
            DevAuthenticator,
            seeded_invites().await,
            Arc::new(MemoryGameRecords::default()),
            store,
        )
        .await?;
    tracing::info!(addr = %server.local_addr()?, "tic-tac-toe lobby listening");
    server.run().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let bind = std::env::var("LOBBYFORGE_BIND").unwrap_or_else(|_| "0.0.0.0:8080".into());

    #[cfg(feature = "redis")]
    if let Ok(url) = std::env::var("LOBBYFORGE_REDIS_URL") {
        let store = RedisStore::connect(&url, "lobbyforge").await?;
        serve(&bind, Arc::new(store)).await?;
        return Ok(());
    }

    serve(&bind, Arc::new(MemoryStore::new())).await?;
    Ok(())
}

//! The role-picking rule shared by every backend.

use lobbyforge_protocol::Role;

/// Picks the role for a newcomer given the roles already handed out:
/// first come gets X, then O, everyone after is a spectator.
pub fn next_free_role(taken: impl IntoIterator<Item = Role>) -> Role {
    let (mut has_x, mut has_o) = (false, false);
    for role in taken {
        match role {
            Role::X => has_x = true,
            Role::O => has_o = true,
            Role::Spectator => {}
        }
    }
    match (has_x, has_o) {
        (false, _) => Role::X,
        (true, false) => Role::O,
        (true, true) => Role::Spectator,
    }
}

// Static permission tags declared per route and checked against the caller's role.

use storefront_common::types::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Send, read and delete within conversations the caller takes part in.
    ChatParticipate,
    /// Act on any conversation or message regardless of participation.
    ChatModerate,
}

const USER_CAPABILITIES: &[Capability] = &[Capability::ChatParticipate];
const ADMIN_CAPABILITIES: &[Capability] = &[Capability::ChatParticipate, Capability::ChatModerate];

impl Capability {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ChatParticipate => "chat:participate",
            Self::ChatModerate => "chat:moderate",
        }
    }

    pub fn granted_to(self, role: Role) -> bool {
        capabilities_for(role).contains(&self)
    }
}

pub const fn capabilities_for(role: Role) -> &'static [Capability] {
    match role {
        Role::Admin => ADMIN_CAPABILITIES,
        Role::User => USER_CAPABILITIES,
    }
}

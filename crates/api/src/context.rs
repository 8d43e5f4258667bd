use partsledger_core::UserId;

/// Who is performing the request.
///
/// Inserted by [`crate::middleware::actor_middleware`]; every ledger mutation
/// is attributed to this id.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ActorContext {
    actor_id: UserId,
}

impl ActorContext {
    pub fn new(actor_id: UserId) -> Self {
        Self { actor_id }
    }

    pub fn actor_id(&self) -> UserId {
        self.actor_id
    }
}

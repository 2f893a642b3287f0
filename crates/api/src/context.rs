use stacks_core::UserId;

/// Caller identity for a request.
///
/// Identity *enforcement* happens upstream; this layer only carries the
/// asserted identity through to the handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    user: UserId,
}

impl CallerContext {
    pub fn new(user: UserId) -> Self {
        Self { user }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }
}

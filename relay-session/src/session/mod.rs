//! Session entity, identity, registry, and persistence.

mod key;
mod registry;
mod store;
mod types;

pub use key::ConversationKey;
pub use registry::{PendingWarning, SessionRegistry, SweepReport};
pub use store::SessionStore;
pub use types::{Session, SessionPhase, WarningState, Workflow};

//! Interrupt authority policy.

use crate::session::Session;

/// Whether `actor_id` may cancel the session's in-flight request: only the
/// session owner or the actor whose message started the current request.
///
/// A turn from anyone else proceeds as an independent, non-cancelling turn;
/// queuing is deliberately not implemented.
pub fn can_interrupt(session: &Session, actor_id: &str) -> bool {
    actor_id == session.owner_id || actor_id == session.current_initiator_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConversationKey;

    fn session() -> Session {
        Session::new(ConversationKey::new("C1", Some("T1")), "U1", "alice")
    }

    #[test]
    fn test_owner_can_always_interrupt() {
        let s = session();
        assert!(can_interrupt(&s, "U1"));
    }

    #[test]
    fn test_current_initiator_can_interrupt() {
        let mut s = session();
        s.current_initiator_id = "U2".to_owned();
        assert!(can_interrupt(&s, "U2"));
        assert!(can_interrupt(&s, "U1"));
    }

    #[test]
    fn test_other_actor_cannot_interrupt() {
        let s = session();
        assert!(!can_interrupt(&s, "U9"));
    }
}

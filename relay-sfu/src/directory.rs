use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::hub::Outbox;
use crate::protocol::ServerMessage;
use crate::registry::SessionRegistry;
use crate::types::EndpointId;

/// Viewing group and the publishers each member has been told about.
///
/// Every member maps to the set of publisher ids it already learned, either
/// from its `publisher-list` reply or from a later `publisher-joined`. A
/// publisher is announced to a member at most once while it stays published.
pub struct RoomDirectory {
    /// member id -> publishers that member already knows
    members: Mutex<HashMap<EndpointId, HashSet<EndpointId>>>,
    registry: Arc<SessionRegistry>,
    outbox: Arc<dyn Outbox>,
}

impl RoomDirectory {
    pub fn new(registry: Arc<SessionRegistry>, outbox: Arc<dyn Outbox>) -> Self {
        Self {
            members: Mutex::new(HashMap::new()),
            registry,
            outbox,
        }
    }

    /// Add `viewer` to the group and reply with every current publisher.
    ///
    /// The snapshot and the reply happen under the membership lock, so an
    /// announcement racing the join lands either in the list or after it,
    /// never in both.
    pub fn join(&self, viewer: &EndpointId) -> Vec<EndpointId> {
        let mut members = self.members.lock();
        let ids = self.registry.publisher_ids();
        let rejoined = members
            .insert(viewer.clone(), ids.iter().cloned().collect())
            .is_some();

        self.outbox
            .deliver(viewer, ServerMessage::PublisherList { ids: ids.clone() });

        info!(
            endpoint_id = %viewer,
            publishers = ids.len(),
            members = members.len(),
            rejoined,
            "Viewer joined room"
        );
        ids
    }

    /// Tell every member that does not know `publisher` yet that it is available.
    ///
    /// Returns the number of members notified.
    pub fn announce_publisher(&self, publisher: &EndpointId) -> usize {
        let mut members = self.members.lock();
        // Raced with the publisher's teardown
        if !self.registry.contains_publisher(publisher) {
            return 0;
        }

        let mut notified = 0;
        for (member, known) in members.iter_mut() {
            if member == publisher || !known.insert(publisher.clone()) {
                continue;
            }
            self.outbox.deliver(
                member,
                ServerMessage::PublisherJoined {
                    id: publisher.clone(),
                },
            );
            notified += 1;
        }

        if notified > 0 {
            debug!(endpoint_id = %publisher, notified, "Announced publisher");
        }
        notified
    }

    /// Withdraw `publisher` from every member that knew it
    pub fn forget_publisher(&self, publisher: &EndpointId) -> usize {
        let mut members = self.members.lock();
        let mut notified = 0;
        for (member, known) in members.iter_mut() {
            if !known.remove(publisher) {
                continue;
            }
            self.outbox.deliver(
                member,
                ServerMessage::PublisherLeft {
                    id: publisher.clone(),
                },
            );
            notified += 1;
        }
        notified
    }

    pub fn leave(&self, member: &EndpointId) -> bool {
        let removed = self.members.lock().remove(member).is_some();
        if removed {
            debug!(endpoint_id = %member, "Viewer left room");
        }
        removed
    }

    #[must_use]
    pub fn is_member(&self, id: &EndpointId) -> bool {
        self.members.lock().contains_key(id)
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::ConnectionHub;
    use tokio::sync::mpsc;

    fn id(s: &str) -> EndpointId {
        EndpointId::from(s)
    }

    fn setup() -> (Arc<SessionRegistry>, Arc<ConnectionHub>, RoomDirectory) {
        let registry = Arc::new(SessionRegistry::new());
        let hub = Arc::new(ConnectionHub::new(16));
        let directory = RoomDirectory::new(Arc::clone(&registry), hub.clone());
        (registry, hub, directory)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    #[test]
    fn test_join_replies_with_current_publishers() {
        let (registry, hub, directory) = setup();
        registry.register_publisher(&id("c2"));
        registry.register_publisher(&id("c1"));
        let mut rx = hub.connect(id("a1"));

        assert_eq!(directory.join(&id("a1")), vec![id("c1"), id("c2")]);
        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::PublisherList {
                ids: vec![id("c1"), id("c2")]
            }]
        );
        assert!(directory.is_member(&id("a1")));
    }

    #[test]
    fn test_announce_skips_publishers_already_listed() {
        let (registry, hub, directory) = setup();
        registry.register_publisher(&id("c1"));
        let mut rx = hub.connect(id("a1"));
        directory.join(&id("a1"));
        drain(&mut rx);

        assert_eq!(directory.announce_publisher(&id("c1")), 0);
        assert!(drain(&mut rx).is_empty());

        registry.register_publisher(&id("c2"));
        assert_eq!(directory.announce_publisher(&id("c2")), 1);
        assert_eq!(directory.announce_publisher(&id("c2")), 0);
        assert_eq!(drain(&mut rx), vec![ServerMessage::PublisherJoined { id: id("c2") }]);
    }

    #[test]
    fn test_announce_never_notifies_the_publisher_itself() {
        let (registry, hub, directory) = setup();
        let mut rx = hub.connect(id("c1"));
        directory.join(&id("c1"));
        drain(&mut rx);

        registry.register_publisher(&id("c1"));
        assert_eq!(directory.announce_publisher(&id("c1")), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_announce_of_removed_publisher_is_dropped() {
        let (_registry, hub, directory) = setup();
        let mut rx = hub.connect(id("a1"));
        directory.join(&id("a1"));
        drain(&mut rx);

        assert_eq!(directory.announce_publisher(&id("gone")), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_forget_notifies_only_members_that_knew() {
        let (registry, hub, directory) = setup();
        registry.register_publisher(&id("c1"));
        let mut knows = hub.connect(id("a1"));
        directory.join(&id("a1"));
        drain(&mut knows);

        assert_eq!(directory.forget_publisher(&id("c1")), 1);
        assert_eq!(drain(&mut knows), vec![ServerMessage::PublisherLeft { id: id("c1") }]);
        assert_eq!(directory.forget_publisher(&id("c1")), 0);

        // Re-publishing announces again
        assert_eq!(directory.announce_publisher(&id("c1")), 1);
    }

    #[test]
    fn test_leave() {
        let (_registry, hub, directory) = setup();
        let _rx = hub.connect(id("a1"));
        directory.join(&id("a1"));
        assert_eq!(directory.member_count(), 1);

        assert!(directory.leave(&id("a1")));
        assert!(!directory.leave(&id("a1")));
        assert_eq!(directory.member_count(), 0);
    }
}

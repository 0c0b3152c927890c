use std::collections::HashSet;

use super::ids::{PeerId, UserId};

/// A conversation counterpart as shown in the sidebar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: PeerId,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl Peer {
    pub fn new(id: PeerId, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into().trim().to_string();
        let display_name = if display_name.is_empty() {
            id.to_string()
        } else {
            display_name
        };

        Self {
            id,
            display_name,
            avatar_url: None,
        }
    }

    pub fn with_avatar(mut self, avatar_url: impl Into<String>) -> Self {
        let avatar_url = avatar_url.into();
        self.avatar_url = (!avatar_url.trim().is_empty()).then_some(avatar_url);
        self
    }

    /// First letter of each word, uppercased. Used when there is no avatar.
    pub fn initials(&self) -> String {
        self.display_name
            .split_whitespace()
            .filter_map(|word| word.chars().next())
            .flat_map(char::to_uppercase)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRow {
    pub peer: Peer,
    pub online: bool,
    pub initials: String,
}

/// Peers known to the local user, in the order they were added.
#[derive(Debug, Clone, Default)]
pub struct ContactList {
    peers: Vec<Peer>,
}

impl ContactList {
    pub fn new(peers: impl IntoIterator<Item = Peer>) -> Self {
        let mut list = Self::default();
        for peer in peers {
            list.upsert(peer);
        }
        list
    }

    pub fn upsert(&mut self, peer: Peer) {
        match self.peers.iter_mut().find(|existing| existing.id == peer.id) {
            Some(existing) => *existing = peer,
            None => self.peers.push(peer),
        }
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&Peer> {
        self.peers.iter().find(|peer| &peer.id == peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn visible(&self, online: &HashSet<UserId>, online_only: bool) -> Vec<ContactRow> {
        self.peers
            .iter()
            .map(|peer| ContactRow {
                online: online.contains(&peer.id),
                initials: peer.initials(),
                peer: peer.clone(),
            })
            .filter(|row| !online_only || row.online)
            .collect()
    }

    /// Online contacts, never counting the local user.
    pub fn online_count(&self, online: &HashSet<UserId>, local_user_id: &UserId) -> usize {
        self.peers
            .iter()
            .filter(|peer| &peer.id != local_user_id && online.contains(&peer.id))
            .count()
    }

    pub fn empty_state(&self, online_only: bool) -> &'static str {
        if online_only && !self.is_empty() {
            "No online users"
        } else {
            "No contacts"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::user;

    fn contacts() -> ContactList {
        ContactList::new([
            Peer::new(user("alice"), "Alice Liddell"),
            Peer::new(user("bob"), "bob"),
            Peer::new(user("me"), "Me Myself"),
        ])
    }

    #[test]
    fn initials_take_the_first_letter_of_each_word() {
        assert_eq!(Peer::new(user("a"), "alice liddell").initials(), "AL");
        assert_eq!(Peer::new(user("zoe"), "  ").initials(), "Z");
    }

    #[test]
    fn online_only_filter_hides_offline_contacts() {
        let online = HashSet::from([user("bob")]);
        let rows = contacts().visible(&online, true);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].peer.id, user("bob"));
        assert!(rows[0].online);
        assert_eq!(contacts().visible(&online, false).len(), 3);
    }

    #[test]
    fn online_count_excludes_the_local_user() {
        let online = HashSet::from([user("alice"), user("me")]);
        assert_eq!(contacts().online_count(&online, &user("me")), 1);
    }

    #[test]
    fn upsert_replaces_by_id() {
        let mut list = contacts();
        list.upsert(Peer::new(user("bob"), "Robert").with_avatar("https://cdn.example/bob.png"));

        assert_eq!(list.len(), 3);
        let bob = list.get(&user("bob")).unwrap();
        assert_eq!(bob.display_name, "Robert");
        assert!(bob.avatar_url.is_some());
    }

    #[test]
    fn empty_state_depends_on_filter() {
        assert_eq!(ContactList::default().empty_state(true), "No contacts");
        assert_eq!(contacts().empty_state(true), "No online users");
    }
}

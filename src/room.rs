use std::collections::HashSet;

use crate::signal::RoomId;

/// A named set of connections. Exists only while it has members.
pub struct Room {
    pub id: RoomId,
    members: HashSet<String>,
}

impl Room {
    pub fn new(id: RoomId) -> Self {
        Room {
            id,
            members: HashSet::new(),
        }
    }

    /// Returns false if the connection was already a member.
    pub fn insert(&mut self, connection_id: &str) -> bool {
        self.members.insert(connection_id.to_string())
    }

    pub fn remove(&mut self, connection_id: &str) -> bool {
        self.members.remove(connection_id)
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.members.contains(connection_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Every member except `connection_id`.
    pub fn others<'a>(&'a self, connection_id: &'a str) -> impl Iterator<Item = &'a String> + 'a {
        self.members.iter().filter(move |id| id.as_str() != connection_id)
    }
}

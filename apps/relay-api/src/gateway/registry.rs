//! Room membership table.
//!
//! Holds the global session set, the room → sessions partition and the set of
//! predefined rooms. The hub keeps it behind a `parking_lot::RwLock`; only the
//! hub loop (and shutdown) takes the write side.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use utoipa::ToSchema;

use super::hub::HubError;
use super::session::Session;

/// A room as listed by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct RoomInfo {
    pub name: String,
    #[serde(rename = "userCount")]
    pub user_count: usize,
}

/// Result of removing a session from the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removal {
    /// Members left in the session's room afterwards.
    pub remaining: usize,
    /// Whether the room entry was dropped (dynamic room that became empty).
    pub room_deleted: bool,
}

type Members = HashMap<String, Arc<Session>>;

#[derive(Default)]
pub struct Registry {
    sessions: Members,
    rooms: HashMap<String, Members>,
    predefined: BTreeSet<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session to the global set and to its room, creating the room
    /// entry if needed. Returns `false` if the session was already present.
    pub fn insert(&mut self, session: Arc<Session>) -> bool {
        if self.sessions.contains_key(&session.id) {
            return false;
        }
        self.rooms
            .entry(session.room.clone())
            .or_default()
            .insert(session.id.clone(), Arc::clone(&session));
        self.sessions.insert(session.id.clone(), session);
        true
    }

    /// Remove a session from the global set and from its room.
    ///
    /// Returns `None` if the session is not a current member. An emptied room
    /// is deleted unless it is predefined.
    pub fn remove(&mut self, session: &Session) -> Option<Removal> {
        self.sessions.remove(&session.id)?;

        let Some(members) = self.rooms.get_mut(&session.room) else {
            return Some(Removal {
                remaining: 0,
                room_deleted: false,
            });
        };
        members.remove(&session.id);
        let remaining = members.len();

        let room_deleted = remaining == 0 && !self.predefined.contains(&session.room);
        if room_deleted {
            self.rooms.remove(&session.room);
        }

        Some(Removal {
            remaining,
            room_deleted,
        })
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of room entries (active rooms plus empty predefined ones).
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, HashMap::len)
    }

    /// Snapshot of the sessions currently in `room`.
    pub fn room_members(&self, room: &str) -> Vec<Arc<Session>> {
        self.rooms
            .get(room)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every live session, in any room, with display name `name`.
    pub fn sessions_named(&self, name: &str) -> Vec<Arc<Session>> {
        self.sessions
            .values()
            .filter(|session| session.name == name)
            .cloned()
            .collect()
    }

    pub fn is_predefined(&self, room: &str) -> bool {
        self.predefined.contains(room)
    }

    /// Register a predefined room. It stays listed with zero members.
    pub fn create_room(&mut self, name: &str) -> Result<(), HubError> {
        if !self.predefined.insert(name.to_string()) {
            return Err(HubError::RoomExists(name.to_string()));
        }
        self.rooms.entry(name.to_string()).or_default();
        Ok(())
    }

    /// Predefined rooms sorted by name, then (when `include_dynamic`) active
    /// dynamic rooms sorted by name.
    pub fn list_rooms(&self, include_dynamic: bool) -> Vec<RoomInfo> {
        let mut rooms: Vec<RoomInfo> = self
            .predefined
            .iter()
            .map(|name| RoomInfo {
                name: name.clone(),
                user_count: self.member_count(name),
            })
            .collect();

        if include_dynamic {
            let mut dynamic: Vec<RoomInfo> = self
                .rooms
                .iter()
                .filter(|(name, _)| !self.predefined.contains(*name))
                .map(|(name, members)| RoomInfo {
                    name: name.clone(),
                    user_count: members.len(),
                })
                .collect();
            dynamic.sort_by(|a, b| a.name.cmp(&b.name));
            rooms.extend(dynamic);
        }

        rooms
    }

    /// Remove every session, returning them. Predefined rooms stay, empty.
    pub fn drain(&mut self) -> Vec<Arc<Session>> {
        let drained = self.sessions.drain().map(|(_, session)| session).collect();
        let predefined = &self.predefined;
        self.rooms.retain(|name, _| predefined.contains(name));
        for members in self.rooms.values_mut() {
            members.clear();
        }
        drained
    }
}

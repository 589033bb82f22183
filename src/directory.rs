//! Read-only catalogues of rooms and users the engine consults.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::*;
use crate::validate::normalize_email;

pub trait RoomDirectory: Send + Sync {
    fn get_room(&self, id: RoomId) -> Option<Room>;
    fn list_rooms(&self) -> Vec<Room>;
}

pub trait UserDirectory: Send + Sync {
    fn get_user(&self, id: UserId) -> Option<User>;
    /// Lookup by already-normalised (trimmed, lower-case) address.
    fn resolve_by_email(&self, email: &str) -> Option<User>;
    fn list_users(&self) -> Vec<User>;
}

/// On-disk shape of a directory file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryFile {
    #[serde(default)]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub users: Vec<User>,
}

/// Fixed set of rooms and users, loaded once at startup.
pub struct StaticDirectory {
    rooms: Vec<Room>,
    users: Vec<User>,
    by_email: HashMap<String, usize>,
}

impl StaticDirectory {
    pub fn new(rooms: Vec<Room>, users: Vec<User>) -> io::Result<Self> {
        let mut room_ids = BTreeSet::new();
        for room in &rooms {
            if room.capacity == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("room {} has zero capacity", room.id),
                ));
            }
            if !room_ids.insert(room.id) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("duplicate room id {}", room.id),
                ));
            }
        }

        let mut by_email = HashMap::with_capacity(users.len());
        let mut user_ids = BTreeSet::new();
        for (idx, user) in users.iter().enumerate() {
            if !user_ids.insert(user.id) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("duplicate user id {}", user.id),
                ));
            }
            let email = normalize_email(&user.email).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("user {} has malformed email '{}'", user.id, user.email),
                )
            })?;
            if by_email.insert(email, idx).is_some() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("duplicate email '{}'", user.email),
                ));
            }
        }

        Ok(Self { rooms, users, by_email })
    }

    /// Parse a JSON directory file.
    pub fn load(path: &Path) -> io::Result<Self> {
        let raw = std::fs::read(path)?;
        let file: DirectoryFile = serde_json::from_slice(&raw)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tracing::info!(
            "loaded directory from {}: {} rooms, {} users",
            path.display(),
            file.rooms.len(),
            file.users.len()
        );
        Self::new(file.rooms, file.users)
    }

    /// Built-in catalogue used when no directory file is configured.
    pub fn seeded() -> Self {
        let facilities = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        let rooms = vec![
            Room {
                id: 1,
                name: "Seminar Room A".into(),
                capacity: 12,
                facilities: facilities(&["projector", "whiteboard"]),
                accessibility: facilities(&["step_free", "hearing_loop"]),
                restricted_to_roles: Vec::new(),
                building: "Main Library".into(),
            },
            Room {
                id: 2,
                name: "Collaboration Hub".into(),
                capacity: 8,
                facilities: facilities(&["display", "video_conferencing"]),
                accessibility: facilities(&["step_free"]),
                restricted_to_roles: Vec::new(),
                building: "Main Library".into(),
            },
            Room {
                id: 3,
                name: "Quiet Room".into(),
                capacity: 4,
                facilities: facilities(&["whiteboard"]),
                accessibility: BTreeSet::new(),
                restricted_to_roles: Vec::new(),
                building: "North Wing".into(),
            },
            Room {
                id: 4,
                name: "Board Room".into(),
                capacity: 16,
                facilities: facilities(&["display", "video_conferencing", "catering"]),
                accessibility: facilities(&["step_free"]),
                restricted_to_roles: vec!["organiser".into()],
                building: "North Wing".into(),
            },
        ];
        let users = vec![
            User {
                id: 1,
                name: "Alice Johnson".into(),
                email: "alice@example.com".into(),
                role: Role::Organiser,
            },
            User {
                id: 2,
                name: "Ben Lee".into(),
                email: "ben@example.com".into(),
                role: Role::Attendee,
            },
            User {
                id: 3,
                name: "Chloe Smith".into(),
                email: "chloe@example.com".into(),
                role: Role::Attendee,
            },
        ];
        // The seed is static and known-valid.
        let mut by_email = HashMap::new();
        for (idx, user) in users.iter().enumerate() {
            by_email.insert(user.email.clone(), idx);
        }
        Self { rooms, users, by_email }
    }
}

impl RoomDirectory for StaticDirectory {
    fn get_room(&self, id: RoomId) -> Option<Room> {
        self.rooms.iter().find(|r| r.id == id).cloned()
    }

    fn list_rooms(&self) -> Vec<Room> {
        self.rooms.clone()
    }
}

impl UserDirectory for StaticDirectory {
    fn get_user(&self, id: UserId) -> Option<User> {
        self.users.iter().find(|u| u.id == id).cloned()
    }

    fn resolve_by_email(&self, email: &str) -> Option<User> {
        self.by_email
            .get(email)
            .and_then(|&idx| self.users.get(idx))
            .cloned()
    }

    fn list_users(&self) -> Vec<User> {
        self.users.clone()
    }
}

use std::collections::HashMap;

use crate::models::{TimetableSlot, Unit, User};

/// Id-indexed view over the fetched collections, used for every join.
#[derive(Debug, Default)]
pub struct Directory<'a> {
    users: HashMap<&'a str, &'a User>,
    units: HashMap<&'a str, &'a Unit>,
    rooms: HashMap<&'a str, &'a str>,
}

impl<'a> Directory<'a> {
    pub fn new(users: &'a [User], units: &'a [Unit]) -> Self {
        Self {
            users: users.iter().map(|user| (user.id.as_str(), user)).collect(),
            units: units.iter().map(|unit| (unit.id.as_str(), unit)).collect(),
            rooms: HashMap::new(),
        }
    }

    /// Indexes the room of each unit's first timetable slot.
    pub fn with_rooms(mut self, slots: &'a [TimetableSlot]) -> Self {
        for slot in slots {
            if let Some(room) = slot.room.as_deref().filter(|room| !room.trim().is_empty()) {
                self.rooms.entry(slot.unit_id.as_str()).or_insert(room);
            }
        }
        self
    }

    pub fn user(&self, id: &str) -> Option<&'a User> {
        self.users.get(id).copied()
    }

    pub fn unit(&self, id: &str) -> Option<&'a Unit> {
        self.units.get(id).copied()
    }

    pub fn room_of_unit(&self, unit_id: &str) -> Option<&'a str> {
        self.rooms.get(unit_id).copied()
    }

    pub fn teacher_of_unit(&self, unit_id: &str) -> Option<&'a User> {
        self.unit(unit_id)
            .and_then(|unit| unit.teacher_id.as_deref())
            .and_then(|teacher_id| self.user(teacher_id))
    }

    pub fn units_taught_by(&self, teacher_id: &str) -> Vec<&'a Unit> {
        let mut units: Vec<&'a Unit> = self
            .units
            .values()
            .copied()
            .filter(|unit| unit.teacher_id.as_deref() == Some(teacher_id))
            .collect();
        units.sort_by(|a, b| a.name.cmp(&b.name));
        units
    }
}

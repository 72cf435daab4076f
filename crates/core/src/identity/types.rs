use serde::{Deserialize, Serialize};

use crate::order::Station;

/// What a person does on the floor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Role {
    /// Staffs a single station.
    Worker { station: Station },
    Driver,
    /// Approves bypass requests.
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Worker { .. } => "worker",
            Role::Driver => "driver",
            Role::Admin => "admin",
        }
    }
}

/// An authenticated person.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub role: Role,
}

impl Principal {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn worker(user_id: impl Into<String>, station: Station) -> Self {
        Self::new(user_id, Role::Worker { station })
    }

    pub fn driver(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Driver)
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Admin)
    }
}

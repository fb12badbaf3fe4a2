use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller identity, already authenticated upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "student" => Some(Role::Student),
            "teacher" => Some(Role::Teacher),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl Identity {
    pub fn student(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Student,
        }
    }

    pub fn teacher(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Teacher,
        }
    }

    /// Teachers and admins may grade and read any attempt.
    pub fn is_staff(&self) -> bool {
        matches!(self.role, Role::Teacher | Role::Admin)
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::datetime::parse_instant;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent,
    High,
    Medium,
    #[default]
    Low,
    /// A value this client does not know yet, kept verbatim so it is sent
    /// back unchanged.
    #[serde(untagged)]
    Other(String),
}

impl Priority {
    pub const SELECTABLE: [Priority; 4] = [
        Priority::Urgent,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];

    pub fn as_key(&self) -> &str {
        match self {
            Priority::Urgent => "urgent",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
            Priority::Other(raw) => raw,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Priority::Urgent => "Urgent",
            Priority::High => "High",
            Priority::Medium => "Medium",
            Priority::Low => "Low",
            Priority::Other(raw) => raw,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Priority::Other(_))
    }
}

impl std::str::FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Priority::SELECTABLE
            .into_iter()
            .find(|p| p.as_key().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("unknown priority: {s} (expected urgent, high, medium or low)"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: u64,

    pub title: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,

    pub due_date: String,

    pub status: Status,

    #[serde(default, deserialize_with = "null_as_default")]
    pub priority: Priority,

    #[serde(default)]
    pub assigned_to_email: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub user_email: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<u64>>,
}

impl Task {
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        parse_instant(&self.due_date)
    }

    pub fn is_completed(&self) -> bool {
        self.status == Status::Completed
    }

    /// Full copy of the task as an update payload.
    pub fn to_draft(&self) -> TaskDraft {
        TaskDraft {
            id: Some(self.id),
            title: Some(self.title.clone()),
            description: Some(self.description.clone()),
            due_date: Some(self.due_date.clone()),
            status: Some(self.status),
            priority: Some(self.priority.clone()),
            assigned_to_email: self.assigned_to_email.clone(),
            user_email: Some(self.user_email.clone()),
            dependencies: self.dependencies.clone(),
        }
    }
}

/// Partial task sent on create and update. Absent fields are left out of
/// the request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TaskDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to_email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<u64>>,
}

impl TaskDraft {
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }
}

/// Reads an explicit `null` the same as a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Trims an optional email and drops it when nothing is left.
pub fn normalize_assignee(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

use std::sync::OnceLock;

use chrono_tz::Tz;
use regex::Regex;

use crate::datetime::{from_local_input, to_local_input};
use crate::task::{Priority, Task, TaskDraft, normalize_assignee};

// WHATWG "valid email address" production, as enforced by email inputs.
const EMAIL_PATTERN: &str = r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$";

pub fn is_valid_email(raw: &str) -> bool {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(EMAIL_PATTERN).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(raw))
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FormError {
    #[error("title is required")]
    MissingTitle,

    #[error("due date and time are required")]
    MissingDue,

    #[error("{0}")]
    InvalidDue(String),

    #[error("'{0}' is not a valid email address")]
    InvalidAssignee(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMode {
    Create,
    Edit { id: u64 },
}

/// Editable state of one task. The due field holds the viewer's wall-clock
/// value (`YYYY-MM-DDTHH:MM`) and is converted to UTC only on submit.
#[derive(Debug, Clone)]
pub struct TaskForm {
    mode: FormMode,
    viewer_tz: Tz,
    open: bool,
    pub title: String,
    pub description: String,
    pub due_local: String,
    pub priority: Priority,
    pub assignee: String,
}

impl TaskForm {
    pub fn create(viewer_tz: Tz) -> Self {
        Self {
            mode: FormMode::Create,
            viewer_tz,
            open: true,
            title: String::new(),
            description: String::new(),
            due_local: String::new(),
            priority: Priority::Low,
            assignee: String::new(),
        }
    }

    pub fn edit(task: &Task, viewer_tz: Tz) -> Self {
        let priority = if task.priority.is_known() {
            task.priority.clone()
        } else {
            Priority::Low
        };
        Self {
            mode: FormMode::Edit { id: task.id },
            viewer_tz,
            open: true,
            title: task.title.clone(),
            description: task.description.clone(),
            due_local: to_local_input(&task.due_date, viewer_tz).unwrap_or_default(),
            priority,
            assignee: task.assigned_to_email.clone().unwrap_or_default(),
        }
    }

    pub fn mode(&self) -> FormMode {
        self.mode
    }

    pub fn heading(&self) -> &'static str {
        match self.mode {
            FormMode::Create => "Add New Task",
            FormMode::Edit { .. } => "Edit Task",
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    pub fn validate(&self) -> Result<(), FormError> {
        if self.title.trim().is_empty() {
            return Err(FormError::MissingTitle);
        }
        if self.due_local.trim().is_empty() {
            return Err(FormError::MissingDue);
        }
        let assignee = self.assignee.trim();
        if !assignee.is_empty() && !is_valid_email(assignee) {
            return Err(FormError::InvalidAssignee(assignee.to_string()));
        }
        Ok(())
    }

    /// Normalized payload for the save path. Leaves the form untouched so a
    /// failed save can be retried with the same values.
    pub fn payload(&self) -> Result<TaskDraft, FormError> {
        self.validate()?;
        let due_date = from_local_input(&self.due_local, self.viewer_tz)
            .map_err(|err| FormError::InvalidDue(err.to_string()))?;

        Ok(TaskDraft {
            id: match self.mode {
                FormMode::Create => None,
                FormMode::Edit { id } => Some(id),
            },
            title: Some(self.title.clone()),
            description: Some(self.description.clone()),
            due_date: Some(due_date),
            priority: Some(self.priority.clone()),
            assigned_to_email: normalize_assignee(Some(&self.assignee)),
            ..TaskDraft::default()
        })
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{Priority, Task};

pub const URGENT_COLOR: &str = "#dc2626";
pub const HIGH_COLOR: &str = "#f97316";
pub const MEDIUM_COLOR: &str = "#eab308";
pub const LOW_COLOR: &str = "#22c55e";
pub const UNKNOWN_COLOR: &str = "#9ca3af";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskCategory {
    #[default]
    Upcoming,
    Pending,
    Completed,
}

impl TaskCategory {
    pub const ALL: [TaskCategory; 3] = [
        TaskCategory::Upcoming,
        TaskCategory::Pending,
        TaskCategory::Completed,
    ];

    pub fn as_key(self) -> &'static str {
        match self {
            TaskCategory::Upcoming => "upcoming",
            TaskCategory::Pending => "pending",
            TaskCategory::Completed => "completed",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TaskCategory::Upcoming => "Upcoming Tasks",
            TaskCategory::Pending => "Pending Tasks",
            TaskCategory::Completed => "Completed Tasks",
        }
    }
}

impl std::str::FromStr for TaskCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskCategory::ALL
            .into_iter()
            .find(|cat| cat.as_key().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("unknown category: {s} (expected upcoming, pending or completed)"))
    }
}

/// Category of one task at `now`. A due date that cannot be parsed counts
/// as already due, so every task lands in exactly one category.
pub fn category_of(task: &Task, now: DateTime<Utc>) -> TaskCategory {
    if task.is_completed() {
        return TaskCategory::Completed;
    }
    match task.due_at() {
        Some(due) if due > now => TaskCategory::Upcoming,
        _ => TaskCategory::Pending,
    }
}

#[derive(Debug, Default)]
pub struct Categorized<'a> {
    pub upcoming: Vec<&'a Task>,
    pub pending: Vec<&'a Task>,
    pub completed: Vec<&'a Task>,
}

impl<'a> Categorized<'a> {
    pub fn get(&self, category: TaskCategory) -> &[&'a Task] {
        match category {
            TaskCategory::Upcoming => &self.upcoming,
            TaskCategory::Pending => &self.pending,
            TaskCategory::Completed => &self.completed,
        }
    }

    pub fn counts(&self) -> [(TaskCategory, usize); 3] {
        TaskCategory::ALL.map(|cat| (cat, self.get(cat).len()))
    }
}

#[tracing::instrument(skip(tasks), fields(total = tasks.len()))]
pub fn categorize(tasks: &[Task], now: DateTime<Utc>) -> Categorized<'_> {
    let mut out = Categorized::default();
    for task in tasks {
        match category_of(task, now) {
            TaskCategory::Upcoming => out.upcoming.push(task),
            TaskCategory::Pending => out.pending.push(task),
            TaskCategory::Completed => out.completed.push(task),
        }
    }
    tracing::debug!(
        upcoming = out.upcoming.len(),
        pending = out.pending.len(),
        completed = out.completed.len(),
        "tasks categorized"
    );
    out
}

pub fn priority_color(priority: &Priority) -> &'static str {
    match priority {
        Priority::Urgent => URGENT_COLOR,
        Priority::High => HIGH_COLOR,
        Priority::Medium => MEDIUM_COLOR,
        Priority::Low => LOW_COLOR,
        Priority::Other(_) => UNKNOWN_COLOR,
    }
}

/// One entry handed to the calendar widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start: String,
    pub color: String,
}

impl CalendarEvent {
    pub fn from_task(task: &Task) -> Self {
        Self {
            id: task.id.to_string(),
            title: task.title.clone(),
            start: task.due_date.clone(),
            color: priority_color(&task.priority).to_string(),
        }
    }
}

pub fn project_events(tasks: &[Task]) -> Vec<CalendarEvent> {
    tasks.iter().map(CalendarEvent::from_task).collect()
}

/// Resolves a clicked event id back to its task.
pub fn find_event_task<'a>(tasks: &'a [Task], event_id: &str) -> Option<&'a Task> {
    let id = event_id.trim().parse::<u64>().ok()?;
    tasks.iter().find(|task| task.id == id)
}

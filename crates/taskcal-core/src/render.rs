use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::calendar::ViewState;
use crate::classify::{CalendarEvent, Categorized, TaskCategory, priority_color};
use crate::config::Config;
use crate::datetime::format_due;
use crate::session::UserProfile;
use crate::task::Task;

pub const EMPTY_LIST_TEXT: &str = "No tasks found";

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    display_tz: Tz,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            color: color && io::stdout().is_terminal(),
            display_tz: cfg.display_timezone(),
        })
    }

    pub fn plain(display_tz: Tz) -> Self {
        Self {
            color: false,
            display_tz,
        }
    }

    /// Category tabs with counts, then the tasks of the active category.
    #[tracing::instrument(skip_all, fields(category = active.as_key()))]
    pub fn write_category_panel<W: Write>(
        &self,
        out: &mut W,
        split: &Categorized<'_>,
        active: TaskCategory,
    ) -> anyhow::Result<()> {
        let tabs = split
            .counts()
            .into_iter()
            .map(|(cat, count)| {
                let tab = format!("{} ({count})", cat.label());
                if cat == active {
                    self.paint(&format!("[{tab}]"), "1")
                } else {
                    format!(" {tab} ")
                }
            })
            .collect::<Vec<_>>()
            .join("  ");
        writeln!(out, "{tabs}")?;
        writeln!(out)?;

        let tasks = split.get(active);
        if tasks.is_empty() {
            writeln!(out, "{EMPTY_LIST_TEXT}")?;
            return Ok(());
        }
        self.write_task_table(out, tasks)
    }

    pub fn write_task_table<W: Write>(&self, out: &mut W, tasks: &[&Task]) -> anyhow::Result<()> {
        let headers = vec![
            "ID".to_string(),
            "Due".to_string(),
            "Priority".to_string(),
            "Title".to_string(),
            "Assignee".to_string(),
        ];

        let rows = tasks
            .iter()
            .map(|task| {
                vec![
                    self.paint(&task.id.to_string(), "33"),
                    format_due(&task.due_date, self.display_tz),
                    self.paint_hex(task.priority.label(), priority_color(&task.priority)),
                    task.title.clone(),
                    task.assigned_to_email.clone().unwrap_or_default(),
                ]
            })
            .collect();

        write_table(out, headers, rows)
    }

    #[tracing::instrument(skip(self, out, task), fields(id = task.id))]
    pub fn write_task_detail<W: Write>(&self, out: &mut W, task: &Task, stale: bool) -> anyhow::Result<()> {
        writeln!(out, "id        {}", task.id)?;
        writeln!(out, "title     {}", task.title)?;
        if !task.description.is_empty() {
            writeln!(out, "desc      {}", task.description)?;
        }
        writeln!(out, "due       {}", format_due(&task.due_date, self.display_tz))?;
        writeln!(
            out,
            "status    {}",
            if task.is_completed() { "completed" } else { "pending" }
        )?;
        writeln!(
            out,
            "priority  {}",
            self.paint_hex(task.priority.label(), priority_color(&task.priority))
        )?;
        if let Some(assignee) = task.assigned_to_email.as_deref() {
            writeln!(out, "assigned  {assignee}")?;
        }
        writeln!(out, "owner     {}", task.user_email)?;
        if stale {
            writeln!(out, "{}", self.paint("(this task changed or was removed since it was opened)", "2"))?;
        }
        Ok(())
    }

    pub fn write_events<W: Write>(&self, out: &mut W, events: &[CalendarEvent]) -> anyhow::Result<()> {
        if events.is_empty() {
            writeln!(out, "{EMPTY_LIST_TEXT}")?;
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "Start".to_string(),
            "Color".to_string(),
            "Title".to_string(),
        ];
        let rows = events
            .iter()
            .map(|event| {
                vec![
                    event.id.clone(),
                    format_due(&event.start, self.display_tz),
                    self.paint_hex(&event.color, &event.color),
                    event.title.clone(),
                ]
            })
            .collect();
        write_table(out, headers, rows)
    }

    pub fn write_events_json<W: Write>(&self, out: &mut W, events: &[CalendarEvent]) -> anyhow::Result<()> {
        serde_json::to_writer_pretty(&mut *out, events)?;
        writeln!(out)?;
        Ok(())
    }

    pub fn write_state<W: Write>(&self, out: &mut W, state: &ViewState) -> anyhow::Result<()> {
        match state {
            ViewState::Loading => writeln!(out, "Loading...")?,
            ViewState::Error(message) => writeln!(out, "{}", self.paint(message, "31"))?,
            ViewState::Ready => {}
        }
        Ok(())
    }

    pub fn write_user<W: Write>(&self, out: &mut W, user: Option<&UserProfile>) -> anyhow::Result<()> {
        match user {
            Some(user) if !user.name.is_empty() => writeln!(out, "{} <{}>", user.name, user.email)?,
            Some(user) => writeln!(out, "{}", user.email)?,
            None => writeln!(out, "not logged in")?,
        }
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }

    fn paint_hex(&self, text: &str, hex: &str) -> String {
        match parse_hex(hex) {
            Some((r, g, b)) => self.paint(text, &format!("38;2;{r};{g};{b}")),
            None => text.to_string(),
        }
    }
}

fn parse_hex(hex: &str) -> Option<(u8, u8, u8)> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(digits.get(range)?, 16).ok();
    Some((channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::classify::categorize;
    use crate::task::{Priority, Status};

    fn task(id: u64, status: Status) -> Task {
        Task {
            id,
            title: format!("Task {id}"),
            description: String::new(),
            due_date: "2024-01-01T00:00:00Z".to_string(),
            status,
            priority: Priority::Urgent,
            assigned_to_email: None,
            user_email: "u@example.com".to_string(),
            dependencies: None,
        }
    }

    #[test]
    fn empty_category_prints_placeholder() {
        let renderer = Renderer::plain(chrono_tz::UTC);
        let tasks = vec![task(1, Status::Completed)];
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).single().expect("now");
        let mut out = Vec::new();
        renderer
            .write_category_panel(&mut out, &categorize(&tasks, now), TaskCategory::Upcoming)
            .expect("render");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("[Upcoming Tasks (0)]"));
        assert!(text.contains(" Completed Tasks (1) "));
        assert!(text.trim_end().ends_with(EMPTY_LIST_TEXT));
    }

    #[test]
    fn task_rows_use_display_zone() {
        let renderer = Renderer::plain("Asia/Kolkata".parse().expect("zone"));
        let t = task(3, Status::Pending);
        let mut out = Vec::new();
        renderer.write_task_table(&mut out, &[&t]).expect("render");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("01 Jan 2024, 05:30 AM"));
        assert!(text.contains("Urgent"));
    }

    #[test]
    fn colored_cells_keep_alignment() {
        let colored = format!("\x1b[38;2;220;38;38m{}\x1b[0m", "Urgent");
        assert_eq!(strip_ansi(&colored), "Urgent");
        assert_eq!(parse_hex("#dc2626"), Some((220, 38, 38)));
        assert_eq!(parse_hex("red"), None);
    }
}

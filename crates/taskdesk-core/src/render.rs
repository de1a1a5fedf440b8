use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;

use crate::account::Identity;
use crate::config::Config;
use crate::datetime::format_deadline;
use crate::task::{Task, TaskPriority, TaskStatus};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => io::stdout().is_terminal(),
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip(self, out, tasks, now), fields(count = tasks.len()))]
    pub fn write_task_table<W: Write>(
        &self,
        out: &mut W,
        tasks: &[Task],
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "No tasks found.")?;
            return Ok(());
        }

        let headers = ["ID", "Name", "Status", "Priority", "Deadline", "Assignee", "Sub"]
            .map(str::to_string)
            .to_vec();

        let rows = tasks
            .iter()
            .map(|task| {
                let deadline = format_deadline(task.deadline);
                let deadline = match task.deadline {
                    Some(due) if due < now && task.status != TaskStatus::Completed => {
                        self.paint(&deadline, "31")
                    }
                    _ => deadline,
                };

                vec![
                    self.paint(&task.id, "33"),
                    task.name.clone(),
                    self.paint(task.status.label(), status_color(task.status)),
                    self.paint(task.priority.label(), priority_color(task.priority)),
                    deadline,
                    assignee_name(task),
                    if task.subtasks.is_empty() {
                        String::new()
                    } else {
                        task.subtasks.len().to_string()
                    },
                ]
            })
            .collect();

        write_table(out, headers, rows)
    }

    #[tracing::instrument(skip(self, out, task), fields(id = %task.id))]
    pub fn write_task_detail<W: Write>(&self, out: &mut W, task: &Task) -> anyhow::Result<()> {
        writeln!(out, "id          {}", task.id)?;
        if let Some(parent) = task.parent_task_id.as_deref() {
            writeln!(out, "parent      {parent}")?;
        }
        writeln!(out, "name        {}", task.name)?;
        writeln!(out, "description {}", task.description)?;
        writeln!(out, "status      {}", self.paint(task.status.label(), status_color(task.status)))?;
        writeln!(
            out,
            "priority    {}",
            self.paint(task.priority.label(), priority_color(task.priority))
        )?;
        writeln!(out, "deadline    {}", format_deadline(task.deadline))?;
        writeln!(out, "assignee    {}", assignee_name(task))?;
        if let Some(employee) = task.assignee.as_ref()
            && !employee.position.title.is_empty()
        {
            writeln!(out, "position    {}", employee.position.title)?;
        }
        if !task.comment.is_empty() {
            writeln!(out, "comment     {}", task.comment)?;
        }

        if !task.subtasks.is_empty() {
            writeln!(out)?;
            writeln!(out, "subtasks:")?;
            let rows = task
                .subtasks
                .iter()
                .map(|sub| {
                    vec![
                        sub.id.clone(),
                        sub.name.clone(),
                        sub.status.label().to_string(),
                        sub.priority.label().to_string(),
                        format_deadline(sub.deadline),
                    ]
                })
                .collect();
            let headers = ["ID", "Name", "Status", "Priority", "Deadline"]
                .map(str::to_string)
                .to_vec();
            write_table(&mut *out, headers, rows)?;
        }

        Ok(())
    }

    pub fn write_identity<W: Write>(&self, out: &mut W, identity: &Identity) -> anyhow::Result<()> {
        writeln!(out, "username    {}", identity.username())?;
        writeln!(out, "name        {}", identity.display_name())?;
        if !identity.account.email.is_empty() {
            writeln!(out, "email       {}", identity.account.email)?;
        }
        if let Some(employee) = identity.employee.as_ref() {
            if !employee.department.title.is_empty() {
                writeln!(out, "department  {}", employee.department.title)?;
            }
            if !employee.position.title.is_empty() {
                writeln!(out, "position    {}", employee.position.title)?;
            }
        }
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn assignee_name(task: &Task) -> String {
    task.assignee
        .as_ref()
        .map(|e| e.full_name.clone())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "-".to_string())
}

fn status_color(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Completed => "32",
        TaskStatus::InProgress => "34",
        TaskStatus::Pending => "33",
    }
}

fn priority_color(priority: TaskPriority) -> &'static str {
    match priority {
        TaskPriority::High => "31",
        TaskPriority::Medium => "33",
        TaskPriority::Low => "32",
    }
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

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate() {
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

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::datetime::parse_deadline;

/// Prefix for ids generated locally when the server omits one.
pub const LOCAL_ID_PREFIX: &str = "local-";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "Завершена", alias = "Completed")]
    Completed,
    #[serde(rename = "В процессе", alias = "InProgress")]
    InProgress,
    #[serde(rename = "Ожидает", alias = "Pending")]
    Pending,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 3] = [Self::Completed, Self::InProgress, Self::Pending];

    pub fn label(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::InProgress => "in progress",
            Self::Pending => "pending",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskPriority {
    #[serde(rename = "Высокий", alias = "High")]
    High,
    #[serde(rename = "Средний", alias = "Medium")]
    Medium,
    #[serde(rename = "Низкий", alias = "Low")]
    Low,
}

impl TaskPriority {
    /// Fixed sort rank: High sorts first.
    pub fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Position {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Department {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub title: String,
}

/// Denormalized snapshot of the employee a task is assigned to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmployeeInfo {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub surname: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub full_path_image: String,
    #[serde(default)]
    pub work_phone_num: String,
    #[serde(default)]
    pub personal_phone_num: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub department: Department,
    #[serde(default)]
    pub room_number: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,

    #[serde(default)]
    pub parent_task_id: Option<String>,

    pub name: String,

    #[serde(default)]
    pub description: String,

    pub status: TaskStatus,

    pub priority: TaskPriority,

    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,

    #[serde(default)]
    pub assignee: Option<EmployeeInfo>,

    #[serde(default)]
    pub comment: String,

    #[serde(default)]
    pub subtasks: Vec<Task>,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        status: TaskStatus,
        priority: TaskPriority,
    ) -> Self {
        Self {
            id: id.into(),
            parent_task_id: None,
            name: name.into(),
            description: String::new(),
            status,
            priority,
            deadline: None,
            assignee: None,
            comment: String::new(),
            subtasks: vec![],
        }
    }

    pub fn has_local_id(&self) -> bool {
        self.id.starts_with(LOCAL_ID_PREFIX)
    }

    /// Builds a task from one element of a server payload, repairing
    /// missing or malformed fields. Returns `None` only when the element
    /// is not a JSON object at all.
    pub fn from_wire(value: &Value) -> Option<Self> {
        Self::from_wire_with_parent(value, None)
    }

    fn from_wire_with_parent(value: &Value, parent: Option<&str>) -> Option<Self> {
        let Value::Object(obj) = value else {
            warn!(kind = value_kind(value), "skipping non-object task payload");
            return None;
        };

        let id = match wire_id(obj.get("id")) {
            Some(id) => id,
            None => {
                let generated = local_id();
                debug!(id = %generated, "task without server id, assigned local id");
                generated
            }
        };

        let parent_task_id = wire_id(obj.get("parent_task"))
            .or_else(|| wire_id(obj.get("parent_task_id")))
            .or_else(|| parent.map(str::to_string));

        let status = wire_enum(obj, &["task_status", "status"]).unwrap_or_else(|| {
            debug!(id = %id, "unrecognised task status, defaulting to pending");
            TaskStatus::Pending
        });
        let priority = wire_enum(obj, &["task_priority", "priority"]).unwrap_or_else(|| {
            debug!(id = %id, "unrecognised task priority, defaulting to medium");
            TaskPriority::Medium
        });

        let deadline = wire_text(obj, &["deadline"]).and_then(|raw| {
            let parsed = parse_deadline(&raw);
            if parsed.is_none() {
                debug!(id = %id, raw = %raw, "unparseable deadline dropped");
            }
            parsed
        });

        let assignee = obj
            .get("employee_info")
            .filter(|v| v.is_object())
            .and_then(|v| serde_json::from_value::<EmployeeInfo>(v.clone()).ok());

        let subtasks = match obj.get("subtodo").or_else(|| obj.get("subtasks")) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| Self::from_wire_with_parent(item, Some(&id)))
                .collect(),
            Some(Value::Null) | None => vec![],
            Some(other) => {
                debug!(id = %id, kind = value_kind(other), "malformed subtasks replaced with empty list");
                vec![]
            }
        };

        let task = Self {
            name: wire_text(obj, &["task_name", "name", "title"]).unwrap_or_default(),
            description: wire_text(obj, &["description"]).unwrap_or_default(),
            comment: wire_text(obj, &["comment", "comments"]).unwrap_or_default(),
            id,
            parent_task_id,
            status,
            priority,
            deadline,
            assignee,
            subtasks,
        };
        trace!(id = %task.id, subtasks = task.subtasks.len(), "normalized task");
        Some(task)
    }
}

/// Normalizes a task collection payload. `None` when the payload is not a
/// JSON array.
pub fn normalize_collection(value: &Value) -> Option<Vec<Task>> {
    let Value::Array(items) = value else {
        warn!(kind = value_kind(value), "task collection payload is not an array");
        return None;
    };

    let tasks: Vec<Task> = items.iter().filter_map(Task::from_wire).collect();
    debug!(received = items.len(), kept = tasks.len(), "normalized task collection");
    Some(tasks)
}

fn local_id() -> String {
    format!("{LOCAL_ID_PREFIX}{}", Uuid::new_v4())
}

fn wire_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn wire_text(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn wire_enum<T>(obj: &Map<String, Value>, keys: &[&str]) -> Option<T>
where
    T: serde::de::DeserializeOwned,
{
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .find_map(|v| serde_json::from_value::<T>(v.clone()).ok())
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

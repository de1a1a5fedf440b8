use crate::datetime::parse_deadline;
use crate::task::{EmployeeInfo, Task, TaskPriority, TaskStatus};

/// Small built-in collection shown instead of an empty list when the
/// `placeholder` fallback policy is configured.
pub fn placeholder_tasks() -> Vec<Task> {
    let rows = [
        (
            "placeholder-1",
            "Update documentation",
            "Bring the API documentation in line with the latest changes",
            TaskStatus::Completed,
            TaskPriority::Low,
            "Ivan Ivanov",
            "2025-03-06",
        ),
        (
            "placeholder-2",
            "Finish project proposal",
            "Draft and approve the project proposal for the client",
            TaskStatus::InProgress,
            TaskPriority::High,
            "Petr Petrov",
            "2025-03-09",
        ),
        (
            "placeholder-3",
            "Review code changes",
            "Review and approve pending pull requests",
            TaskStatus::Pending,
            TaskPriority::Medium,
            "Anna Sidorova",
            "2025-03-12",
        ),
    ];

    rows.into_iter()
        .map(|(id, name, description, status, priority, assignee, deadline)| {
            let mut task = Task::new(id, name, status, priority);
            task.description = description.to_string();
            task.deadline = parse_deadline(deadline);
            task.assignee = Some(EmployeeInfo {
                full_name: assignee.to_string(),
                ..EmployeeInfo::default()
            });
            task
        })
        .collect()
}

use std::cmp::Ordering;
use std::str::FromStr;

use anyhow::anyhow;
use icu_collator::options::CollatorOptions;
use icu_collator::{
  Collator,
  CollatorBorrowed
};
use serde::{
  Deserialize,
  Serialize
};
use tracing::{
  debug,
  trace,
  warn
};

use crate::task::{
  Task,
  TaskStatus
};

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
pub enum StatusFilter {
  #[default]
  All,
  Completed,
  InProgress,
  Pending
}

impl StatusFilter {
  pub fn admits(
    self,
    status: TaskStatus
  ) -> bool {
    match self {
      | Self::All => true,
      | Self::Completed => {
        status == TaskStatus::Completed
      }
      | Self::InProgress => {
        status == TaskStatus::InProgress
      }
      | Self::Pending => {
        status == TaskStatus::Pending
      }
    }
  }
}

impl FromStr for StatusFilter {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match normalize_token(s).as_str() {
      | "all" | "все статусы" => {
        Ok(Self::All)
      }
      | "completed" | "done"
      | "завершена" => {
        Ok(Self::Completed)
      }
      | "in-progress" | "inprogress"
      | "in progress" | "в процессе" => {
        Ok(Self::InProgress)
      }
      | "pending" | "ожидает" => {
        Ok(Self::Pending)
      }
      | other => Err(anyhow!(
        "unknown status filter \
         '{other}' (expected all, \
         completed, in-progress or \
         pending)"
      ))
    }
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
pub enum SortKey {
  #[default]
  ByDeadline,
  ByPriority,
  ByName
}

impl FromStr for SortKey {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match normalize_token(s).as_str() {
      | "deadline" | "по сроку" => {
        Ok(Self::ByDeadline)
      }
      | "priority"
      | "по приоритету" => {
        Ok(Self::ByPriority)
      }
      | "name" | "по названию" => {
        Ok(Self::ByName)
      }
      | other => Err(anyhow!(
        "unknown sort key '{other}' \
         (expected deadline, priority \
         or name)"
      ))
    }
  }
}

/// Search, status and sort selection
/// driving the visible task subset.
#[derive(
  Debug,
  Clone,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
pub struct FilterState {
  pub search_text:   String,
  pub status_filter: StatusFilter,
  pub sort_key:      SortKey
}

impl FilterState {
  pub fn with_search(
    mut self,
    text: impl Into<String>
  ) -> Self {
    self.search_text = text.into();
    self
  }

  pub fn with_status(
    mut self,
    status_filter: StatusFilter
  ) -> Self {
    self.status_filter = status_filter;
    self
  }

  pub fn with_sort(
    mut self,
    sort_key: SortKey
  ) -> Self {
    self.sort_key = sort_key;
    self
  }
}

/// Derives the visible, ordered subset
/// of `tasks`. Pure: the same inputs
/// always give the same output, and
/// applying it to its own output
/// changes nothing.
#[tracing::instrument(skip(
  tasks, filter
), fields(
  total = tasks.len(),
  sort = ?filter.sort_key,
  status = ?filter.status_filter
))]
pub fn derive(
  tasks: &[Task],
  filter: &FilterState
) -> Vec<Task> {
  let needle =
    filter.search_text.to_lowercase();

  let mut visible: Vec<Task> = tasks
    .iter()
    .filter(|task| {
      let ok = matches_search(
        task, &needle
      ) && filter
        .status_filter
        .admits(task.status);
      trace!(id = %task.id, ok, "query predicate evaluation");
      ok
    })
    .cloned()
    .collect();

  let collator = match filter.sort_key {
    | SortKey::ByName => name_collator(),
    | _ => None
  };

  // sort_by is stable
  visible.sort_by(|a, b| {
    compare(
      a,
      b,
      filter.sort_key,
      collator.as_ref()
    )
  });

  debug!(
    visible = visible.len(),
    "derived visible tasks"
  );
  visible
}

/// Depth-first lookup by id, descending
/// into subtasks.
pub fn find_task<'a>(
  tasks: &'a [Task],
  id: &str
) -> Option<&'a Task> {
  tasks.iter().find_map(|task| {
    if task.id == id {
      Some(task)
    } else {
      find_task(&task.subtasks, id)
    }
  })
}

/// Per-status counts over the top-level
/// collection, in display order.
pub fn status_counts(
  tasks: &[Task]
) -> Vec<(TaskStatus, usize)> {
  TaskStatus::ALL
    .iter()
    .map(|status| {
      let count = tasks
        .iter()
        .filter(|task| {
          task.status == *status
        })
        .count();
      (*status, count)
    })
    .collect()
}

fn matches_search(
  task: &Task,
  needle: &str
) -> bool {
  if needle.is_empty() {
    return true;
  }

  task
    .name
    .to_lowercase()
    .contains(needle)
    || task
      .description
      .to_lowercase()
      .contains(needle)
}

fn compare(
  a: &Task,
  b: &Task,
  key: SortKey,
  collator: Option<&CollatorBorrowed<'static>>
) -> Ordering {
  match key {
    | SortKey::ByDeadline => {
      match (a.deadline, b.deadline) {
        | (Some(x), Some(y)) => x.cmp(&y),
        | (Some(_), None) => {
          Ordering::Less
        }
        | (None, Some(_)) => {
          Ordering::Greater
        }
        | (None, None) => Ordering::Equal
      }
    }
    | SortKey::ByPriority => a
      .priority
      .rank()
      .cmp(&b.priority.rank()),
    | SortKey::ByName => {
      compare_names(
        &a.name, &b.name, collator
      )
    }
  }
}

/// Root (CLDR) collation: accents and
/// case are secondary to the base
/// letter, Latin before Cyrillic, `Ё`
/// next to `Е`.
fn name_collator()
-> Option<CollatorBorrowed<'static>> {
  Collator::try_new(
    Default::default(),
    CollatorOptions::default()
  )
  .inspect_err(|error| {
    warn!(%error, "collator unavailable; comparing names by code point");
  })
  .ok()
}

fn compare_names(
  a: &str,
  b: &str,
  collator: Option<&CollatorBorrowed<'static>>
) -> Ordering {
  let primary = match collator {
    | Some(collator) => {
      collator.compare(a, b)
    }
    | None => a
      .to_lowercase()
      .cmp(&b.to_lowercase())
  };
  primary.then_with(|| a.cmp(b))
}

fn normalize_token(s: &str) -> String {
  s.trim()
    .to_lowercase()
    .replace('_', "-")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::datetime::parse_deadline;
  use crate::task::TaskPriority;

  fn task(
    id: &str,
    name: &str,
    status: TaskStatus,
    priority: TaskPriority,
    deadline: &str
  ) -> Task {
    let mut task = Task::new(
      id, name, status, priority
    );
    task.deadline =
      parse_deadline(deadline);
    task
  }

  fn alpha_beta() -> Vec<Task> {
    vec![
      task(
        "1",
        "Alpha",
        TaskStatus::Pending,
        TaskPriority::Low,
        "2025-03-01"
      ),
      task(
        "2",
        "Beta",
        TaskStatus::InProgress,
        TaskPriority::High,
        "2025-02-01"
      ),
    ]
  }

  fn names(tasks: &[Task]) -> Vec<&str> {
    tasks
      .iter()
      .map(|t| t.name.as_str())
      .collect()
  }

  #[test]
  fn priority_sort_puts_high_first() {
    let filter = FilterState::default()
      .with_sort(SortKey::ByPriority);
    let out =
      derive(&alpha_beta(), &filter);
    assert_eq!(
      names(&out),
      vec!["Beta", "Alpha"]
    );
  }

  #[test]
  fn search_is_case_insensitive_substring()
  {
    let filter = FilterState::default()
      .with_search("alp")
      .with_sort(SortKey::ByName);
    let out =
      derive(&alpha_beta(), &filter);
    assert_eq!(names(&out), vec!["Alpha"]);

    let mut described = alpha_beta();
    described[1].description =
      "Проверить ИЗМЕНЕНИЯ кода"
        .to_string();
    let filter = FilterState::default()
      .with_search("изменения");
    assert_eq!(
      names(&derive(&described, &filter)),
      vec!["Beta"]
    );
  }

  #[test]
  fn status_filter_with_no_match_is_empty()
  {
    let filter = FilterState::default()
      .with_status(StatusFilter::Completed)
      .with_sort(SortKey::ByDeadline);
    assert!(
      derive(&alpha_beta(), &filter)
        .is_empty()
    );
  }

  #[test]
  fn deadline_sort_ascending_with_missing_last()
   {
    let mut tasks = alpha_beta();
    tasks.push(task(
      "3",
      "Gamma",
      TaskStatus::Pending,
      TaskPriority::Medium,
      "not a date"
    ));
    tasks.insert(
      0,
      task(
        "4",
        "Delta",
        TaskStatus::Completed,
        TaskPriority::Low,
        "2025-01-15"
      )
    );

    let out = derive(
      &tasks,
      &FilterState::default()
    );
    assert_eq!(
      names(&out),
      vec![
        "Delta", "Beta", "Alpha", "Gamma"
      ]
    );
  }

  #[test]
  fn priority_groups_and_stable_ties() {
    let priorities = [
      TaskPriority::Low,
      TaskPriority::High,
      TaskPriority::Medium,
      TaskPriority::Low,
      TaskPriority::High,
      TaskPriority::Medium
    ];
    let tasks: Vec<Task> = priorities
      .iter()
      .enumerate()
      .map(|(i, p)| {
        task(
          &i.to_string(),
          &format!("t{i}"),
          TaskStatus::Pending,
          *p,
          "2025-03-01"
        )
      })
      .collect();

    let out = derive(
      &tasks,
      &FilterState::default()
        .with_sort(SortKey::ByPriority)
    );
    let ids: Vec<&str> = out
      .iter()
      .map(|t| t.id.as_str())
      .collect();
    assert_eq!(
      ids,
      vec!["1", "4", "2", "5", "0", "3"]
    );

    let by_deadline = derive(
      &tasks,
      &FilterState::default()
    );
    let ids: Vec<&str> = by_deadline
      .iter()
      .map(|t| t.id.as_str())
      .collect();
    assert_eq!(
      ids,
      vec!["0", "1", "2", "3", "4", "5"]
    );
  }

  #[test]
  fn name_sort_ignores_case_and_keeps_duplicates_in_order()
   {
    let tasks = vec![
      task(
        "1",
        "beta",
        TaskStatus::Pending,
        TaskPriority::Low,
        ""
      ),
      task(
        "2",
        "Alpha",
        TaskStatus::Pending,
        TaskPriority::Low,
        ""
      ),
      task(
        "3",
        "alpha",
        TaskStatus::Pending,
        TaskPriority::Low,
        ""
      ),
      task(
        "4",
        "Alpha",
        TaskStatus::Pending,
        TaskPriority::Low,
        ""
      ),
    ];

    let out = derive(
      &tasks,
      &FilterState::default()
        .with_sort(SortKey::ByName)
    );
    let ids: Vec<&str> = out
      .iter()
      .map(|t| t.id.as_str())
      .collect();
    assert_eq!(
      ids,
      vec!["3", "2", "4", "1"]
    );
  }

  #[test]
  fn name_sort_follows_collation_order() {
    let tasks: Vec<Task> = [
      "Ёлка", "Жук", "Яблоко", "Zeta",
      "Élan", "елка"
    ]
    .iter()
    .enumerate()
    .map(|(idx, name)| {
      task(
        &idx.to_string(),
        name,
        TaskStatus::Pending,
        TaskPriority::Medium,
        ""
      )
    })
    .collect();

    let out = derive(
      &tasks,
      &FilterState::default()
        .with_sort(SortKey::ByName)
    );
    assert_eq!(
      names(&out),
      vec![
        "Élan", "Zeta", "елка", "Ёлка",
        "Жук", "Яблоко"
      ]
    );
  }

  #[test]
  fn derive_is_idempotent() {
    let mut tasks = alpha_beta();
    tasks.push(task(
      "3",
      "alphabet",
      TaskStatus::Pending,
      TaskPriority::High,
      "2025-02-01"
    ));

    for sort in [
      SortKey::ByDeadline,
      SortKey::ByPriority,
      SortKey::ByName
    ] {
      let filter = FilterState::default()
        .with_search("AL")
        .with_status(StatusFilter::Pending)
        .with_sort(sort);
      let once = derive(&tasks, &filter);
      let twice = derive(&once, &filter);
      assert_eq!(once, twice);
    }
  }

  #[test]
  fn find_task_descends_into_subtasks() {
    let mut parent = alpha_beta();
    parent[0].subtasks = vec![task(
      "1.1",
      "Child",
      TaskStatus::Pending,
      TaskPriority::Low,
      ""
    )];

    assert_eq!(
      find_task(&parent, "1.1")
        .map(|t| t.name.as_str()),
      Some("Child")
    );
    assert_eq!(
      find_task(&parent, "2")
        .map(|t| t.name.as_str()),
      Some("Beta")
    );
    assert!(
      find_task(&parent, "9").is_none()
    );
  }

  #[test]
  fn status_counts_cover_every_status() {
    let counts =
      status_counts(&alpha_beta());
    assert_eq!(
      counts,
      vec![
        (TaskStatus::Completed, 0),
        (TaskStatus::InProgress, 1),
        (TaskStatus::Pending, 1),
      ]
    );
  }

  #[test]
  fn parses_cli_and_server_labels() {
    assert_eq!(
      "In_Progress"
        .parse::<StatusFilter>()
        .unwrap(),
      StatusFilter::InProgress
    );
    assert_eq!(
      "Все статусы"
        .parse::<StatusFilter>()
        .unwrap(),
      StatusFilter::All
    );
    assert_eq!(
      "По приоритету"
        .parse::<SortKey>()
        .unwrap(),
      SortKey::ByPriority
    );
    assert!(
      "soonest"
        .parse::<SortKey>()
        .is_err()
    );
  }
}

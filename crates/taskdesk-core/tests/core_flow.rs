use std::sync::Arc;

use taskdesk_core::gateway::{FallbackPolicy, TaskGateway};
use taskdesk_core::query::{FilterState, SortKey, StatusFilter, derive, find_task};
use taskdesk_core::session::{SessionManager, SessionPhase};
use taskdesk_core::session_store::SessionStore;
use taskdesk_core::storage::FileKeyValueStore;
use taskdesk_core::task::{TaskPriority, TaskStatus};
use taskdesk_core::transport::{Method, ScriptedTransport};
use tempfile::tempdir;

const LOGIN_BODY: &str = r#"{
  "access": "a1",
  "refresh": "r1",
  "account": {"id": 7, "username": "ivanov", "email": "ivanov@example.com", "permission": {}, "groups": []},
  "employee": {"id": 3, "full_name": "Ivan Ivanov", "position": {"id": 1, "title": "Engineer"}}
}"#;

const TASKS_BODY: &str = r#"[
  {"id": 1, "task_name": "Обновление документации", "description": "API documentation",
   "task_status": "Завершена", "task_priority": "Низкий", "deadline": "2025-03-06"},
  {"id": 2, "task_name": "Finish project proposal", "description": "Client documentation pack",
   "task_status": "В процессе", "task_priority": "Высокий", "deadline": "2025-03-09",
   "subtodo": [{"id": 21, "task_name": "Collect estimates", "task_status": "Ожидает"}]},
  {"id": 3, "task_name": "Review code changes", "description": "Pending pull requests",
   "task_status": "Ожидает", "task_priority": "Средний", "deadline": "not a date"}
]"#;

fn open_store(dir: &std::path::Path) -> SessionStore {
    let backend = FileKeyValueStore::open(dir).expect("open session file");
    SessionStore::load(Arc::new(backend)).expect("load session")
}

#[tokio::test]
async fn login_fetch_and_derive_visible_tasks() {
    let temp = tempdir().expect("tempdir");
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(Method::Post, "/auth/login/", 200, LOGIN_BODY);
    transport.respond(Method::Get, "/todo/todos/", 200, TASKS_BODY);

    let session = Arc::new(SessionManager::new(
        Arc::clone(&transport),
        open_store(temp.path()),
    ));
    let info = session.login("ivanov", "secret").await.expect("login");
    assert_eq!(info.identity.display_name(), "Ivan Ivanov");
    assert_eq!(session.phase(), SessionPhase::LoggedIn);

    let gateway = TaskGateway::new(Arc::clone(&session), FallbackPolicy::Empty);
    let tasks = gateway.fetch_tasks().await.expect("tasks");
    assert_eq!(tasks.len(), 3);
    assert_eq!(tasks[2].deadline, None);

    let by_deadline = derive(&tasks, &FilterState::default());
    let ids: Vec<&str> = by_deadline.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, ["1", "2", "3"]);

    let docs = derive(
        &tasks,
        &FilterState::default()
            .with_search("DOCUMENTATION")
            .with_sort(SortKey::ByPriority),
    );
    let ids: Vec<&str> = docs.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, ["2", "1"]);
    assert_eq!(docs[0].priority, TaskPriority::High);

    let pending = derive(&tasks, &FilterState::default().with_status(StatusFilter::Pending));
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, TaskStatus::Pending);

    let child = find_task(&tasks, "21").expect("nested task");
    assert_eq!(child.parent_task_id.as_deref(), Some("2"));
}

#[tokio::test]
async fn session_survives_reload_until_logout() {
    let temp = tempdir().expect("tempdir");
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(Method::Post, "/auth/login/", 200, LOGIN_BODY);
    transport.respond(Method::Post, "/auth/logout/", 200, "{}");

    {
        let session = SessionManager::new(Arc::clone(&transport), open_store(temp.path()));
        session.login("ivanov", "secret").await.expect("login");
    }

    let session = SessionManager::new(Arc::clone(&transport), open_store(temp.path()));
    assert!(session.is_authenticated());
    assert_eq!(
        session.current_identity().map(|i| i.username().to_string()),
        Some("ivanov".to_string())
    );

    session.logout().await;
    let logout = transport
        .requests()
        .into_iter()
        .find(|r| r.path == "/auth/logout/")
        .expect("logout sent");
    assert_eq!(logout.body, Some(serde_json::json!({"refresh": "r1"})));

    let reloaded = SessionManager::new(Arc::clone(&transport), open_store(temp.path()));
    assert_eq!(reloaded.phase(), SessionPhase::LoggedOut);
    assert!(reloaded.current_identity().is_none());
    assert!(reloaded.require_session().is_err());
}

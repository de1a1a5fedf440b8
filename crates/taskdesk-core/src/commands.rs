use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::cli::{Command, QueryArgs};
use crate::config::Config;
use crate::gateway::TaskGateway;
use crate::query::{derive, status_counts};
use crate::render::Renderer;
use crate::session::SessionManager;
use crate::session_store::SessionStore;
use crate::storage::FileKeyValueStore;
use crate::transport::{HttpTransport, Transport};

const PASSWORD_ENV_VAR: &str = "TASKDESK_PASSWORD";

/// Everything a command needs: the session, the task gateway on top of it,
/// and how to print.
pub struct App<T> {
    pub session: Arc<SessionManager<T>>,
    pub gateway: TaskGateway<T>,
    pub renderer: Renderer,
    pub refresh_interval: Duration,
}

impl<T: Transport> App<T> {
    pub fn new(
        transport: Arc<T>,
        store: SessionStore,
        cfg: &Config,
        renderer: Renderer,
    ) -> anyhow::Result<Self> {
        let session = Arc::new(SessionManager::new(transport, store));
        let gateway = TaskGateway::new(Arc::clone(&session), cfg.fallback_policy()?);
        Ok(Self {
            session,
            gateway,
            renderer,
            refresh_interval: cfg.refresh_interval()?,
        })
    }
}

/// Builds the HTTP-backed app from configuration and the data directory.
#[tracing::instrument(skip(cfg, data_dir))]
pub fn connect(cfg: &Config, data_dir: &Path) -> anyhow::Result<App<HttpTransport>> {
    let transport = HttpTransport::new(&cfg.api_base_url(), cfg.request_timeout()?)?;
    let backend = FileKeyValueStore::open(data_dir)
        .with_context(|| format!("failed to open session state in {}", data_dir.display()))?;
    let store = SessionStore::load(Arc::new(backend)).context("failed to load stored session")?;
    info!(base_url = %cfg.api_base_url(), "connected task API client");

    App::new(Arc::new(transport), store, cfg, Renderer::new(cfg)?)
}

pub async fn dispatch(cfg: &Config, data_dir: &Path, command: Command) -> anyhow::Result<()> {
    if let Command::Config = command {
        return cmd_config(cfg, &mut io::stdout());
    }

    let app = connect(cfg, data_dir)?;
    execute(&app, command, &mut io::stdout()).await
}

pub async fn execute<T, W>(app: &App<T>, command: Command, out: &mut W) -> anyhow::Result<()>
where
    T: Transport + 'static,
    W: Write,
{
    debug!(command = command.name(), "dispatching command");

    match command {
        Command::Login { username, password } => cmd_login(app, &username, password, out).await,
        Command::Logout => cmd_logout(app, out).await,
        Command::Whoami => cmd_whoami(app, out),
        Command::List(query) => cmd_list(app, &query, out).await,
        Command::Show { id, json } => cmd_show(app, &id, json, out).await,
        Command::Watch { query, interval } => cmd_watch(app, &query, interval, out).await,
        Command::Config => Err(anyhow!("config needs no session; use dispatch")),
    }
}

async fn cmd_login<T: Transport, W: Write>(
    app: &App<T>,
    username: &str,
    password: Option<String>,
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command login");

    let password = match password {
        Some(password) => password,
        None => read_password()?,
    };
    if password.is_empty() {
        return Err(anyhow!("password cannot be empty"));
    }

    let info = app.session.login(username, &password).await?;
    writeln!(out, "Logged in as {}.", info.identity.display_name())?;
    Ok(())
}

async fn cmd_logout<T: Transport, W: Write>(app: &App<T>, out: &mut W) -> anyhow::Result<()> {
    info!("command logout");

    if !app.session.is_authenticated() {
        writeln!(out, "Not logged in.")?;
        return Ok(());
    }
    app.session.logout().await;
    writeln!(out, "Logged out.")?;
    Ok(())
}

fn cmd_whoami<T: Transport, W: Write>(app: &App<T>, out: &mut W) -> anyhow::Result<()> {
    info!("command whoami");

    app.session.require_session()?;
    match app.session.current_identity() {
        Some(identity) => app.renderer.write_identity(out, &identity),
        None => {
            writeln!(out, "Logged in; no identity stored.")?;
            Ok(())
        }
    }
}

async fn cmd_list<T: Transport, W: Write>(
    app: &App<T>,
    query: &QueryArgs,
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command list");

    app.session.require_session()?;
    let tasks = app.gateway.fetch_tasks().await?;
    let visible = derive(&tasks, &query.filter_state());

    if query.json {
        serde_json::to_writer_pretty(&mut *out, &visible)?;
        writeln!(out)?;
        return Ok(());
    }

    app.renderer.write_task_table(out, &visible, Utc::now())?;
    if !tasks.is_empty() {
        let summary = status_counts(&tasks)
            .into_iter()
            .map(|(status, count)| format!("{count} {status}"))
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(out)?;
        writeln!(out, "{} of {} tasks ({summary})", visible.len(), tasks.len())?;
    }
    Ok(())
}

async fn cmd_show<T: Transport, W: Write>(
    app: &App<T>,
    id: &str,
    json: bool,
    out: &mut W,
) -> anyhow::Result<()> {
    info!(id, "command show");

    app.session.require_session()?;
    let Some(task) = app.gateway.fetch_task_by_id(id).await? else {
        return Err(anyhow!("task {id} not found"));
    };

    if json {
        serde_json::to_writer_pretty(&mut *out, &task)?;
        writeln!(out)?;
        return Ok(());
    }
    app.renderer.write_task_detail(out, &task)
}

async fn cmd_watch<T, W>(
    app: &App<T>,
    query: &QueryArgs,
    interval_secs: u64,
    out: &mut W,
) -> anyhow::Result<()>
where
    T: Transport + 'static,
    W: Write,
{
    info!(interval_secs, "command watch");

    if interval_secs == 0 {
        return Err(anyhow!("watch interval must be greater than zero"));
    }
    app.session.require_session()?;

    let _timer = app.session.spawn_refresh_timer(app.refresh_interval);
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !app.session.is_authenticated() {
                    return Err(anyhow!("session ended; log in again"));
                }
                writeln!(out, "--- {}", Utc::now().format("%Y-%m-%d %H:%M:%S"))?;
                cmd_list(app, query, out).await?;
                out.flush()?;
            }
            result = &mut ctrl_c => {
                if let Err(err) = result {
                    warn!(error = %err, "failed listening for interrupt");
                }
                info!("watch interrupted");
                return Ok(());
            }
        }
    }
}

fn cmd_config<W: Write>(cfg: &Config, out: &mut W) -> anyhow::Result<()> {
    info!("command config");

    let mut entries: Vec<_> = cfg.iter().collect();
    entries.sort();
    for (key, value) in entries {
        writeln!(out, "{key}={value}")?;
    }
    for file in &cfg.loaded_files {
        writeln!(out, "# loaded {}", file.display())?;
    }
    Ok(())
}

fn read_password() -> anyhow::Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV_VAR) {
        debug!("using password from environment");
        return Ok(password);
    }

    eprint!("Password: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Method, ScriptedTransport};

    const LOGIN_BODY: &str = r#"{"access":"a1","refresh":"r1","account":{"id":1,"username":"ivan"},"employee":{"full_name":"Ivan Ivanov"}}"#;

    fn app(transport: &Arc<ScriptedTransport>) -> App<ScriptedTransport> {
        App::new(
            Arc::clone(transport),
            SessionStore::in_memory(),
            &Config::default(),
            Renderer::plain(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn list_requires_login() {
        let transport = Arc::new(ScriptedTransport::new());
        let app = app(&transport);

        let err = execute(&app, Command::default(), &mut Vec::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not logged in"));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn login_then_list_prints_table_and_summary() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(Method::Post, "/auth/login/", 200, LOGIN_BODY);
        transport.respond(
            Method::Get,
            "/todo/todos/",
            200,
            r#"[{"id":1,"task_name":"Write report","task_status":"Ожидает","task_priority":"Высокий"}]"#,
        );
        let app = app(&transport);

        let mut out = Vec::new();
        execute(
            &app,
            Command::Login {
                username: "ivan".to_string(),
                password: Some("secret".to_string()),
            },
            &mut out,
        )
        .await
        .unwrap();
        execute(&app, Command::default(), &mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Logged in as Ivan Ivanov."));
        assert!(text.contains("Write report"));
        assert!(text.contains("1 of 1 tasks (0 completed, 0 in progress, 1 pending)"));
    }

    #[tokio::test]
    async fn show_missing_task_is_an_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(Method::Post, "/auth/login/", 200, LOGIN_BODY);
        transport.respond(Method::Get, "/todo/todos/42/", 404, "");
        let app = app(&transport);
        app.session.login("ivan", "secret").await.unwrap();

        let err = execute(
            &app,
            Command::Show {
                id: "42".to_string(),
                json: false,
            },
            &mut Vec::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "task 42 not found");
    }

    #[test]
    fn config_lists_sorted_keys() {
        let mut out = Vec::new();
        cmd_config(&Config::default(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let keys: Vec<&str> = text.lines().filter_map(|l| l.split_once('=')).map(|(k, _)| k).collect();

        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert!(keys.contains(&"api.base_url"));
    }
}

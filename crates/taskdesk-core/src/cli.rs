use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::query::{FilterState, SortKey, StatusFilter};

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "taskdesk",
    version,
    about = "Taskdesk: terminal client for the task tracker API",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "taskdeskrc", global = true)]
    pub taskdeskrc: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Clone)]
pub enum Command {
    /// Log in and store the session.
    Login {
        username: String,
        /// Falls back to $TASKDESK_PASSWORD, then a prompt on stdin.
        #[arg(long)]
        password: Option<String>,
    },
    /// Revoke and forget the stored session.
    Logout,
    /// Show the logged-in identity.
    Whoami,
    /// List tasks (the default command).
    List(QueryArgs),
    /// Show one task with its subtasks.
    Show {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Re-fetch and re-list tasks periodically until interrupted.
    Watch {
        #[command(flatten)]
        query: QueryArgs,
        /// Seconds between refetches.
        #[arg(long, default_value_t = 30)]
        interval: u64,
    },
    /// Print the effective configuration.
    Config,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::Logout => "logout",
            Self::Whoami => "whoami",
            Self::List(_) => "list",
            Self::Show { .. } => "show",
            Self::Watch { .. } => "watch",
            Self::Config => "config",
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Login { username, password } => f
                .debug_struct("Login")
                .field("username", username)
                .field("password", &password.as_ref().map(|_| "<redacted>"))
                .finish(),
            Self::List(query) => f.debug_tuple("List").field(query).finish(),
            Self::Show { id, json } => f
                .debug_struct("Show")
                .field("id", id)
                .field("json", json)
                .finish(),
            Self::Watch { query, interval } => f
                .debug_struct("Watch")
                .field("query", query)
                .field("interval", interval)
                .finish(),
            other => f.write_str(other.name()),
        }
    }
}

impl Default for Command {
    fn default() -> Self {
        Self::List(QueryArgs::default())
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct QueryArgs {
    /// Case-insensitive substring of the name or description.
    #[arg(short = 's', long = "search", default_value = "")]
    pub search: String,

    /// all, completed, in-progress or pending.
    #[arg(
        long = "status",
        default_value = "all",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<StatusFilter>())
    )]
    pub status: StatusFilter,

    /// deadline, priority or name.
    #[arg(
        long = "sort",
        default_value = "deadline",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<SortKey>())
    )]
    pub sort: SortKey,

    #[arg(long)]
    pub json: bool,
}

impl QueryArgs {
    pub fn filter_state(&self) -> FilterState {
        FilterState::default()
            .with_search(self.search.clone())
            .with_status(self.status)
            .with_sort(self.sort)
    }
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` / `rc.key:value` overrides out of the
/// argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = if let Some((k, v)) = rest.split_once('=') {
                Some((format!("rc.{k}"), v.to_string()))
            } else if let Some((k, v)) = rest.split_once(':') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                None
            };

            if let Some((k, v)) = parsed {
                debug!(key = %k, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&args(&[
            "taskdesk",
            "rc.api.timeout_ms=3000",
            "list",
            "rc.fallback.policy:placeholder",
        ]))
        .unwrap();

        assert_eq!(pre.cleaned_args, args(&["taskdesk", "list"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.api.timeout_ms".to_string(), "3000".to_string()),
                ("rc.fallback.policy".to_string(), "placeholder".to_string()),
            ]
        );
    }

    #[test]
    fn list_arguments_build_filter_state() {
        let cli = GlobalCli::parse_from([
            "taskdesk", "list", "--search", "Doc", "--status", "in-progress", "--sort", "priority",
        ]);
        let Some(Command::List(query)) = cli.command else {
            panic!("expected list command");
        };

        let filter = query.filter_state();
        assert_eq!(filter.search_text, "Doc");
        assert_eq!(filter.status_filter, StatusFilter::InProgress);
        assert_eq!(filter.sort_key, SortKey::ByPriority);
    }

    #[test]
    fn no_subcommand_defaults_to_list() {
        let cli = GlobalCli::parse_from(["taskdesk", "-v"]);
        assert!(cli.command.is_none());
        assert!(matches!(Command::default(), Command::List(_)));
        assert_eq!(cli.verbose, 1);
    }

    #[test]
    fn unknown_sort_is_rejected() {
        assert!(GlobalCli::try_parse_from(["taskdesk", "list", "--sort", "soonest"]).is_err());
    }
}

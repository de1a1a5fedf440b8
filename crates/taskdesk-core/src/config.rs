use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::gateway::FallbackPolicy;

pub const DEFAULT_API_BASE_URL: &str =
  "http://192.168.38.236:8000/api/v1";
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_REFRESH_INTERVAL_SECS:
  u64 = 240;

const RC_FILE_NAME: &str =
  ".taskdeskrc";
const RC_ENV_VAR: &str = "TASKDESKRC";

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    map.insert(
      "api.base_url".to_string(),
      DEFAULT_API_BASE_URL.to_string()
    );
    map.insert(
      "api.timeout_ms".to_string(),
      DEFAULT_TIMEOUT_MS.to_string()
    );
    map.insert(
      "session.refresh_interval_secs"
        .to_string(),
      DEFAULT_REFRESH_INTERVAL_SECS
        .to_string()
    );
    map.insert(
      "data.location".to_string(),
      "~/.taskdesk".to_string()
    );
    map.insert(
      "fallback.policy".to_string(),
      "empty".to_string()
    );
    map.insert(
      "color".to_string(),
      "on".to_string()
    );

    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc = resolve_rc_path(rc_override)?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading taskdeskrc");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no taskdeskrc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  pub fn api_base_url(&self) -> String {
    self
      .get("api.base_url")
      .unwrap_or_else(|| {
        DEFAULT_API_BASE_URL.to_string()
      })
  }

  pub fn request_timeout(
    &self
  ) -> anyhow::Result<Duration> {
    let ms = self.parse_or(
      "api.timeout_ms",
      DEFAULT_TIMEOUT_MS
    )?;
    if ms == 0 {
      return Err(anyhow!(
        "api.timeout_ms must be \
         greater than zero"
      ));
    }
    Ok(Duration::from_millis(ms))
  }

  pub fn refresh_interval(
    &self
  ) -> anyhow::Result<Duration> {
    let secs = self.parse_or(
      "session.refresh_interval_secs",
      DEFAULT_REFRESH_INTERVAL_SECS
    )?;
    if secs == 0 {
      return Err(anyhow!(
        "session.refresh_interval_secs \
         must be greater than zero"
      ));
    }
    Ok(Duration::from_secs(secs))
  }

  pub fn fallback_policy(
    &self
  ) -> anyhow::Result<FallbackPolicy> {
    self.parse_or(
      "fallback.policy",
      FallbackPolicy::default()
    )
  }

  fn parse_or<T>(
    &self,
    key: &str,
    default: T
  ) -> anyhow::Result<T>
  where
    T: FromStr,
    T::Err: std::fmt::Display
  {
    match self.map.get(key) {
      | Some(raw) => {
        raw.trim().parse::<T>().map_err(
          |err| {
            anyhow!(
              "invalid value for {key}: \
               '{raw}' ({err})"
            )
          }
        )
      }
      | None => Ok(default)
    }
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if let Some((before, _)) =
        line.split_once('#')
      {
        line = before.trim();
      }

      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        if self
          .loaded_files
          .contains(&include_path)
        {
          warn!(include = %include_path.display(), "include cycle; skipping");
          continue;
        }
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping \
       taskdeskrc"
    );
    return Ok(None);
  };
  let candidate =
    home.join(RC_FILE_NAME);
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(".taskdesk"))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

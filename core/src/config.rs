use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{AtelierError, AtelierResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    /// Close a connection after this many seconds without a message
    pub idle_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6543,
            max_connections: 100,
            idle_timeout_secs: 300,
        }
    }
}

/// Table store configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON seed file loaded into the in-memory store at startup
    pub seed_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
}

impl Config {
    /// Load config from TOML file, with environment variable overrides.
    /// Falls back to defaults if the file is not found. `ATELIER_CONFIG`
    /// overrides the path.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> AtelierResult<Self> {
        ConfigLoader::new().load(path)
    }

    pub fn parse(source: &str) -> AtelierResult<Self> {
        toml::from_str(source).map_err(|e| AtelierError::Config(e.to_string()))
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Resolves configuration from file, CLI args, and environment variables.
struct ConfigLoader {
    args: Vec<String>,
}

impl ConfigLoader {
    fn new() -> Self {
        Self {
            args: env::args().collect(),
        }
    }

    fn load<P: AsRef<Path>>(&self, default_path: P) -> AtelierResult<Config> {
        let mut cfg_path = self.resolve_config_path(default_path);

        if let Ok(env_path) = env::var("ATELIER_CONFIG") {
            cfg_path = PathBuf::from(env_path);
        }

        let mut cfg = read_config(&cfg_path)?;
        apply_overrides(&mut cfg, |name| env::var(name).ok());
        Ok(cfg)
    }

    fn resolve_config_path<P: AsRef<Path>>(&self, default_path: P) -> PathBuf {
        find_config_arg(&self.args).unwrap_or_else(|| default_path.as_ref().to_path_buf())
    }
}

fn read_config(path: &Path) -> AtelierResult<Config> {
    match fs::read_to_string(path) {
        Ok(s) => Config::parse(&s),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
        Err(e) => Err(AtelierError::Config(format!(
            "failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Find --config or -c flag in arguments.
fn find_config_arg(args: &[String]) -> Option<PathBuf> {
    let mut iter = args.iter().peekable();
    while let Some(a) = iter.next() {
        if a.starts_with("--config=") || a.starts_with("-c=") {
            if let Some((_, val)) = a.split_once('=') {
                return Some(PathBuf::from(val));
            }
        } else if (a == "--config" || a == "-c")
            && let Some(next) = iter.peek()
        {
            return Some(PathBuf::from((*next).clone()));
        }
    }
    None
}

/// Apply ATELIER_* overrides read through `lookup`.
fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("ATELIER_HOST") {
        cfg.server.host = v;
    }

    if let Some(v) = lookup("ATELIER_PORT")
        && let Ok(p) = v.parse::<u16>()
    {
        cfg.server.port = p;
    }

    if let Some(v) = lookup("ATELIER_SEED") {
        cfg.store.seed_path = Some(PathBuf::from(v));
    }
}

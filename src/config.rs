//!
//! tileserver configuration
//! ------------------------
//! Resolves the listen port and asset root directory once at startup from
//! environment variables and CLI flags. The environment overrides the
//! flags; the result is immutable for the lifetime of the process.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::Context;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_ROOT: &str = "data";

/// Immutable process configuration, constructed once at entry and passed by
/// reference into the request handler.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Absolute, canonicalized asset root. Every served path must resolve
    /// underneath it.
    pub root: PathBuf,
}

impl Config {
    /// Build a configuration with an explicit port and root. The root must
    /// exist and be a directory; it is canonicalized so that later prefix
    /// checks compare against a stable absolute path.
    pub fn new(port: u16, root: impl AsRef<Path>) -> anyhow::Result<Self> {
        let root = root.as_ref();
        let root = std::fs::canonicalize(root)
            .with_context(|| format!("asset root does not exist: {}", root.display()))?;
        if !root.is_dir() {
            anyhow::bail!("asset root is not a directory: {}", root.display());
        }
        Ok(Config { port, root })
    }

    /// Resolve configuration from environment and process arguments.
    /// `PORT`/`DATA_DIR` variables win over `--port`/`--dir` flags, which
    /// win over the defaults (8080, "data").
    pub fn from_env_and_args() -> anyhow::Result<Self> {
        let args: Vec<String> = env::args().collect();
        let port = resolve_port(&args, parse_port_env("PORT"));
        let root = resolve_root(&args, env::var("DATA_DIR").ok());
        Config::new(port, root)
    }
}

fn resolve_port(args: &[String], env_port: Option<u16>) -> u16 {
    env_port
        .or_else(|| flag_value(args, "--port").and_then(|v| v.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_PORT)
}

fn resolve_root(args: &[String], env_root: Option<String>) -> String {
    env_root
        .or_else(|| flag_value(args, "--dir"))
        .unwrap_or_else(|| DEFAULT_ROOT.to_string())
}

fn parse_port_env(name: &str) -> Option<u16> {
    match env::var(name) {
        Ok(val) => val.parse::<u16>().ok(),
        Err(_) => None,
    }
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
        i += 1;
    }
    None
}

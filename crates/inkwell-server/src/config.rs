use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Runtime configuration, read from `INKWELL_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub uploads_dir: PathBuf,
    /// `None` means a random secret is generated at boot, so sessions do not
    /// survive a restart.
    pub session_secret: Option<String>,
    pub session_ttl_hours: u64,
    pub cookie_secure: bool,
    pub max_upload_bytes: usize,
    /// `(username, password)` to create at startup if missing.
    pub seed_user: Option<(String, String)>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let port: u16 = var("INKWELL_PORT", "5000")
            .parse()
            .context("INKWELL_PORT must be a port number")?;
        let session_ttl_hours: u64 = var("INKWELL_SESSION_TTL_HOURS", "720")
            .parse()
            .context("INKWELL_SESSION_TTL_HOURS must be a whole number of hours")?;
        if session_ttl_hours == 0 {
            bail!("INKWELL_SESSION_TTL_HOURS must be greater than zero");
        }
        let max_upload_bytes: usize = var("INKWELL_MAX_UPLOAD_BYTES", "2097152")
            .parse()
            .context("INKWELL_MAX_UPLOAD_BYTES must be a byte count")?;
        let cookie_secure = parse_bool(&var("INKWELL_COOKIE_SECURE", "false"))
            .context("INKWELL_COOKIE_SECURE must be true or false")?;

        let session_secret = lookup("INKWELL_SESSION_SECRET").filter(|s| !s.is_empty());

        let seed_user = match lookup("INKWELL_SEED_USER").filter(|s| !s.is_empty()) {
            Some(raw) => {
                let (user, pass) = raw
                    .split_once(':')
                    .context("INKWELL_SEED_USER must look like username:password")?;
                Some((user.to_string(), pass.to_string()))
            }
            None => None,
        };

        Ok(Self {
            host: var("INKWELL_HOST", "127.0.0.1"),
            port,
            db_path: var("INKWELL_DB_PATH", "inkwell.db").into(),
            uploads_dir: var("INKWELL_UPLOADS_DIR", "./uploads").into(),
            session_secret,
            session_ttl_hours,
            cookie_secure,
            max_upload_bytes,
            seed_user,
        })
    }

    pub fn session_ttl_secs(&self) -> i64 {
        (self.session_ttl_hours * 3600) as i64
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("not a boolean: {}", other),
    }
}

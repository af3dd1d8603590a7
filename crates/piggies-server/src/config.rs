use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub media_dir: PathBuf,
    pub media_base_url: String,
    pub geocoder_url: Option<String>,
    pub blocked_words: Vec<String>,
    pub sweep_interval: Duration,
    pub bootstrap_admins: HashSet<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup, so tests need not touch the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = var("PIGGIES_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!(
                "PIGGIES_JWT_SECRET is unset or still a placeholder; \
                 it must match the identity provider's signing secret"
            );
        }

        let host = var("PIGGIES_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = var("PIGGIES_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("PIGGIES_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let sweep_secs: u64 = var("PIGGIES_SWEEP_INTERVAL_SECS")
            .map(|v| v.parse())
            .transpose()
            .context("PIGGIES_SWEEP_INTERVAL_SECS must be a number of seconds")?
            .unwrap_or(3600);
        if sweep_secs == 0 {
            bail!("PIGGIES_SWEEP_INTERVAL_SECS must be greater than zero");
        }

        Ok(Self {
            addr,
            db_path: var("PIGGIES_DB_PATH").unwrap_or_else(|| "piggies.db".into()).into(),
            jwt_secret,
            media_dir: var("PIGGIES_MEDIA_DIR").unwrap_or_else(|| "./media".into()).into(),
            media_base_url: var("PIGGIES_MEDIA_BASE_URL").unwrap_or_else(|| "/media".into()),
            geocoder_url: var("PIGGIES_GEOCODER_URL"),
            blocked_words: split_list(var("PIGGIES_BLOCKED_WORDS")),
            sweep_interval: Duration::from_secs(sweep_secs),
            bootstrap_admins: split_list(var("PIGGIES_BOOTSTRAP_ADMINS")),
        })
    }
}

fn split_list<C: FromIterator<String>>(raw: Option<String>) -> C {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[("PIGGIES_JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(cfg.addr, "0.0.0.0:3000".parse().unwrap());
        assert_eq!(cfg.db_path, PathBuf::from("piggies.db"));
        assert_eq!(cfg.media_base_url, "/media");
        assert!(cfg.geocoder_url.is_none());
        assert!(cfg.blocked_words.is_empty());
        assert_eq!(cfg.sweep_interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_refuses_placeholder_secret() {
        assert!(config(&[]).is_err());
        assert!(config(&[("PIGGIES_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn test_lists_and_overrides() {
        let cfg = config(&[
            ("PIGGIES_JWT_SECRET", "s3cret"),
            ("PIGGIES_PORT", "8080"),
            ("PIGGIES_BLOCKED_WORDS", "scam, venmo ,,"),
            ("PIGGIES_BOOTSTRAP_ADMINS", "idp|root"),
            ("PIGGIES_GEOCODER_URL", "https://nominatim.example.org"),
            ("PIGGIES_SWEEP_INTERVAL_SECS", "60"),
        ])
        .unwrap();
        assert_eq!(cfg.addr.port(), 8080);
        assert_eq!(cfg.blocked_words, vec!["scam", "venmo"]);
        assert!(cfg.bootstrap_admins.contains("idp|root"));
        assert_eq!(cfg.geocoder_url.as_deref(), Some("https://nominatim.example.org"));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(60));

        let secret = ("PIGGIES_JWT_SECRET", "s3cret");
        assert!(config(&[secret, ("PIGGIES_PORT", "http")]).is_err());
        assert!(config(&[secret, ("PIGGIES_SWEEP_INTERVAL_SECS", "0")]).is_err());
    }
}

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "chirp", about = "Social feed server")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub media: MediaConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origin; `*` mirrors the request origin.
    pub cors_origin: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub access_token_secret: Option<String>,
    pub refresh_token_secret: Option<String>,
    pub access_token_minutes: i64,
    pub refresh_token_days: i64,
    pub bcrypt_cost: u32,
    pub secure_cookies: bool,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaBackend {
    #[default]
    Local,
    Http,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct MediaConfig {
    pub backend: MediaBackend,
    /// Logical folder every upload is stored under.
    pub folder: String,
    /// Where multipart uploads are staged before being handed to the store.
    pub temp_dir: Option<PathBuf>,
    /// Root directory of the local backend.
    pub local_dir: Option<PathBuf>,
    /// Base of the URLs handed back to clients.
    pub public_base_url: String,
    /// Object-storage endpoint for the http backend.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            cors_origin: "*".to_string(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_token_secret: None,
            refresh_token_secret: None,
            access_token_minutes: 15,
            refresh_token_days: 7,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            secure_cookies: true,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            backend: MediaBackend::Local,
            folder: "chirp-media".to_string(),
            temp_dir: None,
            local_dir: None,
            public_base_url: "http://localhost:5000/media".to_string(),
            endpoint: None,
            api_key: None,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }

        config.resolve_paths(&data_dir);
        config.fill_missing_secrets();

        Ok(config)
    }

    /// Apply `CHIRP_*` environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(path) = lookup("CHIRP_DATABASE_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }
        if let Some(secret) = lookup("CHIRP_ACCESS_TOKEN_SECRET") {
            self.auth.access_token_secret = Some(secret);
        }
        if let Some(secret) = lookup("CHIRP_REFRESH_TOKEN_SECRET") {
            self.auth.refresh_token_secret = Some(secret);
        }
        if let Some(origin) = lookup("CHIRP_CORS_ORIGIN") {
            self.server.cors_origin = origin;
        }
        if let Some(port) = lookup("CHIRP_PORT") {
            self.server.port = port.parse()?;
        }
        if let Some(endpoint) = lookup("CHIRP_MEDIA_ENDPOINT") {
            self.media.endpoint = Some(endpoint);
        }
        if let Some(key) = lookup("CHIRP_MEDIA_API_KEY") {
            self.media.api_key = Some(key);
        }
        Ok(())
    }

    /// Resolve paths relative to the data dir
    pub fn resolve_paths(&mut self, data_dir: &std::path::Path) {
        if self.database.path.is_none() {
            self.database.path = Some(data_dir.join("chirp.db"));
        }
        if self.media.temp_dir.is_none() {
            self.media.temp_dir = Some(data_dir.join("temp"));
        }
        if self.media.local_dir.is_none() {
            self.media.local_dir = Some(data_dir.join("media"));
        }
    }

    fn fill_missing_secrets(&mut self) {
        if self.auth.access_token_secret.is_none() {
            tracing::warn!("No access token secret configured; generated one for this process");
            self.auth.access_token_secret = Some(crate::auth::tokens::generate_secret());
        }
        if self.auth.refresh_token_secret.is_none() {
            tracing::warn!("No refresh token secret configured; generated one for this process");
            self.auth.refresh_token_secret = Some(crate::auth::tokens::generate_secret());
        }
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".chirp")
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("chirp.db"))
    }

    pub fn media_temp_dir(&self) -> PathBuf {
        self.media
            .temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("chirp"))
    }

    pub fn media_local_dir(&self) -> PathBuf {
        self.media
            .local_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("media"))
    }

    pub fn access_secret(&self) -> &[u8] {
        self.auth
            .access_token_secret
            .as_deref()
            .unwrap_or_default()
            .as_bytes()
    }

    pub fn refresh_secret(&self) -> &[u8] {
        self.auth
            .refresh_token_secret
            .as_deref()
            .unwrap_or_default()
            .as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cli(data_dir: &std::path::Path) -> Cli {
        Cli {
            config: None,
            host: None,
            port: None,
            data_dir: Some(data_dir.to_path_buf()),
        }
    }

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.auth.access_token_minutes, 15);
        assert_eq!(config.auth.refresh_token_days, 7);
        assert!(config.auth.secure_cookies);
        assert_eq!(config.media.folder, "chirp-media");
        assert_eq!(config.media.backend, MediaBackend::Local);
        assert!(config.database.path.is_none());
    }

    #[test]
    fn data_dir_uses_cli_override() {
        let cli = cli(std::path::Path::new("/tmp/test-chirp"));
        assert_eq!(Config::data_dir(&cli), PathBuf::from("/tmp/test-chirp"));
    }

    #[test]
    fn load_with_no_config_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load(&cli(tmp.path())).unwrap();
        assert_eq!(config.db_path(), tmp.path().join("chirp.db"));
        assert_eq!(config.media_temp_dir(), tmp.path().join("temp"));
        assert_eq!(config.media_local_dir(), tmp.path().join("media"));
        assert!(config.auth.access_token_secret.is_some());
        assert_ne!(
            config.auth.access_token_secret,
            config.auth.refresh_token_secret
        );
    }

    #[test]
    fn load_reads_toml_file() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(
            &config_path,
            r#"
[server]
port = 9000
cors_origin = "https://chirp.example"

[auth]
access_token_secret = "a"
refresh_token_secret = "r"
bcrypt_cost = 4

[media]
backend = "http"
endpoint = "https://objects.example/v1"
"#,
        )
        .unwrap();

        let mut cli = cli(tmp.path());
        cli.config = Some(config_path);
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.cors_origin, "https://chirp.example");
        assert_eq!(config.access_secret(), b"a");
        assert_eq!(config.auth.bcrypt_cost, 4);
        assert_eq!(config.media.backend, MediaBackend::Http);
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("CHIRP_ACCESS_TOKEN_SECRET", "env-access"),
            ("CHIRP_PORT", "7070"),
            ("CHIRP_CORS_ORIGIN", "https://app.example"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config
            .apply_env(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.access_secret(), b"env-access");
        assert_eq!(config.server.port, 7070);
        assert_eq!(config.server.cors_origin, "https://app.example");
    }

    #[test]
    fn bad_port_env_is_an_error() {
        let mut config = Config::default();
        assert!(config
            .apply_env(|k| (k == "CHIRP_PORT").then(|| "nope".to_string()))
            .is_err());
    }

    #[test]
    fn cli_overrides_beat_env_and_toml() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cli = cli(tmp.path());
        cli.port = Some(4000);
        cli.host = Some("127.0.0.1".into());
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 4000);
    }
}

//! Application Configuration
//!
//! Configuration for the Auth application layer.

use std::str::FromStr;
use std::time::Duration;

use platform::config::{ConfigError, EnvReader};
use url::Url;

/// Re-export SameSite from platform
pub use platform::cookie::SameSite;

/// Which gateway implementation backs the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Hosted Supabase/GoTrue service
    #[default]
    Supabase,
    /// In-process user table, for development without a hosted service
    Memory,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "supabase" => Ok(BackendKind::Supabase),
            "memory" => Ok(BackendKind::Memory),
            other => Err(format!("expected supabase or memory, got {other:?}")),
        }
    }
}

/// Auth application configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub backend: BackendKind,
    /// Project URL of the hosted service (empty for the memory backend)
    pub supabase_url: String,
    /// Public anon key sent as `apikey`
    pub supabase_anon_key: String,
    /// Upper bound for every gateway call (10 seconds)
    pub request_timeout: Duration,
    /// Refresh the access token this long before it expires
    pub refresh_margin: Duration,
    /// Drop a browser's client after this long without a request
    pub client_idle_ttl: Duration,
    /// Most browser clients held at once; the least recently used go first
    pub max_clients: u64,
    /// How long a request waits for the initial session check before the
    /// loading page is shown
    pub hydration_wait: Duration,
    /// Cookie holding the opaque client id
    pub client_cookie_name: String,
    /// Cookie holding the refresh token
    pub refresh_cookie_name: String,
    /// Lifetime of the refresh-token cookie (30 days)
    pub refresh_cookie_ttl: Duration,
    /// Whether to require Secure cookie
    pub cookie_secure: bool,
    /// SameSite policy
    pub cookie_same_site: SameSite,
    /// Where unauthenticated users are sent
    pub login_path: String,
    /// Path prefixes that require a session
    pub protected_prefixes: Vec<String>,
    /// Public origin, used to build links that come back to this site
    pub public_site_url: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Supabase,
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            request_timeout: Duration::from_secs(10),
            refresh_margin: Duration::from_secs(60),
            client_idle_ttl: Duration::from_secs(3600),
            max_clients: 10_000,
            hydration_wait: Duration::from_millis(500),
            client_cookie_name: "dhg_client".to_string(),
            refresh_cookie_name: "dhg_refresh".to_string(),
            refresh_cookie_ttl: Duration::from_secs(30 * 24 * 3600),
            cookie_secure: true,
            cookie_same_site: SameSite::Lax,
            login_path: "/login".to_string(),
            protected_prefixes: vec!["/dashboard".to_string()],
            public_site_url: "http://localhost:5173".to_string(),
        }
    }
}

impl AuthConfig {
    /// Create config for development (memory backend, insecure cookie)
    pub fn development() -> Self {
        Self {
            backend: BackendKind::Memory,
            cookie_secure: false,
            public_site_url: "http://localhost:3000".to_string(),
            ..Default::default()
        }
    }

    /// Read configuration from the environment
    ///
    /// | Variable | Default |
    /// | --- | --- |
    /// | `AUTH_BACKEND` | `supabase` |
    /// | `SUPABASE_URL`, `SUPABASE_ANON_KEY` | required for `supabase` |
    /// | `AUTH_REQUEST_TIMEOUT_SECS` | 10 |
    /// | `AUTH_REFRESH_MARGIN_SECS` | 60 |
    /// | `AUTH_CLIENT_IDLE_TTL_SECS` | 3600 |
    /// | `AUTH_MAX_CLIENTS` | 10000 |
    /// | `AUTH_COOKIE_SECURE` | true |
    /// | `PUBLIC_SITE_URL` | `http://localhost:5173` |
    pub fn from_env(env: &EnvReader) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let backend: BackendKind = env.parse_or("AUTH_BACKEND", BackendKind::Supabase)?;

        let (supabase_url, supabase_anon_key) = match backend {
            BackendKind::Supabase => {
                let url = env.required("SUPABASE_URL")?;
                Url::parse(&url).map_err(|e| ConfigError::Invalid {
                    name: "SUPABASE_URL".to_string(),
                    reason: e.to_string(),
                })?;
                (url, env.required("SUPABASE_ANON_KEY")?)
            }
            BackendKind::Memory => (
                env.string_or("SUPABASE_URL", ""),
                env.string_or("SUPABASE_ANON_KEY", ""),
            ),
        };

        let request_timeout = env.secs_or("AUTH_REQUEST_TIMEOUT_SECS", 10)?;
        if request_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                name: "AUTH_REQUEST_TIMEOUT_SECS".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let public_site_url = env.string_or("PUBLIC_SITE_URL", &defaults.public_site_url);
        Url::parse(&public_site_url).map_err(|e| ConfigError::Invalid {
            name: "PUBLIC_SITE_URL".to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            backend,
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            supabase_anon_key,
            request_timeout,
            refresh_margin: env.secs_or("AUTH_REFRESH_MARGIN_SECS", 60)?,
            client_idle_ttl: env.secs_or("AUTH_CLIENT_IDLE_TTL_SECS", 3600)?,
            max_clients: env.parse_or("AUTH_MAX_CLIENTS", defaults.max_clients)?,
            cookie_secure: env.bool_or("AUTH_COOKIE_SECURE", true)?,
            public_site_url: public_site_url.trim_end_matches('/').to_string(),
            ..defaults
        })
    }

    /// Where emailed reset links should land
    pub fn password_reset_redirect(&self) -> String {
        format!("{}/auth/callback", self.public_site_url)
    }

    /// Whether `path` needs a session
    pub fn is_protected(&self, path: &str) -> bool {
        self.protected_prefixes.iter().any(|prefix| {
            path == prefix
                || path
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with(['/', '?']))
        })
    }
}

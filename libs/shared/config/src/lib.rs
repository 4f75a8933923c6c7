use std::env;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Supabase,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_role_key: Option<String>,
    pub supabase_jwt_secret: String,
    pub redis_url: Option<String>,
    pub bind_address: String,
    pub storage_backend: StorageBackend,
    /// Fixed offset of the clinic's local time, e.g. `+08:00`.
    pub clinic_utc_offset: String,
    pub realtime_channel_capacity: usize,
    pub realtime_heartbeat_seconds: u64,
    pub notification_webhook_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let supabase_url = env::var("SUPABASE_URL")
            .unwrap_or_else(|_| {
                warn!("SUPABASE_URL not set, using empty value");
                String::new()
            });

        let storage_backend = match env::var("STORAGE_BACKEND").ok().as_deref() {
            Some("supabase") => StorageBackend::Supabase,
            Some("memory") => StorageBackend::Memory,
            Some(other) => {
                warn!("Unknown STORAGE_BACKEND '{}', falling back to auto-detection", other);
                Self::default_backend(&supabase_url)
            }
            None => Self::default_backend(&supabase_url),
        };

        let config = Self {
            supabase_url,
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY").ok(),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            redis_url: env::var("REDIS_URL").ok(),
            bind_address: env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            storage_backend,
            clinic_utc_offset: env::var("CLINIC_UTC_OFFSET")
                .unwrap_or_else(|_| {
                    warn!("CLINIC_UTC_OFFSET not set, using default");
                    "+08:00".to_string()
                }),
            realtime_channel_capacity: parse_or("REALTIME_CHANNEL_CAPACITY", 256),
            realtime_heartbeat_seconds: parse_or("REALTIME_HEARTBEAT_SECONDS", 30),
            notification_webhook_url: env::var("NOTIFICATION_WEBHOOK_URL").ok(),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    fn default_backend(supabase_url: &str) -> StorageBackend {
        if supabase_url.is_empty() {
            StorageBackend::Memory
        } else {
            StorageBackend::Supabase
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    pub fn is_realtime_relay_configured(&self) -> bool {
        self.redis_url.as_deref().is_some_and(|url| !url.is_empty())
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value '{}', using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_service_role_key: None,
            supabase_jwt_secret: String::new(),
            redis_url: None,
            bind_address: "0.0.0.0:3000".to_string(),
            storage_backend: StorageBackend::Memory,
            clinic_utc_offset: "+08:00".to_string(),
            realtime_channel_capacity: 256,
            realtime_heartbeat_seconds: 30,
            notification_webhook_url: None,
        }
    }
}

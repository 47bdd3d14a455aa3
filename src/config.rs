//! Layered configuration.
//!
//! Priority, lowest first: built-in defaults, YAML file, `EDUCADOR_`
//! environment variables, legacy environment names, CLI flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use url::Url;

use crate::chat::AgeGroup;
use crate::error::ConfigError;
use crate::session::{ChatSettings, DEFAULT_MAX_MESSAGES, DeliveryOrder};

/// Webhook used when nothing else is configured.
pub const DEFAULT_WEBHOOK_URL: &str =
    "http://localhost:5678/webhook-test/4938f62b-1a0e-435e-9255-bcb369c702f6";

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Message-processing webhook URL
    #[arg(long, env = "N8N_WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Module (topic) for the chat
    #[arg(short, long)]
    pub module: Option<String>,

    /// Age group: 3-5, 6-8 or 9-12
    #[arg(short, long)]
    pub age_group: Option<AgeGroup>,

    /// Directory for session storage
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Reuse an explicit session id instead of the stored one
    #[arg(long)]
    pub session_id: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub webhook: WebhookConfig,
    pub api: ApiConfig,
    pub chat: ChatConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    pub max_messages: usize,
    pub age_groups: Vec<AgeGroup>,
    pub default_module: String,
    pub default_age_group: AgeGroup,
    pub delivery_order: DeliveryOrder,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub dir: PathBuf,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args)?;
        Self::from_cli(&cli)
    }

    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("webhook.url", DEFAULT_WEBHOOK_URL)?
            .set_default("webhook.timeout_ms", 10_000)?
            .set_default("api.base_url", "http://localhost:3000/api")?
            .set_default("chat.max_messages", DEFAULT_MAX_MESSAGES as u64)?
            .set_default(
                "chat.age_groups",
                AgeGroup::ALL.iter().map(|g| g.as_str()).collect::<Vec<_>>(),
            )?
            .set_default("chat.default_module", "general")?
            .set_default("chat.default_age_group", AgeGroup::default().as_str())?
            .set_default("chat.delivery_order", "arrival")?
            .set_default("storage.dir", ".educador-chat")?;

        builder = match &cli.config {
            Some(path) => builder.add_source(File::from(path.as_path()).required(true)),
            None => builder.add_source(File::from(Path::new("config.yaml")).required(false)),
        };

        // E.g. EDUCADOR_CHAT__MAX_MESSAGES=50
        builder = builder.add_source(
            Environment::with_prefix("EDUCADOR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // Names used by the web front-end's environment files
        if let Ok(val) = std::env::var("API_URL") {
            builder = builder.set_override("api.base_url", val)?;
        }

        if let Some(url) = &cli.webhook_url {
            builder = builder.set_override("webhook.url", url.as_str())?;
        }
        if let Some(module) = &cli.module {
            builder = builder.set_override("chat.default_module", module.as_str())?;
        }
        if let Some(age_group) = cli.age_group {
            builder = builder.set_override("chat.default_age_group", age_group.as_str())?;
        }
        if let Some(dir) = &cli.storage_dir {
            builder = builder.set_override("storage.dir", dir.to_string_lossy().into_owned())?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check cross-field constraints that deserialization cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.webhook_url()?;
        Url::parse(&self.api.base_url).map_err(|source| ConfigError::Url {
            field: "api.base_url",
            source,
        })?;

        if self.chat.max_messages == 0 {
            return Err(ConfigError::Invalid(
                "chat.max_messages must be at least 1".into(),
            ));
        }
        if self.chat.default_module.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "chat.default_module cannot be empty".into(),
            ));
        }
        if !self.chat.age_groups.contains(&self.chat.default_age_group) {
            return Err(ConfigError::Invalid(format!(
                "chat.default_age_group {} is not one of chat.age_groups",
                self.chat.default_age_group
            )));
        }
        Ok(())
    }

    pub fn webhook_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.webhook.url).map_err(|source| ConfigError::Url {
            field: "webhook.url",
            source,
        })
    }

    #[must_use]
    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_millis(self.webhook.timeout_ms)
    }

    #[must_use]
    pub fn chat_settings(&self) -> ChatSettings {
        ChatSettings {
            max_messages: Some(self.chat.max_messages),
            delivery_order: self.chat.delivery_order,
        }
    }

    /// Whether `age_group` is one this deployment serves.
    #[must_use]
    pub fn is_recognized(&self, age_group: AgeGroup) -> bool {
        self.chat.age_groups.contains(&age_group)
    }
}

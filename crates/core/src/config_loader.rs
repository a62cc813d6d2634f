use crate::config::AppConfig;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};

/// Environment variables that override `[polymarket]` credentials.
///
/// These take precedence over anything in the config file so that secrets
/// never need to live on disk.
const CREDENTIAL_ENV_VARS: &[(&str, CredentialField)] = &[
    ("POLYMARKET_PRIVATE_KEY", CredentialField::PrivateKey),
    ("POLYMARKET_API_KEY", CredentialField::ApiKey),
    ("POLYMARKET_API_SECRET", CredentialField::ApiSecret),
    ("POLYMARKET_PASSPHRASE", CredentialField::Passphrase),
    ("POLYMARKET_FUNDER", CredentialField::Funder),
];

#[derive(Clone, Copy)]
enum CredentialField {
    PrivateKey,
    ApiKey,
    ApiSecret,
    Passphrase,
    Funder,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads application configuration by merging TOML and environment
    /// variables, then applying credential env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load() -> Result<AppConfig> {
        Self::load_from("config/Config.toml")
    }

    /// Loads configuration from a specific TOML path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load_from(path: &str) -> Result<AppConfig> {
        let mut config: AppConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("APP_").split("__"))
            .extract()?;

        apply_credential_overrides(&mut config);
        Ok(config)
    }
}

fn apply_credential_overrides(config: &mut AppConfig) {
    for (var, field) in CREDENTIAL_ENV_VARS {
        if let Ok(value) = std::env::var(var) {
            if value.is_empty() {
                continue;
            }
            match field {
                CredentialField::PrivateKey => config.polymarket.private_key = value,
                CredentialField::ApiKey => config.polymarket.api_key = value,
                CredentialField::ApiSecret => config.polymarket.api_secret = value,
                CredentialField::Passphrase => config.polymarket.passphrase = value,
                CredentialField::Funder => config.polymarket.funder = value,
            }
        }
    }
}

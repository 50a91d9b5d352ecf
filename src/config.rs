use serde::Deserialize;

use crate::checkout::CheckoutSettings;

fn default_server_port() -> u16 {
    8000
}

fn default_max_connections() -> u32 {
    8
}

fn default_referral_ttl_days() -> i64 {
    30
}

fn default_wallet_cas_attempts() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,
    /// Days a captured referral click stays attributable.
    #[serde(default = "default_referral_ttl_days")]
    pub referral_ttl_days: i64,
    #[serde(default = "default_wallet_cas_attempts")]
    pub wallet_cas_attempts: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;
        config.try_deserialize()
    }

    pub fn checkout_settings(&self) -> CheckoutSettings {
        CheckoutSettings {
            referral_ttl: chrono::Duration::days(self.referral_ttl_days.max(0)),
            wallet_cas_attempts: self.wallet_cas_attempts.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_are_clamped() {
        let cfg = Config {
            server_port: 8000,
            database_url: "postgres://localhost/shop".into(),
            database_max_connections: 8,
            referral_ttl_days: -4,
            wallet_cas_attempts: 0,
        };
        let settings = cfg.checkout_settings();
        assert_eq!(settings.referral_ttl, chrono::Duration::zero());
        assert_eq!(settings.wallet_cas_attempts, 1);
    }
}

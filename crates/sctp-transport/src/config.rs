use serde::Deserialize;

use crate::error::ConfigError;

pub const CONFIG_VERSION: u32 = 1;

/// Which side starts the association handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Active,
    Passive,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TransportConfigInput {
    pub version: u32,
    pub port: Option<u16>,
    pub role: Option<Role>,
    pub max_message_size: Option<usize>,
    pub max_fragment_size: Option<usize>,
    pub send_buffer_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub version: u32,
    pub port: u16,
    pub role: Role,
    /// Largest message accepted by `send`, and largest reassembled inbound.
    pub max_message_size: usize,
    /// Largest payload handed to the engine in one send.
    pub max_fragment_size: usize,
    pub send_buffer_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            port: 5000,
            role: Role::Active,
            max_message_size: 256 * 1024,
            max_fragment_size: 64 * 1024,
            send_buffer_size: 1024 * 1024,
        }
    }
}

impl TransportConfigInput {
    pub fn resolve(self) -> Result<TransportConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }

        let defaults = TransportConfig::default();
        let port = self.port.unwrap_or(defaults.port);
        if port == 0 {
            return Err(ConfigError::Invalid("port must be non-zero".into()));
        }
        let max_fragment_size = self.max_fragment_size.unwrap_or(defaults.max_fragment_size);
        if max_fragment_size == 0 {
            return Err(ConfigError::Invalid(
                "max_fragment_size must be non-zero".into(),
            ));
        }
        let max_message_size = self.max_message_size.unwrap_or(defaults.max_message_size);
        if max_message_size == 0 {
            return Err(ConfigError::Invalid(
                "max_message_size must be non-zero".into(),
            ));
        }

        Ok(TransportConfig {
            version,
            port,
            role: self.role.unwrap_or(defaults.role),
            max_message_size,
            max_fragment_size,
            send_buffer_size: self
                .send_buffer_size
                .unwrap_or(defaults.send_buffer_size)
                .max(max_fragment_size),
        })
    }
}

impl TransportConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(TransportConfig::default());
        }
        let parsed: TransportConfigInput =
            toml::from_str(input).map_err(|e| ConfigError::Toml(e.to_string()))?;
        parsed.resolve()
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }
}

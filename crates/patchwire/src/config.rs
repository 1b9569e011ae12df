use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Unknown creation policy: {0}")]
    UnknownCreationPolicy(String),
}

/// How a module is created while its remote counterpart is still on the way.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum CreationPolicy {
    /// The module is ready immediately; the remote id is bound whenever the
    /// engine replies.
    #[default]
    LocalFirst,
    /// The module stays pending until the engine replies, unless the engine
    /// is not ready yet, in which case it falls back to [`LocalFirst`].
    ///
    /// [`LocalFirst`]: CreationPolicy::LocalFirst
    AwaitRemote,
}

impl FromStr for CreationPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().trim() {
            "local-first" | "local_first" | "local" => Ok(Self::LocalFirst),
            "await-remote" | "await_remote" | "remote" => Ok(Self::AwaitRemote),
            _ => Err(ConfigError::UnknownCreationPolicy(s.to_string())),
        }
    }
}

/// Where and how to reach the remote audio engine.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EngineConfig {
    /// Host the engine listens on.
    pub host: String,
    /// Local port replies are received on. `0` picks any free port.
    pub local_port: u16,
    /// Ask the engine to echo every message it receives.
    pub osc_debug: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            local_port: 0,
            osc_debug: false,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionConfig {
    pub engine: EngineConfig,
    pub creation_policy: CreationPolicy,
}

impl SessionConfig {
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_creation_policy(mut self, creation_policy: CreationPolicy) -> Self {
        self.creation_policy = creation_policy;
        self
    }

    pub fn with_osc_debug(mut self, osc_debug: bool) -> Self {
        self.engine.osc_debug = osc_debug;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation_policy_from_str() {
        assert_eq!(
            " Await-Remote".parse::<CreationPolicy>(),
            Ok(CreationPolicy::AwaitRemote)
        );
        assert_eq!("local".parse::<CreationPolicy>(), Ok(CreationPolicy::LocalFirst));
        assert_eq!(
            "eager".parse::<CreationPolicy>(),
            Err(ConfigError::UnknownCreationPolicy("eager".to_string()))
        );
    }

    #[test]
    fn test_builders() {
        let config = SessionConfig::default()
            .with_creation_policy(CreationPolicy::AwaitRemote)
            .with_osc_debug(true);
        assert_eq!(config.creation_policy, CreationPolicy::AwaitRemote);
        assert!(config.engine.osc_debug);
        assert_eq!(config.engine.host, "127.0.0.1");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_partial_config_from_json() {
        let config: SessionConfig = serde_json::from_str(
            r#"{ "creation_policy": "await-remote", "engine": { "local_port": 57130 } }"#,
        )
        .unwrap();
        assert_eq!(config.creation_policy, CreationPolicy::AwaitRemote);
        assert_eq!(config.engine.local_port, 57130);
        assert_eq!(config.engine.host, "127.0.0.1");
    }
}

use std::fs;
use std::path::Path;

use postrpc_proto::{ConfigError, ContextId};
use serde::{Deserialize, Serialize};

/// Where `notify` sends events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    /// Only the configured child context, filtered by the configured origin.
    #[default]
    Child,
    /// Every child context the transport knows about, unfiltered.
    Broadcast,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Origin every inbound request must come from. Sandboxed frames report
    /// the literal origin `"null"`, so they need `origin = "null"`.
    pub origin: String,
    /// The child context allowed to call in, and the target of `publish`.
    /// Without one, any child context of the transport may call in.
    #[serde(default)]
    pub child: Option<ContextId>,
    #[serde(default)]
    pub publish: PublishMode,
}

impl ServerConfig {
    pub fn new(origin: impl Into<String>) -> Self {
        Self { origin: origin.into(), child: None, publish: PublishMode::default() }
    }

    pub fn with_child(mut self, child: impl Into<ContextId>) -> Self {
        self.child = Some(child.into());
        self
    }

    pub fn with_publish(mut self, publish: PublishMode) -> Self {
        self.publish = publish;
        self
    }

    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)
            .map_err(|err| ConfigError::Parse { message: err.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.origin.trim().is_empty() {
            return Err(ConfigError::invalid("server origin must not be empty"));
        }
        if self.child.as_ref().is_some_and(|child| child.as_str().trim().is_empty()) {
            return Err(ConfigError::invalid("server child context must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let cfg = ServerConfig::from_toml(r#"origin = "http://localhost:5001""#).expect("parse");
        assert_eq!(cfg.origin, "http://localhost:5001");
        assert_eq!(cfg.child, None);
        assert_eq!(cfg.publish, PublishMode::Child);
    }

    #[test]
    fn parses_broadcast_mode_and_child() {
        let input = r#"
origin = "http://localhost:5001"
child = "client"
publish = "broadcast"
"#;
        let cfg = ServerConfig::from_toml(input).expect("parse");
        assert_eq!(cfg.child, Some(ContextId::from("client")));
        assert_eq!(cfg.publish, PublishMode::Broadcast);
    }

    #[test]
    fn accepts_the_sandboxed_null_origin() {
        let cfg = ServerConfig::from_toml(r#"origin = "null""#).expect("parse");
        assert_eq!(cfg.origin, "null");
    }

    #[test]
    fn rejects_empty_origin_and_unknown_mode() {
        let err = ServerConfig::from_toml(r#"origin = " ""#).expect_err("empty origin");
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err = ServerConfig::from_toml("origin = \"o\"\npublish = \"everyone\"")
            .expect_err("unknown mode");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn loads_config_from_file() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        fs::write(file.path(), "origin = \"http://host\"\nchild = \"frame\"\n").expect("write");

        let cfg = ServerConfig::from_path(file.path()).expect("load");
        assert_eq!(cfg, ServerConfig::new("http://host").with_child("frame"));

        let err = ServerConfig::from_path(file.path().with_extension("missing"))
            .expect_err("missing file");
        assert!(matches!(err, ConfigError::Io(_)));
    }
}

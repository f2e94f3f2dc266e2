// Settings file loaders

use crate::{ConfigError, EnvLoader, Result, Settings};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Supported settings file formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileFormat {
    Json,
    Toml,
    Env,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            "env" => Some(FileFormat::Env),
            _ => None,
        }
    }

    /// Detect the format of a path, treating a bare `.env` file as [`FileFormat::Env`].
    pub fn from_path(path: &Path) -> Option<Self> {
        if path.file_name().and_then(|s| s.to_str()) == Some(".env") {
            return Some(FileFormat::Env);
        }
        path.extension()
            .and_then(|s| s.to_str())
            .and_then(Self::from_extension)
    }
}

/// Settings file loader
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    format: FileFormat,
    env: EnvLoader,
}

impl ConfigLoader {
    pub fn new(format: FileFormat) -> Self {
        Self {
            format,
            env: EnvLoader::default(),
        }
    }

    /// Auto-detect format from file extension
    pub fn auto(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = FileFormat::from_path(path).ok_or_else(|| {
            ConfigError::LoadError(format!("Unsupported format: {}", path.display()))
        })?;

        Ok(Self::new(format))
    }

    /// Variables of `.env` content are read through this loader's prefix.
    pub fn with_env_loader(mut self, env: EnvLoader) -> Self {
        self.env = env;
        self
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    /// Load a raw document from file
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Value> {
        self.parse(&read(path.as_ref())?)
    }

    /// Load settings from file
    pub fn load_settings(&self, path: impl AsRef<Path>) -> Result<Settings> {
        let path = path.as_ref();
        let settings = self.parse_settings(&read(path)?)?;
        tracing::debug!(path = %path.display(), format = ?self.format, "Loaded settings file");
        Ok(settings)
    }

    /// Parse settings, filling unspecified fields with defaults
    pub fn parse_settings(&self, content: &str) -> Result<Settings> {
        match self.format {
            FileFormat::Env => {
                let mut settings = Settings::default();
                settings.apply_env(&self.env.collect(parse_env_pairs(content)))?;
                Ok(settings)
            }
            FileFormat::Json | FileFormat::Toml => serde_json::from_value(self.parse(content)?)
                .map_err(|e| ConfigError::DeserializationError(e.to_string())),
        }
    }

    /// Parse a raw document from string
    pub fn parse(&self, content: &str) -> Result<Value> {
        match self.format {
            FileFormat::Json => self.parse_json(content),
            FileFormat::Toml => self.parse_toml(content),
            FileFormat::Env => Ok(Value::Object(
                parse_env_pairs(content)
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect(),
            )),
        }
    }

    fn parse_json(&self, content: &str) -> Result<Value> {
        serde_json::from_str(content)
            .map_err(|e| ConfigError::ParseError(format!("JSON parse error: {}", e)))
    }

    fn parse_toml(&self, content: &str) -> Result<Value> {
        let toml_value: toml::Value = toml::from_str(content)
            .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;

        serde_json::to_value(toml_value)
            .map_err(|e| ConfigError::ParseError(format!("TOML to JSON conversion error: {}", e)))
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| {
        ConfigError::LoadError(format!("Failed to read {}: {}", path.display(), e))
    })
}

fn parse_env_pairs(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let key = key.trim().trim_start_matches("export ").trim();
            let value = value.trim().trim_matches('"').trim_matches('\'');
            (key.to_string(), value.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use odata_core::ODataVersion;

    #[test]
    fn test_parse_json_settings() {
        let loader = ConfigLoader::new(FileFormat::Json);
        let json = r#"{"batch": {"version": "3.0", "strict_crlf": false}, "client": {"timeout_secs": 5}}"#;

        let settings = loader.parse_settings(json).unwrap();
        assert_eq!(settings.batch.version, ODataVersion::V3);
        assert!(!settings.batch.strict_crlf);
        assert!(settings.batch.require_content_id);
        assert_eq!(settings.client.timeout_secs, 5);
    }

    #[test]
    fn test_parse_toml_settings() {
        let loader = ConfigLoader::new(FileFormat::Toml);
        let toml = r#"
            [batch]
            version = "4.0"
            max_line_length = 8192

            [client]
            service_root = "https://host/odata/"

            [client.default_headers]
            X-Tenant = "acme"

            [logging]
            level = "debug"
            format = "pretty"
        "#;

        let settings = loader.parse_settings(toml).unwrap();
        assert_eq!(settings.batch.max_line_length, Some(8192));
        assert_eq!(settings.client.service_root, "https://host/odata/");
        assert_eq!(settings.client.default_headers["X-Tenant"], "acme");
        assert_eq!(settings.logging.level, odata_core::logging::LogLevel::Debug);
    }

    #[test]
    fn test_parse_env_settings() {
        let loader = ConfigLoader::new(FileFormat::Env);
        let env = r#"
            # Comment
            ODATA_VERSION=3.0
            export ODATA_REQUIRE_CONTENT_ID=false
            ODATA_SERVICE_ROOT="https://host/svc/"
            UNRELATED=1
        "#;

        let settings = loader.parse_settings(env).unwrap();
        assert_eq!(settings.batch.version, ODataVersion::V3);
        assert!(!settings.batch.require_content_id);
        assert_eq!(settings.client.service_root, "https://host/svc/");
    }

    #[test]
    fn test_unknown_field_is_ignored_and_bad_type_rejected() {
        let loader = ConfigLoader::new(FileFormat::Json);
        assert!(loader.parse_settings(r#"{"extra": 1}"#).is_ok());
        assert!(matches!(
            loader.parse_settings(r#"{"batch": {"strict_crlf": "maybe"}}"#),
            Err(ConfigError::DeserializationError(_))
        ));
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(FileFormat::from_extension("json"), Some(FileFormat::Json));
        assert_eq!(FileFormat::from_extension("TOML"), Some(FileFormat::Toml));
        assert_eq!(FileFormat::from_path(Path::new("conf/.env")), Some(FileFormat::Env));
        assert_eq!(FileFormat::from_extension("unknown"), None);
        assert!(ConfigLoader::auto("settings.yaml").is_err());
    }
}

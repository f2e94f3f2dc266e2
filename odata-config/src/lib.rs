// Settings loading for the OData batch toolkit

pub mod env;
pub mod error;
pub mod loader;
pub mod settings;
pub mod validation;

pub use env::{DEFAULT_PREFIX, EnvLoader};
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use settings::{ClientSettings, Settings};
pub use validation::{ConfigValidator, Validate};

use std::path::{Path, PathBuf};

/// Layers settings: defaults, then a file, then `.env`, then the environment.
///
/// ```rust,no_run
/// use odata_config::SettingsLoader;
///
/// # fn main() -> odata_config::Result<()> {
/// let settings = SettingsLoader::new()
///     .file("odata.toml")
///     .dotenv()
///     .load()?;
/// let batch = settings.batch_config();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SettingsLoader {
    file: Option<PathBuf>,
    dotenv: Option<Option<PathBuf>>,
    env: Option<EnvLoader>,
}

impl SettingsLoader {
    /// Create a loader reading `ODATA_*` variables
    pub fn new() -> Self {
        Self {
            file: None,
            dotenv: None,
            env: Some(EnvLoader::default()),
        }
    }

    /// Read a JSON, TOML or `.env` file, detected by extension
    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load `.env` from the working directory if it exists
    pub fn dotenv(mut self) -> Self {
        self.dotenv = Some(None);
        self
    }

    /// Load a specific `.env` file, which must exist
    pub fn dotenv_path(mut self, path: impl AsRef<Path>) -> Self {
        self.dotenv = Some(Some(path.as_ref().to_path_buf()));
        self
    }

    /// Read variables with another prefix
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env = Some(EnvLoader::new(Some(prefix.into())));
        self
    }

    /// Ignore the process environment
    pub fn without_env(mut self) -> Self {
        self.env = None;
        self
    }

    /// Load and validate
    pub fn load(&self) -> Result<Settings> {
        let mut settings = match &self.file {
            Some(path) => ConfigLoader::auto(path)?
                .with_env_loader(self.env.clone().unwrap_or_default())
                .load_settings(path)?,
            None => Settings::default(),
        };

        match &self.dotenv {
            Some(Some(path)) => {
                dotenvy::from_path(path).map_err(|e| ConfigError::LoadError(e.to_string()))?;
            }
            Some(None) => {
                dotenvy::dotenv().ok(); // Ignore if .env doesn't exist
            }
            None => {}
        }

        if let Some(env) = &self.env {
            settings.apply_env(&env.load()?)?;
        }

        settings.validate()?;
        Ok(settings)
    }
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}

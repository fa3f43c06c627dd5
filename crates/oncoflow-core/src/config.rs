use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use oncoflow_provider::ProviderConfig;
use serde::{Deserialize, Serialize};

use crate::extract::PageAnnotation;
use crate::merger::Strictness;
use crate::pipeline::ImportOptions;
use crate::retry::RetryPolicy;

pub const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OncoflowConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub import: ImportConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Defaults to `<root>/data`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default)]
    pub strictness: Strictness,
    #[serde(default)]
    pub page_annotation: PageAnnotation,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl OncoflowConfig {
    pub fn data_dir(&self, root: &Path) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .unwrap_or_else(|| root.join("data"))
    }

    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            strictness: self.import.strictness,
            page_annotation: self.import.page_annotation,
            retry: self.import.retry,
        }
    }
}

/// Expand `${VAR}` and `${VAR:-fallback}` placeholders from the environment.
///
/// An unset or empty variable expands to its fallback, or to nothing. An
/// unterminated placeholder is left as written.
pub fn expand_env(raw: &str) -> String {
    let mut segments = raw.split("${");
    let mut output = segments.next().unwrap_or_default().to_string();
    for segment in segments {
        let Some((expr, tail)) = segment.split_once('}') else {
            output.push_str("${");
            output.push_str(segment);
            continue;
        };
        let (name, fallback) = expr.split_once(":-").unwrap_or((expr, ""));
        let value = std::env::var(name).ok().filter(|v| !v.is_empty());
        output.push_str(value.as_deref().unwrap_or(fallback));
        output.push_str(tail);
    }
    output
}

/// Load `<root>/config.yaml`, falling back to defaults when the file is absent.
pub fn load_config(root: &Path) -> Result<OncoflowConfig> {
    let path = root.join(CONFIG_FILE);
    let mut config = if path.exists() {
        read_yaml_file(&path)?
    } else {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        OncoflowConfig::default()
    };

    resolve_config_env(&mut config);
    validate_config(&config)?;
    Ok(config)
}

fn resolve_config_env(config: &mut OncoflowConfig) {
    let provider = &mut config.provider;
    provider.api_key = provider
        .api_key
        .as_deref()
        .map(expand_env)
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty());
    provider.model = expand_env(&provider.model);
    provider.base_url = expand_env(&provider.base_url);

    if let Some(dir) = config.storage.data_dir.as_ref().and_then(|d| d.to_str()) {
        config.storage.data_dir = Some(PathBuf::from(expand_env(dir)));
    }
}

pub fn validate_config(config: &OncoflowConfig) -> Result<()> {
    let provider = &config.provider;
    if provider.model.trim().is_empty() {
        return Err(anyhow!("provider.model must not be empty"));
    }
    if !(0.0..=2.0).contains(&provider.temperature) {
        return Err(anyhow!(
            "provider.temperature must be between 0 and 2, got {}",
            provider.temperature
        ));
    }
    if provider.timeout_secs == 0 {
        return Err(anyhow!("provider.timeout_secs must be greater than 0"));
    }
    if config.import.retry.max_attempts == 0 {
        return Err(anyhow!("import.retry.max_attempts must be at least 1"));
    }
    Ok(())
}

fn read_yaml_file<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse yaml: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, yaml: &str) {
        fs::write(dir.join(CONFIG_FILE), yaml).unwrap();
    }

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = load_config(tmp.path()).unwrap();

        assert_eq!(config.provider.model, "gemini-1.5-flash");
        assert_eq!(config.provider.timeout_secs, 120);
        assert!(config.provider.api_key.is_none());
        assert_eq!(config.data_dir(tmp.path()), tmp.path().join("data"));

        let options = config.import_options();
        assert_eq!(options.strictness, Strictness::Lenient);
        assert_eq!(options.page_annotation, PageAnnotation::Marker);
        assert_eq!(options.retry, RetryPolicy::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        write_config(
            tmp.path(),
            "provider:\n  api_key: abc123\n  temperature: 0.5\nimport:\n  strictness: strict\n  page_annotation: none\n  retry:\n    max_attempts: 3\nstorage:\n  data_dir: /var/lib/oncoflow\n",
        );
        let config = load_config(tmp.path()).unwrap();

        assert_eq!(config.provider.api_key.as_deref(), Some("abc123"));
        assert_eq!(config.provider.temperature, 0.5);
        assert_eq!(config.provider.model, "gemini-1.5-flash");
        assert_eq!(config.import.strictness, Strictness::Strict);
        assert_eq!(config.import.page_annotation, PageAnnotation::None);
        assert_eq!(config.import.retry.max_attempts, 3);
        assert_eq!(config.import.retry.base_delay_ms, 500);
        assert_eq!(
            config.data_dir(tmp.path()),
            PathBuf::from("/var/lib/oncoflow")
        );
    }

    #[test]
    fn api_key_expanded_from_environment() {
        let tmp = tempfile::tempdir().unwrap();
        write_config(
            tmp.path(),
            "provider:\n  api_key: \"${ONCOFLOW_TEST_UNSET_KEY_XYZ}\"\n",
        );
        let config = load_config(tmp.path()).unwrap();
        assert!(config.provider.api_key.is_none());
        assert!(!config.provider.has_credential());
    }

    #[test]
    fn invalid_values_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write_config(tmp.path(), "provider:\n  temperature: 3.5\n");
        let err = load_config(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("temperature"));

        write_config(tmp.path(), "import:\n  retry:\n    max_attempts: 0\n");
        let err = load_config(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("max_attempts"));

        write_config(tmp.path(), "provider:\n  model: \"\"\n");
        assert!(load_config(tmp.path()).is_err());
    }

    #[test]
    fn unparsable_yaml_names_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        write_config(tmp.path(), "provider: [unclosed");
        let err = load_config(tmp.path()).unwrap_err();
        assert!(format!("{err:#}").contains(CONFIG_FILE));
    }

    #[test]
    fn expand_env_substitutes_set_variables() {
        let path = std::env::var("PATH").unwrap();
        assert_eq!(expand_env("bin=${PATH};"), format!("bin={path};"));
        assert_eq!(expand_env("sin marcadores"), "sin marcadores");
    }

    #[test]
    fn expand_env_unset_variable_uses_fallback_or_nothing() {
        assert_eq!(expand_env("${ONCOFLOW_UNSET_FOR_TEST}"), "");
        assert_eq!(
            expand_env("${ONCOFLOW_UNSET_FOR_TEST:-gemini-1.5-pro}"),
            "gemini-1.5-pro"
        );
    }

    #[test]
    fn expand_env_keeps_unterminated_placeholder() {
        assert_eq!(
            expand_env("data/${ONCOFLOW_UNSET_FOR_TEST"),
            "data/${ONCOFLOW_UNSET_FOR_TEST"
        );
    }
}

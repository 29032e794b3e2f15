use anyhow::{Context, Result};
use dictbe_core::{ClientConfig, ProviderKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const CONFIG_FILE_NAME: &str = ".dict-be.toml";

/// Environment variables that take precedence over the file when non-empty
const ENV_TYPE: &str = "DICT_BE_LLM_TYPE";
const ENV_URL: &str = "DICT_BE_LLM_URL";
const ENV_MODEL: &str = "DICT_BE_LLM_MODEL";
const ENV_TOKEN: &str = "DICT_BE_LLM_TOKEN";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DictConfig {
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    /// openai | anthropic | gemini; empty means openai
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub token: String,
    /// anthropic-version header, Anthropic only
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("type", &self.kind)
            .field("url", &self.url)
            .field("model", &self.model)
            .field("token", &mask_secret(&self.token))
            .field("version", &self.version)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// Per-invocation flag values; a non-blank flag wins over the config file
#[derive(Debug, Clone, Default)]
pub struct LlmOverrides {
    pub model: Option<String>,
    pub url: Option<String>,
    pub token: Option<String>,
}

pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_FILE_NAME)
}

/// Resolve `--config`, expanding a leading `~`
pub fn resolve_path(custom_path: Option<&Path>) -> PathBuf {
    match custom_path {
        Some(path) => expand_home(path),
        None => default_config_path(),
    }
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

impl DictConfig {
    pub fn load(custom_path: Option<&Path>) -> Result<Self> {
        let path = resolve_path(custom_path);
        Self::load_from(&path, |name| std::env::var(name).ok())
    }

    /// Load `path` with `lookup` standing in for the process environment
    pub fn load_from(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = if path.exists() {
            warn_if_world_readable(path);
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config at {}", path.display()))?;

            // Expand environment variables before parsing
            let expanded = expand_env_vars(&content, &lookup);

            toml::from_str(&expanded)
                .with_context(|| format!("Failed to parse config at {}", path.display()))?
        } else {
            debug!("No config at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_env_overrides(&lookup);
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        let fields = [
            (ENV_TYPE, &mut self.llm.kind),
            (ENV_URL, &mut self.llm.url),
            (ENV_MODEL, &mut self.llm.model),
            (ENV_TOKEN, &mut self.llm.token),
        ];
        for (name, field) in fields {
            if let Some(value) = lookup(name).filter(|v| !v.trim().is_empty()) {
                debug!("Config field overridden by {}", name);
                *field = value;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.llm.provider_kind()?;
        Ok(())
    }

    /// Copy safe to print: the token is masked
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.llm.token = mask_secret(&self.llm.token);
        copy
    }
}

impl LlmConfig {
    pub fn provider_kind(&self) -> Result<ProviderKind> {
        Ok(self.kind.parse::<ProviderKind>()?)
    }

    /// Adapter settings after applying flag overrides. A blank URL falls back to
    /// the provider's public endpoint; token and model are validated by the adapter.
    pub fn client_config(&self, overrides: &LlmOverrides) -> Result<ClientConfig> {
        let kind = self.provider_kind()?;
        let base_url = first_non_empty(&[overrides.url.as_deref(), Some(self.url.as_str())])
            .unwrap_or_else(|| kind.default_base_url().to_string());

        Ok(ClientConfig {
            kind,
            base_url,
            api_key: first_non_empty(&[overrides.token.as_deref(), Some(self.token.as_str())])
                .unwrap_or_default(),
            model: first_non_empty(&[overrides.model.as_deref(), Some(self.model.as_str())])
                .unwrap_or_default(),
            anthropic_version: self.version.clone(),
            max_tokens: self.max_tokens,
            http_client: None,
        })
    }
}

fn first_non_empty(values: &[Option<&str>]) -> Option<String> {
    values
        .iter()
        .flatten()
        .find(|v| !v.trim().is_empty())
        .map(|v| v.to_string())
}

pub fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

#[cfg(unix)]
fn warn_if_world_readable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = std::fs::metadata(path) {
        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            warn!(
                "Config file {} is readable by other users ({:o}) and may contain a token. Fix with: chmod 600 {}",
                path.display(),
                mode & 0o777,
                path.display()
            );
        }
    }
}

#[cfg(not(unix))]
fn warn_if_world_readable(_path: &Path) {}

/// Allowlist of environment variable names that may be expanded in config files.
const ALLOWED_ENV_VARS: &[&str] = &[
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "GEMINI_API_KEY",
    "GOOGLE_API_KEY",
    "GOOGLE_AI_API_KEY",
    "DICT_BE_LLM_TOKEN",
    "HOME",
    "USER",
];

fn expand_env_vars(s: &str, lookup: &impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        let var_name = &rest[start + 2..start + len];
        result.push_str(&rest[..start]);
        if ALLOWED_ENV_VARS.contains(&var_name) {
            result.push_str(&lookup(var_name).unwrap_or_default());
        } else {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            // Leave the ${VAR} unexpanded so it's obvious
            result.push_str(&rest[start..=start + len]);
        }
        rest = &rest[start + len + 1..];
    }
    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_full_file() {
        let file = write_config(
            r#"
[llm]
type = "anthropic"
url = "https://api.anthropic.com"
model = "claude-3-5-haiku-latest"
token = "${ANTHROPIC_API_KEY}"
version = "2023-06-01"
max_tokens = 2048
"#,
        );
        let config =
            DictConfig::load_from(file.path(), env(&[("ANTHROPIC_API_KEY", "sk-ant-1234")])).unwrap();
        assert_eq!(config.llm.kind, "anthropic");
        assert_eq!(config.llm.token, "sk-ant-1234");
        assert_eq!(config.llm.max_tokens, Some(2048));
        assert_eq!(config.llm.provider_kind().unwrap(), ProviderKind::Anthropic);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = DictConfig::load_from(&dir.path().join("absent.toml"), env(&[])).unwrap();
        assert!(config.llm.kind.is_empty());
        assert_eq!(config.llm.provider_kind().unwrap(), ProviderKind::OpenAi);
    }

    #[test]
    fn test_unparsable_file_is_error() {
        let file = write_config("[llm\ntype = ");
        let err = DictConfig::load_from(file.path(), env(&[])).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"), "{err}");
    }

    #[test]
    fn test_invalid_type_rejected() {
        let file = write_config("[llm]\ntype = \"ollama\"\n");
        let err = DictConfig::load_from(file.path(), env(&[])).unwrap_err();
        assert_eq!(err.to_string(), "invalid llm.type: ollama");
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_config("[llm]\ntype = \"openai\"\nmodel = \"gpt-4o-mini\"\ntoken = \"file-token\"\n");
        let config = DictConfig::load_from(
            file.path(),
            env(&[
                ("DICT_BE_LLM_TYPE", "gemini"),
                ("DICT_BE_LLM_MODEL", "gemini-2.0-flash"),
                ("DICT_BE_LLM_TOKEN", "   "),
            ]),
        )
        .unwrap();
        assert_eq!(config.llm.kind, "gemini");
        assert_eq!(config.llm.model, "gemini-2.0-flash");
        assert_eq!(config.llm.token, "file-token");
    }

    #[test]
    fn test_expand_env_vars_allowlist() {
        let lookup = env(&[("OPENAI_API_KEY", "sk-1"), ("SECRET", "leak")]);
        assert_eq!(expand_env_vars("a=${OPENAI_API_KEY};", &lookup), "a=sk-1;");
        assert_eq!(expand_env_vars("b=${SECRET}", &lookup), "b=${SECRET}");
        assert_eq!(expand_env_vars("c=${GEMINI_API_KEY}", &lookup), "c=");
        assert_eq!(expand_env_vars("d=${OPEN", &lookup), "d=${OPEN");
        assert_eq!(
            expand_env_vars("${SECRET}${OPENAI_API_KEY}", &lookup),
            "${SECRET}sk-1"
        );
    }

    #[test]
    fn test_client_config_flag_overrides() {
        let llm = LlmConfig {
            kind: "anthropics".to_string(),
            url: String::new(),
            model: "claude-file".to_string(),
            token: "file-token".to_string(),
            version: String::new(),
            max_tokens: Some(512),
        };
        let overrides = LlmOverrides {
            model: Some("claude-flag".to_string()),
            url: Some(" ".to_string()),
            token: None,
        };
        let client = llm.client_config(&overrides).unwrap();
        assert_eq!(client.kind, ProviderKind::Anthropic);
        assert_eq!(client.base_url, "https://api.anthropic.com");
        assert_eq!(client.model, "claude-flag");
        assert_eq!(client.api_key, "file-token");
        assert_eq!(client.max_tokens, Some(512));
    }

    #[test]
    fn test_redacted_and_debug_hide_token() {
        let config = DictConfig {
            llm: LlmConfig {
                token: "sk-abcdefghijkl".to_string(),
                ..LlmConfig::default()
            },
        };
        assert_eq!(config.redacted().llm.token, "sk-...ijkl");
        assert!(!format!("{config:?}").contains("abcdefgh"));
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "(empty)");
        assert_eq!(mask_secret("short"), "***");
        assert_eq!(mask_secret("sk-ant-api03-abcdef"), "sk-...cdef");
    }

    #[test]
    fn test_resolve_path_expands_home() {
        let path = resolve_path(Some(Path::new("~/custom.toml")));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(path, home.join("custom.toml"));
        }
        assert_eq!(
            resolve_path(Some(Path::new("/etc/dict-be.toml"))),
            PathBuf::from("/etc/dict-be.toml")
        );
    }
}

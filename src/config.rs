//! Deployment settings and per-call policy resolution.
//!
//! ```toml
//! allow_sanitize = true
//! whitelist_file = "whitelist.json"
//!
//! [fields.logo]
//! whitelist = '{"svg": ["width", "height"], "rect": ["width", "height"]}'
//! sanitize = false
//! ```
//!
//! Field settings win over global ones, global ones over the built-in
//! whitelist. A whitelist that cannot be read or parsed is logged and replaced
//! by the built-in one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::policy::Policy;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Accept sanitized output instead of rejecting the upload.
    pub allow_sanitize: bool,
    /// Inline whitelist JSON.
    pub whitelist: Option<String>,
    /// Whitelist JSON file; relative paths resolve against the settings file.
    pub whitelist_file: Option<PathBuf>,
    pub fields: BTreeMap<String, FieldSettings>,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            allow_sanitize: true,
            whitelist: None,
            whitelist_file: None,
            fields: BTreeMap::new(),
            base_dir: None,
        }
    }
}

/// Overrides for a single upload field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldSettings {
    pub whitelist: Option<String>,
    pub whitelist_file: Option<PathBuf>,
    pub sanitize: Option<bool>,
}

impl Settings {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings = Self::from_toml(&text)?;
        settings.base_dir = path.parent().map(Path::to_path_buf);
        Ok(settings)
    }

    /// Replaces every global and field whitelist with `json`. Field
    /// `sanitize` flags are kept.
    pub fn override_whitelist(&mut self, json: impl Into<String>) {
        self.whitelist = Some(json.into());
        self.whitelist_file = None;
        for field in self.fields.values_mut() {
            field.whitelist = None;
            field.whitelist_file = None;
        }
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

/// Who is asking for a sanitize pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallContext {
    /// Upload field name, if the call is tied to one.
    pub field: Option<String>,
}

impl CallContext {
    pub fn for_field(name: impl Into<String>) -> Self {
        Self {
            field: Some(name.into()),
        }
    }
}

/// Everything the core needs for one call.
#[derive(Debug, Clone)]
pub struct ResolvedPolicy {
    pub policy: Policy,
    pub allow_sanitize: bool,
}

enum Source<'a> {
    Inline(&'a str),
    File(&'a Path),
}

pub fn resolve_policy(ctx: &CallContext, settings: &Settings) -> ResolvedPolicy {
    let field = ctx
        .field
        .as_deref()
        .and_then(|name| settings.fields.get(name));

    let source = field
        .and_then(|f| source_of(&f.whitelist, &f.whitelist_file))
        .or_else(|| source_of(&settings.whitelist, &settings.whitelist_file));

    let policy = match source {
        Some(Source::Inline(json)) => Policy::from_json_or_default(Some(json)),
        Some(Source::File(path)) => {
            let path = settings.resolve_path(path);
            match std::fs::read_to_string(&path) {
                Ok(json) => Policy::from_json_or_default(Some(&json)),
                Err(e) => {
                    log::warn!(
                        "Cannot read whitelist {}: {}, using built-in default",
                        path.display(),
                        e
                    );
                    Policy::builtin().clone()
                }
            }
        }
        None => Policy::builtin().clone(),
    };

    let allow_sanitize = field
        .and_then(|f| f.sanitize)
        .unwrap_or(settings.allow_sanitize);

    ResolvedPolicy {
        policy,
        allow_sanitize,
    }
}

fn source_of<'a>(inline: &'a Option<String>, file: &'a Option<PathBuf>) -> Option<Source<'a>> {
    match (inline, file) {
        (Some(json), _) => Some(Source::Inline(json)),
        (None, Some(path)) => Some(Source::File(path)),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SETTINGS: &str = r#"
allow_sanitize = true
whitelist = '{"svg": ["width"], "rect": ["width"]}'

[fields.logo]
whitelist = '{"svg": [], "circle": ["r"]}'
sanitize = false

[fields.banner]
sanitize = false

[fields.icon]
whitelist = '{broken'
"#;

    #[test]
    fn test_defaults_without_settings() {
        let resolved = resolve_policy(&CallContext::default(), &Settings::default());
        assert!(resolved.allow_sanitize);
        assert!(resolved.policy.allows_element("linearGradient"));
    }

    #[test]
    fn test_global_whitelist_applies_without_field() {
        let settings = Settings::from_toml(SETTINGS).unwrap();
        let resolved = resolve_policy(&CallContext::default(), &settings);
        assert!(resolved.policy.allows_element("rect"));
        assert!(!resolved.policy.allows_element("circle"));
        assert!(resolved.allow_sanitize);
    }

    #[test]
    fn test_field_overrides_whitelist_and_sanitize() {
        let settings = Settings::from_toml(SETTINGS).unwrap();
        let resolved = resolve_policy(&CallContext::for_field("logo"), &settings);
        assert!(resolved.policy.allows_element("circle"));
        assert!(!resolved.policy.allows_element("rect"));
        assert!(!resolved.allow_sanitize);
    }

    #[test]
    fn test_field_without_whitelist_falls_back_to_global() {
        let settings = Settings::from_toml(SETTINGS).unwrap();
        let resolved = resolve_policy(&CallContext::for_field("banner"), &settings);
        assert!(resolved.policy.allows_element("rect"));
        assert!(!resolved.allow_sanitize);

        let resolved = resolve_policy(&CallContext::for_field("unknown"), &settings);
        assert!(resolved.policy.allows_element("rect"));
        assert!(resolved.allow_sanitize);
    }

    #[test]
    fn test_broken_whitelist_falls_back_to_builtin() {
        let settings = Settings::from_toml(SETTINGS).unwrap();
        let resolved = resolve_policy(&CallContext::for_field("icon"), &settings);
        assert!(resolved.policy.allows_element("linearGradient"));
    }

    #[test]
    fn test_whitelist_file_relative_to_settings() {
        let dir = tempfile::tempdir().unwrap();
        let mut wl = std::fs::File::create(dir.path().join("wl.json")).unwrap();
        wl.write_all(br#"{"svg": [], "ellipse": ["rx"]}"#).unwrap();
        let settings_path = dir.path().join("svg-guard.toml");
        std::fs::write(&settings_path, "whitelist_file = \"wl.json\"\n").unwrap();

        let settings = Settings::load(&settings_path).unwrap();
        let resolved = resolve_policy(&CallContext::default(), &settings);
        assert!(resolved.policy.allows_element("ellipse"));
        assert!(!resolved.policy.allows_element("rect"));
    }

    #[test]
    fn test_override_replaces_file_whitelists_of_loaded_settings() {
        let dir = tempfile::tempdir().unwrap();
        let settings_path = dir.path().join("svg-guard.toml");
        std::fs::write(
            &settings_path,
            "whitelist_file = \"wl.json\"\n[fields.logo]\nwhitelist_file = \"logo.json\"\nsanitize = false\n",
        )
        .unwrap();

        let mut settings = Settings::load(&settings_path).unwrap();
        settings.override_whitelist(r#"{"svg": [], "polygon": ["points"]}"#);
        for ctx in [CallContext::default(), CallContext::for_field("logo")] {
            let resolved = resolve_policy(&ctx, &settings);
            assert!(resolved.policy.allows_element("polygon"));
            assert!(!resolved.policy.allows_element("rect"));
        }
        assert!(!resolve_policy(&CallContext::for_field("logo"), &settings).allow_sanitize);
    }

    #[test]
    fn test_missing_whitelist_file_falls_back_to_builtin() {
        let settings = Settings::from_toml("whitelist_file = \"/nonexistent/wl.json\"").unwrap();
        let resolved = resolve_policy(&CallContext::default(), &settings);
        assert!(resolved.policy.allows_element("svg"));
        assert!(resolved.policy.allows_element("rect"));
    }

    #[test]
    fn test_rejects_unknown_settings() {
        assert!(matches!(
            Settings::from_toml("allow_sanitise = true"),
            Err(ConfigError::Toml(_))
        ));
        assert!(matches!(
            Settings::load(Path::new("/nonexistent/svg-guard.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}

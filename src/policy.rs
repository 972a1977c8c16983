//! Immutable whitelist deciding which elements, attributes and values survive.
//!
//! A policy is loaded from a JSON mapping of element name to allowed
//! attribute names. Keys starting with `@` are reserved:
//!
//! - `@schemes`: allowed URI schemes; `data:<media-type>` narrows `data:` URIs
//! - `@namespaces`: namespace URIs allowed in `xmlns` declarations
//! - `@patterns`: attribute name to a regular expression its value must match
//!
//! ```
//! use svg_guard::Policy;
//!
//! let policy = Policy::from_json(r#"{"svg": ["width"], "@schemes": ["https"]}"#).unwrap();
//! assert!(policy.allows_attribute("svg", "width"));
//! assert!(!policy.allows_element("script"));
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::PolicyLoadError;

const BUILTIN_WHITELIST: &str = include_str!("whitelist.json");

const SCHEMES_KEY: &str = "@schemes";
const NAMESPACES_KEY: &str = "@namespaces";
const PATTERNS_KEY: &str = "@patterns";

/// Schemes used when a whitelist does not list its own.
const DEFAULT_SCHEMES: &[&str] = &["http", "https", "mailto"];

/// Namespaces used when a whitelist does not list its own.
const DEFAULT_NAMESPACES: &[&str] = &[
    "http://www.w3.org/2000/svg",
    "http://www.w3.org/1999/xlink",
    "http://www.w3.org/XML/1998/namespace",
];

/// Schemes that execute code. Never allowed, whatever the whitelist says.
const FORBIDDEN_SCHEMES: &[&str] = &["javascript", "vbscript", "livescript"];

/// Attributes whose whole value is a URI reference.
const URI_ATTRIBUTES: &[&str] = &["href", "xlink:href", "src", "action", "formaction"];

/// Animation attributes that can assign a URI to another attribute.
const ANIMATION_VALUE_ATTRIBUTES: &[&str] = &["from", "to", "by", "values"];

/// Substrings that make a CSS fragment unsafe, checked after lowercasing and
/// removing whitespace and comments.
const CSS_DENYLIST: &[&str] = &[
    "expression(",
    "javascript:",
    "vbscript:",
    "livescript:",
    "-moz-binding",
    "behavior:",
    "@import",
    "\\",
];

#[derive(Debug, Clone)]
pub struct Policy {
    elements: BTreeMap<String, BTreeSet<String>>,
    schemes: BTreeSet<String>,
    namespaces: BTreeSet<String>,
    patterns: BTreeMap<String, Regex>,
}

impl Policy {
    /// The embedded default whitelist, parsed once per process.
    pub fn builtin() -> &'static Policy {
        static BUILTIN: OnceLock<Policy> = OnceLock::new();
        BUILTIN.get_or_init(|| {
            Policy::from_json(BUILTIN_WHITELIST).expect("embedded whitelist.json is valid")
        })
    }

    pub fn from_json(json: &str) -> Result<Self, PolicyLoadError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(&value)
    }

    /// Like [`Policy::from_json`], but falls back to [`Policy::builtin`] when
    /// no whitelist is given or it cannot be loaded.
    pub fn from_json_or_default(json: Option<&str>) -> Self {
        match json.map(Self::from_json) {
            Some(Ok(policy)) => policy,
            Some(Err(e)) => {
                log::warn!("Ignoring whitelist, using built-in default: {}", e);
                Self::builtin().clone()
            }
            None => Self::builtin().clone(),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, PolicyLoadError> {
        let map = value
            .as_object()
            .ok_or_else(|| PolicyLoadError::Shape("top level must be an object".into()))?;

        let mut elements = BTreeMap::new();
        let mut schemes = None;
        let mut namespaces = None;
        let mut patterns = BTreeMap::new();

        for (key, entry) in map {
            match key.as_str() {
                SCHEMES_KEY => schemes = Some(string_set(key, entry)?),
                NAMESPACES_KEY => namespaces = Some(string_set(key, entry)?),
                PATTERNS_KEY => patterns = compile_patterns(entry)?,
                reserved if reserved.starts_with('@') => {
                    return Err(PolicyLoadError::Shape(format!(
                        "unknown reserved key `{}`",
                        reserved
                    )))
                }
                element => {
                    elements.insert(element.to_string(), string_set(key, entry)?);
                }
            }
        }

        if elements.is_empty() {
            return Err(PolicyLoadError::Shape("whitelist allows no elements".into()));
        }

        let mut schemes = schemes
            .unwrap_or_else(|| DEFAULT_SCHEMES.iter().map(|s| s.to_string()).collect());
        schemes = schemes
            .into_iter()
            .map(|s| s.trim().trim_end_matches(':').to_ascii_lowercase())
            .filter(|s| {
                let scheme = s.split(':').next().unwrap_or_default();
                if FORBIDDEN_SCHEMES.contains(&scheme) {
                    log::warn!("Whitelist lists forbidden scheme `{}`, ignoring it", s);
                    return false;
                }
                !s.is_empty()
            })
            .collect();

        let namespaces = namespaces
            .unwrap_or_else(|| DEFAULT_NAMESPACES.iter().map(|s| s.to_string()).collect());

        Ok(Self {
            elements,
            schemes,
            namespaces,
            patterns,
        })
    }

    /// Serializes the policy back into the whitelist document format.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (element, attrs) in &self.elements {
            map.insert(element.clone(), Value::from_iter(attrs.iter().cloned()));
        }
        map.insert(
            SCHEMES_KEY.to_string(),
            Value::from_iter(self.schemes.iter().cloned()),
        );
        map.insert(
            NAMESPACES_KEY.to_string(),
            Value::from_iter(self.namespaces.iter().cloned()),
        );
        if !self.patterns.is_empty() {
            let patterns: Map<String, Value> = self
                .patterns
                .iter()
                .map(|(attr, re)| (attr.clone(), Value::from(re.as_str())))
                .collect();
            map.insert(PATTERNS_KEY.to_string(), Value::Object(patterns));
        }
        Value::Object(map)
    }

    pub fn allows_element(&self, name: &str) -> bool {
        self.elements.contains_key(name)
    }

    pub fn allows_attribute(&self, element: &str, attr: &str) -> bool {
        self.elements
            .get(element)
            .is_some_and(|attrs| attrs.contains(attr))
    }

    pub fn allows_namespace(&self, uri: &str) -> bool {
        self.namespaces.contains(uri.trim())
    }

    /// Checks the value of an attribute that is already allowed by name.
    pub fn validate_value(&self, element: &str, attr: &str, value: &str) -> bool {
        if is_event_handler(attr) {
            return false;
        }

        if URI_ATTRIBUTES.contains(&attr) {
            let fragment_only = local_name(element) == "use";
            if !self.check_uri_ref(value, fragment_only) {
                return false;
            }
        }

        if ANIMATION_VALUE_ATTRIBUTES.contains(&attr)
            && !value.split(';').all(|part| self.check_uri(part))
        {
            return false;
        }

        if (attr == "style" || value.to_ascii_lowercase().contains("url("))
            && !self.check_css(value)
        {
            return false;
        }

        match self.patterns.get(attr) {
            Some(re) => re.is_match(value),
            None => true,
        }
    }

    /// True if `value` is a fragment, a relative reference, or uses an
    /// allowed scheme.
    pub fn check_uri(&self, value: &str) -> bool {
        self.check_uri_ref(value, false)
    }

    fn check_uri_ref(&self, value: &str, fragment_only: bool) -> bool {
        let uri: String = value
            .chars()
            .filter(|c| !c.is_whitespace() && !c.is_control())
            .collect::<String>()
            .to_lowercase();

        if uri.is_empty() || uri.starts_with('#') {
            return true;
        }
        if fragment_only {
            return false;
        }

        let scheme = match uri.find([':', '/', '?', '#']) {
            Some(i) if uri[i..].starts_with(':') => &uri[..i],
            _ => return true,
        };
        if !is_scheme_name(scheme) {
            return false;
        }
        if self.schemes.contains(scheme) {
            return true;
        }
        if scheme == "data" {
            let rest = &uri["data:".len()..];
            let end = rest.find([';', ',']).unwrap_or(rest.len());
            return self.schemes.contains(&format!("data:{}", &rest[..end]));
        }
        false
    }

    /// True if a CSS fragment (a `style` attribute, a `<style>` element body
    /// or a presentation value with `url()`) contains nothing executable and
    /// only references allowed URIs.
    pub fn check_css(&self, css: &str) -> bool {
        let lower = css.to_lowercase();
        let uncommented = css_comment_re().replace_all(&lower, "");
        let compact: String = uncommented.chars().filter(|c| !c.is_whitespace()).collect();

        if CSS_DENYLIST.iter().any(|bad| compact.contains(bad)) {
            return false;
        }

        css_url_re().captures_iter(&compact).all(|caps| {
            let target = caps
                .get(1)
                .map(|m| m.as_str().trim_matches(|c| c == '"' || c == '\''))
                .unwrap_or_default();
            self.check_uri(target)
        })
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::builtin().clone()
    }
}

fn string_set(key: &str, value: &Value) -> Result<BTreeSet<String>, PolicyLoadError> {
    let items = value
        .as_array()
        .ok_or_else(|| PolicyLoadError::Shape(format!("`{}` must be an array of strings", key)))?;
    items
        .iter()
        .map(|item| {
            item.as_str().map(str::to_string).ok_or_else(|| {
                PolicyLoadError::Shape(format!("`{}` must contain only strings", key))
            })
        })
        .collect()
}

fn compile_patterns(value: &Value) -> Result<BTreeMap<String, Regex>, PolicyLoadError> {
    let map = value.as_object().ok_or_else(|| {
        PolicyLoadError::Shape(format!("`{}` must map attribute names to patterns", PATTERNS_KEY))
    })?;
    let mut patterns = BTreeMap::new();
    for (attr, pattern) in map {
        let pattern = pattern.as_str().ok_or_else(|| {
            PolicyLoadError::Shape(format!("pattern for `{}` must be a string", attr))
        })?;
        let re = Regex::new(pattern).map_err(|source| PolicyLoadError::Pattern {
            attribute: attr.clone(),
            source,
        })?;
        patterns.insert(attr.clone(), re);
    }
    Ok(patterns)
}

/// `onload`, `onClick`, `svg:onerror`, ...
fn is_event_handler(attr: &str) -> bool {
    let lower = local_name(attr).to_ascii_lowercase();
    lower.starts_with("on") && lower.len() > 2
}

fn is_scheme_name(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

fn css_comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid regex"))
}

fn css_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"url\(([^)]*)\)?").expect("valid regex"))
}

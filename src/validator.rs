//! Upload validation on top of the sanitizer.
//!
//! The sanitizer always rewrites. Whether a rewritten file is acceptable is
//! decided here from the resolved `allow_sanitize` flag.

use std::path::Path;

use crate::config::{resolve_policy, CallContext, Settings};
use crate::error::{Error, MalformedMarkupError};
use crate::parser::ParseLimits;
use crate::sanitizer::{Sanitized, Sanitizer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Nothing had to be removed.
    Valid,
    /// Unsafe content was removed and sanitization is permitted.
    Sanitized,
    /// Unparseable, or unsafe while sanitization is not permitted.
    Invalid(String),
}

impl Verdict {
    /// Maps a sanitize result onto a verdict.
    pub fn from_result(result: &Result<Sanitized, MalformedMarkupError>, allow_sanitize: bool) -> Self {
        match result {
            Err(e) => Verdict::Invalid(e.to_string()),
            Ok(out) if !out.changed() => Verdict::Valid,
            Ok(_) if allow_sanitize => Verdict::Sanitized,
            Ok(out) => Verdict::Invalid(format!(
                "SVG contains {} disallowed item(s) and sanitization is disabled",
                out.changes.total()
            )),
        }
    }

    pub fn is_accepted(&self) -> bool {
        !matches!(self, Verdict::Invalid(_))
    }
}

/// Verdict plus the bytes to keep, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub verdict: Verdict,
    /// Present for `Valid` and `Sanitized`.
    pub output: Option<Vec<u8>>,
}

pub struct SvgValidator {
    settings: Settings,
    limits: ParseLimits,
}

impl SvgValidator {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            limits: ParseLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: ParseLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn check(&self, input: &[u8], ctx: &CallContext) -> Outcome {
        let resolved = resolve_policy(ctx, &self.settings);
        let result = Sanitizer::new(&resolved.policy)
            .with_limits(self.limits)
            .sanitize(input);
        let verdict = Verdict::from_result(&result, resolved.allow_sanitize);

        match &verdict {
            Verdict::Valid => log::info!("SVG is valid"),
            Verdict::Sanitized => log::info!("SVG was sanitized"),
            Verdict::Invalid(reason) => log::warn!("SVG rejected: {}", reason),
        }

        let output = match result {
            Ok(out) if verdict.is_accepted() => Some(out.bytes),
            _ => None,
        };
        Outcome { verdict, output }
    }

    /// Checks a file on disk and rewrites it in place when it was sanitized.
    /// Invalid files are left untouched.
    pub fn validate_file(&self, path: &Path, ctx: &CallContext) -> Result<Verdict, Error> {
        let input = std::fs::read(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let outcome = self.check(&input, ctx);
        if let (Verdict::Sanitized, Some(bytes)) = (&outcome.verdict, &outcome.output) {
            std::fs::write(path, bytes).map_err(|source| Error::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
        Ok(outcome.verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(toml: &str) -> SvgValidator {
        SvgValidator::new(Settings::from_toml(toml).unwrap())
    }

    #[test]
    fn test_clean_file_is_valid() {
        let v = validator("");
        let input = br#"<svg width="10"><rect width="1"/></svg>"#;
        let outcome = v.check(input, &CallContext::default());
        assert_eq!(outcome.verdict, Verdict::Valid);
        assert_eq!(outcome.output.as_deref(), Some(&input[..]));
    }

    #[test]
    fn test_unsafe_file_sanitized_when_allowed() {
        let v = validator("allow_sanitize = true");
        let outcome = v.check(br#"<svg onload="x"/>"#, &CallContext::default());
        assert_eq!(outcome.verdict, Verdict::Sanitized);
        assert_eq!(outcome.output.as_deref(), Some(&b"<svg/>"[..]));
    }

    #[test]
    fn test_unsafe_file_invalid_when_sanitize_disabled() {
        let v = validator("allow_sanitize = false");
        let outcome = v.check(br#"<svg onload="x"/>"#, &CallContext::default());
        assert!(matches!(outcome.verdict, Verdict::Invalid(_)));
        assert!(outcome.output.is_none());
    }

    #[test]
    fn test_field_sanitize_override() {
        let v = validator("allow_sanitize = true\n[fields.logo]\nsanitize = false\n");
        let ctx = CallContext::for_field("logo");
        assert!(!v.check(br#"<svg onload="x"/>"#, &ctx).verdict.is_accepted());
        let ctx = CallContext::for_field("other");
        assert!(v.check(br#"<svg onload="x"/>"#, &ctx).verdict.is_accepted());
    }

    #[test]
    fn test_malformed_file_invalid() {
        let v = validator("");
        let outcome = v.check(b"<svg>", &CallContext::default());
        match outcome.verdict {
            Verdict::Invalid(reason) => assert!(reason.contains("unclosed")),
            other => panic!("unexpected verdict {:?}", other),
        }
        assert!(outcome.output.is_none());
    }

    #[test]
    fn test_validate_file_rewrites_sanitized_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logo.svg");
        std::fs::write(&path, br#"<svg><script>alert(1)</script></svg>"#).unwrap();

        let v = validator("");
        let verdict = v.validate_file(&path, &CallContext::default()).unwrap();
        assert_eq!(verdict, Verdict::Sanitized);
        assert_eq!(std::fs::read(&path).unwrap(), b"<svg/>");
    }

    #[test]
    fn test_validate_file_leaves_rejected_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logo.svg");
        let original = br#"<svg><script>alert(1)</script></svg>"#;
        std::fs::write(&path, original).unwrap();

        let v = validator("allow_sanitize = false");
        let verdict = v.validate_file(&path, &CallContext::default()).unwrap();
        assert!(!verdict.is_accepted());
        assert_eq!(std::fs::read(&path).unwrap(), original.to_vec());
    }

    #[test]
    fn test_validate_file_reports_io_errors() {
        let v = validator("");
        let err = v
            .validate_file(Path::new("/nonexistent/x.svg"), &CallContext::default())
            .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}

//! Parse, rewrite and serialize in one call.
//!
//! ```
//! use svg_guard::{sanitize, Policy};
//!
//! let out = sanitize(br#"<svg><script>alert(1)</script></svg>"#, Policy::builtin()).unwrap();
//! assert!(out.changed());
//! assert_eq!(out.bytes, b"<svg/>");
//! ```
//!
//! Each stage consumes the previous one, so a document is parsed, rewritten
//! and serialized exactly once per call.

use crate::document::Document;
use crate::error::MalformedMarkupError;
use crate::parser::{self, ParseLimits};
use crate::policy::Policy;
use crate::rewriter::{self, ChangeRecord};
use crate::serializer;

/// Output of a successful pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    pub bytes: Vec<u8>,
    pub changes: ChangeRecord,
}

impl Sanitized {
    /// True if anything was removed.
    pub fn changed(&self) -> bool {
        self.changes.is_changed()
    }
}

/// A parsed document that has not been rewritten yet.
#[derive(Debug)]
pub struct Parsed {
    document: Document,
}

impl Parsed {
    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn rewrite(mut self, policy: &Policy) -> Result<Rewritten, MalformedMarkupError> {
        let changes = rewriter::rewrite(&mut self.document, policy);
        if self.document.root().is_none() {
            return Err(MalformedMarkupError::new(
                0,
                "root element is not permitted by the whitelist",
            ));
        }
        Ok(Rewritten {
            document: self.document,
            changes,
        })
    }
}

/// A pruned document waiting to be serialized.
#[derive(Debug)]
pub struct Rewritten {
    document: Document,
    changes: ChangeRecord,
}

impl Rewritten {
    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn changes(&self) -> ChangeRecord {
        self.changes
    }

    pub fn serialize(self) -> Sanitized {
        Sanitized {
            bytes: serializer::serialize(&self.document),
            changes: self.changes,
        }
    }
}

/// Reusable pipeline configuration. Holds no per-document state.
#[derive(Debug, Clone, Copy)]
pub struct Sanitizer<'p> {
    policy: &'p Policy,
    limits: ParseLimits,
}

impl<'p> Sanitizer<'p> {
    pub fn new(policy: &'p Policy) -> Self {
        Self {
            policy,
            limits: ParseLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: ParseLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn policy(&self) -> &'p Policy {
        self.policy
    }

    pub fn parse(&self, input: &[u8]) -> Result<Parsed, MalformedMarkupError> {
        let document = parser::parse_with_limits(input, &self.limits)?;
        Ok(Parsed { document })
    }

    pub fn sanitize(&self, input: &[u8]) -> Result<Sanitized, MalformedMarkupError> {
        let sanitized = self.parse(input)?.rewrite(self.policy)?.serialize();
        if sanitized.changed() {
            let c = &sanitized.changes;
            log::debug!(
                "Sanitized SVG: {} elements, {} attributes, {} comments, {} instructions, {} doctypes removed",
                c.elements_removed,
                c.attributes_removed,
                c.comments_removed,
                c.instructions_removed,
                c.doctypes_removed
            );
        }
        Ok(sanitized)
    }
}

/// Sanitizes `input` against `policy` with default limits.
pub fn sanitize(input: &[u8], policy: &Policy) -> Result<Sanitized, MalformedMarkupError> {
    Sanitizer::new(policy).sanitize(input)
}

//! Whitelist-based SVG sanitizer.
//!
//! Untrusted SVG is parsed into an owned tree, pruned against an immutable
//! [`Policy`], and written back out with strict escaping. Anything the policy
//! does not name is removed: scripts, event handlers, `javascript:` and
//! unlisted `data:` URIs, `foreignObject`, comments, doctypes.
//!
//! ```
//! use svg_guard::{sanitize, Policy};
//!
//! let dirty = br#"<svg><rect onclick="evil()" width="10"/></svg>"#;
//! let clean = sanitize(dirty, Policy::builtin()).unwrap();
//! assert!(clean.changed());
//! assert_eq!(clean.bytes, br#"<svg><rect width="10"/></svg>"#);
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod parser;
pub mod policy;
pub mod rewriter;
pub mod sanitizer;
pub mod serializer;
pub mod validator;


pub use config::{resolve_policy, CallContext, ResolvedPolicy, Settings};
pub use document::{Attribute, Document, Element, Node};
pub use error::{ConfigError, Error, MalformedMarkupError, PolicyLoadError};
pub use parser::{parse, ParseLimits};
pub use policy::Policy;
pub use rewriter::{rewrite, ChangeRecord};
pub use sanitizer::{sanitize, Sanitized, Sanitizer};
pub use serializer::serialize;
pub use validator::{Outcome, SvgValidator, Verdict};

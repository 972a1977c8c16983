//! Owned markup tree produced by the parser and consumed by the rewriter and
//! serializer. A document lives for a single sanitize call.

/// `<?xml ...?>` declaration as it appeared in the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub version: String,
    pub encoding: Option<String>,
    pub standalone: Option<String>,
}

impl Default for Declaration {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            encoding: None,
            standalone: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Qualified name, e.g. `width` or `xlink:href`.
    pub name: String,
    /// Unescaped value.
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn local_name(&self) -> &str {
        split_qname(&self.name).1
    }

    pub fn prefix(&self) -> Option<&str> {
        split_qname(&self.name).0
    }

    /// `xmlns` or `xmlns:*`.
    pub fn is_namespace_declaration(&self) -> bool {
        self.name == "xmlns" || self.prefix() == Some("xmlns")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn local_name(&self) -> &str {
        split_qname(&self.name).1
    }

    pub fn prefix(&self) -> Option<&str> {
        split_qname(&self.name).0
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Concatenated text and CDATA content of the direct children.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            match child {
                Node::Text(t) | Node::CData(t) => out.push_str(t),
                _ => {}
            }
        }
        out
    }

    /// Iterates over child elements, skipping text and other nodes.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction(String),
    /// Raw doctype content. Never interpreted.
    DocType(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub declaration: Option<Declaration>,
    pub nodes: Vec<Node>,
}

impl Document {
    /// The single top-level element, if it is still present.
    pub fn root(&self) -> Option<&Element> {
        self.nodes.iter().find_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn root_mut(&mut self) -> Option<&mut Element> {
        self.nodes.iter_mut().find_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }
}

fn split_qname(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

/// `NCName` or `NCName:NCName`, per Namespaces in XML.
pub fn is_qname(name: &str) -> bool {
    match name.split_once(':') {
        Some((prefix, local)) => is_ncname(prefix) && is_ncname(local),
        None => is_ncname(name),
    }
}

/// An XML `Name` without colons.
pub fn is_ncname(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if is_name_start_char(c) => chars.all(is_name_char),
        _ => false,
    }
}

fn is_name_start_char(c: char) -> bool {
    matches!(c,
        'A'..='Z' | '_' | 'a'..='z'
        | '\u{C0}'..='\u{D6}'
        | '\u{D8}'..='\u{F6}'
        | '\u{F8}'..='\u{2FF}'
        | '\u{370}'..='\u{37D}'
        | '\u{37F}'..='\u{1FFF}'
        | '\u{200C}'..='\u{200D}'
        | '\u{2070}'..='\u{218F}'
        | '\u{2C00}'..='\u{2FEF}'
        | '\u{3001}'..='\u{D7FF}'
        | '\u{F900}'..='\u{FDCF}'
        | '\u{FDF0}'..='\u{FFFD}'
        | '\u{10000}'..='\u{EFFFF}')
}

fn is_name_char(c: char) -> bool {
    is_name_start_char(c)
        || matches!(c,
            '-' | '.' | '0'..='9' | '\u{B7}'
            | '\u{300}'..='\u{36F}'
            | '\u{203F}'..='\u{2040}')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_names_split_on_colon() {
        let attr = Attribute::new("xlink:href", "#a");
        assert_eq!(attr.prefix(), Some("xlink"));
        assert_eq!(attr.local_name(), "href");

        let el = Element::new("rect");
        assert_eq!(el.prefix(), None);
        assert_eq!(el.local_name(), "rect");
    }

    #[test]
    fn namespace_declarations_are_recognised() {
        assert!(Attribute::new("xmlns", "http://www.w3.org/2000/svg").is_namespace_declaration());
        assert!(Attribute::new("xmlns:xlink", "x").is_namespace_declaration());
        assert!(!Attribute::new("xml:space", "preserve").is_namespace_declaration());
    }

    #[test]
    fn qualified_name_syntax() {
        for good in ["svg", "xlink:href", "xmlns:x", "_a.b-c", "d\u{e9}j\u{e0}"] {
            assert!(is_qname(good), "{}", good);
        }
        for bad in ["", "xmlns:", ":a", "x:y:z", "x/onload", "a<b", "1a", "a b", "-a"] {
            assert!(!is_qname(bad), "{}", bad);
        }
    }

    #[test]
    fn text_content_joins_text_and_cdata() {
        let mut el = Element::new("style");
        el.children.push(Node::Text("a ".into()));
        el.children.push(Node::Comment("skip".into()));
        el.children.push(Node::CData("b".into()));
        assert_eq!(el.text_content(), "a b");
    }

    #[test]
    fn root_skips_leading_non_elements() {
        let doc = Document {
            declaration: None,
            nodes: vec![
                Node::Comment("c".into()),
                Node::Element(Element::new("svg")),
            ],
        };
        assert_eq!(doc.root().map(|e| e.name.as_str()), Some("svg"));
    }
}

//! Bytes to [`Document`].
//!
//! The reader never looks inside `<!DOCTYPE>`, so no internal subset is
//! applied and no external entity is fetched. Only the predefined entities and
//! numeric character references are decoded; anything else is rejected.

use quick_xml::events::{BytesDecl, BytesStart, Event};
use quick_xml::reader::Reader;

use crate::document::{is_qname, Attribute, Declaration, Document, Element, Node};
use crate::error::MalformedMarkupError;

/// Bounds applied before and during parsing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParseLimits {
    /// Inputs longer than this are rejected without being tokenized.
    pub max_input_bytes: usize,
    /// Maximum element nesting depth.
    pub max_depth: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_input_bytes: 10 * 1024 * 1024,
            max_depth: 256,
        }
    }
}

/// Parse with [`ParseLimits::default`].
pub fn parse(input: &[u8]) -> Result<Document, MalformedMarkupError> {
    parse_with_limits(input, &ParseLimits::default())
}

pub fn parse_with_limits(
    input: &[u8],
    limits: &ParseLimits,
) -> Result<Document, MalformedMarkupError> {
    if input.len() > limits.max_input_bytes {
        return Err(MalformedMarkupError::new(
            0,
            format!(
                "input is {} bytes, limit is {}",
                input.len(),
                limits.max_input_bytes
            ),
        ));
    }

    let text = std::str::from_utf8(input).map_err(|e| {
        MalformedMarkupError::new(e.valid_up_to() as u64, "input is not valid UTF-8")
    })?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(false);

    let mut doc = Document::default();
    let mut stack: Vec<Element> = Vec::new();
    let mut has_root = false;

    loop {
        let event = reader.read_event().map_err(|e| {
            MalformedMarkupError::new(reader.buffer_position() as u64, e.to_string())
        })?;
        let pos = reader.buffer_position() as u64;

        match event {
            Event::Eof => break,
            Event::Decl(ref d) => {
                if doc.declaration.is_some() || has_root || !doc.nodes.is_empty() {
                    return Err(MalformedMarkupError::new(pos, "misplaced XML declaration"));
                }
                doc.declaration = Some(read_declaration(d, pos)?);
            }
            Event::Start(ref e) => {
                if stack.len() >= limits.max_depth {
                    return Err(MalformedMarkupError::new(
                        pos,
                        format!("elements nested deeper than {}", limits.max_depth),
                    ));
                }
                let element = read_element(e, pos)?;
                if stack.is_empty() && has_root {
                    return Err(MalformedMarkupError::new(pos, "more than one root element"));
                }
                stack.push(element);
            }
            Event::Empty(ref e) => {
                if stack.len() >= limits.max_depth {
                    return Err(MalformedMarkupError::new(
                        pos,
                        format!("elements nested deeper than {}", limits.max_depth),
                    ));
                }
                let element = read_element(e, pos)?;
                attach(&mut doc, &mut stack, &mut has_root, Node::Element(element), pos)?;
            }
            Event::End(ref e) => {
                let qname = e.name();
                let name = decode(qname.as_ref(), pos)?;
                let element = match stack.pop() {
                    Some(el) if el.name == name => el,
                    Some(el) => {
                        return Err(MalformedMarkupError::new(
                            pos,
                            format!("expected </{}>, found </{}>", el.name, name),
                        ))
                    }
                    None => {
                        return Err(MalformedMarkupError::new(
                            pos,
                            format!("unmatched end tag </{}>", name),
                        ))
                    }
                };
                attach(&mut doc, &mut stack, &mut has_root, Node::Element(element), pos)?;
            }
            Event::Text(e) => {
                let content = e.unescape().map_err(|err| {
                    MalformedMarkupError::new(pos, format!("bad character data: {}", err))
                })?;
                if content.is_empty() {
                    continue;
                }
                check_chars(&content, pos)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(Node::Text(content.into_owned())),
                    None if content.trim().is_empty() => {}
                    None => {
                        return Err(MalformedMarkupError::new(
                            pos,
                            "character data outside the root element",
                        ))
                    }
                }
            }
            Event::CData(e) => {
                let content = decode(&e.into_inner(), pos)?.to_string();
                check_chars(&content, pos)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(Node::CData(content)),
                    None => {
                        return Err(MalformedMarkupError::new(
                            pos,
                            "CDATA section outside the root element",
                        ))
                    }
                }
            }
            Event::Comment(e) => {
                let content = decode(&e.into_inner(), pos)?.to_string();
                attach(&mut doc, &mut stack, &mut has_root, Node::Comment(content), pos)?;
            }
            Event::PI(e) => {
                let content = format!(
                    "{}{}",
                    decode(e.target(), pos)?,
                    decode(e.content(), pos)?
                );
                attach(
                    &mut doc,
                    &mut stack,
                    &mut has_root,
                    Node::ProcessingInstruction(content),
                    pos,
                )?;
            }
            Event::DocType(e) => {
                if !stack.is_empty() || has_root {
                    return Err(MalformedMarkupError::new(pos, "misplaced doctype"));
                }
                let content = decode(&e.into_inner(), pos)?.to_string();
                doc.nodes.push(Node::DocType(content));
            }
        }
    }

    let end = reader.buffer_position() as u64;
    if let Some(open) = stack.last() {
        return Err(MalformedMarkupError::new(
            end,
            format!("unclosed element <{}>", open.name),
        ));
    }
    if !has_root {
        return Err(MalformedMarkupError::new(end, "no root element"));
    }

    Ok(doc)
}

fn attach(
    doc: &mut Document,
    stack: &mut [Element],
    has_root: &mut bool,
    node: Node,
    pos: u64,
) -> Result<(), MalformedMarkupError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
        return Ok(());
    }
    if let Node::Element(_) = node {
        if *has_root {
            return Err(MalformedMarkupError::new(pos, "more than one root element"));
        }
        *has_root = true;
    }
    doc.nodes.push(node);
    Ok(())
}

fn read_element(e: &BytesStart<'_>, pos: u64) -> Result<Element, MalformedMarkupError> {
    let qname = e.name();
    let mut element = Element::new(checked_name(qname.as_ref(), pos)?);
    for attr in e.attributes() {
        let attr = attr
            .map_err(|err| MalformedMarkupError::new(pos, format!("bad attribute: {}", err)))?;
        let name = checked_name(attr.key.as_ref(), pos)?.to_string();
        let value = attr.unescape_value().map_err(|err| {
            MalformedMarkupError::new(pos, format!("bad value for `{}`: {}", name, err))
        })?;
        check_chars(&value, pos)?;
        element.attributes.push(Attribute::new(name, value.into_owned()));
    }
    Ok(element)
}

fn read_declaration(d: &BytesDecl<'_>, pos: u64) -> Result<Declaration, MalformedMarkupError> {
    let bad = |err: quick_xml::Error| {
        MalformedMarkupError::new(pos, format!("bad XML declaration: {}", err))
    };
    let version = decode(&d.version().map_err(bad)?, pos)?.to_string();
    let encoding = match d.encoding() {
        Some(enc) => Some(decode(&enc.map_err(bad)?, pos)?.to_string()),
        None => None,
    };
    let standalone = match d.standalone() {
        Some(sa) => Some(decode(&sa.map_err(bad)?, pos)?.to_string()),
        None => None,
    };
    Ok(Declaration {
        version,
        encoding,
        standalone,
    })
}

/// The reader splits names on whitespace and `=` only; the rest of the
/// `QName` grammar is enforced here.
fn checked_name(bytes: &[u8], pos: u64) -> Result<&str, MalformedMarkupError> {
    let name = decode(bytes, pos)?;
    if !is_qname(name) {
        return Err(MalformedMarkupError::new(
            pos,
            format!("`{}` is not a valid name", name),
        ));
    }
    Ok(name)
}

fn decode(bytes: &[u8], pos: u64) -> Result<&str, MalformedMarkupError> {
    std::str::from_utf8(bytes).map_err(|_| MalformedMarkupError::new(pos, "invalid UTF-8"))
}

/// Rejects characters outside the XML 1.0 `Char` production.
fn check_chars(s: &str, pos: u64) -> Result<(), MalformedMarkupError> {
    match s.chars().find(|&c| !is_xml_char(c)) {
        Some(c) => Err(MalformedMarkupError::new(
            pos,
            format!("character U+{:04X} is not allowed in XML", c as u32),
        )),
        None => Ok(()),
    }
}

fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\t' | '\n' | '\r'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(input: &str) -> Element {
        let doc = parse(input.as_bytes()).unwrap();
        doc.root().unwrap().clone()
    }

    #[test]
    fn test_parses_nested_elements_in_order() {
        let el = root(r#"<svg><g id="a"><rect width="1"/><circle r="2"/></g></svg>"#);
        assert_eq!(el.name, "svg");
        let g = el.child_elements().next().unwrap();
        let names: Vec<_> = g.child_elements().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["rect", "circle"]);
    }

    #[test]
    fn test_preserves_attribute_order_and_qualified_names() {
        let el = root(r##"<svg xmlns:xlink="http://www.w3.org/1999/xlink" z="1" a="2" xlink:href="#x"/>"##);
        let names: Vec<_> = el.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["xmlns:xlink", "z", "a", "xlink:href"]);
    }

    #[test]
    fn test_decodes_predefined_entities_and_char_refs() {
        let el = root(r#"<svg title="a &amp; &#106;s"><text>&lt;b&gt;</text></svg>"#);
        assert_eq!(el.attribute("title"), Some("a & js"));
        let text = el.child_elements().next().unwrap();
        assert_eq!(text.text_content(), "<b>");
    }

    #[test]
    fn test_keeps_declaration_and_doctype() {
        let doc = parse(
            br#"<?xml version="1.0" encoding="UTF-8" standalone="no"?>
<!DOCTYPE svg PUBLIC "-//W3C//DTD SVG 1.1//EN" "http://www.w3.org/Graphics/SVG/1.1/DTD/svg11.dtd">
<svg/>"#,
        )
        .unwrap();
        let decl = doc.declaration.as_ref().unwrap();
        assert_eq!(decl.version, "1.0");
        assert_eq!(decl.encoding.as_deref(), Some("UTF-8"));
        assert_eq!(decl.standalone.as_deref(), Some("no"));
        assert!(matches!(doc.nodes[0], Node::DocType(_)));
        assert_eq!(doc.nodes.len(), 2);
    }

    #[test]
    fn test_rejects_unclosed_root() {
        let err = parse(b"<svg><rect/>").unwrap_err();
        assert!(err.reason.contains("unclosed"), "{}", err);
    }

    #[test]
    fn test_rejects_mismatched_end_tag() {
        assert!(parse(b"<svg><g></svg></g>").is_err());
    }

    #[test]
    fn test_rejects_stray_end_tag() {
        assert!(parse(b"<svg/></g>").is_err());
    }

    #[test]
    fn test_rejects_multiple_roots() {
        let err = parse(b"<svg/><svg/>").unwrap_err();
        assert!(err.reason.contains("more than one root"));
    }

    #[test]
    fn test_rejects_missing_root() {
        assert!(parse(b"").is_err());
        assert!(parse(b"<!-- only a comment -->").is_err());
    }

    #[test]
    fn test_rejects_text_outside_root() {
        assert!(parse(b"junk<svg/>").is_err());
        assert!(parse(b"  \n<svg/>\n").is_ok());
    }

    #[test]
    fn test_rejects_duplicate_attributes() {
        assert!(parse(br#"<svg a="1" a="2"/>"#).is_err());
    }

    #[test]
    fn test_rejects_invalid_names() {
        for input in [
            r#"<svg xmlns:x/onload="http://www.w3.org/2000/svg"/>"#,
            r#"<svg xmlns:a<b="http://www.w3.org/2000/svg"/>"#,
            r#"<svg xmlns:="http://www.w3.org/2000/svg"/>"#,
            r#"<svg xmlns:x:y="http://www.w3.org/2000/svg"/>"#,
            r#"<svg><x:y:z/></svg>"#,
            r#"<svg 1a="b"/>"#,
        ] {
            let err = parse(input.as_bytes()).unwrap_err();
            assert!(err.reason.contains("not a valid name"), "{}: {}", input, err);
        }
    }

    #[test]
    fn test_rejects_undeclared_entities() {
        let input = br#"<?xml version="1.0"?>
<!DOCTYPE svg [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<svg><text>&xxe;</text></svg>"#;
        assert!(parse(input).is_err());
    }

    #[test]
    fn test_rejects_invalid_utf8() {
        let err = parse(b"<svg>\xff</svg>").unwrap_err();
        assert!(err.reason.contains("UTF-8"));
    }

    #[test]
    fn test_rejects_control_characters() {
        assert!(parse(b"<svg>\x01</svg>").is_err());
        assert!(parse(b"<svg a=\"\x08\"/>").is_err());
    }

    #[test]
    fn test_skips_byte_order_mark() {
        let doc = parse("\u{feff}<svg/>".as_bytes()).unwrap();
        assert_eq!(doc.root().unwrap().name, "svg");
    }

    #[test]
    fn test_enforces_depth_limit() {
        let limits = ParseLimits {
            max_depth: 3,
            ..ParseLimits::default()
        };
        assert!(parse_with_limits(b"<a><b><c/></b></a>", &limits).is_ok());
        let err = parse_with_limits(b"<a><b><c><d/></c></b></a>", &limits).unwrap_err();
        assert!(err.reason.contains("nested deeper"));
    }

    #[test]
    fn test_enforces_size_limit() {
        let limits = ParseLimits {
            max_input_bytes: 8,
            ..ParseLimits::default()
        };
        assert!(parse_with_limits(b"<svg></svg>", &limits).is_err());
    }

    #[test]
    fn test_keeps_whitespace_inside_elements() {
        let el = root("<svg>\n  <g/>\n</svg>");
        assert_eq!(el.children.len(), 3);
        assert_eq!(el.children[0], Node::Text("\n  ".into()));
    }
}

//! [`Document`] back to bytes.
//!
//! Escaping is done here rather than by the writer so that attribute values
//! also escape quotes, tabs and line breaks. Every value reads back exactly as
//! it was written, and no value can end its quoted string early.

use std::borrow::Cow;
use std::io::{self, Write};

use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::writer::Writer;

use crate::document::{Document, Element, Node};

/// Serializes into memory.
pub fn serialize(doc: &Document) -> Vec<u8> {
    write_document(doc, Vec::new()).expect("writing to a Vec cannot fail")
}

/// Serializes into `out` and hands it back.
pub fn write_document<W: Write>(doc: &Document, out: W) -> io::Result<W> {
    let mut writer = Writer::new(out);

    if let Some(decl) = &doc.declaration {
        let encoding = decl.encoding.as_ref().map(|_| "UTF-8");
        emit(
            &mut writer,
            Event::Decl(BytesDecl::new(&decl.version, encoding, decl.standalone.as_deref())),
        )?;
        writer.get_mut().write_all(b"\n")?;
    }

    for (i, node) in doc.nodes.iter().enumerate() {
        if i > 0 {
            writer.get_mut().write_all(b"\n")?;
        }
        write_node(&mut writer, node)?;
    }

    Ok(writer.into_inner())
}

fn write_node<W: Write>(writer: &mut Writer<W>, node: &Node) -> io::Result<()> {
    match node {
        Node::Element(el) => write_element(writer, el),
        Node::Text(text) => emit(
            writer,
            Event::Text(BytesText::from_escaped(escape_text(text))),
        ),
        Node::CData(data) => {
            for section in cdata_sections(data) {
                emit(writer, Event::CData(BytesCData::new(section)))?;
            }
            Ok(())
        }
        Node::Comment(text) => emit(
            writer,
            Event::Comment(BytesText::from_escaped(escape_comment(text))),
        ),
        Node::ProcessingInstruction(body) => {
            writer.get_mut().write_all(b"<?")?;
            writer.get_mut().write_all(escape_instruction(body).as_bytes())?;
            writer.get_mut().write_all(b"?>")
        }
        Node::DocType(body) => {
            writer.get_mut().write_all(b"<!DOCTYPE ")?;
            writer.get_mut().write_all(body.trim().as_bytes())?;
            writer.get_mut().write_all(b">")
        }
    }
}

fn write_element<W: Write>(writer: &mut Writer<W>, el: &Element) -> io::Result<()> {
    let mut content = String::with_capacity(el.name.len() + 16 * el.attributes.len());
    content.push_str(&el.name);
    for attr in &el.attributes {
        content.push(' ');
        content.push_str(&attr.name);
        content.push_str("=\"");
        content.push_str(&escape_attribute(&attr.value));
        content.push('"');
    }
    let start = BytesStart::from_content(content, el.name.len());

    if el.children.is_empty() {
        return emit(writer, Event::Empty(start));
    }

    emit(writer, Event::Start(start))?;
    for child in &el.children {
        write_node(writer, child)?;
    }
    emit(writer, Event::End(BytesEnd::new(el.name.as_str())))
}

fn emit<W: Write>(writer: &mut Writer<W>, event: Event<'_>) -> io::Result<()> {
    writer
        .write_event(event)
        .map_err(|e| io::Error::other(e.to_string()))
}

fn escape_text(text: &str) -> Cow<'_, str> {
    escape(text, |c| match c {
        '&' => Some("&amp;"),
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        '\r' => Some("&#13;"),
        _ => None,
    })
}

fn escape_attribute(value: &str) -> Cow<'_, str> {
    escape(value, |c| match c {
        '&' => Some("&amp;"),
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        '"' => Some("&quot;"),
        '\'' => Some("&apos;"),
        '\t' => Some("&#9;"),
        '\n' => Some("&#10;"),
        '\r' => Some("&#13;"),
        _ => None,
    })
}

/// Comments cannot escape anything; break up `--` so the comment cannot end
/// early.
fn escape_comment(text: &str) -> Cow<'_, str> {
    if text.contains("--") || text.ends_with('-') {
        let mut out = text.replace("--", "- -");
        if out.ends_with('-') {
            out.push(' ');
        }
        Cow::Owned(out)
    } else {
        Cow::Borrowed(text)
    }
}

/// Splits `]]>` across two sections: `a]]>b` becomes `a]]` and `>b`.
fn cdata_sections(data: &str) -> Vec<&str> {
    let mut sections = Vec::new();
    let mut rest = data;
    while let Some(i) = rest.find("]]>") {
        sections.push(&rest[..i + 2]);
        rest = &rest[i + 2..];
    }
    sections.push(rest);
    sections
}

/// An instruction body has no escapes either; `?>` would end it early.
fn escape_instruction(body: &str) -> Cow<'_, str> {
    if body.contains("?>") {
        Cow::Owned(body.replace("?>", "? >"))
    } else {
        Cow::Borrowed(body)
    }
}

fn escape(input: &str, replacement: impl Fn(char) -> Option<&'static str>) -> Cow<'_, str> {
    let Some(first) = input.find(|c| replacement(c).is_some()) else {
        return Cow::Borrowed(input);
    };
    let mut out = String::with_capacity(input.len() + 8);
    out.push_str(&input[..first]);
    for c in input[first..].chars() {
        match replacement(c) {
            Some(esc) => out.push_str(esc),
            None => out.push(c),
        }
    }
    Cow::Owned(out)
}

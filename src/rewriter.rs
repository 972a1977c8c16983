//! In-place, default-deny pruning of a parsed document.

use crate::document::{is_ncname, is_qname, Attribute, Document, Element, Node};
use crate::policy::Policy;

/// What a rewrite pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeRecord {
    pub elements_removed: usize,
    pub attributes_removed: usize,
    pub comments_removed: usize,
    pub instructions_removed: usize,
    pub doctypes_removed: usize,
}

impl ChangeRecord {
    pub fn is_changed(&self) -> bool {
        self.total() > 0
    }

    pub fn total(&self) -> usize {
        self.elements_removed
            + self.attributes_removed
            + self.comments_removed
            + self.instructions_removed
            + self.doctypes_removed
    }
}

/// Removes every element, attribute and value the policy does not allow,
/// plus all comments, processing instructions and doctypes. Never fails.
pub fn rewrite(doc: &mut Document, policy: &Policy) -> ChangeRecord {
    let mut changes = ChangeRecord::default();
    let mut scope = Vec::new();
    doc.nodes
        .retain_mut(|node| keep_node(node, policy, &mut scope, &mut changes));
    changes
}

fn keep_node(
    node: &mut Node,
    policy: &Policy,
    scope: &mut Vec<String>,
    changes: &mut ChangeRecord,
) -> bool {
    match node {
        Node::Element(el) => keep_element(el, policy, scope, changes),
        Node::Text(_) | Node::CData(_) => true,
        Node::Comment(_) => {
            changes.comments_removed += 1;
            false
        }
        Node::ProcessingInstruction(_) => {
            changes.instructions_removed += 1;
            false
        }
        Node::DocType(_) => {
            log::debug!("Removed doctype");
            changes.doctypes_removed += 1;
            false
        }
    }
}

/// `scope` holds the namespace prefixes declared by surviving ancestors.
fn keep_element(
    el: &mut Element,
    policy: &Policy,
    scope: &mut Vec<String>,
    changes: &mut ChangeRecord,
) -> bool {
    if !is_qname(&el.name) || !policy.allows_element(&el.name) {
        log::debug!("Removed <{}> and its subtree", el.name);
        changes.elements_removed += 1;
        return false;
    }

    let outer = scope.len();
    scope.extend(
        el.attributes
            .iter()
            .filter(|a| a.prefix() == Some("xmlns") && keep_namespace_declaration(a, policy))
            .map(|a| a.local_name().to_string()),
    );

    if !prefix_in_scope(el.prefix(), scope) {
        log::debug!("Removed <{}>: undeclared namespace prefix", el.name);
        changes.elements_removed += 1;
        scope.truncate(outer);
        return false;
    }

    let before = el.attributes.len();
    el.attributes.retain(|attr| {
        let keep = keep_attribute(&el.name, attr, policy, &scope[..]);
        if !keep {
            log::debug!("Removed attribute `{}` from <{}>", attr.name, el.name);
        }
        keep
    });
    changes.attributes_removed += before - el.attributes.len();

    if el.local_name() == "style" && !policy.check_css(&el.text_content()) {
        log::debug!("Removed <{}> with unsafe CSS", el.name);
        changes.elements_removed += 1;
        scope.truncate(outer);
        return false;
    }

    el.children
        .retain_mut(|child| keep_node(child, policy, scope, changes));
    merge_adjacent_text(&mut el.children);
    scope.truncate(outer);
    true
}

fn keep_attribute(element: &str, attr: &Attribute, policy: &Policy, scope: &[String]) -> bool {
    if attr.is_namespace_declaration() {
        return keep_namespace_declaration(attr, policy);
    }
    is_qname(&attr.name)
        && prefix_in_scope(attr.prefix(), scope)
        && policy.allows_attribute(element, &attr.name)
        && policy.validate_value(element, &attr.name, &attr.value)
}

/// `xmlns` or `xmlns:<NCName>` bound to an allowed URI. The `xmlns` prefix
/// itself can never be redeclared.
fn keep_namespace_declaration(attr: &Attribute, policy: &Policy) -> bool {
    let name_ok = attr.name == "xmlns"
        || (is_ncname(attr.local_name()) && attr.local_name() != "xmlns");
    name_ok && policy.allows_namespace(&attr.value)
}

fn prefix_in_scope(prefix: Option<&str>, scope: &[String]) -> bool {
    match prefix {
        None | Some("xml") => true,
        Some(p) => scope.iter().any(|s| s == p),
    }
}

/// Removing a comment can leave two text nodes side by side; a re-parse
/// would read them as one, so join them now.
fn merge_adjacent_text(children: &mut Vec<Node>) {
    if children.len() < 2 {
        return;
    }
    let mut merged: Vec<Node> = Vec::with_capacity(children.len());
    for node in children.drain(..) {
        if let (Node::Text(next), Some(Node::Text(prev))) = (&node, merged.last_mut()) {
            prev.push_str(next);
            continue;
        }
        merged.push(node);
    }
    *children = merged;
}

//! Python language structure builder using tree-sitter

use super::{LanguageBuilder, SIGNATURE, construct_body, header, node_text};
use crate::parser_pool::FileType;
use anyhow::Result;
use arbor_core::{Handle, Property, StructureHelper};
use tree_sitter::Node;

/// Decorator expressions of a decorated definition, without the `@`.
pub const DECORATORS: Property<Vec<String>> = Property::new("decorators");

pub struct PythonBuilder;

impl LanguageBuilder for PythonBuilder {
    fn file_type(&self) -> FileType {
        FileType::Python
    }

    fn build(&self, file: &Handle, root: Node<'_>, source: &str, helper: &mut StructureHelper<'_>) -> Result<()> {
        build_block(file, root, source, helper);
        Ok(())
    }
}

fn build_block(parent: &Handle, block: Node<'_>, source: &str, helper: &mut StructureHelper<'_>) {
    let mut cursor = block.walk();
    for statement in block.named_children(&mut cursor) {
        let (definition, outer) = match statement.kind() {
            "decorated_definition" => match statement.child_by_field_name("definition") {
                Some(definition) => (definition, statement),
                None => continue,
            },
            _ => (statement, statement),
        };
        let kind = match definition.kind() {
            "function_definition" => "function",
            "class_definition" => "class",
            _ => continue,
        };
        let Some(name_node) = definition.child_by_field_name("name") else {
            continue;
        };

        let body_node = definition.child_by_field_name("body");
        let mut body = construct_body(outer, name_node);
        body.set(&SIGNATURE, header(definition, body_node, source, &[':']));
        let decorators = decorators(outer, source);
        if !decorators.is_empty() {
            body.set(&DECORATORS, decorators);
        }
        let handle = helper.push_child(parent, parent.construct(kind, node_text(name_node, source)), body);

        if kind == "class" {
            if let Some(class_body) = body_node {
                build_block(&handle, class_body, source, helper);
            }
        }
    }
}

fn decorators(outer: Node<'_>, source: &str) -> Vec<String> {
    if outer.kind() != "decorated_definition" {
        return Vec::new();
    }
    let mut cursor = outer.walk();
    outer
        .named_children(&mut cursor)
        .filter(|child| child.kind() == "decorator")
        .map(|decorator| node_text(decorator, source).trim_start_matches('@').trim().to_string())
        .collect()
}

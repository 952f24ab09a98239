//! Rust language structure builder using tree-sitter

use super::{LanguageBuilder, SIGNATURE, VISIBILITY, construct_body, header, node_text, normalized};
use crate::parser_pool::FileType;
use anyhow::Result;
use arbor_core::{Handle, StructureHelper};
use tree_sitter::Node;

pub struct RustBuilder;

impl LanguageBuilder for RustBuilder {
    fn file_type(&self) -> FileType {
        FileType::Rust
    }

    fn build(&self, file: &Handle, root: Node<'_>, source: &str, helper: &mut StructureHelper<'_>) -> Result<()> {
        build_items(file, root, source, helper);
        Ok(())
    }
}

fn build_items(parent: &Handle, container: Node<'_>, source: &str, helper: &mut StructureHelper<'_>) {
    let mut cursor = container.walk();
    for item in container.named_children(&mut cursor) {
        build_item(parent, item, source, helper);
    }
}

fn build_item(parent: &Handle, item: Node<'_>, source: &str, helper: &mut StructureHelper<'_>) {
    let kind = match item.kind() {
        "function_item" | "function_signature_item" => {
            let params = parameter_types(item, source);
            declare_named(parent, item, "fn", params, source, helper);
            return;
        }
        "struct_item" => "struct",
        "union_item" => "union",
        "const_item" => "const",
        "static_item" => "static",
        "type_item" => "type",
        "macro_definition" => "macro",
        "enum_item" => {
            let Some(handle) = declare_named(parent, item, "enum", Vec::new(), source, helper) else {
                return;
            };
            if let Some(body) = item.child_by_field_name("body") {
                let mut cursor = body.walk();
                for variant in body.named_children(&mut cursor) {
                    if variant.kind() == "enum_variant" {
                        declare_named(&handle, variant, "variant", Vec::new(), source, helper);
                    }
                }
            }
            return;
        }
        "trait_item" | "mod_item" => {
            let kind = if item.kind() == "trait_item" { "trait" } else { "mod" };
            let Some(handle) = declare_named(parent, item, kind, Vec::new(), source, helper) else {
                return;
            };
            if let Some(body) = item.child_by_field_name("body") {
                build_items(&handle, body, source, helper);
            }
            return;
        }
        "impl_item" => {
            build_impl(parent, item, source, helper);
            return;
        }
        _ => return,
    };
    declare_named(parent, item, kind, Vec::new(), source, helper);
}

/// `impl Type` is named `Type`, `impl Trait for Type` is named `Trait for Type`.
fn build_impl(parent: &Handle, item: Node<'_>, source: &str, helper: &mut StructureHelper<'_>) {
    let Some(self_type) = item.child_by_field_name("type") else {
        return;
    };
    let name = match item.child_by_field_name("trait") {
        Some(trait_node) => format!(
            "{} for {}",
            normalized(node_text(trait_node, source)),
            normalized(node_text(self_type, source))
        ),
        None => normalized(node_text(self_type, source)),
    };
    let handle = declare(parent, item, self_type, &name, "impl", Vec::new(), source, helper);
    if let Some(body) = item.child_by_field_name("body") {
        build_items(&handle, body, source, helper);
    }
}

fn declare_named(
    parent: &Handle,
    item: Node<'_>,
    kind: &str,
    params: Vec<String>,
    source: &str,
    helper: &mut StructureHelper<'_>,
) -> Option<Handle> {
    let name_node = item.child_by_field_name("name")?;
    let name = node_text(name_node, source);
    Some(declare(parent, item, name_node, name, kind, params, source, helper))
}

#[allow(clippy::too_many_arguments)]
fn declare(
    parent: &Handle,
    item: Node<'_>,
    name_node: Node<'_>,
    name: &str,
    kind: &str,
    params: Vec<String>,
    source: &str,
    helper: &mut StructureHelper<'_>,
) -> Handle {
    let mut body = construct_body(item, name_node);
    if let Some(visibility) = visibility(item, source) {
        body.set(&VISIBILITY, visibility);
    }
    body.set(&SIGNATURE, header(item, item.child_by_field_name("body"), source, &[';', ',']));
    helper.push_child(parent, parent.construct_with_params(kind, name, params), body)
}

fn visibility(item: Node<'_>, source: &str) -> Option<String> {
    let mut cursor = item.walk();
    let modifier = item
        .children(&mut cursor)
        .find(|child| child.kind() == "visibility_modifier")?;
    Some(normalized(node_text(modifier, source)))
}

/// Parameter types, `self` receivers included as written.
fn parameter_types(function: Node<'_>, source: &str) -> Vec<String> {
    let Some(parameters) = function.child_by_field_name("parameters") else {
        return Vec::new();
    };
    let mut cursor = parameters.walk();
    parameters
        .named_children(&mut cursor)
        .filter_map(|param| match param.kind() {
            "parameter" => param
                .child_by_field_name("type")
                .map(|ty| normalized(node_text(ty, source))),
            "self_parameter" => Some(normalized(node_text(param, source))),
            "variadic_parameter" => Some("...".to_string()),
            _ => None,
        })
        .collect()
}

//! Language structure builders for different programming languages

pub mod python;
pub mod rust;

use crate::parser_pool::FileType;
use anyhow::Result;
use arbor_core::{Body, Handle, Property, StructureHelper, TextRange};
use std::path::Path;
use tree_sitter::Node;

/// Declared visibility, e.g. `pub(crate)`. Absent for private items.
pub const VISIBILITY: Property<String> = Property::new("visibility");

/// Declaration header with whitespace collapsed, e.g. `pub fn parse(input: &str) -> Ast`.
pub const SIGNATURE: Property<String> = Property::new("signature");

/// Trait for language-specific structure builders
pub trait LanguageBuilder: Send + Sync {
    fn file_type(&self) -> FileType;

    /// Add the constructs found under `root` as descendants of `file`.
    fn build(&self, file: &Handle, root: Node<'_>, source: &str, helper: &mut StructureHelper<'_>) -> Result<()>;
}

/// Get the appropriate builder for a file based on its extension
pub fn get_builder(path: &Path) -> Option<Box<dyn LanguageBuilder>> {
    match FileType::from_path(path)? {
        FileType::Rust => Some(Box::new(rust::RustBuilder)),
        FileType::Python => Some(Box::new(python::PythonBuilder)),
    }
}

pub fn is_supported_path(path: &Path) -> bool {
    FileType::from_path(path).is_some()
}

pub(crate) fn node_text<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    node.utf8_text(source.as_bytes()).unwrap_or_default()
}

pub(crate) fn node_range(node: Node<'_>) -> TextRange {
    TextRange::new(node.start_byte(), node.end_byte() - node.start_byte())
}

/// Source body spanning `outer`, identified by `name`.
pub(crate) fn construct_body(outer: Node<'_>, name: Node<'_>) -> Body {
    let mut body = Body::new_source();
    body.set_full_range(node_range(outer));
    body.set_identifying_range(node_range(name));
    body
}

/// Text of `node` up to the start of `body`, whitespace collapsed and
/// trailing `terminators` removed.
pub(crate) fn header(node: Node<'_>, body: Option<Node<'_>>, source: &str, terminators: &[char]) -> String {
    let end = body.map_or(node.end_byte(), |b| b.start_byte());
    let text = source.get(node.start_byte()..end).unwrap_or_default();
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim_end_matches(terminators).trim_end().to_string()
}

/// Collapse whitespace inside a type or parameter for use in a handle key.
pub(crate) fn normalized(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::parser_pool::FileType;
    use arbor_core::NewElements;
    use tree_sitter::Parser;

    /// Run `builder` over `source` as the content of a file `name`.
    pub(crate) fn build(builder: &dyn LanguageBuilder, name: &str, source: &str) -> (Handle, NewElements) {
        let mut parser = Parser::new();
        parser.set_language(&builder.file_type().language()).unwrap();
        let tree = parser.parse(source, None).unwrap();

        let file = Handle::root("/ws").project("p").source_file(name);
        let mut elements = NewElements::new();
        elements.insert(file.clone(), Body::new_source());
        let mut helper = StructureHelper::new(&mut elements);
        builder.build(&file, tree.root_node(), source, &mut helper).unwrap();
        helper.complete();
        (file, elements)
    }

    /// Children of `handle` rendered as display strings.
    pub(crate) fn child_names(elements: &NewElements, handle: &Handle) -> Vec<String> {
        elements
            .get(handle)
            .map(|body| body.children().iter().map(|child| child.to_string()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_get_builder() {
        assert_eq!(get_builder(Path::new("lib.rs")).unwrap().file_type(), FileType::Rust);
        assert_eq!(get_builder(Path::new("app.py")).unwrap().file_type(), FileType::Python);
        assert!(get_builder(Path::new("index.ts")).is_none());
        assert!(!is_supported_path(Path::new("notes.txt")));
    }
}

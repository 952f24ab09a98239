//! Tree-sitter structure builders and workspace walking for the Arbor model

pub mod config;
pub mod languages;
pub mod parser_pool;
pub mod workspace;

#[cfg(test)]
pub mod tests;

pub use config::{CONFIG_FILE, build_excludes, load_config};
pub use languages::{LanguageBuilder, SIGNATURE, VISIBILITY, get_builder};
pub use parser_pool::{FileType, ParseRequest, ParserPool, create_parser_pool};
pub use workspace::{PROJECT_KIND, WorkspaceBuilder, WorkspaceType, detect_workspace, project_handles};

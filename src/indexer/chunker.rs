use tree_sitter::{Node, Parser};
use uuid::Uuid;

use crate::model::{ChunkDocType, CodeChunk};

#[derive(Debug, thiserror::Error)]
pub enum ChunkerError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("parser initialization failed")]
    ParserInit,
}

/// Node kinds per language whose text becomes its own chunk. Anything not
/// covered (loose top-level statements, trailing comments) is swept up by
/// the line-based fallback so no source text silently disappears.
fn top_level_item_kinds(language: &str) -> &'static [&'static str] {
    match language {
        "rust" => &[
            "function_item",
            "struct_item",
            "enum_item",
            "impl_item",
            "trait_item",
            "mod_item",
            "macro_definition",
        ],
        "python" => &["function_definition", "class_definition", "decorated_definition"],
        "javascript" | "typescript" => &[
            "function_declaration",
            "class_declaration",
            "method_definition",
            "lexical_declaration",
            "export_statement",
        ],
        _ => &[],
    }
}

fn build_parser(language: &str) -> Result<Parser, ChunkerError> {
    let mut parser = Parser::new();
    let lang = match language {
        "rust" => tree_sitter_rust::LANGUAGE.into(),
        "python" => tree_sitter_python::LANGUAGE.into(),
        "javascript" => tree_sitter_javascript::LANGUAGE.into(),
        "typescript" => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        other => return Err(ChunkerError::UnsupportedLanguage(other.to_string())),
    };
    parser
        .set_language(&lang)
        .map_err(|_| ChunkerError::ParserInit)?;
    Ok(parser)
}

/// Chunks `content` (already read from `relative_path`) into `CodeChunk`s.
/// Tries an AST-aware split for supported languages first; any language
/// without a registered grammar, or any source tree-sitter fails to parse,
/// falls back to fixed-size line chunking.
pub fn chunk_file(
    relative_path: &str,
    language: &str,
    content: &str,
    doc_type: ChunkDocType,
    max_chunk_lines: usize,
) -> Vec<CodeChunk> {
    if let Ok(mut parser) = build_parser(language) {
        if let Some(tree) = parser.parse(content, None) {
            if !tree.root_node().has_error() {
                let chunks = ast_chunks(relative_path, language, content, doc_type, &tree, max_chunk_lines);
                if !chunks.is_empty() {
                    return chunks;
                }
            }
        }
    }
    line_chunks(relative_path, language, content, doc_type, max_chunk_lines)
}

fn ast_chunks(
    relative_path: &str,
    language: &str,
    content: &str,
    doc_type: ChunkDocType,
    tree: &tree_sitter::Tree,
    max_chunk_lines: usize,
) -> Vec<CodeChunk> {
    let wanted_kinds = top_level_item_kinds(language);
    if wanted_kinds.is_empty() {
        return Vec::new();
    }
    let lines: Vec<&str> = content.lines().collect();
    let mut chunks = Vec::new();
    let mut cursor = tree.root_node().walk();

    for child in tree.root_node().children(&mut cursor) {
        if !wanted_kinds.contains(&child.kind()) {
            continue;
        }
        chunks.extend(chunk_from_node(
            relative_path,
            language,
            &lines,
            doc_type,
            &child,
            max_chunk_lines,
        ));
    }
    chunks
}

fn chunk_from_node(
    relative_path: &str,
    language: &str,
    lines: &[&str],
    doc_type: ChunkDocType,
    node: &Node,
    max_chunk_lines: usize,
) -> Vec<CodeChunk> {
    let start_line = node.start_position().row;
    let end_line = node.end_position().row;
    let span = end_line.saturating_sub(start_line) + 1;

    if span <= max_chunk_lines {
        let text = lines[start_line..=end_line.min(lines.len().saturating_sub(1))].join("\n");
        return vec![CodeChunk {
            id: Uuid::new_v4(),
            file_path: relative_path.to_string(),
            start_line: start_line + 1,
            end_line: end_line + 1,
            chunk_type: node.kind().to_string(),
            name: node_name(node, lines),
            content_hash: crate::hash::file_content_hash(text.as_bytes()),
            content: text,
            doc_type,
            language: language.to_string(),
        }];
    }

    // A single item larger than the budget (a long match arm, a big impl
    // block) gets split into fixed-size slices instead of being dropped.
    slice_lines(
        relative_path,
        language,
        lines,
        doc_type,
        start_line,
        end_line,
        max_chunk_lines,
        node.kind(),
    )
}

fn node_name(node: &Node, lines: &[&str]) -> Option<String> {
    let name_node = node.child_by_field_name("name")?;
    let row = name_node.start_position().row;
    let col_start = name_node.start_position().column;
    let col_end = name_node.end_position().column;
    lines
        .get(row)
        .and_then(|line| line.get(col_start..col_end))
        .map(|s| s.to_string())
}

fn line_chunks(
    relative_path: &str,
    language: &str,
    content: &str,
    doc_type: ChunkDocType,
    max_chunk_lines: usize,
) -> Vec<CodeChunk> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }
    slice_lines(
        relative_path,
        language,
        &lines,
        doc_type,
        0,
        lines.len() - 1,
        max_chunk_lines,
        "lines",
    )
}

#[allow(clippy::too_many_arguments)]
fn slice_lines(
    relative_path: &str,
    language: &str,
    lines: &[&str],
    doc_type: ChunkDocType,
    start_line: usize,
    end_line: usize,
    max_chunk_lines: usize,
    chunk_type: &str,
) -> Vec<CodeChunk> {
    let mut chunks = Vec::new();
    let mut cursor = start_line;
    while cursor <= end_line {
        let slice_end = (cursor + max_chunk_lines - 1).min(end_line).min(lines.len() - 1);
        let text = lines[cursor..=slice_end].join("\n");
        chunks.push(CodeChunk {
            id: Uuid::new_v4(),
            file_path: relative_path.to_string(),
            start_line: cursor + 1,
            end_line: slice_end + 1,
            chunk_type: chunk_type.to_string(),
            name: None,
            content_hash: crate::hash::file_content_hash(text.as_bytes()),
            content: text,
            doc_type,
            language: language.to_string(),
        });
        cursor = slice_end + 1;
    }
    chunks
}

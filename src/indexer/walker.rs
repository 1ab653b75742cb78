use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

use crate::model::ChunkDocType;

/// Directories the indexer never descends into regardless of `.gitignore`
/// content — build output and dependency trees that would otherwise bloat
/// the index with generated or vendored code.
const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    ".git", ".oak", "target", "node_modules", "dist", "build", ".venv", "__pycache__",
    ".next", "vendor",
];

#[derive(Debug, Clone)]
pub struct WalkedFile {
    pub path: PathBuf,
    pub relative_path: String,
    pub language: String,
    pub doc_type: ChunkDocType,
}

/// Walks `root`, honoring `.gitignore`/`.ignore` via the `ignore` crate and
/// additional user-provided glob excludes from `IndexerConfig::exclude`.
pub fn walk_project(root: &Path, extra_excludes: &[String]) -> Vec<WalkedFile> {
    let mut globset_builder = globset::GlobSetBuilder::new();
    for pattern in extra_excludes {
        if let Ok(glob) = globset::Glob::new(pattern) {
            globset_builder.add(glob);
        }
    }
    let extra = globset_builder.build().unwrap_or_else(|_| globset::GlobSet::empty());

    let mut builder = WalkBuilder::new(root);
    builder.hidden(false).git_ignore(true).git_exclude(true);
    for dir in DEFAULT_EXCLUDED_DIRS {
        let dir = (*dir).to_string();
        builder.filter_entry(move |entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| name != dir)
                .unwrap_or(true)
        });
    }

    let mut files = Vec::new();
    for entry in builder.build() {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        if extra.is_match(relative) {
            continue;
        }
        let relative_path = relative.to_string_lossy().replace('\\', "/");
        let Some(language) = language_for_path(path) else {
            continue;
        };
        let doc_type = classify_doc_type(&relative_path);
        files.push(WalkedFile {
            path: path.to_path_buf(),
            relative_path,
            language,
            doc_type,
        });
    }
    files
}

pub fn language_for_path(path: &Path) -> Option<String> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("rs") => Some("rust".into()),
        Some("py") => Some("python".into()),
        Some("js") | Some("jsx") | Some("mjs") | Some("cjs") => Some("javascript".into()),
        Some("ts") | Some("tsx") => Some("typescript".into()),
        Some("md") | Some("mdx") => Some("markdown".into()),
        Some("toml") | Some("yaml") | Some("yml") | Some("json") => Some("config".into()),
        _ => None,
    }
}

fn classify_doc_type(relative_path: &str) -> ChunkDocType {
    let lower = relative_path.to_ascii_lowercase();
    if lower.contains("/test") || lower.contains("test_") || lower.ends_with("_test.rs") {
        ChunkDocType::Tests
    } else if lower.ends_with(".md") || lower.ends_with(".mdx") || lower.starts_with("docs/") {
        ChunkDocType::Docs
    } else if lower.ends_with(".toml") || lower.ends_with(".yaml") || lower.ends_with(".yml") {
        ChunkDocType::Config
    } else if lower.contains("/generated/") || lower.contains(".g.") {
        ChunkDocType::Generated
    } else {
        ChunkDocType::Code
    }
}

//! Extension tables.
//!
//! Language tags are a cheap, extension-only guess. They feed search
//! scoring and project summaries, nothing more.

use std::path::Path;

/// Gets the language tag for a file extension.
///
/// Returns None if we don't recognize the extension.
pub fn language_for_extension(extension: &str) -> Option<&'static str> {
    let tag = match extension.to_lowercase().as_str() {
        // TypeScript and JavaScript
        "ts" | "tsx" | "mts" | "cts" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",

        "rs" => "rust",
        "py" | "pyi" => "python",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "c" | "h" => "c",
        "cpp" | "hpp" | "cc" | "hh" | "cxx" | "hxx" => "cpp",
        "cs" => "csharp",
        "dart" => "dart",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "ex" | "exs" => "elixir",
        "scala" => "scala",
        "lua" => "lua",
        "sh" | "bash" | "zsh" => "shell",

        // Markup and styles
        "html" | "htm" => "html",
        "css" | "scss" | "sass" | "less" => "css",
        "vue" => "vue",
        "svelte" => "svelte",
        "md" | "mdx" => "markdown",

        // Data and config
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "xml" => "xml",
        "sql" => "sql",

        _ => return None,
    };
    Some(tag)
}

/// Gets the language tag for a path from its extension.
pub fn language_for_path(path: &Path) -> Option<&'static str> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(language_for_extension)
}

/// Extensions treated as binary. Binary files are never indexed.
pub fn binary_extensions() -> &'static [&'static str] {
    &[
        "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "tiff", "psd", // images
        "mp3", "mp4", "mov", "avi", "mkv", "wav", "flac", "ogg", "webm", // media
        "zip", "tar", "gz", "tgz", "bz2", "xz", "7z", "rar", "jar", "war", // archives
        "exe", "dll", "so", "dylib", "a", "lib", "o", "obj", "class", "pyc", "wasm", // objects
        "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", // documents
        "ttf", "otf", "woff", "woff2", "eot", // fonts
        "db", "sqlite", "sqlite3", "bin", "dat",
    ]
}

/// Checks if an extension is one we treat as binary.
pub fn is_binary_extension(extension: &str) -> bool {
    let lower = extension.to_lowercase();
    binary_extensions().contains(&lower.as_str())
}

/// Checks if a path looks like a binary file from its extension.
pub fn is_binary_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(is_binary_extension)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_lookup_is_case_insensitive() {
        assert_eq!(language_for_extension("TS"), Some("typescript"));
        assert_eq!(language_for_path(Path::new("a/b/Main.JAVA")), Some("java"));
        assert_eq!(language_for_path(Path::new("Makefile")), None);
    }

    #[test]
    fn test_binary_detection() {
        assert!(is_binary_path(Path::new("logo.PNG")));
        assert!(is_binary_path(Path::new("archive.tar.gz")));
        assert!(!is_binary_path(Path::new("main.rs")));
        assert!(!is_binary_path(Path::new("README")));
    }
}

//! Project classification.
//!
//! Type and framework come from marker files at the workspace root,
//! checked in a fixed priority order where the first match wins. Language
//! counts, entry points and config files come from the indexed records.

use grove_core::FileRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Ecosystem a workspace belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProjectType {
    #[default]
    Unknown,
    Node,
    Rust,
    Go,
    Python,
    Java,
    Dart,
    Php,
    Ruby,
    Swift,
    Cpp,
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Node => "node",
            Self::Rust => "rust",
            Self::Go => "go",
            Self::Python => "python",
            Self::Java => "java",
            Self::Dart => "dart",
            Self::Php => "php",
            Self::Ruby => "ruby",
            Self::Swift => "swift",
            Self::Cpp => "cpp",
        };
        f.write_str(s)
    }
}

/// Derived summary of a workspace.
///
/// Always rebuilt as a whole from the current records; never patched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub project_type: ProjectType,
    pub framework: Option<String>,
    /// Languages ordered by file count, most common first.
    pub languages: Vec<String>,
    pub language_counts: BTreeMap<String, usize>,
    pub entry_points: Vec<PathBuf>,
    pub config_files: Vec<PathBuf>,
    pub total_files: usize,
    pub total_size: u64,
}

impl ProjectInfo {
    /// Returns a one-line summary suitable for CLI output.
    pub fn summary(&self) -> String {
        let framework = self
            .framework
            .as_deref()
            .map(|f| format!(" ({})", f))
            .unwrap_or_default();
        format!(
            "{}{} project, {} files, languages: {}",
            self.project_type,
            framework,
            self.total_files,
            if self.languages.is_empty() {
                "none".to_string()
            } else {
                self.languages.join(", ")
            }
        )
    }
}

/// Root markers in priority order.
const TYPE_MARKERS: &[(&str, ProjectType)] = &[
    ("package.json", ProjectType::Node),
    ("Cargo.toml", ProjectType::Rust),
    ("go.mod", ProjectType::Go),
    ("pyproject.toml", ProjectType::Python),
    ("requirements.txt", ProjectType::Python),
    ("setup.py", ProjectType::Python),
    ("Pipfile", ProjectType::Python),
    ("pom.xml", ProjectType::Java),
    ("build.gradle", ProjectType::Java),
    ("build.gradle.kts", ProjectType::Java),
    ("pubspec.yaml", ProjectType::Dart),
    ("composer.json", ProjectType::Php),
    ("Gemfile", ProjectType::Ruby),
    ("Package.swift", ProjectType::Swift),
    ("CMakeLists.txt", ProjectType::Cpp),
];

/// Framework markers in priority order.
const FRAMEWORK_MARKERS: &[(&str, &str)] = &[
    ("next.config.js", "next"),
    ("next.config.mjs", "next"),
    ("next.config.ts", "next"),
    ("nuxt.config.js", "nuxt"),
    ("nuxt.config.ts", "nuxt"),
    ("angular.json", "angular"),
    ("svelte.config.js", "svelte"),
    ("remix.config.js", "remix"),
    ("gatsby-config.js", "gatsby"),
    ("astro.config.mjs", "astro"),
    ("vite.config.js", "vite"),
    ("vite.config.ts", "vite"),
    ("manage.py", "django"),
    ("artisan", "laravel"),
    ("config/routes.rb", "rails"),
    ("Trunk.toml", "yew"),
    ("Dioxus.toml", "dioxus"),
];

/// package.json dependencies that name a framework, in priority order.
const NODE_FRAMEWORK_DEPS: &[(&str, &str)] = &[
    ("next", "next"),
    ("nuxt", "nuxt"),
    ("@angular/core", "angular"),
    ("svelte", "svelte"),
    ("react", "react"),
    ("vue", "vue"),
    ("express", "express"),
    ("fastify", "fastify"),
    ("electron", "electron"),
];

const ENTRY_POINT_NAMES: &[&str] = &[
    "main.rs", "lib.rs", "main.go", "main.py", "app.py", "__main__.py", "manage.py",
    "index.ts", "index.tsx", "index.js", "index.jsx", "main.ts", "main.tsx", "main.js",
    "app.ts", "app.tsx", "app.js", "server.ts", "server.js", "Main.java", "Application.java",
    "main.dart", "main.swift", "main.c", "main.cpp", "index.php",
];

const CONFIG_NAMES: &[&str] = &[
    "package.json", "tsconfig.json", "jsconfig.json", "Cargo.toml", "go.mod", "pyproject.toml",
    "requirements.txt", "setup.py", "setup.cfg", "Pipfile", "pom.xml", "build.gradle",
    "build.gradle.kts", "pubspec.yaml", "composer.json", "Gemfile", "Package.swift",
    "CMakeLists.txt", "Makefile", "Dockerfile", "docker-compose.yml", "docker-compose.yaml",
    ".env", ".editorconfig", ".gitignore", ".groveignore", "angular.json",
];

/// Returns true for manifest and tool configuration files.
pub fn is_config_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    CONFIG_NAMES.contains(&name)
        || name.contains(".config.")
        || (name.starts_with('.') && name.ends_with("rc"))
        || (name.starts_with('.') && name.contains("rc."))
}

/// Returns true for conventional program entry files.
pub fn is_entry_point(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |name| ENTRY_POINT_NAMES.contains(&name))
}

/// Detects type and framework from root markers alone.
pub fn detect_project_type(root: &Path) -> (ProjectType, Option<String>) {
    let project_type = TYPE_MARKERS
        .iter()
        .find(|(marker, _)| root.join(marker).is_file())
        .map(|(_, kind)| *kind)
        .unwrap_or_default();

    let framework = FRAMEWORK_MARKERS
        .iter()
        .find(|(marker, _)| root.join(marker).exists())
        .map(|(_, name)| name.to_string())
        .or_else(|| {
            if project_type == ProjectType::Node {
                framework_from_package_json(&root.join("package.json"))
            } else {
                None
            }
        });

    (project_type, framework)
}

fn framework_from_package_json(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let manifest: serde_json::Value = match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(e) => {
            debug!("Couldn't parse {}: {}", path.display(), e);
            return None;
        }
    };

    let has_dep = |name: &str| {
        ["dependencies", "devDependencies"]
            .iter()
            .any(|section| manifest.get(section).and_then(|deps| deps.get(name)).is_some())
    };

    NODE_FRAMEWORK_DEPS
        .iter()
        .find(|(dep, _)| has_dep(*dep))
        .map(|(_, name)| name.to_string())
}

/// Returns true if `dir` looks like the root of a project of its own.
pub fn looks_like_project_root(dir: &Path) -> bool {
    TYPE_MARKERS.iter().any(|(marker, _)| dir.join(marker).is_file())
}

/// Builds a [`ProjectInfo`] from root markers and the current records.
pub fn classify<'a, I>(root: &Path, records: I) -> ProjectInfo
where
    I: IntoIterator<Item = &'a FileRecord>,
{
    let (project_type, framework) = detect_project_type(root);
    let mut info = ProjectInfo {
        project_type,
        framework,
        ..Default::default()
    };

    for record in records {
        if record.is_dir {
            continue;
        }
        info.total_files += 1;
        info.total_size += record.size;
        if let Some(language) = &record.language {
            *info.language_counts.entry(language.clone()).or_insert(0) += 1;
        }
        if is_entry_point(&record.path) {
            info.entry_points.push(record.path.clone());
        }
        if is_config_file(&record.path) {
            info.config_files.push(record.path.clone());
        }
    }

    let mut languages: Vec<(&String, &usize)> = info.language_counts.iter().collect();
    languages.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    info.languages = languages.into_iter().map(|(name, _)| name.clone()).collect();
    info.entry_points.sort();
    info.config_files.sort();

    info
}

//! Project classification: static assets, manifest-driven app, or native target

use crate::config::DetectorConfig;
use crate::mount::normalize_path;
use previewkit_common::{FileRecord, ProjectClassification};
use serde::Deserialize;
use std::collections::BTreeMap;

/// The parts of a `package.json` the pipeline cares about
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, String>,
}

impl Manifest {
    /// Parse manifest text; malformed manifests yield `None`
    pub fn parse(content: &str) -> Option<Self> {
        match serde_json::from_str(content) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                tracing::debug!(error = %e, "manifest is not valid JSON");
                None
            }
        }
    }

    pub fn has_script(&self, name: &str) -> bool {
        self.scripts.contains_key(name)
    }

    /// Whether `name` appears in dependencies or devDependencies
    pub fn depends_on(&self, name: &str) -> bool {
        self.dependencies.contains_key(name) || self.dev_dependencies.contains_key(name)
    }

    /// Find and parse the manifest at `working_dir`
    pub fn find(files: &[FileRecord], working_dir: &str, manifest_name: &str) -> Option<Self> {
        let wanted = join_path(working_dir, manifest_name);
        files
            .iter()
            .rev()
            .find(|f| normalize_path(&f.path).ok().as_deref() == Some(wanted.as_str()))
            .and_then(|f| Manifest::parse(&f.content))
    }
}

/// Join a working directory and a relative path
pub fn join_path(dir: &str, path: &str) -> String {
    let dir = dir.trim_matches('/');
    if dir.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", dir, path)
    }
}

/// Classifies file sets.
///
/// Classification is a pure function of the file set and must run before
/// every mount, since later generations can change the answer.
#[derive(Debug, Clone, Default)]
pub struct ProjectTypeDetector {
    config: DetectorConfig,
}

impl ProjectTypeDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Classify a file set. Total: every input (including empty) maps to exactly one class.
    pub fn classify(&self, files: &[FileRecord]) -> ProjectClassification {
        let paths = self.candidate_paths(files);

        if self.has_native_markers(files) {
            let preview_dir = self.find_preview_subproject(&paths);
            tracing::debug!(preview_dir = ?preview_dir, "native project markers found");
            return ProjectClassification::UnsupportedNative(preview_dir);
        }

        match self.find_manifest_dir(&paths) {
            Some(dir) => ProjectClassification::Manifest(dir),
            None => ProjectClassification::Static,
        }
    }

    /// Whether any path or content signals a non-browser native target
    pub fn has_native_markers(&self, files: &[FileRecord]) -> bool {
        files.iter().any(|file| {
            let Ok(path) = normalize_path(&file.path) else {
                return false;
            };
            if is_dependency_dir(&path) {
                return false;
            }
            let name = file.file_name();

            if name == "app.json" {
                // plain app.json is common in web projects; only expo's counts
                if self.config.native_manifests.iter().any(|m| m == "app.json")
                    && (file.content.contains("\"expo\"")
                        || file.content.contains("\"react-native\""))
                {
                    return true;
                }
            } else if self.config.native_manifests.iter().any(|m| m == name) {
                return true;
            }

            if name == self.config.manifest_name {
                if let Some(manifest) = Manifest::parse(&file.content) {
                    if manifest.depends_on("react-native") || manifest.depends_on("expo") {
                        return true;
                    }
                }
            }

            is_source_file(name)
                && self
                    .config
                    .native_import_markers
                    .iter()
                    .any(|marker| file.content.contains(marker.as_str()))
        })
    }

    /// Normalized, sorted, de-duplicated paths outside dependency directories
    fn candidate_paths(&self, files: &[FileRecord]) -> Vec<String> {
        let mut paths: Vec<String> = files
            .iter()
            .filter_map(|f| normalize_path(&f.path).ok())
            .filter(|p| !is_dependency_dir(p))
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }

    /// Directories (relative) containing a manifest, shallowest first
    fn manifest_dirs(&self, paths: &[String]) -> Vec<String> {
        let mut dirs: Vec<String> = paths
            .iter()
            .filter_map(|p| {
                if *p == self.config.manifest_name {
                    Some(String::new())
                } else {
                    p.strip_suffix(self.config.manifest_name.as_str())
                        .and_then(|dir| dir.strip_suffix('/'))
                        .map(str::to_string)
                }
            })
            .collect();
        dirs.sort_by(|a, b| depth(a).cmp(&depth(b)).then_with(|| a.cmp(b)));
        dirs
    }

    fn find_manifest_dir(&self, paths: &[String]) -> Option<String> {
        self.manifest_dirs(paths).into_iter().next()
    }

    /// A conventionally named subfolder that holds its own manifest
    fn find_preview_subproject(&self, paths: &[String]) -> Option<String> {
        let mut matches: Vec<(usize, usize, String)> = self
            .manifest_dirs(paths)
            .into_iter()
            .filter(|dir| !dir.is_empty())
            .filter_map(|dir| {
                let leaf = dir.rsplit('/').next().unwrap_or(&dir).to_string();
                let rank = self.config.preview_dirs.iter().position(|d| *d == leaf)?;
                Some((depth(&dir), rank, dir))
            })
            .collect();
        matches.sort();
        matches.into_iter().next().map(|(_, _, dir)| dir)
    }
}

fn depth(dir: &str) -> usize {
    if dir.is_empty() {
        0
    } else {
        dir.split('/').count()
    }
}

fn is_dependency_dir(path: &str) -> bool {
    path.split('/').any(|segment| segment == "node_modules" || segment == ".git")
}

fn is_source_file(name: &str) -> bool {
    const EXTENSIONS: &[&str] = &[".js", ".jsx", ".ts", ".tsx", ".mjs", ".cjs", ".dart"];
    EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

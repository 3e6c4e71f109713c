//! Flat file records to the nested tree the runtime's filesystem API mounts

use crate::error::MountError;
use previewkit_common::FileRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Nested mount structure.
///
/// Serializes as `{"directory": {...}}` or `{"file": {"contents": "..."}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountNode {
    Directory(BTreeMap<String, MountNode>),
    File { contents: String },
}

impl MountNode {
    pub fn empty_dir() -> Self {
        MountNode::Directory(BTreeMap::new())
    }

    /// Number of file leaves in the tree
    pub fn leaf_count(&self) -> usize {
        match self {
            MountNode::File { .. } => 1,
            MountNode::Directory(children) => children.values().map(MountNode::leaf_count).sum(),
        }
    }

    /// Slash-joined paths of every file leaf, in tree order
    pub fn leaf_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        self.collect_paths("", &mut paths);
        paths
    }

    fn collect_paths(&self, prefix: &str, out: &mut Vec<String>) {
        match self {
            MountNode::File { .. } => out.push(prefix.to_string()),
            MountNode::Directory(children) => {
                for (name, child) in children {
                    let path = if prefix.is_empty() {
                        name.clone()
                    } else {
                        format!("{}/{}", prefix, name)
                    };
                    child.collect_paths(&path, out);
                }
            }
        }
    }

    /// Look up a node by slash-delimited path
    pub fn get(&self, path: &str) -> Option<&MountNode> {
        let mut node = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            match node {
                MountNode::Directory(children) => node = children.get(segment)?,
                MountNode::File { .. } => return None,
            }
        }
        Some(node)
    }

    /// Contents of the file at `path`, if it is a file
    pub fn contents(&self, path: &str) -> Option<&str> {
        match self.get(path)? {
            MountNode::File { contents } => Some(contents),
            MountNode::Directory(_) => None,
        }
    }
}

/// Normalize a record path: strip `./` and leading slashes, collapse empty
/// segments. `..` segments and empty paths are rejected.
pub fn normalize_path(path: &str) -> Result<String, MountError> {
    let mut segments = Vec::new();
    for segment in path.trim().split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return Err(MountError::InvalidPath(path.to_string())),
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return Err(MountError::InvalidPath(path.to_string()));
    }
    Ok(segments.join("/"))
}

/// Build a fresh mount tree from a file set.
///
/// Later records win when two normalize to the same path. A path that is
/// used both as a file and as a directory is a structural error.
pub fn build_mount_tree(files: &[FileRecord]) -> Result<MountNode, MountError> {
    let mut root = BTreeMap::new();

    for file in files {
        let path = normalize_path(&file.path)?;
        let segments: Vec<&str> = path.split('/').collect();
        let Some((name, dirs)) = segments.split_last() else {
            continue;
        };

        let mut current = &mut root;
        let mut walked = String::new();
        for dir in dirs {
            if !walked.is_empty() {
                walked.push('/');
            }
            walked.push_str(dir);

            let entry = current
                .entry(dir.to_string())
                .or_insert_with(MountNode::empty_dir);
            current = match entry {
                MountNode::Directory(children) => children,
                MountNode::File { .. } => return Err(MountError::Conflict(walked)),
            };
        }

        if let Some(MountNode::Directory(_)) = current.get(*name) {
            return Err(MountError::Conflict(path));
        }
        current.insert(
            name.to_string(),
            MountNode::File {
                contents: file.content.clone(),
            },
        );
    }

    Ok(MountNode::Directory(root))
}

/// Merge an incremental update into the current file set.
///
/// Incoming records replace existing ones with the same (normalized) path,
/// and evict existing records on the other side of a file/directory clash:
/// an incoming `src/main.js` drops an existing file `src`, an incoming `src`
/// drops everything existing under `src/`. Everything else is kept. The result
/// is sorted by path and unique by path. Records whose path cannot be
/// normalized are kept verbatim so that mounting reports them instead of
/// silently dropping them.
pub fn merge_files(existing: &[FileRecord], incoming: &[FileRecord]) -> Vec<FileRecord> {
    let normalized = |file: &FileRecord| FileRecord {
        path: normalize_path(&file.path).unwrap_or_else(|_| file.path.clone()),
        content: file.content.clone(),
    };
    let incoming: Vec<FileRecord> = incoming.iter().map(normalized).collect();

    let mut merged: BTreeMap<String, FileRecord> = existing
        .iter()
        .map(normalized)
        .filter(|file| !incoming.iter().any(|new| nests(&file.path, &new.path)))
        .map(|file| (file.path.clone(), file))
        .collect();
    for file in incoming {
        merged.insert(file.path.clone(), file);
    }
    merged.into_values().collect()
}

/// One path sits strictly inside the other
fn nests(a: &str, b: &str) -> bool {
    let inside = |dir: &str, path: &str| {
        path.strip_prefix(dir)
            .is_some_and(|rest| rest.starts_with('/'))
    };
    inside(a, b) || inside(b, a)
}

/// Records under `dir` with the prefix stripped ("" returns everything)
pub fn files_under<'a>(files: &'a [FileRecord], dir: &str) -> Vec<(String, &'a FileRecord)> {
    let dir = dir.trim_matches('/');
    files
        .iter()
        .filter_map(|file| {
            let path = normalize_path(&file.path).ok()?;
            if dir.is_empty() {
                return Some((path, file));
            }
            let rest = path.strip_prefix(dir)?.strip_prefix('/')?;
            Some((rest.to_string(), file))
        })
        .collect()
}

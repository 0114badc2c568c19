use std::collections::HashMap;

use crate::rcc::{self, NodeId, ResourceFile, ROOT};

/// Root of the mounted namespace as it appears in virtual paths.
pub const ROOT_PATH: &str = ":";

/// Framework-private content lives under this prefix.
pub const PRIVATE_PREFIX: &str = ":/qt-project.org";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// One path produced by walking the namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: String,
    pub kind: EntryKind,
    mount: usize,
    node: NodeId,
}

impl Entry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_private(&self) -> bool {
        self.path.starts_with(PRIVATE_PREFIX)
    }

    /// `d` for directories, `-` for files.
    pub fn type_char(&self) -> char {
        match self.kind {
            EntryKind::Directory => 'd',
            EntryKind::File => '-',
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("No such file or directory")]
    NotFound,
    #[error("Is a directory")]
    IsDirectory,
    #[error(transparent)]
    Corrupt(#[from] rcc::Error),
}

/// Containers mounted at `:/`, plus any libraries kept loaded on their behalf.
///
/// Later mounts never shadow earlier ones: lookups return the first match,
/// and directories present in several containers are merged when walked.
#[derive(Debug, Default)]
pub struct Namespace {
    mounts: Vec<ResourceFile>,
    libraries: Vec<libloading::Library>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mount(&mut self, file: ResourceFile) {
        tracing::debug!(
            index = self.mounts.len(),
            version = file.header.version,
            "mounted container"
        );
        self.mounts.push(file);
    }

    /// Keeps a library loaded for as long as the namespace lives.
    pub fn retain_library(&mut self, library: libloading::Library) {
        self.libraries.push(library);
    }

    pub fn mount_count(&self) -> usize {
        self.mounts.len()
    }

    /// Every entry in depth-first pre-order: a directory comes right before
    /// its contents, siblings keep container order.
    pub fn walk(&self) -> Vec<Entry> {
        let roots: Vec<(usize, NodeId)> = (0..self.mounts.len()).map(|m| (m, ROOT)).collect();
        let mut entries = Vec::new();
        let mut pending = self.grouped_children(ROOT_PATH, &roots);
        pending.reverse();

        while let Some((path, locations)) = pending.pop() {
            let (mount, node) = locations[0];
            if !self.mounts[mount].node(node).is_dir() {
                entries.push(Entry {
                    path,
                    kind: EntryKind::File,
                    mount,
                    node,
                });
                continue;
            }
            let subdirs: Vec<(usize, NodeId)> = locations
                .into_iter()
                .filter(|(m, n)| self.mounts[*m].node(*n).is_dir())
                .collect();
            let mut children = self.grouped_children(&path, &subdirs);
            children.reverse();
            pending.extend(children);
            entries.push(Entry {
                path,
                kind: EntryKind::Directory,
                mount,
                node,
            });
        }
        entries
    }

    /// Children of the same directory in several mounts, grouped by name in
    /// first-seen order.
    fn grouped_children(
        &self,
        path: &str,
        dirs: &[(usize, NodeId)],
    ) -> Vec<(String, Vec<(usize, NodeId)>)> {
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut children: Vec<(String, Vec<(usize, NodeId)>)> = Vec::new();
        for &(mount, dir) in dirs {
            let file = &self.mounts[mount];
            for child in file.children(dir) {
                let name = file.node(child).name.as_str();
                match index.get(name) {
                    Some(&slot) => children[slot].1.push((mount, child)),
                    None => {
                        index.insert(name, children.len());
                        children.push((format!("{path}/{name}"), vec![(mount, child)]));
                    }
                }
            }
        }
        children
    }

    /// Uncompressed size of an entry returned by [`Namespace::walk`].
    pub fn size(&self, entry: &Entry) -> Result<u64, rcc::Error> {
        self.mounts[entry.mount].uncompressed_size(entry.node)
    }

    fn resolve(&self, path: &str) -> Option<(usize, NodeId)> {
        let segments = clean_segments(path)?;
        self.mounts.iter().enumerate().find_map(|(mount, file)| {
            file.find(segments.iter().copied()).map(|node| (mount, node))
        })
    }

    /// Reads the full contents of the file at a `:/` virtual path.
    pub fn read(&self, path: &str) -> Result<Vec<u8>, OpenError> {
        let (mount, node) = self.resolve(path).ok_or(OpenError::NotFound)?;
        let file = &self.mounts[mount];
        if file.node(node).is_dir() {
            return Err(OpenError::IsDirectory);
        }
        let contents = file.read(node)?;
        tracing::trace!(path, bytes = contents.len(), "read resource");
        Ok(contents)
    }
}

/// Splits a `:/` virtual path into clean segments, resolving `.` and `..`.
///
/// Returns `None` for paths outside the namespace.
pub fn clean_segments(path: &str) -> Option<Vec<&str>> {
    let rest = path.strip_prefix(ROOT_PATH)?;
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    let mut segments = Vec::new();
    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }
    Some(segments)
}

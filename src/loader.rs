use std::io::{self, Cursor};
use std::path::Path;

use crate::file_reader::MemFile;
use crate::namespace::Namespace;
use crate::rcc::{self, ResourceFile, ResourceHeader, MAGIC};

/// Diagnostic recorded when the input is not a binary resource container.
pub const NOT_A_CONTAINER: &str = "Cannot load as Qt Resource file";

/// Both load attempts failed. Each reason names why one attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Failed to load resource {resource}:\n  * {}", .reasons.join("\n  * "))]
pub struct LoadFailure {
    pub resource: String,
    pub reasons: Vec<String>,
}

pub type LoadResult = Result<Namespace, LoadFailure>;

#[derive(Debug, thiserror::Error)]
enum LibraryError {
    #[error("The shared library was not found.")]
    NoFileName,
    #[error(transparent)]
    Load(#[from] libloading::Error),
}

#[derive(Debug, thiserror::Error)]
enum ContainerError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Format(#[from] rcc::Error),
}

/// Mounts `resource` as a container file, falling back to loading it as a
/// dynamic library.
///
/// A library that loads successfully counts as success even when it carries
/// no resources we can see.
pub fn load(resource: &Path) -> LoadResult {
    let absolute = std::path::absolute(resource).unwrap_or_else(|_| resource.to_path_buf());
    let mut reasons = Vec::new();

    match mount_container(&absolute) {
        Ok(namespace) => return Ok(namespace),
        Err(err) => {
            tracing::debug!(path = %absolute.display(), error = %err, "not a resource container");
            reasons.push(NOT_A_CONTAINER.to_string());
        }
    }

    match load_library(&absolute) {
        Ok(namespace) => return Ok(namespace),
        Err(err) => {
            tracing::debug!(path = %absolute.display(), error = %err, "not a loadable library");
            reasons.push(err.to_string());
        }
    }

    Err(LoadFailure {
        resource: resource.display().to_string(),
        reasons,
    })
}

fn mount_container(path: &Path) -> Result<Namespace, ContainerError> {
    let file = MemFile::read_from_path(path)?;
    tracing::trace!(path = %path.display(), bytes = file.size(), "read candidate container");
    let resources = ResourceFile::parse(file.into_bytes())?;

    let mut namespace = Namespace::new();
    namespace.mount(resources);
    Ok(namespace)
}

fn load_library(path: &Path) -> Result<Namespace, LibraryError> {
    // An empty name would make the dynamic loader hand back the running
    // executable.
    if path.as_os_str().is_empty() {
        return Err(LibraryError::NoFileName);
    }
    // SAFETY: loading runs the library's initialisers. Executing code from
    // the library the user named is the point of this fallback.
    let library = unsafe { libloading::Library::new(path)? };
    let mut namespace = Namespace::new();
    match MemFile::read_from_path(path) {
        Ok(image) => mount_embedded(&image, &mut namespace),
        Err(err) => tracing::warn!(path = %path.display(), error = %err, "cannot scan library image"),
    }
    tracing::debug!(
        path = %path.display(),
        containers = namespace.mount_count(),
        "loaded library"
    );
    namespace.retain_library(library);
    Ok(namespace)
}

/// Mounts every binary container embedded in a library image.
fn mount_embedded(image: &MemFile, namespace: &mut Namespace) {
    for offset in image.find_all(&MAGIC) {
        let candidate = &image.data[offset..];
        let plausible = ResourceHeader::read_from(&mut Cursor::new(candidate))
            .and_then(|header| header.validate(candidate.len()));
        if plausible.is_err() {
            continue;
        }
        match ResourceFile::parse(candidate.to_vec()) {
            Ok(file) => {
                tracing::debug!(offset, "found embedded container");
                namespace.mount(file);
            }
            Err(err) => tracing::trace!(offset, error = %err, "skipping embedded candidate"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_lists_every_reason() {
        let failure = LoadFailure {
            resource: "junk.bin".into(),
            reasons: vec![NOT_A_CONTAINER.into(), "junk.bin: invalid ELF header".into()],
        };
        assert_eq!(
            failure.to_string(),
            "Failed to load resource junk.bin:\n  * Cannot load as Qt Resource file\n  * junk.bin: invalid ELF header"
        );
    }

    #[test]
    fn missing_file_fails_both_ways() {
        let dir = tempfile::tempdir().unwrap();
        let failure = load(&dir.path().join("nope.rcc")).unwrap_err();
        assert_eq!(failure.reasons.len(), 2);
        assert_eq!(failure.reasons[0], NOT_A_CONTAINER);
    }

    #[test]
    fn empty_name_is_not_loaded_as_a_library() {
        let failure = load(Path::new("")).unwrap_err();
        assert_eq!(failure.resource, "");
        assert_eq!(
            failure.reasons,
            vec![NOT_A_CONTAINER.to_string(), "The shared library was not found.".to_string()]
        );
    }

    #[test]
    fn embedded_scan_skips_false_positives() {
        let image = MemFile {
            data: b"\x7fELF....qres is just a word here".to_vec(),
        };
        let mut namespace = Namespace::new();
        mount_embedded(&image, &mut namespace);
        assert_eq!(namespace.mount_count(), 0);
    }

    #[test]
    fn embedded_scan_mounts_real_containers() {
        let mut data = b"\x7fELF padding ".to_vec();
        // Version 1, every section at 20, then an empty root directory.
        data.extend_from_slice(b"qres\0\0\0\x01\0\0\0\x14\0\0\0\x14\0\0\0\x14");
        data.extend_from_slice(b"\0\0\0\0\0\x02\0\0\0\0\0\0\0\x01");
        data.extend_from_slice(b" trailing symbols");
        let image = MemFile { data };
        let mut namespace = Namespace::new();
        mount_embedded(&image, &mut namespace);
        assert_eq!(namespace.mount_count(), 1);
        assert!(namespace.walk().is_empty());
    }
}

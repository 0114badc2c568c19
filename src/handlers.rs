use std::io::{self, Write};
use std::path::PathBuf;

use crate::commands::Command;
use crate::loader::{self, LoadFailure};
use crate::namespace::{OpenError, ROOT_PATH};
use crate::rcc;

/// Parsed command line, read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: Command,
    /// `list -a`: include entries under the private prefix.
    pub show_private: bool,
    /// `list -l`: type and size columns.
    pub long_format: bool,
    pub container: PathBuf,
    /// `cat` only: the resource to dump, as given on the command line.
    pub resource: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] LoadFailure),
    #[error("Failed to open file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: OpenError,
    },
    #[error("Failed to determine the size of {path}: {source}")]
    Size {
        path: String,
        #[source]
        source: rcc::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Handler = fn(&Invocation, &mut dyn Write) -> Result<(), Error>;

pub fn handler(command: Command) -> Option<Handler> {
    match command {
        Command::None => None,
        Command::Verify => Some(verify),
        Command::List => Some(list),
        Command::Cat => Some(cat),
    }
}

pub fn verify(invocation: &Invocation, _out: &mut dyn Write) -> Result<(), Error> {
    loader::load(&invocation.container)?;
    Ok(())
}

pub fn list(invocation: &Invocation, out: &mut dyn Write) -> Result<(), Error> {
    let namespace = loader::load(&invocation.container)?;

    // Formatted up front so that nothing is printed if a size lookup fails.
    let mut listing = Vec::new();
    for entry in namespace.walk() {
        if entry.is_private() && !invocation.show_private {
            continue;
        }
        if invocation.long_format {
            let size = namespace.size(&entry).map_err(|source| Error::Size {
                path: entry.path.clone(),
                source,
            })?;
            writeln!(listing, "{}  {:>10}  {}", entry.type_char(), size, entry.path)?;
        } else {
            writeln!(listing, "{}", entry.path)?;
        }
    }

    out.write_all(&listing)?;
    out.flush()?;
    Ok(())
}

pub fn cat(invocation: &Invocation, out: &mut dyn Write) -> Result<(), Error> {
    let namespace = loader::load(&invocation.container)?;

    let path = normalize_resource_path(invocation.resource.as_deref().unwrap_or_default());
    let contents = namespace
        .read(&path)
        .map_err(|source| Error::Open {
            path: path.clone(),
            source,
        })?;

    // Raw bytes, no trailing newline.
    out.write_all(&contents)?;
    out.flush()?;
    Ok(())
}

/// Maps a user-supplied resource name onto a `:/` virtual path:
/// `qrc:/x` and `x` become `:/x`, `:/x` is kept.
pub fn normalize_resource_path(resource: &str) -> String {
    let resource = match resource.strip_prefix("qrc") {
        Some(rest) if rest.starts_with(":/") => rest,
        _ => resource,
    };
    if resource.starts_with(":/") {
        resource.to_string()
    } else {
        format!("{ROOT_PATH}/{resource}")
    }
}

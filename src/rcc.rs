use std::collections::{HashMap, HashSet};
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::ops::Range;

use byteorder::{BigEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;

/// Identifier at the start of every binary resource container.
pub const MAGIC: [u8; 4] = *b"qres";

/// Index of a node in the container's tree table.
pub type NodeId = u32;

pub const ROOT: NodeId = 0;

bitflags::bitflags! {
    pub struct NodeFlags: u16 {
        const COMPRESSED      = 0x01;
        const DIRECTORY       = 0x02;
        const COMPRESSED_ZSTD = 0x04;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bad magic {0:02x?}, expected \"qres\"")]
    BadMagic([u8; 4]),
    #[error("unsupported resource format version {0}")]
    UnsupportedVersion(u32),
    #[error("{section} offset {offset:#x} is outside the container ({len} bytes)")]
    OutOfBounds {
        section: &'static str,
        offset: u64,
        len: usize,
    },
    #[error("truncated {section} record at offset {offset:#x}")]
    Truncated { section: &'static str, offset: u64 },
    #[error("name at offset {0:#x} is not valid UTF-16")]
    InvalidName(u64),
    #[error("root node is not a directory")]
    RootNotDirectory,
    #[error("tree node {node} lists child {child} out of order")]
    InvalidChild { node: NodeId, child: NodeId },
    #[error("node {0} is not a file")]
    NotAFile(NodeId),
    #[error("cannot decompress {codec} data: {source}")]
    Decompress {
        codec: &'static str,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceHeader {
    pub version: u32,
    pub tree_offset: u32,
    pub data_offset: u32,
    pub names_offset: u32,
    pub overall_flags: u32,
}

impl ResourceHeader {
    /// Reads the header from a reader that implements `Read + Seek`.
    ///
    /// The header layout is 20 bytes (24 for version 3), all big-endian:
    /// - 4 bytes: Magic (`qres`)
    /// - 4 bytes: Version (1..=3)
    /// - 4 bytes: Tree offset
    /// - 4 bytes: Data offset
    /// - 4 bytes: Names offset
    /// - 4 bytes: Overall flags (version 3 only)
    pub fn read_from<R: Read + Seek>(reader: &mut R) -> Result<Self, Error> {
        let truncated = |_| Error::Truncated {
            section: "header",
            offset: 0,
        };
        reader.seek(SeekFrom::Start(0)).map_err(truncated)?;

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(truncated)?;
        if magic != MAGIC {
            return Err(Error::BadMagic(magic));
        }

        let version = reader.read_u32::<BigEndian>().map_err(truncated)?;
        if !(1..=3).contains(&version) {
            return Err(Error::UnsupportedVersion(version));
        }

        let tree_offset = reader.read_u32::<BigEndian>().map_err(truncated)?;
        let data_offset = reader.read_u32::<BigEndian>().map_err(truncated)?;
        let names_offset = reader.read_u32::<BigEndian>().map_err(truncated)?;
        let overall_flags = if version >= 3 {
            reader.read_u32::<BigEndian>().map_err(truncated)?
        } else {
            0
        };

        Ok(ResourceHeader {
            version,
            tree_offset,
            data_offset,
            names_offset,
            overall_flags,
        })
    }

    /// Checks that every section starts inside a container of `len` bytes.
    pub fn validate(&self, len: usize) -> Result<(), Error> {
        for (section, offset) in [
            ("tree", self.tree_offset),
            ("data", self.data_offset),
            ("names", self.names_offset),
        ] {
            if offset as usize >= len {
                return Err(Error::OutOfBounds {
                    section,
                    offset: offset.into(),
                    len,
                });
            }
        }
        Ok(())
    }

    /// Size of one tree record. Version 2 added a 64-bit modification time.
    pub fn node_size(&self) -> u64 {
        if self.version >= 2 {
            22
        } else {
            14
        }
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Directory { children: Range<NodeId> },
    File {
        territory: u16,
        language: u16,
        /// Absolute position of the payload, after its length prefix.
        payload: Range<usize>,
    },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub hash: u32,
    pub flags: NodeFlags,
    pub kind: NodeKind,
}

impl Node {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    /// Locale variants other than the default one carry a language or territory.
    fn is_default_locale(&self) -> bool {
        match self.kind {
            NodeKind::File {
                territory,
                language,
                ..
            } => territory == 0 && language == 0,
            NodeKind::Directory { .. } => true,
        }
    }
}

/// A parsed binary resource container.
///
/// The tree and names are decoded when the container is parsed; payloads are
/// only decompressed when they are read.
#[derive(Debug)]
pub struct ResourceFile {
    pub header: ResourceHeader,
    data: Vec<u8>,
    nodes: HashMap<NodeId, Node>,
}

impl ResourceFile {
    pub fn parse(data: Vec<u8>) -> Result<Self, Error> {
        let header = ResourceHeader::read_from(&mut Cursor::new(&data))?;
        header.validate(data.len())?;

        let mut file = ResourceFile {
            header,
            data,
            nodes: HashMap::new(),
        };

        let root = file.read_node(ROOT)?;
        if !root.is_dir() {
            return Err(Error::RootNotDirectory);
        }
        let mut claimed = HashSet::from([ROOT]);
        let mut pending = vec![(ROOT, root)];
        while let Some((id, node)) = pending.pop() {
            if let NodeKind::Directory { children } = &node.kind {
                for child in children.clone() {
                    // Children always follow their parent and belong to exactly one directory.
                    if child <= id || !claimed.insert(child) {
                        return Err(Error::InvalidChild { node: id, child });
                    }
                    let child_node = file.read_node(child)?;
                    pending.push((child, child_node));
                }
            }
            file.nodes.insert(id, node);
        }

        tracing::trace!(
            version = file.header.version,
            nodes = file.nodes.len(),
            "parsed resource container"
        );
        Ok(file)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[&id]
    }

    /// Children of a directory in container order, one node per name.
    ///
    /// Locale variants share a name; the default-locale variant is reported
    /// when there is one.
    pub fn children(&self, dir: NodeId) -> Vec<NodeId> {
        let NodeKind::Directory { children } = &self.node(dir).kind else {
            return Vec::new();
        };
        let mut result: Vec<NodeId> = Vec::with_capacity(children.len());
        // Variants of a name share its hash, so only the current hash run can
        // already hold it.
        let mut run_start = 0;
        for child in children.clone() {
            let node = self.node(child);
            if let Some(&last) = result.last() {
                if self.node(last).hash != node.hash {
                    run_start = result.len();
                }
            }
            match result[run_start..]
                .iter_mut()
                .find(|seen| self.node(**seen).name == node.name)
            {
                Some(seen) => {
                    if node.is_default_locale() && !self.node(*seen).is_default_locale() {
                        *seen = child;
                    }
                }
                None => result.push(child),
            }
        }
        result
    }

    /// Looks up `name` among the children of `dir`.
    ///
    /// Siblings are sorted by hash, so this is a binary search followed by a
    /// name comparison over the colliding run.
    pub fn find_child(&self, dir: NodeId, name: &str) -> Option<NodeId> {
        let NodeKind::Directory { children } = &self.node(dir).kind else {
            return None;
        };
        let hash = qt_hash(name);
        let ids: Vec<NodeId> = children.clone().collect();
        let start = ids.partition_point(|id| self.node(*id).hash < hash);

        let mut found = None;
        for id in ids[start..]
            .iter()
            .copied()
            .take_while(|id| self.node(*id).hash == hash)
        {
            let node = self.node(id);
            if node.name != name {
                continue;
            }
            if node.is_default_locale() {
                return Some(id);
            }
            found.get_or_insert(id);
        }
        found
    }

    /// Resolves a sequence of path segments starting at the root.
    pub fn find<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Option<NodeId> {
        segments
            .into_iter()
            .try_fold(ROOT, |dir, segment| self.find_child(dir, segment))
    }

    /// Size of the entry once decompressed. Directories have size 0.
    pub fn uncompressed_size(&self, id: NodeId) -> Result<u64, Error> {
        let node = self.node(id);
        let NodeKind::File { payload, .. } = &node.kind else {
            return Ok(0);
        };
        let payload = &self.data[payload.clone()];
        if node.flags.contains(NodeFlags::COMPRESSED_ZSTD) {
            Ok(self.read(id)?.len() as u64)
        } else if node.flags.contains(NodeFlags::COMPRESSED) {
            let mut prefix = payload;
            prefix
                .read_u32::<BigEndian>()
                .map(u64::from)
                .map_err(|source| Error::Decompress {
                    codec: "zlib",
                    source,
                })
        } else {
            Ok(payload.len() as u64)
        }
    }

    /// Returns the decompressed contents of a file entry.
    pub fn read(&self, id: NodeId) -> Result<Vec<u8>, Error> {
        let node = self.node(id);
        let NodeKind::File { payload, .. } = &node.kind else {
            return Err(Error::NotAFile(id));
        };
        let payload = &self.data[payload.clone()];

        if node.flags.contains(NodeFlags::COMPRESSED_ZSTD) {
            zstd::stream::decode_all(payload).map_err(|source| Error::Decompress {
                codec: "zstd",
                source,
            })
        } else if node.flags.contains(NodeFlags::COMPRESSED) {
            unzip_payload(payload)
        } else {
            Ok(payload.to_vec())
        }
    }

    fn read_node(&self, id: NodeId) -> Result<Node, Error> {
        let offset = u64::from(self.header.tree_offset) + u64::from(id) * self.header.node_size();
        let truncated = |_| Error::Truncated {
            section: "tree",
            offset,
        };

        let mut cursor = Cursor::new(&self.data[..]);
        cursor.set_position(offset);
        let name_offset = cursor.read_u32::<BigEndian>().map_err(truncated)?;
        let flags = NodeFlags::from_bits_truncate(cursor.read_u16::<BigEndian>().map_err(truncated)?);

        let kind = if flags.contains(NodeFlags::DIRECTORY) {
            let count = cursor.read_u32::<BigEndian>().map_err(truncated)?;
            let first = cursor.read_u32::<BigEndian>().map_err(truncated)?;
            let end = first.checked_add(count).ok_or(Error::InvalidChild {
                node: id,
                child: first,
            })?;
            NodeKind::Directory { children: first..end }
        } else {
            let territory = cursor.read_u16::<BigEndian>().map_err(truncated)?;
            let language = cursor.read_u16::<BigEndian>().map_err(truncated)?;
            let data_offset = cursor.read_u32::<BigEndian>().map_err(truncated)?;
            NodeKind::File {
                territory,
                language,
                payload: self.payload_range(data_offset)?,
            }
        };
        if self.header.version >= 2 {
            // Modification time; not used for inspection.
            cursor.read_u64::<BigEndian>().map_err(truncated)?;
        }

        // The root's name offset is not meaningful.
        let (name, hash) = if id == ROOT {
            (String::new(), 0)
        } else {
            self.read_name(name_offset)?
        };

        Ok(Node {
            name,
            hash,
            flags,
            kind,
        })
    }

    /// Reads a names-table entry: `u16` length in UTF-16 units, `u32` hash,
    /// then the big-endian code units.
    fn read_name(&self, name_offset: u32) -> Result<(String, u32), Error> {
        let offset = u64::from(self.header.names_offset) + u64::from(name_offset);
        let truncated = |_| Error::Truncated {
            section: "names",
            offset,
        };

        let mut cursor = Cursor::new(&self.data[..]);
        cursor.set_position(offset);
        let len = cursor.read_u16::<BigEndian>().map_err(truncated)?;
        let hash = cursor.read_u32::<BigEndian>().map_err(truncated)?;
        let mut units = Vec::with_capacity(len.into());
        for _ in 0..len {
            units.push(cursor.read_u16::<BigEndian>().map_err(truncated)?);
        }

        let name = char::decode_utf16(units)
            .collect::<Result<String, _>>()
            .map_err(|_| Error::InvalidName(offset))?;
        Ok((name, hash))
    }

    /// Locates a data-table entry: `u32` length followed by the payload.
    fn payload_range(&self, data_offset: u32) -> Result<Range<usize>, Error> {
        let offset = u64::from(self.header.data_offset) + u64::from(data_offset);
        let mut cursor = Cursor::new(&self.data[..]);
        cursor.set_position(offset);
        let size = cursor
            .read_u32::<BigEndian>()
            .map_err(|_| Error::Truncated {
                section: "data",
                offset,
            })?;

        let start = offset + 4;
        let end = start + u64::from(size);
        if end > self.data.len() as u64 {
            return Err(Error::OutOfBounds {
                section: "data",
                offset: end,
                len: self.data.len(),
            });
        }
        Ok(start as usize..end as usize)
    }
}

/// Decompresses a zlib payload.
///
/// The payload starts with the uncompressed size as a big-endian `u32`,
/// followed by a zlib stream.
pub fn unzip_payload(payload: &[u8]) -> Result<Vec<u8>, Error> {
    let decompress = |source| Error::Decompress {
        codec: "zlib",
        source,
    };
    let mut reader = payload;
    let expected = reader.read_u32::<BigEndian>().map_err(decompress)? as usize;

    let mut decoder = ZlibDecoder::new(reader);
    let mut decompressed = Vec::with_capacity(expected.min(payload.len() * 16));
    decoder.read_to_end(&mut decompressed).map_err(decompress)?;
    if decompressed.len() != expected {
        tracing::warn!(
            expected,
            actual = decompressed.len(),
            "zlib payload size does not match its header"
        );
    }
    Ok(decompressed)
}

/// The string hash stored in the names table, computed over UTF-16 units.
pub fn qt_hash(name: &str) -> u32 {
    name.encode_utf16().fold(0u32, |h, unit| {
        let mut h = (h << 4).wrapping_add(u32::from(unit));
        h ^= (h & 0xf000_0000) >> 23;
        h & 0x0fff_ffff
    })
}

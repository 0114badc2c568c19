//! Builds binary resource containers for tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, WriteBytesExt};
use flate2::write::ZlibEncoder;

use qtresources::rcc::qt_hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Zlib,
    Zstd,
}

#[derive(Debug)]
struct FileItem {
    contents: Vec<u8>,
    compression: Compression,
    territory: u16,
    language: u16,
}

#[derive(Debug)]
enum Item {
    Dir(Vec<(String, Item)>),
    File(FileItem),
}

pub struct ContainerBuilder {
    version: u32,
    root: Vec<(String, Item)>,
}

impl ContainerBuilder {
    pub fn new(version: u32) -> Self {
        ContainerBuilder {
            version,
            root: Vec::new(),
        }
    }

    pub fn file(self, path: &str, contents: &[u8]) -> Self {
        self.file_with(path, contents, Compression::None, 0, 0)
    }

    pub fn compressed(self, path: &str, contents: &[u8], compression: Compression) -> Self {
        self.file_with(path, contents, compression, 0, 0)
    }

    pub fn localized(self, path: &str, contents: &[u8], language: u16, territory: u16) -> Self {
        self.file_with(path, contents, Compression::None, language, territory)
    }

    pub fn dir(mut self, path: &str) -> Self {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        directory(&mut self.root, &segments);
        self
    }

    fn file_with(
        mut self,
        path: &str,
        contents: &[u8],
        compression: Compression,
        language: u16,
        territory: u16,
    ) -> Self {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let (name, parents) = segments.split_last().expect("empty path");
        directory(&mut self.root, parents).push((
            name.to_string(),
            Item::File(FileItem {
                contents: contents.to_vec(),
                compression,
                territory,
                language,
            }),
        ));
        self
    }

    /// Lays the container out as header, data, names, tree.
    pub fn build(&self) -> Vec<u8> {
        let mut data = Vec::new();
        let mut names = Vec::new();
        let mut name_offsets: HashMap<String, u32> = HashMap::new();
        let mut tree = Vec::new();

        // Breadth-first: children of a directory occupy consecutive indices,
        // sorted by name hash.
        let mut records: Vec<Vec<u8>> = vec![Vec::new()];
        let mut queue: VecDeque<(usize, u32, &Vec<(String, Item)>)> = VecDeque::new();
        queue.push_back((0, 0, &self.root));
        while let Some((index, dir_name_offset, children)) = queue.pop_front() {
            let mut sorted: Vec<&(String, Item)> = children.iter().collect();
            sorted.sort_by_key(|(name, _)| qt_hash(name));

            let first = records.len() as u32;
            records[index] = dir_record(dir_name_offset, sorted.len() as u32, first);
            for (name, item) in sorted {
                let name_offset = *name_offsets.entry(name.clone()).or_insert_with(|| {
                    let offset = names.len() as u32;
                    write_name(&mut names, name);
                    offset
                });
                let child_index = records.len();
                match item {
                    Item::Dir(grandchildren) => {
                        // Filled in when the directory is dequeued.
                        records.push(Vec::new());
                        queue.push_back((child_index, name_offset, grandchildren));
                    }
                    Item::File(file) => {
                        let data_offset = data.len() as u32;
                        write_payload(&mut data, file);
                        records.push(file_record(name_offset, file, data_offset));
                    }
                }
            }
        }
        for record in &records {
            tree.extend_from_slice(record);
            if self.version >= 2 {
                tree.write_u64::<BigEndian>(0).unwrap();
            }
        }

        let header_len: u32 = if self.version >= 3 { 24 } else { 20 };
        let data_offset = header_len;
        let names_offset = data_offset + data.len() as u32;
        let tree_offset = names_offset + names.len() as u32;

        let mut out = Vec::new();
        out.extend_from_slice(b"qres");
        out.write_u32::<BigEndian>(self.version).unwrap();
        out.write_u32::<BigEndian>(tree_offset).unwrap();
        out.write_u32::<BigEndian>(data_offset).unwrap();
        out.write_u32::<BigEndian>(names_offset).unwrap();
        if self.version >= 3 {
            out.write_u32::<BigEndian>(0).unwrap();
        }
        out.extend_from_slice(&data);
        out.extend_from_slice(&names);
        out.extend_from_slice(&tree);
        out
    }

    pub fn write_to(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.build()).unwrap();
        path
    }
}

fn directory<'a>(mut items: &'a mut Vec<(String, Item)>, segments: &[&str]) -> &'a mut Vec<(String, Item)> {
    for segment in segments {
        let position = items
            .iter()
            .position(|(name, item)| name == segment && matches!(item, Item::Dir(_)));
        let position = match position {
            Some(position) => position,
            None => {
                items.push((segment.to_string(), Item::Dir(Vec::new())));
                items.len() - 1
            }
        };
        items = match &mut items[position].1 {
            Item::Dir(children) => children,
            Item::File(_) => unreachable!(),
        };
    }
    items
}

fn dir_record(name_offset: u32, count: u32, first: u32) -> Vec<u8> {
    let mut record = Vec::new();
    record.write_u32::<BigEndian>(name_offset).unwrap();
    record.write_u16::<BigEndian>(0x02).unwrap();
    record.write_u32::<BigEndian>(count).unwrap();
    record.write_u32::<BigEndian>(first).unwrap();
    record
}

fn file_record(name_offset: u32, file: &FileItem, data_offset: u32) -> Vec<u8> {
    let flags = match file.compression {
        Compression::None => 0x00,
        Compression::Zlib => 0x01,
        Compression::Zstd => 0x04,
    };
    let mut record = Vec::new();
    record.write_u32::<BigEndian>(name_offset).unwrap();
    record.write_u16::<BigEndian>(flags).unwrap();
    record.write_u16::<BigEndian>(file.territory).unwrap();
    record.write_u16::<BigEndian>(file.language).unwrap();
    record.write_u32::<BigEndian>(data_offset).unwrap();
    record
}

fn write_name(names: &mut Vec<u8>, name: &str) {
    let units: Vec<u16> = name.encode_utf16().collect();
    names.write_u16::<BigEndian>(units.len() as u16).unwrap();
    names.write_u32::<BigEndian>(qt_hash(name)).unwrap();
    for unit in units {
        names.write_u16::<BigEndian>(unit).unwrap();
    }
}

fn write_payload(data: &mut Vec<u8>, file: &FileItem) {
    let payload = match file.compression {
        Compression::None => file.contents.clone(),
        Compression::Zlib => {
            let mut payload = Vec::new();
            payload
                .write_u32::<BigEndian>(file.contents.len() as u32)
                .unwrap();
            let mut encoder = ZlibEncoder::new(payload, flate2::Compression::default());
            encoder.write_all(&file.contents).unwrap();
            encoder.finish().unwrap()
        }
        Compression::Zstd => zstd::stream::encode_all(&file.contents[..], 3).unwrap(),
    };
    data.write_u32::<BigEndian>(payload.len() as u32).unwrap();
    data.extend_from_slice(&payload);
}

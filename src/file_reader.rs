use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug)]
pub struct MemFile {
    pub data: Vec<u8>,
}

impl MemFile {
    pub fn read_from_path(path: &Path) -> io::Result<Self> {
        let data = fs::read(path)?;
        Ok(MemFile { data })
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Offsets of every occurrence of `needle`, in ascending order.
    pub fn find_all<'a>(&'a self, needle: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
        self.data
            .windows(needle.len())
            .enumerate()
            .filter(move |(_, window)| *window == needle)
            .map(|(offset, _)| offset)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

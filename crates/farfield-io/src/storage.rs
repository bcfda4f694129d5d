use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use farfield_world::TilePos;
use hashbrown::HashMap;

/// Source of persisted tile records.
pub trait TileStorage: Send + Sync {
    fn read(&self, pos: TilePos) -> io::Result<Option<Vec<u8>>>;

    /// True if concurrent `read` calls are cheap enough to fan out.
    fn supports_parallel_reads(&self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: RwLock<HashMap<TilePos, Vec<u8>>>,
    parallel: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parallel_reads(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn insert(&self, pos: TilePos, bytes: Vec<u8>) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pos, bytes);
    }

    pub fn remove(&self, pos: TilePos) -> Option<Vec<u8>> {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&pos)
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TileStorage for MemoryStorage {
    fn read(&self, pos: TilePos) -> io::Result<Option<Vec<u8>>> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&pos)
            .cloned())
    }

    fn supports_parallel_reads(&self) -> bool {
        self.parallel
    }
}

/// One file per tile, `<x>.<z>.nbt`, in a flat directory.
#[derive(Clone, Debug)]
pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, pos: TilePos) -> PathBuf {
        self.root.join(format!("{}.{}.nbt", pos.x, pos.z))
    }

    pub fn write(&self, pos: TilePos, bytes: &[u8]) -> io::Result<()> {
        fs::write(self.path_for(pos), bytes)
    }
}

impl TileStorage for DirStorage {
    fn read(&self, pos: TilePos) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(pos)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn supports_parallel_reads(&self) -> bool {
        true
    }
}

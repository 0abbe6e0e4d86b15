//! Disk-backed page files.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tidepool_common::page::{FileId, PageBuf, PageId, PAGE_SIZE};
use tidepool_common::{PageFile, Result, StorageConfig, TidepoolError};
use tracing::{debug, warn};

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Base directory for data files.
    pub data_dir: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

impl From<&StorageConfig> for DiskManagerConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            fsync_enabled: config.fsync_enabled,
        }
    }
}

/// Mutable part of an open data file.
struct FileState {
    file: File,
    /// Number of page slots in the file, allocated or not.
    num_pages: u32,
    /// Disposed page numbers available for reuse.
    free: BTreeSet<u32>,
}

/// One OS file holding fixed-size pages at `page_num * PAGE_SIZE`.
///
/// The free list lives in memory only. Reopening a file treats every page
/// slot in it as allocated.
pub struct DiskFile {
    file_id: FileId,
    path: PathBuf,
    fsync_enabled: bool,
    state: Mutex<FileState>,
}

impl DiskFile {
    /// Opens or creates the data file at `path`.
    pub fn open(file_id: FileId, path: impl Into<PathBuf>, fsync_enabled: bool) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        debug!(%file_id, path = %path.display(), num_pages, "opened data file");

        Ok(Self {
            file_id,
            path,
            fsync_enabled,
            state: Mutex::new(FileState {
                file,
                num_pages,
                free: BTreeSet::new(),
            }),
        })
    }

    /// Returns the path of the data file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of page slots in the file, including disposed ones.
    pub fn num_pages(&self) -> u32 {
        self.state.lock().num_pages
    }

    /// Returns the number of disposed pages awaiting reuse.
    pub fn free_pages(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Returns true if `page_num` is currently allocated.
    pub fn is_allocated(&self, page_num: u32) -> bool {
        let state = self.state.lock();
        page_num < state.num_pages && !state.free.contains(&page_num)
    }

    /// Flushes pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.state.lock().file.sync_all()?;
        Ok(())
    }

    fn not_found(&self, page_num: u32) -> TidepoolError {
        TidepoolError::PageNotFound {
            page_id: PageId::new(self.file_id, page_num),
        }
    }

    fn check_allocated(&self, state: &FileState, page_num: u32) -> Result<()> {
        if page_num >= state.num_pages || state.free.contains(&page_num) {
            return Err(self.not_found(page_num));
        }
        Ok(())
    }

    fn write_at(&self, state: &mut FileState, page_num: u32, src: &PageBuf) -> Result<()> {
        let offset = (page_num as u64) * (PAGE_SIZE as u64);
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(src)?;

        if self.fsync_enabled {
            state.file.sync_all()?;
        }
        Ok(())
    }
}

impl PageFile for DiskFile {
    fn file_id(&self) -> FileId {
        self.file_id
    }

    fn read_page(&self, page_num: u32, dst: &mut PageBuf) -> Result<()> {
        let mut state = self.state.lock();
        self.check_allocated(&state, page_num)?;

        let offset = (page_num as u64) * (PAGE_SIZE as u64);
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.read_exact(dst)?;
        Ok(())
    }

    fn write_page(&self, page_num: u32, src: &PageBuf) -> Result<()> {
        let mut state = self.state.lock();
        self.check_allocated(&state, page_num)?;
        self.write_at(&mut state, page_num, src)
    }

    fn allocate_page(&self) -> Result<u32> {
        let mut state = self.state.lock();

        let (page_num, reused) = match state.free.first() {
            Some(&page_num) => (page_num, true),
            None => (state.num_pages, false),
        };

        // Zero the page on disk before handing it out.
        self.write_at(&mut state, page_num, &[0u8; PAGE_SIZE])?;

        if reused {
            state.free.remove(&page_num);
        } else {
            state.num_pages = page_num + 1;
        }
        Ok(page_num)
    }

    fn dispose_page(&self, page_num: u32) -> Result<()> {
        let mut state = self.state.lock();
        self.check_allocated(&state, page_num)?;
        state.free.insert(page_num);
        Ok(())
    }
}

impl std::fmt::Debug for DiskFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskFile")
            .field("file_id", &self.file_id)
            .field("path", &self.path)
            .finish()
    }
}

/// Open files and the name to id assignment.
struct Catalog {
    open: HashMap<String, Arc<DiskFile>>,
    /// Ids are kept after close so a reopened file keeps its identity.
    ids: HashMap<String, FileId>,
    next_id: u32,
}

/// Manages the data files in one directory.
///
/// Each name maps to `<data_dir>/<name>`. While a file is open, every
/// [`open_file`](Self::open_file) call for its name returns the same handle.
/// File ids are assigned sequentially on first open and kept for the
/// lifetime of the manager.
pub struct DiskManager {
    /// Configuration.
    config: DiskManagerConfig,
    catalog: Mutex<Catalog>,
}

impl DiskManager {
    /// Creates a new disk manager.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self {
            config,
            catalog: Mutex::new(Catalog {
                open: HashMap::new(),
                ids: HashMap::new(),
                next_id: 0,
            }),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    fn file_path(&self, name: &str) -> Result<PathBuf> {
        let bad_name = name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(|c: char| c == '/' || c == '\\');
        if bad_name {
            return Err(TidepoolError::InvalidParameter {
                name: "file name".to_string(),
                value: name.to_string(),
            });
        }
        Ok(self.config.data_dir.join(name))
    }

    /// Opens or creates a data file.
    pub fn open_file(&self, name: &str) -> Result<Arc<DiskFile>> {
        let path = self.file_path(name)?;
        let mut catalog = self.catalog.lock();

        if let Some(file) = catalog.open.get(name) {
            return Ok(file.clone());
        }

        let file_id = match catalog.ids.get(name) {
            Some(&file_id) => file_id,
            None => FileId(catalog.next_id),
        };
        let file = Arc::new(DiskFile::open(file_id, path, self.config.fsync_enabled)?);

        if !catalog.ids.contains_key(name) {
            catalog.ids.insert(name.to_string(), file_id);
            catalog.next_id += 1;
        }
        catalog.open.insert(name.to_string(), file.clone());
        Ok(file)
    }

    /// Returns true if a file with this name is currently open.
    pub fn is_open(&self, name: &str) -> bool {
        self.catalog.lock().open.contains_key(name)
    }

    /// Flushes all open files to disk.
    pub fn flush(&self) -> Result<()> {
        let catalog = self.catalog.lock();
        for file in catalog.open.values() {
            file.sync()?;
        }
        Ok(())
    }

    /// Closes a file.
    ///
    /// Outstanding handles stay usable; the next `open_file` for the name
    /// opens a fresh handle with the same id.
    pub fn close_file(&self, name: &str) -> Result<()> {
        let removed = self.catalog.lock().open.remove(name);
        if let Some(file) = removed {
            file.sync()?;
            debug!(name, file_id = %file.file_id(), "closed data file");
        }
        Ok(())
    }

    /// Closes a file and deletes it from disk.
    ///
    /// The name is forgotten, so a later `open_file` creates an empty file
    /// with a new id.
    pub fn destroy_file(&self, name: &str) -> Result<()> {
        let path = self.file_path(name)?;
        {
            let mut catalog = self.catalog.lock();
            catalog.open.remove(name);
            catalog.ids.remove(name);
        }
        if path.exists() {
            std::fs::remove_file(&path)?;
            debug!(name, "destroyed data file");
        }
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, "failed to flush data files on shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_disk_manager() -> (DiskManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = DiskManagerConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
        };
        let dm = DiskManager::new(config).unwrap();
        (dm, dir)
    }

    fn page_with(byte: u8) -> Box<PageBuf> {
        Box::new([byte; PAGE_SIZE])
    }

    #[test]
    fn test_disk_manager_new() {
        let (dm, _dir) = create_test_disk_manager();
        assert!(dm.data_dir().exists());
    }

    #[test]
    fn test_disk_manager_config_from_storage_config() {
        let storage = StorageConfig {
            data_dir: PathBuf::from("/tmp/tide"),
            buffer_pool_pages: 8,
            fsync_enabled: false,
        };
        let config = DiskManagerConfig::from(&storage);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/tide"));
        assert!(!config.fsync_enabled);
    }

    #[test]
    fn test_open_file_same_name_same_handle() {
        let (dm, _dir) = create_test_disk_manager();

        let a = dm.open_file("orders").unwrap();
        let b = dm.open_file("orders").unwrap();
        let c = dm.open_file("customers").unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.file_id(), FileId(0));
        assert_eq!(c.file_id(), FileId(1));
        assert!(dm.is_open("orders"));
    }

    #[test]
    fn test_open_file_rejects_bad_names() {
        let (dm, _dir) = create_test_disk_manager();

        for name in ["", "a/b", "..", "."] {
            assert!(matches!(
                dm.open_file(name),
                Err(TidepoolError::InvalidParameter { .. })
            ));
        }
    }

    #[test]
    fn test_allocate_page() {
        let (dm, _dir) = create_test_disk_manager();
        let file = dm.open_file("data").unwrap();

        assert_eq!(file.allocate_page().unwrap(), 0);
        assert_eq!(file.allocate_page().unwrap(), 1);
        assert_eq!(file.num_pages(), 2);
        assert_eq!(
            std::fs::metadata(file.path()).unwrap().len(),
            2 * PAGE_SIZE as u64
        );
    }

    #[test]
    fn test_write_read() {
        let (dm, _dir) = create_test_disk_manager();
        let file = dm.open_file("data").unwrap();
        let page_num = file.allocate_page().unwrap();

        let mut data = page_with(0);
        data[0] = 0xAB;
        data[100] = 0xCD;
        data[PAGE_SIZE - 1] = 0xEF;
        file.write_page(page_num, &data).unwrap();

        let mut read = page_with(0xFF);
        file.read_page(page_num, &mut read).unwrap();
        assert_eq!(read[0], 0xAB);
        assert_eq!(read[100], 0xCD);
        assert_eq!(read[PAGE_SIZE - 1], 0xEF);
        assert_eq!(read[1], 0);
    }

    #[test]
    fn test_unallocated_page_not_found() {
        let (dm, _dir) = create_test_disk_manager();
        let file = dm.open_file("data").unwrap();
        file.allocate_page().unwrap();

        let mut buf = page_with(0);
        assert!(matches!(
            file.read_page(99, &mut buf),
            Err(TidepoolError::PageNotFound { .. })
        ));
        assert!(matches!(
            file.write_page(99, &buf),
            Err(TidepoolError::PageNotFound { .. })
        ));
        assert!(matches!(
            file.dispose_page(99),
            Err(TidepoolError::PageNotFound { .. })
        ));
    }

    #[test]
    fn test_dispose_and_reuse_lowest() {
        let (dm, _dir) = create_test_disk_manager();
        let file = dm.open_file("data").unwrap();
        for _ in 0..4 {
            file.allocate_page().unwrap();
        }
        file.write_page(1, &page_with(0x77)).unwrap();

        file.dispose_page(3).unwrap();
        file.dispose_page(1).unwrap();
        assert_eq!(file.free_pages(), 2);
        assert!(!file.is_allocated(1));

        let mut buf = page_with(0);
        assert!(matches!(
            file.read_page(1, &mut buf),
            Err(TidepoolError::PageNotFound { .. })
        ));
        assert!(matches!(
            file.dispose_page(1),
            Err(TidepoolError::PageNotFound { .. })
        ));

        // Lowest disposed number first, zero-filled.
        assert_eq!(file.allocate_page().unwrap(), 1);
        file.read_page(1, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));

        assert_eq!(file.allocate_page().unwrap(), 3);
        assert_eq!(file.allocate_page().unwrap(), 4);
        assert_eq!(file.num_pages(), 5);
    }

    #[test]
    fn test_multiple_files() {
        let (dm, _dir) = create_test_disk_manager();
        let files: Vec<_> = ["f0", "f1", "f2"]
            .iter()
            .map(|name| dm.open_file(name).unwrap())
            .collect();

        for (i, file) in files.iter().enumerate() {
            let page_num = file.allocate_page().unwrap();
            file.write_page(page_num, &page_with(i as u8 * 0x11)).unwrap();
        }

        for (i, file) in files.iter().enumerate() {
            let mut buf = page_with(0xFF);
            file.read_page(0, &mut buf).unwrap();
            assert_eq!(buf[0], i as u8 * 0x11);
        }
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();
        let config = DiskManagerConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: true,
        };

        {
            let dm = DiskManager::new(config.clone()).unwrap();
            let file = dm.open_file("persist").unwrap();
            let page_num = file.allocate_page().unwrap();
            file.write_page(page_num, &page_with(0xFF)).unwrap();
        }

        {
            let dm = DiskManager::new(config).unwrap();
            let file = dm.open_file("persist").unwrap();
            assert_eq!(file.num_pages(), 1);

            let mut buf = page_with(0);
            file.read_page(0, &mut buf).unwrap();
            assert_eq!(buf[0], 0xFF);
        }
    }

    #[test]
    fn test_close_and_reopen_keeps_id() {
        let (dm, _dir) = create_test_disk_manager();
        let file = dm.open_file("data").unwrap();
        let file_id = file.file_id();
        file.allocate_page().unwrap();

        dm.close_file("data").unwrap();
        assert!(!dm.is_open("data"));

        let reopened = dm.open_file("data").unwrap();
        assert!(!Arc::ptr_eq(&file, &reopened));
        assert_eq!(reopened.file_id(), file_id);
        assert_eq!(reopened.num_pages(), 1);
    }

    #[test]
    fn test_destroy_file() {
        let (dm, dir) = create_test_disk_manager();
        let file = dm.open_file("doomed").unwrap();
        file.allocate_page().unwrap();
        let path = dir.path().join("doomed");
        assert!(path.exists());

        dm.destroy_file("doomed").unwrap();
        assert!(!path.exists());
        assert!(!dm.is_open("doomed"));

        let recreated = dm.open_file("doomed").unwrap();
        assert_ne!(recreated.file_id(), file.file_id());
        assert_eq!(recreated.num_pages(), 0);
    }

    #[test]
    fn test_destroy_missing_file() {
        let (dm, _dir) = create_test_disk_manager();
        dm.destroy_file("never-opened").unwrap();
    }

    #[test]
    fn test_flush() {
        let (dm, _dir) = create_test_disk_manager();
        dm.open_file("a").unwrap().allocate_page().unwrap();
        dm.open_file("b").unwrap().allocate_page().unwrap();

        dm.flush().unwrap();
    }
}

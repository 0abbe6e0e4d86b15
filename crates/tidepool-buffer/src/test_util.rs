//! In-crate page file mock with I/O logging and failure injection.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tidepool_common::page::{FileId, PageBuf, PageId, PAGE_SIZE};
use tidepool_common::{PageFile, Result, SharedFile, TidepoolError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Read(u32),
    Write(u32),
    Allocate(u32),
    Dispose(u32),
}

pub struct TestFile {
    file_id: FileId,
    pages: Mutex<BTreeMap<u32, Box<PageBuf>>>,
    next_page: Mutex<u32>,
    log: Mutex<Vec<IoOp>>,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub fail_allocs: AtomicBool,
    pub fail_disposes: AtomicBool,
}

impl TestFile {
    pub fn new(file_id: u32) -> Arc<Self> {
        Self::with_pages(file_id, 0)
    }

    /// Creates a file with `count` pages; every byte of page `n` is `n as u8`.
    pub fn with_pages(file_id: u32, count: u32) -> Arc<Self> {
        let pages = (0..count)
            .map(|n| (n, Box::new([n as u8; PAGE_SIZE])))
            .collect();
        Arc::new(Self {
            file_id: FileId(file_id),
            pages: Mutex::new(pages),
            next_page: Mutex::new(count),
            log: Mutex::new(Vec::new()),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_allocs: AtomicBool::new(false),
            fail_disposes: AtomicBool::new(false),
        })
    }

    pub fn shared(file_id: u32) -> SharedFile {
        Self::new(file_id)
    }

    pub fn log(&self) -> Vec<IoOp> {
        self.log.lock().clone()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }

    pub fn writes(&self) -> Vec<u32> {
        self.log
            .lock()
            .iter()
            .filter_map(|op| match op {
                IoOp::Write(n) => Some(*n),
                _ => None,
            })
            .collect()
    }

    pub fn reads(&self) -> Vec<u32> {
        self.log
            .lock()
            .iter()
            .filter_map(|op| match op {
                IoOp::Read(n) => Some(*n),
                _ => None,
            })
            .collect()
    }

    /// Returns the stored copy of a page, bypassing the log.
    pub fn stored(&self, page_num: u32) -> Option<Box<PageBuf>> {
        self.pages.lock().get(&page_num).cloned()
    }

    fn not_found(&self, page_num: u32) -> TidepoolError {
        TidepoolError::PageNotFound {
            page_id: PageId::new(self.file_id, page_num),
        }
    }
}

impl PageFile for TestFile {
    fn file_id(&self) -> FileId {
        self.file_id
    }

    fn read_page(&self, page_num: u32, dst: &mut PageBuf) -> Result<()> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(TidepoolError::IoError("injected read failure".to_string()));
        }
        let pages = self.pages.lock();
        let page = pages.get(&page_num).ok_or_else(|| self.not_found(page_num))?;
        dst.copy_from_slice(&page[..]);
        self.log.lock().push(IoOp::Read(page_num));
        Ok(())
    }

    fn write_page(&self, page_num: u32, src: &PageBuf) -> Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(TidepoolError::IoError("injected write failure".to_string()));
        }
        let mut pages = self.pages.lock();
        let page = pages
            .get_mut(&page_num)
            .ok_or_else(|| self.not_found(page_num))?;
        page.copy_from_slice(src);
        self.log.lock().push(IoOp::Write(page_num));
        Ok(())
    }

    fn allocate_page(&self) -> Result<u32> {
        if self.fail_allocs.load(Ordering::Relaxed) {
            return Err(TidepoolError::IoError("injected allocate failure".to_string()));
        }
        let mut next = self.next_page.lock();
        let page_num = *next;
        *next += 1;
        self.pages.lock().insert(page_num, Box::new([0u8; PAGE_SIZE]));
        self.log.lock().push(IoOp::Allocate(page_num));
        Ok(page_num)
    }

    fn dispose_page(&self, page_num: u32) -> Result<()> {
        if self.fail_disposes.load(Ordering::SeqCst) {
            return Err(TidepoolError::IoError("injected dispose failure".to_string()));
        }
        self.pages
            .lock()
            .remove(&page_num)
            .ok_or_else(|| self.not_found(page_num))?;
        self.log.lock().push(IoOp::Dispose(page_num));
        Ok(())
    }
}

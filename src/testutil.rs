//! Shared fixtures for unit tests.

use core::fmt;
use std::boxed::Box;
use std::string::String;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::vec;

use log::LevelFilter;

use crate::cap::{Dispatcher, DispatcherBase, Handle, Koid};
use crate::klog;
use crate::mm::{Page, RegionVm};

/// Everything the kernel logger has written during this test run.
static CAPTURED: Mutex<String> = Mutex::new(String::new());

struct CaptureSink;

impl fmt::Write for CaptureSink {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        CAPTURED.lock().map_err(|_| fmt::Error)?.push_str(s);
        Ok(())
    }
}

/// Route all log output into an in-memory buffer.
///
/// Tests share the buffer, so match on text only one test produces.
pub fn capture_logs() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        klog::init(Box::leak(Box::new(CaptureSink)), LevelFilter::Trace).expect("logger");
    });
}

/// Number of captured log lines containing `needle`.
pub fn captured_lines(needle: &str) -> usize {
    CAPTURED
        .lock()
        .unwrap()
        .lines()
        .filter(|line| line.contains(needle))
        .count()
}

/// Leak `count` zeroed, page-aligned pages.
pub fn leak_pages(count: usize) -> &'static mut [Page] {
    Box::leak(vec![Page::ZERO; count].into_boxed_slice())
}

/// A VM backed by `pages` leaked pages (one of which holds its bitmap).
pub fn leak_vm(pages: usize) -> &'static RegionVm {
    Box::leak(Box::new(RegionVm::new(leak_pages(pages)).expect("region")))
}

/// Dispatcher that records every callback the handle layer makes.
#[derive(Default)]
pub struct TestDispatcher {
    base: DispatcherBase,
    waitable: bool,
    pub zero_handles: AtomicUsize,
    pub cancels: AtomicUsize,
    pub owner: AtomicU64,
}

impl TestDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn waitable() -> Arc<Self> {
        Arc::new(Self {
            waitable: true,
            ..Self::default()
        })
    }

    pub fn zero_handle_calls(&self) -> usize {
        self.zero_handles.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl Dispatcher for TestDispatcher {
    fn base(&self) -> &DispatcherBase {
        &self.base
    }

    fn is_waitable(&self) -> bool {
        self.waitable
    }

    fn cancel(&self, _handle: &Handle) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn on_zero_handles(&self) {
        self.zero_handles.fetch_add(1, Ordering::SeqCst);
    }

    fn set_owner(&self, owner: Koid) {
        self.owner.store(owner.as_u64(), Ordering::SeqCst);
    }
}

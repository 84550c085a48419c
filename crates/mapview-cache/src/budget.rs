//! Cache sizing from available memory and from the visible viewport.
//!
//! The startup budget is the number of worst-case chunks that fit in the
//! memory currently available. The ceiling is twice that, since most
//! chunks hold far fewer than sixteen sections.

use mapview_common::CHUNK_SPAN;
use tracing::{info, warn};

use crate::chunk::{Chunk, MAX_SECTIONS};

/// Budget used when available memory cannot be determined.
pub const FALLBACK_BUDGET: usize = 10_000;

/// Estimated resident size of one fully populated section, in bytes.
///
/// Block ids, block data, and two light arrays for a 16x16x16 section.
pub const SECTION_FOOTPRINT_BYTES: usize = 16 * 16 * 16 * 2 + 3 * (16 * 16 * 16 / 2);

/// Reports how much physical memory is available.
pub trait MemoryProbe: Send + Sync {
    /// Available bytes, or `None` if the platform cannot tell.
    fn available_bytes(&self) -> Option<u64>;
}

/// Queries the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMemory;

impl MemoryProbe for SystemMemory {
    fn available_bytes(&self) -> Option<u64> {
        detect_available_memory()
    }
}

/// Reports a fixed amount of memory.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemory(pub Option<u64>);

impl MemoryProbe for FixedMemory {
    fn available_bytes(&self) -> Option<u64> {
        self.0
    }
}

/// Startup budget and absolute ceiling, in chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheBudget {
    /// Budget applied at startup
    pub initial: usize,
    /// Upper bound for any viewport-derived budget
    pub ceiling: usize,
}

impl CacheBudget {
    /// Builds a budget with the ceiling at twice the initial value.
    #[must_use]
    pub const fn from_initial(initial: usize) -> Self {
        Self {
            initial,
            ceiling: initial.saturating_mul(2),
        }
    }

    /// Sizes the budget from the probe, falling back to `fallback` chunks.
    #[must_use]
    pub fn from_probe(probe: &dyn MemoryProbe, footprint: usize, fallback: usize) -> Self {
        let initial = match probe.available_bytes() {
            Some(bytes) => {
                let chunks = bytes / footprint.max(1) as u64;
                usize::try_from(chunks).unwrap_or(usize::MAX).max(1)
            },
            None => {
                warn!(fallback, "Could not detect available memory, using fallback budget");
                fallback
            },
        };
        let budget = Self::from_initial(initial);
        info!(
            initial = budget.initial,
            ceiling = budget.ceiling,
            "Sized chunk cache"
        );
        budget
    }
}

/// Estimated bytes for a chunk with every section populated.
#[must_use]
pub fn chunk_footprint(section_bytes: usize) -> usize {
    std::mem::size_of::<Chunk>() + MAX_SECTIONS * section_bytes
}

/// Number of chunks to keep for a viewport of the given pixel size.
///
/// Counts every chunk the viewport touches and adds 10% for scrolling.
#[must_use]
pub fn viewport_budget(width_px: u32, height_px: u32) -> usize {
    let span = u64::from(CHUNK_SPAN);
    let chunks_x = u64::from(width_px).div_ceil(span);
    let chunks_y = u64::from(height_px).div_ceil(span);
    let visible = chunks_x * chunks_y;
    let budget = visible * 11 / 10;
    usize::try_from(budget).unwrap_or(usize::MAX)
}

#[cfg(target_os = "linux")]
fn detect_available_memory() -> Option<u64> {
    detect_meminfo().or_else(detect_sysconf)
}

#[cfg(target_os = "macos")]
fn detect_available_memory() -> Option<u64> {
    detect_free_pages()
}

#[cfg(windows)]
fn detect_available_memory() -> Option<u64> {
    detect_memory_status()
}

#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
fn detect_available_memory() -> Option<u64> {
    None
}

/// Reads `MemAvailable` from /proc/meminfo.
#[cfg(target_os = "linux")]
fn detect_meminfo() -> Option<u64> {
    let contents = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo(&contents)
}

/// Extracts `MemAvailable` (reported in kB) as bytes.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_meminfo(contents: &str) -> Option<u64> {
    contents.lines().find_map(|line| {
        let rest = line.strip_prefix("MemAvailable:")?;
        let kb: u64 = rest.split_whitespace().next()?.parse().ok()?;
        Some(kb * 1024)
    })
}

/// Available physical pages times page size.
#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn detect_sysconf() -> Option<u64> {
    // SAFETY: sysconf only reads system configuration values.
    let (pages, page_size) =
        unsafe { (libc::sysconf(libc::_SC_AVPHYS_PAGES), libc::sysconf(libc::_SC_PAGE_SIZE)) };
    pages_to_bytes(i64::from(pages), i64::from(page_size))
}

/// Free pages reported by the VM subsystem times page size.
#[cfg(target_os = "macos")]
#[allow(unsafe_code)]
fn detect_free_pages() -> Option<u64> {
    let mut free: u32 = 0;
    let mut len = std::mem::size_of::<u32>();
    // SAFETY: the name is NUL-terminated and `len` matches the buffer size.
    let rc = unsafe {
        libc::sysctlbyname(
            b"vm.page_free_count\0".as_ptr().cast(),
            std::ptr::addr_of_mut!(free).cast(),
            &mut len,
            std::ptr::null_mut(),
            0,
        )
    };
    if rc != 0 {
        return None;
    }
    // SAFETY: sysconf only reads system configuration values.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    pages_to_bytes(i64::from(free), i64::from(page_size))
}

/// The smaller of available physical and available virtual memory.
#[cfg(windows)]
#[allow(unsafe_code)]
fn detect_memory_status() -> Option<u64> {
    use windows_sys::Win32::System::SystemInformation::{GlobalMemoryStatusEx, MEMORYSTATUSEX};

    // SAFETY: MEMORYSTATUSEX is plain data; all-zero is a valid value.
    let mut status: MEMORYSTATUSEX = unsafe { std::mem::zeroed() };
    status.dwLength = std::mem::size_of::<MEMORYSTATUSEX>() as u32;
    // SAFETY: `status` is a valid, writable MEMORYSTATUSEX with dwLength set.
    if unsafe { GlobalMemoryStatusEx(&mut status) } == 0 {
        return None;
    }
    usable_memory(status.ullAvailPhys, status.ullAvailVirtual)
}

/// Bytes a process can actually use: physical memory capped by its
/// remaining address space.
#[cfg_attr(not(windows), allow(dead_code))]
fn usable_memory(avail_phys: u64, avail_virtual: u64) -> Option<u64> {
    match avail_phys.min(avail_virtual) {
        0 => None,
        bytes => Some(bytes),
    }
}

#[cfg_attr(not(any(target_os = "linux", target_os = "macos")), allow(dead_code))]
fn pages_to_bytes(pages: i64, page_size: i64) -> Option<u64> {
    if pages <= 0 || page_size <= 0 {
        return None;
    }
    Some((pages as u64).saturating_mul(page_size as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_viewport_budget_800x600() {
        // 50 x 38 chunks visible, plus 10%.
        assert_eq!(viewport_budget(800, 600), 2090);
    }

    #[test]
    fn test_viewport_budget_partial_chunks_round_up() {
        assert_eq!(viewport_budget(1, 1), 1);
        assert_eq!(viewport_budget(17, 16), 2);
        assert_eq!(viewport_budget(0, 600), 0);
        assert_eq!(viewport_budget(160, 160), 110);
    }

    #[test]
    fn test_budget_from_probe() {
        let footprint = 1000;
        let budget = CacheBudget::from_probe(&FixedMemory(Some(5_000_000)), footprint, 7);
        assert_eq!(budget.initial, 5000);
        assert_eq!(budget.ceiling, 10_000);
    }

    #[test]
    fn test_budget_fallback_when_unknown() {
        let budget = CacheBudget::from_probe(&FixedMemory(None), 1000, FALLBACK_BUDGET);
        assert_eq!(budget.initial, 10_000);
        assert_eq!(budget.ceiling, 20_000);
    }

    #[test]
    fn test_budget_never_zero() {
        let budget = CacheBudget::from_probe(&FixedMemory(Some(10)), 1000, 7);
        assert_eq!(budget.initial, 1);
        assert_eq!(budget.ceiling, 2);
    }

    #[test]
    fn test_chunk_footprint_covers_sections() {
        let footprint = chunk_footprint(SECTION_FOOTPRINT_BYTES);
        assert!(footprint >= MAX_SECTIONS * SECTION_FOOTPRINT_BYTES);
    }

    #[test]
    fn test_parse_meminfo() {
        let sample = "MemTotal:       16318480 kB\nMemFree:         1234567 kB\nMemAvailable:    8000000 kB\n";
        assert_eq!(parse_meminfo(sample), Some(8_000_000 * 1024));
        assert_eq!(parse_meminfo("MemTotal: 1 kB\n"), None);
    }

    #[test]
    fn test_system_memory_probe_does_not_panic() {
        let _ = SystemMemory.available_bytes();
    }

    #[test]
    fn test_pages_to_bytes() {
        assert_eq!(pages_to_bytes(10, 4096), Some(40_960));
        assert_eq!(pages_to_bytes(0, 4096), None);
        assert_eq!(pages_to_bytes(-1, 4096), None);
        assert_eq!(pages_to_bytes(10, -1), None);
    }

    #[test]
    fn test_usable_memory_takes_smaller_pool() {
        assert_eq!(usable_memory(8 << 30, 2 << 30), Some(2 << 30));
        assert_eq!(usable_memory(1 << 30, 128 << 40), Some(1 << 30));
        assert_eq!(usable_memory(0, 1 << 30), None);
    }

    #[cfg(any(target_os = "linux", target_os = "macos", windows))]
    #[test]
    fn test_system_memory_reports_on_supported_platforms() {
        let bytes = SystemMemory.available_bytes().expect("available memory");
        assert!(bytes > 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_sysconf_fallback_reports_memory() {
        assert!(detect_sysconf().is_some_and(|bytes| bytes > 0));
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn test_free_pages_reports_memory() {
        assert!(detect_free_pages().is_some_and(|bytes| bytes > 0));
    }

    #[cfg(windows)]
    #[test]
    fn test_memory_status_reports_memory() {
        assert!(detect_memory_status().is_some_and(|bytes| bytes > 0));
    }

    proptest! {
        #[test]
        fn larger_viewport_never_shrinks_budget(
            w in 0u32..8000, h in 0u32..8000, dw in 0u32..500, dh in 0u32..500
        ) {
            prop_assert!(viewport_budget(w + dw, h + dh) >= viewport_budget(w, h));
        }
    }
}

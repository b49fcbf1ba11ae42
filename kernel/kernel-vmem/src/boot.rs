//! # Bootstrap Sequencer
//!
//! One-shot hand-over from the bootloader to the memory manager. The
//! loader leaves behind a linearly-mapped bootstrap region (guest
//! image, its page-table frames, a stack) and a descriptor naming
//! them; bootstrap computes the frame/heap ranges, installs the
//! recursive mapping, and strips the loader's now-unneeded mappings.
//!
//! Every transition runs exactly once and is never retried; a failure
//! here is fatal to the guest, there is no address space to fall back
//! to.

use crate::entry::PageEntry;
use crate::manager::MemoryManager;
use crate::table::{RECURSIVE_INDEX, TableAccess};
use kernel_addresses::{PAGE_SIZE, Pfn, VirtAddr, align_up};
use kernel_hypercall::{FrameTranslate, HypercallStatus, Hypercalls, UpdateVaFlags};

/// Addresses below this are identity mappings left by the loader and
/// are torn down during bootstrap.
pub const LOW_IDENTITY_LIMIT: u64 = 0x40000;

/// Minimum padding kept above the bootstrap stack base.
pub const BOOTSTRAP_STACK_PAD: u64 = 0x8_0000; // 512 KiB

/// The bootstrap region end is rounded up to this alignment.
pub const BOOTSTRAP_ALIGN: u64 = 0x40_0000; // 4 MiB

const _: () = {
    assert!(BOOTSTRAP_ALIGN.is_power_of_two());
    assert!(LOW_IDENTITY_LIMIT.is_multiple_of(PAGE_SIZE));
};

/// What the loader hands over: where its page tables start, how many
/// frames they occupy, and how many frames the guest owns in total.
#[repr(C)]
#[derive(Clone, Debug)]
pub struct BootDescriptor {
    /// Linear address of the loader-built top-level table.
    pub page_table_base: VirtAddr,

    /// Number of frames occupied by the loader's page tables,
    /// starting at `page_table_base`.
    pub nr_page_table_frames: u64,

    /// Total number of frames in the guest's pool.
    pub nr_pages: u64,
}

/// Bootstrap progress. Strictly forward, terminal at `Ready`.
///
/// The initial state (nothing computed yet) has no variant: it only
/// exists before [`MemoryManager::bootstrap`] is entered, and no
/// manager value exists to carry it.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum BootStage {
    /// Frame and heap ranges derived from the descriptor.
    RangesComputed,
    /// Top-level slot 511 points at the top-level table; the
    /// page-table view is usable from here on.
    RecursiveMappingInstalled,
    /// Loader identity mappings below [`LOW_IDENTITY_LIMIT`] cleared.
    LowAddressesUnmapped,
    /// Mappings exposing the loader's page-table frames cleared.
    BootstrapTablesUnmapped,
    /// The manager's public entry points are available.
    Ready,
}

/// Failure during bootstrap. Always fatal: callers must halt the
/// guest, there is no degraded mode without a valid address space.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// The hypervisor refused the self-referential top-level entry.
    #[error("installing the recursive mapping failed: {0}")]
    RecursiveMapping(#[from] HypercallStatus),
}

impl<'p, P> MemoryManager<'p, P>
where
    P: Hypercalls + FrameTranslate + TableAccess,
{
    /// Run the one-shot bootstrap sequence and return the ready
    /// manager.
    ///
    /// Call exactly once, single-threaded, before any other memory
    /// operation.
    ///
    /// # Errors
    /// [`BootstrapError`]: fatal, see the type docs.
    pub fn bootstrap(platform: &'p P, info: &BootDescriptor) -> Result<Self, BootstrapError> {
        let pt_start = info.page_table_base.pfn();
        let pt_end = pt_start.add(info.nr_page_table_frames);

        let bootstrap_stack_pfn = pt_end.add(1);
        let bootstrap_end = align_up(
            bootstrap_stack_pfn.vaddr().as_u64() + BOOTSTRAP_STACK_PAD,
            BOOTSTRAP_ALIGN,
        );
        let bootstrap_end_pfn = VirtAddr::new(bootstrap_end).pfn();
        let next_pfn = bootstrap_end_pfn.add(1);

        let mut mm = Self {
            platform,
            bootstrap_stack_pfn,
            bootstrap_end_pfn,
            next_pfn,
            last_pfn: Pfn::new(info.nr_pages),
            next_heap_page: next_pfn.vaddr(),
            l4_pfn: pt_start,
            l4_mfn: platform.machine_frame(pt_start),
            stage: BootStage::RangesComputed,
        };

        mm.install_recursive_mapping()?;
        mm.unmap_low_addresses();
        mm.unmap_bootstrap_tables(info.nr_page_table_frames);

        mm.stage = BootStage::Ready;
        log::info!(
            "memory manager ready: frames {}..{}, heap at {}",
            mm.next_pfn,
            mm.last_pfn,
            mm.next_heap_page
        );
        Ok(mm)
    }

    /// Point the top-level table's reserved slot at the top-level
    /// table itself, making the page-table view reachable.
    fn install_recursive_mapping(&mut self) -> Result<(), BootstrapError> {
        self.write_entry(
            self.l4_mfn,
            RECURSIVE_INDEX,
            self.l4_mfn,
            PageEntry::table_flags(),
        )?;
        self.stage = BootStage::RecursiveMappingInstalled;
        Ok(())
    }

    /// Clear the loader's identity mappings below
    /// [`LOW_IDENTITY_LIMIT`]. Best-effort hygiene: a refused unmap is
    /// logged and tolerated.
    fn unmap_low_addresses(&mut self) {
        let mut addr = 0;
        while addr < LOW_IDENTITY_LIMIT {
            self.unmap_bootstrap_page(VirtAddr::new(addr));
            addr += PAGE_SIZE;
        }
        self.stage = BootStage::LowAddressesUnmapped;
    }

    /// Clear the linear mappings exposing the loader's page-table
    /// frames; the recursive mapping supersedes them.
    fn unmap_bootstrap_tables(&mut self, nr_frames: u64) {
        for i in 0..nr_frames {
            self.unmap_bootstrap_page(self.l4_pfn.add(i).vaddr());
        }
        self.stage = BootStage::BootstrapTablesUnmapped;
    }

    fn unmap_bootstrap_page(&self, va: VirtAddr) {
        if let Err(status) =
            self.platform
                .update_va_mapping(va, 0, UpdateVaFlags::InvalidatePage)
        {
            log::warn!("bootstrap unmap of {va} refused: {status}");
        }
    }
}

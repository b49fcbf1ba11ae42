//! # Memory Manager and Mapping Engine
//!
//! The process-wide owner of the guest's frame pool and heap address
//! range, and the four-level mapping engine on top of them.
//!
//! Exactly one [`MemoryManager`] exists per guest; it is explicitly
//! constructed by [`bootstrap`](MemoryManager::bootstrap) and passed by
//! reference to the call sites that need it. It performs no internal
//! locking: **callers must serialize access**; two unsynchronized
//! callers would double-issue or skip cursor values.
//!
//! Both allocators are monotonic: frames and heap addresses are handed
//! out once and never reclaimed. There is no free path by design.

use crate::boot::BootStage;
use crate::entry::{PageEntry, TableIndex, split_indices};
use crate::table::{TableAccess, l1_table_va, l2_table_va, l3_table_va, l4_table_va};
use kernel_addresses::{Mfn, PAGE_SIZE, Pfn, VirtAddr, align_up};
use kernel_hypercall::{DomId, FrameTranslate, HypercallStatus, Hypercalls, MmuExtOp, MmuUpdate};

/// Failure reported out of a mapping operation.
///
/// The engine never retries; whether to propagate, retry with other
/// parameters, or halt is the caller's decision. A partially-extended
/// hierarchy stays in place; later calls find the built levels and
/// resume.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    /// The frame pool is exhausted. Not locally recoverable: no
    /// additional frames can appear.
    #[error("guest frame pool exhausted")]
    OutOfFrames,

    /// The hypervisor rejected a page-table update.
    #[error("mapping rejected: {0}")]
    Rejected(#[from] HypercallStatus),
}

/// One zero-filled page handed out with its physical identity, for
/// collaborators that need the backing frame alongside a usable
/// address.
#[derive(Debug, Copy, Clone)]
pub struct PhysicalPageGrant {
    /// Machine frame backing the page.
    pub frame: Mfn,
    /// Page size in bytes.
    pub size: u64,
    /// Virtual address the page is mapped at.
    pub addr: VirtAddr,
}

/// The guest's memory manager. See the module docs for the ownership
/// and serialization contract.
pub struct MemoryManager<'p, P> {
    pub(crate) platform: &'p P,

    /// First frame of the loader-provided bootstrap stack.
    pub(crate) bootstrap_stack_pfn: Pfn,
    /// Last frame of the padded, alignment-rounded bootstrap region.
    pub(crate) bootstrap_end_pfn: Pfn,

    /// Next frame to hand out. Invariant: `next_pfn <= last_pfn`.
    pub(crate) next_pfn: Pfn,
    /// Exclusive end of the guest's frame pool.
    pub(crate) last_pfn: Pfn,

    /// Next unpromised heap address; only ever increases.
    pub(crate) next_heap_page: VirtAddr,

    /// Guest frame of the top-level table.
    pub(crate) l4_pfn: Pfn,
    /// Machine frame of the top-level table.
    pub(crate) l4_mfn: Mfn,

    pub(crate) stage: BootStage,
}

impl<'p, P> MemoryManager<'p, P>
where
    P: Hypercalls + FrameTranslate + TableAccess,
{
    /// Bootstrap progress; `Ready` once construction returns.
    #[must_use]
    pub const fn stage(&self) -> BootStage {
        self.stage
    }

    /// First frame of the bootstrap stack range.
    #[must_use]
    pub const fn bootstrap_stack_pfn(&self) -> Pfn {
        self.bootstrap_stack_pfn
    }

    /// Last frame of the bootstrap region.
    #[must_use]
    pub const fn bootstrap_end_pfn(&self) -> Pfn {
        self.bootstrap_end_pfn
    }

    /// Hand out the next unused guest frame and advance the cursor.
    ///
    /// Monotonic: no frame is returned twice and there is no free
    /// operation. Returns `None` once the pool is exhausted; callers
    /// must propagate the refusal, no retry can succeed.
    pub fn reserve_frame(&mut self) -> Option<Pfn> {
        if self.next_pfn == self.last_pfn {
            return None;
        }
        let pfn = self.next_pfn;
        self.next_pfn = pfn.add(1);
        Some(pfn)
    }

    /// Reserve `n` contiguous, page-aligned virtual pages and return
    /// their base.
    ///
    /// A bare reservation is address space promised, not yet mapped:
    /// every page must be mapped before first use or the access
    /// faults.
    pub fn reserve_heap_pages(&mut self, n: u64) -> VirtAddr {
        let base = self.next_heap_page;
        self.next_heap_page = base + n * PAGE_SIZE;
        base
    }

    /// Reserve one frame and have the hypervisor zero-fill it, so no
    /// caller can observe stale or foreign data. Returns the machine
    /// frame, ready for use in entries and hypercalls.
    pub fn phys_alloc_page(&mut self) -> Option<Mfn> {
        let pfn = self.reserve_frame()?;
        let mfn = self.platform.machine_frame(pfn);
        self.clear_frame(mfn);
        Some(mfn)
    }

    /// Zero-fill maintenance request. A refusal is logged and
    /// tolerated.
    fn clear_frame(&self, frame: Mfn) {
        if let Err(status) = self
            .platform
            .mmuext_op(&[MmuExtOp::clear_page(frame)], DomId::SELF)
        {
            log::warn!("clear of machine frame {frame} refused: {status}");
        }
    }

    /// The entry-write primitive: pack `frame` and `flags` into an
    /// entry and issue one validated update for the `index`-th slot of
    /// the table in machine frame `table`.
    ///
    /// Returns the written entry so callers can descend through it. A
    /// rejected update is logged and returned as the error; the
    /// enclosing operation should be treated as failed.
    pub(crate) fn write_entry(
        &self,
        table: Mfn,
        index: TableIndex,
        frame: Mfn,
        flags: PageEntry,
    ) -> Result<PageEntry, HypercallStatus> {
        let entry = flags.with_machine_frame(frame);
        let update = MmuUpdate::entry(table, index.as_usize(), entry.raw());
        if let Err(status) = self.platform.mmu_update(&[update], DomId::SELF) {
            log::error!("update of table 0x{:x}[{index}] rejected: {status}", table.as_u64());
            return Err(status);
        }
        Ok(entry)
    }

    /// Install a present, writable leaf entry mapping `va` to the
    /// machine frame `frame`, extending the hierarchy on demand.
    ///
    /// Walks top-down; an absent intermediate level gets a fresh
    /// zero-filled frame installed with table flags. An already-present
    /// leaf is overwritten idempotently. On success the page has been
    /// touched once and is immediately usable.
    ///
    /// # Errors
    /// [`MapError::OutOfFrames`] if an intermediate allocation fails,
    /// [`MapError::Rejected`] if the hypervisor refuses an update.
    /// Already-built levels stay in place either way.
    pub fn map_page(&mut self, va: VirtAddr, frame: Mfn) -> Result<(), MapError> {
        debug_assert!(va.is_page_aligned());
        let [i4, i3, i2, i1] = split_indices(va);

        let l4 = unsafe { self.platform.table_at(l4_table_va()) };
        let mut e4 = l4.get(i4);
        if !e4.present() {
            let table = self.phys_alloc_page().ok_or(MapError::OutOfFrames)?;
            e4 = self.write_entry(self.l4_mfn, i4, table, PageEntry::table_flags())?;
        }

        let l3 = unsafe { self.platform.table_at(l3_table_va(i4)) };
        let mut e3 = l3.get(i3);
        if !e3.present() {
            let table = self.phys_alloc_page().ok_or(MapError::OutOfFrames)?;
            e3 = self.write_entry(e4.machine_frame(), i3, table, PageEntry::table_flags())?;
        }

        let l2 = unsafe { self.platform.table_at(l2_table_va(i4, i3)) };
        let mut e2 = l2.get(i2);
        if !e2.present() {
            let table = self.phys_alloc_page().ok_or(MapError::OutOfFrames)?;
            e2 = self.write_entry(e3.machine_frame(), i2, table, PageEntry::table_flags())?;
        }

        self.write_entry(e2.machine_frame(), i1, frame, PageEntry::leaf_flags())?;

        // Success means the page is observably active before we return.
        unsafe { self.platform.probe(va) };
        Ok(())
    }

    /// Back `va` with one newly allocated, zero-filled page.
    ///
    /// # Errors
    /// See [`map_page`](Self::map_page).
    pub fn alloc_page(&mut self, va: VirtAddr) -> Result<(), MapError> {
        let frame = self.phys_alloc_page().ok_or(MapError::OutOfFrames)?;
        self.map_page(va, frame)
    }

    /// Back `n` pages at `hint`, or at a freshly reserved range if no
    /// hint is given. Pages are backed sequentially; the first failure
    /// is reported and already-backed pages are **not** rolled back.
    ///
    /// # Errors
    /// See [`map_page`](Self::map_page).
    pub fn alloc_pages(&mut self, hint: Option<VirtAddr>, n: u64) -> Result<VirtAddr, MapError> {
        let base = match hint {
            Some(va) => va,
            None => self.reserve_heap_pages(n),
        };
        for i in 0..n {
            self.alloc_page(base + i * PAGE_SIZE)?;
        }
        Ok(base)
    }

    /// Round `byte_count` up to whole pages and back them, optionally
    /// at a caller-chosen address. The hint is honored exactly or the
    /// call fails.
    ///
    /// # Errors
    /// See [`map_page`](Self::map_page). Callers that cannot decline
    /// (the guest's top-level allocation path) must treat
    /// [`MapError::OutOfFrames`] as fatal, since memory is
    /// unrecoverable at that point; this layer only reports.
    pub fn allocate(
        &mut self,
        hint: Option<VirtAddr>,
        byte_count: u64,
    ) -> Result<VirtAddr, MapError> {
        let pages = align_up(byte_count, PAGE_SIZE) / PAGE_SIZE;
        self.alloc_pages(hint, pages)
    }

    /// Map externally-obtained machine frames (a device ring, a
    /// hypervisor-granted page) at a freshly reserved range, in order.
    ///
    /// The frames are *not* drawn from the local pool; only the
    /// intermediate tables may consume local frames.
    ///
    /// # Errors
    /// See [`map_page`](Self::map_page).
    pub fn map_frames(&mut self, frames: &[Mfn]) -> Result<VirtAddr, MapError> {
        let base = self.reserve_heap_pages(frames.len() as u64);
        let mut va = base;
        for &frame in frames {
            self.map_page(va, frame)?;
            va += PAGE_SIZE;
        }
        Ok(base)
    }

    /// One zero-filled page plus its physical identity.
    ///
    /// # Errors
    /// See [`map_page`](Self::map_page).
    pub fn allocate_physical_page(&mut self) -> Result<PhysicalPageGrant, MapError> {
        let frame = self.phys_alloc_page().ok_or(MapError::OutOfFrames)?;
        let addr = self.reserve_heap_pages(1);
        self.map_page(addr, frame)?;
        Ok(PhysicalPageGrant {
            frame,
            size: PAGE_SIZE,
            addr,
        })
    }

    /// Diagnostic dump of the walk for `va`: logs the entry found at
    /// each level, stopping at the first absent one. Read-only; never
    /// allocates or mutates.
    pub fn page_table_walk(&self, va: VirtAddr) {
        let [i4, i3, i2, i1] = split_indices(va);
        log::debug!("page table walk from {va}");

        let l4 = unsafe { self.platform.table_at(l4_table_va()) };
        let e4 = l4.get(i4);
        log::debug!("L4[{i4}] = {e4}");
        if !e4.present() {
            return;
        }

        let l3 = unsafe { self.platform.table_at(l3_table_va(i4)) };
        let e3 = l3.get(i3);
        log::debug!("L3[{i3}] = {e3}");
        if !e3.present() {
            return;
        }

        let l2 = unsafe { self.platform.table_at(l2_table_va(i4, i3)) };
        let e2 = l2.get(i2);
        log::debug!("L2[{i2}] = {e2}");
        if !e2.present() {
            return;
        }

        let l1 = unsafe { self.platform.table_at(l1_table_va(i4, i3, i2)) };
        let e1 = l1.get(i1);
        log::debug!("L1[{i1}] = {e1}");
    }
}

//! # Recursive Page-Table View
//!
//! The guest cannot dereference a frame number directly: a table is
//! readable only if some existing mapping already exposes it. The
//! recursive mapping solves the chicken-and-egg: the top-level table's
//! slot [`RECURSIVE_INDEX`] points back at the top-level table itself,
//! so repeating that index at each step of the walk exposes every table
//! of the hierarchy at a fixed, statically-computable virtual address.
//!
//! The view is **read-only**. Writes go through the hypervisor's
//! validated update path ([`kernel_hypercall::Hypercalls::mmu_update`]);
//! a direct store into page-table memory would be refused by the
//! hypervisor's frame typing anyway.

use crate::entry::{PageEntry, TableIndex};
use kernel_addresses::VirtAddr;

/// The top-level slot reserved for the self-referential mapping.
///
/// Off-limits to the general mapping path: no virtual address whose
/// top-level index is 511 may be mapped, as that region *is* the
/// page-table view.
pub const RECURSIVE_INDEX: TableIndex = TableIndex::new(511);

/// Base of the virtual region exposing all page tables; the
/// sign-extended address with top-level index 511.
pub const TABLE_AREA_BASE: u64 = 0xFFFF_FF80_0000_0000;

const fn area_va(a: u64, b: u64, c: u64) -> VirtAddr {
    VirtAddr::new(TABLE_AREA_BASE + (a << 30) + (b << 21) + (c << 12))
}

/// Address of the top-level table (recursive index repeated four
/// times).
#[inline]
#[must_use]
pub const fn l4_table_va() -> VirtAddr {
    area_va(511, 511, 511)
}

/// Address of the L3 table serving top-level slot `i4`.
#[inline]
#[must_use]
pub const fn l3_table_va(i4: TableIndex) -> VirtAddr {
    area_va(511, 511, i4.as_u64())
}

/// Address of the L2 table serving slots `i4`/`i3`.
#[inline]
#[must_use]
pub const fn l2_table_va(i4: TableIndex, i3: TableIndex) -> VirtAddr {
    area_va(511, i4.as_u64(), i3.as_u64())
}

/// Address of the L1 table serving slots `i4`/`i3`/`i2`.
#[inline]
#[must_use]
pub const fn l1_table_va(i4: TableIndex, i3: TableIndex, i2: TableIndex) -> VirtAddr {
    area_va(i4.as_u64(), i3.as_u64(), i2.as_u64())
}

/// One page-sized table: 512 entries, 4 KiB-aligned.
///
/// Obtained through [`TableAccess::table_at`]; read-only by design.
#[repr(C, align(4096))]
pub struct TableFrame {
    entries: [PageEntry; 512],
}

impl TableFrame {
    /// Read the entry at `i`. Plain load, O(1).
    #[inline]
    #[must_use]
    pub const fn get(&self, i: TableIndex) -> PageEntry {
        self.entries[i.as_usize()]
    }
}

/// Resolves recursive-area virtual addresses to table references.
///
/// The guest binary implements this with a plain pointer cast
/// ([`DirectTableAccess`]), since the recursive mapping makes the
/// address directly dereferenceable. Tests implement it with a
/// software walk over an emulated machine.
pub trait TableAccess {
    /// Borrow the table exposed at `va` (one of the `*_table_va`
    /// addresses).
    ///
    /// # Safety
    /// `va` must lie in the recursive area and the recursive mapping
    /// must be installed; the returned reference is valid for as long
    /// as the backing mapping stays intact.
    unsafe fn table_at<'a>(&self, va: VirtAddr) -> &'a TableFrame;

    /// Touch the page at `va` with one write, forcing the new mapping
    /// to be observably active before the mapping call returns.
    ///
    /// # Safety
    /// `va` must be mapped writable.
    unsafe fn probe(&self, va: VirtAddr);
}

/// On-target implementation: recursive-area addresses are ordinary
/// pointers once the recursive mapping is installed.
pub struct DirectTableAccess;

impl TableAccess for DirectTableAccess {
    #[inline]
    unsafe fn table_at<'a>(&self, va: VirtAddr) -> &'a TableFrame {
        unsafe { &*(va.as_u64() as usize as *const TableFrame) }
    }

    #[inline]
    unsafe fn probe(&self, va: VirtAddr) {
        unsafe { core::ptr::write_volatile(va.as_u64() as usize as *mut u64, 0) };
    }
}

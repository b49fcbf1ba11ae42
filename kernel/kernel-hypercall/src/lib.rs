//! # Hypervisor Call Boundary
//!
//! The guest runs deprivileged: it may read its page tables as ordinary
//! memory, but every *mutation* of paging state has to be requested
//! through a validated hypervisor call so the hypervisor can check that
//! the new entry grants nothing illegitimate. This crate models that
//! boundary:
//!
//! - Wire structures for the requests ([`MmuUpdate`], [`MmuExtOp`]),
//!   laid out exactly as the call ABI expects (`#[repr(C)]`).
//! - The [`Hypercalls`] trait, the only mutation path for page-table
//!   state. The guest binary implements it with real hypercall stubs;
//!   tests implement it with an in-memory machine.
//! - The [`FrameTranslate`] trait, the external, injective
//!   guest-frame → machine-frame translation.
//!
//! A non-zero status from the hypervisor surfaces as
//! [`HypercallStatus`]; whether that is fatal is the caller's decision
//! (bootstrap cleanup tolerates it, a mapping operation fails on it).

#![cfg_attr(not(test), no_std)]

use kernel_addresses::{Mfn, Pfn, VirtAddr};

/// A domain identifier for hypercall requests.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct DomId(pub u16);

impl DomId {
    /// The calling domain itself.
    pub const SELF: Self = Self(0x7FF0);
}

/// One validated page-table entry update.
///
/// `ptr` names the entry slot by **machine byte address**; `val` is the
/// complete new entry (machine frame bits plus flag bits). The
/// hypervisor validates the write before applying it.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct MmuUpdate {
    /// Machine byte address of the page-table slot to update.
    pub ptr: u64,
    /// The new raw entry value.
    pub val: u64,
}

impl MmuUpdate {
    /// Update the `index`-th slot of the table living in machine frame
    /// `table` to the raw entry `val`.
    #[must_use]
    pub const fn entry(table: Mfn, index: usize, val: u64) -> Self {
        Self {
            ptr: table.base() + (index as u64) * 8,
            val,
        }
    }
}

/// Command code for [`MmuExtOp`]: zero-fill one machine frame.
pub const MMUEXT_CLEAR_PAGE: u32 = 16;

/// One extended MMU maintenance operation.
///
/// Only the clear-page command is used by this core; the struct keeps
/// the full ABI shape so batches can carry other commands.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct MmuExtOp {
    /// Command code (`MMUEXT_*`).
    pub cmd: u32,
    /// First argument; meaning depends on `cmd`.
    pub arg1: u64,
    /// Second argument; unused by the clear-page command.
    pub arg2: u64,
}

impl MmuExtOp {
    /// Request that the hypervisor zero-fill the given machine frame.
    #[must_use]
    pub const fn clear_page(frame: Mfn) -> Self {
        Self {
            cmd: MMUEXT_CLEAR_PAGE,
            arg1: frame.as_u64(),
            arg2: 0,
        }
    }
}

/// TLB maintenance requested alongside a single va-mapping update.
#[repr(u64)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum UpdateVaFlags {
    /// No TLB maintenance.
    None = 0,
    /// Flush the entire TLB after the update.
    FlushTlb = 1,
    /// Invalidate the single affected page.
    InvalidatePage = 2,
}

/// Non-zero status returned by a hypervisor call.
///
/// The request was rejected or failed; no partial effect should be
/// assumed for the rejected element.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("hypervisor returned status {0}")]
pub struct HypercallStatus(pub i64);

impl HypercallStatus {
    /// Convert a raw return code into a `Result`.
    ///
    /// # Errors
    /// Any non-zero code.
    pub const fn check(ret: i64) -> Result<(), Self> {
        if ret == 0 { Ok(()) } else { Err(Self(ret)) }
    }
}

/// The hypervisor call interface this core consumes.
///
/// All methods are synchronous round-trips returning a status, not
/// futures; there is no timeout or cancellation at this layer.
pub trait Hypercalls {
    /// Apply a batch of validated page-table entry updates.
    ///
    /// # Errors
    /// Non-zero hypervisor status; the batch may be partially applied
    /// up to the rejected element.
    fn mmu_update(&self, updates: &[MmuUpdate], dom: DomId) -> Result<(), HypercallStatus>;

    /// Apply a batch of extended MMU maintenance operations.
    ///
    /// # Errors
    /// Non-zero hypervisor status.
    fn mmuext_op(&self, ops: &[MmuExtOp], dom: DomId) -> Result<(), HypercallStatus>;

    /// Update the single leaf mapping for `va` to the raw entry
    /// `entry` (zero to unmap), with the requested TLB maintenance.
    ///
    /// # Errors
    /// Non-zero hypervisor status.
    fn update_va_mapping(
        &self,
        va: VirtAddr,
        entry: u64,
        flags: UpdateVaFlags,
    ) -> Result<(), HypercallStatus>;
}

/// Guest-frame to machine-frame translation.
///
/// Total and injective over the guest's frame pool; provided by the
/// platform (the physical-to-machine table set up by the loader).
pub trait FrameTranslate {
    /// The machine frame backing the given guest frame.
    fn machine_frame(&self, pfn: Pfn) -> Mfn;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_update_names_machine_slot() {
        let u = MmuUpdate::entry(Mfn::new(0x42), 511, 0xdead_b000 | 0x63);
        assert_eq!(u.ptr, 0x42_000 + 511 * 8);
        assert_eq!(u.val, 0xdead_b063);
    }

    #[test]
    fn clear_page_op() {
        let op = MmuExtOp::clear_page(Mfn::new(7));
        assert_eq!(op.cmd, MMUEXT_CLEAR_PAGE);
        assert_eq!(op.arg1, 7);
    }

    #[test]
    fn status_check() {
        assert!(HypercallStatus::check(0).is_ok());
        assert_eq!(HypercallStatus::check(-22), Err(HypercallStatus(-22)));
    }
}

//! # Guest Memory Addresses and Frame Numbers
//!
//! Newtypes for the three address kinds a paravirtualized guest must
//! keep apart:
//!
//! - [`VirtAddr`]: an address in the guest's linear address space.
//! - [`Pfn`]: a guest-local (pseudo-physical) frame number.
//! - [`Mfn`]: the hypervisor-visible machine frame number.
//!
//! A [`Pfn`] is only meaningful inside the guest; the hypervisor's page
//! tables and call interface speak [`Mfn`]. Keeping them as distinct
//! types means a guest frame number cannot end up in a page-table entry
//! or hypercall without an explicit translation step.

#![cfg_attr(not(test), no_std)]

use core::ops::{Add, AddAssign};

/// Size of one page/frame in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// log2([`PAGE_SIZE`]), i.e. the number of offset bits in an address.
pub const PAGE_SHIFT: u32 = 12;

const _: () = assert!(PAGE_SIZE == 1 << PAGE_SHIFT);

/// A **virtual** address in the guest's linear address space.
///
/// Newtype over `u64` to prevent mixing with frame numbers.
/// No alignment guarantees by itself; mapping operations require
/// page alignment and assert it in debug builds.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtAddr(u64);

/// A guest-local **pseudo-physical** frame number.
///
/// Index into the guest's frame pool. Unique once issued and never
/// reused; the allocator is monotonic.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Pfn(u64);

/// A hypervisor-visible **machine** frame number.
///
/// Produced from a [`Pfn`] by the external frame translation; the only
/// frame identifier that may appear in page-table entries and
/// hypercalls.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Mfn(u64);

impl VirtAddr {
    #[must_use]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The frame this address falls into, under the loader's linear
    /// mapping of the bootstrap region (`va == pfn << PAGE_SHIFT`).
    ///
    /// Only meaningful for addresses inside that region.
    #[must_use]
    pub const fn pfn(self) -> Pfn {
        Pfn::new(self.0 >> PAGE_SHIFT)
    }

    /// Whether this address is page-aligned.
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & (PAGE_SIZE - 1) == 0
    }
}

impl Pfn {
    #[must_use]
    pub const fn new(frame: u64) -> Self {
        Self(frame)
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Frame number `n` frames further on.
    #[must_use]
    pub const fn add(self, n: u64) -> Self {
        Self(self.0 + n)
    }

    /// The linear virtual address of this frame under the loader's
    /// bootstrap mapping. Inverse of [`VirtAddr::pfn`].
    #[must_use]
    pub const fn vaddr(self) -> VirtAddr {
        VirtAddr::new(self.0 << PAGE_SHIFT)
    }
}

impl Mfn {
    #[must_use]
    pub const fn new(frame: u64) -> Self {
        Self(frame)
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The machine byte address of the first byte of this frame.
    ///
    /// Hypercall requests name page-table slots by machine byte
    /// address, computed from this base.
    #[must_use]
    pub const fn base(self) -> u64 {
        self.0 << PAGE_SHIFT
    }
}

impl Add<u64> for VirtAddr {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for VirtAddr {
    fn add_assign(&mut self, rhs: u64) {
        *self = *self + rhs;
    }
}

impl core::fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:018x}", self.0)
    }
}

impl core::fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:018x} (Virtual)", self.0)
    }
}

impl core::fmt::Display for Pfn {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl core::fmt::Debug for Pfn {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:x} (PFN)", self.0)
    }
}

impl core::fmt::Display for Mfn {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl core::fmt::Debug for Mfn {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:x} (MFN)", self.0)
    }
}

/// Align `x` down to the nearest multiple of `a`.
///
/// `a` must be non-zero and a power of two.
///
/// ### Examples
/// ```rust
/// # use kernel_addresses::align_down;
/// assert_eq!(align_down(0,    4096), 0);
/// assert_eq!(align_down(4095, 4096), 0);
/// assert_eq!(align_down(4096, 4096), 4096);
/// assert_eq!(align_down(8191, 4096), 4096);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// `a` must be non-zero and a power of two; `x + (a - 1)` must not
/// overflow.
///
/// ### Examples
/// ```rust
/// # use kernel_addresses::align_up;
/// assert_eq!(align_up(0,    4096), 0);
/// assert_eq!(align_up(1,    4096), 4096);
/// assert_eq!(align_up(4096, 4096), 4096);
/// assert_eq!(align_up(4097, 4096), 8192);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> u64 {
    (x + a - 1) & !(a - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pfn_vaddr_round_trip() {
        let pfn = Pfn::new(0x123);
        assert_eq!(pfn.vaddr().as_u64(), 0x123_000);
        assert_eq!(pfn.vaddr().pfn(), pfn);
    }

    #[test]
    fn mfn_base_is_byte_address() {
        assert_eq!(Mfn::new(0x42).base(), 0x42_000);
    }

    #[test]
    fn vaddr_alignment() {
        assert!(VirtAddr::new(0x4000).is_page_aligned());
        assert!(!VirtAddr::new(0x4001).is_page_aligned());
    }

    #[test]
    fn vaddr_add() {
        let mut va = VirtAddr::new(0x1000);
        va += PAGE_SIZE;
        assert_eq!(va, VirtAddr::new(0x2000));
    }
}

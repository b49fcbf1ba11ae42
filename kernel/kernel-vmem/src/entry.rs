//! # Page-Table Entries, Levels and Indices
//!
//! A page-table entry mixes a machine frame number and flag bits in one
//! 64-bit word. [`PageEntry`] models that word as an explicit bitfield
//! instead of a bare integer, so frame and flags are always decoded
//! through typed accessors.
//!
//! Entries are built and *read* by the guest, but only ever written
//! through the validated hypervisor update path; there is no setter on
//! the table view.

use bitfield_struct::bitfield;
use kernel_addresses::{Mfn, VirtAddr};

/// A single page-table entry in its raw bitfield form.
///
/// Common superset of the four levels. A present entry either points to
/// the next-level table (intermediate levels) or maps a 4 KiB page
/// (final level); in both cases bits `[51:12]` carry the **machine**
/// frame number; guest frame numbers never appear in entries.
#[bitfield(u64)]
pub struct PageEntry {
    /// Present (P, bit 0): valid entry if set.
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5): set by hardware on first access.
    pub accessed: bool,

    /// Dirty (D, bit 6): set by hardware on first write; leaf only.
    pub dirty: bool,

    /// Page Size (PS, bit 7): must stay clear, this guest maps 4 KiB
    /// pages only.
    pub large_page: bool,

    /// Global (G, bit 8): leaf only.
    pub global_translation: bool,

    /// OS-available (bits 9..=11).
    #[bits(3)]
    pub os_available_low: u8,

    /// Machine frame number (bits 12..=51).
    #[bits(40)]
    frame_bits_51_12: u64,

    /// OS-available (bits 52..=58).
    #[bits(7)]
    pub os_available_high: u8,

    /// Protection key / OS use (bits 59..=62).
    #[bits(4)]
    pub protection_key: u8,

    /// No-Execute (NX, bit 63).
    pub no_execute: bool,
}

impl PageEntry {
    /// The machine frame this entry names (next-level table or mapped
    /// page).
    #[inline]
    #[must_use]
    pub const fn machine_frame(&self) -> Mfn {
        Mfn::new(self.frame_bits_51_12())
    }

    /// Set the machine frame bits.
    #[inline]
    pub const fn set_machine_frame(&mut self, frame: Mfn) {
        self.set_frame_bits_51_12(frame.as_u64());
    }

    /// Builder form of [`set_machine_frame`](Self::set_machine_frame).
    #[inline]
    #[must_use]
    pub const fn with_machine_frame(mut self, frame: Mfn) -> Self {
        self.set_machine_frame(frame);
        self
    }

    /// Flags for an intermediate (table-pointing) entry: present,
    /// writable, accessed. Supervisor-only; the guest's single ring
    /// needs no user bit here.
    #[inline]
    #[must_use]
    pub const fn table_flags() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_accessed(true)
    }

    /// Flags for a final 4 KiB leaf entry: [`table_flags`](Self::table_flags)
    /// plus dirty, so the first write needs no hardware A/D update.
    #[inline]
    #[must_use]
    pub const fn leaf_flags() -> Self {
        Self::table_flags().with_dirty(true)
    }

    /// The raw 64-bit value (frame + flags), as carried in hypercall
    /// update requests.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.into_bits()
    }

    /// Decode a raw 64-bit value.
    #[inline]
    #[must_use]
    pub const fn from_raw(v: u64) -> Self {
        Self::from_bits(v)
    }
}

impl core::fmt::Display for PageEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if !self.present() {
            return write!(f, "0x{:016x} [not present]", self.raw());
        }
        write!(f, "0x{:016x} mfn=0x{:x} [P", self.raw(), self.machine_frame().as_u64())?;
        if self.writable() {
            f.write_str(" W")?;
        }
        if self.user_access() {
            f.write_str(" U")?;
        }
        if self.accessed() {
            f.write_str(" A")?;
        }
        if self.dirty() {
            f.write_str(" D")?;
        }
        if self.global_translation() {
            f.write_str(" G")?;
        }
        if self.no_execute() {
            f.write_str(" NX")?;
        }
        f.write_str("]")
    }
}

/// One of the four levels of the paging hierarchy, highest first.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Level {
    /// Top-level table, reached via the loader-provided root frame.
    L4,
    /// Second level.
    L3,
    /// Third level.
    L2,
    /// Final level; entries map 4 KiB pages.
    L1,
}

impl Level {
    /// Position of this level's 9-bit index within a virtual address.
    #[inline]
    #[must_use]
    pub const fn shift(self) -> u32 {
        match self {
            Self::L4 => 39,
            Self::L3 => 30,
            Self::L2 => 21,
            Self::L1 => 12,
        }
    }
}

/// Index into a 512-entry page table, valid at any level.
///
/// Range `0..512`, checked in debug builds.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TableIndex(u16);

impl TableIndex {
    /// Construct from a raw value; debug-asserts `v < 512`.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!(v < 512);
        Self(v)
    }

    /// Extract this level's index from a virtual address.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn of(va: VirtAddr, level: Level) -> Self {
        Self::new(((va.as_u64() >> level.shift()) & 0x1FF) as u16)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0 as u64
    }
}

impl core::fmt::Display for TableIndex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decompose a virtual address into its four table indices, L4 first.
#[inline]
#[must_use]
pub const fn split_indices(va: VirtAddr) -> [TableIndex; 4] {
    [
        TableIndex::of(va, Level::L4),
        TableIndex::of(va, Level::L3),
        TableIndex::of(va, Level::L2),
        TableIndex::of(va, Level::L1),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_presets_encode_expected_bits() {
        assert_eq!(PageEntry::table_flags().raw(), 0x23);
        assert_eq!(PageEntry::leaf_flags().raw(), 0x63);
    }

    #[test]
    fn machine_frame_round_trip() {
        let e = PageEntry::leaf_flags().with_machine_frame(Mfn::new(0x42));
        assert_eq!(e.machine_frame(), Mfn::new(0x42));
        assert_eq!(e.raw(), 0x42_063);
        assert_eq!(PageEntry::from_raw(e.raw()).machine_frame(), Mfn::new(0x42));
    }

    #[test]
    fn split_known_address() {
        let va = VirtAddr::new((3 << 39) | (7 << 30) | (511 << 21) | (1 << 12) | 0xabc);
        let [i4, i3, i2, i1] = split_indices(va);
        assert_eq!(i4, TableIndex::new(3));
        assert_eq!(i3, TableIndex::new(7));
        assert_eq!(i2, TableIndex::new(511));
        assert_eq!(i1, TableIndex::new(1));
    }

    #[test]
    fn display_shows_frame_and_flags() {
        let e = PageEntry::leaf_flags().with_machine_frame(Mfn::new(0x42));
        let s = format!("{e}");
        assert!(s.contains("mfn=0x42"));
        assert!(s.contains("[P W A D]"));
        assert!(format!("{}", PageEntry::new()).contains("not present"));
    }
}

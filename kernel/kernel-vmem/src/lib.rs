//! # Paravirtualized Virtual Memory Management
//!
//! The guest's memory core: a monotonic frame allocator, a heap
//! address reservation cursor, a recursive page-table view, the
//! four-level mapping engine that ties them together, and the one-shot
//! bootstrap sequence that brings the whole thing up from the loader's
//! hand-over state.
//!
//! ## Address layout
//!
//! A canonical 48-bit virtual address splits into four 9-bit table
//! indices and a 12-bit page offset:
//!
//! ```text
//! 63            48 47     39 38     30 29     21 20     12 11         0
//! ├───────────────┼─────────┼─────────┼─────────┼─────────┼───────────┤
//! │ sign extension│ L4 index│ L3 index│ L2 index│ L1 index│ page offs │
//! └───────────────┴─────────┴─────────┴─────────┴─────────┴───────────┘
//! ```
//!
//! Top-level slot 511 is reserved for the self-referential mapping, so
//! the region at [`TABLE_AREA_BASE`] exposes every live page table at a
//! statically-computable address (see [`table`]).
//!
//! ## Trust boundary
//!
//! The guest reads its page tables directly through the recursive view
//! but cannot write them: every mutation is a request through
//! [`kernel_hypercall::Hypercalls`], validated by the hypervisor, and
//! every frame number entering an entry is a machine frame obtained
//! through [`kernel_hypercall::FrameTranslate`]. The types in
//! [`kernel_addresses`] keep guest and machine frame numbers apart at
//! compile time.

#![cfg_attr(not(test), no_std)]

mod boot;
mod entry;
mod manager;
mod table;

pub use boot::{
    BOOTSTRAP_ALIGN, BOOTSTRAP_STACK_PAD, BootDescriptor, BootStage, BootstrapError,
    LOW_IDENTITY_LIMIT,
};
pub use entry::{Level, PageEntry, TableIndex, split_indices};
pub use manager::{MapError, MemoryManager, PhysicalPageGrant};
pub use table::{
    DirectTableAccess, RECURSIVE_INDEX, TABLE_AREA_BASE, TableAccess, TableFrame, l1_table_va,
    l2_table_va, l3_table_va, l4_table_va,
};

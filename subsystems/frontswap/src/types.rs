//! # Frontswap Identifiers
//!
//! Small strongly-typed wrappers for the values that flow between the swap
//! path, the backend and the fault path.

use core::fmt;

use crate::{PAGE_MASK, PAGE_SIZE};

// =============================================================================
// SWAP DEVICE IDENTIFIERS
// =============================================================================

/// Swap device type (index into the swap device table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SwapType(u32);

impl SwapType {
    /// Create a swap type from its raw index
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw value
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Table index
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SwapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "swap{}", self.0)
    }
}

/// Slot offset inside a swap device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PageOffset(u64);

impl PageOffset {
    /// Create an offset
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// A page as known to the backend: `(swap type, offset)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageHandle {
    /// Device the page was swapped to
    pub swap_type: SwapType,
    /// Slot inside that device
    pub offset: PageOffset,
}

impl PageHandle {
    /// Create a handle
    pub const fn new(swap_type: SwapType, offset: PageOffset) -> Self {
        Self { swap_type, offset }
    }

    /// Shorthand for `PageHandle::new(SwapType::new(t), PageOffset::new(o))`
    pub const fn from_raw(swap_type: u32, offset: u64) -> Self {
        Self::new(SwapType::new(swap_type), PageOffset::new(offset))
    }
}

impl fmt::Display for PageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:#x}", self.swap_type, self.offset.0)
    }
}

// =============================================================================
// PROCESSOR IDENTIFIERS
// =============================================================================

/// Logical processor id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct CpuId(u32);

impl CpuId {
    /// Create a CPU id
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw value
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Per-CPU table index
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

// =============================================================================
// MEMORY IDENTIFIERS
// =============================================================================

/// Physical frame number of a host-owned page
///
/// The frontswap layer never owns page contents; the host keeps the frame
/// alive (and locked) for as long as an operation on it is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PageFrame(u64);

impl PageFrame {
    /// Create a frame number
    pub const fn new(pfn: u64) -> Self {
        Self(pfn)
    }

    /// Frame number
    pub const fn pfn(self) -> u64 {
        self.0
    }

    /// Physical address of the first byte of the frame
    pub const fn phys_addr(self) -> u64 {
        self.0 * PAGE_SIZE as u64
    }
}

/// Virtual address inside a process address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(u64);

impl VirtAddr {
    /// Create a virtual address
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Raw value
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Round down to the containing page
    pub const fn page_align_down(self) -> Self {
        Self(self.0 & PAGE_MASK)
    }

    /// Is the address page aligned?
    pub const fn is_page_aligned(self) -> bool {
        self.0 & !PAGE_MASK == 0
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Location of a page-table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct PteLocation(u64);

impl PteLocation {
    /// Create from the entry's address
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Address of the entry
    pub const fn addr(self) -> u64 {
        self.0
    }
}

/// Raw page-table entry value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct PteValue(u64);

impl PteValue {
    /// Create from the raw entry bits
    pub const fn new(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw entry bits
    pub const fn bits(self) -> u64 {
        self.0
    }
}

/// Location of the page middle directory entry covering a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct PmdLocation(u64);

impl PmdLocation {
    /// Create from the directory entry's address
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Address of the directory entry
    pub const fn addr(self) -> u64 {
        self.0
    }
}

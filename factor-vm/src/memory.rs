//! Segmented memory: code, data, heap, stack and two MMIO cells.
//!
//! Every segment occupies a fixed address range with a permission
//! triple; all access funnels through [`SegmentedMemory::load`] and
//! [`SegmentedMemory::store`], which are the only places permissions are
//! checked. The heap is page-managed with a mark-sweep collector that
//! runs when an allocation fails.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use factor_asm::Chunk;
use tracing::debug;

use crate::error::MemoryFault;

/// Heap page size in cells.
pub const PAGE_SIZE: usize = 256;

/// Logical memory segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Program chunks, read/execute.
    Code,
    /// General storage, read/write.
    Data,
    /// Page-managed allocations, read/write.
    Heap,
    /// Spill storage, read/write.
    Stack,
    /// Input cell: reading dequeues the input queue.
    MmioIn,
    /// Output cell: writing appends to the output log.
    MmioOut,
}

/// Read/write/execute capability bits of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    /// Loads allowed.
    pub read: bool,
    /// Stores allowed.
    pub write: bool,
    /// Instruction fetch allowed.
    pub execute: bool,
}

impl Segment {
    /// The fixed permission triple of this segment.
    pub const fn permissions(self) -> Permissions {
        match self {
            Segment::Code => Permissions {
                read: true,
                write: false,
                execute: true,
            },
            Segment::Data | Segment::Heap | Segment::Stack => Permissions {
                read: true,
                write: true,
                execute: false,
            },
            Segment::MmioIn => Permissions {
                read: true,
                write: false,
                execute: false,
            },
            Segment::MmioOut => Permissions {
                read: false,
                write: true,
                execute: false,
            },
        }
    }
}

/// Segment sizes, in cells. Data starts at address 0 and code sits below
/// it at negative addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    /// Code segment size.
    pub code_size: i64,
    /// Data segment size.
    pub data_size: i64,
    /// Heap segment size.
    pub heap_size: i64,
    /// Stack segment size.
    pub stack_size: i64,
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self {
            code_size: 0x1000,
            data_size: 0x1000,
            heap_size: 0x1000,
            stack_size: 0x1000,
        }
    }
}

impl MemoryLayout {
    /// First code address (negative).
    pub fn code_start(&self) -> i64 {
        -self.code_size
    }

    /// First data address.
    pub fn data_start(&self) -> i64 {
        0
    }

    /// First heap address.
    pub fn heap_start(&self) -> i64 {
        self.data_size
    }

    /// First stack address.
    pub fn stack_start(&self) -> i64 {
        self.data_size + self.heap_size
    }

    /// Address of the MMIO input cell.
    pub fn mmio_in(&self) -> i64 {
        self.stack_start() + self.stack_size
    }

    /// Address of the MMIO output cell.
    pub fn mmio_out(&self) -> i64 {
        self.mmio_in() + 1
    }

    fn heap_pages(&self) -> usize {
        (self.heap_size as usize) / PAGE_SIZE
    }
}

#[derive(Debug, Clone)]
struct Allocation {
    first_page: usize,
    page_count: usize,
    size: usize,
}

/// The memory of one VM instance, including its MMIO-facing I/O queues.
#[derive(Debug, Clone)]
pub struct SegmentedMemory {
    layout: MemoryLayout,
    code: Vec<i64>,
    data: HashMap<i64, i64>,
    heap: HashMap<i64, i64>,
    stack: HashMap<i64, i64>,
    free_pages: BTreeSet<usize>,
    allocations: BTreeMap<i64, Allocation>,
    io_in: VecDeque<i64>,
    io_out: Vec<i64>,
}

impl Default for SegmentedMemory {
    fn default() -> Self {
        Self::new(MemoryLayout::default())
    }
}

impl SegmentedMemory {
    /// Memory with the given segment sizes.
    pub fn new(layout: MemoryLayout) -> Self {
        Self {
            layout,
            code: Vec::new(),
            data: HashMap::new(),
            heap: HashMap::new(),
            stack: HashMap::new(),
            free_pages: (0..layout.heap_pages()).collect(),
            allocations: BTreeMap::new(),
            io_in: VecDeque::new(),
            io_out: Vec::new(),
        }
    }

    /// The segment sizes in effect.
    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    /// Resolve an address to its segment.
    pub fn segment(&self, addr: i64) -> Result<Segment, MemoryFault> {
        let l = &self.layout;
        if (l.code_start()..0).contains(&addr) {
            Ok(Segment::Code)
        } else if (l.data_start()..l.heap_start()).contains(&addr) {
            Ok(Segment::Data)
        } else if (l.heap_start()..l.stack_start()).contains(&addr) {
            Ok(Segment::Heap)
        } else if (l.stack_start()..l.mmio_in()).contains(&addr) {
            Ok(Segment::Stack)
        } else if addr == l.mmio_in() {
            Ok(Segment::MmioIn)
        } else if addr == l.mmio_out() {
            Ok(Segment::MmioOut)
        } else {
            Err(MemoryFault::OutOfRange)
        }
    }

    /// Load the cell at `addr`, observing segment permissions. Reading
    /// the MMIO input cell dequeues the input queue (0 when empty).
    pub fn load(&mut self, addr: i64) -> Result<i64, MemoryFault> {
        let seg = self.segment(addr)?;
        if !seg.permissions().read {
            return Err(match seg {
                Segment::MmioOut => MemoryFault::MmioLoad,
                _ => MemoryFault::ReadDenied,
            });
        }
        match seg {
            Segment::Code => {
                let idx = (addr - self.layout.code_start()) as usize;
                self.code.get(idx).copied().ok_or(MemoryFault::CodeRange)
            }
            Segment::MmioIn => Ok(self.io_in.pop_front().unwrap_or(0)),
            Segment::Data => Ok(self.data.get(&addr).copied().unwrap_or(0)),
            Segment::Heap => Ok(self.heap.get(&addr).copied().unwrap_or(0)),
            Segment::Stack => Ok(self.stack.get(&addr).copied().unwrap_or(0)),
            Segment::MmioOut => unreachable!("read permission already denied"),
        }
    }

    /// Store `value` at `addr`, observing segment permissions. Writing
    /// the MMIO output cell appends to the output log.
    pub fn store(&mut self, addr: i64, value: i64) -> Result<(), MemoryFault> {
        let seg = self.segment(addr)?;
        if !seg.permissions().write {
            return Err(match seg {
                Segment::Code => MemoryFault::CodeWrite,
                Segment::MmioIn => MemoryFault::MmioStore,
                _ => MemoryFault::WriteDenied,
            });
        }
        match seg {
            Segment::MmioOut => self.io_out.push(value),
            Segment::Data => {
                self.data.insert(addr, value);
            }
            Segment::Heap => {
                self.heap.insert(addr, value);
            }
            Segment::Stack => {
                self.stack.insert(addr, value);
            }
            Segment::Code | Segment::MmioIn => unreachable!("write permission already denied"),
        }
        Ok(())
    }

    /// Load program chunks into the code segment (the sole writer of
    /// code cells). Cells hold the low 64 bits of each chunk.
    pub fn load_code(&mut self, chunks: &[Chunk]) -> Result<(), MemoryFault> {
        if chunks.len() as i64 > self.layout.code_size {
            return Err(MemoryFault::CodeOverflow);
        }
        self.code = chunks
            .iter()
            .map(|c| c.iter_u64_digits().next().unwrap_or(0) as i64)
            .collect();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Heap allocator
    // ------------------------------------------------------------------

    /// Allocate `size` cells of heap. On failure, collect garbage with
    /// the given roots and retry once.
    pub fn allocate(&mut self, size: usize, roots: &[i64]) -> Result<i64, MemoryFault> {
        if let Some(addr) = self.try_allocate(size) {
            return Ok(addr);
        }
        self.collect(roots);
        self.try_allocate(size).ok_or(MemoryFault::OutOfMemory)
    }

    fn try_allocate(&mut self, size: usize) -> Option<i64> {
        let pages_needed = size.div_ceil(PAGE_SIZE).max(1);

        // Contiguous runs of free pages as (first page, length).
        let mut runs: Vec<(usize, usize)> = Vec::new();
        for &page in &self.free_pages {
            match runs.last_mut() {
                Some((start, len)) if *start + *len == page => *len += 1,
                _ => runs.push((page, 1)),
            }
        }

        // Smallest run that fits, lowest address on ties.
        let (first_page, _) = runs
            .into_iter()
            .filter(|&(_, len)| len >= pages_needed)
            .min_by_key(|&(start, len)| (len, start))?;
        for page in first_page..first_page + pages_needed {
            self.free_pages.remove(&page);
        }
        let start = self.layout.heap_start() + (first_page * PAGE_SIZE) as i64;
        for offset in 0..size {
            self.heap.insert(start + offset as i64, 0);
        }
        self.allocations.insert(
            start,
            Allocation {
                first_page,
                page_count: pages_needed,
                size,
            },
        );
        Some(start)
    }

    /// Release the allocation starting at `addr`. Unknown addresses are
    /// ignored.
    pub fn free(&mut self, addr: i64) {
        let Some(alloc) = self.allocations.remove(&addr) else {
            return;
        };
        for page in alloc.first_page..alloc.first_page + alloc.page_count {
            self.free_pages.insert(page);
            let base = self.layout.heap_start() + (page * PAGE_SIZE) as i64;
            for offset in 0..PAGE_SIZE {
                self.heap.remove(&(base + offset as i64));
            }
        }
    }

    fn allocation_containing(&self, addr: i64) -> Option<i64> {
        let (&start, alloc) = self.allocations.range(..=addr).next_back()?;
        let extent = (alloc.page_count * PAGE_SIZE) as i64;
        (addr < start + extent).then_some(start)
    }

    /// Mark-sweep collection. Roots are the caller's integer values
    /// (operand and call stacks); every cell of every segment is a root
    /// as well. Reachable allocations survive, the rest return their
    /// pages to the free set.
    pub fn collect(&mut self, roots: &[i64]) {
        let heap_range = self.layout.heap_start()..self.layout.stack_start();

        let mut work: Vec<i64> = roots
            .iter()
            .copied()
            .chain(self.data.values().copied())
            .chain(self.heap.values().copied())
            .chain(self.stack.values().copied())
            .filter(|v| heap_range.contains(v))
            .collect();

        let mut marked = BTreeSet::new();
        while let Some(ptr) = work.pop() {
            let Some(start) = self.allocation_containing(ptr) else {
                continue;
            };
            if !marked.insert(start) {
                continue;
            }
            let size = self.allocations[&start].size;
            for offset in 0..size {
                if let Some(&value) = self.heap.get(&(start + offset as i64)) {
                    if heap_range.contains(&value) {
                        work.push(value);
                    }
                }
            }
        }

        let doomed: Vec<i64> = self
            .allocations
            .keys()
            .copied()
            .filter(|start| !marked.contains(start))
            .collect();
        let swept = doomed.len();
        for start in doomed {
            self.free(start);
        }
        if swept > 0 {
            debug!(swept, live = self.allocations.len(), "heap sweep");
        }
    }

    /// Number of live heap allocations.
    pub fn allocation_count(&self) -> usize {
        self.allocations.len()
    }

    /// Whether an allocation starts at `addr`.
    pub fn is_allocated(&self, addr: i64) -> bool {
        self.allocations.contains_key(&addr)
    }

    // ------------------------------------------------------------------
    // MMIO-facing I/O queues
    // ------------------------------------------------------------------

    /// Queue a value for the MMIO input cell / INPUT opcode.
    pub fn push_input(&mut self, value: i64) {
        self.io_in.push_back(value);
    }

    /// Dequeue the next input value, if any.
    pub fn pop_input(&mut self) -> Option<i64> {
        self.io_in.pop_front()
    }

    /// Append to the output log.
    pub fn push_output(&mut self, value: i64) {
        self.io_out.push(value);
    }

    /// Values written through MMIO-out and the OUTPUT opcode, in order.
    pub fn output_log(&self) -> &[i64] {
        &self.io_out
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// All writable cells, for checkpointing and the coherence checksum.
    pub fn dump(&self) -> BTreeMap<i64, i64> {
        let mut cells = BTreeMap::new();
        cells.extend(self.data.iter().map(|(&a, &v)| (a, v)));
        cells.extend(self.heap.iter().map(|(&a, &v)| (a, v)));
        cells.extend(self.stack.iter().map(|(&a, &v)| (a, v)));
        cells
    }

    /// Restore writable cells from a dump. Code and MMIO addresses are
    /// skipped; addresses outside every segment are dropped.
    pub fn load_dump(&mut self, cells: &BTreeMap<i64, i64>) {
        self.data.clear();
        self.heap.clear();
        self.stack.clear();
        for (&addr, &value) in cells {
            match self.segment(addr) {
                Ok(Segment::Data) => {
                    self.data.insert(addr, value);
                }
                Ok(Segment::Heap) => {
                    self.heap.insert(addr, value);
                }
                Ok(Segment::Stack) => {
                    self.stack.insert(addr, value);
                }
                _ => {}
            }
        }
    }

    /// Sum of every writable cell value, for the coherence checksum.
    pub fn cell_sum(&self) -> f64 {
        self.data
            .values()
            .chain(self.heap.values())
            .chain(self.stack.values())
            .map(|&v| v as f64)
            .sum()
    }

    /// Number of populated cells across the writable segments.
    pub fn cell_count(&self) -> usize {
        self.data.len() + self.heap.len() + self.stack.len()
    }

    /// A textual map of the segment ranges.
    pub fn memory_map(&self) -> String {
        let l = &self.layout;
        let rows = [
            ("CODE", l.code_start(), -1),
            ("DATA", l.data_start(), l.heap_start() - 1),
            ("HEAP", l.heap_start(), l.stack_start() - 1),
            ("STACK", l.stack_start(), l.mmio_in() - 1),
            ("MMIO_IN", l.mmio_in(), l.mmio_in()),
            ("MMIO_OUT", l.mmio_out(), l.mmio_out()),
        ];
        rows.iter()
            .map(|(name, start, end)| format!("{name:8}: {start:#06x}-{end:#06x}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SegmentedMemory {
        SegmentedMemory::new(MemoryLayout {
            code_size: 16,
            data_size: 16,
            heap_size: (PAGE_SIZE * 4) as i64,
            stack_size: 16,
        })
    }

    #[test]
    fn segment_resolution() {
        let m = small();
        assert_eq!(m.segment(-1).unwrap(), Segment::Code);
        assert_eq!(m.segment(0).unwrap(), Segment::Data);
        assert_eq!(m.segment(16).unwrap(), Segment::Heap);
        assert_eq!(m.segment(16 + PAGE_SIZE as i64 * 4).unwrap(), Segment::Stack);
        assert_eq!(m.segment(m.layout().mmio_in()).unwrap(), Segment::MmioIn);
        assert_eq!(m.segment(m.layout().mmio_out()).unwrap(), Segment::MmioOut);
        assert_eq!(m.segment(-17), Err(MemoryFault::OutOfRange));
        assert_eq!(
            m.segment(m.layout().mmio_out() + 1),
            Err(MemoryFault::OutOfRange)
        );
    }

    #[test]
    fn store_then_load() {
        let mut m = small();
        m.store(3, 99).unwrap();
        assert_eq!(m.load(3).unwrap(), 99);
        assert_eq!(m.load(4).unwrap(), 0, "untouched cells read as zero");
    }

    #[test]
    fn code_is_read_only() {
        let mut m = small();
        m.load_code(&[factor_asm::op::nop()]).unwrap();
        assert!(m.load(-16).is_ok());
        assert_eq!(m.store(-16, 1), Err(MemoryFault::CodeWrite));
        assert_eq!(m.load(-1), Err(MemoryFault::CodeRange));
    }

    #[test]
    fn mmio_cells() {
        let mut m = small();
        assert_eq!(m.load(m.layout().mmio_in()).unwrap(), 0, "empty queue reads 0");
        m.push_input(42);
        assert_eq!(m.load(m.layout().mmio_in()).unwrap(), 42);
        m.store(m.layout().mmio_out(), 7).unwrap();
        assert_eq!(m.output_log(), &[7]);
        assert_eq!(m.load(m.layout().mmio_out()), Err(MemoryFault::MmioLoad));
        assert_eq!(
            m.store(m.layout().mmio_in(), 1),
            Err(MemoryFault::MmioStore)
        );
    }

    #[test]
    fn allocation_zeroes_and_records() {
        let mut m = small();
        let addr = m.allocate(10, &[]).unwrap();
        assert_eq!(addr, m.layout().heap_start());
        assert!(m.is_allocated(addr));
        for offset in 0..10 {
            assert_eq!(m.load(addr + offset).unwrap(), 0);
        }
    }

    #[test]
    fn best_fit_prefers_the_smallest_hole() {
        let mut m = small();
        let a = m.allocate(PAGE_SIZE, &[]).unwrap(); // page 0
        let b = m.allocate(PAGE_SIZE, &[]).unwrap(); // page 1
        let c = m.allocate(PAGE_SIZE, &[]).unwrap(); // page 2
        let d = m.allocate(PAGE_SIZE, &[]).unwrap(); // page 3
        m.free(a);
        m.free(b); // hole of two pages at 0-1
        m.free(d); // hole of one page at 3
        // A single-page request takes the single-page hole, not a slice
        // of the larger one.
        let e = m.allocate(PAGE_SIZE, &[c]).unwrap();
        assert_eq!(e, d);
    }

    #[test]
    fn gc_reclaims_unreachable_allocations() {
        let mut m = small();
        let a = m.allocate(8, &[]).unwrap();
        let b = m.allocate(8, &[]).unwrap();
        m.collect(&[b]);
        assert!(!m.is_allocated(a), "unreferenced allocation swept");
        assert!(m.is_allocated(b), "rooted allocation survives");
    }

    #[test]
    fn gc_follows_heap_pointers() {
        let mut m = small();
        let a = m.allocate(8, &[]).unwrap();
        let b = m.allocate(8, &[]).unwrap();
        m.store(a, b).unwrap(); // a points at b
        m.collect(&[a]);
        assert!(m.is_allocated(a));
        assert!(m.is_allocated(b), "transitively reachable survives");
    }

    #[test]
    fn interior_pointers_keep_allocations_alive() {
        let mut m = small();
        let a = m.allocate(100, &[]).unwrap();
        m.collect(&[a + 50]);
        assert!(m.is_allocated(a));
    }

    #[test]
    fn allocation_failure_collects_then_fails() {
        let mut m = small(); // 4 pages
        let a = m.allocate(PAGE_SIZE * 4, &[]).unwrap();
        assert_eq!(
            m.allocate(PAGE_SIZE, &[a]),
            Err(MemoryFault::OutOfMemory),
            "rooted allocation cannot be reclaimed"
        );
        // Dropping the root lets the retry's collection reclaim it.
        let b = m.allocate(PAGE_SIZE * 2, &[]).unwrap();
        assert_eq!(b, m.layout().heap_start());
    }

    #[test]
    fn dump_and_restore() {
        let mut m = small();
        m.store(1, 10).unwrap();
        let heap = m.allocate(4, &[]).unwrap();
        m.store(heap, 20).unwrap();
        let cells = m.dump();

        let mut fresh = small();
        fresh.load_dump(&cells);
        assert_eq!(fresh.load(1).unwrap(), 10);
        assert_eq!(fresh.load(heap).unwrap(), 20);
    }

    #[test]
    fn memory_map_lists_every_segment() {
        let map = small().memory_map();
        for name in ["CODE", "DATA", "HEAP", "STACK", "MMIO_IN", "MMIO_OUT"] {
            assert!(map.contains(name));
        }
    }
}

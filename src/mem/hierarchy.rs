//! Paged main memory with swap-backed eviction.
//!
//! Public operations take logical addresses plus the accessing PCB and are
//! serialized by one global lock, mirroring the single memory bus. Internals
//! are split between the L1 cache and the physical store so the cache can
//! reach raw memory through [`PhysicalStore`] without re-entering the lock.
//!
//! A page is either resident (valid frame, no swap entry) or swapped (swap
//! entry, invalid frame), never both. Freshly allocated frames are filled
//! with the END sentinel so a fetch from an untouched page halts the program
//! cleanly.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::common::MemoryError;
use crate::config::SystemConfig;
use crate::isa::END_SENTINEL;
use crate::mem::cache::L1Cache;
use crate::mem::policy::EvictionOrder;
use crate::mem::PhysicalStore;
use crate::process::{PageTableEntry, Pcb};

/// Frame table entry: who owns a physical frame and in what condition.
#[derive(Debug, Clone, Copy)]
struct FrameMeta {
    owner: u32,
    page: u32,
    valid: bool,
    dirty: bool,
}

impl FrameMeta {
    fn empty() -> Self {
        Self {
            owner: 0,
            page: 0,
            valid: false,
            dirty: false,
        }
    }
}

/// Point-in-time occupancy of the hierarchy, for the usage CSV.
#[derive(Debug, Clone, Copy)]
pub struct MemoryUsage {
    pub frames_used: usize,
    pub frames_total: usize,
    pub swap_slots_used: usize,
    pub swap_slots_total: usize,
    pub cache_lines_used: usize,
    pub cache_lines_total: usize,
}

/// Raw physical memory plus the frame/swap bookkeeping.
struct PhysicalMemory {
    page_size: usize,
    main: Vec<u32>,
    frame_table: Vec<FrameMeta>,
    free_frames: Vec<bool>,
    order: EvictionOrder,
    swap: Vec<u32>,
    swap_map: HashMap<(u32, u32), usize>,
    free_slots: VecDeque<usize>,
}

impl PhysicalMemory {
    fn words_per_page(&self) -> usize {
        self.page_size / 4
    }

    fn frame_base(&self, frame: usize) -> u32 {
        (frame * self.page_size) as u32
    }

    /// Word write without instrumentation, for program loading.
    fn poke(&mut self, addr: u32, value: u32) -> Result<(), MemoryError> {
        let index = (addr / 4) as usize;
        if index >= self.main.len() {
            return Err(MemoryError::SegFault { addr });
        }
        self.main[index] = value;
        self.frame_table[addr as usize / self.page_size].dirty = true;
        Ok(())
    }
}

impl PhysicalStore for PhysicalMemory {
    fn read_phys(&mut self, addr: u32, proc: &Pcb) -> Result<u32, MemoryError> {
        let index = (addr / 4) as usize;
        let word = *self
            .main
            .get(index)
            .ok_or(MemoryError::SegFault { addr })?;
        proc.counters.primary_accesses.fetch_add(1, Ordering::Relaxed);
        proc.counters
            .memory_cycles
            .fetch_add(proc.weights.primary, Ordering::Relaxed);
        Ok(word)
    }

    fn write_phys(&mut self, addr: u32, value: u32, proc: &Pcb) -> Result<(), MemoryError> {
        let index = (addr / 4) as usize;
        if index >= self.main.len() {
            return Err(MemoryError::SegFault { addr });
        }
        self.main[index] = value;
        self.frame_table[addr as usize / self.page_size].dirty = true;
        proc.counters.primary_accesses.fetch_add(1, Ordering::Relaxed);
        proc.counters
            .memory_cycles
            .fetch_add(proc.weights.primary, Ordering::Relaxed);
        Ok(())
    }
}

struct MemoryState {
    cache: L1Cache,
    store: PhysicalMemory,
    processes: HashMap<u32, Arc<Pcb>>,
}

/// The shared memory hierarchy.
pub struct MemoryHierarchy {
    state: Mutex<MemoryState>,
}

impl MemoryHierarchy {
    pub fn new(config: &SystemConfig) -> Self {
        let page_size = config.main_memory.page_size.max(4);
        let total_frames = config.main_memory.total / page_size;
        let total_slots = config.secondary_memory.total / page_size;

        let store = PhysicalMemory {
            page_size,
            main: vec![0; config.main_memory.total / 4],
            frame_table: vec![FrameMeta::empty(); total_frames],
            free_frames: vec![true; total_frames],
            order: EvictionOrder::new(config.main_memory.policy_kind()),
            swap: vec![0; config.secondary_memory.total / 4],
            swap_map: HashMap::new(),
            free_slots: (0..total_slots).collect(),
        };

        let cache = L1Cache::new(
            config.cache.size,
            config.cache.words_per_line(),
            config.cache.policy_kind(),
        );

        Self {
            state: Mutex::new(MemoryState {
                cache,
                store,
                processes: HashMap::new(),
            }),
        }
    }

    /// Registers a process so frame eviction can reach its page table.
    pub fn register_process(&self, pcb: Arc<Pcb>) {
        let mut state = self.state.lock().unwrap();
        state.processes.insert(pcb.pid, pcb);
    }

    /// Reads the word at a logical address on behalf of `proc`.
    pub fn read(&self, addr: u32, proc: &Pcb) -> Result<u32, MemoryError> {
        let mut state = self.state.lock().unwrap();
        proc.counters
            .mem_accesses_total
            .fetch_add(1, Ordering::Relaxed);
        proc.counters.mem_reads.fetch_add(1, Ordering::Relaxed);

        let paddr = state.translate(addr, proc)?;
        let MemoryState { cache, store, .. } = &mut *state;
        cache.read(paddr, proc, store)
    }

    /// Writes the word at a logical address on behalf of `proc`.
    pub fn write(&self, addr: u32, value: u32, proc: &Pcb) -> Result<(), MemoryError> {
        let mut state = self.state.lock().unwrap();
        proc.counters
            .mem_accesses_total
            .fetch_add(1, Ordering::Relaxed);
        proc.counters.mem_writes.fetch_add(1, Ordering::Relaxed);

        let paddr = state.translate(addr, proc)?;

        // The logical page is now modified relative to its swap copy.
        let page = addr / state.store.page_size as u32;
        if let Some(entry) = proc.page_table.lock().unwrap().get_mut(&page) {
            entry.dirty = true;
        }

        let MemoryState { cache, store, .. } = &mut *state;
        cache.write(paddr, value, proc, store)
    }

    /// Writes a program word before execution, bypassing the cache and the
    /// access instrumentation.
    pub fn load_word(&self, addr: u32, value: u32, proc: &Pcb) -> Result<(), MemoryError> {
        let mut state = self.state.lock().unwrap();
        let paddr = state.translate(addr, proc)?;
        state.store.poke(paddr, value)
    }

    /// Releases every resource owned by a finished process: page table
    /// entries, frames, swap slots and cache lines. Calling it again is a
    /// no-op.
    pub fn free_process(&self, proc: &Pcb) {
        let mut state = self.state.lock().unwrap();

        state.cache.invalidate_pid(proc.pid);

        let mut table = proc.page_table.lock().unwrap();
        for (_, entry) in table.drain() {
            if !entry.valid {
                continue;
            }
            let frame = entry.frame;
            if frame < state.store.frame_table.len() && state.store.frame_table[frame].valid {
                state.store.frame_table[frame] = FrameMeta::empty();
                state.store.free_frames[frame] = true;
                state.store.order.remove(frame);
            }
        }
        drop(table);

        let released: Vec<usize> = {
            let store = &mut state.store;
            let mut slots = Vec::new();
            store.swap_map.retain(|&(pid, _), &mut slot| {
                if pid == proc.pid {
                    slots.push(slot);
                    false
                } else {
                    true
                }
            });
            slots
        };
        for slot in released {
            state.store.free_slots.push_back(slot);
        }

        state.processes.remove(&proc.pid);
        debug!("freed pid={} resources", proc.pid);
    }

    /// Occupancy snapshot.
    pub fn usage(&self) -> MemoryUsage {
        let state = self.state.lock().unwrap();
        let frames_total = state.store.frame_table.len();
        let frames_used = state.store.frame_table.iter().filter(|f| f.valid).count();
        let swap_slots_total = state.store.free_slots.len() + state.store.swap_map.len();
        MemoryUsage {
            frames_used,
            frames_total,
            swap_slots_used: state.store.swap_map.len(),
            swap_slots_total,
            cache_lines_used: state.cache.usage(),
            cache_lines_total: state.cache.capacity(),
        }
    }

    /// Number of valid frames owned by `pid`.
    pub fn frames_owned_by(&self, pid: u32) -> usize {
        let state = self.state.lock().unwrap();
        state
            .store
            .frame_table
            .iter()
            .filter(|f| f.valid && f.owner == pid)
            .count()
    }

    /// Number of swap slots holding pages of `pid`.
    pub fn swap_slots_of(&self, pid: u32) -> usize {
        let state = self.state.lock().unwrap();
        state
            .store
            .swap_map
            .keys()
            .filter(|(owner, _)| *owner == pid)
            .count()
    }
}

impl MemoryState {
    /// Translates a logical address, faulting the page in if needed.
    fn translate(&mut self, addr: u32, proc: &Pcb) -> Result<u32, MemoryError> {
        let page_size = self.store.page_size as u32;
        let page = addr / page_size;
        let offset = addr % page_size;

        let resident = {
            let table = proc.page_table.lock().unwrap();
            table.get(&page).filter(|e| e.valid).map(|e| e.frame)
        };
        if let Some(frame) = resident {
            self.store.order.touch(frame);
            return Ok(self.store.frame_base(frame) + offset);
        }

        debug!("page fault pid={} page={}", proc.pid, page);
        let frame = self.acquire_frame(proc)?;

        if let Some(slot) = self.store.swap_map.remove(&(proc.pid, page)) {
            self.swap_in(slot, frame, proc);
            debug!(
                "swap-in pid={} page={} slot={} frame={}",
                proc.pid, page, slot, frame
            );
        } else {
            let words = self.store.words_per_page();
            let base = frame * words;
            for word in &mut self.store.main[base..base + words] {
                *word = END_SENTINEL;
            }
        }

        // A swapped-in page has no backing copy left, so it stays dirty and
        // must swap out again if evicted. A sentinel-filled frame can be
        // rebuilt from nothing.
        let was_dirty = self.store.frame_table[frame].dirty;
        self.store.frame_table[frame] = FrameMeta {
            owner: proc.pid,
            page,
            valid: true,
            dirty: was_dirty,
        };
        self.store.order.insert(frame);

        proc.page_table.lock().unwrap().insert(
            page,
            PageTableEntry {
                frame,
                valid: true,
                dirty: false,
            },
        );

        Ok(self.store.frame_base(frame) + offset)
    }

    /// Finds a free frame or evicts a victim.
    fn acquire_frame(&mut self, proc: &Pcb) -> Result<usize, MemoryError> {
        if let Some(frame) = self.store.free_frames.iter().position(|&free| free) {
            self.store.free_frames[frame] = false;
            self.store.frame_table[frame].dirty = false;
            return Ok(frame);
        }

        let victim = self
            .store
            .order
            .victim()
            .expect("frame replacement order empty with no free frames");
        self.evict_frame(victim, proc)?;
        Ok(victim)
    }

    /// Evicts a frame: invalidates the owner's mapping, flushes the cache's
    /// view of the frame, and swaps the contents out when dirty.
    fn evict_frame(&mut self, victim: usize, proc: &Pcb) -> Result<(), MemoryError> {
        let meta = self.store.frame_table[victim];
        if !meta.valid {
            return Ok(());
        }

        let owner = self.processes.get(&meta.owner).cloned();

        if let Some(owner) = owner.as_deref() {
            let mut table = owner.page_table.lock().unwrap();
            if let Some(entry) = table.get_mut(&meta.page) {
                if entry.valid && entry.frame == victim {
                    entry.valid = false;
                    entry.dirty = false;
                }
            }
        }

        let base = self.store.frame_base(victim);
        let page_size = self.store.page_size;
        {
            let MemoryState { cache, store, .. } = self;
            cache.invalidate_page(base, page_size, meta.owner, owner.as_deref(), store)?;
        }

        if self.store.frame_table[victim].dirty {
            let slot = self
                .store
                .free_slots
                .pop_front()
                .ok_or(MemoryError::OutOfSwap {
                    pid: meta.owner,
                    page: meta.page,
                })?;
            self.swap_out(victim, slot, proc);
            self.store.swap_map.insert((meta.owner, meta.page), slot);
            debug!(
                "swap-out pid={} page={} frame={} slot={}",
                meta.owner, meta.page, victim, slot
            );
        }

        self.store.frame_table[victim] = FrameMeta::empty();
        Ok(())
    }

    fn swap_out(&mut self, frame: usize, slot: usize, proc: &Pcb) {
        let words = self.store.words_per_page();
        let frame_base = frame * words;
        let slot_base = slot * words;
        for i in 0..words {
            self.store.swap[slot_base + i] = self.store.main[frame_base + i];
        }
        account_secondary(proc, words as u64);
    }

    fn swap_in(&mut self, slot: usize, frame: usize, proc: &Pcb) {
        let words = self.store.words_per_page();
        let frame_base = frame * words;
        let slot_base = slot * words;
        for i in 0..words {
            self.store.main[frame_base + i] = self.store.swap[slot_base + i];
        }
        // Restored contents exist only in the frame now.
        self.store.frame_table[frame].dirty = true;
        self.store.free_slots.push_back(slot);
        account_secondary(proc, words as u64);
    }
}

fn account_secondary(proc: &Pcb, words: u64) {
    proc.counters
        .secondary_accesses
        .fetch_add(words, Ordering::Relaxed);
    proc.counters
        .memory_cycles
        .fetch_add(proc.weights.secondary * words, Ordering::Relaxed);
}

//! Fully-associative, process-tagged L1 cache.
//!
//! Write-allocate, write-back. The tag combines the owning pid (upper bits)
//! with the physical block address, so two processes' working sets never
//! alias even though the cache is a single shared instance. A tag-to-line
//! map gives O(1) lookup; replacement prefers invalid lines and otherwise
//! follows the configured FIFO/LRU order.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use log::trace;

use crate::common::MemoryError;
use crate::mem::policy::{EvictionOrder, PolicyKind};
use crate::mem::PhysicalStore;
use crate::process::Pcb;

/// Shift placing the pid above the 24-bit block address in a tag.
const PID_TAG_SHIFT: u32 = 24;
const BLOCK_MASK: u64 = 0x00ff_ffff;

#[derive(Debug, Clone)]
struct CacheLine {
    tag: u64,
    data: Vec<u32>,
    valid: bool,
    dirty: bool,
}

/// The shared L1 cache.
#[derive(Debug)]
pub struct L1Cache {
    lines: Vec<CacheLine>,
    words_per_line: usize,
    tags: HashMap<u64, usize>,
    order: EvictionOrder,
    hits: u64,
    misses: u64,
}

impl L1Cache {
    pub fn new(num_lines: usize, words_per_line: usize, policy: PolicyKind) -> Self {
        let lines = vec![
            CacheLine {
                tag: 0,
                data: vec![0; words_per_line],
                valid: false,
                dirty: false,
            };
            num_lines
        ];
        Self {
            lines,
            words_per_line,
            tags: HashMap::new(),
            order: EvictionOrder::new(policy),
            hits: 0,
            misses: 0,
        }
    }

    fn line_bytes(&self) -> u32 {
        (self.words_per_line * 4) as u32
    }

    /// Splits a physical address into a pid-qualified tag and a word offset
    /// within the line.
    fn decode_address(&self, addr: u32, pid: u32) -> (u64, usize) {
        let block = (addr / self.line_bytes()) as u64;
        let tag = ((pid as u64) << PID_TAG_SHIFT) | (block & BLOCK_MASK);
        let word_offset = ((addr % self.line_bytes()) / 4) as usize;
        (tag, word_offset)
    }

    /// Reads the word at a physical address through the cache.
    pub fn read(
        &mut self,
        addr: u32,
        proc: &Pcb,
        store: &mut dyn PhysicalStore,
    ) -> Result<u32, MemoryError> {
        let (tag, offset) = self.decode_address(addr, proc.pid);
        account_access(proc);

        if let Some(&index) = self.tags.get(&tag) {
            self.hits += 1;
            proc.counters.cache_read_hits.fetch_add(1, Ordering::Relaxed);
            self.order.touch(index);
            return Ok(self.lines[index].data[offset]);
        }

        self.misses += 1;
        proc.counters
            .cache_read_misses
            .fetch_add(1, Ordering::Relaxed);

        let index = self.take_victim(proc, store)?;
        self.fill_line(tag, index, proc, store)?;
        Ok(self.lines[index].data[offset])
    }

    /// Writes the word at a physical address through the cache
    /// (write-allocate, write-back).
    pub fn write(
        &mut self,
        addr: u32,
        value: u32,
        proc: &Pcb,
        store: &mut dyn PhysicalStore,
    ) -> Result<(), MemoryError> {
        let (tag, offset) = self.decode_address(addr, proc.pid);
        account_access(proc);

        let index = if let Some(&index) = self.tags.get(&tag) {
            self.hits += 1;
            proc.counters
                .cache_write_hits
                .fetch_add(1, Ordering::Relaxed);
            self.order.touch(index);
            index
        } else {
            self.misses += 1;
            proc.counters
                .cache_write_misses
                .fetch_add(1, Ordering::Relaxed);
            let index = self.take_victim(proc, store)?;
            self.fill_line(tag, index, proc, store)?;
            index
        };

        self.lines[index].data[offset] = value;
        self.lines[index].dirty = true;
        Ok(())
    }

    /// Writes back and invalidates every line of `pid` within the physical
    /// range `[base, base + size)`. Used when the backing frame is evicted.
    pub fn invalidate_page(
        &mut self,
        base: u32,
        size: usize,
        pid: u32,
        owner: Option<&Pcb>,
        store: &mut dyn PhysicalStore,
    ) -> Result<(), MemoryError> {
        let step = self.line_bytes();
        let mut addr = base;
        let end = base.saturating_add(size as u32);
        while addr < end {
            let (tag, _) = self.decode_address(addr, pid);
            if let Some(index) = self.tags.remove(&tag) {
                if self.lines[index].dirty {
                    if let Some(owner) = owner {
                        self.write_back(index, owner, store)?;
                    }
                }
                self.order.remove(index);
                let line = &mut self.lines[index];
                line.valid = false;
                line.dirty = false;
                line.tag = 0;
            }
            addr += step;
        }
        Ok(())
    }

    /// Drops every line owned by `pid` without writing back. Used when the
    /// process terminates.
    pub fn invalidate_pid(&mut self, pid: u32) {
        for index in 0..self.lines.len() {
            if self.lines[index].valid && (self.lines[index].tag >> PID_TAG_SHIFT) as u32 == pid {
                self.tags.remove(&self.lines[index].tag);
                self.order.remove(index);
                let line = &mut self.lines[index];
                line.valid = false;
                line.dirty = false;
                line.tag = 0;
            }
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Number of valid lines.
    pub fn usage(&self) -> usize {
        self.lines.iter().filter(|l| l.valid).count()
    }

    pub fn capacity(&self) -> usize {
        self.lines.len()
    }

    /// Picks a line to fill: any invalid line first, then the policy victim.
    /// Evicting through the policy on a valid line writes it back if dirty.
    fn take_victim(
        &mut self,
        proc: &Pcb,
        store: &mut dyn PhysicalStore,
    ) -> Result<usize, MemoryError> {
        if let Some(index) = self.lines.iter().position(|l| !l.valid) {
            return Ok(index);
        }

        let index = self
            .order
            .victim()
            .expect("replacement order empty with all lines valid");
        debug_assert!(self.lines[index].valid, "policy yielded an invalid line");

        if self.lines[index].dirty {
            self.write_back(index, proc, store)?;
        }
        self.tags.remove(&self.lines[index].tag);
        let line = &mut self.lines[index];
        line.valid = false;
        line.dirty = false;
        line.tag = 0;
        Ok(index)
    }

    /// Loads a whole line from physical memory.
    fn fill_line(
        &mut self,
        tag: u64,
        index: usize,
        proc: &Pcb,
        store: &mut dyn PhysicalStore,
    ) -> Result<(), MemoryError> {
        let base = ((tag & BLOCK_MASK) as u32) * self.line_bytes();
        for i in 0..self.words_per_line {
            let word = store.read_phys(base + (i as u32) * 4, proc)?;
            self.lines[index].data[i] = word;
        }
        let line = &mut self.lines[index];
        line.tag = tag;
        line.valid = true;
        line.dirty = false;
        self.tags.insert(tag, index);
        self.order.insert(index);
        trace!("cache fill pid={} base={:#x} line={}", proc.pid, base, index);
        Ok(())
    }

    fn write_back(
        &mut self,
        index: usize,
        proc: &Pcb,
        store: &mut dyn PhysicalStore,
    ) -> Result<(), MemoryError> {
        let base = ((self.lines[index].tag & BLOCK_MASK) as u32) * self.line_bytes();
        for i in 0..self.words_per_line {
            let word = self.lines[index].data[i];
            store.write_phys(base + (i as u32) * 4, word, proc)?;
        }
        trace!("cache write-back base={:#x} line={}", base, index);
        Ok(())
    }
}

fn account_access(proc: &Pcb) {
    proc.counters.cache_accesses.fetch_add(1, Ordering::Relaxed);
    proc.counters
        .memory_cycles
        .fetch_add(proc.weights.cache, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::MemWeights;

    /// Flat backing store for cache unit tests.
    struct FlatStore {
        words: Vec<u32>,
    }

    impl PhysicalStore for FlatStore {
        fn read_phys(&mut self, addr: u32, _proc: &Pcb) -> Result<u32, MemoryError> {
            self.words
                .get((addr / 4) as usize)
                .copied()
                .ok_or(MemoryError::SegFault { addr })
        }

        fn write_phys(&mut self, addr: u32, value: u32, _proc: &Pcb) -> Result<(), MemoryError> {
            let slot = self
                .words
                .get_mut((addr / 4) as usize)
                .ok_or(MemoryError::SegFault { addr })?;
            *slot = value;
            Ok(())
        }
    }

    fn store_with(words: usize) -> FlatStore {
        FlatStore {
            words: vec![0; words],
        }
    }

    fn test_pcb(pid: u32) -> Pcb {
        Pcb::new(pid, "cache-test", MemWeights::default())
    }

    #[test]
    fn read_miss_then_hit() {
        let mut cache = L1Cache::new(2, 4, PolicyKind::Fifo);
        let mut store = store_with(64);
        store.words[3] = 77;
        let pcb = test_pcb(1);

        assert_eq!(cache.read(12, &pcb, &mut store).unwrap(), 77);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.read(12, &pcb, &mut store).unwrap(), 77);
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn write_allocate_and_write_back_on_eviction() {
        // One line: the second block must evict the first, forcing the dirty
        // write-back into the store.
        let mut cache = L1Cache::new(1, 4, PolicyKind::Fifo);
        let mut store = store_with(64);
        let pcb = test_pcb(1);

        cache.write(0, 123, &pcb, &mut store).unwrap();
        assert_eq!(store.words[0], 0);

        cache.read(16, &pcb, &mut store).unwrap();
        assert_eq!(store.words[0], 123);
    }

    #[test]
    fn pid_tags_isolate_processes() {
        let mut cache = L1Cache::new(4, 4, PolicyKind::Lru);
        let mut store = store_with(64);
        let p1 = test_pcb(1);
        let p2 = test_pcb(2);

        cache.write(0, 11, &p1, &mut store).unwrap();
        // Same physical block, different pid: must miss and fill its own line.
        assert_eq!(cache.read(0, &p2, &mut store).unwrap(), 0);
        assert_eq!(cache.usage(), 2);
    }

    #[test]
    fn invalidate_page_writes_back_dirty_lines() {
        let mut cache = L1Cache::new(4, 4, PolicyKind::Fifo);
        let mut store = store_with(64);
        let pcb = test_pcb(1);

        cache.write(4, 55, &pcb, &mut store).unwrap();
        cache
            .invalidate_page(0, 64, 1, Some(&pcb), &mut store)
            .unwrap();
        assert_eq!(store.words[1], 55);
        assert_eq!(cache.usage(), 0);

        // A later read misses and refetches from the store.
        assert_eq!(cache.read(4, &pcb, &mut store).unwrap(), 55);
    }

    #[test]
    fn invalidate_pid_drops_without_write_back() {
        let mut cache = L1Cache::new(4, 4, PolicyKind::Fifo);
        let mut store = store_with(64);
        let pcb = test_pcb(1);

        cache.write(0, 99, &pcb, &mut store).unwrap();
        cache.invalidate_pid(1);
        assert_eq!(cache.usage(), 0);
        assert_eq!(store.words[0], 0);
    }

    #[test]
    fn lru_prefers_least_recently_used_line() {
        let mut cache = L1Cache::new(2, 4, PolicyKind::Lru);
        let mut store = store_with(256);
        let pcb = test_pcb(1);

        cache.read(0, &pcb, &mut store).unwrap();
        cache.read(16, &pcb, &mut store).unwrap();
        cache.read(0, &pcb, &mut store).unwrap();

        // Line for block 16 is least recently used and must be the victim.
        cache.read(32, &pcb, &mut store).unwrap();
        assert_eq!(cache.read(0, &pcb, &mut store).unwrap(), 0);
        assert_eq!(cache.hits(), 2);
    }
}

//! Integration tests for the memory hierarchy: translation, paging, swap
//! and the process-tagged L1.

use std::sync::Arc;

use mips_simulator::config::SystemConfig;
use mips_simulator::isa::END_SENTINEL;
use mips_simulator::mem::MemoryHierarchy;
use mips_simulator::process::{MemWeights, Pcb};

/// Two frames of main memory, four swap slots, a small cache.
fn create_small_config() -> SystemConfig {
    let mut config = SystemConfig::default();
    config.main_memory.total = 512;
    config.main_memory.page_size = 256;
    config.secondary_memory.total = 1024;
    config.cache.size = 2;
    config.cache.line_size = 16;
    config
}

fn create_process(mem: &MemoryHierarchy, pid: u32) -> Arc<Pcb> {
    let pcb = Arc::new(Pcb::new(pid, &format!("mem-test-{}", pid), MemWeights::default()));
    mem.register_process(Arc::clone(&pcb));
    pcb
}

/// Write-then-read returns the written word.
#[test]
fn test_write_read_round_trip() {
    let mem = MemoryHierarchy::new(&SystemConfig::default());
    let pcb = create_process(&mem, 1);

    mem.write(0x10, 12345, &pcb).unwrap();
    assert_eq!(mem.read(0x10, &pcb).unwrap(), 12345);
}

/// A fresh page reads as the END sentinel so uninitialized fetches halt.
#[test]
fn test_fresh_page_is_sentinel_filled() {
    let mem = MemoryHierarchy::new(&SystemConfig::default());
    let pcb = create_process(&mem, 1);

    assert_eq!(mem.read(0x300, &pcb).unwrap(), END_SENTINEL);
}

/// Touching a third page with two frames forces a swap-out; touching the
/// evicted page again restores its bytes exactly.
#[test]
fn test_page_fault_with_swap_restores_contents() {
    let config = create_small_config();
    let mem = MemoryHierarchy::new(&config);
    let pcb = create_process(&mem, 1);

    // Fill page 0 and page 1 with distinct patterns.
    for i in 0..4 {
        mem.write(i * 4, 100 + i, &pcb).unwrap();
        mem.write(0x100 + i * 4, 200 + i, &pcb).unwrap();
    }
    assert_eq!(mem.frames_owned_by(1), 2);
    assert_eq!(mem.swap_slots_of(1), 0);

    // Page 2 evicts one of the first two into swap.
    mem.write(0x200, 999, &pcb).unwrap();
    assert_eq!(mem.frames_owned_by(1), 2);
    assert_eq!(mem.swap_slots_of(1), 1);
    assert_eq!(pcb.resident_pages(), 2);

    // Both original pages must still read back exactly, whichever was
    // evicted (reading it swaps it back in).
    for i in 0..4 {
        assert_eq!(mem.read(i * 4, &pcb).unwrap(), 100 + i);
    }
    for i in 0..4 {
        assert_eq!(mem.read(0x100 + i * 4, &pcb).unwrap(), 200 + i);
    }
    assert_eq!(mem.read(0x200, &pcb).unwrap(), 999);
}

/// Repeated reads of an unchanging address return identical values across
/// intervening evictions.
#[test]
fn test_repeated_reads_stable_across_evictions() {
    let config = create_small_config();
    let mem = MemoryHierarchy::new(&config);
    let pcb = create_process(&mem, 1);

    mem.write(0x20, 4242, &pcb).unwrap();
    for round in 0..5 {
        // Churn two other pages to force eviction traffic.
        mem.write(0x100 + round * 4, round, &pcb).unwrap();
        mem.write(0x200 + round * 4, round, &pcb).unwrap();
        assert_eq!(mem.read(0x20, &pcb).unwrap(), 4242, "round {}", round);
    }
}

/// Per-process isolation: the same logical address maps to different
/// frames and different contents for different processes.
#[test]
fn test_process_isolation() {
    let mem = MemoryHierarchy::new(&SystemConfig::default());
    let p1 = create_process(&mem, 1);
    let p2 = create_process(&mem, 2);

    mem.write(0x40, 111, &p1).unwrap();
    mem.write(0x40, 222, &p2).unwrap();

    assert_eq!(mem.read(0x40, &p1).unwrap(), 111);
    assert_eq!(mem.read(0x40, &p2).unwrap(), 222);
}

/// The count of valid page-table entries always matches the frames the
/// process owns in the frame table.
#[test]
fn test_page_table_matches_frame_ownership() {
    let config = create_small_config();
    let mem = MemoryHierarchy::new(&config);
    let p1 = create_process(&mem, 1);
    let p2 = create_process(&mem, 2);

    mem.write(0x000, 1, &p1).unwrap();
    assert_eq!(p1.resident_pages(), mem.frames_owned_by(1));

    mem.write(0x100, 2, &p2).unwrap();
    assert_eq!(p1.resident_pages(), mem.frames_owned_by(1));
    assert_eq!(p2.resident_pages(), mem.frames_owned_by(2));

    // Evict p1's page by giving p2 another one.
    mem.write(0x200, 3, &p2).unwrap();
    assert_eq!(p1.resident_pages(), mem.frames_owned_by(1));
    assert_eq!(p2.resident_pages(), mem.frames_owned_by(2));
}

/// Eviction with an exhausted swap pool fails with OutOfSwap.
#[test]
fn test_out_of_swap_error() {
    let mut config = create_small_config();
    config.secondary_memory.total = 0;
    let mem = MemoryHierarchy::new(&config);
    let pcb = create_process(&mem, 1);

    mem.write(0x000, 1, &pcb).unwrap();
    mem.write(0x100, 2, &pcb).unwrap();

    let err = mem.write(0x200, 3, &pcb).unwrap_err();
    assert!(err.to_string().contains("swap"), "got: {}", err);
}

/// Freeing a finished process releases frames and swap slots; freeing it
/// again is a no-op.
#[test]
fn test_free_process_is_idempotent() {
    let config = create_small_config();
    let mem = MemoryHierarchy::new(&config);
    let pcb = create_process(&mem, 1);

    for page in 0..3 {
        mem.write(page * 0x100, page, &pcb).unwrap();
    }
    assert_eq!(mem.frames_owned_by(1), 2);
    assert_eq!(mem.swap_slots_of(1), 1);

    mem.free_process(&pcb);
    assert_eq!(mem.frames_owned_by(1), 0);
    assert_eq!(mem.swap_slots_of(1), 0);
    assert_eq!(pcb.resident_pages(), 0);

    mem.free_process(&pcb);
    assert_eq!(mem.frames_owned_by(1), 0);

    // The freed frames are reusable by another process.
    let p2 = create_process(&mem, 2);
    mem.write(0x000, 7, &p2).unwrap();
    assert_eq!(mem.read(0x000, &p2).unwrap(), 7);
    assert_eq!(mem.frames_owned_by(2), 1);
}

/// LRU frame policy keeps the recently touched page resident.
#[test]
fn test_lru_frame_policy_keeps_hot_page() {
    let mut config = create_small_config();
    config.main_memory.policy = 1;
    let mem = MemoryHierarchy::new(&config);
    let pcb = create_process(&mem, 1);

    mem.write(0x000, 10, &pcb).unwrap(); // page 0
    mem.write(0x100, 20, &pcb).unwrap(); // page 1
    mem.read(0x000, &pcb).unwrap(); // page 0 is now most recent

    mem.write(0x200, 30, &pcb).unwrap(); // evicts page 1, not page 0

    let table = pcb.page_table.lock().unwrap();
    assert!(table.get(&0).unwrap().valid, "hot page evicted under LRU");
    assert!(!table.get(&1).unwrap().valid, "cold page kept under LRU");
}

/// Per-process cache hit/miss counters are split by read and write.
#[test]
fn test_cache_counters_split_by_access_kind() {
    let mem = MemoryHierarchy::new(&SystemConfig::default());
    let pcb = create_process(&mem, 1);

    mem.write(0x10, 5, &pcb).unwrap(); // write miss (allocate)
    mem.write(0x10, 6, &pcb).unwrap(); // write hit
    mem.read(0x10, &pcb).unwrap(); // read hit
    mem.read(0x300, &pcb).unwrap(); // read miss

    use std::sync::atomic::Ordering;
    let c = &pcb.counters;
    assert_eq!(c.cache_write_misses.load(Ordering::Relaxed), 1);
    assert_eq!(c.cache_write_hits.load(Ordering::Relaxed), 1);
    assert_eq!(c.cache_read_hits.load(Ordering::Relaxed), 1);
    assert_eq!(c.cache_read_misses.load(Ordering::Relaxed), 1);
    assert_eq!(c.cache_accesses.load(Ordering::Relaxed), 4);
    assert_eq!(c.mem_reads.load(Ordering::Relaxed), 2);
    assert_eq!(c.mem_writes.load(Ordering::Relaxed), 2);
}

/// Memory cycles accumulate the configured per-level weights.
#[test]
fn test_memory_cycle_weights() {
    let mem = MemoryHierarchy::new(&SystemConfig::default());
    let weights = MemWeights {
        cache: 2,
        primary: 7,
        secondary: 11,
    };
    let pcb = Arc::new(Pcb::new(3, "weights", weights));
    mem.register_process(Arc::clone(&pcb));

    mem.write(0x10, 1, &pcb).unwrap();

    use std::sync::atomic::Ordering;
    let cycles = pcb.counters.memory_cycles.load(Ordering::Relaxed);
    // One cache access plus the line fill from primary memory.
    let fill_words = SystemConfig::default().cache.words_per_line() as u64;
    assert_eq!(cycles, 2 + 7 * fill_words);
}

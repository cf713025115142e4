//! Final reports: per-process metrics and the memory-usage CSV.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::process::{Pcb, State, TIMESTAMP_UNSET};
use crate::sched::UsageSample;

/// Renders the final metrics block for one process.
pub fn process_report(pcb: &Pcb) -> String {
    let c = &pcb.counters;
    let arrival = pcb.arrival.load(Ordering::Relaxed);
    let raw_start = pcb.start.load(Ordering::Relaxed);
    let start = if raw_start == TIMESTAMP_UNSET {
        arrival
    } else {
        raw_start
    };
    let finish = pcb.finish.load(Ordering::Relaxed);
    let burst = pcb.burst.load(Ordering::Relaxed);

    let turnaround = finish.saturating_sub(arrival);
    let waiting = turnaround.saturating_sub(burst);
    let response = start.saturating_sub(arrival);

    let state = match pcb.state.load() {
        State::Finished => "Finished",
        State::Ready => "Ready",
        State::Running => "Running",
        State::Blocked => "Blocked",
    };

    let mut out = String::new();
    let _ = writeln!(out, "==========================================================");
    let _ = writeln!(out, "PROCESS {} ({})", pcb.pid, pcb.name);
    let _ = writeln!(out, "==========================================================");
    let _ = writeln!(out, "final_state              {}", state);
    if let Some(fault) = pcb.fault_message() {
        let _ = writeln!(out, "error                    {}", fault);
    }
    let _ = writeln!(
        out,
        "quantum                  {}",
        pcb.quantum.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        out,
        "priority                 {}",
        pcb.priority.load(Ordering::Relaxed)
    );
    let _ = writeln!(out, "arrival                  {}", arrival);
    let _ = writeln!(out, "start                    {}", start);
    let _ = writeln!(out, "finish                   {}", finish);
    let _ = writeln!(out, "burst                    {}", burst);
    let _ = writeln!(out, "turnaround               {}", turnaround);
    let _ = writeln!(out, "waiting                  {}", waiting);
    let _ = writeln!(out, "response                 {}", response);
    let _ = writeln!(out, "----------------------------------------------------------");
    let _ = writeln!(
        out,
        "pipeline_cycles          {}",
        c.pipeline_cycles.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        out,
        "stage_invocations        {}",
        c.stage_invocations.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        out,
        "instructions_completed   {}",
        c.instructions_completed.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        out,
        "load_use_stalls          {}",
        c.stall_events.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        out,
        "io_cycles                {}",
        c.io_cycles.load(Ordering::Relaxed)
    );
    let _ = writeln!(out, "----------------------------------------------------------");
    let _ = writeln!(
        out,
        "mem_accesses             {} (reads {} / writes {})",
        c.mem_accesses_total.load(Ordering::Relaxed),
        c.mem_reads.load(Ordering::Relaxed),
        c.mem_writes.load(Ordering::Relaxed)
    );
    let reads_h = c.cache_read_hits.load(Ordering::Relaxed);
    let reads_m = c.cache_read_misses.load(Ordering::Relaxed);
    let writes_h = c.cache_write_hits.load(Ordering::Relaxed);
    let writes_m = c.cache_write_misses.load(Ordering::Relaxed);
    let _ = writeln!(
        out,
        "l1_accesses              {}",
        c.cache_accesses.load(Ordering::Relaxed)
    );
    let _ = writeln!(out, "  reads                  {} hits / {} misses", reads_h, reads_m);
    let _ = writeln!(out, "  writes                 {} hits / {} misses", writes_h, writes_m);
    let _ = writeln!(
        out,
        "primary_accesses         {}",
        c.primary_accesses.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        out,
        "secondary_accesses       {}",
        c.secondary_accesses.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        out,
        "memory_cycles            {}",
        c.memory_cycles.load(Ordering::Relaxed)
    );
    let _ = writeln!(out, "total_time               {}", pcb.total_time());

    let cores = pcb.cores_used.lock().unwrap();
    let cores_str: Vec<String> = cores.iter().map(|c| c.to_string()).collect();
    let _ = writeln!(out, "cores_used               [{}]", cores_str.join(", "));
    drop(cores);

    let _ = writeln!(out, "registers                {}", pcb.regs.lock().unwrap().dump());

    let output = pcb.snapshot_output();
    if output.is_empty() {
        let _ = writeln!(out, "program_output           (none)");
    } else {
        let _ = writeln!(out, "program_output");
        for line in output {
            let _ = writeln!(out, "  -> {}", line);
        }
    }
    let _ = writeln!(out, "==========================================================");
    out
}

/// Writes one metrics file per process under `dir`.
pub fn write_process_reports(procs: &[Arc<Pcb>], dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    for pcb in procs {
        let path = dir.join(format!("metrics_pid{}.txt", pcb.pid));
        fs::write(path, process_report(pcb))?;
    }
    Ok(())
}

/// Writes the simulator-wide memory-usage CSV.
pub fn write_memory_csv(samples: &[UsageSample], path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = String::from(
        "event,frames_used,frames_total,swap_slots_used,swap_slots_total,cache_lines_used,cache_lines_total\n",
    );
    for sample in samples {
        let u = sample.usage;
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{}",
            sample.event,
            u.frames_used,
            u.frames_total,
            u.swap_slots_used,
            u.swap_slots_total,
            u.cache_lines_used,
            u.cache_lines_total
        );
    }
    fs::write(path, out)
}

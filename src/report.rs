use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::cli::ReportFormat;
use crate::harness::{BenchmarkRun, SlotResult};

/// Writes the report to stdout or a file in the specified format.
pub fn write_report(
    run: &BenchmarkRun,
    format: &ReportFormat,
    output_file: Option<&Path>,
) -> io::Result<()> {
    with_output(output_file, |out| format_run(run, format, out))
}

/// Writes one summary line per run of a sweep.
pub fn write_sweep(
    runs: &[BenchmarkRun],
    format: &ReportFormat,
    output_file: Option<&Path>,
) -> io::Result<()> {
    with_output(output_file, |out| format_sweep(runs, format, out))
}

fn with_output(
    output_file: Option<&Path>,
    body: impl FnOnce(&mut dyn Write) -> io::Result<()>,
) -> io::Result<()> {
    match output_file {
        Some(path) => {
            let f = File::create(path)?;
            let mut out = BufWriter::new(f);
            body(&mut out)?;
            out.flush()
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            body(&mut out)?;
            out.flush()
        }
    }
}

fn format_run(run: &BenchmarkRun, format: &ReportFormat, out: &mut dyn Write) -> io::Result<()> {
    match format {
        ReportFormat::Text => write_text(run, out),
        ReportFormat::Csv => write_csv(run, out),
    }
}

fn write_slots(label: &str, slots: &[SlotResult], out: &mut dyn Write) -> io::Result<()> {
    if slots.is_empty() {
        return Ok(());
    }
    writeln!(
        out,
        "{} counters ({} thread{}):",
        label,
        slots.len(),
        if slots.len() > 1 { "s" } else { "" }
    )?;
    let counts: Vec<String> = slots.iter().map(|s| s.count.to_string()).collect();
    writeln!(out, "{}", counts.join(" "))?;
    for slot in slots.iter().filter(|s| s.outcome.is_partial()) {
        writeln!(out, "  slot {} partial: {}", slot.index, slot.outcome)?;
    }
    Ok(())
}

fn write_text(run: &BenchmarkRun, out: &mut dyn Write) -> io::Result<()> {
    writeln!(
        out,
        "TEST {} RESULTS ({} worker{}, {:.3}s of {:?}, counter {} Hz):",
        run.workload.name(),
        run.workers.len(),
        if run.workers.len() == 1 { "" } else { "s" },
        run.elapsed_seconds(),
        run.duration,
        run.counter_frequency_hz
    )?;

    write_slots("Worker", &run.workers, out)?;
    write_slots("Background", &run.background, out)?;

    if !run.workers.is_empty() {
        writeln!(out, "Total operations: {}", run.total_ops())?;
        writeln!(out, "Operations per second: {:.0}", run.ops_per_second())?;
    }

    for (i, series) in run.samplers.iter().enumerate() {
        writeln!(
            out,
            "Jitter sampler {} (period {:?}, {} of {} samples, cycles):",
            i,
            series.period,
            series.len(),
            series.cap
        )?;
        if series.is_empty() {
            writeln!(out, "(none)")?;
            continue;
        }
        let samples: Vec<String> = series.samples.iter().map(|s| s.to_string()).collect();
        writeln!(out, "{}", samples.join(","))?;
    }
    Ok(())
}

/// One row per counter slot, then one row per jitter sample.
fn write_csv(run: &BenchmarkRun, out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "kind,index,value,status")?;
    for slot in &run.workers {
        writeln!(out, "worker,{},{},{}", slot.index, slot.count, csv_field(&slot.outcome.to_string()))?;
    }
    for slot in &run.background {
        writeln!(out, "background,{},{},{}", slot.index, slot.count, csv_field(&slot.outcome.to_string()))?;
    }
    for (i, series) in run.samplers.iter().enumerate() {
        for (k, sample) in series.samples.iter().enumerate() {
            writeln!(out, "jitter{}_{}us,{},{},", i, series.period.as_micros(), k, sample)?;
        }
    }
    Ok(())
}

fn csv_field(s: &str) -> String {
    if s.contains(',') || s.contains('"') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn format_sweep(runs: &[BenchmarkRun], format: &ReportFormat, out: &mut dyn Write) -> io::Result<()> {
    match format {
        ReportFormat::Text => {
            writeln!(
                out,
                "{:>8} {:>16} {:>16} {:>8}",
                "Workers", "Total ops", "Per worker", "Partial"
            )?;
            for run in runs {
                writeln!(
                    out,
                    "{:>8} {:>16} {:>16.0} {:>8}",
                    run.workers.len(),
                    run.total_ops(),
                    run.mean_per_worker(),
                    run.partial_slots().count()
                )?;
            }
        }
        ReportFormat::Csv => {
            writeln!(out, "workers,total_ops,per_worker,partial")?;
            for run in runs {
                writeln!(
                    out,
                    "{},{},{:.1},{}",
                    run.workers.len(),
                    run.total_ops(),
                    run.mean_per_worker(),
                    run.partial_slots().count()
                )?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkloadKind;
    use crate::sampler::JitterSeries;
    use crate::workload::WorkerOutcome;
    use std::time::Duration;

    fn sample_run() -> BenchmarkRun {
        BenchmarkRun {
            workload: WorkloadKind::Idle,
            duration: Duration::from_secs(2),
            elapsed_cycles: 2_000_000_000,
            counter_frequency_hz: 1_000_000_000,
            workers: vec![
                SlotResult {
                    index: 0,
                    count: 101,
                    outcome: WorkerOutcome::Stopped,
                },
                SlotResult {
                    index: 1,
                    count: 7,
                    outcome: WorkerOutcome::Exhausted("dup(3) failed, EMFILE".into()),
                },
            ],
            background: vec![],
            samplers: vec![JitterSeries {
                period: Duration::from_micros(200),
                cap: 3,
                samples: vec![12, -3, 40],
            }],
        }
    }

    fn format_to_string(run: &BenchmarkRun, fmt: &ReportFormat) -> String {
        let mut buf = Vec::new();
        format_run(run, fmt, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_text_report() {
        let out = format_to_string(&sample_run(), &ReportFormat::Text);
        assert!(out.starts_with("TEST idle RESULTS (2 workers, 2.000s of 2s, counter 1000000000 Hz)"), "{}", out);
        assert!(out.contains("101 7\n"));
        assert!(out.contains("slot 1 partial: exhausted"));
        assert!(out.contains("Total operations: 108\n"));
        assert!(out.contains("Operations per second: 54\n"));
        assert!(out.contains("12,-3,40\n"));
        assert!(!out.contains("Background"));
    }

    #[test]
    fn test_csv_report() {
        let out = format_to_string(&sample_run(), &ReportFormat::Csv);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "kind,index,value,status");
        assert_eq!(lines[1], "worker,0,101,stopped");
        assert_eq!(lines[2], "worker,1,7,\"exhausted (dup(3) failed, EMFILE)\"");
        assert_eq!(lines[3], "jitter0_200us,0,12,");
        assert_eq!(lines.len(), 6);
    }

    #[test]
    fn test_sweep_csv() {
        let runs = vec![sample_run()];
        let mut buf = Vec::new();
        format_sweep(&runs, &ReportFormat::Csv, &mut buf).unwrap();
        let out = String::from_utf8(buf).unwrap();
        assert_eq!(out, "workers,total_ops,per_worker,partial\n2,108,54.0,1\n");
    }

    #[test]
    fn test_write_report_to_file() {
        let path = std::env::temp_dir().join("schedbench_test_report.txt");
        write_report(&sample_run(), &ReportFormat::Text, Some(&path)).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("Total operations: 108"));
        let _ = std::fs::remove_file(&path);
    }
}

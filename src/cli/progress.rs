//! Progress bars and summaries for CLI output.

use console::style;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};

use crate::{CacheStatus, MessageOutcome, ResolveSnapshot, SyncProgress, SyncReport, UpgradeReport, WorkerState};

const SEPARATOR: &str = "────────────────────────────────────────────────────────────";

/// Sync progress rendered as a single bar.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} - {msg}")
                .expect("progress template is valid")
                .progress_chars("━━╌"),
        );
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl SyncProgress for BarProgress {
    fn on_sync_start(&self, missing: usize) {
        self.bar.set_length(missing as u64);
    }

    fn on_fetch_start(&self, key: &str) {
        self.bar.set_message(key.to_string());
    }

    fn on_fetched(&self, _key: &str, _bytes: u64) {
        self.bar.inc(1);
    }

    fn on_error(&self, key: &str, error: &str) {
        self.bar.abandon_with_message(format!("{key}: {error}"));
    }
}

pub fn print_upgrade(report: &UpgradeReport) {
    if report.first_install {
        println!("{} first install, {} resource(s) cached", style("✓").green(), report.promoted);
    } else {
        println!(
            "{} upgraded: {} retained, {} evicted, {} refreshed",
            style("✓").green(),
            report.retained,
            report.evicted,
            report.promoted
        );
    }
}

pub fn print_sync(report: &SyncReport) {
    println!(
        "{} fetched {} resource(s) ({}), {} already cached",
        style("✓").green(),
        report.fetched,
        HumanBytes(report.total_bytes),
        report.already_cached
    );
}

pub fn print_message(outcome: &MessageOutcome) {
    match outcome {
        MessageOutcome::Activated(report) => print_upgrade(report),
        MessageOutcome::NothingPending => println!("Nothing waiting to activate."),
        MessageOutcome::Synced(report) => print_sync(report),
    }
}

pub fn print_status(state: WorkerState, status: &CacheStatus, resolve: &ResolveSnapshot) {
    let state_label = match state {
        WorkerState::Activated => style("activated").green(),
        WorkerState::Installed => style("installed (waiting)").yellow(),
        WorkerState::Parsed => style("not installed").dim(),
        WorkerState::Redundant => style("redundant").red(),
    };

    println!("{SEPARATOR}");
    println!("  State:      {state_label}");
    println!(
        "  Cached:     {}/{} resource(s), {}",
        status.cached,
        status.declared,
        HumanBytes(status.cached_bytes)
    );
    if status.pending > 0 {
        println!("  Pending:    {} resource(s) in holding area", status.pending);
    }
    if !status.has_stored_manifest {
        println!("  {}", style("No activated manifest stored").dim());
    }
    if resolve.handled() + resolve.declined > 0 {
        println!(
            "  Requests:   {} hit, {} fetched, {} declined",
            resolve.cache_hits, resolve.network_fetches, resolve.declined
        );
    }
    println!("{SEPARATOR}");
    if status.is_complete() {
        println!("{} available offline", style("✓").green());
    } else {
        println!(
            "{} missing resource(s); run `shellcache sync` to fetch them",
            status.declared - status.cached
        );
    }
}

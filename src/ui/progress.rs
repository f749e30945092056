use crate::gates::Deficiency;
use crate::ui::icons::{BLOCKER, CHECK, CROSS, PARALLEL, PAUSE, RETRY, SPARKLE};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Terminal UI for a run, rendered via `indicatif` progress bars.
///
/// A phase bar tracks completed phases; each running phase gets its own
/// spinner underneath, so both loops of a parallel pair are visible at once.
pub struct RunUI {
    multi: MultiProgress,
    phase_bar: ProgressBar,
    spinners: Mutex<HashMap<String, ProgressBar>>,
    verbose: bool,
}

impl RunUI {
    /// `completed` phases are counted as done from the start (resumed runs).
    pub fn new(total_phases: u64, completed: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let phase_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░");

        let phase_bar = multi.add(ProgressBar::new(total_phases));
        phase_bar.set_style(phase_style);
        phase_bar.set_prefix("Phases");
        phase_bar.set_position(completed);

        Self {
            multi,
            phase_bar,
            spinners: Mutex::new(HashMap::new()),
            verbose,
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    fn with_spinner(&self, phase: &str, f: impl FnOnce(&ProgressBar)) {
        if let Ok(spinners) = self.spinners.lock() {
            if let Some(bar) = spinners.get(phase) {
                f(bar);
            }
        }
    }

    fn finish_spinner(&self, phase: &str, msg: String) {
        if let Ok(mut spinners) = self.spinners.lock() {
            if let Some(bar) = spinners.remove(phase) {
                bar.finish_with_message(msg);
            }
        }
    }

    pub fn phase_started(&self, phase: &str, name: &str, retries: u32, max_retries: u32) {
        self.phase_bar
            .set_message(format!("{}: {}", style(phase).yellow(), name));

        let spinner_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(spinner_style);
        bar.set_prefix(format!("  {}", phase));
        bar.set_message(format!(
            "{} {}",
            name,
            style(format!("(retries {}/{})", retries, max_retries)).dim()
        ));
        bar.enable_steady_tick(Duration::from_millis(100));

        if let Ok(mut spinners) = self.spinners.lock() {
            spinners.insert(phase.to_string(), bar);
        }
    }

    pub fn attempt(&self, phase: &str, attempt: u32) {
        self.with_spinner(phase, |bar| {
            bar.set_message(format!("attempt {}", style(attempt).cyan()));
        });
    }

    pub fn retry(&self, phase: &str, retries: u32, max_retries: u32, deficiencies: &[Deficiency]) {
        self.with_spinner(phase, |bar| {
            bar.set_message(format!(
                "{}rework {}/{}",
                RETRY,
                style(retries).yellow(),
                max_retries
            ));
        });
        if self.verbose {
            for d in deficiencies {
                self.print_line(format!("    {} {}", style("→").dim(), style(d).dim()));
            }
        }
    }

    pub fn threshold_reached(&self, leader: &str, partner: &str) {
        self.print_line(format!(
            "  {}Phase {} reached its partial output threshold; starting phase {}",
            PARALLEL,
            style(leader).yellow(),
            style(partner).yellow().bold()
        ));
    }

    pub fn phase_complete(&self, phase: &str, retries: u32) {
        self.phase_bar.inc(1);
        self.finish_spinner(
            phase,
            format!("{}complete after {} retr{}", CHECK, retries, if retries == 1 { "y" } else { "ies" }),
        );
        self.print_line(format!(
            "{} Phase {} complete!",
            SPARKLE,
            style(phase).green().bold()
        ));
    }

    pub fn phase_blocked(&self, phase: &str, deficiencies: &[Deficiency]) {
        self.finish_spinner(phase, format!("{}BLOCKED", CROSS));
        self.print_line(format!(
            "{}{}",
            BLOCKER,
            style(format!("Phase {} BLOCKED", phase)).red().bold()
        ));
        for d in deficiencies {
            self.print_line(format!("    {} {}", style("-").red(), d));
        }
    }

    pub fn phase_halted(&self, phase: &str) {
        self.finish_spinner(phase, format!("{}halted", PAUSE));
    }

    pub fn finish(&self) {
        if let Ok(mut spinners) = self.spinners.lock() {
            for (_, bar) in spinners.drain() {
                bar.finish_and_clear();
            }
        }
        self.phase_bar.finish();
    }
}

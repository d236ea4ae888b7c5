use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

/// The single user-facing diagnostics channel.
///
/// Messages are printed only when verbose output was requested. Structured
/// `tracing` events are emitted by the callers independently of this flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reporter {
    verbose: bool,
}

impl Reporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn step(&self, msg: &str) {
        if self.verbose {
            println!("{}", msg.cyan());
        }
    }

    pub fn notice(&self, msg: &str) {
        if self.verbose {
            println!("{} {}", "↑".yellow(), msg.yellow());
        }
    }

    pub fn success(&self, msg: &str) {
        if self.verbose {
            println!("{} {}", "✓".green(), msg.green());
        }
    }

    pub fn warn(&self, msg: &str) {
        if self.verbose {
            eprintln!("{} {}", "⚠".yellow(), msg);
        }
    }

    pub fn error(&self, msg: &str) {
        if self.verbose {
            eprintln!("{} {}", "✗".red(), msg.red());
        }
    }

    /// Progress bar for a download of `total` bytes.
    ///
    /// Hidden unless verbose; without a declared length a plain line is printed instead.
    pub fn download_bar(&self, total: Option<u64>) -> ProgressBar {
        match total {
            Some(total) if self.verbose => {
                let pb = ProgressBar::new(total);
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("{bar:40.green} Downloading update > {percent}%, complete in {eta}")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("█▉ "),
                );
                pb
            }
            _ => {
                self.step("Downloading update...");
                ProgressBar::hidden()
            }
        }
    }
}

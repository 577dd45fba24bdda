//! Terminal presentation: progress bars, status lines and the candidate prompt.
//!
//! A [`Console`] is built once in `main` and handed to the pipeline by
//! reference. [`Console::hidden`] gives a silent instance for tests and
//! non-interactive use.

use std::io::{self, BufRead, Write};
use std::time::Duration;

use async_trait::async_trait;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressState, ProgressStyle};

use crate::error::DownloadError;
use crate::resolver::{Candidate, CandidatePrompt};

const TICKS: &[&str] = &["⠋ ", "⠙ ", "⠹ ", "⠸ ", "⠼ ", "⠴ ", "⠦ ", "⠧ ", "⠇ ", "⠏ "];

pub struct Console {
    multi: MultiProgress,
    interactive: bool,
}

impl Console {
    pub fn new() -> Self {
        Self { multi: MultiProgress::new(), interactive: true }
    }

    /// Draws nothing and cancels every prompt.
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
            interactive: false,
        }
    }

    /// Prints a status line above any active progress bars.
    pub fn println(&self, message: impl AsRef<str>) {
        let _ = self.multi.println(message.as_ref());
    }

    pub fn spinner(&self, message: impl Into<String>) -> ProgressBar {
        let spinner = self.multi.add(ProgressBar::new_spinner());
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        spinner.set_message(message.into());
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    }

    /// Overall bar for the chapters of one series.
    pub fn chapters_bar(&self, total: usize, series: &str) -> ProgressBar {
        let bar = self.multi.add(ProgressBar::new(total as u64));
        bar.set_style(bar_style("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} chapters ({eta}) {msg}"));
        bar.set_message(format!("Downloading {}", series));
        bar
    }

    /// Per-chapter bar counting finished pages.
    pub fn pages_bar(&self, total: usize, chapter: &str) -> ProgressBar {
        let bar = self.multi.add(ProgressBar::new(total as u64));
        bar.set_style(bar_style("  {prefix:.bold.dim} [{wide_bar:.cyan/blue}] {pos}/{len} pages"));
        bar.set_prefix(chapter.to_string());
        bar
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .with_key("eta", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
            let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
        })
        .progress_chars("#>-")
}

#[async_trait]
impl CandidatePrompt for Console {
    async fn choose(&self, input: &str, candidates: &[Candidate]) -> Result<usize, DownloadError> {
        if !self.interactive {
            return Ok(0);
        }

        println!("\nAmbiguous input '{}'. Did you mean one of these?", input);
        println!("{:>4}  {:<40} {:>10}", "#", "Site Name", "Confidence");
        for (i, candidate) in candidates.iter().enumerate() {
            println!("{:>4}  {:<40} {:>9.0}%", i + 1, candidate.display_name, candidate.score);
        }

        loop {
            print!("Select number (0 to cancel) [1]: ");
            io::stdout().flush()?;

            let Some(line) = read_stdin_line().await? else {
                return Ok(0);
            };

            let line = line.trim();
            if line.is_empty() {
                return Ok(1);
            }
            match line.parse::<usize>() {
                Ok(choice) if choice <= candidates.len() => return Ok(choice),
                _ => eprintln!("Please enter a number between 0 and {}", candidates.len()),
            }
        }
    }
}

/// Reads one line on a blocking thread so the calling task stays cancellable.
/// `None` on end of input.
async fn read_stdin_line() -> Result<Option<String>, DownloadError> {
    let line = tokio::task::spawn_blocking(|| -> io::Result<Option<String>> {
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line)? {
            0 => Ok(None),
            _ => Ok(Some(line)),
        }
    })
    .await
    .map_err(io::Error::other)??;
    Ok(line)
}

use std::collections::HashMap;
use std::time::Duration;

use cloudferry_core::ProgressEvent;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

/// Render engine progress events until the sending side is dropped.
pub fn spawn_renderer(mut rx: UnboundedReceiver<ProgressEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["-", "\\", "|", "/", "-"]),
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        pb.set_message("Scanning source tree...");

        let mut tracker = Tracker::default();
        while let Some(event) = rx.recv().await {
            if let ProgressEvent::ScanComplete { bytes, .. } = &event {
                pb.set_length(*bytes);
                pb.set_style(
                    ProgressStyle::with_template(
                        "{spinner} [{elapsed_precise}] [{bar:30}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=> "),
                );
            }
            if let ProgressEvent::FileFailed { path, message } = &event {
                pb.println(format!("failed: {path}: {message}"));
            }
            let advanced = tracker.apply(&event);
            pb.inc(advanced);
            pb.set_message(tracker.message());
        }
        pb.finish_and_clear();
    })
}

/// Byte and file accounting behind the progress bar.
#[derive(Default)]
struct Tracker {
    total_files: u64,
    done: u64,
    skipped: u64,
    failed: u64,
    in_flight: HashMap<String, u64>,
}

impl Tracker {
    /// Apply one event, returning how many bytes the bar advances.
    fn apply(&mut self, event: &ProgressEvent) -> u64 {
        match event {
            ProgressEvent::ScanComplete { files, .. } => {
                self.total_files = *files;
                0
            }
            ProgressEvent::FileStarted { path, .. } => {
                self.in_flight.insert(path.clone(), 0);
                0
            }
            ProgressEvent::ChunkCommitted { path, committed, .. } => {
                let seen = self.in_flight.entry(path.clone()).or_default();
                let delta = committed.saturating_sub(*seen);
                *seen = (*seen).max(*committed);
                delta
            }
            ProgressEvent::FileComplete { path, bytes } => {
                self.done += 1;
                let seen = self.in_flight.remove(path).unwrap_or(0);
                bytes.saturating_sub(seen)
            }
            ProgressEvent::FileSkipped { bytes, .. } => {
                self.skipped += 1;
                *bytes
            }
            ProgressEvent::FileFailed { path, .. } => {
                self.failed += 1;
                // committed bytes of a failed file stay on the bar
                self.in_flight.remove(path);
                0
            }
        }
    }

    fn message(&self) -> String {
        let mut msg = format!("{}/{} files", self.done + self.skipped, self.total_files);
        if self.skipped > 0 {
            msg.push_str(&format!(", {} skipped", self.skipped));
        }
        if self.failed > 0 {
            msg.push_str(&format!(", {} failed", self.failed));
        }
        msg
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes == 0 {
        return "0 B".to_owned();
    }
    let mut value = bytes as f64;
    let mut unit = 0usize;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

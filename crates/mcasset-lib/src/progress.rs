use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Progress reporter trait for pipeline operations.
/// Implementations forward updates to whatever renders them.
pub trait ProgressReporter: Send + Sync {
    /// Start a new named step
    fn start_step(&self, name: &str);

    /// Update bytes transferred for download progress.
    /// `total` is the server's Content-Length when it sent one.
    fn update_bytes(&self, transferred: u64, total: Option<u64>);

    /// Byte progress of one unit inside a concurrent batch
    fn update_unit_bytes(&self, _unit: usize, transferred: u64, total: Option<u64>) {
        self.update_bytes(transferred, total);
    }

    /// Set a short status message
    fn set_message(&self, message: &str);

    /// Set a numeric step count for the current step (e.g. "3/12").
    fn set_step_count(&self, current: u32, total: Option<u32>);

    /// Mark the current step as complete
    fn done(&self);
}

/// A progress reporter that does nothing (silent).
/// Useful for tests.
pub struct SilentProgressReporter;

impl ProgressReporter for SilentProgressReporter {
    fn start_step(&self, _name: &str) {}
    fn update_bytes(&self, _transferred: u64, _total: Option<u64>) {}
    fn set_message(&self, _message: &str) {}
    fn set_step_count(&self, _current: u32, _total: Option<u32>) {}
    fn done(&self) {}
}

/// Plain `\r`-overwritten status line on stdout, used for sequential
/// transfers that were not handed a reporter.
pub struct LineProgress {
    label: String,
}

impl LineProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl ProgressReporter for LineProgress {
    fn start_step(&self, name: &str) {
        println!("{}", name);
    }

    fn update_bytes(&self, transferred: u64, total: Option<u64>) {
        let line = format!(
            "\r{} {:.2}MB/{:.2}MB",
            self.label,
            megabytes(transferred),
            megabytes(total.unwrap_or(0))
        );
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(line.as_bytes());
        let _ = out.flush();
    }

    fn set_message(&self, message: &str) {
        print!("\r{}", message);
    }

    fn set_step_count(&self, _current: u32, _total: Option<u32>) {}

    fn done(&self) {
        println!();
    }
}

pub fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}

/// Events emitted by workers and consumed by a single rendering task
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Step(String),
    Bytes {
        unit: Option<usize>,
        transferred: u64,
        total: Option<u64>,
    },
    Message(String),
    Count {
        current: u32,
        total: Option<u32>,
    },
    Done,
}

/// Reporter that forwards everything into a channel. Cheap to clone and safe
/// to share between concurrent workers; rendering happens elsewhere.
#[derive(Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelReporter {
    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: ProgressEvent) {
        // The renderer going away must not fail a transfer
        let _ = self.tx.send(event);
    }
}

impl ProgressReporter for ChannelReporter {
    fn start_step(&self, name: &str) {
        self.send(ProgressEvent::Step(name.to_string()));
    }

    fn update_bytes(&self, transferred: u64, total: Option<u64>) {
        self.send(ProgressEvent::Bytes {
            unit: None,
            transferred,
            total,
        });
    }

    fn update_unit_bytes(&self, unit: usize, transferred: u64, total: Option<u64>) {
        self.send(ProgressEvent::Bytes {
            unit: Some(unit),
            transferred,
            total,
        });
    }

    fn set_message(&self, message: &str) {
        self.send(ProgressEvent::Message(message.to_string()));
    }

    fn set_step_count(&self, current: u32, total: Option<u32>) {
        self.send(ProgressEvent::Count { current, total });
    }

    fn done(&self) {
        self.send(ProgressEvent::Done);
    }
}

/// Console renderer: the only writer of progress output while a run is active.
pub struct ConsoleProgress {
    reporter: ChannelReporter,
    task: JoinHandle<()>,
}

impl ConsoleProgress {
    pub fn start(enabled: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let bar = if enabled {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(100));

        let task = tokio::spawn(render(rx, bar));
        Self {
            reporter: ChannelReporter::new(tx),
            task,
        }
    }

    pub fn reporter(&self) -> ChannelReporter {
        self.reporter.clone()
    }

    /// Close the channel and wait for the renderer to drain it.
    /// Reporters cloned out of this handle must be dropped first.
    pub async fn finish(self) {
        drop(self.reporter);
        let _ = self.task.await;
    }
}

async fn render(mut rx: mpsc::UnboundedReceiver<ProgressEvent>, bar: ProgressBar) {
    let mut state = RenderState::default();
    while let Some(event) = rx.recv().await {
        if let Some(line) = state.apply(event) {
            bar.set_message(line);
        }
    }
    bar.finish_and_clear();
}

/// Folds events into the single status line shown to the user
#[derive(Default)]
struct RenderState {
    step: String,
    count: Option<(u32, Option<u32>)>,
    bytes: Option<(u64, Option<u64>)>,
    /// Latest byte count per batch unit, for the current step
    units: BTreeMap<usize, u64>,
}

impl RenderState {
    fn apply(&mut self, event: ProgressEvent) -> Option<String> {
        match event {
            ProgressEvent::Step(name) => {
                self.step = name;
                self.count = None;
                self.bytes = None;
                self.units.clear();
            }
            ProgressEvent::Message(message) => self.step = message,
            ProgressEvent::Count { current, total } => self.count = Some((current, total)),
            ProgressEvent::Bytes {
                unit: Some(unit),
                transferred,
                ..
            } => {
                self.units.insert(unit, transferred);
            }
            ProgressEvent::Bytes {
                unit: None,
                transferred,
                total,
            } => self.bytes = Some((transferred, total)),
            ProgressEvent::Done => {
                self.bytes = None;
                return None;
            }
        }
        Some(self.line())
    }

    fn line(&self) -> String {
        let mut line = format!("{:<30}", self.step);
        if let Some((current, total)) = self.count {
            match total {
                Some(total) => line.push_str(&format!(" {}/{}", current, total)),
                None => line.push_str(&format!(" {}", current)),
            }
        }
        if let Some((transferred, total)) = self.bytes {
            line.push_str(&format!(
                " {:.2}MB/{:.2}MB",
                megabytes(transferred),
                megabytes(total.unwrap_or(0))
            ));
        }
        if !self.units.is_empty() {
            line.push_str(&format!(
                " {:.2}MB in {} files",
                megabytes(self.units.values().sum()),
                self.units.len()
            ));
        }
        line
    }
}

// src/engine.rs
use crate::error::Result;
use crate::pattern::PatternExpander;
use crate::plugins::{Plugin, ProbeResult, ResultSink};
use crate::progress::Progress;
use crate::types::{BusterError, GlobalOptions, ProbeError};
use crate::wordlist::{is_skippable, WordReader, Wordlist};
use futures::future::join_all;
use log::{debug, error, info};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, Receiver, Sender, UnboundedReceiver};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Calibrating,
    Running,
    Cancelled,
    Draining,
    Done,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EngineState::Idle => "idle",
            EngineState::Calibrating => "calibrating",
            EngineState::Running => "running",
            EngineState::Cancelled => "cancelled",
            EngineState::Draining => "draining",
            EngineState::Done => "done",
        };
        f.write_str(label)
    }
}

/// Receiving ends handed to the result and error consumers.
pub struct EngineChannels {
    pub results: UnboundedReceiver<ProbeResult>,
    pub errors: UnboundedReceiver<ProbeError>,
}

pub struct Engine {
    options: GlobalOptions,
    plugin: Box<dyn Plugin>,
    sink: ResultSink,
    progress: Arc<Progress>,
    cancel: CancellationToken,
    state: watch::Sender<EngineState>,
}

impl Engine {
    pub fn new(options: GlobalOptions, plugin: Box<dyn Plugin>) -> (Self, EngineChannels) {
        let (sink, results, errors) = ResultSink::channel();
        let (state, _) = watch::channel(EngineState::Idle);
        let engine = Self {
            options,
            plugin,
            sink,
            progress: Arc::new(Progress::new()),
            cancel: CancellationToken::new(),
            state,
        };
        (engine, EngineChannels { results, errors })
    }

    pub fn progress(&self) -> Arc<Progress> {
        Arc::clone(&self.progress)
    }

    /// Cancelling the token stops the run cleanly; `run` then returns `Ok`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    pub fn plugin(&self) -> &dyn Plugin {
        self.plugin.as_ref()
    }

    /// Drives the whole run. Configuration and calibration errors are returned before any
    /// worker starts; per-word errors go to the error channel instead.
    pub async fn run(self) -> Result<()> {
        let Engine {
            options,
            plugin,
            sink,
            progress,
            cancel,
            state,
        } = self;

        let name = plugin.name().to_string();
        let outcome = execute(&options, plugin, sink, &progress, &cancel, &state).await;
        state.send_replace(EngineState::Done);
        if let Err(e) = &outcome {
            error!("{} stopped: {}", name, e);
        }
        outcome
    }
}

async fn execute(
    options: &GlobalOptions,
    mut plugin: Box<dyn Plugin>,
    sink: ResultSink,
    progress: &Arc<Progress>,
    cancel: &CancellationToken,
    state: &watch::Sender<EngineState>,
) -> Result<()> {
    if options.threads == 0 {
        return Err(BusterError::ConfigError(
            "threads must be greater than zero".to_string(),
        ));
    }

    let wordlist = Wordlist::from_options(options)?;
    let patterns = match &options.pattern_file {
        Some(path) => PatternExpander::load(path).await?,
        None => PatternExpander::new(Vec::new()),
    };
    let mut reader = wordlist.open().await?;

    state.send_replace(EngineState::Calibrating);
    tokio::select! {
        _ = cancel.cancelled() => {
            info!("cancelled during calibration");
            return Ok(());
        }
        calibrated = plugin.pre_run() => calibrated?,
    }

    // Calibration state is read-only from here on.
    let plugin: Arc<dyn Plugin> = Arc::from(plugin);

    let estimate = wordlist.estimate(|word| {
        1 + patterns.len() as u64 + plugin.additional_words(word).len() as u64
    });
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!("cancelled while counting words");
            return Ok(());
        }
        expected = estimate => {
            if let Some(expected) = expected? {
                progress.set_expected(expected);
            }
        }
    }

    let started = Instant::now();
    state.send_replace(EngineState::Running);
    info!(
        "starting {} with {} threads on {}",
        plugin.name(),
        options.threads,
        wordlist.source()
    );

    let (word_tx, word_rx) = mpsc::channel::<String>(options.threads);
    let word_rx = Arc::new(Mutex::new(word_rx));

    let workers: Vec<_> = (0..options.threads)
        .map(|id| {
            let worker = Worker {
                id,
                plugin: Arc::clone(&plugin),
                words: Arc::clone(&word_rx),
                sink: sink.clone(),
                progress: Arc::clone(progress),
                cancel: cancel.clone(),
                delay: options.delay,
            };
            tokio::spawn(worker.run())
        })
        .collect();

    let produced = produce(&mut reader, &word_tx, plugin.as_ref(), &patterns, cancel).await;
    if produced.is_err() {
        // Stop the workers rather than letting them drain a half-read wordlist.
        cancel.cancel();
    }
    if cancel.is_cancelled() {
        state.send_replace(EngineState::Cancelled);
    }

    state.send_replace(EngineState::Draining);
    drop(word_tx);
    for joined in join_all(workers).await {
        if let Err(e) = joined {
            error!("worker task failed: {}", e);
        }
    }
    // Last sender: closes the result and error channels.
    drop(sink);

    info!(
        "{} words issued in {:.2}s",
        progress.issued(),
        started.elapsed().as_secs_f64()
    );
    produced
}

/// Feeds the word channel: the word itself, its pattern expansions, then its plugin
/// derived words. Every blocking step races the cancellation token.
async fn produce(
    reader: &mut WordReader,
    words: &Sender<String>,
    plugin: &dyn Plugin,
    patterns: &PatternExpander,
    cancel: &CancellationToken,
) -> Result<()> {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = reader.next_word() => next?,
        };
        let Some(word) = next else {
            return Ok(());
        };
        if is_skippable(&word) {
            continue;
        }

        let derived = patterns
            .expand(&word)
            .into_iter()
            .chain(plugin.additional_words(&word));
        for candidate in std::iter::once(word).chain(derived) {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                sent = words.send(candidate) => {
                    if sent.is_err() {
                        debug!("word channel closed, stopping producer");
                        return Ok(());
                    }
                }
            }
        }
    }
}

struct Worker {
    id: usize,
    plugin: Arc<dyn Plugin>,
    words: Arc<Mutex<Receiver<String>>>,
    sink: ResultSink,
    progress: Arc<Progress>,
    cancel: CancellationToken,
    delay: Option<Duration>,
}

impl Worker {
    async fn run(self) {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = next_word(&self.words) => next,
            };
            let Some(word) = next else {
                break;
            };

            self.progress.increment_issued();
            if word.is_empty() {
                continue;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                outcome = self.plugin.process_word(&word, &self.sink) => {
                    if let Err(e) = outcome {
                        debug!("worker {}: {} failed: {}", self.id, word, e);
                        self.sink.error(ProbeError::new(word, e));
                    }
                }
            }

            if let Some(delay) = self.delay {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        debug!("worker {} exiting", self.id);
    }
}

async fn next_word(words: &Mutex<Receiver<String>>) -> Option<String> {
    words.lock().await.recv().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WordSource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        extra: Vec<String>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Plugin for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn pre_run(&mut self) -> Result<()> {
            Ok(())
        }

        fn additional_words(&self, word: &str) -> Vec<String> {
            self.extra.iter().map(|e| format!("{}{}", word, e)).collect()
        }

        async fn process_word(&self, word: &str, sink: &ResultSink) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            sink.emit(crate::plugins::TftpResult {
                file: word.to_string(),
                size: None,
                status: crate::types::ResultStatus::Found,
                verbose: false,
            });
            Ok(())
        }

        fn config_string(&self) -> String {
            String::new()
        }
    }

    fn range_options(expr: &str, threads: usize) -> GlobalOptions {
        GlobalOptions {
            threads,
            words: WordSource::Range(expr.to_string()),
            ..GlobalOptions::default()
        }
    }

    #[tokio::test]
    async fn test_expected_counts_derived_words() {
        let calls = Arc::new(AtomicUsize::new(0));
        let plugin = Echo {
            extra: vec![".bak".to_string(), ".old".to_string()],
            calls: Arc::clone(&calls),
        };
        let (engine, mut channels) = Engine::new(range_options("w[1-4]", 2), Box::new(plugin));
        let progress = engine.progress();
        let mut state = engine.state();

        engine.run().await.unwrap();

        assert_eq!(progress.expected(), 12);
        assert_eq!(progress.issued(), 12);
        assert_eq!(calls.load(Ordering::SeqCst), 12);
        assert_eq!(*state.borrow_and_update(), EngineState::Done);

        let mut seen = Vec::new();
        while let Some(result) = channels.results.recv().await {
            seen.push(result.entity().to_string());
        }
        seen.sort();
        assert_eq!(seen.len(), 12);
        assert!(seen.contains(&"w3.old".to_string()));
    }

    #[tokio::test]
    async fn test_zero_threads_is_rejected() {
        let plugin = Echo {
            extra: Vec::new(),
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let (engine, _channels) = Engine::new(range_options("w[1-2]", 0), Box::new(plugin));
        assert!(matches!(
            engine.run().await,
            Err(BusterError::ConfigError(_))
        ));
    }

    /// Cancels the run as soon as calibration finishes.
    struct CancelAfterCalibration {
        cancel: CancellationToken,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Plugin for CancelAfterCalibration {
        fn name(&self) -> &str {
            "cancel-after-calibration"
        }

        async fn pre_run(&mut self) -> Result<()> {
            self.cancel.cancel();
            Ok(())
        }

        async fn process_word(&self, _word: &str, _sink: &ResultSink) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn config_string(&self) -> String {
            String::new()
        }
    }

    #[tokio::test]
    async fn test_cancellation_before_counting_skips_the_estimate() {
        let calls = Arc::new(AtomicUsize::new(0));
        let placeholder = Echo {
            extra: Vec::new(),
            calls: Arc::clone(&calls),
        };
        let (mut engine, mut channels) =
            Engine::new(range_options("w[1-1000]", 4), Box::new(placeholder));
        engine.plugin = Box::new(CancelAfterCalibration {
            cancel: engine.cancellation_token(),
            calls: Arc::clone(&calls),
        });
        let progress = engine.progress();
        let mut state = engine.state();

        assert!(engine.run().await.is_ok());
        assert_eq!(progress.expected(), 0);
        assert_eq!(progress.issued(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(*state.borrow_and_update(), EngineState::Done);
        assert!(channels.results.recv().await.is_none());
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(EngineState::Draining.to_string(), "draining");
        assert_eq!(EngineState::Done.to_string(), "done");
    }
}

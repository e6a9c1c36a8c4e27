// src/output.rs
use crate::error::Result;
use crate::plugins::ProbeResult;
use crate::progress::Progress;
use crate::types::{BusterError, GlobalOptions, ProbeError};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const TICK: Duration = Duration::from_millis(200);

/// Progress bar for a run, hidden in quiet and no-progress mode.
pub fn progress_bar(options: &GlobalOptions) -> Result<ProgressBar> {
    if options.quiet || options.no_progress {
        return Ok(ProgressBar::hidden());
    }

    let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
    let style = ProgressStyle::with_template("Progress: {pos}/{len} ({percent}%) [{elapsed_precise}]")
        .map_err(|e| BusterError::OutputError(format!("invalid progress template: {}", e)))?;
    bar.set_style(style);
    Ok(bar)
}

/// Copies the engine counters into the bar until `done` fires.
pub fn spawn_ticker(
    progress: Arc<Progress>,
    bar: ProgressBar,
    done: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK);
        loop {
            tokio::select! {
                _ = done.cancelled() => break,
                _ = interval.tick() => {
                    let expected = progress.expected();
                    if expected > 0 {
                        bar.set_length(expected);
                    }
                    bar.set_position(progress.issued());
                }
            }
        }
        bar.set_position(progress.issued());
        bar.finish_and_clear();
    })
}

/// Renders results to stdout and appends them to the optional result log.
pub struct OutputManager {
    bar: ProgressBar,
    log: Option<BufWriter<File>>,
    show_errors: bool,
}

impl OutputManager {
    pub fn new(options: &GlobalOptions, bar: ProgressBar) -> Result<Self> {
        let log = options
            .output_file
            .as_deref()
            .map(open_log)
            .transpose()?;

        Ok(Self {
            bar,
            log,
            show_errors: !options.quiet && !options.no_error,
        })
    }

    pub fn write_result(&mut self, result: &ProbeResult) -> Result<()> {
        let line = result.render()?;
        self.bar.suspend(|| println!("{}", line));

        if let Some(log) = &mut self.log {
            writeln!(log, "{}", line)
                .map_err(|e| BusterError::OutputError(format!("failed to write result log: {}", e)))?;
        }
        Ok(())
    }

    pub fn write_error(&self, error: &ProbeError) {
        if self.show_errors {
            self.bar.suspend(|| eprintln!("[ERROR] {}", error));
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Some(log) = &mut self.log {
            log.flush()
                .map_err(|e| BusterError::OutputError(format!("failed to flush result log: {}", e)))?;
        }
        Ok(())
    }

    /// Drains both channels until the engine closes them. Returns the number of results.
    pub async fn consume(
        mut self,
        mut results: UnboundedReceiver<ProbeResult>,
        mut errors: UnboundedReceiver<ProbeError>,
    ) -> Result<usize> {
        let mut count = 0;
        let (mut results_open, mut errors_open) = (true, true);

        while results_open || errors_open {
            tokio::select! {
                result = results.recv(), if results_open => match result {
                    Some(result) => {
                        count += 1;
                        if let Err(e) = self.write_result(&result) {
                            self.bar.suspend(|| eprintln!("[ERROR] {}", e));
                        }
                    }
                    None => results_open = false,
                },
                error = errors.recv(), if errors_open => match error {
                    Some(error) => self.write_error(&error),
                    None => errors_open = false,
                },
            }
        }

        self.flush()?;
        Ok(count)
    }
}

fn open_log(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| BusterError::OutputError(format!("Failed to create directory: {}", e)))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            BusterError::OutputError(format!("Failed to open {}: {}", path.display(), e))
        })?;
    Ok(BufWriter::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{ResultSink, TftpResult};
    use crate::types::ResultStatus;

    fn tftp_result(file: &str) -> TftpResult {
        TftpResult {
            file: file.to_string(),
            size: Some(42),
            status: ResultStatus::Found,
            verbose: false,
        }
    }

    #[tokio::test]
    async fn test_results_are_appended_to_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("results.txt");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "previous run\n").unwrap();

        let options = GlobalOptions {
            output_file: Some(path.clone()),
            quiet: true,
            ..GlobalOptions::default()
        };
        let output = OutputManager::new(&options, ProgressBar::hidden()).unwrap();

        let (sink, results, errors) = ResultSink::channel();
        sink.emit(tftp_result("boot.cfg"));
        sink.emit(tftp_result("pxelinux.0"));
        sink.error(ProbeError::new(
            "x",
            BusterError::NetworkError("reset".to_string()),
        ));
        drop(sink);

        assert_eq!(output.consume(results, errors).await.unwrap(), 2);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "previous run\nboot.cfg [42]\npxelinux.0 [42]\n");
    }

    #[test]
    fn test_hidden_bar_when_quiet() {
        let options = GlobalOptions {
            quiet: true,
            ..GlobalOptions::default()
        };
        assert!(progress_bar(&options).unwrap().is_hidden());
    }

    #[tokio::test]
    async fn test_ticker_stops_on_done() {
        let progress = Arc::new(Progress::new());
        progress.set_expected(4);
        progress.increment_issued();
        let done = CancellationToken::new();
        let bar = ProgressBar::hidden();

        let ticker = spawn_ticker(Arc::clone(&progress), bar.clone(), done.clone());
        done.cancel();
        tokio::time::timeout(Duration::from_secs(1), ticker)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bar.position(), 1);
    }
}

use crate::domain::{AtlasError, AtlasResult};
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Receives completion fractions in `[0, 1]` while a long invocation runs.
pub trait ProgressObserver {
    fn report(&mut self, fraction: f64);
}

impl<F: FnMut(f64)> ProgressObserver for F {
    fn report(&mut self, fraction: f64) {
        self(fraction)
    }
}

/// Current fraction in a side-channel progress file. Missing, partially
/// written or non-numeric files read as `None`.
pub fn read_progress(path: &Path) -> Option<f64> {
    let text = fs::read_to_string(path).ok()?;
    let value = text.split_whitespace().last()?.parse::<f64>().ok()?;
    value.is_finite().then(|| value.clamp(0.0, 1.0))
}

/// Runs `invocation` on a background thread and polls `progress_file` from
/// the calling thread until it finishes. The observer sees each new fraction
/// once. An error or panic in the worker is returned here.
pub fn run_with_progress<T, F>(
    invocation: F,
    progress_file: &Path,
    poll_interval: Duration,
    observer: &mut dyn ProgressObserver,
) -> AtlasResult<T>
where
    T: Send,
    F: FnOnce() -> AtlasResult<T> + Send,
{
    thread::scope(|scope| {
        let worker = scope.spawn(invocation);
        let mut last = None;
        loop {
            let finished = worker.is_finished();
            if let Some(fraction) = read_progress(progress_file).filter(|f| last != Some(*f)) {
                observer.report(fraction);
                last = Some(fraction);
            }
            if finished {
                break;
            }
            thread::sleep(poll_interval);
        }
        let outcome = worker.join().map_err(|_| {
            AtlasError::internal("SYS.WORKER_PANIC", "background invocation panicked")
        })?;
        if outcome.is_ok() && last != Some(1.0) {
            observer.report(1.0);
        }
        outcome
    })
}

#[cfg(test)]
mod tests {
    use super::{read_progress, run_with_progress};
    use crate::domain::AtlasError;
    use crate::domain::errors::EXTERNAL_TOOL;
    use std::fs;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn progress_files_are_read_leniently() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("progress");
        assert_eq!(read_progress(&path), None);
        fs::write(&path, "0.25\n").expect("progress file");
        assert_eq!(read_progress(&path), Some(0.25));
        fs::write(&path, "1.7").expect("progress file");
        assert_eq!(read_progress(&path), Some(1.0));
        fs::write(&path, "garbage").expect("progress file");
        assert_eq!(read_progress(&path), None);
    }

    #[test]
    fn observer_sees_each_new_fraction_and_completion() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("progress");
        let worker_path = path.clone();
        let mut seen: Vec<f64> = Vec::new();
        let value = run_with_progress(
            move || {
                for fraction in ["0.2", "0.6"] {
                    fs::write(&worker_path, fraction).expect("progress write");
                    thread::sleep(Duration::from_millis(60));
                }
                Ok(42)
            },
            &path,
            Duration::from_millis(5),
            &mut |fraction: f64| seen.push(fraction),
        )
        .expect("worker should succeed");

        assert_eq!(value, 42);
        assert_eq!(seen.last(), Some(&1.0));
        assert!(seen.contains(&0.6));
    }

    #[test]
    fn worker_errors_are_raised_in_the_foreground() {
        let temp = TempDir::new().expect("tempdir should be created");
        let mut seen: Vec<f64> = Vec::new();
        let error = run_with_progress(
            || -> crate::domain::AtlasResult<()> {
                Err(AtlasError::computation(EXTERNAL_TOOL, "synthe crashed"))
            },
            &temp.path().join("progress"),
            Duration::from_millis(1),
            &mut |fraction: f64| seen.push(fraction),
        )
        .expect_err("worker error should propagate");
        assert!(error.is(EXTERNAL_TOOL));
        assert!(seen.is_empty());
    }
}

use std::io::Write;
use std::time::Duration;

const BAR_CELLS: u64 = 25;

/// Receives pipeline progress once per iteration.
pub trait ProgressSink {
    /// `done` and `total` count interleaved input samples.
    fn update(&mut self, done: u64, total: u64, elapsed: Duration);

    fn finish(&mut self, total: u64, elapsed: Duration);
}

/// Discards progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update(&mut self, _done: u64, _total: u64, _elapsed: Duration) {}

    fn finish(&mut self, _total: u64, _elapsed: Duration) {}
}

/// Audio seconds processed per wall-clock second.
pub fn realtime_factor(samples: u64, samples_per_sec: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 || samples_per_sec == 0 {
        return 0.0;
    }
    samples as f64 / samples_per_sec as f64 / secs
}

/// `[=====                    ]`, one cell per 4%.
pub fn bar(done: u64, total: u64) -> String {
    let filled = if total == 0 {
        BAR_CELLS
    } else {
        (BAR_CELLS * done.min(total) / total).min(BAR_CELLS)
    };
    let mut out = String::with_capacity(BAR_CELLS as usize + 2);
    out.push('[');
    (0..BAR_CELLS).for_each(|cell| out.push(if cell < filled { '=' } else { ' ' }));
    out.push(']');
    out
}

/// Single rewritten console line: bar, percentage and realtime factor.
pub struct ConsoleProgress<W: Write> {
    out: W,
    samples_per_sec: u64,
}

impl<W: Write> ConsoleProgress<W> {
    /// `samples_per_sec` is the source rate times its channel count.
    pub fn new(out: W, samples_per_sec: u64) -> Self {
        Self {
            out,
            samples_per_sec,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ProgressSink for ConsoleProgress<W> {
    fn update(&mut self, done: u64, total: u64, elapsed: Duration) {
        let percent = if total == 0 {
            100.0
        } else {
            99.99 * done as f64 / total as f64
        };
        // Progress output is best effort.
        let _ = write!(
            self.out,
            "\r\tProcessing {} {:3.0}%, {:3.0}x realtime",
            bar(done, total),
            percent,
            realtime_factor(done, self.samples_per_sec, elapsed)
        );
        let _ = self.out.flush();
    }

    fn finish(&mut self, total: u64, elapsed: Duration) {
        let _ = writeln!(
            self.out,
            "\r\tProcessing {} 100%, {:3.0}x realtime",
            bar(1, 1),
            realtime_factor(total, self.samples_per_sec, elapsed)
        );
        let _ = self.out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_cells() {
        assert_eq!(bar(0, 100), format!("[{}]", " ".repeat(25)));
        assert_eq!(bar(40, 100), format!("[{}{}]", "=".repeat(10), " ".repeat(15)));
        assert_eq!(bar(100, 100), format!("[{}]", "=".repeat(25)));
        assert_eq!(bar(500, 100), bar(100, 100));
    }

    #[test]
    fn test_realtime_factor() {
        let rate = 44_100 * 2;
        assert_eq!(realtime_factor(rate * 10, rate, Duration::from_secs(2)), 5.0);
        assert_eq!(realtime_factor(rate, rate, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_console_lines() {
        let mut progress = ConsoleProgress::new(Vec::new(), 1_000);
        progress.update(500, 1_000, Duration::from_millis(250));
        progress.finish(1_000, Duration::from_millis(500));
        let text = String::from_utf8(progress.into_inner()).unwrap();

        assert!(text.starts_with("\r\tProcessing [============             ]  50%,   2x realtime"));
        assert!(text.ends_with("\r\tProcessing [=========================] 100%,   2x realtime\n"));
    }
}

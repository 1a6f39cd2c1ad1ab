//! Console consumers for the harness.
//!
//! Child output is passed through to stdout untouched; the status header
//! goes to stderr so the two never interleave inside one stream.

use std::io::{self, Write};
use std::time::Duration;
use tailspin_core::stats::{format_duration, PassRate, RunCounter};
use tailspin_core::{StatUpdate, StatusSink, TerminalSink};
use tracing::warn;

/// Forwards raw child output to a writer.
#[derive(Debug)]
pub struct PassthroughTerminal<W> {
    out: W,
    broken: bool,
}

impl PassthroughTerminal<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> PassthroughTerminal<W> {
    pub fn new(out: W) -> Self {
        Self { out, broken: false }
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    fn forward(&mut self, data: &[u8]) -> io::Result<()> {
        self.out.write_all(data)?;
        self.out.flush()
    }
}

impl<W: Write> TerminalSink for PassthroughTerminal<W> {
    fn feed(&mut self, data: &[u8]) {
        if self.broken {
            return;
        }
        // A closed stdout must not stop the runs; the log file still has it all.
        if let Err(err) = self.forward(data) {
            warn!(error = %err, "terminal output failed; no longer forwarding");
            self.broken = true;
        }
    }

    fn blur(&mut self) {
        if self.broken {
            return;
        }
        if let Err(err) = self.out.flush() {
            warn!(error = %err, "terminal flush failed; no longer forwarding");
            self.broken = true;
        }
    }
}

/// Labeled statistics block, redrawn whenever the run counter moves.
#[derive(Debug)]
pub struct StatusHeader<W> {
    out: W,
    command: String,
    runs: RunCounter,
    runtime: Option<Duration>,
    average: Option<Duration>,
    pass_rate: PassRate,
}

impl StatusHeader<io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

impl<W: Write> StatusHeader<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            command: String::new(),
            runs: RunCounter::default(),
            runtime: None,
            average: None,
            pass_rate: PassRate::default(),
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    /// The header as it would currently be drawn.
    pub fn lines(&self) -> Vec<String> {
        let duration = |d: Option<Duration>| d.map_or_else(|| "-".to_string(), format_duration);
        vec![
            format!("Command:         {}", self.command),
            format!("Completed Runs:  {}", self.runs),
            format!("Runtime:         {}", duration(self.runtime)),
            format!("Average Runtime: {}", duration(self.average)),
            format!("Success Rate:    {}", self.pass_rate),
        ]
    }

    fn render(&mut self) -> io::Result<()> {
        let mut block = self.lines().join("\n");
        block.push('\n');
        self.out.write_all(block.as_bytes())?;
        self.out.flush()
    }
}

impl<W: Write> StatusSink for StatusHeader<W> {
    fn update(&mut self, update: StatUpdate) {
        let redraw = matches!(update, StatUpdate::Runs(_));
        match update {
            StatUpdate::Command(command) => self.command = command,
            StatUpdate::Runs(runs) => self.runs = runs,
            StatUpdate::Runtime(runtime) => self.runtime = Some(runtime),
            StatUpdate::AverageRuntime(average) => self.average = Some(average),
            StatUpdate::PassRate(pass_rate) => self.pass_rate = pass_rate,
        }
        if redraw {
            if let Err(err) = self.render() {
                warn!(error = %err, "failed to draw status header");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_forwards_bytes_unchanged() {
        let mut terminal = PassthroughTerminal::new(Vec::new());
        terminal.feed(b"\x1b[2Jhello\r\n");
        terminal.feed(&[0xfe]);
        terminal.blur();
        assert_eq!(terminal.get_ref().as_slice(), b"\x1b[2Jhello\r\n\xfe");
    }

    struct Closed;

    impl Write for Closed {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn passthrough_gives_up_after_write_error() {
        let mut terminal = PassthroughTerminal::new(Closed);
        terminal.feed(b"one");
        assert!(terminal.broken);
        terminal.feed(b"two");
    }

    /// Accepts writes but cannot flush.
    struct Unflushable(Vec<u8>);

    impl Write for Unflushable {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    #[test]
    fn failed_flush_on_blur_stops_forwarding() {
        let mut terminal = PassthroughTerminal::new(Unflushable(Vec::new()));
        terminal.blur();
        assert!(terminal.broken);

        terminal.feed(b"late");
        assert!(terminal.get_ref().0.is_empty());
    }

    #[test]
    fn header_starts_empty() {
        let header = StatusHeader::new(Vec::new());
        assert_eq!(
            header.lines(),
            vec![
                "Command:         ",
                "Completed Runs:  0 of \u{221e}",
                "Runtime:         -",
                "Average Runtime: -",
                "Success Rate:    N/A",
            ]
        );
    }

    #[test]
    fn header_redraws_on_run_counter() {
        let mut header = StatusHeader::new(Vec::new());
        header.update(StatUpdate::Command("./flaky --seed 4".into()));
        assert!(header.get_ref().is_empty());

        header.update(StatUpdate::Runtime(Duration::from_millis(1500)));
        header.update(StatUpdate::AverageRuntime(Duration::from_millis(1250)));
        header.update(StatUpdate::PassRate(PassRate {
            successes: 1,
            total: 2,
        }));
        header.update(StatUpdate::Runs(RunCounter {
            completed: 2,
            desired: 0,
        }));

        let drawn = String::from_utf8(header.get_ref().clone()).unwrap();
        assert_eq!(
            drawn,
            "Command:         ./flaky --seed 4\n\
             Completed Runs:  2 of \u{221e}\n\
             Runtime:         1.500s\n\
             Average Runtime: 1.250s\n\
             Success Rate:    50%\n"
        );
    }
}

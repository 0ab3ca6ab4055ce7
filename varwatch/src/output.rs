//! Report stream for the watch session
//!
//! All user-facing notifications flow through one `Reporter` handed to the
//! session at construction. Three variants: Null swallows variable
//! notifications, Default prints one line per transition, Detailed also
//! quotes the source line (with optional surrounding context) that caused
//! it.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing::warn;
use varwatch_dwarf::{VarDescriptor, VarScope};

/// Kind of a reported value transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Initialized,
    Changed,
}

impl Transition {
    fn phrase(&self) -> &'static str {
        match self {
            Transition::Initialized => "initialized",
            Transition::Changed => "has changed",
        }
    }
}

enum Mode {
    Null,
    Default,
    Detailed {
        source: Vec<String>,
        context: usize,
    },
}

/// Output capability owned by the session
pub struct Reporter {
    sink: Box<dyn Write>,
    mode: Mode,
}

impl Reporter {
    /// Swallow variable notifications (markers still print)
    pub fn null() -> Self {
        Self {
            sink: Box::new(io::stdout()),
            mode: Mode::Null,
        }
    }

    /// Plain one-line notifications to `sink`
    pub fn plain(sink: Box<dyn Write>) -> Self {
        Self {
            sink,
            mode: Mode::Default,
        }
    }

    /// Notifications plus the source line (± `context` lines) that fired
    /// them
    pub fn detailed(sink: Box<dyn Write>, source: Vec<String>, context: usize) -> Self {
        Self {
            sink,
            mode: Mode::Detailed { source, context },
        }
    }

    /// Open the report sink: stdout, or the redirect file when given
    pub fn open_sink(path: Option<&Path>) -> io::Result<Box<dyn Write>> {
        Ok(match path {
            Some(path) => Box::new(BufWriter::new(File::create(path)?)),
            None => Box::new(io::stdout()),
        })
    }

    /// Load the debugged source for the detailed variant
    pub fn load_source(path: &Path) -> io::Result<Vec<String>> {
        let text = std::fs::read_to_string(path)?;
        Ok(text.lines().map(|line| line.to_string()).collect())
    }

    pub fn banner(&mut self, function: &str) {
        let _ = writeln!(self.sink, "Watching function {}:", function);
    }

    pub fn entering(&mut self, depth: usize) {
        let _ = writeln!(
            self.sink,
            "\n{}[depth: {}] Entering function...",
            indent(depth),
            depth
        );
    }

    pub fn returning(&mut self, depth: usize) {
        let _ = writeln!(
            self.sink,
            "{}[depth: {}] Returning to function...\n",
            indent(depth),
            depth
        );
    }

    pub fn scalar_change(
        &mut self,
        depth: usize,
        line: u32,
        desc: &VarDescriptor,
        transition: Transition,
        before: &str,
        after: &str,
    ) {
        if matches!(self.mode, Mode::Null) {
            return;
        }
        let _ = writeln!(
            self.sink,
            "{}[Line: {}] [{}] ({}) {}!, before: {}, after: {}",
            indent(depth),
            line,
            scope_label(desc.scope),
            desc.name,
            transition.phrase(),
            before,
            after
        );
        self.quote_source(depth, line);
    }

    pub fn array_change(
        &mut self,
        depth: usize,
        line: u32,
        desc: &VarDescriptor,
        indices: &[u64],
        before: &str,
        after: &str,
    ) {
        if matches!(self.mode, Mode::Null) {
            return;
        }
        let subscript: String = indices.iter().map(|i| format!("[{}]", i)).collect();
        let _ = writeln!(
            self.sink,
            "{}[Line: {}] [{}] ({}{}) has changed!, before: {}, after: {}",
            indent(depth),
            line,
            scope_label(desc.scope),
            desc.name,
            subscript,
            before,
            after
        );
        self.quote_source(depth, line);
    }

    pub fn finished(&mut self) {
        let _ = self.sink.flush();
    }

    /// Quote the source around `line` in detailed mode
    fn quote_source(&mut self, depth: usize, line: u32) {
        let Mode::Detailed { source, context } = &self.mode else {
            return;
        };
        if line == 0 || source.is_empty() {
            return;
        }

        let hit = line as usize;
        let first = hit.saturating_sub(*context).max(1);
        let last = (hit + context).min(source.len());
        let pad = indent(depth);

        let mut block = String::new();
        for number in first..=last {
            let Some(text) = source.get(number - 1) else {
                warn!("source line {} out of range", number);
                continue;
            };
            let marker = if number == hit { '>' } else { ' ' };
            block.push_str(&format!("{}  {} {:>5} {}\n", pad, marker, number, text));
        }
        let _ = self.sink.write_all(block.as_bytes());
    }
}

fn scope_label(scope: VarScope) -> &'static str {
    match scope {
        VarScope::Global => "global",
        VarScope::Local => "local",
    }
}

/// Four spaces per depth level past the first
fn indent(depth: usize) -> String {
    " ".repeat(depth.saturating_sub(1) * 4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use varwatch_dwarf::{Encoding, TypeClass, VarLocation};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn local_int(name: &str) -> VarDescriptor {
        VarDescriptor {
            name: name.to_string(),
            scope: VarScope::Local,
            location: VarLocation::FrameOffset(-20),
            byte_size: 4,
            type_class: TypeClass::Scalar,
            encoding: Encoding::Signed,
            array: None,
        }
    }

    #[test]
    fn scalar_line_carries_all_fields() {
        let capture = Capture::default();
        let mut reporter = Reporter::plain(Box::new(capture.clone()));
        reporter.scalar_change(
            1,
            30,
            &local_int("a"),
            Transition::Initialized,
            "0",
            "3",
        );

        let text = capture.text();
        assert!(text.contains("[Line: 30]"));
        assert!(text.contains("[local]"));
        assert!(text.contains("(a)"));
        assert!(text.contains("initialized!"));
        assert!(text.contains("before: 0, after: 3"));
    }

    #[test]
    fn array_line_shows_every_index() {
        let capture = Capture::default();
        let mut reporter = Reporter::plain(Box::new(capture.clone()));
        reporter.array_change(1, 68, &local_int("arr"), &[5, 7, 6], "0", "1");

        let text = capture.text();
        assert!(text.contains("(arr[5][7][6])"));
        assert!(text.contains("has changed!"));
    }

    #[test]
    fn null_reporter_swallows_changes_but_keeps_markers() {
        let capture = Capture::default();
        let mut reporter = Reporter {
            sink: Box::new(capture.clone()),
            mode: Mode::Null,
        };
        reporter.scalar_change(1, 30, &local_int("a"), Transition::Changed, "1", "2");
        reporter.entering(1);

        let text = capture.text();
        assert!(!text.contains("[Line: 30]"));
        assert!(text.contains("Entering function..."));
    }

    #[test]
    fn recursion_depth_indents_by_four() {
        let capture = Capture::default();
        let mut reporter = Reporter::plain(Box::new(capture.clone()));
        reporter.scalar_change(3, 10, &local_int("n"), Transition::Changed, "1", "2");
        assert!(capture.text().starts_with("        ["));
    }

    #[test]
    fn detailed_quotes_context_around_the_hit() {
        let source: Vec<String> = (1..=10).map(|i| format!("line {} text", i)).collect();
        let capture = Capture::default();
        let mut reporter = Reporter::detailed(Box::new(capture.clone()), source, 1);
        reporter.scalar_change(1, 5, &local_int("a"), Transition::Changed, "1", "2");

        let text = capture.text();
        assert!(text.contains("> "));
        assert!(text.contains("line 4 text"));
        assert!(text.contains("line 5 text"));
        assert!(text.contains("line 6 text"));
        assert!(!text.contains("line 3 text"));
    }
}

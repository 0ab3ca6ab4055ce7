//! Byte-offset to source-line mapping over preprocessed C
//!
//! The parser driver hands back the preprocessor's output, where GCC-style
//! line markers (`# 42 "file.c"`) re-anchor the logical position. The map
//! records, per physical line of the expanded text, the logical file and
//! line it came from, so AST spans resolve to positions in the original
//! source.

/// Logical position of a byte offset in the expanded source
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SourcePos<'a> {
    pub file: &'a str,
    pub line: u32,
}

pub(crate) struct LineMap<'a> {
    /// (expanded-text start offset, logical file, logical line) per
    /// physical line, ordered by offset
    entries: Vec<(usize, &'a str, u32)>,
}

impl<'a> LineMap<'a> {
    pub(crate) fn build(source: &'a str) -> Self {
        let mut entries = Vec::new();
        let mut file: &'a str = "";
        let mut line: u32 = 1;
        let mut offset = 0usize;

        for physical in source.split_inclusive('\n') {
            if let Some((marker_line, marker_file)) = parse_marker(physical) {
                // The marker names the line of the *next* physical line.
                file = marker_file;
                line = marker_line;
                entries.push((offset, file, 0));
            } else {
                entries.push((offset, file, line));
                line += 1;
            }
            offset += physical.len();
        }

        Self { entries }
    }

    pub(crate) fn position(&self, offset: usize) -> Option<SourcePos<'a>> {
        let index = match self.entries.binary_search_by(|entry| entry.0.cmp(&offset)) {
            Ok(index) => index,
            Err(0) => return None,
            Err(index) => index - 1,
        };
        let (_, file, line) = self.entries[index];
        if line == 0 {
            return None;
        }
        Some(SourcePos { file, line })
    }
}

/// Parse a GCC line marker: `# <line> "<file>" [flags...]`
fn parse_marker(physical: &str) -> Option<(u32, &str)> {
    let rest = physical.strip_prefix('#')?;
    let rest = rest.trim_start_matches(' ');
    let rest = rest.strip_prefix("line").unwrap_or(rest);
    let rest = rest.trim_start_matches(' ');

    let digits_end = rest.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let line: u32 = rest[..digits_end].parse().ok()?;

    let rest = rest[digits_end..].trim_start_matches(' ');
    let rest = rest.strip_prefix('"')?;
    let file_end = rest.find('"')?;
    Some((line, &rest[..file_end]))
}

//! Code formatting utilities for emitted text.

/// A simple indentation-aware code formatter.
#[derive(Debug)]
pub struct CodeFormatter {
    buffer: String,
    indent_str: String,
    level: usize,
    at_line_start: bool,
}

impl CodeFormatter {
    /// Create a formatter with the given indentation string.
    pub fn new(indent_str: &str) -> Self {
        Self {
            buffer: String::new(),
            indent_str: indent_str.to_string(),
            level: 0,
            at_line_start: true,
        }
    }

    /// Write text without a trailing newline.
    pub fn write(&mut self, text: &str) {
        if self.at_line_start && !text.is_empty() {
            for _ in 0..self.level {
                self.buffer.push_str(&self.indent_str);
            }
            self.at_line_start = false;
        }
        self.buffer.push_str(text);
    }

    /// Write a full line.
    pub fn writeln(&mut self, text: &str) {
        self.write(text);
        self.buffer.push('\n');
        self.at_line_start = true;
    }

    /// Write an empty line.
    pub fn blank(&mut self) {
        self.buffer.push('\n');
        self.at_line_start = true;
    }

    /// Append pre-formatted text verbatim, tracking whether it ends mid-line.
    pub fn raw(&mut self, text: &str) {
        self.buffer.push_str(text);
        self.at_line_start = text.is_empty() || text.ends_with('\n');
    }

    /// Increase indentation.
    pub fn indent(&mut self) {
        self.level += 1;
    }

    /// Decrease indentation.
    pub fn dedent(&mut self) {
        if self.level > 0 {
            self.level -= 1;
        }
    }

    /// Consume the formatter and return the text.
    pub fn finish(self) -> String {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indentation() {
        let mut f = CodeFormatter::new("  ");
        f.writeln("for(t1 = 0; t1 <= N-1; t1++) {");
        f.indent();
        f.writeln("s0(t1);");
        f.dedent();
        f.writeln("}");
        assert_eq!(f.finish(), "for(t1 = 0; t1 <= N-1; t1++) {\n  s0(t1);\n}\n");
    }

    #[test]
    fn test_partial_writes() {
        let mut f = CodeFormatter::new("    ");
        f.indent();
        f.write("unsigned ");
        f.write("t1;");
        f.blank();
        assert_eq!(f.finish(), "    unsigned t1;\n");
    }
}

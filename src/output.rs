//! Terminal rendering and the interactive confirmation prompt.

use std::io::Write;

use async_trait::async_trait;
use console::style;
use termimad::MadSkin;

use crate::agent::{ConfirmationGate, OutputSink};
use crate::llm::ToolCall;
use crate::normalized::NormalizedEvent;

/// Renders agent output to a writer.
///
/// In text-only mode deltas are written as they arrive. Otherwise the
/// assistant's text is buffered per segment and rendered as markdown when the
/// segment ends (a tool call, a notice, or the end of the turn).
pub struct TerminalSink<W: Write + Send> {
    out: W,
    text_only: bool,
    skin: MadSkin,
    pending: String,
    finished: bool,
}

impl<W: Write + Send> std::fmt::Debug for TerminalSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalSink")
            .field("text_only", &self.text_only)
            .field("pending_len", &self.pending.len())
            .field("finished", &self.finished)
            .finish()
    }
}

impl TerminalSink<std::io::Stdout> {
    pub fn stdout(text_only: bool) -> Self {
        Self::new(std::io::stdout(), text_only)
    }
}

impl<W: Write + Send> TerminalSink<W> {
    pub fn new(out: W, text_only: bool) -> Self {
        Self {
            out,
            text_only,
            skin: MadSkin::default(),
            pending: String::new(),
            finished: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn flush_markdown(&mut self) {
        if self.pending.trim().is_empty() {
            self.pending.clear();
            return;
        }
        let text = std::mem::take(&mut self.pending);
        let rendered = self.skin.term_text(&text).to_string();
        self.write_line(&rendered);
    }

    fn write_line(&mut self, line: &str) {
        if let Err(e) = writeln!(self.out, "{line}") {
            tracing::debug!(error = %e, "Failed to write output");
        }
    }

    fn tool_call_line(&self, name: &str, arguments: &str) -> String {
        if self.text_only {
            format!("[tool] {name} {arguments}")
        } else {
            format!(
                "{} {}",
                style(format!("▶ {name}")).cyan().bold(),
                style(arguments).dim()
            )
        }
    }

    fn tool_result_line(&self, name: &str, success: bool) -> String {
        match (self.text_only, success) {
            (true, true) => format!("[tool] {name} done"),
            (true, false) => format!("[tool] {name} failed"),
            (false, true) => style(format!("✓ {name}")).green().to_string(),
            (false, false) => style(format!("✗ {name} failed")).red().to_string(),
        }
    }
}

impl<W: Write + Send> OutputSink for TerminalSink<W> {
    fn on_event(&mut self, event: &NormalizedEvent) {
        match event {
            NormalizedEvent::MessageDelta { text } => {
                if self.text_only {
                    let _ = write!(self.out, "{text}");
                    let _ = self.out.flush();
                } else {
                    self.pending.push_str(text);
                }
            }
            NormalizedEvent::ToolCallComplete {
                name,
                arguments_json,
                ..
            } => {
                self.flush_markdown();
                if self.text_only {
                    self.write_line("");
                }
                let line = self.tool_call_line(name, arguments_json);
                self.write_line(&line);
            }
            NormalizedEvent::ToolResult { name, success, .. } => {
                let line = self.tool_result_line(name, *success);
                self.write_line(&line);
            }
            NormalizedEvent::Error { message, .. } => {
                self.flush_markdown();
                self.write_line(&format!("Error: {message}"));
            }
            NormalizedEvent::ToolCallDelta { .. } | NormalizedEvent::Done => {}
        }
    }

    fn notice(&mut self, text: &str) {
        self.flush_markdown();
        let line = if self.text_only {
            text.to_string()
        } else {
            style(text).yellow().to_string()
        };
        self.write_line(&line);
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if self.text_only {
            self.write_line("");
        } else {
            self.flush_markdown();
        }
        let _ = self.out.flush();
    }
}

/// Asks on the terminal before running gated tool calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleConfirmation;

#[async_trait]
impl ConfirmationGate for ConsoleConfirmation {
    async fn confirm(&self, calls: &[ToolCall]) -> bool {
        let summary = calls
            .iter()
            .map(|c| format!("{}({})", c.function.name, c.function.arguments))
            .collect::<Vec<_>>()
            .join(", ");

        let answer = tokio::task::spawn_blocking(move || {
            let term = console::Term::stderr();
            term.write_line(&format!(
                "{} {summary}",
                style("Confirm tool call:").yellow().bold()
            ))?;
            term.write_str("Proceed? [y/N] ")?;
            term.read_line()
        })
        .await;

        match answer {
            Ok(Ok(line)) => matches!(line.trim().to_lowercase().as_str(), "y" | "yes"),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Could not read confirmation, treating as no");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Confirmation prompt task failed");
                false
            }
        }
    }
}

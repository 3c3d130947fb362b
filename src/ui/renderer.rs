//! Terminal renderers for the live progress view.

use std::io::{self, Write};

use anyhow::{Context, Result};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::buffer::Buffer;
use ratatui::layout::{Position, Rect};
use ratatui::widgets::{Paragraph, Wrap};
use ratatui::{Terminal, TerminalOptions, Viewport};

/// Screen rows reserved below the cursor for the live view
const VIEWPORT_ROWS: u16 = 20;

/// Draws the model's view and hands the terminal over to subprocesses
pub trait Renderer {
    /// Whether keys are read and the spinner animates
    fn interactive(&self) -> bool;

    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn draw(&mut self, view: &str) -> Result<()>;

    /// Release the terminal for an interactive subprocess
    fn suspend(&mut self) -> Result<()> {
        Ok(())
    }

    /// Take the terminal back after a subprocess exited
    fn resume(&mut self) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Render `view` into the viewport, wrapping long lines.
///
/// Returns the viewport area and how many of its rows hold content.
fn draw_view<B: Backend>(terminal: &mut Terminal<B>, view: &str) -> io::Result<(Rect, u16)> {
    let frame = terminal.draw(|frame| {
        let area = frame.area();
        frame.render_widget(Paragraph::new(view).wrap(Wrap { trim: false }), area);
    })?;
    Ok((frame.area, used_rows(frame.buffer)))
}

/// Rows up to and including the last one with a visible cell
fn used_rows(buffer: &Buffer) -> u16 {
    let width = usize::from(buffer.area.width.max(1));
    buffer
        .content
        .chunks(width)
        .rposition(|row| row.iter().any(|cell| cell.symbol() != " "))
        .map_or(0, |last| last as u16 + 1)
}

/// Redraws the view in an inline viewport below the cursor, in raw mode
pub struct InlineRenderer {
    terminal: Option<Terminal<CrosstermBackend<io::Stdout>>>,
    /// Viewport area and content rows of the last frame
    last: Option<(Rect, u16)>,
    raw: bool,
}

impl Default for InlineRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl InlineRenderer {
    pub fn new() -> Self {
        Self {
            terminal: None,
            last: None,
            raw: false,
        }
    }

    fn enter(&mut self) -> Result<()> {
        enable_raw_mode().context("enable raw mode")?;
        self.raw = true;

        let backend = CrosstermBackend::new(io::stdout());
        let terminal = Terminal::with_options(
            backend,
            TerminalOptions {
                viewport: Viewport::Inline(VIEWPORT_ROWS),
            },
        )
        .context("create terminal")?;
        self.terminal = Some(terminal);
        self.last = None;
        Ok(())
    }

    /// Park the cursor below the last frame and leave raw mode
    fn leave(&mut self) -> Result<()> {
        if let Some(mut terminal) = self.terminal.take() {
            match self.last.take() {
                Some((area, rows)) if rows > 0 => {
                    terminal
                        .set_cursor_position(Position::new(0, area.y + rows - 1))
                        .context("move cursor")?;
                    let backend = terminal.backend_mut();
                    backend.write_all(b"\r\n").context("write terminal")?;
                    Write::flush(backend).context("flush terminal")?;
                }
                Some((area, _)) => {
                    terminal
                        .set_cursor_position(Position::new(0, area.y))
                        .context("move cursor")?;
                }
                None => {}
            }
            terminal.show_cursor().context("show cursor")?;
        }
        if self.raw {
            disable_raw_mode().context("disable raw mode")?;
            self.raw = false;
        }
        Ok(())
    }
}

impl Renderer for InlineRenderer {
    fn interactive(&self) -> bool {
        true
    }

    fn start(&mut self) -> Result<()> {
        self.enter()
    }

    fn draw(&mut self, view: &str) -> Result<()> {
        let Some(terminal) = self.terminal.as_mut() else {
            return Ok(());
        };
        self.last = Some(draw_view(terminal, view).context("draw view")?);
        Ok(())
    }

    fn suspend(&mut self) -> Result<()> {
        // the last frame stays on screen above the subprocess output
        self.leave()
    }

    fn resume(&mut self) -> Result<()> {
        // a fresh viewport starts below whatever the subprocess printed
        self.enter()
    }

    fn finish(&mut self) -> Result<()> {
        self.leave()
    }
}

impl Drop for InlineRenderer {
    fn drop(&mut self) {
        if let Some(terminal) = self.terminal.as_mut() {
            let _ = terminal.show_cursor();
        }
        if self.raw {
            let _ = disable_raw_mode();
        }
    }
}

/// Prints each line of the view once it changes; for pipes and CI logs
pub struct PlainRenderer<W: Write> {
    out: W,
    last: Vec<String>,
}

impl PlainRenderer<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> PlainRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            last: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Renderer for PlainRenderer<W> {
    fn interactive(&self) -> bool {
        false
    }

    fn draw(&mut self, view: &str) -> Result<()> {
        let lines: Vec<String> = view.lines().map(str::to_string).collect();
        for (idx, line) in lines.iter().enumerate() {
            if line.trim().is_empty() || self.last.get(idx) == Some(line) {
                continue;
            }
            writeln!(self.out, "{}", line)?;
        }
        self.out.flush()?;
        self.last = lines;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;

    fn inline_terminal(width: u16, height: u16, rows: u16) -> Terminal<TestBackend> {
        Terminal::with_options(
            TestBackend::new(width, height),
            TerminalOptions {
                viewport: Viewport::Inline(rows),
            },
        )
        .unwrap()
    }

    fn screen_row(terminal: &Terminal<TestBackend>, y: u16) -> String {
        let buffer = terminal.backend().buffer();
        (0..buffer.area.width)
            .map(|x| buffer[(x, y)].symbol().to_string())
            .collect::<String>()
            .trim_end()
            .to_string()
    }

    #[test]
    fn test_long_lines_wrap_within_viewport() {
        let mut terminal = inline_terminal(20, 10, 6);
        let header = "h".repeat(40);

        let (area, rows) = draw_view(&mut terminal, &format!("{}\nrow", header)).unwrap();
        assert_eq!(area.width, 20);
        // a 40 column line takes two screen rows
        assert_eq!(rows, 3);
        assert_eq!(screen_row(&terminal, area.y + 2), "row");
    }

    #[test]
    fn test_shorter_frame_clears_wrapped_rows() {
        let mut terminal = inline_terminal(20, 10, 6);
        draw_view(&mut terminal, &"y".repeat(50)).unwrap();

        let (area, rows) = draw_view(&mut terminal, "done").unwrap();
        assert_eq!(rows, 1);
        assert_eq!(screen_row(&terminal, area.y), "done");
        assert_eq!(screen_row(&terminal, area.y + 1), "");
        assert_eq!(screen_row(&terminal, area.y + 2), "");
    }

    #[test]
    fn test_redraw_after_resize_rewraps() {
        let mut terminal = inline_terminal(40, 10, 6);
        let line = "z".repeat(30);
        let (_, rows) = draw_view(&mut terminal, &line).unwrap();
        assert_eq!(rows, 1);

        terminal.backend_mut().resize(15, 10);
        let (area, rows) = draw_view(&mut terminal, &line).unwrap();
        assert_eq!(area.width, 15);
        assert_eq!(rows, 2);
    }

    fn output(renderer: PlainRenderer<Vec<u8>>) -> String {
        String::from_utf8(renderer.into_inner()).unwrap()
    }

    #[test]
    fn test_plain_prints_changed_lines_only() {
        let mut renderer = PlainRenderer::new(Vec::new());
        renderer.draw("⏳ Plan\n⏳ Submit").unwrap();
        renderer.draw("✅ Plan\n⏳ Submit").unwrap();
        renderer.draw("✅ Plan\n⏳ Submit").unwrap();

        assert_eq!(output(renderer), "⏳ Plan\n⏳ Submit\n✅ Plan\n");
    }

    #[test]
    fn test_plain_skips_blank_lines() {
        let mut renderer = PlainRenderer::new(Vec::new());
        renderer.draw("a\n\nb").unwrap();
        assert_eq!(output(renderer), "a\nb\n");
    }
}

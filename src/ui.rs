use std::io::{self, Stdout};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Clear, Gauge, List, ListItem, ListState, Paragraph, Wrap},
};
use tracing::debug;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::config::{HexColor, Theme};
use crate::resolver::is_present;
use crate::scanner::{ImportJob, ScanEvent, spawn_import};
use crate::session::{InputIntent, Session};

const LOG_EXPORT_NAME: &str = "imgsort-activity.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PromptKind {
    Filter,
    ExportLog,
}

#[derive(Debug, Clone)]
struct Prompt {
    kind: PromptKind,
    input: String,
}

pub struct TuiApp {
    session: Session,
    list_state: ListState,
    import: Option<ImportJob>,
    progress: Option<(usize, usize)>,
    recursive: bool,
    prompt: Option<Prompt>,
    confirm_reset: bool,
}

impl TuiApp {
    pub fn new(session: Session, recursive: bool) -> Self {
        Self {
            session,
            list_state: ListState::default(),
            import: None,
            progress: None,
            recursive,
            prompt: None,
            confirm_reset: false,
        }
    }

    /// Loads `folder`, from this run's cache when possible, otherwise on
    /// a background worker.
    pub fn start_import(&mut self, folder: PathBuf) {
        if let Some(done) = self.session.import_cached(&folder) {
            self.session.status_message = Some(done.notice(format!("Loaded {} images (cached).", done.value)));
            return;
        }
        debug!(folder = %folder.display(), recursive = self.recursive, "starting import");
        self.session.status_message = Some((format!("Scanning {}...", folder.display()), false));
        self.progress = Some((0, 0));
        self.import = Some(spawn_import(folder, self.recursive));
    }

    pub fn run(&mut self) -> io::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;

        let res = self.run_loop(&mut stdout);

        disable_raw_mode()?;
        execute!(stdout, LeaveAlternateScreen)?;
        res
    }

    fn run_loop(&mut self, terminal: &mut Stdout) -> io::Result<()> {
        let mut tui = Terminal::new(CrosstermBackend::new(terminal))?;

        while !self.session.exit_requested {
            self.poll_import();
            self.list_state.select(self.session.cursor().index());
            tui.draw(|frame| self.render(frame))?;

            if event::poll(Duration::from_millis(100))?
                && let Event::Key(key) = event::read()?
                && key.kind == KeyEventKind::Press
            {
                self.handle_key(key.code);
            }
        }
        Ok(())
    }

    fn poll_import(&mut self) {
        let Some(job) = self.import.as_mut() else {
            return;
        };
        let mut finished = false;
        while let Some(event) = job.poll() {
            match event {
                ScanEvent::Progress { done, total } => self.progress = Some((done, total)),
                ScanEvent::Finished(result) => {
                    let done = self.session.finish_import(result);
                    let msg = if done.value == 0 { "No images found.".to_string() } else { format!("Loaded {} images.", done.value) };
                    self.session.status_message = Some(done.notice(msg));
                    finished = true;
                    break;
                }
                ScanEvent::Failed(msg) => {
                    self.session.status_message = Some((format!("Import failed: {}", msg), true));
                    finished = true;
                    break;
                }
            }
        }
        if finished {
            self.import = None;
            self.progress = None;
        }
    }

    fn handle_key(&mut self, key: KeyCode) {
        if let Some(prompt) = self.prompt.as_mut() {
            match key {
                KeyCode::Enter => {
                    if let Some(prompt) = self.prompt.take() {
                        self.submit_prompt(prompt);
                    }
                }
                KeyCode::Esc => self.prompt = None,
                KeyCode::Backspace => {
                    prompt.input.pop();
                }
                KeyCode::Char(c) => prompt.input.push(c),
                _ => {}
            }
            return;
        }

        if self.confirm_reset {
            match key {
                KeyCode::Char('y') | KeyCode::Char('Y') => {
                    self.confirm_reset = false;
                    self.session.handle_input(InputIntent::Reset);
                }
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => self.confirm_reset = false,
                _ => {}
            }
            return;
        }

        // Actions that would race the pending handback are held back.
        let importing = self.import.is_some();

        let intent = match key {
            KeyCode::Char('q') => Some(InputIntent::Quit),
            KeyCode::Esc => Some(InputIntent::Cancel),
            KeyCode::Right | KeyCode::Down | KeyCode::Char('n') => Some(InputIntent::Next),
            KeyCode::Left | KeyCode::Up | KeyCode::Char('p') => Some(InputIntent::Prev),
            KeyCode::Char('s') => Some(InputIntent::Skip),
            KeyCode::Char(c @ '1'..='5') => c.to_digit(10).map(|d| InputIntent::MoveTo(d as usize)),
            KeyCode::Char('u') => Some(InputIntent::Undo),
            KeyCode::Char('f') => Some(InputIntent::CycleFilter),
            KeyCode::Char('t') => Some(InputIntent::CycleTheme),
            KeyCode::Char('F') => {
                self.prompt = Some(Prompt { kind: PromptKind::Filter, input: String::new() });
                None
            }
            KeyCode::Char('L') => {
                let default = self
                    .session
                    .source_folder()
                    .map(|f| f.join(LOG_EXPORT_NAME))
                    .unwrap_or_else(|| PathBuf::from(LOG_EXPORT_NAME));
                self.prompt = Some(Prompt { kind: PromptKind::ExportLog, input: default.display().to_string() });
                None
            }
            KeyCode::Char('r') => {
                if !importing && let Some(folder) = self.session.source_folder().map(Path::to_path_buf) {
                    self.progress = Some((0, 0));
                    self.import = Some(spawn_import(folder, self.recursive));
                }
                None
            }
            KeyCode::Char('R') => {
                self.confirm_reset = !importing;
                None
            }
            _ => None,
        };

        if let Some(intent) = intent {
            if importing && !matches!(intent, InputIntent::Quit | InputIntent::Cancel) {
                self.session.status_message = Some(("Still scanning, please wait.".to_string(), false));
                return;
            }
            self.session.handle_input(intent);
        }
    }

    fn submit_prompt(&mut self, prompt: Prompt) {
        let input = prompt.input.trim().to_string();
        match prompt.kind {
            PromptKind::Filter => self.session.handle_input(InputIntent::SetFilter(input)),
            PromptKind::ExportLog if !input.is_empty() => {
                self.session.handle_input(InputIntent::ExportLog(PathBuf::from(input)));
            }
            PromptKind::ExportLog => {}
        }
    }

    fn render(&mut self, frame: &mut Frame) {
        let area = frame.area();
        let theme = self.session.settings.theme();
        let base = Style::default().fg(rgb(theme.text_color)).bg(rgb(theme.bg_color));
        frame.render_widget(Block::default().style(base), area);

        let main_layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints(vec![
                Constraint::Length(1), // Header
                Constraint::Min(0),
                Constraint::Length(if self.progress.is_some() { 1 } else { 0 }),
                Constraint::Length(1), // Status Bar
            ])
            .split(area);

        self.render_header(frame, main_layout[0], &theme);

        let body = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(vec![Constraint::Percentage(45), Constraint::Percentage(55)])
            .split(main_layout[1]);
        self.render_list(frame, body[0], &theme, base);

        let side = Layout::default()
            .direction(Direction::Vertical)
            .constraints(vec![Constraint::Min(8), Constraint::Length(7)])
            .split(body[1]);
        self.render_details(frame, side[0], &theme, base);
        self.render_slots(frame, side[1], &theme);

        if let Some((done, total)) = self.progress {
            let ratio = if total == 0 { 0.0 } else { done as f64 / total as f64 };
            let folder = self
                .import
                .as_ref()
                .and_then(|job| job.folder().file_name())
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let gauge = Gauge::default()
                .gauge_style(Style::default().fg(rgb(theme.main_border_color)).bg(rgb(theme.btn_bg)))
                .ratio(ratio.clamp(0.0, 1.0))
                .label(format!("Validating {} {}/{}", folder, done, total));
            frame.render_widget(gauge, main_layout[2]);
        }

        self.render_status(frame, main_layout[3], &theme);

        // --- Popups ---
        if let Some(prompt) = &self.prompt {
            let title = match prompt.kind {
                PromptKind::Filter => "Filter (extension, or 'all')",
                PromptKind::ExportLog => "Export activity log to",
            };
            let block = Block::default()
                .title(title)
                .borders(Borders::ALL)
                .style(Style::default().bg(rgb(theme.menu_bg)).fg(rgb(theme.menu_text)));
            let paragraph = Paragraph::new(format!("{}_", prompt.input)).block(block).wrap(Wrap { trim: false });
            let area = centered_rect(60, 20, area);
            frame.render_widget(Clear, area);
            frame.render_widget(paragraph, area);
        }

        if self.confirm_reset {
            let block = Block::default()
                .title("Confirmation")
                .borders(Borders::ALL)
                .style(Style::default().bg(rgb(theme.menu_bg)).fg(rgb(theme.menu_text)));
            let text = "Reset settings and clear the move history?\n\n(y) Yes / (n) No";
            let paragraph = Paragraph::new(text).block(block).alignment(Alignment::Center);
            let area = centered_rect(60, 20, area);
            frame.render_widget(Clear, area);
            frame.render_widget(paragraph, area);
        }
    }

    fn render_header(&self, frame: &mut Frame, area: Rect, theme: &Theme) {
        let folder = self
            .session
            .source_folder()
            .map(|f| f.display().to_string())
            .unwrap_or_else(|| "no folder loaded".to_string());
        let text = format!(" imgsort | {} | Filter: {}", folder, self.session.view().filter());
        let header = Paragraph::new(truncate_to_width(&text, area.width as usize))
            .style(Style::default().bg(rgb(theme.label_bg)).fg(rgb(theme.text_color)).add_modifier(Modifier::BOLD));
        frame.render_widget(header, area);
    }

    fn render_list(&mut self, frame: &mut Frame, area: Rect, theme: &Theme, base: Style) {
        let width = area.width.saturating_sub(5) as usize;
        let session = &self.session;
        let items: Vec<ListItem> = session
            .view()
            .entries()
            .iter()
            .map(|original| {
                let name = original.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
                let moved = session.ledger().resolve(original).and_then(Path::parent);
                let (text, style) = match moved {
                    Some(folder) => (
                        format!("{} -> {}", name, session.folder_label(folder)),
                        Style::default().fg(rgb(theme.next_border_color)),
                    ),
                    None if !is_present(session.fs(), session.ledger(), original) => {
                        (name, Style::default().add_modifier(Modifier::DIM | Modifier::CROSSED_OUT))
                    }
                    None => (name, Style::default()),
                };
                ListItem::new(Line::from(Span::styled(truncate_to_width(&text, width), style)))
            })
            .collect();

        let title = format!("Images ({})", session.view().len());
        let list = List::new(items)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(title)
                    .border_style(Style::default().fg(rgb(theme.main_border_color))),
            )
            .style(base)
            .highlight_style(Style::default().bg(rgb(theme.btn_hover)).add_modifier(Modifier::BOLD))
            .highlight_symbol(">> ");

        frame.render_stateful_widget(list, area, &mut self.list_state);
    }

    fn render_details(&self, frame: &mut Frame, area: Rect, theme: &Theme, base: Style) {
        let width = area.width.saturating_sub(2) as usize;
        let mut lines = Vec::new();

        match self.session.display_info() {
            Some(info) => {
                let name = info.path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
                lines.push(Line::from(Span::styled(
                    truncate_to_width(&name, width),
                    Style::default().add_modifier(Modifier::BOLD),
                )));
                lines.push(Line::from(truncate_to_width(&info.path.display().to_string(), width)));
                lines.push(Line::from(format!("{} / {}", info.position, info.total)));
                if let Some(label) = info.moved_to {
                    lines.push(Line::from(Span::styled(
                        format!("Moved to {}", label),
                        Style::default().fg(rgb(theme.next_border_color)),
                    )));
                }
                lines.push(Line::from(""));
                let next = info
                    .next
                    .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
                    .unwrap_or_else(|| "(end of list)".to_string());
                lines.push(Line::from(vec![
                    Span::styled("Next: ", Style::default().fg(rgb(theme.next_border_color))),
                    Span::raw(truncate_to_width(&next, width.saturating_sub(6))),
                ]));
            }
            None if self.import.is_some() => lines.push(Line::from("Scanning...")),
            None if self.session.view().is_empty() => lines.push(Line::from("No images to show.")),
            None => lines.push(Line::from("No image selected.")),
        }

        if let Some(last) = self.session.activity().last() {
            lines.push(Line::from(""));
            lines.push(Line::from(Span::styled(
                truncate_to_width(last, width),
                Style::default().add_modifier(Modifier::DIM),
            )));
        }

        let details = Paragraph::new(lines).style(base).block(
            Block::default()
                .borders(Borders::ALL)
                .title("Current")
                .border_style(Style::default().fg(rgb(theme.main_border_color))),
        );
        frame.render_widget(details, area);
    }

    fn render_slots(&self, frame: &mut Frame, area: Rect, theme: &Theme) {
        let width = area.width.saturating_sub(2) as usize;
        let lines: Vec<Line> = self
            .session
            .settings
            .folders
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                let style = if slot.is_placeholder() {
                    Style::default().add_modifier(Modifier::DIM)
                } else {
                    Style::default()
                };
                let text = format!("[{}] {}  {}", i + 1, slot.name, slot.path.display());
                Line::from(Span::styled(truncate_to_width(&text, width), style))
            })
            .collect();

        let slots = Paragraph::new(lines)
            .style(Style::default().bg(rgb(theme.btn_bg)).fg(rgb(theme.text_color)))
            .block(Block::default().borders(Borders::ALL).title("Move to"));
        frame.render_widget(slots, area);
    }

    fn render_status(&self, frame: &mut Frame, area: Rect, theme: &Theme) {
        let bar = Style::default().bg(rgb(theme.menu_bg));
        let status_widget = if let Some((msg, is_error)) = &self.session.status_message {
            let color = if *is_error { Color::Red } else { rgb(theme.next_border_color) };
            Paragraph::new(Span::styled(truncate_to_width(msg, area.width as usize), Style::default().fg(color)))
        } else {
            let help = "[n/p]: Next/Prev | [1-5]: Move | [u]: Undo | [s]: Skip | [f/F]: Filter | [t]: Theme | [L]: Export log | [q]: Quit";
            Paragraph::new(Span::styled(
                truncate_to_width(help, area.width as usize),
                Style::default().fg(rgb(theme.menu_text)),
            ))
        };
        frame.render_widget(status_widget.style(bar), area);
    }
}

fn rgb(c: HexColor) -> Color {
    Color::Rgb(c.r, c.g, c.b)
}

/// Cuts `s` to at most `max` terminal columns, marking the cut with `…`.
fn truncate_to_width(s: &str, max: usize) -> String {
    if s.width() <= max {
        return s.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let mut out = String::new();
    let mut used = 0;
    for c in s.chars() {
        let w = c.width().unwrap_or(0);
        if used + w > max - 1 {
            break;
        }
        used += w;
        out.push(c);
    }
    out.push('…');
    out
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints(vec![
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints(vec![
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

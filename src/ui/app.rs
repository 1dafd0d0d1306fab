use anyhow::Result;
use crossterm::event::KeyCode;
use open::that as open_link;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::prelude::*;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::Frame;

use crate::models::{CollectionEntry, OutputRow, Source};

/// Footer space reserved for status messages and instructions.
const FOOTER_HEIGHT: u16 = 3;
/// Rows skipped by PageUp/PageDown.
const PAGE_STEP: isize = 10;

/// One selectable line in the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickerEntry {
    /// Text shown in the list.
    pub label: String,
    /// Printed when the entry is chosen.
    pub value: String,
    /// Attachment opened with `o`; empty when there is none.
    pub file: String,
}

impl From<&OutputRow> for PickerEntry {
    fn from(row: &OutputRow) -> Self {
        Self {
            label: row.description.clone(),
            value: row.field.clone(),
            file: row.file.clone(),
        }
    }
}

impl From<&CollectionEntry> for PickerEntry {
    fn from(entry: &CollectionEntry) -> Self {
        Self {
            label: entry.label.clone(),
            value: entry.value.clone(),
            file: String::new(),
        }
    }
}

/// Holds the footer message text plus its severity.
struct StatusMessage {
    text: String,
    kind: StatusKind,
}

/// Severity levels shown in the footer.
enum StatusKind {
    Info,
    Error,
}

impl StatusKind {
    fn style(&self) -> Style {
        match self {
            StatusKind::Info => Style::default().fg(Color::Green),
            StatusKind::Error => Style::default().fg(Color::Red),
        }
    }
}

/// Browser state shared between the event loop and the renderer.
pub struct Browser {
    title: String,
    entries: Vec<PickerEntry>,
    selected: usize,
    status: Option<StatusMessage>,
    chosen: Option<String>,
}

impl Browser {
    /// Start with the first entry selected and no status message.
    pub fn new(title: impl Into<String>, entries: Vec<PickerEntry>) -> Self {
        Self {
            title: title.into(),
            entries,
            selected: 0,
            status: None,
            chosen: None,
        }
    }

    /// Browse the rows of a finished build, citations or collections alike.
    pub fn from_source(title: impl Into<String>, source: &Source) -> Self {
        let entries = match source {
            Source::Citations(rows) => rows.iter().map(PickerEntry::from).collect(),
            Source::Collections(entries) => entries.iter().map(PickerEntry::from).collect(),
        };
        Self::new(title, entries)
    }

    /// Value of the entry confirmed with Enter, if any.
    pub fn chosen(&self) -> Option<&str> {
        self.chosen.as_deref()
    }

    /// Entry under the cursor; `None` only when there are no entries.
    pub fn current(&self) -> Option<&PickerEntry> {
        self.entries.get(self.selected)
    }

    /// Apply one key press. Returns `true` when the browser should close.
    pub fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(true),
            KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
            KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),
            KeyCode::PageUp => self.move_selection(-PAGE_STEP),
            KeyCode::PageDown => self.move_selection(PAGE_STEP),
            KeyCode::Home => self.selected = 0,
            KeyCode::End => self.selected = self.entries.len().saturating_sub(1),
            KeyCode::Enter => {
                if let Some(entry) = self.current() {
                    self.chosen = Some(entry.value.clone());
                    return Ok(true);
                }
                self.set_status("Nothing to select.", StatusKind::Error);
            }
            KeyCode::Char('o') | KeyCode::Char('O') => self.open_current(),
            _ => {}
        }
        Ok(false)
    }

    fn open_current(&mut self) {
        let Some(entry) = self.current() else {
            self.set_status("Nothing to open.", StatusKind::Error);
            return;
        };
        let file = entry.file.trim().to_string();
        if file.is_empty() {
            self.set_status("This entry has no attachment.", StatusKind::Error);
        } else if let Err(err) = open_link(&file) {
            self.set_status(format!("Failed to open attachment: {err}"), StatusKind::Error);
        } else {
            self.set_status(format!("Opened {file}."), StatusKind::Info);
        }
    }

    fn move_selection(&mut self, offset: isize) {
        if self.entries.is_empty() {
            return;
        }
        let last = self.entries.len() as isize - 1;
        self.selected = (self.selected as isize + offset).clamp(0, last) as usize;
    }

    fn set_status(&mut self, text: impl Into<String>, kind: StatusKind) {
        self.status = Some(StatusMessage {
            text: text.into(),
            kind,
        });
    }

    /// Render the list and the footer into the whole frame. Kept free of
    /// terminal I/O so tests can draw into a `TestBackend`.
    pub fn draw(&self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(FOOTER_HEIGHT)])
            .split(frame.area());
        self.draw_list(frame, chunks[0]);
        self.draw_footer(frame, chunks[1]);
    }

    fn draw_list(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default()
            .title(format!("{} ({})", self.title, self.entries.len()))
            .borders(Borders::ALL);

        if self.entries.is_empty() {
            let paragraph = Paragraph::new("No entries.").block(block);
            frame.render_widget(paragraph, area);
            return;
        }

        let items: Vec<ListItem> = self
            .entries
            .iter()
            .map(|entry| ListItem::new(entry.label.clone()))
            .collect();
        let list = List::new(items)
            .block(block)
            .highlight_style(Style::default().fg(Color::Yellow))
            .highlight_symbol("▶ ");

        let mut list_state = ListState::default();
        list_state.select(Some(self.selected));
        frame.render_stateful_widget(list, area, &mut list_state);
    }

    fn draw_footer(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default().borders(Borders::TOP);
        frame.render_widget(block.clone(), area);
        let inner = block.inner(area);

        let status_line = if let Some(status) = &self.status {
            Line::from(vec![Span::styled(status.text.clone(), status.kind.style())])
        } else {
            Line::from("")
        };

        let key_style = Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD);
        let instructions = Line::from(vec![
            Span::styled("[↑↓]", key_style),
            Span::raw(" Navigate   "),
            Span::styled("[Enter]", key_style),
            Span::raw(" Select   "),
            Span::styled("[o]", key_style),
            Span::raw(" Open attachment   "),
            Span::styled("[q]", key_style),
            Span::raw(" Quit"),
        ]);

        let paragraph = Paragraph::new(vec![status_line, instructions]).wrap(Wrap { trim: true });
        frame.render_widget(paragraph, inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;

    fn browser(count: usize) -> Browser {
        let entries = (0..count)
            .map(|i| PickerEntry {
                label: format!("entry {i}"),
                value: format!("key{i}"),
                file: String::new(),
            })
            .collect();
        Browser::new("Citations", entries)
    }

    #[test]
    fn test_navigation_clamps_to_bounds() {
        let mut browser = browser(3);
        browser.handle_key(KeyCode::Up).unwrap();
        assert_eq!(browser.current().unwrap().value, "key0");
        browser.handle_key(KeyCode::PageDown).unwrap();
        assert_eq!(browser.current().unwrap().value, "key2");
        browser.handle_key(KeyCode::Char('k')).unwrap();
        assert_eq!(browser.current().unwrap().value, "key1");
        browser.handle_key(KeyCode::Home).unwrap();
        assert_eq!(browser.current().unwrap().value, "key0");
        browser.handle_key(KeyCode::End).unwrap();
        assert_eq!(browser.current().unwrap().value, "key2");
    }

    #[test]
    fn test_enter_chooses_current_value() {
        let mut browser = browser(2);
        browser.handle_key(KeyCode::Down).unwrap();
        assert!(browser.handle_key(KeyCode::Enter).unwrap());
        assert_eq!(browser.chosen(), Some("key1"));
    }

    #[test]
    fn test_quit_without_choice() {
        let mut browser = browser(2);
        assert!(browser.handle_key(KeyCode::Char('q')).unwrap());
        assert_eq!(browser.chosen(), None);
    }

    #[test]
    fn test_enter_on_empty_list_keeps_running() {
        let mut browser = browser(0);
        assert!(!browser.handle_key(KeyCode::Enter).unwrap());
        assert_eq!(browser.chosen(), None);
    }

    #[test]
    fn test_open_without_attachment_reports_error() {
        let mut browser = browser(1);
        assert!(!browser.handle_key(KeyCode::Char('o')).unwrap());
        let status = browser.status.as_ref().unwrap();
        assert_eq!(status.text, "This entry has no attachment.");
        assert!(matches!(status.kind, StatusKind::Error));
    }

    #[test]
    fn test_from_source_maps_rows() {
        let source = Source::Citations(vec![OutputRow {
            field: "Smith2020".to_string(),
            description: "article [Smith2020]".to_string(),
            file: "/papers/x.pdf".to_string(),
            combined: String::new(),
        }]);
        let browser = Browser::from_source("Citations", &source);
        assert_eq!(
            browser.current(),
            Some(&PickerEntry {
                label: "article [Smith2020]".to_string(),
                value: "Smith2020".to_string(),
                file: "/papers/x.pdf".to_string(),
            })
        );
    }

    #[test]
    fn test_draw_renders_labels() {
        let browser = browser(2);
        let mut terminal = Terminal::new(TestBackend::new(40, 10)).unwrap();
        terminal.draw(|frame| browser.draw(frame)).unwrap();

        let buffer = terminal.backend().buffer();
        let text: String = buffer.content().iter().map(|cell| cell.symbol()).collect();
        assert!(text.contains("Citations (2)"));
        assert!(text.contains("entry 1"));
    }
}

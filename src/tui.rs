use std::io;
use std::time::Duration;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use tokio::sync::watch;
use crate::{format_timestamp, BackupSnapshot, EngineHandle, SubmitError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pane {
    Files,
    Backups,
}

pub struct TuiApp {
    pub handle: EngineHandle,
    snapshots: watch::Receiver<BackupSnapshot>,
    pub snapshot: BackupSnapshot,
    pub file_state: ListState,
    pub backup_state: ListState,
    pub focus: Pane,
    pub show_help: bool,
    pub should_quit: bool,
    pub status: Option<(String, bool)>,
}

impl TuiApp {
    pub fn new(handle: EngineHandle) -> Self {
        let snapshots = handle.snapshots();
        Self {
            handle,
            snapshots,
            snapshot: BackupSnapshot::default(),
            file_state: ListState::default(),
            backup_state: ListState::default(),
            focus: Pane::Files,
            show_help: false,
            should_quit: false,
            status: None,
        }
    }

    pub fn run<B: Backend>(mut self, terminal: &mut Terminal<B>) -> io::Result<()> {
        loop {
            if self.snapshots.has_changed().unwrap_or(false) {
                let snapshot = self.snapshots.borrow_and_update().clone();
                self.apply_snapshot(snapshot);
            }

            terminal.draw(|f| self.ui(f))?;

            if event::poll(Duration::from_millis(100))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key_event(key);
                    }
                }
            }

            if self.should_quit {
                break;
            }
        }

        self.handle.request_termination();
        Ok(())
    }

    /// Raw mode delivers Ctrl+C as a key press rather than a signal.
    pub fn handle_key_event(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }
        self.handle_key(key.code);
    }

    pub fn handle_key(&mut self, code: KeyCode) {
        if self.show_help {
            self.show_help = false;
            return;
        }
        match code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('h') | KeyCode::F(1) => self.show_help = true,
            KeyCode::Tab | KeyCode::Left | KeyCode::Right => {
                self.focus = match self.focus {
                    Pane::Files => Pane::Backups,
                    Pane::Backups => Pane::Files,
                };
            }
            KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
            KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),
            KeyCode::Home => self.move_selection(isize::MIN),
            KeyCode::End => self.move_selection(isize::MAX),
            KeyCode::Enter | KeyCode::Char('r') => self.restore_selected(),
            _ => {}
        }
    }

    /// Swap in a new snapshot, keeping the selected file by name.
    pub fn apply_snapshot(&mut self, snapshot: BackupSnapshot) {
        let selected_name = self.selected_file();
        let selected_backup = self.selected_backup();

        if let Some(outcome) = &snapshot.last_outcome {
            if snapshot.last_outcome != self.snapshot.last_outcome {
                self.status = Some((outcome.describe(), outcome.is_failure()));
            }
        }
        self.snapshot = snapshot;

        let file_index = selected_name
            .and_then(|name| self.snapshot.files.keys().position(|key| *key == name))
            .or(if self.snapshot.files.is_empty() { None } else { Some(0) });
        self.file_state.select(file_index);

        let backups = self.backups_newest_first();
        let backup_index = selected_backup
            .and_then(|ts| backups.iter().position(|b| *b == ts))
            .or(if backups.is_empty() { None } else { Some(0) });
        self.backup_state.select(backup_index);
    }

    pub fn selected_file(&self) -> Option<String> {
        self.file_state
            .selected()
            .and_then(|index| self.snapshot.files.keys().nth(index).cloned())
    }

    pub fn selected_backup(&self) -> Option<u64> {
        let backups = self.backups_newest_first();
        self.backup_state
            .selected()
            .and_then(|index| backups.get(index).copied())
    }

    fn backups_newest_first(&self) -> Vec<u64> {
        let mut backups = self
            .selected_file()
            .map(|name| self.snapshot.timestamps(&name).to_vec())
            .unwrap_or_default();
        backups.reverse();
        backups
    }

    fn move_selection(&mut self, delta: isize) {
        let (len, state) = match self.focus {
            Pane::Files => (self.snapshot.files.len(), &mut self.file_state),
            Pane::Backups => {
                let len = self.backups_newest_first().len();
                (len, &mut self.backup_state)
            }
        };
        if len == 0 {
            state.select(None);
            return;
        }
        let current = state.selected().unwrap_or(0) as isize;
        let next = current.saturating_add(delta).clamp(0, len as isize - 1);
        state.select(Some(next as usize));

        if self.focus == Pane::Files {
            let has_backups = !self.backups_newest_first().is_empty();
            self.backup_state.select(if has_backups { Some(0) } else { None });
        }
    }

    fn restore_selected(&mut self) {
        let (Some(file), Some(timestamp)) = (self.selected_file(), self.selected_backup()) else {
            self.status = Some(("Select a file and a backup first".to_string(), true));
            return;
        };

        tracing::info!("Sending restore request: {} -> {}", file, format_timestamp(timestamp));
        self.status = Some(match self.handle.request_restore(file.clone(), timestamp) {
            Ok(()) => (
                format!("Restore of '{}' to {} requested", file, format_timestamp(timestamp)),
                false,
            ),
            Err(SubmitError::Busy) => ("A restore is already pending, try again".to_string(), true),
            Err(SubmitError::Closed) => ("Backup engine is not running".to_string(), true),
        });
    }

    fn ui(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([Constraint::Min(5), Constraint::Length(3)])
            .split(f.area());

        let panes = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
            .split(chunks[0]);

        self.render_files(f, panes[0]);
        self.render_backups(f, panes[1]);
        self.render_status(f, chunks[1]);

        if self.show_help {
            self.render_help(f);
        }
    }

    fn pane_block(&self, pane: Pane, title: String) -> Block<'static> {
        let border = if self.focus == pane {
            Color::Cyan
        } else {
            Color::Rgb(80, 80, 80)
        };
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(border))
            .title(title)
            .title_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
    }

    fn render_files(&mut self, f: &mut Frame, area: Rect) {
        let items: Vec<ListItem> = self
            .snapshot
            .files
            .iter()
            .map(|(name, backups)| {
                ListItem::new(Line::from(vec![
                    Span::styled(name.clone(), Style::default().fg(Color::White)),
                    Span::styled(
                        format!("  ({})", backups.len()),
                        Style::default().fg(Color::DarkGray),
                    ),
                ]))
            })
            .collect();

        let list = List::new(items)
            .block(self.pane_block(Pane::Files, " Watched files ".to_string()))
            .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
            .highlight_symbol("▶ ");
        f.render_stateful_widget(list, area, &mut self.file_state);
    }

    fn render_backups(&mut self, f: &mut Frame, area: Rect) {
        let backups = self.backups_newest_first();
        let title = match self.selected_file() {
            Some(name) => format!(" Backups of {} (Enter to restore) ", name),
            None => " Backups ".to_string(),
        };

        let items: Vec<ListItem> = if backups.is_empty() {
            vec![ListItem::new(Span::styled(
                "No backups yet",
                Style::default().fg(Color::Gray),
            ))]
        } else {
            backups
                .iter()
                .map(|ts| ListItem::new(format_timestamp(*ts)))
                .collect()
        };

        let list = List::new(items)
            .block(self.pane_block(Pane::Backups, title))
            .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
            .highlight_symbol("▶ ");
        f.render_stateful_widget(list, area, &mut self.backup_state);
    }

    fn render_status(&self, f: &mut Frame, area: Rect) {
        let (text, color) = match &self.status {
            Some((message, true)) => (message.clone(), Color::Red),
            Some((message, false)) => (message.clone(), Color::Green),
            None => (
                format!(
                    "Watching {} file(s), {} backup(s) | h: help | q: quit",
                    self.snapshot.files.len(),
                    self.snapshot.total_backups()
                ),
                Color::Gray,
            ),
        };

        let paragraph = Paragraph::new(Line::from(Span::styled(text, Style::default().fg(color))))
            .block(Block::default().borders(Borders::ALL).title(" Status "));
        f.render_widget(paragraph, area);
    }

    fn render_help(&self, f: &mut Frame) {
        let popup_area = self.centered_rect(60, 50, f.area());

        let help_text = vec![
            Line::from(Span::styled("Keys", Style::default().add_modifier(Modifier::BOLD))),
            Line::from(""),
            Line::from("↑/k, ↓/j     Move selection"),
            Line::from("Home/End     First / last entry"),
            Line::from("Tab, ←, →    Switch between files and backups"),
            Line::from("Enter, r     Restore the highlighted backup"),
            Line::from("h, F1        Toggle this help"),
            Line::from("q, Esc, ^C   Quit"),
            Line::from(""),
            Line::from("Backups are taken automatically whenever a watched file changes."),
        ];

        let paragraph = Paragraph::new(help_text)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Help ")
                    .title_style(Style::default().fg(Color::Cyan)),
            )
            .wrap(Wrap { trim: true });

        f.render_widget(Clear, popup_area);
        f.render_widget(paragraph, popup_area);
    }

    fn centered_rect(&self, percent_x: u16, percent_y: u16, r: Rect) -> Rect {
        let popup_layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Percentage((100 - percent_y) / 2),
                Constraint::Percentage(percent_y),
                Constraint::Percentage((100 - percent_y) / 2),
            ])
            .split(r);

        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage((100 - percent_x) / 2),
                Constraint::Percentage(percent_x),
                Constraint::Percentage((100 - percent_x) / 2),
            ])
            .split(popup_layout[1])[1]
    }
}

pub fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>, io::Error> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

pub fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<(), io::Error> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()
}

use anyhow::Result;
use chrono::{DateTime, Local};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use parcel_intake::intake::{self, Intake};
use parcel_intake::{Classification, Courier, ManualChoice, PendingSet, TrackingEntry, MANUAL_CHOICES};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, List, ListItem, ListState, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;
use tracing::info;

const RECENT_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Intake,
    Pending,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Intake => Page::Pending,
            Page::Pending => Page::Intake,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Intake => "Intake",
            Page::Pending => "Pending",
        }
    }
}

/// Popup shown when a scan needs a manual choice
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Popup {
    /// `MY` + 12 digits: one of the pair, or "None of these"
    Ambiguous { tracking_number: String, pair: [Courier; 2] },
    /// Full manual menu, `Skip` last
    Manual { tracking_number: String },
}

impl Popup {
    pub fn tracking_number(&self) -> &str {
        match self {
            Popup::Ambiguous { tracking_number, .. } | Popup::Manual { tracking_number } => tracking_number,
        }
    }

    pub fn options(&self) -> Vec<String> {
        match self {
            Popup::Ambiguous { pair, .. } => vec![
                pair[0].name().to_string(),
                pair[1].name().to_string(),
                "None of these".to_string(),
            ],
            Popup::Manual { .. } => MANUAL_CHOICES.iter().map(|c| c.label().to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Success,
    Error,
}

pub struct App<'a> {
    intake: Intake<'a>,
    pub current_page: Page,
    pub input: String,
    pub popup: Option<Popup>,
    pub popup_state: ListState,
    pub pending: Vec<PendingSet>,
    pub courier_state: TableState,
    pub entry_state: TableState,
    pub recent: Vec<TrackingEntry>,
    pub status: (StatusKind, String),
    pub operator: String,
    pub should_quit: bool,
}

impl<'a> App<'a> {
    pub fn new(intake: Intake<'a>, operator: &str) -> Self {
        let mut app = Self {
            intake,
            current_page: Page::Intake,
            input: String::new(),
            popup: None,
            popup_state: ListState::default(),
            pending: Vec::new(),
            courier_state: TableState::default(),
            entry_state: TableState::default(),
            recent: Vec::new(),
            status: (StatusKind::Info, "Scan a tracking number and press Enter".to_string()),
            operator: operator.to_string(),
            should_quit: false,
        };
        app.refresh();
        app
    }

    fn set_status(&mut self, kind: StatusKind, message: impl Into<String>) {
        self.status = (kind, message.into());
    }

    pub fn total_pending(&self) -> usize {
        self.pending.iter().map(PendingSet::count).sum()
    }

    pub fn selected_set(&self) -> Option<&PendingSet> {
        self.courier_state.selected().and_then(|i| self.pending.get(i))
    }

    pub fn selected_entry(&self) -> Option<&TrackingEntry> {
        let set = self.selected_set()?;
        self.entry_state.selected().and_then(|i| set.entries.get(i))
    }

    /// Reload pending sets and keep selections in range
    pub fn refresh(&mut self) {
        match self.intake.list_pending() {
            Ok(pending) => self.pending = pending,
            Err(err) => {
                self.set_status(StatusKind::Error, err.to_string());
                return;
            }
        }

        let couriers = self.pending.len();
        clamp(&mut self.courier_state, couriers);
        let entries = self.selected_set().map(PendingSet::count).unwrap_or(0);
        clamp(&mut self.entry_state, entries);
    }

    // ========================================================================
    // INTAKE PAGE
    // ========================================================================

    pub fn submit_scan(&mut self) {
        let tracking_number = self.input.trim().to_string();

        match self.intake.classify(&tracking_number) {
            Ok(Classification::Matched(courier)) => self.record(&tracking_number, ManualChoice::Courier(courier)),
            Ok(Classification::Ambiguous(pair)) => {
                self.open_popup(Popup::Ambiguous { tracking_number, pair });
                self.set_status(StatusKind::Info, "Ambiguous format: pick the courier");
            }
            Ok(Classification::Unknown) => {
                self.open_popup(Popup::Manual { tracking_number });
                self.set_status(StatusKind::Info, "Courier not recognised: pick one or Skip");
            }
            Err(err) => self.set_status(StatusKind::Error, err.to_string()),
        }
    }

    fn open_popup(&mut self, popup: Popup) {
        self.popup = Some(popup);
        self.popup_state.select(Some(0));
    }

    fn move_popup(&mut self, forward: bool) {
        let len = self.popup.as_ref().map(|p| p.options().len()).unwrap_or(0);
        step(&mut self.popup_state, len, forward);
    }

    pub fn confirm_popup(&mut self) {
        let Some(popup) = self.popup.take() else {
            return;
        };
        let selected = self.popup_state.selected().unwrap_or(0);

        match popup {
            Popup::Ambiguous { tracking_number, pair } => match pair.get(selected) {
                Some(courier) => self.record(&tracking_number, ManualChoice::Courier(*courier)),
                // "None of these" falls back to the full list
                None => self.open_popup(Popup::Manual { tracking_number }),
            },
            Popup::Manual { tracking_number } => {
                let choice = MANUAL_CHOICES.get(selected).copied().unwrap_or(ManualChoice::Skip);
                self.record(&tracking_number, choice);
            }
        }
    }

    fn record(&mut self, tracking_number: &str, choice: ManualChoice) {
        let (now, _) = intake::now();

        match self.intake.resolve_manual(tracking_number, choice, now) {
            Ok(Some(entry)) => {
                self.set_status(
                    StatusKind::Success,
                    format!("✓ {} logged under {}", entry.tracking_number, entry.courier),
                );
                self.recent.insert(0, entry);
                self.recent.truncate(RECENT_LIMIT);
                self.input.clear();
                self.refresh();
            }
            Ok(None) => {
                self.set_status(StatusKind::Info, format!("Skipped {}", tracking_number));
                self.input.clear();
            }
            Err(err) => self.set_status(StatusKind::Error, err.to_string()),
        }
    }

    // ========================================================================
    // PENDING PAGE
    // ========================================================================

    pub fn next_courier(&mut self) {
        step(&mut self.courier_state, self.pending.len(), true);
        self.reset_entry_selection();
    }

    pub fn previous_courier(&mut self) {
        step(&mut self.courier_state, self.pending.len(), false);
        self.reset_entry_selection();
    }

    fn reset_entry_selection(&mut self) {
        let first = self.selected_set().filter(|s| s.count() > 0).map(|_| 0);
        self.entry_state.select(first);
    }

    fn move_entry(&mut self, forward: bool) {
        let len = self.selected_set().map(PendingSet::count).unwrap_or(0);
        step(&mut self.entry_state, len, forward);
    }

    /// Generate, archive and clear the selected courier's manifest
    pub fn print_selected(&mut self) {
        let Some(courier) = self.selected_set().map(|s| s.courier) else {
            self.set_status(StatusKind::Error, "No pending parcels to print");
            return;
        };

        let (_, printed_at) = intake::now();
        let mut stages = Vec::new();
        let outcome = self
            .intake
            .generate_manifest(courier, printed_at, |stage| stages.push(stage));

        match outcome {
            Ok(receipt) => {
                info!(bin = %receipt.bin_number, stages = stages.len(), "manifest printed from console");
                self.set_status(
                    StatusKind::Success,
                    format!(
                        "✓ Manifest {} for {}: {} parcels, {} files archived",
                        receipt.bin_number,
                        receipt.courier,
                        receipt.parcel_count,
                        receipt.uploaded.len()
                    ),
                );
            }
            Err(failure) => {
                self.set_status(StatusKind::Error, format!("✗ {} {}", failure.stage, failure));
            }
        }

        self.refresh();
    }

    pub fn remove_selected(&mut self) {
        let Some(entry) = self.selected_entry().cloned() else {
            return;
        };

        match self.intake.remove_entry(entry.courier, &entry.tracking_number) {
            Ok(true) => self.set_status(StatusKind::Success, format!("Removed {}", entry.tracking_number)),
            Ok(false) => self.set_status(StatusKind::Info, format!("{} was already gone", entry.tracking_number)),
            Err(err) => self.set_status(StatusKind::Error, err.to_string()),
        }

        self.refresh();
    }

    // ========================================================================
    // KEYS
    // ========================================================================

    pub fn on_key(&mut self, code: KeyCode, modifiers: KeyModifiers) {
        if modifiers.contains(KeyModifiers::CONTROL) && code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }

        if self.popup.is_some() {
            match code {
                KeyCode::Down | KeyCode::Char('j') => self.move_popup(true),
                KeyCode::Up | KeyCode::Char('k') => self.move_popup(false),
                KeyCode::Enter => self.confirm_popup(),
                KeyCode::Esc => {
                    self.popup = None;
                    self.set_status(StatusKind::Info, "Selection cancelled");
                }
                _ => {}
            }
            return;
        }

        if code == KeyCode::Tab {
            self.current_page = self.current_page.next();
            self.refresh();
            return;
        }

        match self.current_page {
            Page::Intake => match code {
                KeyCode::Enter => self.submit_scan(),
                KeyCode::Backspace => {
                    self.input.pop();
                }
                KeyCode::Esc => self.should_quit = true,
                KeyCode::Char(c) => self.input.push(c),
                _ => {}
            },
            Page::Pending => match code {
                KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
                KeyCode::Down | KeyCode::Char('j') => self.move_entry(true),
                KeyCode::Up | KeyCode::Char('k') => self.move_entry(false),
                KeyCode::Right | KeyCode::Char('l') => self.next_courier(),
                KeyCode::Left | KeyCode::Char('h') => self.previous_courier(),
                KeyCode::Char('p') => self.print_selected(),
                KeyCode::Char('d') => self.remove_selected(),
                KeyCode::Char('r') => {
                    self.refresh();
                    self.set_status(StatusKind::Info, "Refreshed");
                }
                _ => {}
            },
        }
    }
}

fn clamp(state: &mut TableState, len: usize) {
    match (state.selected(), len) {
        (_, 0) => state.select(None),
        (None, _) => state.select(Some(0)),
        (Some(i), len) if i >= len => state.select(Some(len - 1)),
        _ => {}
    }
}

/// Move a selection one row, wrapping at both ends
fn step<S: Selectable>(state: &mut S, len: usize, forward: bool) {
    if len == 0 {
        state.set(None);
        return;
    }
    let next = match (state.get(), forward) {
        (Some(i), true) if i + 1 < len => i + 1,
        (Some(_), true) => 0,
        (Some(0), false) | (None, false) => len - 1,
        (Some(i), false) => i - 1,
        (None, true) => 0,
    };
    state.set(Some(next));
}

trait Selectable {
    fn get(&self) -> Option<usize>;
    fn set(&mut self, index: Option<usize>);
}

impl Selectable for TableState {
    fn get(&self) -> Option<usize> {
        self.selected()
    }
    fn set(&mut self, index: Option<usize>) {
        self.select(index);
    }
}

impl Selectable for ListState {
    fn get(&self) -> Option<usize> {
        self.selected()
    }
    fn set(&mut self, index: Option<usize>) {
        self.select(index);
    }
}

// ============================================================================
// TERMINAL LOOP
// ============================================================================

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

fn run_app<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            if key.kind == KeyEventKind::Press {
                app.on_key(key.code, key.modifiers);
            }
        }
    }
    Ok(())
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    match app.current_page {
        Page::Intake => render_intake(f, chunks[1], app),
        Page::Pending => render_pending(f, chunks[1], app),
    }

    render_status_bar(f, chunks[2], app);

    if app.popup.is_some() {
        render_popup(f, app);
    }
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let mut tab_spans = vec![];
    for (i, page) in [Page::Intake, Page::Pending].iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        tab_spans.push(Span::styled(page.title().to_string(), style));
    }

    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("📦 Pending: {}", app.total_pending()),
        Style::default().fg(Color::White),
    ));
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(app.operator.clone(), Style::default().fg(Color::Green)));

    let header = Paragraph::new(vec![Line::from(tab_spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn render_intake(f: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(area);

    let input = Paragraph::new(Line::from(vec![
        Span::styled("> ", Style::default().fg(Color::Yellow)),
        Span::raw(app.input.clone()),
        Span::styled("█", Style::default().fg(Color::DarkGray)),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Scan Tracking Number "),
    );
    f.render_widget(input, chunks[0]);

    let header = Row::new(["Time", "Tracking Number", "Courier"].iter().map(|h| {
        Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
    }))
    .style(Style::default().bg(Color::DarkGray));

    let rows = app.recent.iter().map(|entry| {
        Row::new(vec![
            Cell::from(logged_at(entry.timestamp)),
            Cell::from(entry.tracking_number.clone()),
            Cell::from(entry.courier.name()),
        ])
    });

    let table = Table::new(rows, [Constraint::Length(10), Constraint::Length(28), Constraint::Min(16)])
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(" Recently Logged "));

    f.render_widget(table, chunks[1]);
}

fn render_pending(f: &mut Frame, area: Rect, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(area);

    let header = Row::new(["Courier", "Code", "Parcels"].iter().map(|h| {
        Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
    }))
    .style(Style::default().bg(Color::DarkGray));

    let rows = app.pending.iter().map(|set| {
        Row::new(vec![
            Cell::from(set.courier.name()),
            Cell::from(set.courier.bin_code()),
            Cell::from(set.count().to_string()),
        ])
    });

    let couriers = Table::new(rows, [Constraint::Min(16), Constraint::Length(6), Constraint::Length(8)])
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(" Couriers "))
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("→ ");

    f.render_stateful_widget(couriers, chunks[0], &mut app.courier_state);

    let title = app
        .selected_set()
        .map(|set| format!(" {} ({}) ", set.courier, set.count()))
        .unwrap_or_else(|| " No pending parcels ".to_string());

    let entries: Vec<Row> = app
        .selected_set()
        .map(|set| {
            set.entries
                .iter()
                .enumerate()
                .map(|(i, entry)| {
                    Row::new(vec![
                        Cell::from((i + 1).to_string()),
                        Cell::from(entry.tracking_number.clone()),
                        Cell::from(logged_at(entry.timestamp)),
                    ])
                })
                .collect()
        })
        .unwrap_or_default();

    let table = Table::new(entries, [Constraint::Length(5), Constraint::Min(20), Constraint::Length(10)])
        .header(
            Row::new(["#", "Tracking Number", "Logged"].iter().map(|h| {
                Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
            }))
            .style(Style::default().bg(Color::DarkGray)),
        )
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().bg(Color::DarkGray))
        .highlight_symbol("→ ");

    f.render_stateful_widget(table, chunks[1], &mut app.entry_state);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let (kind, message) = &app.status;
    let color = match kind {
        StatusKind::Info => Color::Cyan,
        StatusKind::Success => Color::Green,
        StatusKind::Error => Color::Red,
    };

    let mut status_spans = vec![Span::styled(format!(" {} ", message), Style::default().fg(color))];

    let hints: &[(&str, &str)] = match (app.popup.is_some(), app.current_page) {
        (true, _) => &[("↑/↓", "Choose"), ("Enter", "Confirm"), ("Esc", "Cancel")],
        (false, Page::Intake) => &[("Enter", "Classify"), ("Tab", "Page"), ("Esc", "Quit")],
        (false, Page::Pending) => &[
            ("←/→", "Courier"),
            ("↑/↓", "Entry"),
            ("p", "Print"),
            ("d", "Remove"),
            ("r", "Refresh"),
            ("q", "Quit"),
        ],
    };

    for (key, label) in hints {
        status_spans.push(Span::raw(" | "));
        status_spans.push(Span::styled(*key, Style::default().fg(Color::Yellow)));
        status_spans.push(Span::raw(format!(" {}", label)));
    }

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn render_popup(f: &mut Frame, app: &mut App) {
    let Some(popup) = app.popup.as_ref() else {
        return;
    };

    let title = match popup {
        Popup::Ambiguous { .. } => format!(" Which courier for {}? ", popup.tracking_number()),
        Popup::Manual { .. } => format!(" Select courier for {} ", popup.tracking_number()),
    };
    let items: Vec<ListItem> = popup.options().into_iter().map(ListItem::new).collect();
    let height = items.len() as u16 + 2;

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Yellow))
                .title(title),
        )
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("→ ");

    let area = centered_rect(50, height, f.size());
    f.render_widget(Clear, area);
    f.render_stateful_widget(list, area, &mut app.popup_state);
}

fn centered_rect(percent_x: u16, height: u16, r: Rect) -> Rect {
    let height = height.min(r.height);
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length((r.height - height) / 2),
            Constraint::Length(height),
            Constraint::Min(0),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

fn logged_at(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|utc| utc.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_default()
}

// ============================================================================
// TESTS
// ============================================================================

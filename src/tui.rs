use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    BarChart, Block, Borders, Cell, Paragraph, Row, Table, TableState, Tabs, Wrap,
};
use tracing::warn;

use crate::app::{LoadedSession, ProgressEvent, ProgressSink, ProgressSinkKind};
use crate::domain::MatchRecord;
use crate::error::IprError;
use crate::go::GoStatus;

const EVENTS_MAX: usize = 8;
const LOGS_MAX: usize = 200;
const PAGE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Session,
    Import,
    Aggregate,
    Chart,
    Export,
    Archive,
    Go,
    Ready,
}

impl Phase {
    const ALL: [Phase; 8] = [
        Phase::Session,
        Phase::Import,
        Phase::Aggregate,
        Phase::Chart,
        Phase::Export,
        Phase::Archive,
        Phase::Go,
        Phase::Ready,
    ];

    fn label(self) -> &'static str {
        match self {
            Phase::Session => "Session",
            Phase::Import => "Import",
            Phase::Aggregate => "Aggregate",
            Phase::Chart => "Chart",
            Phase::Export => "Export",
            Phase::Archive => "Archive",
            Phase::Go => "Go",
            Phase::Ready => "Ready",
        }
    }
}

#[derive(Debug)]
struct ProgressState {
    status: String,
    phase: Phase,
    events: VecDeque<String>,
    logs: VecDeque<String>,
    started: Instant,
    active: bool,
}

pub struct Tui {
    kind: ProgressSinkKind,
    state: Arc<Mutex<ProgressState>>,
}

struct TuiProgress {
    state: Arc<Mutex<ProgressState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut state) = self.state.lock() {
            let message = event.message.trim().to_string();
            if let Some((phase, payload)) = parse_phase(&message) {
                state.phase = phase;
                state.status = payload.to_string();
            } else {
                state.status = message.clone();
            }
            let logged = match event.elapsed {
                Some(elapsed) => format!("{message} ({:.1}s)", elapsed.as_secs_f64()),
                None => message,
            };
            push_bounded(&mut state.events, logged.clone(), EVENTS_MAX);
            push_bounded(&mut state.logs, format!("[{}] {logged}", timestamp()), LOGS_MAX);
        }
    }
}

impl Tui {
    pub fn new(kind: ProgressSinkKind) -> Self {
        Self {
            kind,
            state: Arc::new(Mutex::new(ProgressState {
                status: "ready".to_string(),
                phase: Phase::Session,
                events: VecDeque::new(),
                logs: VecDeque::new(),
                started: Instant::now(),
                active: false,
            })),
        }
    }

    /// Runs `f` on a worker thread and draws its progress until it returns.
    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, IprError> + Send + 'static,
        R: Send + 'static,
    {
        self.set_active(true);
        let mut terminal = enter_terminal()?;

        let (tx, rx) = std::sync::mpsc::channel();
        let sink = TuiProgress {
            state: self.state.clone(),
        };
        let handle = thread::spawn(move || tx.send(f(&sink)));

        let mut tick = 0usize;
        loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_progress(frame, self.kind, &state, tick))
                    .into_diagnostic()?;
            }

            if let Ok(result) = rx.try_recv() {
                self.set_active(false);
                leave_terminal()?;
                handle.join().ok();
                return result.map_err(miette::Report::new);
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    if key.kind == KeyEventKind::Press && matches!(key.code, KeyCode::Esc) {
                        break;
                    }
                }
            }
            tick = tick.wrapping_add(1);
        }

        self.set_active(false);
        leave_terminal()?;
        Err(miette::Report::msg("aborted"))
    }

    /// Interactive cache browser: one tab per app.
    pub fn browse(&mut self, loaded: &LoadedSession) -> miette::Result<()> {
        let mut browser = Browser::new(loaded);
        let mut terminal = enter_terminal()?;
        loop {
            terminal
                .draw(|frame| draw_browser(frame, &mut browser))
                .into_diagnostic()?;
            if event::poll(Duration::from_millis(200)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    if browser.handle_key(key) {
                        break;
                    }
                }
            }
        }
        leave_terminal()
    }

    pub fn confirm_clear(&mut self, target: &str) -> miette::Result<bool> {
        let mut terminal = enter_terminal()?;
        let confirmed = loop {
            terminal
                .draw(|frame| {
                    let block = Block::default().borders(Borders::ALL).title("Confirm");
                    let text = Paragraph::new(vec![
                        Line::from(format!("Remove {target}?")),
                        Line::from("Press y to confirm, n to cancel."),
                    ])
                    .alignment(Alignment::Center)
                    .block(block);
                    frame.render_widget(text, frame.area());
                })
                .into_diagnostic()?;

            if event::poll(Duration::from_millis(100)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    match key.code {
                        KeyCode::Char('y') | KeyCode::Char('Y') => break true,
                        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => break false,
                        _ => {}
                    }
                }
            }
        };
        leave_terminal()?;
        Ok(confirmed)
    }

    fn set_active(&self, active: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.active = active;
            state.started = Instant::now();
        }
    }
}

fn enter_terminal() -> miette::Result<Terminal<CrosstermBackend<io::Stdout>>> {
    let mut stdout = io::stdout();
    enable_raw_mode().into_diagnostic()?;
    stdout.execute(EnterAlternateScreen).into_diagnostic()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout)).into_diagnostic()?;
    terminal.clear().into_diagnostic()?;
    Ok(terminal)
}

fn leave_terminal() -> miette::Result<()> {
    disable_raw_mode().into_diagnostic()?;
    io::stdout()
        .execute(LeaveAlternateScreen)
        .into_diagnostic()?;
    Ok(())
}

struct Browser<'a> {
    loaded: &'a LoadedSession,
    tab: usize,
    rows: Vec<MatchRecord>,
    table: TableState,
    notice: Option<String>,
}

impl<'a> Browser<'a> {
    fn new(loaded: &'a LoadedSession) -> Self {
        let mut browser = Self {
            loaded,
            tab: 0,
            rows: Vec::new(),
            table: TableState::default(),
            notice: None,
        };
        browser.load_tab();
        browser
    }

    fn app(&self) -> Option<&str> {
        self.loaded
            .cache
            .apps()
            .get(self.tab)
            .map(|app| app.as_str())
    }

    fn load_tab(&mut self) {
        let cache = &self.loaded.cache;
        self.rows = match self.app() {
            Some(app) => (0..cache.get_match_length(app))
                .map_while(|index| cache.get_one_row(app, index))
                .collect(),
            None => Vec::new(),
        };
        self.table
            .select((!self.rows.is_empty()).then_some(0));
    }

    fn switch_tab(&mut self, forward: bool) {
        let count = self.loaded.cache.apps().len();
        if count == 0 {
            return;
        }
        self.tab = if forward {
            (self.tab + 1) % count
        } else {
            (self.tab + count - 1) % count
        };
        self.notice = None;
        self.load_tab();
    }

    fn move_selection(&mut self, delta: isize) {
        if self.rows.is_empty() {
            return;
        }
        let current = self.table.selected().unwrap_or(0) as isize;
        let last = self.rows.len() as isize - 1;
        self.table
            .select(Some((current + delta).clamp(0, last) as usize));
    }

    fn selected_url(&self, go_link: bool) -> Option<String> {
        let row = self.table.selected()?;
        self.loaded.cache.get_url(self.app()?, row, go_link)
    }

    fn open_selected(&mut self, go_link: bool) {
        let Some(url) = self.selected_url(go_link) else {
            self.notice = Some("no link for this row".to_string());
            return;
        };
        self.notice = match open::that(&url) {
            Ok(()) => Some(format!("opened {url}")),
            Err(err) => {
                warn!(url = %url, error = %err, "cannot open browser");
                Some(format!("cannot open {url}: {err}"))
            }
        };
    }

    fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.kind != KeyEventKind::Press {
            return false;
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Right | KeyCode::Tab => self.switch_tab(true),
            KeyCode::Left | KeyCode::BackTab => self.switch_tab(false),
            KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),
            KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
            KeyCode::PageDown => self.move_selection(PAGE as isize),
            KeyCode::PageUp => self.move_selection(-(PAGE as isize)),
            KeyCode::Home => self.move_selection(isize::MIN / 2),
            KeyCode::End => self.move_selection(isize::MAX / 2),
            KeyCode::Enter => self.open_selected(false),
            KeyCode::Char('g') => self.open_selected(true),
            _ => {}
        }
        false
    }
}

fn draw_browser(frame: &mut ratatui::Frame, browser: &mut Browser<'_>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(4),
        ])
        .split(frame.area());

    let cache = &browser.loaded.cache;
    let titles: Vec<Line> = cache
        .apps()
        .iter()
        .map(|app| Line::from(format!("{app} ({})", cache.get_match_length(app.as_str()))))
        .collect();
    let tabs = Tabs::new(titles)
        .select(browser.tab)
        .block(
            Block::default()
                .borders(Borders::BOTTOM)
                .title(format!(" IPRSTATS :: session {} ", browser.loaded.session.id())),
        )
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        );
    frame.render_widget(tabs, chunks[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
        .split(chunks[1]);
    draw_match_table(frame, browser, body[0]);
    draw_count_chart(frame, browser, body[1]);
    draw_details(frame, browser, chunks[2]);
}

fn draw_match_table(frame: &mut ratatui::Frame, browser: &mut Browser<'_>, area: Rect) {
    let go_names = browser.loaded.cache.go_status().is_enabled();
    let header = Row::new(vec!["Name", "Count", "DB ID", "GO"]).style(
        Style::default()
            .fg(Color::Gray)
            .add_modifier(Modifier::BOLD),
    );
    let rows = browser.rows.iter().map(|row| {
        let go = if go_names {
            row.go_name.clone().or_else(|| row.go_id.clone())
        } else {
            row.go_id.clone()
        };
        Row::new(vec![
            Cell::from(row.name.clone()),
            Cell::from(row.count.to_string()),
            Cell::from(row.db_id.clone()),
            Cell::from(go.unwrap_or_default()),
        ])
    });
    let table = Table::new(
        rows,
        [
            Constraint::Percentage(40),
            Constraint::Length(7),
            Constraint::Length(14),
            Constraint::Min(10),
        ],
    )
    .header(header)
    .block(Block::default().borders(Borders::RIGHT).title("Matches"))
    .row_highlight_style(Style::default().fg(Color::Black).bg(Color::Cyan));
    frame.render_stateful_widget(table, area, &mut browser.table);
}

fn draw_count_chart(frame: &mut ratatui::Frame, browser: &Browser<'_>, area: Rect) {
    let block = Block::default().title("Counts");
    let Some((values, labels)) = browser
        .app()
        .and_then(|app| browser.loaded.cache.get_counts(app))
    else {
        frame.render_widget(Paragraph::new("no counts").block(block), area);
        return;
    };
    let data: Vec<(&str, u64)> = labels
        .iter()
        .zip(&values)
        .map(|(label, value)| (label.as_str(), u64::try_from(*value).unwrap_or(0)))
        .collect();
    let chart = BarChart::default()
        .block(block)
        .direction(Direction::Horizontal)
        .bar_width(1)
        .bar_gap(0)
        .bar_style(Style::default().fg(Color::Green))
        .value_style(Style::default().fg(Color::Black).bg(Color::Green))
        .data(data.as_slice());
    frame.render_widget(chart, area);
}

fn draw_details(frame: &mut ratatui::Frame, browser: &Browser<'_>, area: Rect) {
    let go_line = match browser.loaded.cache.go_status() {
        GoStatus::Enabled => Span::styled("GO lookup on", Style::default().fg(Color::Green)),
        GoStatus::Disabled(reason) => Span::styled(
            format!("GO lookup off ({reason})"),
            Style::default().fg(Color::Yellow),
        ),
    };
    let url_line = |label: &'static str, go_link: bool| {
        Line::from(vec![
            Span::styled(label, Style::default().fg(Color::Gray)),
            Span::raw(
                browser
                    .selected_url(go_link)
                    .unwrap_or_else(|| "n/a".to_string()),
            ),
        ])
    };
    let mut lines = vec![
        url_line("DB link: ", false),
        url_line("GO link: ", true),
        Line::from(vec![
            go_line,
            Span::styled(
                "   <-/-> app  Up/Down row  Enter open DB link  g open GO link  q quit",
                Style::default().fg(Color::DarkGray),
            ),
        ]),
    ];
    if let Some(notice) = &browser.notice {
        lines.push(Line::from(Span::styled(
            notice.clone(),
            Style::default().fg(Color::Cyan),
        )));
    }
    let details = Paragraph::new(lines)
        .block(Block::default().borders(Borders::TOP))
        .wrap(Wrap { trim: true });
    frame.render_widget(details, area);
}

fn draw_progress(
    frame: &mut ratatui::Frame,
    kind: ProgressSinkKind,
    state: &ProgressState,
    tick: usize,
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(6),
            Constraint::Length(10),
        ])
        .split(frame.area());

    let hb = if tick % 2 == 0 { "*" } else { " " };
    let op_label = match kind {
        ProgressSinkKind::Open => "Open",
        ProgressSinkKind::Show => "Show",
        ProgressSinkKind::Export => "Export",
        ProgressSinkKind::Sessions => "Sessions",
        ProgressSinkKind::Go => "Go",
    };
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            "IPRSTATS",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   Op: "),
        Span::styled(op_label, Style::default().fg(Color::Cyan)),
        Span::raw("   "),
        Span::styled(hb, Style::default().fg(Color::Green)),
    ]))
    .block(Block::default().borders(Borders::BOTTOM));
    frame.render_widget(header, chunks[0]);

    let phase_color = if state.active {
        Color::Cyan
    } else {
        Color::Green
    };
    let phases: Vec<Span> = Phase::ALL
        .iter()
        .flat_map(|phase| {
            let style = if *phase == state.phase {
                Style::default()
                    .fg(phase_color)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            [Span::styled(phase.label(), style), Span::raw("  ")]
        })
        .collect();
    let mut lines = vec![
        Line::from(phases),
        Line::from(""),
        Line::from(vec![
            Span::styled("Status: ", Style::default().fg(Color::Gray)),
            Span::raw(state.status.clone()),
        ]),
        Line::from(vec![
            Span::styled("Elapsed: ", Style::default().fg(Color::Gray)),
            Span::raw(format!("{:.1}s", state.started.elapsed().as_secs_f64())),
        ]),
        Line::from(""),
    ];
    lines.extend(state.events.iter().map(|event| Line::from(event.clone())));
    frame.render_widget(
        Paragraph::new(lines).wrap(Wrap { trim: true }),
        chunks[1],
    );

    let skip = state.logs.len().saturating_sub(8);
    let logs: Vec<Line> = state
        .logs
        .iter()
        .skip(skip)
        .map(|line| Line::from(line.clone()))
        .collect();
    frame.render_widget(
        Paragraph::new(logs).block(Block::default().borders(Borders::TOP).title("Log")),
        chunks[2],
    );
}

fn parse_phase(message: &str) -> Option<(Phase, &str)> {
    let rest = message.strip_prefix("phase=")?;
    let (label, payload) = rest.split_once(';')?;
    let phase = Phase::ALL
        .into_iter()
        .find(|phase| phase.label() == label)?;
    Some((phase, payload.trim()))
}

fn push_bounded(buffer: &mut VecDeque<String>, item: String, max: usize) {
    buffer.push_back(item);
    while buffer.len() > max {
        buffer.pop_front();
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_messages_parse() {
        assert_eq!(
            parse_phase("phase=Import; 12 proteins parsed"),
            Some((Phase::Import, "12 proteins parsed"))
        );
        assert_eq!(parse_phase("phase=Unknown; x"), None);
        assert_eq!(parse_phase("plain message"), None);
    }
}

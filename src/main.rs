use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::prelude::*;
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Bar, BarChart, BarGroup, Block, Borders, Clear, Paragraph, Sparkline};
use tracing::info;

use signaldesk::config::{FeedSource, Settings};
use signaldesk::dispatch::{DispatchHandle, Dispatcher};
use signaldesk::event::split_key;
use signaldesk::outbox::Outbox;
use signaldesk::signal::Status;
use signaldesk::state::{DeskState, Delta, FeedStatus, Snapshot, apply_delta};
use signaldesk::views::{self, HEATMAP_SLOTS};
use signaldesk::{feed, logging};

const RISK_STEP: u8 = 5;

struct App {
    state: DeskState,
    should_quit: bool,
    selected: usize,
    help_overlay: bool,
    board_view: bool,
    board_pool: usize,
    feed_label: &'static str,
    outbox: Arc<Outbox<Delta>>,
    handle: DispatchHandle,
}

impl App {
    fn new(settings: &Settings, outbox: Arc<Outbox<Delta>>, handle: DispatchHandle) -> Self {
        Self {
            state: DeskState::with_controls(settings.controls()),
            should_quit: false,
            selected: 0,
            help_overlay: false,
            board_view: false,
            board_pool: settings.sim_pool,
            feed_label: match settings.feed_source {
                FeedSource::Sim => "SIM",
                FeedSource::Sse => "SSE",
            },
            outbox,
            handle,
        }
    }

    fn on_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('j') | KeyCode::Down => self.select_next(),
            KeyCode::Char('k') | KeyCode::Up => self.select_prev(),
            KeyCode::Char('+') | KeyCode::Char('=') => {
                let risk = self.state.controls.risk.saturating_add(RISK_STEP).min(100);
                self.set_risk(risk);
            }
            KeyCode::Char('-') => {
                let risk = self.state.controls.risk.saturating_sub(RISK_STEP);
                self.set_risk(risk);
            }
            KeyCode::Char('c') | KeyCode::Char('C') => {
                let enabled = !self.state.controls.cooldowns;
                apply_delta(&mut self.state, Delta::SetCooldowns(enabled));
                self.state.push_log(format!(
                    "[INFO] Cooldowns {}",
                    if enabled { "on" } else { "off" }
                ));
            }
            KeyCode::Char('v') | KeyCode::Char('V') => self.board_view = !self.board_view,
            KeyCode::Char('?') => self.help_overlay = !self.help_overlay,
            _ => {}
        }
    }

    fn set_risk(&mut self, risk: u8) {
        apply_delta(&mut self.state, Delta::SetRisk(risk));
        self.state.push_log(format!("[INFO] Risk dial {risk}"));
    }

    fn select_next(&mut self) {
        let total = self.state.latest.len();
        if total > 0 {
            self.selected = (self.selected + 1).min(total - 1);
        }
    }

    fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    fn clamp_selection(&mut self) {
        let total = self.state.latest.len();
        if total == 0 {
            self.selected = 0;
        } else if self.selected >= total {
            self.selected = total - 1;
        }
    }

    fn selected_key(&self) -> Option<String> {
        self.state
            .ranked_keys()
            .get(self.selected)
            .map(|k| (*k).clone())
    }
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");

    let settings = Settings::from_env();
    if let Err(err) = logging::init_file_tracing(&settings.log_file) {
        eprintln!("warning: {err:#}");
    }

    let outbox = Arc::new(Outbox::new(settings.outbox_capacity));
    let dispatcher = Dispatcher::spawn(settings.dispatch_config(), outbox.clone())?;
    let stop = Arc::new(AtomicBool::new(false));
    let _provider = feed::spawn_provider(settings.clone(), dispatcher.handle(), stop.clone());

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = ratatui::backend::CrosstermBackend::new(stdout);
    let mut terminal = ratatui::Terminal::new(backend)?;

    let mut app = App::new(&settings, outbox, dispatcher.handle());
    let res = run_app(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    // Stop the transport first, then let queued observations finish.
    stop.store(true, Ordering::Relaxed);
    let report = dispatcher.shutdown()?;
    let keys: usize = report.engines.iter().map(|e| e.len()).sum();
    info!(
        accepted = report.stats.accepted,
        rejected = report.stats.rejected,
        keys,
        "dashboard closed"
    );

    if let Err(err) = res {
        eprintln!("error: {err}");
    }
    Ok(())
}

fn run_app<B: Backend>(terminal: &mut Terminal<B>, app: &mut App) -> io::Result<()> {
    let tick_rate = Duration::from_millis(250);
    let mut last_tick = Instant::now();

    loop {
        for delta in app.outbox.drain() {
            apply_delta(&mut app.state, delta);
        }
        app.clamp_selection();

        terminal.draw(|f| ui(f, app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.on_key(key);
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

fn ui(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(7),
            Constraint::Length(1),
        ])
        .split(frame.size());

    let header = Paragraph::new(header_text(app)).block(Block::default().borders(Borders::BOTTOM));
    frame.render_widget(header, chunks[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(chunks[1]);
    render_insights(frame, body[0], app);
    render_side(frame, body[1], app);

    render_console(frame, chunks[2], &app.state);

    let footer = Paragraph::new(
        "j/k/↑/↓ Move | +/- Risk | c Cooldowns | v Board | ? Help | q Quit",
    )
    .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(footer, chunks[3]);

    if app.help_overlay {
        render_help_overlay(frame, frame.size());
    }
}

fn header_text(app: &App) -> String {
    let state = &app.state;
    let stats = app.handle.stats();
    let feed = match state.feed_status {
        FeedStatus::Idle => "idle",
        FeedStatus::Connecting => "connecting",
        FeedStatus::Connected => "live",
        FeedStatus::Disconnected => "reconnecting",
        FeedStatus::Finished => "ended",
    };
    let line1 = format!(
        "  SIGNAL DESK | {} {} | Risk {} | Cooldowns {} | Calibration {}% ({}/{})",
        app.feed_label,
        feed,
        state.controls.risk,
        if state.controls.cooldowns { "on" } else { "off" },
        views::calibration_pct(&state.calibration),
        state.calibration.hits,
        state.calibration.total,
    );
    let line2 = format!(
        "  keys {} | processed {} | rejected {} | suppressed {} | dropped {}",
        state.latest.len(),
        stats.accepted,
        stats.rejected,
        state.suppressed,
        app.outbox.dropped(),
    );
    format!("{line1}\n{line2}")
}

fn status_style(status: Status) -> Style {
    match status {
        Status::Alert => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        Status::Warning => Style::default().fg(Color::Yellow),
        Status::Normal => Style::default().fg(Color::Green),
    }
}

fn status_label(status: Status) -> &'static str {
    match status {
        Status::Alert => "ALERT",
        Status::Warning => "WARN",
        Status::Normal => "ok",
    }
}

fn insight_columns() -> [Constraint; 7] {
    [
        Constraint::Min(18),
        Constraint::Length(6),
        Constraint::Length(6),
        Constraint::Length(7),
        Constraint::Length(7),
        Constraint::Length(5),
        Constraint::Min(12),
    ]
}

fn render_insights(frame: &mut Frame, area: Rect, app: &App) {
    let block = Block::default().title("Insights").borders(Borders::ALL);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(1)])
        .split(inner);

    let widths = insight_columns();
    let head = Layout::default()
        .direction(Direction::Horizontal)
        .constraints(widths)
        .split(sections[0]);
    let head_style = Style::default().add_modifier(Modifier::BOLD);
    for (i, title) in ["Player", "State", "Conf", "z", "EWMA", "Risk", "Insight"]
        .iter()
        .enumerate()
    {
        frame.render_widget(Paragraph::new(*title).style(head_style), head[i]);
    }

    let keys = app.state.ranked_keys();
    let list_area = sections[1];
    if keys.is_empty() {
        let empty = Paragraph::new("Awaiting signal…").style(Style::default().fg(Color::DarkGray));
        frame.render_widget(empty, list_area);
        return;
    }

    let (start, end) = visible_range(app.selected, keys.len(), list_area.height as usize);
    for (row, idx) in (start..end).enumerate() {
        let key = keys[idx];
        let msg = &app.state.latest[key];
        let row_area = Rect {
            x: list_area.x,
            y: list_area.y + row as u16,
            width: list_area.width,
            height: 1,
        };
        let selected = idx == app.selected;
        let base = if selected {
            Style::default().fg(Color::White).bg(Color::DarkGray)
        } else {
            Style::default()
        };
        if selected {
            frame.render_widget(Block::default().style(base), row_area);
        }

        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(widths)
            .split(row_area);
        let (player_id, stat) = split_key(key);
        let name = format!("{} {}", app.state.label_for(player_id), stat);
        let risk = msg
            .risk
            .map(|r| format!("{r:.0}"))
            .unwrap_or_else(|| "-".to_string());
        let drift = if msg.drift { " ▲" } else { "" };

        frame.render_widget(Paragraph::new(name).style(base), cols[0]);
        frame.render_widget(
            Paragraph::new(status_label(msg.status)).style(status_style(msg.status).patch(base)),
            cols[1],
        );
        frame.render_widget(
            Paragraph::new(format!("{:.0}%", msg.confidence)).style(base),
            cols[2],
        );
        frame.render_widget(Paragraph::new(format!("{:+.2}", msg.z)).style(base), cols[3]);
        frame.render_widget(Paragraph::new(format!("{:.1}", msg.ewma)).style(base), cols[4]);
        frame.render_widget(Paragraph::new(risk).style(base), cols[5]);
        frame.render_widget(
            Paragraph::new(format!("{}{drift}", msg.insight)).style(base),
            cols[6],
        );
    }
}

fn render_side(frame: &mut Frame, area: Rect, app: &App) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(7),
            Constraint::Min(4),
            Constraint::Length(6),
            Constraint::Length(6),
            Constraint::Length(5),
        ])
        .split(area);

    render_series(frame, rows[0], app);

    let state = &app.state;
    let alerts = state
        .recent_alerts
        .iter()
        .map(|a| {
            let (player_id, stat) = split_key(&a.key);
            format!(
                "{} {} {} {:.0}%",
                state.label_for(player_id),
                stat,
                a.insight,
                a.confidence
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let alerts = Paragraph::new(alerts)
        .style(Style::default().fg(Color::Red))
        .block(Block::default().title("Recent alerts").borders(Borders::ALL));
    frame.render_widget(alerts, rows[1]);

    let snapshot = state.snapshot();
    let radar = views::anomaly_radar(&snapshot)
        .into_iter()
        .map(|item| {
            format!(
                "{:<16} {:<15} {:>3.0}%{}",
                item.key,
                item.label,
                item.significance * 100.0,
                if item.dwell { " dwell" } else { "" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let radar =
        Paragraph::new(radar).block(Block::default().title("Anomaly radar").borders(Borders::ALL));
    frame.render_widget(radar, rows[2]);

    render_board(frame, rows[3], app, &snapshot);

    let now = chrono::Utc::now().timestamp_millis();
    let slots = views::momentum_heatmap(&snapshot.recent_alerts, now);
    frame.render_widget(heatmap_chart(&slots), rows[4]);
}

// Roster board when toggled and a roster is loaded, confidence ticker otherwise.
fn render_board(frame: &mut Frame, area: Rect, app: &App, snapshot: &Snapshot) {
    let state = &app.state;
    let (title, text) = if app.board_view && !state.roster.is_empty() {
        let rows = views::volatility_board(snapshot, &state.roster, app.board_pool)
            .into_iter()
            .map(|row| {
                format!(
                    "{:<18} {:>3}% {}",
                    row.label,
                    row.confidence,
                    status_label(row.status)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        ("Roster board", rows)
    } else {
        let rows = views::confidence_ticker(snapshot, None)
            .into_iter()
            .map(|row| {
                format!(
                    "{:<14} {:<8} {:>3.0}% {:+.1}",
                    state.label_for(&row.player_id),
                    row.stat,
                    row.confidence,
                    row.delta
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        ("Confidence ticker", rows)
    };
    let board = Paragraph::new(text).block(Block::default().title(title).borders(Borders::ALL));
    frame.render_widget(board, area);
}

fn render_series(frame: &mut Frame, area: Rect, app: &App) {
    let key = app.selected_key();
    let title = key
        .as_deref()
        .map(|k| format!("Series {k}"))
        .unwrap_or_else(|| "Series".to_string());
    let data: Vec<u64> = key
        .as_ref()
        .and_then(|k| app.state.series.get(k))
        .map(|points| {
            points
                .iter()
                .map(|p| (p.v.max(0.0) * 10.0).round() as u64)
                .collect()
        })
        .unwrap_or_default();
    let spark = Sparkline::default()
        .block(Block::default().title(title).borders(Borders::ALL))
        .data(&data)
        .style(Style::default().fg(Color::Cyan));
    frame.render_widget(spark, area);
}

fn heatmap_chart(slots: &[u32; HEATMAP_SLOTS]) -> BarChart<'static> {
    let bars: Vec<Bar<'static>> = slots
        .iter()
        .map(|&count| {
            let color = match count {
                0 => Color::DarkGray,
                1 => Color::Green,
                2 => Color::Yellow,
                _ => Color::Red,
            };
            Bar::default()
                .value(u64::from(count).min(5))
                .text_value(String::new())
                .style(Style::default().fg(color))
        })
        .collect();

    BarChart::default()
        .block(Block::default().title("Alerts / 60s").borders(Borders::ALL))
        .data(BarGroup::default().bars(&bars))
        .bar_width(1)
        .bar_gap(0)
        .group_gap(0)
        .max(5)
}

fn render_console(frame: &mut Frame, area: Rect, state: &DeskState) {
    let visible = area.height.saturating_sub(2) as usize;
    let skip = state.logs.len().saturating_sub(visible);
    let text = state
        .logs
        .iter()
        .skip(skip)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");
    let console =
        Paragraph::new(text).block(Block::default().title("Console").borders(Borders::ALL));
    frame.render_widget(console, area);
}

fn visible_range(selected: usize, total: usize, visible: usize) -> (usize, usize) {
    if total == 0 {
        return (0, 0);
    }
    if total <= visible {
        return (0, total);
    }

    let mut start = selected.saturating_sub(visible / 2);
    if start + visible > total {
        start = total - visible;
    }
    (start, start + visible)
}

fn render_help_overlay(frame: &mut Frame, area: Rect) {
    let popup_area = centered_rect(60, 60, area);
    frame.render_widget(Clear, popup_area);

    let text = [
        "Signal Desk - Help",
        "",
        "  j/k or ↑/↓   Move selection",
        "  + / -        Risk dial ±5 (>60 promotes warnings, <30 demotes)",
        "  c            Toggle 2s cooldowns",
        "  v            Ticker / roster board",
        "  ?            Toggle help",
        "  q            Quit",
        "",
        "Status: ALERT / WARN / ok, ▲ marks a CUSUM drift tick",
    ]
    .join("\n");

    let help = Paragraph::new(text)
        .block(Block::default().title("Help").borders(Borders::ALL))
        .style(Style::default());
    frame.render_widget(help, popup_area);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

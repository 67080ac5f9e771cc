use crate::api::SimulationApi;
use crate::bootstrap::SubmitOutcome;
use crate::connection::Connector;
use crate::controller::Controller;
use crate::page::{InputField, Page, DIMENSION_ID, RUN_CONFIG_FORM_ID};
use crate::ui;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Gauge, Paragraph, Wrap},
};
use tarang_core::Severity;

#[derive(Clone, Copy)]
struct ConsoleTheme {
    bg: Color,
    surface: Color,
    border: Color,
    title: Color,
    text: Color,
    muted: Color,
    accent: Color,
    ok: Color,
    critical: Color,
    info: Color,
}

fn console_theme() -> ConsoleTheme {
    ConsoleTheme {
        bg: Color::Rgb(11, 18, 32),
        surface: Color::Rgb(17, 26, 46),
        border: Color::Rgb(71, 85, 105),
        title: Color::Rgb(191, 219, 254),
        text: Color::Rgb(226, 232, 240),
        muted: Color::Rgb(148, 163, 184),
        accent: Color::Rgb(56, 189, 248),
        ok: Color::Rgb(34, 197, 94),
        critical: Color::Rgb(239, 68, 68),
        info: Color::Rgb(59, 130, 246),
    }
}

/// Path prompt opened by `b` on a form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowsePrompt {
    pub field_id: String,
    pub input: String,
}

/// Terminal-only state; everything else lives in the page.
#[derive(Debug, Default)]
pub struct App {
    pub focus: usize,
    pub editing: bool,
    pub help_open: bool,
    pub prompt: Option<BrowsePrompt>,
}

impl App {
    pub fn focused_field<'a>(&self, page: &'a Page) -> Option<&'a InputField> {
        page.form(RUN_CONFIG_FORM_ID)?.fields.get(self.focus)
    }

    fn field_count(page: &Page) -> usize {
        page.form(RUN_CONFIG_FORM_ID)
            .map(|form| form.fields.len())
            .unwrap_or(0)
    }

    pub fn move_focus(&mut self, page: &Page, delta: isize) {
        let count = Self::field_count(page);
        if count == 0 {
            self.focus = 0;
            return;
        }
        let next = (self.focus as isize + delta).rem_euclid(count as isize);
        self.focus = next as usize;
        self.editing = false;
    }
}

/// Applies one key to a focused text field while editing.
pub fn edit_field(field: &mut InputField, code: KeyCode) {
    if field.disabled || field.is_select() {
        return;
    }
    match code {
        KeyCode::Char(ch) => field.value.push(ch),
        KeyCode::Backspace => {
            field.value.pop();
        }
        _ => {}
    }
    if field.invalid && !field.is_blank() {
        field.invalid = false;
    }
}

pub fn handle_input<A, C>(event: Event, app: &mut App, controller: &mut Controller<A, C>) -> bool
where
    A: SimulationApi,
    C: Connector,
{
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => handle_key(key, app, controller),
        _ => false,
    }
}

pub fn handle_key<A, C>(key: KeyEvent, app: &mut App, controller: &mut Controller<A, C>) -> bool
where
    A: SimulationApi,
    C: Connector,
{
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return true;
    }

    if let Some(prompt) = app.prompt.as_mut() {
        match key.code {
            KeyCode::Enter => {
                if let Some(prompt) = app.prompt.take() {
                    controller.browse_files(&prompt.field_id, Some(&prompt.input));
                }
            }
            KeyCode::Esc => {
                if let Some(prompt) = app.prompt.take() {
                    controller.browse_files(&prompt.field_id, None);
                }
            }
            KeyCode::Backspace => {
                prompt.input.pop();
            }
            KeyCode::Char(ch) => prompt.input.push(ch),
            _ => {}
        }
        return false;
    }

    if app.editing {
        match key.code {
            KeyCode::Enter | KeyCode::Esc | KeyCode::Tab => app.editing = false,
            code => {
                if let Some(id) = app.focused_field(controller.page()).map(|f| f.id.clone()) {
                    if let Some(field) = controller.state_mut().page.field_mut(&id) {
                        edit_field(field, code);
                    }
                }
            }
        }
        return false;
    }

    if matches!(key.code, KeyCode::Char('?') | KeyCode::F(1)) {
        app.help_open = !app.help_open;
        return false;
    }
    if key.code == KeyCode::Esc && app.help_open {
        app.help_open = false;
        return false;
    }
    if app.help_open {
        return false;
    }

    match key.code {
        KeyCode::Char('q') => return true,
        KeyCode::Char('s') => {
            if !controller.page().start_btn.as_ref().map(|b| b.disabled).unwrap_or(false) {
                controller.start_simulation();
            }
        }
        KeyCode::Char('x') => {
            controller.stop_simulation();
        }
        KeyCode::Char('r') => {
            controller.refresh_process_status();
        }
        KeyCode::Char('w') => {
            if let SubmitOutcome::Blocked { invalid } = controller.submit_run_config() {
                if let Some(idx) = controller.page().form(RUN_CONFIG_FORM_ID).and_then(|form| {
                    form.fields.iter().position(|f| invalid.first() == Some(&f.id))
                }) {
                    app.focus = idx;
                }
            }
        }
        KeyCode::Tab | KeyCode::Down | KeyCode::Char('j') => app.move_focus(controller.page(), 1),
        KeyCode::BackTab | KeyCode::Up | KeyCode::Char('k') => {
            app.move_focus(controller.page(), -1)
        }
        KeyCode::Left | KeyCode::Right => {
            let forward = key.code == KeyCode::Right;
            let id = app.focused_field(controller.page()).map(|f| f.id.clone());
            match id.as_deref() {
                Some(DIMENSION_ID) => {
                    controller.cycle_dimension(forward);
                }
                Some(id) => {
                    if let Some(field) = controller.state_mut().page.field_mut(id) {
                        if !field.disabled {
                            field.cycle_option(forward);
                        }
                    }
                }
                None => {}
            }
        }
        KeyCode::Enter => {
            if let Some(field) = app.focused_field(controller.page()) {
                app.editing = !field.disabled && !field.is_select();
            }
        }
        KeyCode::Char('b') => {
            if let Some(field) = app.focused_field(controller.page()) {
                if !field.disabled && !field.is_select() {
                    app.prompt = Some(BrowsePrompt {
                        field_id: field.id.clone(),
                        input: String::new(),
                    });
                }
            }
        }
        KeyCode::Esc => {
            ui::dismiss_latest_notification(&mut controller.state_mut().page);
        }
        _ => {}
    }
    false
}

pub fn render_ui(frame: &mut ratatui::Frame, page: &Page, app: &App) {
    let size = frame.size();
    let theme = console_theme();
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Length(3),
            Constraint::Min(0),
        ])
        .split(size);
    frame.render_widget(render_header(page, theme), layout[0]);
    frame.render_widget(render_progress(page, theme), layout[1]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(38), Constraint::Percentage(62)])
        .split(layout[2]);
    frame.render_widget(render_form(page, app, theme), body[0]);
    frame.render_widget(render_transcript(page, theme, body[1]), body[1]);

    render_notifications(frame, page, theme);
    if let Some(prompt) = &app.prompt {
        render_prompt(frame, prompt, theme);
    }
    if app.help_open {
        render_help_overlay(frame, theme);
    }
}

fn titled_block(title: &str, theme: ConsoleTheme, bg: Color) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.border))
        .style(Style::default().bg(bg))
        .title(Span::styled(
            title.to_string(),
            Style::default()
                .fg(theme.title)
                .add_modifier(Modifier::BOLD),
        ))
}

fn class_color(class: &str, theme: ConsoleTheme) -> Color {
    match class {
        "text-success" | "status-running" | "status-completed" => theme.ok,
        "text-danger" | "status-error" => theme.critical,
        "status-stopped" => theme.accent,
        _ => theme.muted,
    }
}

fn render_header(page: &Page, theme: ConsoleTheme) -> Paragraph<'static> {
    let mut lines = Vec::new();
    if let Some(connection) = &page.connection_status {
        lines.push(Line::from(vec![
            Span::styled("Server: ", Style::default().fg(theme.muted)),
            Span::styled(
                connection.text.clone(),
                Style::default().fg(class_color(&connection.class, theme)),
            ),
        ]));
    }
    if let Some(status) = &page.status {
        lines.push(Line::from(vec![
            Span::styled("Status: ", Style::default().fg(theme.muted)),
            Span::styled(
                status.text.clone(),
                Style::default().fg(class_color(&status.class, theme)),
            ),
        ]));
    }
    Paragraph::new(Text::from(lines))
        .style(Style::default().fg(theme.text).bg(theme.bg))
        .block(titled_block("Tarang", theme, theme.bg))
}

fn render_progress(page: &Page, theme: ConsoleTheme) -> Gauge<'static> {
    let (ratio, label) = page
        .progress_bar
        .as_ref()
        .map(|bar| (bar.width_percent / 100.0, bar.text.clone()))
        .unwrap_or((0.0, String::new()));
    Gauge::default()
        .block(titled_block("Progress", theme, theme.surface))
        .gauge_style(Style::default().fg(theme.accent).bg(theme.surface))
        .ratio(ratio.clamp(0.0, 1.0))
        .label(label)
}

fn render_form(page: &Page, app: &App, theme: ConsoleTheme) -> Paragraph<'static> {
    let mut lines = Vec::new();
    if let Some(form) = page.form(RUN_CONFIG_FORM_ID) {
        for (idx, field) in form.fields.iter().enumerate() {
            let focused = idx == app.focus;
            let marker = if focused && app.editing {
                "✎ "
            } else if focused {
                "> "
            } else {
                "  "
            };
            let value = if field.is_select() {
                format!("< {} >", field.value)
            } else {
                field.value.clone()
            };
            let value_color = if field.invalid {
                theme.critical
            } else if field.disabled {
                theme.muted
            } else {
                theme.text
            };
            let required = if field.required && !field.disabled { "*" } else { "" };
            lines.push(Line::from(vec![
                Span::styled(marker, Style::default().fg(theme.accent)),
                Span::styled(
                    format!("{:<12}", format!("{}{}", field.label, required)),
                    Style::default().fg(theme.muted),
                ),
                Span::styled(value, Style::default().fg(value_color)),
            ]));
        }
    }
    let controls = [
        (&page.start_btn, "s"),
        (&page.stop_btn, "x"),
    ];
    lines.push(Line::from(""));
    let mut spans = Vec::new();
    for (button, key) in controls {
        if let Some(button) = button {
            let style = if button.disabled {
                Style::default().fg(theme.muted)
            } else {
                Style::default().fg(theme.ok).add_modifier(Modifier::BOLD)
            };
            spans.push(Span::styled(format!("[{key}] {}  ", button.label), style));
        }
    }
    lines.push(Line::from(spans));
    Paragraph::new(Text::from(lines))
        .style(Style::default().fg(theme.text).bg(theme.surface))
        .block(titled_block("Run Configuration", theme, theme.surface))
}

fn render_transcript(page: &Page, theme: ConsoleTheme, area: Rect) -> Paragraph<'static> {
    let visible = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line<'static>> = page
        .output
        .as_ref()
        .map(|output| {
            let all = output.lines();
            let start = all.len().saturating_sub(visible);
            all[start..].iter().map(|line| Line::from(line.clone())).collect()
        })
        .unwrap_or_default();
    Paragraph::new(Text::from(lines))
        .style(Style::default().fg(theme.text).bg(theme.surface))
        .block(titled_block("Simulation Output", theme, theme.surface))
}

fn severity_color(severity: Severity, theme: ConsoleTheme) -> Color {
    match severity {
        Severity::Success => theme.ok,
        Severity::Error => theme.critical,
        Severity::Info => theme.info,
    }
}

fn render_notifications(frame: &mut ratatui::Frame, page: &Page, theme: ConsoleTheme) {
    let size = frame.size();
    let width = size.width.min(48);
    let mut y = size.y + 1;
    for notification in page.notifications().iter().rev() {
        if y + 3 > size.y + size.height {
            break;
        }
        let area = Rect {
            x: size.x + size.width.saturating_sub(width + 1),
            y,
            width,
            height: 3,
        };
        let color = severity_color(notification.severity, theme);
        frame.render_widget(Clear, area);
        frame.render_widget(
            Paragraph::new(notification.message.clone())
                .style(Style::default().fg(theme.text).bg(theme.surface))
                .block(
                    Block::default()
                        .borders(Borders::ALL)
                        .border_style(Style::default().fg(color)),
                )
                .wrap(Wrap { trim: true }),
            area,
        );
        y += 3;
    }
}

fn render_prompt(frame: &mut ratatui::Frame, prompt: &BrowsePrompt, theme: ConsoleTheme) {
    let area = centered_rect(60, 20, frame.size());
    let lines = vec![
        Line::from(Span::styled(
            "Enter the path to your data directory (empty for default):",
            Style::default().fg(theme.muted),
        )),
        Line::from(Span::styled(
            format!("{}_", prompt.input),
            Style::default().fg(theme.text),
        )),
    ];
    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(Text::from(lines))
            .style(Style::default().fg(theme.text).bg(theme.surface))
            .block(titled_block("Browse", theme, theme.surface)),
        area,
    );
}

fn render_help_overlay(frame: &mut ratatui::Frame, theme: ConsoleTheme) {
    let area = centered_rect(70, 60, frame.size());
    let heading = |text: &'static str| {
        Line::from(Span::styled(
            text,
            Style::default()
                .fg(theme.accent)
                .add_modifier(Modifier::BOLD),
        ))
    };
    let lines = vec![
        heading("Simulation"),
        Line::from("  s        start simulation"),
        Line::from("  x        stop current simulation"),
        Line::from("  r        query process status"),
        Line::from(""),
        heading("Run Configuration"),
        Line::from("  Tab/j/k  move between fields"),
        Line::from("  Enter    edit text field"),
        Line::from("  ←/→      change selection"),
        Line::from("  b        browse for a path"),
        Line::from("  w        save run configuration"),
        Line::from(""),
        heading("Session & Exit"),
        Line::from("  Esc      dismiss newest notification"),
        Line::from("  ? or F1  toggle this help"),
        Line::from("  q        quit"),
    ];
    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(Text::from(lines))
            .style(Style::default().fg(theme.text).bg(theme.surface))
            .block(titled_block("Help", theme, theme.surface))
            .wrap(Wrap { trim: false }),
        area,
    );
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100u16.saturating_sub(percent_y)) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100u16.saturating_sub(percent_y)) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100u16.saturating_sub(percent_x)) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100u16.saturating_sub(percent_x)) / 2),
        ])
        .split(vertical[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{NX_ID, OUTPUT_PATH_ID};
    use ratatui::{backend::TestBackend, Terminal};

    fn buffer_text(terminal: &Terminal<TestBackend>) -> String {
        let buffer = terminal.backend().buffer();
        let mut out = String::new();
        for y in 0..buffer.area.height {
            for x in 0..buffer.area.width {
                out.push_str(buffer.get(x, y).symbol());
            }
            out.push('\n');
        }
        out
    }

    #[test]
    fn focus_wraps_around_form() {
        let page = Page::simulation();
        let mut app = App::default();
        app.move_focus(&page, -1);
        assert_eq!(app.focused_field(&page).map(|f| f.id.as_str()), Some(OUTPUT_PATH_ID));
        app.move_focus(&page, 1);
        assert_eq!(app.focus, 0);
    }

    #[test]
    fn editing_clears_invalid_marker() {
        let mut field = InputField::text(NX_ID, "Nx", "").required();
        field.invalid = true;
        edit_field(&mut field, KeyCode::Char('8'));
        assert_eq!(field.value, "8");
        assert!(!field.invalid);
        edit_field(&mut field, KeyCode::Backspace);
        assert!(field.value.is_empty());

        let mut locked = InputField::text(NX_ID, "Nx", "1");
        locked.disabled = true;
        edit_field(&mut locked, KeyCode::Char('2'));
        assert_eq!(locked.value, "1");
    }

    #[test]
    fn renders_status_and_transcript() {
        let mut page = Page::simulation();
        ui::update_connection_status(&mut page, true);
        if let Some(output) = page.output.as_mut() {
            output.append_block(vec!["Starting simulation with Process ID: 12".to_string()]);
            output.scroll_to_end();
        }
        let backend = TestBackend::new(100, 30);
        let mut terminal = Terminal::new(backend).expect("terminal");
        terminal
            .draw(|frame| render_ui(frame, &page, &App::default()))
            .expect("draw");
        let text = buffer_text(&terminal);
        assert!(text.contains("Connected"));
        assert!(text.contains("Process ID: 12"));
        assert!(text.contains("Run Configuration"));
    }
}

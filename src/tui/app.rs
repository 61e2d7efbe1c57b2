#![forbid(unsafe_code)]

use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Block, Borders, Cell, Clear, Paragraph, Row, Table, TableState, Tabs, Wrap,
};
use tokio::sync::watch;

use crate::session::Session;
use crate::task::due_date;
use crate::task::model::{Task, TaskCounts, TaskFilter};
use crate::tui;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    Editor,
    Confirm,
}

#[derive(Debug, Clone)]
struct TextInput {
    text: String,
    cursor: usize,
}

impl TextInput {
    fn new(initial: impl Into<String>) -> Self {
        let text = initial.into();
        let cursor = text.chars().count();
        Self { text, cursor }
    }

    fn as_str(&self) -> &str {
        &self.text
    }

    fn insert_char(&mut self, c: char) {
        let mut chars: Vec<char> = self.text.chars().collect();
        let cur = self.cursor.min(chars.len());
        chars.insert(cur, c);
        self.text = chars.into_iter().collect();
        self.cursor = cur + 1;
    }

    fn backspace(&mut self) {
        let mut chars: Vec<char> = self.text.chars().collect();
        let cur = self.cursor.min(chars.len());
        if cur == 0 {
            return;
        }
        chars.remove(cur - 1);
        self.text = chars.into_iter().collect();
        self.cursor = cur - 1;
    }

    fn delete(&mut self) {
        let mut chars: Vec<char> = self.text.chars().collect();
        let cur = self.cursor.min(chars.len());
        if cur >= chars.len() {
            return;
        }
        chars.remove(cur);
        self.text = chars.into_iter().collect();
    }

    fn move_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    fn move_right(&mut self) {
        let len = self.text.chars().count();
        self.cursor = (self.cursor + 1).min(len);
    }

    fn move_home(&mut self) {
        self.cursor = 0;
    }

    fn move_end(&mut self) {
        self.cursor = self.text.chars().count();
    }
}

#[derive(Debug, Clone)]
struct ConfirmDialog {
    title: String,
    message: String,
    action: ConfirmAction,
}

#[derive(Debug, Clone)]
enum ConfirmAction {
    DeleteTask { id: String, title: String },
}

#[derive(Debug, Clone)]
struct Toast {
    message: String,
    until: Instant,
}

impl Toast {
    fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            until: Instant::now() + Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditorField {
    Title,
    Description,
    Due,
}

impl EditorField {
    fn next(self) -> Self {
        match self {
            EditorField::Title => EditorField::Description,
            EditorField::Description => EditorField::Due,
            EditorField::Due => EditorField::Title,
        }
    }

    fn prev(self) -> Self {
        match self {
            EditorField::Title => EditorField::Due,
            EditorField::Description => EditorField::Title,
            EditorField::Due => EditorField::Description,
        }
    }
}

/// Create and edit share one dialog; `original` is `None` for a new task.
/// `id` is fixed when the dialog opens so a retried save targets the same task.
#[derive(Debug, Clone)]
struct EditorDialog {
    id: String,
    original: Option<Task>,
    title: TextInput,
    description: TextInput,
    due: TextInput,
    completed: bool,
    field: EditorField,
    error: Option<String>,
}

impl EditorDialog {
    fn create() -> Self {
        Self {
            id: Task::new_id(),
            original: None,
            title: TextInput::new(""),
            description: TextInput::new(""),
            due: TextInput::new(""),
            completed: false,
            field: EditorField::Title,
            error: None,
        }
    }

    fn edit(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            original: Some(task.clone()),
            title: TextInput::new(task.title.clone()),
            description: TextInput::new(task.description.clone().unwrap_or_default()),
            due: TextInput::new(
                task.due_date
                    .as_deref()
                    .map(due_date::format_display)
                    .unwrap_or_default(),
            ),
            completed: task.completed,
            field: EditorField::Title,
            error: None,
        }
    }

    fn input_mut(&mut self) -> &mut TextInput {
        match self.field {
            EditorField::Title => &mut self.title,
            EditorField::Description => &mut self.description,
            EditorField::Due => &mut self.due,
        }
    }

    /// Validates the form and builds the task to save.
    fn build(&self, today: time::Date) -> Result<Task, (EditorField, String)> {
        let title = self.title.as_str().trim();
        if title.is_empty() {
            return Err((EditorField::Title, "Title is required".to_owned()));
        }

        let due_raw = self.due.as_str().trim();
        let original_due = self.original.as_ref().and_then(|t| t.due_date.as_deref());
        let due_date = if due_raw.is_empty() {
            None
        } else if let Some(stored) = original_due
            && due_date::format_display(stored) == due_raw
        {
            // Untouched; an already past date stays editable.
            Some(stored.to_owned())
        } else {
            Some(
                due_date::parse_input(due_raw, today)
                    .map_err(|e| (EditorField::Due, e.to_string()))?,
            )
        };

        let description = self.description.as_str().trim();
        let description = (!description.is_empty()).then(|| description.to_owned());

        Ok(Task {
            id: self.id.clone(),
            title: title.to_owned(),
            description,
            completed: self.completed,
            due_date,
        })
    }
}

#[derive(Debug)]
struct AppState<'a> {
    session: &'a Session,
    updates: watch::Receiver<Vec<Task>>,

    mode: Mode,
    filter: TaskFilter,

    tasks: Vec<Task>,
    visible: Vec<Task>,
    table_state: TableState,

    editor: Option<EditorDialog>,
    confirm: Option<ConfirmDialog>,

    toast: Option<Toast>,
    last_error: Option<String>,
    should_quit: bool,
}

impl<'a> AppState<'a> {
    fn new(session: &'a Session) -> Self {
        let mut updates = session.store.subscribe();
        let tasks = updates.borrow_and_update().clone();
        let filter = session.cfg.ui.default_filter;
        let mut app = Self {
            session,
            updates,
            mode: Mode::Normal,
            filter,
            tasks,
            visible: Vec::new(),
            table_state: TableState::default(),
            editor: None,
            confirm: None,
            toast: None,
            last_error: None,
            should_quit: false,
        };
        app.rebuild_visible();
        app
    }

    /// Picks up whatever the store published since the last frame.
    fn sync_from_store(&mut self) {
        if self.updates.has_changed().unwrap_or(false) {
            self.tasks = self.updates.borrow_and_update().clone();
            self.rebuild_visible();
        }
    }

    fn rebuild_visible(&mut self) {
        let selected_id = self.selected_task().map(|t| t.id.clone());
        self.visible = self.filter.apply(&self.tasks);

        let idx = selected_id
            .and_then(|id| self.visible.iter().position(|t| t.id == id))
            .or_else(|| self.table_state.selected());
        self.table_state.select(idx);
        self.clamp_selection();
    }

    fn set_filter(&mut self, filter: TaskFilter) {
        if self.filter != filter {
            self.filter = filter;
            self.table_state.select(Some(0));
            self.rebuild_visible();
        }
    }

    fn selected_index(&self) -> usize {
        self.table_state.selected().unwrap_or(0)
    }

    fn selected_task(&self) -> Option<&Task> {
        self.visible.get(self.selected_index())
    }

    fn clamp_selection(&mut self) {
        if self.visible.is_empty() {
            self.table_state.select(None);
            return;
        }
        let idx = self.selected_index().min(self.visible.len() - 1);
        self.table_state.select(Some(idx));
    }

    fn move_selection(&mut self, delta: isize) {
        if self.visible.is_empty() {
            return;
        }
        let max = self.visible.len() - 1;
        let idx = self.selected_index().saturating_add_signed(delta).min(max);
        self.table_state.select(Some(idx));
    }

    fn effective_mode(&self) -> Mode {
        if self.confirm.is_some() {
            Mode::Confirm
        } else if self.editor.is_some() {
            Mode::Editor
        } else {
            self.mode
        }
    }
}

pub async fn run(session: &Session) -> anyhow::Result<()> {
    let terminal = tui::init_terminal()?;
    let mut guard = TerminalGuard::new(terminal);

    let mut app = AppState::new(session);

    loop {
        if let Some(toast) = &app.toast
            && Instant::now() >= toast.until
        {
            app.toast = None;
        }

        app.sync_from_store();

        {
            let Some(terminal) = guard.terminal.as_mut() else {
                anyhow::bail!("terminal unavailable");
            };
            terminal.draw(|f| draw(f, &mut app))?;
        }

        if app.should_quit {
            break;
        }

        if event::poll(Duration::from_millis(50))?
            && let Event::Key(key) = event::read()?
        {
            handle_key(key, &mut app).await;
        }
    }

    Ok(())
}

fn draw(f: &mut Frame<'_>, app: &mut AppState<'_>) {
    let area = f.area();

    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(1),
            Constraint::Min(1),
            Constraint::Length(1),
        ])
        .split(area);

    let counts = TaskCounts::of(&app.tasks);
    draw_header(f, root[0], counts);
    draw_tabs(f, root[1], app.filter, counts);
    draw_body(f, root[2], app);
    draw_footer(f, root[3], app);

    if let Some(confirm) = &app.confirm {
        draw_confirm(f, confirm);
    } else if let Some(editor) = &app.editor {
        draw_editor(f, editor);
    }
}

fn draw_header(f: &mut Frame<'_>, area: Rect, counts: TaskCounts) {
    let lines = vec![
        Line::from(Span::styled(
            "Tasks",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(
            counts.summary(),
            Style::default().fg(Color::DarkGray),
        )),
    ];
    f.render_widget(Paragraph::new(lines), area);
}

fn draw_tabs(f: &mut Frame<'_>, area: Rect, current: TaskFilter, counts: TaskCounts) {
    let titles: Vec<Line> = TaskFilter::ALL
        .iter()
        .enumerate()
        .map(|(i, t)| {
            Line::from(format!(
                "{} [{}] ({})",
                t.title(),
                i + 1,
                counts.for_filter(*t)
            ))
        })
        .collect();

    let selected = TaskFilter::ALL
        .iter()
        .position(|t| *t == current)
        .unwrap_or(0);

    let tabs = Tabs::new(titles)
        .select(selected)
        .style(Style::default().fg(Color::Gray))
        .highlight_style(
            Style::default()
                .fg(Color::Black)
                .bg(Color::LightBlue)
                .add_modifier(Modifier::BOLD),
        )
        .divider(" | ");

    f.render_widget(tabs, area);
}

fn draw_body(f: &mut Frame<'_>, area: Rect, app: &mut AppState<'_>) {
    let layout = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(area);

    draw_task_table(f, layout[0], app);
    draw_task_detail(f, layout[1], app);
}

fn draw_task_table(f: &mut Frame<'_>, area: Rect, app: &mut AppState<'_>) {
    let today = due_date::today_utc();
    let icons = app.session.cfg.ui.icons;

    let headers = Row::new(vec!["", "TITLE", "DUE"])
        .style(Style::default().add_modifier(Modifier::BOLD));

    let rows = app.visible.iter().map(|t| {
        let title_style = if t.completed {
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::CROSSED_OUT)
        } else {
            Style::default()
        };
        let (due, due_style) = match t.due_date.as_deref() {
            Some(d) if !t.completed && due_date::is_overdue(d, today) => (
                due_date::format_display(d),
                Style::default().fg(Color::Red),
            ),
            Some(d) => (due_date::format_display(d), Style::default()),
            None => ("-".to_owned(), Style::default().fg(Color::DarkGray)),
        };
        Row::new(vec![
            Cell::from(checkbox(t.completed, icons)),
            Cell::from(t.title.clone()).style(title_style),
            Cell::from(due).style(due_style),
        ])
    });

    let empty_hint = if app.tasks.is_empty() {
        "Tasks (press n to create one)".to_owned()
    } else {
        format!("Tasks: {}", app.filter.title())
    };

    let table = Table::new(
        rows,
        vec![
            Constraint::Length(4),
            Constraint::Min(10),
            Constraint::Length(12),
        ],
    )
    .header(headers)
    .block(Block::default().borders(Borders::ALL).title(empty_hint))
    .row_highlight_style(
        Style::default()
            .fg(Color::Black)
            .bg(Color::LightBlue)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("▸ ");

    f.render_stateful_widget(table, area, &mut app.table_state);
}

fn draw_task_detail(f: &mut Frame<'_>, area: Rect, app: &AppState<'_>) {
    let block = Block::default().borders(Borders::ALL).title("Details");
    let inner = block.inner(area);
    f.render_widget(block, area);

    let Some(t) = app.selected_task() else {
        let msg = if app.tasks.is_empty() {
            TaskCounts::default().summary()
        } else {
            format!("No {} tasks.", app.filter)
        };
        f.render_widget(Paragraph::new(msg).wrap(Wrap { trim: true }), inner);
        return;
    };

    let bold = Style::default().add_modifier(Modifier::BOLD);
    let due = t.due_date.as_deref().map_or_else(
        || "-".to_owned(),
        |d| {
            if !t.completed && due_date::is_overdue(d, due_date::today_utc()) {
                format!("{} (overdue)", due_date::format_display(d))
            } else {
                due_date::format_display(d)
            }
        },
    );

    let lines = vec![
        Line::from(vec![Span::styled("Task: ", bold), Span::raw(t.title.as_str())]),
        Line::from(format!("ID: {}", t.id)),
        Line::from(format!(
            "Status: {}",
            if t.completed { "completed" } else { "pending" }
        )),
        Line::from(format!("Due: {due}")),
        Line::from(""),
        Line::from(Span::styled("Description:", bold)),
        Line::from(t.description.as_deref().unwrap_or("-")),
    ];

    f.render_widget(Paragraph::new(lines).wrap(Wrap { trim: false }), inner);
}

fn draw_footer(f: &mut Frame<'_>, area: Rect, app: &AppState<'_>) {
    let mut left = match app.effective_mode() {
        Mode::Normal => "q quit • Tab/f filter • 1-3 filters • j/k move • n new • e edit • space toggle • D delete • r reload".to_owned(),
        Mode::Editor => "Enter next/save • Tab switch field • Ctrl-T completed • Esc cancel".to_owned(),
        Mode::Confirm => "y delete • n cancel".to_owned(),
    };

    if let Some(err) = &app.last_error {
        left = format!("Error: {err}");
    } else if let Some(toast) = &app.toast {
        left.clone_from(&toast.message);
    }

    let p = Paragraph::new(Line::from(Span::styled(
        left,
        Style::default().fg(Color::White).bg(Color::Blue),
    )))
    .style(Style::default().bg(Color::Blue));
    f.render_widget(p, area);
}

fn draw_confirm(f: &mut Frame<'_>, confirm: &ConfirmDialog) {
    let area = centered_rect(60, 25, f.area());
    f.render_widget(Clear, area);
    let block = Block::default()
        .borders(Borders::ALL)
        .title(confirm.title.as_str());
    let inner = block.inner(area);
    f.render_widget(block, area);

    let lines = vec![
        Line::from(confirm.message.clone()),
        Line::from(""),
        Line::from("[y] Delete    [n] Cancel"),
    ];
    f.render_widget(
        Paragraph::new(lines)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true }),
        inner,
    );
}

fn draw_editor(f: &mut Frame<'_>, dialog: &EditorDialog) {
    let area = centered_rect(70, 40, f.area());
    f.render_widget(Clear, area);
    let title = if dialog.original.is_some() {
        "Edit task"
    } else {
        "New task"
    };
    let block = Block::default().borders(Borders::ALL).title(title);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let bold = Style::default().add_modifier(Modifier::BOLD);
    let active_style = Style::default()
        .fg(Color::Yellow)
        .add_modifier(Modifier::BOLD);
    let style_for = |field: EditorField| {
        if dialog.field == field {
            active_style
        } else {
            Style::default()
        }
    };

    let mut lines = vec![
        Line::from(vec![
            Span::styled(EDITOR_LABELS[0], bold),
            Span::styled(dialog.title.as_str(), style_for(EditorField::Title)),
        ]),
        Line::from(vec![
            Span::styled(EDITOR_LABELS[1], bold),
            Span::styled(
                dialog.description.as_str(),
                style_for(EditorField::Description),
            ),
        ]),
        Line::from(vec![
            Span::styled(EDITOR_LABELS[2], bold),
            Span::styled(dialog.due.as_str(), style_for(EditorField::Due)),
            Span::styled("  (YYYY-MM-DD)", Style::default().fg(Color::DarkGray)),
        ]),
        Line::from(vec![
            Span::styled(EDITOR_LABELS[3], bold),
            Span::raw(if dialog.completed { "[x]" } else { "[ ]" }),
            Span::styled("  Ctrl-T", Style::default().fg(Color::DarkGray)),
        ]),
    ];

    if let Some(err) = dialog.error.as_deref() {
        lines.push(Line::from(""));
        lines.push(Line::from(vec![
            Span::styled(
                "Error: ",
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            ),
            Span::styled(err, Style::default().fg(Color::Red)),
        ]));
    }

    f.render_widget(Paragraph::new(lines), inner);

    let (line_idx, input) = match dialog.field {
        EditorField::Title => (0u16, &dialog.title),
        EditorField::Description => (1, &dialog.description),
        EditorField::Due => (2, &dialog.due),
    };
    let prefix_len = EDITOR_LABELS[usize::from(line_idx)].chars().count();
    let x = inner.x
        + u16::try_from(prefix_len).unwrap_or(0)
        + cursor_x_for_text(input.as_str(), input.cursor);
    let y = inner.y + line_idx;
    f.set_cursor_position((x, y));
}

const EDITOR_LABELS: [&str; 4] = [
    "Title:       ",
    "Description: ",
    "Due:         ",
    "Completed:   ",
];

async fn handle_key(key: KeyEvent, app: &mut AppState<'_>) {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        app.should_quit = true;
        return;
    }

    match app.effective_mode() {
        Mode::Confirm => handle_confirm_key(key, app).await,
        Mode::Editor => handle_editor_key(key, app).await,
        Mode::Normal => handle_normal_key(key, app).await,
    }
}

async fn handle_normal_key(key: KeyEvent, app: &mut AppState<'_>) {
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => app.should_quit = true,
        KeyCode::Tab | KeyCode::Char('f') => app.set_filter(app.filter.next()),
        KeyCode::BackTab => app.set_filter(app.filter.prev()),
        KeyCode::Char('1') => app.set_filter(TaskFilter::All),
        KeyCode::Char('2') => app.set_filter(TaskFilter::Completed),
        KeyCode::Char('3') => app.set_filter(TaskFilter::Pending),
        KeyCode::Char('j') | KeyCode::Down => app.move_selection(1),
        KeyCode::Char('k') | KeyCode::Up => app.move_selection(-1),
        KeyCode::Char('g') | KeyCode::Home => app.table_state.select(Some(0)),
        KeyCode::Char('G') | KeyCode::End => {
            app.table_state.select(Some(app.visible.len().saturating_sub(1)));
        }
        KeyCode::Char('n') => {
            app.last_error = None;
            app.editor = Some(EditorDialog::create());
            app.mode = Mode::Editor;
        }
        KeyCode::Char('e') | KeyCode::Enter => {
            if let Some(dialog) = app.selected_task().map(EditorDialog::edit) {
                app.editor = Some(dialog);
                app.last_error = None;
                app.mode = Mode::Editor;
            }
        }
        KeyCode::Char(' ') => toggle_selected(app).await,
        KeyCode::Char('D') | KeyCode::Delete => {
            if let Some(task) = app.selected_task() {
                let (id, title) = (task.id.clone(), task.title.clone());
                if app.session.cfg.ui.confirm_delete {
                    app.confirm = Some(ConfirmDialog {
                        title: "Delete task".to_owned(),
                        message: format!("Delete '{title}'? This cannot be undone."),
                        action: ConfirmAction::DeleteTask { id, title },
                    });
                    app.mode = Mode::Confirm;
                } else {
                    delete_task(app, &id, &title).await;
                }
            }
        }
        KeyCode::Char('r') => match app.session.reload().await {
            Ok(()) => {
                app.last_error = None;
                app.toast = Some(Toast::info("Reloaded from storage"));
            }
            Err(e) => app.last_error = Some(e.to_string()),
        },
        _ => {}
    }
}

async fn toggle_selected(app: &mut AppState<'_>) {
    let Some(mut task) = app.selected_task().cloned() else {
        return;
    };
    task.completed = !task.completed;
    let msg = if task.completed {
        format!("Completed '{}'", task.title)
    } else {
        format!("Reopened '{}'", task.title)
    };
    match app.session.store.update_task(task).await {
        Ok(()) => {
            app.last_error = None;
            app.toast = Some(Toast::info(msg));
        }
        Err(e) => app.last_error = Some(e.to_string()),
    }
}

async fn delete_task(app: &mut AppState<'_>, id: &str, title: &str) {
    match app.session.store.delete_task(id).await {
        Ok(()) => {
            app.last_error = None;
            app.toast = Some(Toast::info(format!("Deleted '{title}'")));
        }
        Err(e) => app.last_error = Some(e.to_string()),
    }
}

async fn handle_confirm_key(key: KeyEvent, app: &mut AppState<'_>) {
    match key.code {
        KeyCode::Char('n') | KeyCode::Esc => {
            app.confirm = None;
            app.mode = Mode::Normal;
        }
        KeyCode::Char('y') => {
            let Some(confirm) = app.confirm.take() else {
                app.mode = Mode::Normal;
                return;
            };
            app.mode = Mode::Normal;
            match confirm.action {
                ConfirmAction::DeleteTask { id, title } => delete_task(app, &id, &title).await,
            }
        }
        _ => {}
    }
}

async fn handle_editor_key(key: KeyEvent, app: &mut AppState<'_>) {
    let Some(dialog) = app.editor.as_mut() else {
        app.mode = Mode::Normal;
        return;
    };

    match key.code {
        KeyCode::Esc => {
            app.editor = None;
            app.mode = Mode::Normal;
        }
        KeyCode::Tab | KeyCode::Down => {
            dialog.field = dialog.field.next();
        }
        KeyCode::BackTab | KeyCode::Up => {
            dialog.field = dialog.field.prev();
        }
        KeyCode::Char('t') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            dialog.completed = !dialog.completed;
        }
        KeyCode::Enter => {
            if dialog.field != EditorField::Due {
                dialog.field = dialog.field.next();
                return;
            }
            save_editor(app).await;
        }
        _ => {
            dialog.error = None;
            handle_text_input_key(key, dialog.input_mut());
        }
    }
}

async fn save_editor(app: &mut AppState<'_>) {
    let Some(dialog) = app.editor.as_mut() else {
        return;
    };

    let task = match dialog.build(due_date::today_utc()) {
        Ok(task) => task,
        Err((field, msg)) => {
            dialog.field = field;
            dialog.error = Some(msg);
            return;
        }
    };
    let is_new = dialog.original.is_none();
    let title = task.title.clone();

    // A failed optimistic add already left the task in memory.
    let res = if is_new && app.session.store.get(&task.id).is_none() {
        app.session.store.add_task(task).await
    } else {
        app.session.store.update_task(task).await
    };

    match res {
        Ok(()) => {
            app.editor = None;
            app.mode = Mode::Normal;
            app.last_error = None;
            let verb = if is_new { "Added" } else { "Saved" };
            app.toast = Some(Toast::info(format!("{verb} '{title}'")));
        }
        Err(e) => {
            if let Some(dialog) = app.editor.as_mut() {
                dialog.error = Some(e.to_string());
            }
        }
    }
}

fn handle_text_input_key(key: KeyEvent, input: &mut TextInput) {
    match key.code {
        KeyCode::Backspace => input.backspace(),
        KeyCode::Delete => input.delete(),
        KeyCode::Left => input.move_left(),
        KeyCode::Right => input.move_right(),
        KeyCode::Home => input.move_home(),
        KeyCode::End => input.move_end(),
        KeyCode::Char(c) => {
            if !key.modifiers.contains(KeyModifiers::CONTROL)
                && !key.modifiers.contains(KeyModifiers::ALT)
            {
                input.insert_char(c);
            }
        }
        _ => {}
    }
}

fn checkbox(completed: bool, icons: bool) -> &'static str {
    match (icons, completed) {
        (true, true) => "✓",
        (true, false) => "○",
        (false, true) => "[x]",
        (false, false) => "[ ]",
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
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

fn cursor_x_for_text(text: &str, cursor: usize) -> u16 {
    u16::try_from(text.chars().take(cursor).count()).unwrap_or(0)
}

struct TerminalGuard {
    terminal: Option<ratatui::Terminal<ratatui::backend::CrosstermBackend<std::io::Stdout>>>,
}

impl TerminalGuard {
    fn new(
        terminal: ratatui::Terminal<ratatui::backend::CrosstermBackend<std::io::Stdout>>,
    ) -> Self {
        Self {
            terminal: Some(terminal),
        }
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if let Some(terminal) = self.terminal.take() {
            let _ = tui::restore_terminal(terminal);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::macros::date;

    use super::*;
    use crate::config::Config;
    use crate::storage::MemoryStore;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn type_text(app: &mut AppState<'_>, text: &str) {
        let dialog = app.editor.as_mut().expect("editor open");
        for c in text.chars() {
            handle_text_input_key(key(KeyCode::Char(c)), dialog.input_mut());
        }
    }

    fn session() -> Session {
        Session::with_backend(Config::default(), Arc::new(MemoryStore::new()))
    }

    #[test]
    fn editor_requires_a_title() {
        let dialog = EditorDialog::create();
        let err = dialog.build(date!(2030 - 01 - 01)).unwrap_err();
        assert_eq!(err.0, EditorField::Title);
        assert_eq!(err.1, "Title is required");
    }

    #[test]
    fn editor_rejects_past_due_dates() {
        let mut dialog = EditorDialog::create();
        dialog.title = TextInput::new("Pay rent");
        dialog.due = TextInput::new("2029-12-31");
        let err = dialog.build(date!(2030 - 01 - 01)).unwrap_err();
        assert_eq!(err.0, EditorField::Due);
        assert!(err.1.contains("in the past"));
    }

    #[test]
    fn editing_keeps_an_untouched_past_due_date() {
        let task = Task::new("Old").with_due_date("2001-02-03T10:00:00Z");
        let mut dialog = EditorDialog::edit(&task);
        dialog.title = TextInput::new("Renamed");
        let built = dialog.build(date!(2030 - 01 - 01)).unwrap();
        assert_eq!(built.id, task.id);
        assert_eq!(built.due_date.as_deref(), Some("2001-02-03T10:00:00Z"));
        assert_eq!(built.title, "Renamed");
    }

    #[test]
    fn text_input_edits_at_cursor() {
        let mut input = TextInput::new("ac");
        input.move_left();
        input.insert_char('b');
        assert_eq!(input.as_str(), "abc");
        input.move_home();
        input.delete();
        assert_eq!(input.as_str(), "bc");
        input.move_end();
        input.backspace();
        assert_eq!(input.as_str(), "b");
    }

    #[tokio::test]
    async fn new_task_flow_updates_the_table() {
        let session = session();
        let mut app = AppState::new(&session);

        handle_key(key(KeyCode::Char('n')), &mut app).await;
        type_text(&mut app, "Write report");
        // Title -> Description -> Due -> save
        for _ in 0..3 {
            handle_key(key(KeyCode::Enter), &mut app).await;
        }
        assert!(app.editor.is_none());

        app.sync_from_store();
        assert_eq!(app.visible.len(), 1);
        assert_eq!(app.visible[0].title, "Write report");
    }

    #[tokio::test]
    async fn empty_title_keeps_the_dialog_open_and_saves_nothing() {
        let session = session();
        let mut app = AppState::new(&session);

        handle_key(key(KeyCode::Char('n')), &mut app).await;
        handle_key(key(KeyCode::Tab), &mut app).await;
        handle_key(key(KeyCode::Tab), &mut app).await;
        handle_key(key(KeyCode::Enter), &mut app).await;

        let dialog = app.editor.as_ref().expect("dialog stays open");
        assert_eq!(dialog.error.as_deref(), Some("Title is required"));
        assert!(session.store.is_empty());
    }

    #[tokio::test]
    async fn toggle_and_filter_tabs() {
        let session = session();
        session.store.add_task(Task::new("a")).await.unwrap();
        session.store.add_task(Task::new("b")).await.unwrap();
        let mut app = AppState::new(&session);

        handle_key(key(KeyCode::Char(' ')), &mut app).await;
        app.sync_from_store();
        assert!(app.tasks[0].completed);

        handle_key(key(KeyCode::Char('2')), &mut app).await;
        assert_eq!(app.filter, TaskFilter::Completed);
        assert_eq!(app.visible.len(), 1);

        handle_key(key(KeyCode::Tab), &mut app).await;
        assert_eq!(app.filter, TaskFilter::Pending);
        assert_eq!(app.visible[0].title, "b");
    }

    /// Every write fails.
    #[derive(Debug)]
    struct ReadOnlyStore;

    #[async_trait::async_trait]
    impl crate::storage::KeyValueStore for ReadOnlyStore {
        async fn get(
            &self,
            _key: &str,
        ) -> Result<Option<Vec<u8>>, crate::error::StorageError> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: &[u8]) -> Result<(), crate::error::StorageError> {
            Err(crate::error::StorageError::Unavailable("read-only".to_owned()))
        }
    }

    #[tokio::test]
    async fn retrying_a_failed_create_does_not_duplicate_the_task() {
        let session = Session::with_backend(Config::default(), Arc::new(ReadOnlyStore));
        let mut app = AppState::new(&session);

        handle_key(key(KeyCode::Char('n')), &mut app).await;
        type_text(&mut app, "Pay rent");
        for _ in 0..3 {
            handle_key(key(KeyCode::Enter), &mut app).await;
        }
        let dialog = app.editor.as_ref().expect("dialog stays open after a failed save");
        assert!(dialog.error.is_some());

        handle_key(key(KeyCode::Enter), &mut app).await;
        assert_eq!(session.store.len(), 1);
        assert_eq!(session.store.snapshot()[0].title, "Pay rent");
    }

    #[tokio::test]
    async fn delete_asks_for_confirmation() {
        let session = session();
        session.store.add_task(Task::new("doomed")).await.unwrap();
        let mut app = AppState::new(&session);

        handle_key(key(KeyCode::Char('D')), &mut app).await;
        assert!(app.confirm.is_some());
        handle_key(key(KeyCode::Char('n')), &mut app).await;
        assert_eq!(session.store.len(), 1);

        handle_key(key(KeyCode::Char('D')), &mut app).await;
        handle_key(key(KeyCode::Char('y')), &mut app).await;
        assert!(session.store.is_empty());
    }
}

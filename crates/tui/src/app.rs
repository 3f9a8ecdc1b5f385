use std::{cmp, io, sync::Arc, thread, time::Duration};

use anyhow::{Context, Result};
use chrono::Local;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame, Terminal,
};
use sliptalk_core::{
    deal, Deal, DealOrigin, Game, GameStore, PhraseSource, RetryPolicy, Settings, Subscription,
};
use tokio::sync::mpsc;
use tracing::{debug, info};

const TICK_RATE: Duration = Duration::from_millis(250);
const MAX_GAME_NAME_LEN: usize = 48;

#[derive(Debug, Clone)]
struct Theme {
    primary_fg: Color,
    accent: Color,
    muted: Color,
    selection_bg: Color,
    success: Color,
    warning: Color,
    danger: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            primary_fg: Color::White,
            accent: Color::Cyan,
            muted: Color::DarkGray,
            selection_bg: Color::DarkGray,
            success: Color::Green,
            warning: Color::Yellow,
            danger: Color::Red,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    Games,
    Phrases,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PromptKind {
    NewGame,
    Rename { game_id: String },
}

#[derive(Debug, Clone)]
struct NamePromptModal {
    input: String,
    cursor: usize,
    kind: PromptKind,
    default: String,
}

impl NamePromptModal {
    fn new(kind: PromptKind, default: String) -> Self {
        Self {
            cursor: default.chars().count(),
            input: default.clone(),
            kind,
            default,
        }
    }

    fn move_cursor(&mut self, delta: isize) {
        let len = self.input.chars().count() as isize;
        self.cursor = (self.cursor as isize + delta).clamp(0, len) as usize;
    }

    fn byte_index(&self) -> usize {
        self.input
            .char_indices()
            .nth(self.cursor)
            .map(|(index, _)| index)
            .unwrap_or(self.input.len())
    }

    fn insert(&mut self, ch: char) {
        if self.input.chars().count() >= MAX_GAME_NAME_LEN || ch.is_control() {
            return;
        }
        let index = self.byte_index();
        self.input.insert(index, ch);
        self.cursor += 1;
    }

    fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let index = self.byte_index();
            self.input.remove(index);
        }
    }

    fn delete(&mut self) {
        if self.cursor < self.input.chars().count() {
            let index = self.byte_index();
            self.input.remove(index);
        }
    }

    fn value(&self) -> String {
        let trimmed = self.input.trim();
        if trimmed.is_empty() {
            self.default.clone()
        } else {
            trimmed.to_string()
        }
    }
}

/// A selectable phrase in the current game's history.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PhraseRow {
    batch_id: String,
    index: usize,
}

enum AppEvent {
    Input(Event),
    Tick,
    Dealt(Deal),
}

/// Terminal front end driving a [`GameStore`].
pub struct SlipTalkApp {
    store: GameStore,
    source: Arc<dyn PhraseSource>,
    policy: RetryPolicy,
    settings: Settings,
    store_rx: mpsc::UnboundedReceiver<Settings>,
    subscription: Subscription,
    event_tx: Option<mpsc::Sender<AppEvent>>,
    focus: Focus,
    game_cursor: usize,
    phrase_cursor: usize,
    prompt: Option<NamePromptModal>,
    confirm_reset: bool,
    dealing: bool,
    status: String,
    should_quit: bool,
    theme: Theme,
}

impl SlipTalkApp {
    pub fn new(store: GameStore, source: Arc<dyn PhraseSource>, policy: RetryPolicy) -> Self {
        let (store_tx, store_rx) = mpsc::unbounded_channel();
        let subscription = store.subscribe(move |settings| {
            let _ = store_tx.send(settings.clone());
        });
        let settings = store.snapshot();
        Self {
            store,
            source,
            policy,
            settings,
            store_rx,
            subscription,
            event_tx: None,
            focus: Focus::Games,
            game_cursor: 0,
            phrase_cursor: 0,
            prompt: None,
            confirm_reset: false,
            dealing: false,
            status: "Ready".to_string(),
            should_quit: false,
            theme: Theme::default(),
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        let current = self.store.ensure_current_game();
        self.drain_store_updates();
        self.select_game_in_list(&current);
        self.status = format!(
            "Loaded {} games • g deal  Space mark used  n new  ? keys",
            self.settings.games.len()
        );

        let mut stdout = io::stdout();
        enable_raw_mode().context("failed to enter raw mode")?;
        execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).context("failed to create terminal")?;
        terminal.hide_cursor()?;
        terminal.clear()?;

        let (event_tx, mut event_rx) = mpsc::channel::<AppEvent>(128);
        spawn_input_thread(event_tx.clone());
        self.event_tx = Some(event_tx);

        loop {
            terminal.draw(|frame| self.draw(frame))?;
            if self.should_quit {
                break;
            }

            tokio::select! {
                maybe_event = event_rx.recv() => {
                    if !self.process_app_event(maybe_event) {
                        break;
                    }
                }
                maybe_settings = self.store_rx.recv() => {
                    if let Some(settings) = maybe_settings {
                        self.apply_settings(settings);
                    }
                }
            }
            self.drain_store_updates();
        }

        restore_terminal(&mut terminal)?;
        self.subscription.unsubscribe();
        self.event_tx = None;
        Ok(())
    }

    fn drain_store_updates(&mut self) {
        while let Ok(settings) = self.store_rx.try_recv() {
            self.apply_settings(settings);
        }
    }

    fn apply_settings(&mut self, settings: Settings) {
        self.settings = settings;
        self.clamp_cursors();
    }

    fn process_app_event(&mut self, maybe_event: Option<AppEvent>) -> bool {
        match maybe_event {
            Some(AppEvent::Input(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                let result = if self.prompt.is_some() {
                    self.handle_prompt_key(key)
                } else {
                    self.handle_key(key)
                };
                if let Err(err) = result {
                    self.status = format!("Error: {err}");
                }
            }
            Some(AppEvent::Input(_)) | Some(AppEvent::Tick) => {}
            Some(AppEvent::Dealt(dealt)) => self.handle_dealt(dealt),
            None => return false,
        }
        self.drain_store_updates();
        true
    }

    fn handle_dealt(&mut self, dealt: Deal) {
        self.dealing = false;
        let notice = dealt.notice.clone();
        let origin = dealt.origin;
        let game_id = dealt.attach(&mut self.store);
        self.drain_store_updates();
        self.select_game_in_list(&game_id);
        self.phrase_cursor = 0;
        self.status = match (origin, notice) {
            (_, Some(notice)) => notice,
            (DealOrigin::Generated, None) => "Fresh phrases dealt".to_string(),
            (DealOrigin::Fallback, None) => "Backup phrases dealt".to_string(),
        };
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<()> {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return Ok(());
        }

        let confirming = std::mem::take(&mut self.confirm_reset);
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Tab | KeyCode::BackTab => {
                self.focus = match self.focus {
                    Focus::Games => Focus::Phrases,
                    Focus::Phrases => Focus::Games,
                };
            }
            KeyCode::Up | KeyCode::Char('k') => self.move_cursor(-1),
            KeyCode::Down | KeyCode::Char('j') => self.move_cursor(1),
            KeyCode::Home => self.move_cursor(isize::MIN / 2),
            KeyCode::End => self.move_cursor(isize::MAX / 2),
            KeyCode::Enter if self.focus == Focus::Games => self.select_highlighted_game(),
            KeyCode::Char(' ') | KeyCode::Enter => self.toggle_highlighted_phrase(),
            KeyCode::Char('g') => self.start_deal(),
            KeyCode::Char('n') => {
                let default = format!("Game {}", self.settings.games.len() + 1);
                self.prompt = Some(NamePromptModal::new(PromptKind::NewGame, default));
                self.status = "Name the new game".to_string();
            }
            KeyCode::Char('r') => self.prompt_rename(),
            KeyCode::Char('c') => {
                if let Some(game_id) = self.highlighted_game_id() {
                    self.store.toggle_game_collapsed(&game_id);
                }
            }
            KeyCode::Char('d') | KeyCode::Delete => self.delete_highlighted(),
            KeyCode::Char('X') => {
                if confirming {
                    self.store.reset();
                    let current = self.store.ensure_current_game();
                    self.drain_store_updates();
                    self.select_game_in_list(&current);
                    self.status = "All games erased".to_string();
                } else {
                    self.confirm_reset = true;
                    self.status = "Press X again to erase every game".to_string();
                }
            }
            KeyCode::Char('?') => {
                self.status = "Tab panel  ↑↓ move  Enter select  g deal  Space used  n new  r rename  c collapse  d delete  X reset  q quit".to_string();
            }
            _ => {}
        }
        Ok(())
    }

    fn handle_prompt_key(&mut self, key: KeyEvent) -> Result<()> {
        let Some(prompt) = self.prompt.as_mut() else {
            return Ok(());
        };
        match key.code {
            KeyCode::Esc => {
                self.prompt = None;
                self.status = "Cancelled".to_string();
            }
            KeyCode::Enter => {
                let name = prompt.value();
                let kind = prompt.kind.clone();
                self.prompt = None;
                match kind {
                    PromptKind::NewGame => {
                        let game_id = self.store.create_game(&name);
                        self.drain_store_updates();
                        self.select_game_in_list(&game_id);
                        self.phrase_cursor = 0;
                        self.status = format!("Started {name}");
                    }
                    PromptKind::Rename { game_id } => {
                        if self.store.rename_game(&game_id, &name) {
                            self.status = format!("Renamed to {name}");
                        } else {
                            self.status = "Game no longer exists".to_string();
                        }
                    }
                }
            }
            KeyCode::Left => prompt.move_cursor(-1),
            KeyCode::Right => prompt.move_cursor(1),
            KeyCode::Home => prompt.cursor = 0,
            KeyCode::End => prompt.cursor = prompt.input.chars().count(),
            KeyCode::Backspace => prompt.backspace(),
            KeyCode::Delete => prompt.delete(),
            KeyCode::Char(ch) => {
                if key.modifiers.is_empty() || key.modifiers == KeyModifiers::SHIFT {
                    prompt.insert(ch);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn start_deal(&mut self) {
        if self.dealing {
            self.status = "Already dealing…".to_string();
            return;
        }
        let Some(sender) = self.event_tx.clone() else {
            return;
        };
        self.dealing = true;
        self.status = "Dealing phrases…".to_string();
        let source = Arc::clone(&self.source);
        let policy = self.policy;
        tokio::spawn(async move {
            let dealt = deal(source.as_ref(), policy).await;
            debug!(origin = ?dealt.origin, "deal finished");
            let _ = sender.send(AppEvent::Dealt(dealt)).await;
        });
    }

    fn prompt_rename(&mut self) {
        let Some(game) = self.highlighted_game().cloned() else {
            self.status = "No game selected".to_string();
            return;
        };
        self.prompt = Some(NamePromptModal::new(
            PromptKind::Rename { game_id: game.id },
            game.name,
        ));
        self.status = "Rename game".to_string();
    }

    fn select_highlighted_game(&mut self) {
        if let Some(game_id) = self.highlighted_game_id() {
            if self.store.set_current_game(&game_id) {
                self.phrase_cursor = 0;
                self.focus = Focus::Phrases;
            }
        }
    }

    fn toggle_highlighted_phrase(&mut self) {
        if self.focus != Focus::Phrases {
            return;
        }
        let Some(game_id) = self.settings.current_game_id.clone() else {
            return;
        };
        if let Some(row) = self.phrase_rows().get(self.phrase_cursor).cloned() {
            self.store
                .toggle_phrase_used(&game_id, &row.batch_id, row.index);
        }
    }

    fn delete_highlighted(&mut self) {
        match self.focus {
            Focus::Games => {
                if let Some(game) = self.highlighted_game().cloned() {
                    if self.store.remove_game(&game.id) {
                        info!(game_id = %game.id, "game removed");
                        self.status = format!("Deleted {}", game.name);
                    }
                }
            }
            Focus::Phrases => {
                let Some(game_id) = self.settings.current_game_id.clone() else {
                    return;
                };
                if let Some(row) = self.phrase_rows().get(self.phrase_cursor).cloned() {
                    if self.store.remove_batch(&game_id, &row.batch_id) {
                        self.status = "Batch removed".to_string();
                    }
                }
            }
        }
    }

    fn games_in_order(&self) -> Vec<&Game> {
        self.settings.games_by_recency()
    }

    fn highlighted_game(&self) -> Option<&Game> {
        self.games_in_order().get(self.game_cursor).copied()
    }

    fn highlighted_game_id(&self) -> Option<String> {
        self.highlighted_game().map(|game| game.id.clone())
    }

    fn select_game_in_list(&mut self, game_id: &str) {
        if let Some(position) = self
            .games_in_order()
            .iter()
            .position(|game| game.id == game_id)
        {
            self.game_cursor = position;
        }
    }

    fn phrase_rows(&self) -> Vec<PhraseRow> {
        self.settings
            .current_game()
            .map(|game| {
                game.batches
                    .iter()
                    .flat_map(|batch| {
                        (0..batch.phrases.len()).map(move |index| PhraseRow {
                            batch_id: batch.id.clone(),
                            index,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn move_cursor(&mut self, delta: isize) {
        let (cursor, len) = match self.focus {
            Focus::Games => (&mut self.game_cursor, self.settings.games.len()),
            Focus::Phrases => {
                let len = self.phrase_rows().len();
                (&mut self.phrase_cursor, len)
            }
        };
        if len == 0 {
            *cursor = 0;
            return;
        }
        let next = (*cursor as isize).saturating_add(delta);
        *cursor = next.clamp(0, len as isize - 1) as usize;
    }

    fn clamp_cursors(&mut self) {
        let games = self.settings.games.len();
        self.game_cursor = self.game_cursor.min(games.saturating_sub(1));
        let phrases = self.phrase_rows().len();
        self.phrase_cursor = self.phrase_cursor.min(phrases.saturating_sub(1));
    }

    fn draw(&mut self, frame: &mut Frame) {
        let area = frame.size();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(8), Constraint::Length(3)])
            .split(area);
        let body = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
            .split(chunks[0]);

        self.render_games(frame, body[0]);
        self.render_phrases(frame, body[1]);
        self.render_status(frame, chunks[1]);
        if let Some(prompt) = &self.prompt {
            self.render_name_prompt(frame, prompt);
        }
    }

    fn panel_block(&self, title: String, focus: Focus) -> Block<'static> {
        let border = if self.focus == focus {
            Style::default().fg(self.theme.accent)
        } else {
            Style::default().fg(self.theme.muted)
        };
        Block::default()
            .borders(Borders::ALL)
            .border_style(border)
            .title(title)
    }

    fn render_games(&self, frame: &mut Frame, area: Rect) {
        let current = self.settings.current_game_id.as_deref();
        let mut lines = Vec::new();
        let mut selected_line = 0;
        for (idx, game) in self.games_in_order().into_iter().enumerate() {
            let is_highlighted = idx == self.game_cursor;
            if is_highlighted {
                selected_line = lines.len();
            }
            let marker = if is_highlighted {
                Span::styled(
                    "▶ ",
                    Style::default()
                        .fg(self.theme.accent)
                        .add_modifier(Modifier::BOLD),
                )
            } else {
                Span::raw("  ")
            };
            let fold = if game.is_collapsed { "[+] " } else { "[-] " };
            let mut name_style = Style::default().fg(self.theme.primary_fg);
            if Some(game.id.as_str()) == current {
                name_style = name_style.fg(self.theme.success).add_modifier(Modifier::BOLD);
            }
            let mut header = Line::from(vec![
                marker,
                Span::styled(fold, Style::default().fg(self.theme.muted)),
                Span::styled(game.name.clone(), name_style),
                Span::styled(
                    format!("  {} pts", game.score()),
                    Style::default().fg(self.theme.warning),
                ),
            ]);
            if is_highlighted && self.focus == Focus::Games {
                header = highlight(header, self.theme.selection_bg);
            }
            lines.push(header);
            lines.extend(self.game_detail_lines(game));
        }
        if lines.is_empty() {
            lines.push(Line::from("No games yet. Press n to start one."));
        }

        let scroll = scroll_offset(selected_line, area.height.saturating_sub(2) as usize);
        let paragraph = Paragraph::new(lines)
            .block(self.panel_block(format!("Games ({})", self.settings.games.len()), Focus::Games))
            .scroll((scroll, 0));
        frame.render_widget(paragraph, area);
    }

    /// Summary under a game's header; expanded games also list their batches.
    fn game_detail_lines(&self, game: &Game) -> Vec<Line<'static>> {
        let activity = game.last_activity().with_timezone(&Local);
        let mut lines = vec![Line::from(Span::styled(
            format!(
                "      {} batches · last {}",
                game.batches.len(),
                activity.format("%b %d %H:%M")
            ),
            Style::default().fg(self.theme.muted),
        ))];
        if game.is_collapsed {
            return lines;
        }
        for batch in &game.batches {
            let used = batch.phrases.iter().filter(|phrase| phrase.used).count();
            lines.push(Line::from(vec![
                Span::styled(
                    format!(
                        "        {} ",
                        batch.timestamp.with_timezone(&Local).format("%H:%M")
                    ),
                    Style::default().fg(self.theme.muted),
                ),
                Span::styled(
                    format!("{}/{} used", used, batch.phrases.len()),
                    Style::default().fg(self.theme.primary_fg),
                ),
                Span::styled(
                    format!("  {} pts", batch.score()),
                    Style::default().fg(self.theme.warning),
                ),
            ]));
        }
        lines
    }

    fn render_phrases(&self, frame: &mut Frame, area: Rect) {
        let Some(game) = self.settings.current_game() else {
            let paragraph = Paragraph::new("No current game.")
                .block(self.panel_block("Phrases".to_string(), Focus::Phrases));
            frame.render_widget(paragraph, area);
            return;
        };

        let mut lines = Vec::new();
        let mut selected_line = 0;
        let mut row = 0;
        for batch in &game.batches {
            let dealt_at = batch.timestamp.with_timezone(&Local);
            lines.push(Line::from(Span::styled(
                format!(
                    "Dealt {} · {} pts",
                    dealt_at.format("%b %d %H:%M"),
                    batch.score()
                ),
                Style::default()
                    .fg(self.theme.accent)
                    .add_modifier(Modifier::BOLD),
            )));
            for phrase in &batch.phrases {
                let is_highlighted = row == self.phrase_cursor;
                if is_highlighted {
                    selected_line = lines.len();
                }
                let check = if phrase.used { "[x] " } else { "[ ] " };
                let text_style = if phrase.used {
                    Style::default()
                        .fg(self.theme.muted)
                        .add_modifier(Modifier::CROSSED_OUT)
                } else {
                    Style::default().fg(self.theme.primary_fg)
                };
                let mut line = Line::from(vec![
                    Span::raw(if is_highlighted { "▶ " } else { "  " }),
                    Span::styled(check, Style::default().fg(self.theme.success)),
                    Span::styled(
                        format!("{}pt ", phrase.points),
                        Style::default().fg(points_color(&self.theme, phrase.points)),
                    ),
                    Span::styled(phrase.text.clone(), text_style),
                ]);
                if is_highlighted && self.focus == Focus::Phrases {
                    line = highlight(line, self.theme.selection_bg);
                }
                lines.push(line);
                row += 1;
            }
            lines.push(Line::from(""));
        }
        if game.batches.is_empty() {
            lines.push(Line::from("No phrases yet. Press g to deal a batch."));
        }

        let scroll = scroll_offset(selected_line, area.height.saturating_sub(2) as usize);
        let title = format!("{} · score {}", game.name, game.score());
        let paragraph = Paragraph::new(lines)
            .block(self.panel_block(title, Focus::Phrases))
            .wrap(Wrap { trim: false })
            .scroll((scroll, 0));
        frame.render_widget(paragraph, area);
    }

    fn render_status(&self, frame: &mut Frame, area: Rect) {
        let style = if self.confirm_reset {
            Style::default().fg(self.theme.danger)
        } else {
            Style::default()
        };
        let paragraph = Paragraph::new(Line::from(Span::styled(self.status.clone(), style)))
            .block(Block::default().borders(Borders::ALL).title("Status"))
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, area);
    }

    fn render_name_prompt(&self, frame: &mut Frame, prompt: &NamePromptModal) {
        let frame_area = frame.size();
        let mut width = cmp::min(60_u16, frame_area.width.saturating_sub(4));
        width = cmp::max(width, 24_u16);
        let height = 6_u16.min(frame_area.height.saturating_sub(2)).max(5_u16);
        let x = frame_area.x + (frame_area.width.saturating_sub(width)) / 2;
        let y = frame_area.y + (frame_area.height.saturating_sub(height)) / 2;
        let area = Rect::new(x, y, width, height);

        frame.render_widget(Clear, area);

        let title = match prompt.kind {
            PromptKind::NewGame => "New Game",
            PromptKind::Rename { .. } => "Rename Game",
        };
        let input_line = Line::from(vec![
            Span::styled("> ", Style::default().fg(self.theme.accent)),
            Span::raw(prompt.input.clone()),
        ]);
        let helper = Line::from(vec![
            Span::styled("Enter", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(" confirm  "),
            Span::styled("Esc", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(" cancel"),
        ]);
        let default_hint = Line::from(format!("Default: {}", prompt.default));

        let paragraph = Paragraph::new(vec![input_line, Line::from(""), helper, default_hint])
            .block(Block::default().borders(Borders::ALL).title(title))
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, area);

        let cursor_x =
            (area.x + 3 + prompt.cursor as u16).min(area.x + area.width.saturating_sub(2));
        frame.set_cursor(cursor_x, area.y + 1);
    }
}

fn highlight(line: Line<'static>, background: Color) -> Line<'static> {
    let spans: Vec<Span<'static>> = line
        .spans
        .into_iter()
        .map(|span| Span::styled(span.content, span.style.bg(background)))
        .collect();
    Line::from(spans)
}

fn points_color(theme: &Theme, points: u8) -> Color {
    match points {
        1 => theme.success,
        2 => theme.warning,
        _ => theme.danger,
    }
}

fn scroll_offset(selected_line: usize, visible: usize) -> u16 {
    if visible == 0 || selected_line < visible {
        return 0;
    }
    (selected_line + 1 - visible).min(u16::MAX as usize) as u16
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor()?;
    Ok(())
}

fn spawn_input_thread(sender: mpsc::Sender<AppEvent>) {
    thread::spawn(move || loop {
        match event::poll(TICK_RATE) {
            Ok(true) => match event::read() {
                Ok(evt) => {
                    if sender.blocking_send(AppEvent::Input(evt)).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            },
            Ok(false) => {
                if sender.blocking_send(AppEvent::Tick).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sliptalk_core::{
        generator::GeneratedPhrase, GenerateError, MemoryStore, Phrase, PhraseBatch,
    };

    struct NoSource;

    #[async_trait]
    impl PhraseSource for NoSource {
        async fn fetch(&self) -> Result<Vec<GeneratedPhrase>, GenerateError> {
            Err(GenerateError::MissingApiKey)
        }
    }

    fn app() -> SlipTalkApp {
        let store = GameStore::open(Arc::new(MemoryStore::new()));
        SlipTalkApp::new(store, Arc::new(NoSource), RetryPolicy::default())
    }

    fn press(app: &mut SlipTalkApp, code: KeyCode) {
        let key = KeyEvent::new(code, KeyModifiers::NONE);
        app.process_app_event(Some(AppEvent::Input(Event::Key(key))));
    }

    fn type_text(app: &mut SlipTalkApp, text: &str) {
        for ch in text.chars() {
            press(app, KeyCode::Char(ch));
        }
    }

    #[test]
    fn prompt_edits_multibyte_names() {
        let mut prompt = NamePromptModal::new(PromptKind::NewGame, "Café".to_string());
        prompt.backspace();
        prompt.insert('é');
        prompt.move_cursor(-10);
        prompt.insert('¡');
        assert_eq!(prompt.input, "¡Café");
        prompt.input.clear();
        assert_eq!(prompt.value(), "Café");
    }

    #[test]
    fn new_game_prompt_creates_and_selects_game() {
        let mut app = app();
        press(&mut app, KeyCode::Char('n'));
        for _ in 0..10 {
            press(&mut app, KeyCode::Backspace);
        }
        type_text(&mut app, "Dinner");
        press(&mut app, KeyCode::Enter);

        assert_eq!(app.settings.games.len(), 1);
        assert_eq!(app.settings.games[0].name, "Dinner");
        assert_eq!(
            app.highlighted_game_id(),
            app.settings.current_game_id.clone()
        );
    }

    #[test]
    fn dealt_batch_lands_on_current_game_and_toggles() {
        let mut app = app();
        let batch = PhraseBatch::new(vec![
            Phrase::new("one", 1),
            Phrase::new("two", 2),
            Phrase::new("three", 3),
        ]);
        let dealt = Deal {
            batch,
            origin: DealOrigin::Generated,
            notice: None,
        };
        app.process_app_event(Some(AppEvent::Dealt(dealt)));
        assert_eq!(app.settings.games.len(), 1);
        assert_eq!(app.phrase_rows().len(), 3);

        app.focus = Focus::Phrases;
        press(&mut app, KeyCode::Down);
        press(&mut app, KeyCode::Char(' '));
        assert_eq!(app.settings.games[0].score(), 2);

        press(&mut app, KeyCode::Char('d'));
        assert!(app.settings.games[0].batches.is_empty());
    }

    #[test]
    fn expanded_games_list_batches_and_collapsed_show_summary() {
        let mut app = app();
        let game_id = app.store.create_game("Party");
        for _ in 0..2 {
            app.store
                .add_batch_to_game(&game_id, PhraseBatch::new(vec![Phrase::new("one", 1)]));
        }
        app.drain_store_updates();
        let game = app.settings.game(&game_id).cloned().expect("game exists");
        assert_eq!(app.game_detail_lines(&game).len(), 3);

        press(&mut app, KeyCode::Char('c'));
        let game = app.settings.game(&game_id).cloned().expect("game exists");
        assert!(game.is_collapsed);
        assert_eq!(app.game_detail_lines(&game).len(), 1);
    }

    #[test]
    fn reset_requires_confirmation() {
        let mut app = app();
        press(&mut app, KeyCode::Char('n'));
        press(&mut app, KeyCode::Enter);
        press(&mut app, KeyCode::Char('n'));
        press(&mut app, KeyCode::Enter);
        assert_eq!(app.settings.games.len(), 2);

        press(&mut app, KeyCode::Char('X'));
        press(&mut app, KeyCode::Down);
        press(&mut app, KeyCode::Char('X'));
        assert_eq!(app.settings.games.len(), 2);

        press(&mut app, KeyCode::Char('X'));
        assert_eq!(app.settings.games.len(), 1);
        assert!(app.settings.current_game().is_some());
    }

    #[test]
    fn scroll_keeps_selection_visible() {
        assert_eq!(scroll_offset(3, 10), 0);
        assert_eq!(scroll_offset(12, 10), 3);
        assert_eq!(scroll_offset(5, 0), 0);
    }
}

use crate::{
    runner::RunnerId,
    store::{
        LookupStatus,
        ViewState,
    },
};
use alloy::primitives::U256;
use color_eyre::eyre::{
    Result,
    eyre,
};
use crossterm::{
    event::{
        Event,
        EventStream,
        KeyCode,
        KeyEvent,
        KeyEventKind,
        KeyModifiers,
    },
    terminal::{
        disable_raw_mode,
        enable_raw_mode,
    },
};
use futures::StreamExt;
use itertools::Itertools;
use ratatui::{
    prelude::*,
    widgets::*,
};
use std::io::stdout;

const TOKEN_DECIMALS: u8 = 18;
const TOKEN_TICKER: &str = "DATA";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserEvent {
    Quit,
    Redraw,
    Search(RunnerId),
    InvalidSearch(String),
    SaveNarrative(String),
    DismissError,
}

pub struct UiState {
    mode: Mode,
    explorer_url: String,
    terminal: Option<Terminal<CrosstermBackend<std::io::Stdout>>>,
}

impl UiState {
    pub fn new(explorer_url: impl Into<String>) -> Self {
        UiState {
            mode: Mode::Normal,
            explorer_url: explorer_url.into(),
            terminal: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
enum Mode {
    #[default]
    Normal,
    Search(SearchState),
    Edit(EditState),
    QuitModal,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct SearchState {
    input: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct EditState {
    text: String,
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::EnterAlternateScreen)?;
    // Create a single persistent Terminal to preserve buffers across draws
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::LeaveAlternateScreen)?;
    Ok(())
}

pub fn draw(state: &mut UiState, view: &ViewState) -> Result<()> {
    if let Some(mut term) = state.terminal.take() {
        term.draw(|f| ui(f, state, view))?;
        state.terminal = Some(term);
    }
    Ok(())
}

pub type InputEventReceiver = EventStream;

pub fn input_event_stream() -> InputEventReceiver {
    EventStream::new()
}

pub async fn next_raw_event(events: &mut InputEventReceiver) -> Result<Event> {
    match events.next().await {
        Some(event) => Ok(event?),
        None => Err(eyre!("terminal input stream closed")),
    }
}

/// Maps a terminal event onto an app action, updating the input modes
/// along the way. Returns `None` for keys that change nothing.
pub fn interpret_event(
    state: &mut UiState,
    view: &ViewState,
    event: Event,
) -> Option<UserEvent> {
    let key = match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => key,
        Event::Resize(_, _) => return Some(UserEvent::Redraw),
        _ => return None,
    };
    if is_ctrl(&key, 'c') {
        return Some(UserEvent::Quit);
    }

    match &mut state.mode {
        Mode::Search(search) => match key.code {
            KeyCode::Esc => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            KeyCode::Enter => {
                let input = search.input.clone();
                state.mode = Mode::Normal;
                match input.parse::<RunnerId>() {
                    Ok(id) => Some(UserEvent::Search(id)),
                    Err(_) => Some(UserEvent::InvalidSearch(input)),
                }
            }
            KeyCode::Backspace => {
                search.input.pop();
                Some(UserEvent::Redraw)
            }
            KeyCode::Char(c) if c.is_ascii_digit() => {
                search.input.push(c);
                Some(UserEvent::Redraw)
            }
            _ => None,
        },
        Mode::Edit(edit) => {
            if is_ctrl(&key, 's') {
                let text = std::mem::take(&mut edit.text);
                state.mode = Mode::Normal;
                return Some(UserEvent::SaveNarrative(text));
            }
            match key.code {
                KeyCode::Esc => {
                    state.mode = Mode::Normal;
                    Some(UserEvent::Redraw)
                }
                KeyCode::Enter => {
                    edit.text.push('\n');
                    Some(UserEvent::Redraw)
                }
                KeyCode::Backspace => {
                    edit.text.pop();
                    Some(UserEvent::Redraw)
                }
                KeyCode::Char(c) => {
                    edit.text.push(c);
                    Some(UserEvent::Redraw)
                }
                _ => None,
            }
        }
        Mode::QuitModal => match key.code {
            KeyCode::Char('y') | KeyCode::Enter => Some(UserEvent::Quit),
            KeyCode::Char('n') | KeyCode::Esc => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            _ => None,
        },
        Mode::Normal => match key.code {
            KeyCode::Char('q') | KeyCode::Esc => {
                state.mode = Mode::QuitModal;
                Some(UserEvent::Redraw)
            }
            KeyCode::Char('/') | KeyCode::Char('s') => {
                state.mode = Mode::Search(SearchState::default());
                Some(UserEvent::Redraw)
            }
            KeyCode::Char('e') if view.can_edit() => {
                state.mode = Mode::Edit(EditState {
                    text: view.editor_seed(),
                });
                Some(UserEvent::Redraw)
            }
            KeyCode::Char('x') => Some(UserEvent::DismissError),
            _ => None,
        },
    }
}

fn is_ctrl(key: &KeyEvent, c: char) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char(c)
}

fn ui(f: &mut Frame, state: &UiState, view: &ViewState) {
    f.render_widget(Clear, f.area());
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Length(3), // search
            Constraint::Length(7), // runner
            Constraint::Min(6),    // narrative / editor
            Constraint::Length(4), // transaction + errors
            Constraint::Length(3), // help
        ])
        .split(f.area());

    draw_header(f, chunks[0], view);
    draw_search(f, state, chunks[1], view);
    draw_runner(f, chunks[2], view);
    draw_narrative(f, state, chunks[3], view);
    draw_transaction(f, state, chunks[4], view);
    draw_help(f, state, chunks[5]);
    if state.mode == Mode::QuitModal {
        draw_quit_modal(f);
    }
}

fn draw_header(f: &mut Frame, area: Rect, view: &ViewState) {
    let address = view
        .address()
        .map(|a| a.to_string())
        .unwrap_or_else(|| String::from("not connected"));
    let cost = view
        .cost
        .map(|c| format!("{} {TOKEN_TICKER}", format_token_amount(c, TOKEN_DECIMALS)))
        .unwrap_or_default();
    let text = format!("bio-runner | {address} | {cost}");
    let widget = Paragraph::new(text).block(Block::default().borders(Borders::ALL));
    f.render_widget(widget, area);
}

fn draw_search(f: &mut Frame, state: &UiState, area: Rect, view: &ViewState) {
    let (text, style) = match &state.mode {
        Mode::Search(search) => (
            format!("Runner #{}_", search.input),
            Style::default().fg(Color::Yellow),
        ),
        _ => {
            let current = view
                .runner_id
                .map(|id| format!("Runner #{id}"))
                .unwrap_or_else(|| String::from("Press / to look up a runner"));
            (current, Style::default())
        }
    };
    let widget = Paragraph::new(text)
        .style(style)
        .block(Block::default().borders(Borders::ALL).title("Search"));
    f.render_widget(widget, area);
}

fn draw_runner(f: &mut Frame, area: Rect, view: &ViewState) {
    let mut lines: Vec<Line> = Vec::new();
    if let Some(error) = view.lookup_error() {
        lines.push(Line::styled(
            format!("Lookup failed: {error}"),
            Style::default().fg(Color::Red),
        ));
    }
    match (&view.lookup, view.current_runner()) {
        (_, Some(runner)) => {
            let ownership = if view.is_owner() {
                Line::styled("you own this runner!", Style::default().fg(Color::Green))
            } else {
                Line::from("you do not own this runner")
            };
            lines.push(ownership);
            lines.push(Line::from(format!("Owner: {}", runner.owner)));
            if let Some(image) = &runner.image {
                lines.push(Line::from(format!("Image: {image}")));
            }
            let attributes = runner
                .attributes
                .iter()
                .map(|(name, value)| format!("{name}: {value}"))
                .join(" | ");
            if !attributes.is_empty() {
                lines.push(Line::from(attributes));
            }
        }
        (LookupStatus::Loading, None) => lines.push(Line::from("Loading...")),
        (LookupStatus::NotFound, None) => lines.push(Line::from("No such runner")),
        _ => {}
    }
    let widget = Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title("Runner"));
    f.render_widget(widget, area);
}

fn draw_narrative(f: &mut Frame, state: &UiState, area: Rect, view: &ViewState) {
    let widget = match &state.mode {
        Mode::Edit(edit) => Paragraph::new(format!("{}_", edit.text))
            .wrap(Wrap { trim: false })
            .style(Style::default().fg(Color::Yellow))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title("Edit narrative (Ctrl+S save, Esc cancel)"),
            ),
        _ => {
            let text = view
                .current_runner()
                .map(|runner| runner.narrative_text().to_string())
                .unwrap_or_default();
            Paragraph::new(text)
                .wrap(Wrap { trim: false })
                .block(Block::default().borders(Borders::ALL).title("Narrative"))
        }
    };
    f.render_widget(widget, area);
}

fn draw_transaction(f: &mut Frame, state: &UiState, area: Rect, view: &ViewState) {
    let link = view.explorer_link(&state.explorer_url);
    let widget = if view.pending_tx_hash().is_some() {
        let mut lines = vec![Line::from("waiting for transaction")];
        lines.extend(link.map(Line::from));
        Paragraph::new(lines)
            .style(Style::default().fg(Color::Yellow))
            .block(Block::default().borders(Borders::ALL).title("Transaction"))
    } else if let Some(error) = view.tx_error() {
        let mut lines = vec![Line::from(error.to_string())];
        lines.extend(link.map(Line::from));
        Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .style(Style::default().fg(Color::Red))
            .block(Block::default().borders(Borders::ALL).title("Errors (x to dismiss)"))
    } else {
        let status = if view.status.trim().is_empty() {
            String::from("Ready")
        } else {
            view.status.clone()
        };
        Paragraph::new(status)
            .wrap(Wrap { trim: false })
            .style(Style::default().fg(Color::Green))
            .block(Block::default().borders(Borders::ALL).title("Status"))
    };
    f.render_widget(widget, area);
}

fn draw_help(f: &mut Frame, state: &UiState, area: Rect) {
    let text = match state.mode {
        Mode::Search(_) => "digits type | Enter look up | Esc cancel",
        Mode::Edit(_) => "Enter newline | Ctrl+S save | Esc cancel",
        Mode::QuitModal => "y quit | n stay",
        Mode::Normal => "/ search | e edit narrative | x dismiss error | q quit",
    };
    let help =
        Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(help, area);
}

fn draw_quit_modal(f: &mut Frame) {
    let area = centered_rect(40, 20, f.area());
    f.render_widget(Clear, area);
    let widget = Paragraph::new("Quit bio-runner? (y/n)")
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL).title("Quit"));
    f.render_widget(widget, area);
}

fn centered_rect(w_percent: u16, h_percent: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - h_percent) / 2),
            Constraint::Percentage(h_percent),
            Constraint::Percentage((100 - h_percent) / 2),
        ])
        .split(r);

    let vertical = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - w_percent) / 2),
            Constraint::Percentage(w_percent),
            Constraint::Percentage((100 - w_percent) / 2),
        ])
        .split(popup_layout[1]);

    vertical[1]
}

pub fn format_token_amount(amount: U256, decimals: u8) -> String {
    let one_unit = U256::from(10u64).pow(U256::from(decimals));
    let whole = amount / one_unit;
    let fractional = amount % one_unit;
    if fractional.is_zero() {
        format!("{}", whole)
    } else {
        let padded = format!("{:0>width$}", fractional.to_string(), width = decimals as usize);
        format!("{}.{}", whole, padded.trim_end_matches('0'))
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        store::ViewEvent,
        test_helpers::{
            owner_address,
            runner,
        },
    };
    use crossterm::event::KeyEventState;
    use ratatui::backend::TestBackend;

    fn key(code: KeyCode) -> Event {
        Event::Key(KeyEvent {
            code,
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        })
    }

    fn ctrl(c: char) -> Event {
        Event::Key(KeyEvent {
            code: KeyCode::Char(c),
            modifiers: KeyModifiers::CONTROL,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        })
    }

    fn owned_runner_view(narrative: Option<&str>) -> ViewState {
        let mut view = ViewState::default();
        view.apply(ViewEvent::Connected {
            address: owner_address(),
            cost: Some(U256::from(1_500_000_000_000_000_000u128)),
        });
        view.apply(ViewEvent::RunnerRequested(RunnerId(42)));
        view.apply(ViewEvent::RunnerLoaded(runner(42, owner_address(), narrative)));
        view
    }

    fn render(state: &UiState, view: &ViewState) -> String {
        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
        terminal.draw(|f| ui(f, state, view)).unwrap();
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn interpret_event__search_collects_digits_and_submits_runner_id() {
        // given
        let mut state = UiState::new("https://polygonscan.com");
        let view = ViewState::default();

        // when
        interpret_event(&mut state, &view, key(KeyCode::Char('/')));
        interpret_event(&mut state, &view, key(KeyCode::Char('4')));
        interpret_event(&mut state, &view, key(KeyCode::Char('x')));
        interpret_event(&mut state, &view, key(KeyCode::Char('2')));
        let event = interpret_event(&mut state, &view, key(KeyCode::Enter));

        // then
        assert_eq!(event, Some(UserEvent::Search(RunnerId(42))));
        assert_eq!(state.mode, Mode::Normal);
    }

    #[test]
    fn interpret_event__empty_search_is_reported_invalid() {
        let mut state = UiState::new("https://polygonscan.com");
        let view = ViewState::default();

        interpret_event(&mut state, &view, key(KeyCode::Char('/')));
        let event = interpret_event(&mut state, &view, key(KeyCode::Enter));

        assert_eq!(event, Some(UserEvent::InvalidSearch(String::new())));
    }

    #[test]
    fn interpret_event__editor_opens_with_current_narrative_and_saves_on_ctrl_s() {
        // given
        let mut state = UiState::new("https://polygonscan.com");
        let view = owned_runner_view(Some("Hi"));

        // when
        interpret_event(&mut state, &view, key(KeyCode::Char('e')));
        interpret_event(&mut state, &view, key(KeyCode::Char('!')));
        interpret_event(&mut state, &view, key(KeyCode::Enter));
        interpret_event(&mut state, &view, key(KeyCode::Char('q')));
        let event = interpret_event(&mut state, &view, ctrl('s'));

        // then
        assert_eq!(event, Some(UserEvent::SaveNarrative("Hi!\nq".to_string())));
        assert_eq!(state.mode, Mode::Normal);
    }

    #[test]
    fn interpret_event__editor_is_unavailable_to_non_owners() {
        // given
        let mut state = UiState::new("https://polygonscan.com");
        let mut view = ViewState::default();
        view.apply(ViewEvent::RunnerRequested(RunnerId(42)));
        view.apply(ViewEvent::RunnerLoaded(runner(42, owner_address(), None)));

        // when
        let event = interpret_event(&mut state, &view, key(KeyCode::Char('e')));

        // then
        assert_eq!(event, None);
        assert_eq!(state.mode, Mode::Normal);
    }

    #[test]
    fn interpret_event__quit_requires_confirmation_but_ctrl_c_does_not() {
        let mut state = UiState::new("https://polygonscan.com");
        let view = ViewState::default();

        assert_eq!(
            interpret_event(&mut state, &view, key(KeyCode::Char('q'))),
            Some(UserEvent::Redraw)
        );
        assert_eq!(
            interpret_event(&mut state, &view, key(KeyCode::Char('y'))),
            Some(UserEvent::Quit)
        );
        let mut state = UiState::new("https://polygonscan.com");
        assert_eq!(
            interpret_event(&mut state, &view, ctrl('c')),
            Some(UserEvent::Quit)
        );
    }

    #[test]
    fn format_token_amount__trims_trailing_zeros() {
        assert_eq!(format_token_amount(U256::ZERO, 18), "0");
        assert_eq!(
            format_token_amount(U256::from(1_000_000_000_000_000_000u128), 18),
            "1"
        );
        assert_eq!(
            format_token_amount(U256::from(1_500_000_000_000_000_000u128), 18),
            "1.5"
        );
        assert_eq!(format_token_amount(U256::from(1000), 18), "0.000000000000001");
    }

    #[test]
    fn ui__shows_ownership_cost_and_narrative() {
        // given
        let state = UiState::new("https://polygonscan.com");
        let view = owned_runner_view(Some("ran the grid"));

        // when
        let screen = render(&state, &view);

        // then
        assert!(screen.contains("you own this runner!"));
        assert!(screen.contains("1.5 DATA"));
        assert!(screen.contains("ran the grid"));
        assert!(screen.contains("Faction: Runner"));
    }

    #[test]
    fn ui__shows_explorer_link_while_transaction_is_pending() {
        // given
        let state = UiState::new("https://polygonscan.com");
        let mut view = owned_runner_view(None);
        let hash = alloy::primitives::TxHash::with_last_byte(7);
        view.apply(ViewEvent::Save(crate::sequencer::SaveEvent::AwaitingWrite {
            runner_id: RunnerId(42),
            hash,
        }));

        // when
        let screen = render(&state, &view);

        // then
        assert!(screen.contains("waiting for transaction"));
        assert!(screen.contains("https://polygonscan.com/tx/0x"));
    }
}

#![cfg(feature = "tui")]

use crate::session::{Message, MessageStatus, Role, Session};
use crate::{app, config};
use anyhow::Context;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Terminal;
use std::io;
use tokio::sync::mpsc;

/// Result of one line typed into the input box.
#[derive(Debug, PartialEq)]
enum Action {
    None,
    Quit,
    /// Feedback for the user that is not part of the transcript.
    Notice(String),
}

pub async fn run_tui(cfg: &config::Config, model: String) -> anyhow::Result<()> {
    let http = app::build_http()?;
    let (mut session, mut turn_events) = app::build_session(&http, cfg, model)?;

    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("enter alt screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel::<Event>();
    std::thread::spawn(move || {
        while let Ok(ev) = crossterm::event::read() {
            if ev_tx.send(ev).is_err() {
                break;
            }
        }
    });

    let mut input = String::new();
    let mut notice = "Enter sends. Esc stops a reply. Commands: /quit, /stop, /clear, /model <id>".to_string();
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(33));

    let res = loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = draw(&mut terminal, &session, &input, &notice) {
                    break Err(e);
                }
            }
            Some(ev) = ev_rx.recv() => {
                if let Event::Key(key) = ev {
                    match handle_key(key, &mut input, &mut session) {
                        Action::Quit => break Ok(()),
                        Action::Notice(n) => notice = n,
                        Action::None => {}
                    }
                }
            }
            Some(ev) = turn_events.recv() => {
                session.apply(ev);
            }
        }
    };

    session.stop();
    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    res
}

fn handle_key(key: KeyEvent, input: &mut String, session: &mut Session) -> Action {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Action::Quit;
    }

    match key.code {
        KeyCode::Esc => {
            if session.stop() {
                Action::Notice("stopping...".to_string())
            } else {
                Action::Quit
            }
        }
        KeyCode::Char(c) => {
            input.push(c);
            Action::None
        }
        KeyCode::Backspace => {
            input.pop();
            Action::None
        }
        KeyCode::Enter => {
            let line = std::mem::take(input);
            handle_line(line.trim(), session)
        }
        _ => Action::None,
    }
}

fn handle_line(line: &str, session: &mut Session) -> Action {
    if line.is_empty() {
        return Action::None;
    }

    match line {
        "/quit" => return Action::Quit,
        "/clear" => {
            session.clear();
            return Action::Notice("cleared".to_string());
        }
        "/stop" => {
            return if session.stop() {
                Action::Notice("stopping...".to_string())
            } else {
                Action::Notice("nothing to stop".to_string())
            };
        }
        _ => {}
    }

    if let Some(rest) = line
        .strip_prefix("/model")
        .filter(|r| r.is_empty() || r.starts_with(' '))
    {
        return if session.select_model(rest) {
            Action::Notice(format!("model set to: {}", session.model()))
        } else {
            Action::Notice("usage: /model <id>".to_string())
        };
    }

    match session.submit(line) {
        Some(_) => Action::None,
        None => Action::Notice("(reply in progress; wait or press Esc)".to_string()),
    }
}

fn render_message(m: &Message, text: &mut Text<'static>) {
    let (role, style) = match (m.role, m.status) {
        (Role::User, _) => ("user: ", Style::default().add_modifier(Modifier::BOLD)),
        (Role::Assistant, MessageStatus::Failed) => {
            ("error: ", Style::default().add_modifier(Modifier::BOLD))
        }
        (Role::Assistant, _) => ("assistant: ", Style::default()),
    };
    text.lines.push(Line::styled(role, style));

    if m.status == MessageStatus::Streaming && m.content.is_empty() {
        text.lines.push(Line::from("..."));
    } else {
        text.lines.extend(Text::from(m.content.clone()).lines);
    }

    if let Some(uri) = &m.image {
        text.lines.push(Line::from(format!("[image: {} byte data URI]", uri.len())));
    }

    let footer = match (m.status, m.metrics) {
        (MessageStatus::Stopped(reason), _) => Some(format!("[{reason}]")),
        (_, Some(metrics)) => Some(format!(
            "{} tokens in {:.2}s ({:.2} tokens/s)",
            metrics.total_tokens, metrics.time_taken, metrics.tokens_per_second
        )),
        _ => None,
    };
    if let Some(f) = footer {
        text.lines.push(Line::styled(f, Style::default().add_modifier(Modifier::DIM)));
    }
    text.lines.push(Line::from(""));
}

fn draw(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    session: &Session,
    input: &str,
    notice: &str,
) -> anyhow::Result<()> {
    terminal.draw(|f| {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(1), Constraint::Length(3)])
            .split(f.area());

        let mut text = Text::default();
        for m in session.messages() {
            render_message(m, &mut text);
        }

        let state = match session.active_turn() {
            Some(turn) => format!("generating {turn}"),
            None => "idle".to_string(),
        };
        let chat = Paragraph::new(text)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!("playground | model: {} | {state}", session.model())),
            )
            .wrap(Wrap { trim: false });

        let status = Paragraph::new(notice.to_string());
        let input_w = Paragraph::new(input.to_string())
            .block(Block::default().borders(Borders::ALL).title("input"));

        f.render_widget(chat, chunks[0]);
        f.render_widget(status, chunks[1]);
        f.render_widget(input_w, chunks[2]);

        let x = chunks[2].x + 1 + input.chars().count() as u16;
        let y = chunks[2].y + 1;
        f.set_cursor_position((x.min(chunks[2].x + chunks[2].width.saturating_sub(2)), y));
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::dispatch::DEFAULT_TIMEOUT;
    use crate::provider::{Dispatcher, Endpoints, Router};

    fn session() -> Session {
        let router = Router::new(&Endpoints {
            fast_llm: "http://127.0.0.1:9/api/groq".into(),
            inference: "http://127.0.0.1:9/api/huggingface".into(),
            codegen: "http://127.0.0.1:9/v1/chat/completions".into(),
            codegen_api_key: None,
        })
        .unwrap();
        let (s, _rx) = Session::new(router, Dispatcher::new(reqwest::Client::new(), DEFAULT_TIMEOUT), "gemma2-9b-it");
        s
    }

    #[test]
    fn model_command_switches_model() {
        let mut s = session();
        assert_eq!(
            handle_line("/model microsoft/phi-2", &mut s),
            Action::Notice("model set to: microsoft/phi-2".into())
        );
        assert_eq!(s.model(), "microsoft/phi-2");
        assert_eq!(handle_line("/model", &mut s), Action::Notice("usage: /model <id>".into()));
        assert_eq!(s.model(), "microsoft/phi-2");
    }

    #[test]
    fn idle_commands() {
        let mut s = session();
        assert_eq!(handle_line("", &mut s), Action::None);
        assert_eq!(handle_line("/stop", &mut s), Action::Notice("nothing to stop".into()));
        assert_eq!(handle_line("/clear", &mut s), Action::Notice("cleared".into()));
        assert_eq!(handle_line("/quit", &mut s), Action::Quit);
    }

    #[test]
    fn esc_quits_when_idle() {
        let mut s = session();
        let mut input = String::new();
        let esc = KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE);
        assert_eq!(handle_key(esc, &mut input, &mut s), Action::Quit);
    }

    #[tokio::test]
    async fn esc_stops_a_running_turn() {
        let mut s = session();
        let mut input = "hi".to_string();
        let enter = KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE);
        assert_eq!(handle_key(enter, &mut input, &mut s), Action::None);
        assert!(input.is_empty());
        assert!(s.is_in_flight());

        let esc = KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE);
        assert_eq!(handle_key(esc, &mut input, &mut s), Action::Notice("stopping...".into()));
    }
}

//! `MentorLink` terminal chat client.
//!
//! Opens a chat with one counterpart at a time. Configuration via CLI
//! flags, environment variables, or config file
//! (`~/.config/mentorlink/config.toml`).
//!
//! ```bash
//! # Against a local development server
//! cargo run --bin mentorlink -- --user-id u1 --first-name Asha \
//!     --token u1 --target u2
//!
//! # Production API; the real-time server is derived from it
//! MENTORLINK_API_URL=https://mentor.example.com/api/ cargo run --bin mentorlink
//! ```

use std::io;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tracing_appender::non_blocking::WorkerGuard;

use mentorlink::api::HttpBackend;
use mentorlink::app::{App, AppAction};
use mentorlink::config::{CliArgs, ClientConfig};
use mentorlink::transport::socketio::SocketIoConnector;
use mentorlink::ui;
use mentorlink::view::ChatView;

type View = ChatView<SocketIoConnector, HttpBackend>;

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    // CLI args > env > config file > defaults.
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config: {e}");
            ClientConfig::default()
        }
    };

    // Logs go to a file; ratatui owns the terminal.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!(api = %config.api_url, socket = %config.socket_url, "mentorlink starting");

    let view = match build_view(&config) {
        Ok(view) => view,
        Err(e) => {
            eprintln!("Error: {e}");
            return Err(io::Error::other(e));
        }
    };

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, view, &config).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    tracing::info!("mentorlink exiting");
    result
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown so buffered
/// log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("mentorlink.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

fn build_view(config: &ClientConfig) -> Result<View, String> {
    let mut connector = SocketIoConnector::new(&config.socket_url).map_err(|e| e.to_string())?;
    if let Some(token) = &config.token {
        connector = connector.with_token(token.clone());
    }
    let backend = HttpBackend::new(config.api_url.clone(), config.token.clone())
        .map_err(|e| e.to_string())?;
    Ok(ChatView::new(
        config.local_participant(),
        connector,
        Arc::new(backend),
        config.reconnect.clone(),
    ))
}

/// Main application loop.
async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    mut view: View,
    config: &ClientConfig,
) -> io::Result<()> {
    let local = config.local_participant();
    let mut app = App::new(local.map(|l| l.id), config.timestamp_format.clone());

    match config.initial_target() {
        Some(target) => open(&mut app, &mut view, target).await,
        None => app.push_notice("Type /open <userId> to start a chat"),
    }

    loop {
        terminal.draw(|frame| ui::draw(frame, &app))?;

        // Drain everything the session published since the last frame.
        if let Some(session) = view.session() {
            while let Some(event) = session.try_next_event() {
                app.apply_session_event(event);
            }
        }

        if event::poll(config.poll_timeout)?
            && let Event::Key(key) = event::read()?
        {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            if let Some(action) = app.handle_key_event(key) {
                dispatch(&mut app, &mut view, action).await;
            }
        }

        if app.should_quit {
            view.unmount().await;
            return Ok(());
        }
    }
}

async fn dispatch(app: &mut App, view: &mut View, action: AppAction) {
    match action {
        AppAction::Open(target) => open(app, view, target).await,
        AppAction::Send(text) => {
            let Some(session) = view.session() else {
                app.push_notice("No chat open: type /open <userId>");
                return;
            };
            if let Err(e) = session.send(&text).await {
                tracing::debug!(err = %e, "send rejected");
                app.push_notice(format!("Not sent: {e}"));
            }
        }
        AppAction::Reconnect => {
            if let Some(session) = view.session()
                && let Err(e) = session.reconnect()
            {
                app.push_notice(e.to_string());
            }
        }
    }
}

async fn open(app: &mut App, view: &mut View, target: mentorlink::chat::ParticipantId) {
    if view.target() == Some(&target) {
        return;
    }
    match view.mount(target.clone()).await {
        Ok(_) => app.set_target(target),
        Err(e) => app.push_notice(format!("Cannot open chat: {e}")),
    }
}

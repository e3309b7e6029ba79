mod app;
mod buffer;
mod config;
mod error;
mod filter;
mod follow;
mod highlight;
mod input;
mod logging;
mod poller;
mod prefs;
mod record;
mod render;
mod session;
mod ui;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind},
    execute,
    style::Stylize,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tokio::sync::mpsc;
use tracing::info;

use app::AppState;
use config::{Cli, Config};
use filter::SearchTerm;
use poller::{CursorState, PollOutcome, http::HttpTransport};
use prefs::{ConfigProvider, FilePrefs, LEVEL_KEY, MemoryPrefs};
use record::Level;
use session::Session;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_file.as_deref())?;

    let config = Config::from_cli(&cli);
    let prefs = open_prefs(&cli);

    if cli.dump {
        return dump(&cli, &config, prefs.as_ref()).await;
    }

    let transport = Arc::new(HttpTransport::new(&config.endpoint)?);
    let (mut session, mut poll_rx) = Session::new(&config, transport, prefs);
    if let Some(level) = cli.level {
        session.override_threshold(level);
    }

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Setup panic hook to restore terminal on panic
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), DisableMouseCapture, LeaveAlternateScreen);
        original_hook(panic);
    }));

    session.start();
    let mut state = AppState::new(session);

    let result = run_event_loop(&mut terminal, &mut state, &mut poll_rx).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), DisableMouseCapture, LeaveAlternateScreen)?;

    info!("exiting");
    result
}

/// Preferences from `--prefs`, the user config directory, or memory as a
/// last resort
fn open_prefs(cli: &Cli) -> Box<dyn ConfigProvider> {
    match cli.prefs.clone().or_else(FilePrefs::default_path) {
        Some(path) => Box::new(FilePrefs::open(path)),
        None => Box::new(MemoryPrefs::default()),
    }
}

/// Print what the server currently buffers, through the same pipeline the
/// live view uses
async fn dump(cli: &Cli, config: &Config, prefs: &dyn ConfigProvider) -> Result<()> {
    let transport = HttpTransport::new(&config.endpoint)?;
    let response = transport
        .snapshot(&CursorState::default(), config.poll_timeout)
        .await?;

    let records = buffer::evict(
        buffer::merge(Vec::new(), response.records),
        config.max_buffer,
        config.eviction,
    );
    let threshold = cli
        .level
        .or_else(|| prefs.get(LEVEL_KEY).and_then(|name| Level::parse(&name)))
        .unwrap_or_default();
    let search = SearchTerm::new(cli.search.clone().unwrap_or_default(), cli.regex);

    for line in session::compose(&records, threshold, &search) {
        println!("{}", line.to_text(|text| text.reverse().to_string()));
    }
    Ok(())
}

async fn run_event_loop<'a>(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    state: &mut AppState<'a>,
    poll_rx: &mut mpsc::Receiver<PollOutcome>,
) -> Result<()> {
    loop {
        // Check search debounce before drawing
        state.check_search_debounce();

        // Draw UI
        terminal.draw(|frame| {
            ui::draw(frame, state);
        })?;

        let size = terminal.size()?;
        // Header, status and search bars take three rows
        let page_size = size.height.saturating_sub(3) as usize;

        tokio::select! {
            // Check for terminal input events
            _ = tokio::time::sleep(Duration::from_millis(16)) => {
                if event::poll(Duration::ZERO)? {
                    match event::read()? {
                        Event::Key(key) => {
                            // Only handle key press events (not release)
                            if key.kind == KeyEventKind::Press {
                                input::handle_key(state, key, page_size);
                            }
                        }
                        Event::Mouse(mouse) => {
                            input::handle_mouse(state, mouse, size.width);
                        }
                        _ => {}
                    }
                }
            }

            // Poll completions
            Some(outcome) = poll_rx.recv() => {
                state.handle_poll(outcome);
            }
        }

        if state.should_quit {
            break;
        }
    }

    Ok(())
}

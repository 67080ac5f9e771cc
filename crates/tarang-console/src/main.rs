use clap::Parser;
use crossterm::{
    event::EventStream,
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{error::Error, io};
use tarang_console::{
    api::{HttpSimulationApi, SimulationApi},
    config::{Args, RuntimeConfig},
    connection::{Connector, SocketIoConnector},
    controller::Controller,
    logging::init_logging,
    page::Page,
    tui::{handle_input, render_ui, App},
};
use tokio::time::Instant;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = RuntimeConfig::from_args(Args::parse())?;
    let _log_guard = init_logging(&config.log_dir, config.log_stdout);
    info!(
        "console_start: server={} transports={:?} headless={}",
        config.server_url, config.connection.transports, config.headless
    );

    let api = HttpSimulationApi::new(config.server_url.clone(), config.request_timeout)?;
    let connector = SocketIoConnector::new(
        config.server_url.clone(),
        config.connection.clone(),
        api.http_client(),
    );
    let mut controller = Controller::new(api, connector, Page::simulation(), config.controller);

    let result = if config.headless {
        run_headless(&mut controller).await
    } else {
        run_tui(&mut controller).await
    };
    controller.cancel_start();
    info!("console_exit");
    result
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn run_tui<A, C>(controller: &mut Controller<A, C>) -> Result<(), Box<dyn Error>>
where
    A: SimulationApi,
    C: Connector,
{
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let mut events = EventStream::new();
    let mut app = App::default();

    loop {
        controller.tick(Instant::now());
        terminal.draw(|frame| render_ui(frame, controller.page(), &app))?;
        let deadline = controller.next_deadline();
        tokio::select! {
            input = controller.next_input() => {
                controller.handle_input(input, Instant::now());
            }
            maybe_event = events.next() => {
                if let Some(Ok(event)) = maybe_event {
                    if handle_input(event, &mut app, controller) {
                        break;
                    }
                }
            }
            _ = sleep_until_deadline(deadline) => {}
        }
    }

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Starts one run and mirrors its transcript and status to stdout until
/// the run ends.
async fn run_headless<A, C>(controller: &mut Controller<A, C>) -> Result<(), Box<dyn Error>>
where
    A: SimulationApi,
    C: Connector,
{
    let mut printed = 0usize;
    let mut last_status = String::new();
    let mut interrupted = false;
    controller.start_simulation();

    loop {
        controller.tick(Instant::now());
        let page = controller.page();
        if let Some(output) = &page.output {
            if output.lines().len() < printed {
                printed = 0;
            }
            for line in &output.lines()[printed..] {
                println!("{line}");
            }
            printed = output.lines().len();
        }
        if let Some(status) = &page.status {
            if status.text != last_status {
                eprintln!("[{}] {}", status.class, status.text);
                last_status = status.text.clone();
            }
        }

        let finished = controller.state().session.state().is_terminal()
            && !controller.start_in_flight()
            && controller.state().batcher.pending().is_empty();
        if finished {
            break;
        }

        let deadline = controller.next_deadline();
        tokio::select! {
            input = controller.next_input() => {
                controller.handle_input(input, Instant::now());
            }
            _ = sleep_until_deadline(deadline) => {}
            _ = tokio::signal::ctrl_c() => {
                if interrupted || !controller.stop_simulation() {
                    break;
                }
                interrupted = true;
            }
        }
    }
    Ok(())
}

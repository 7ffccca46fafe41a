use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{Event, KeyEventKind};
use tokio::sync::{mpsc, watch};

use chart_sync::config::Config;
use chart_sync::error::SyncError;
use chart_sync::health::ConnectionHealthMonitor;
use chart_sync::input::{is_interrupt, parse_main_command, step_interval_ms, UiCommand};
use chart_sync::model::Timeframe;
use chart_sync::scheduler::{PollWork, PollingScheduler};
use chart_sync::source::{DataSource, HttpDataSource};
use chart_sync::sync::ChartDataSynchronizer;
use chart_sync::ui::{self, AppState, FrameData, ReadyFlag, TerminalSurface};

type Synchronizer = ChartDataSynchronizer<TerminalSurface>;

const BIND_RETRY_DELAY: Duration = Duration::from_millis(100);
const CHART_MAX_POINTS: usize = 2_000;

/// Bind in the background, retrying while the terminal has not drawn yet.
fn spawn_bind(
    sync: Arc<Synchronizer>,
    symbol: String,
    timeframe: Timeframe,
    log_tx: mpsc::Sender<String>,
) {
    tokio::spawn(async move {
        loop {
            match sync.bind(&symbol, timeframe).await {
                Err(SyncError::NotReady) => tokio::time::sleep(BIND_RETRY_DELAY).await,
                Ok(summary) if summary.superseded => {
                    tracing::debug!(symbol = %symbol, %timeframe, "Bind superseded");
                    return;
                }
                Ok(summary) => {
                    let _ = log_tx
                        .send(format!(
                            "Loaded {} candles for {} {}",
                            summary.candles, symbol, timeframe
                        ))
                        .await;
                    return;
                }
                Err(e) => {
                    tracing::warn!(symbol = %symbol, %timeframe, error = %e, "Bind failed");
                    let _ = log_tx.send(format!("Bind failed: {}", e)).await;
                    return;
                }
            }
        }
    });
}

/// Fetch the timeframes offered for `symbol` so `t` can cycle through them.
fn spawn_timeframe_refresh(
    source: Arc<dyn DataSource>,
    symbol: String,
    timeframes_tx: watch::Sender<Vec<Timeframe>>,
) {
    tokio::spawn(async move {
        match source.list_timeframes(&symbol).await {
            Ok(list) => {
                timeframes_tx.send_replace(list);
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "Failed to list timeframes");
            }
        }
    });
}

/// Fetch the symbols the source stores so `s` can cycle through them too.
fn spawn_symbol_refresh(source: Arc<dyn DataSource>, symbols_tx: watch::Sender<Vec<String>>) {
    tokio::spawn(async move {
        match source.list_symbols().await {
            Ok(list) => {
                tracing::info!(count = list.len(), "Source symbols listed");
                symbols_tx.send_replace(list);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list symbols");
            }
        }
    });
}

fn poll_work(sync: Arc<Synchronizer>, log_tx: mpsc::Sender<String>) -> PollWork {
    Arc::new(move || {
        let sync = sync.clone();
        let log_tx = log_tx.clone();
        Box::pin(async move {
            match sync.poll().await {
                Ok(_) | Err(SyncError::NotBound) | Err(SyncError::NotReady) => {}
                Err(e @ SyncError::DataUnavailable { .. }) => {
                    let _ = log_tx.try_send(e.to_string());
                }
                // Transport failures only move the health indicator.
                Err(e) => tracing::debug!(error = %e, "Poll failed"),
            }
        })
    })
}

fn rebind(
    sync: &Arc<Synchronizer>,
    scheduler: &PollingScheduler,
    config: &Config,
    app_state: &mut AppState,
    log_tx: &mpsc::Sender<String>,
) {
    let symbol = app_state.symbol().to_string();
    let timeframe = app_state.timeframe;
    if config.sync.poll_interval_ms.is_none() {
        let interval = config.poll_interval(timeframe);
        scheduler.set_interval(interval);
        app_state.poll_interval_ms = interval.as_millis() as u64;
    }
    app_state.push_log(format!("Switching to {} {}", symbol, timeframe));
    spawn_bind(sync.clone(), symbol, timeframe, log_tx.clone());
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            eprintln!("Set CHART_SYNC_CONFIG or create config/default.toml");
            std::process::exit(1);
        }
    };

    // Log to a file so it doesn't interfere with the TUI
    let log_file = std::fs::File::create("chart-sync.log")?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(config.logging.level.as_str())
            }),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .json()
        .init();

    let symbols = config.source.watch_symbols();
    let timeframe = config.source.timeframe()?;
    let presentation = config.presentation()?;
    tracing::info!(
        base_url = %config.source.base_url,
        symbol = %symbols[0],
        %timeframe,
        "Starting chart-sync"
    );

    let http = Arc::new(
        HttpDataSource::new(&config.source.base_url, config.source.request_timeout())
            .context("failed to build data source client")?,
    );
    let source: Arc<dyn DataSource> = http.clone();
    let health = ConnectionHealthMonitor::new(config.health_config());
    let ready = ReadyFlag::new();
    let sync = ChartDataSynchronizer::new(
        source.clone(),
        health.clone(),
        TerminalSurface::new(ready.clone()),
        presentation,
        config.sync_config(),
    );

    let (log_tx, mut log_rx) = mpsc::channel::<String>(64);
    let (timeframes_tx, timeframes_rx) = watch::channel::<Vec<Timeframe>>(Vec::new());
    let (symbols_tx, mut symbols_rx) = watch::channel::<Vec<String>>(Vec::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    {
        let http = http.clone();
        let log_tx = log_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = http.ping().await {
                tracing::warn!(error = %e, "Data source unreachable at startup");
                let _ = log_tx
                    .send(format!("Data source unreachable: {}", e))
                    .await;
                return;
            }
            match http.info().await {
                Ok(info) => {
                    tracing::info!(
                        total_tables = info.total_tables,
                        total_candles = info.total_candles,
                        "Source info"
                    );
                    let _ = log_tx.send(format!("Source: {}", info.summary())).await;
                }
                Err(e) => tracing::debug!(error = %e, "Source info unavailable"),
            }
        });
    }

    {
        let mut indicator = health.subscribe();
        let log_tx = log_tx.clone();
        tokio::spawn(async move {
            while indicator.changed().await.is_ok() {
                let label = indicator.borrow_and_update().label();
                if log_tx.send(format!("Connection: {}", label)).await.is_err() {
                    break;
                }
            }
        });
    }

    let ctrl_c_shutdown = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Ctrl+C received");
        let _ = ctrl_c_shutdown.send(true);
    });

    let poll_interval = config.poll_interval(timeframe);
    let mut app_state = AppState::new(
        symbols,
        timeframe,
        poll_interval.as_millis() as u64,
        presentation,
    );
    app_state.push_log(format!(
        "chart-sync started | {} {} | {}",
        app_state.symbol(),
        timeframe,
        config.source.base_url
    ));

    spawn_bind(
        sync.clone(),
        app_state.symbol().to_string(),
        timeframe,
        log_tx.clone(),
    );
    spawn_timeframe_refresh(
        source.clone(),
        app_state.symbol().to_string(),
        timeframes_tx.clone(),
    );
    spawn_symbol_refresh(source.clone(), symbols_tx.clone());

    let scheduler = PollingScheduler::new();
    scheduler.start(poll_interval, poll_work(sync.clone(), log_tx.clone()));

    let mut terminal = ratatui::init();
    loop {
        while let Ok(msg) = log_rx.try_recv() {
            app_state.push_log(msg);
        }
        if symbols_rx.has_changed().unwrap_or(false) {
            let reported = symbols_rx.borrow_and_update().clone();
            let added = app_state.merge_symbols(&reported);
            if added > 0 {
                app_state.push_log(format!("{} more symbols available from source", added));
            }
        }

        let data = FrameData {
            chart: sync.with_surface(|s| s.view(CHART_MAX_POINTS)),
            side_panel: sync.side_panel(),
            status: health.status(),
            candle_count: sync.displayed_candle_count(),
            reload_pending: sync.reload_pending(),
        };
        terminal.draw(|frame| ui::render(frame, &app_state, &data))?;
        ready.set();

        if crossterm::event::poll(Duration::from_millis(config.ui.refresh_rate_ms))? {
            if let Event::Key(key) = crossterm::event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                if is_interrupt(&key) {
                    let _ = shutdown_tx.send(true);
                } else if let Some(cmd) = parse_main_command(&key.code) {
                    match cmd {
                        UiCommand::Quit => {
                            tracing::info!("User quit");
                            let _ = shutdown_tx.send(true);
                        }
                        UiCommand::FasterPolling | UiCommand::SlowerPolling => {
                            let next = step_interval_ms(app_state.poll_interval_ms, cmd);
                            scheduler.set_interval(Duration::from_millis(next));
                            app_state.poll_interval_ms = next;
                            app_state.push_log(format!("Poll interval {}ms", next));
                        }
                        UiCommand::CycleChartType | UiCommand::ToggleVolume => {
                            let mut next = app_state.presentation;
                            if cmd == UiCommand::CycleChartType {
                                next.chart_type = next.chart_type.next();
                            } else {
                                next.show_volume = !next.show_volume;
                            }
                            app_state.presentation = next;
                            let sync = sync.clone();
                            let log_tx = log_tx.clone();
                            tokio::spawn(async move {
                                if let Err(e) =
                                    sync.set_presentation(next.chart_type, next.show_volume).await
                                {
                                    let _ = log_tx.send(format!("Restyle failed: {}", e)).await;
                                }
                            });
                        }
                        UiCommand::Reload => {
                            let sync = sync.clone();
                            let log_tx = log_tx.clone();
                            tokio::spawn(async move {
                                let msg = match sync.reload().await {
                                    Ok(result) => format!("Reload: {:?}", result),
                                    Err(e) => format!("Reload failed: {}", e),
                                };
                                let _ = log_tx.send(msg).await;
                            });
                        }
                        UiCommand::NextSymbol => {
                            app_state.cycle_symbol();
                            spawn_timeframe_refresh(
                                source.clone(),
                                app_state.symbol().to_string(),
                                timeframes_tx.clone(),
                            );
                            rebind(&sync, &scheduler, &config, &mut app_state, &log_tx);
                        }
                        UiCommand::NextTimeframe => {
                            let available = timeframes_rx.borrow().clone();
                            app_state.cycle_timeframe(&available);
                            rebind(&sync, &scheduler, &config, &mut app_state, &log_tx);
                        }
                    }
                }
            }
        }

        if *shutdown_rx.borrow() {
            break;
        }
    }

    scheduler.stop();
    ratatui::restore();
    tracing::info!("Shutdown complete");
    println!("Goodbye! Check chart-sync.log for details.");
    Ok(())
}

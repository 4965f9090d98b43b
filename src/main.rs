use anyhow::{Context, Result};
use clap::Parser;

use savekeeper::{
    cli::{Cli, OutputFormat},
    config::AppConfig,
    console,
    tui::{restore_terminal, setup_terminal, TuiApp},
    Blacklist, Engine, EngineHandle, EngineOptions,
};

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.setup_logging();

    let mut config = AppConfig::load(&cli.config);
    cli.apply_path(&mut config);
    let persisted = config.clone();
    cli.apply_session_flags(&mut config);

    let watch_dir = match Cli::validate(&config) {
        Ok(dir) => dir,
        Err(err) => {
            eprintln!("Error: {}", err);
            std::process::exit(1);
        }
    };
    persisted.save(&cli.config);

    tracing::info!("Starting savekeeper on: {}", watch_dir.display());
    tracing::info!("Backups are stored in: {}", config.backup_root.display());

    let (engine, handle) = Engine::new(EngineOptions {
        watch_dir,
        backup_root: config.backup_root.clone(),
        blacklist: Blacklist::parse(&config.file_name_blacklist),
        settings: config.settings(),
        feedback: None,
    });

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let engine_job = runtime.spawn(engine.run());

    match cli.output {
        OutputFormat::Tui => run_tui_mode(handle)?,
        format => run_console_mode(&runtime, handle, format)?,
    }

    runtime
        .block_on(engine_job)
        .context("Backup engine task failed")?;
    tracing::info!("All done");
    Ok(())
}

fn run_tui_mode(handle: EngineHandle) -> Result<()> {
    let terminal_handle = handle.clone();
    let mut terminal = setup_terminal()?;

    let app = TuiApp::new(handle);
    let res = app.run(&mut terminal);

    if let Err(err) = restore_terminal(&mut terminal) {
        eprintln!("Failed to restore terminal: {}", err);
    }

    if let Err(err) = res {
        terminal_handle.request_termination();
        eprintln!("Application error: {}", err);
    }

    Ok(())
}

fn run_console_mode(
    runtime: &tokio::runtime::Runtime,
    handle: EngineHandle,
    format: OutputFormat,
) -> Result<()> {
    let interrupt = handle.clone();
    ctrlc::set_handler(move || {
        interrupt.request_termination();
    })?;

    runtime.spawn(console::print_snapshots(handle.snapshots(), format));

    eprintln!("Commands: list | restore <file> <timestamp> | quit (Ctrl+C also quits)");
    let stdin_handle = handle.clone();
    std::thread::spawn(move || {
        console::read_commands(std::io::stdin().lock(), &stdin_handle, format);
    });

    Ok(())
}

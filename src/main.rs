use anyhow::{Context, Result};
use clap::Parser;
use log::{info, LevelFilter};
use pulse_daq::*;
use simplelog::{ConfigBuilder, WriteLogger};
use std::{fs::File, path::PathBuf, sync::Arc};

#[derive(Parser, Debug)]
#[command(version, about = "MSO5000 pulse analyser console")]
struct Args {
    /// TOML file overriding the default settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log file, defaults to the one named in the settings
    #[arg(short, long)]
    log_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = Conf::load(args.config.as_deref())?;

    // The terminal belongs to the console, so log to a file.
    let log_path = args
        .log_file
        .unwrap_or_else(|| PathBuf::from(&config.export_settings.log_file));
    let log_file = File::create(&log_path)
        .with_context(|| format!("cannot create log file {}", log_path.display()))?;
    WriteLogger::init(
        LevelFilter::Info,
        ConfigBuilder::new().set_thread_level(LevelFilter::Error).build(),
        log_file,
    )?;
    info!("console starting, device {}", config.run_settings.device);

    let engine = Arc::new(ScopeEngine::new());
    let form = Arc::new(OperatorForm::new(FormValues::from_config(&config)));
    let (tx_frames, rx_frames) = crossbeam_channel::unbounded();
    let controller = RunController::new(engine, form, tx_frames, config.update_period());

    let mut terminal = ratatui::init();
    let result = Console::new(Arc::clone(&controller), rx_frames).run(&mut terminal);
    ratatui::restore();

    // stop everything at exit
    controller.shutdown();
    info!("console closed");

    result
}

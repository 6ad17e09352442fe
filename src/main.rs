use clap::{Arg, ArgAction, Command, value_parser};
use framestamp::config::{Config, app_name, version};
use framestamp::workers::WorkerClose;
use framestamp::workers::factory::{RecordingFactory, controller_for};
use framestamp::workers::library::LibraryStore;
use framestamp::workers::recorder::Recorder;
use std::path::PathBuf;
use std::sync::Arc;
use std::{panic, process};

fn cli() -> Command {
    Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file.")
                .value_parser(value_parser!(PathBuf))
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("output-dir")
                .short('o')
                .long("output-dir")
                .value_name("DIR")
                .help("Directory recordings are written to while a session runs.")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("library-dir")
                .short('l')
                .long("library-dir")
                .value_name("DIR")
                .help("Directory finished recordings are moved to.")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("frames")
                .short('n')
                .long("frames")
                .value_name("N")
                .help("Number of counted frames after which the recording is finalized.")
                .value_parser(value_parser!(u64)),
        )
}

fn load_config(matches: &clap::ArgMatches) -> anyhow::Result<Config> {
    let mut config = Config::load(matches.get_one::<PathBuf>("config").map(|p| p.as_path()))?;
    if let Some(dir) = matches.get_one::<PathBuf>("output-dir") {
        config.output_dir = dir.clone();
    }
    if let Some(dir) = matches.get_one::<PathBuf>("library-dir") {
        config.library_dir = dir.clone();
    }
    if let Some(frames) = matches.get_one::<u64>("frames") {
        config.frame_budget = *frames;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let matches = cli().get_matches();

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(105);
    }));

    // no stop control: Ctrl-C abandons the recording
    if let Err(e) = ctrlc::set_handler(move || {
        process::exit(130);
    }) {
        log::warn!("Error setting Ctrl-C handler: {}", e);
    }

    let config = match load_config(&matches) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{:#}", e);
            process::exit(2);
        }
    };

    match run(config).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            log::error!("{:#}", e);
            process::exit(1);
        }
    }
}

/// Record one session; returns whether it was saved
async fn run(config: Config) -> anyhow::Result<bool> {
    log::info!(
        "{} {}: {}x{} @ {} fps, {} frames, {:?} encoder",
        app_name(),
        version(),
        config.width,
        config.height,
        config.frame_rate,
        config.frame_budget,
        config.encoder
    );

    let controller = controller_for(&config)?;
    let persistence = Arc::new(LibraryStore::new(config.library_dir.clone()));
    let (mut recorder, handle, mut reports) = Recorder::spawn(
        controller,
        Box::new(RecordingFactory::new(config.clone())),
        persistence,
        config.sink_queue_depth,
    );

    let id = handle.start().await?;
    log::info!("Recording session {}", id);

    let report = reports.recv().await;
    recorder.close();
    recorder.join().await;

    match report {
        Some(report) => {
            if report.success {
                log::info!("{}", report);
                if let Some(location) = &report.location {
                    println!("{}", location.display());
                }
            } else {
                log::error!("{}", report);
            }
            Ok(report.success)
        }
        None => anyhow::bail!("Recorder stopped without a report"),
    }
}

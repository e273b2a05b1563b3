mod demo;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use teq_core::{Session, TeqConfig, TransportState};
use teq_render::{OfflineBackend, OfflineRunner, cv_samples, write_cv_wav};

#[derive(Parser)]
#[command(name = "teq")]
#[command(version, about = "Pattern sequencer for MIDI, CV and control tracks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path (default: ~/.config/teq/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend client name
    #[arg(long)]
    client_name: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the demo song offline and print the MIDI it produces
    Render {
        /// Number of blocks to process
        #[arg(long, default_value = "400")]
        blocks: usize,

        #[arg(long, default_value = "1024")]
        block_size: u32,

        #[arg(long, default_value = "48000")]
        sample_rate: u32,

        /// Write the CV track to this WAV file
        #[arg(long)]
        cv_wav: Option<PathBuf>,
    },
    /// Play the demo song through JACK until Enter is pressed
    #[cfg(feature = "jack")]
    Play,
    /// Print the effective configuration
    Config {
        /// Also write it to the config file
        #[arg(long)]
        write: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => TeqConfig::load_from(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => TeqConfig::load(),
    };
    if let Some(name) = cli.client_name {
        config.client_name = name;
    }

    match cli.command {
        Some(Commands::Render {
            blocks,
            block_size,
            sample_rate,
            cv_wav,
        }) => render(config, blocks, block_size, sample_rate, cv_wav),
        #[cfg(feature = "jack")]
        Some(Commands::Play) => play(config),
        Some(Commands::Config { write }) => {
            print!("{}", config.to_toml_string()?);
            if write {
                let path = cli
                    .config
                    .or_else(TeqConfig::config_path)
                    .context("no config directory")?;
                config.save_to(&path)?;
                log::info!("wrote {}", path.display());
            }
            Ok(())
        }
        None => render(config, 400, 1024, 48_000, None),
    }
}

fn render(
    config: TeqConfig,
    blocks: usize,
    block_size: u32,
    sample_rate: u32,
    cv_wav: Option<PathBuf>,
) -> Result<()> {
    let backend = OfflineBackend::new(sample_rate);
    let (mut session, engine) = Session::new(config, backend.clone())?;
    let runner = OfflineRunner::spawn(engine, backend.clone(), block_size);

    demo::build(&mut session)?;
    // Setup blocks carry no output
    runner.drain();
    session.set_transport_state(TransportState::Playing)?;

    let timeout = Duration::from_secs(30) + Duration::from_millis(blocks as u64);
    let rendered = runner.render(blocks, timeout);
    if rendered.len() < blocks {
        log::warn!("only {} of {blocks} blocks rendered", rendered.len());
    }

    for block in &rendered {
        for record in &block.midi {
            let port = backend.port_name(record.port).unwrap_or_default();
            let [status, data1, data2] = record.bytes;
            println!(
                "{:>10} {port:<4} {status:02x} {data1:02x} {data2:02x}",
                block.frame_time + record.frame as u64
            );
        }
    }

    if let Some(info) = session.poll() {
        log::info!(
            "stopped at pattern {} tick {} ({:?})",
            info.transport_position.pattern,
            info.transport_position.tick,
            info.transport_state
        );
    }

    if let Some(path) = cv_wav {
        let port = session
            .song()
            .track(demo::CV_TRACK)?
            .port
            .context("cv track has no port")?;
        write_cv_wav(&cv_samples(&rendered, port), sample_rate, &path)?;
        log::info!("wrote {}", path.display());
    }

    runner.stop()?;
    Ok(())
}

#[cfg(feature = "jack")]
fn play(config: TeqConfig) -> Result<()> {
    use crossbeam_channel::{RecvTimeoutError, bounded};
    use teq_engine::jack_backend::JackBackend;

    let backend = JackBackend::open(&config.client_name, config.max_tracks)?;
    let (mut session, engine) = Session::new(config, backend)?;
    session.registry_mut().activate(engine)?;

    demo::build(&mut session)?;
    session.set_transport_state(TransportState::Playing)?;

    let (tx, rx) = bounded(1);
    std::thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        let _ = tx.send(());
    });
    println!("Press Enter to stop...");

    while let Err(RecvTimeoutError::Timeout) = rx.recv_timeout(Duration::from_millis(250)) {
        if let Some(info) = session.poll() {
            log::debug!(
                "pattern {} tick {}",
                info.transport_position.pattern,
                info.transport_position.tick
            );
        }
        session.gc();
    }

    session.set_transport_state(TransportState::Stopped)?;
    Ok(())
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use cadenza_lib::audio::ingest_wav_file;
use cadenza_lib::engine::{AnalysisEngine, EngineConfig, Worker};
use cadenza_lib::messaging::{trace_subscriber, OscClient, OscHub, OscServer, TraceWriter};

#[derive(Parser, Debug)]
#[command(name = "cadenza", about = "Real-time groove and harmony analysis with OSC output")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a WAV file through the engine as if it arrived from an audio callback
    Analyze {
        /// Input WAV file
        input: PathBuf,

        /// Engine config (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Forward every message to this OSC/UDP address
        #[arg(long)]
        osc_target: Option<SocketAddr>,

        /// Append every message to a JSONL trace
        #[arg(long)]
        trace: Option<PathBuf>,

        /// Also accept OSC messages on this UDP address while analyzing
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Sample frames per simulated callback
        #[arg(long, default_value_t = 512)]
        block: usize,

        /// Pace the blocks at the file's sample rate
        #[arg(long)]
        realtime: bool,
    },

    /// Print OSC messages arriving on a UDP address
    Listen {
        /// Address to bind, e.g. 127.0.0.1:9000
        bind: SocketAddr,

        /// Append received messages to a JSONL trace
        #[arg(long)]
        trace: Option<PathBuf>,
    },

    /// Print the default configuration as TOML
    DefaultConfig,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    match Cli::parse().command {
        Command::Analyze {
            input,
            config,
            osc_target,
            trace,
            listen,
            block,
            realtime,
        } => analyze(input, config, osc_target, trace, listen, block, realtime),
        Command::Listen { bind, trace } => listen(bind, trace),
        Command::DefaultConfig => {
            print!("{}", EngineConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

fn add_trace(hub: &mut OscHub, path: PathBuf) -> Result<()> {
    let writer = TraceWriter::new(path.clone())
        .with_context(|| format!("Failed to open trace {}", path.display()))?;
    hub.subscribe_all(trace_subscriber(Arc::new(Mutex::new(writer))));
    log::info!("Tracing messages to {}", path.display());
    Ok(())
}

fn analyze(
    input: PathBuf,
    config_path: Option<PathBuf>,
    osc_target: Option<SocketAddr>,
    trace: Option<PathBuf>,
    listen: Option<SocketAddr>,
    block: usize,
    realtime: bool,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => EngineConfig::load(&path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let audio = ingest_wav_file(&input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    log::info!(
        "Loaded {}: {} Hz, {} ch, {:.2}s",
        input.display(),
        audio.sample_rate,
        audio.channels,
        audio.duration_secs()
    );

    // The file decides the stream format
    config.audio.sample_rate = audio.sample_rate;
    config.audio.channels = audio.channels;

    let (mut engine, consumer) = AnalysisEngine::with_config(config)?;

    let mut hub = OscHub::new();
    hub.subscribe_all(|message| log::info!("{}", message));
    if let Some(path) = trace {
        add_trace(&mut hub, path)?;
    }
    if let Some(target) = osc_target {
        let mut client = OscClient::connect("0.0.0.0:0", target)?;
        log::info!("Forwarding messages to {}", client.target());
        hub.subscribe_all(move |message| {
            if let Err(e) = client.send(message) {
                log::warn!("OSC send failed: {}", e);
            }
        });
    }

    let server = match listen {
        Some(addr) => Some(
            OscServer::bind(addr, engine.config().messaging.max_packets_per_poll)
                .with_context(|| format!("Failed to bind {}", addr))?,
        ),
        None => None,
    };

    let worker = Worker::spawn(consumer, hub, server, &engine.config().messaging)?;

    let started = Instant::now();
    let block_duration = Duration::from_secs_f64(block.max(1) as f64 / audio.sample_rate as f64);
    for (i, frame) in audio.blocks(block).enumerate() {
        engine.process(&frame);
        if realtime {
            let due = block_duration * (i as u32 + 1);
            if let Some(wait) = due.checked_sub(started.elapsed()) {
                thread::sleep(wait);
            }
        }
    }

    let report = worker.stop();
    let stats = engine.stats();
    log::info!(
        "Analyzed {} frames in {:.2}s: {} messages delivered, {} dropped",
        stats.analysis_frames,
        started.elapsed().as_secs_f64(),
        report.drained,
        stats.messages_dropped
    );
    if let Some(server) = report.server {
        log::info!(
            "Received {} OSC packets ({} messages, {} malformed)",
            server.packets,
            server.messages,
            server.protocol_errors
        );
    }

    match engine.tempo() {
        Some(tempo) => println!("Tempo: {:.1} BPM (confidence {:.2})", tempo.bpm, tempo.confidence),
        None => println!("Tempo: -"),
    }
    match engine.chord() {
        Some(chord) => println!("Chord: {} (score {:.2})", chord.name(), chord.score),
        None => println!("Chord: -"),
    }
    match engine.key() {
        Some(key) => println!(
            "Key:   {}{}",
            key.name(),
            if key.ambiguous { " (ambiguous)" } else { "" }
        ),
        None => println!("Key:   -"),
    }

    Ok(())
}

fn listen(bind: SocketAddr, trace: Option<PathBuf>) -> Result<()> {
    let mut hub = OscHub::new();
    hub.subscribe_all(|message| println!("{}", message));
    if let Some(path) = trace {
        add_trace(&mut hub, path)?;
    }

    let mut server = OscServer::bind(bind, 64)
        .with_context(|| format!("Failed to bind {}", bind))?;

    loop {
        if server.poll(&mut hub)? == 0 {
            thread::sleep(Duration::from_millis(5));
        }
    }
}

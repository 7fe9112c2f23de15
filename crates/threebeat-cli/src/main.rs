//! threebeat: three-voice step sequencer and MIDI exporter

mod config;

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use crossbeam_channel::{unbounded, Receiver, TryRecvError};
use fastrand::Rng;
use threebeat_core::{export_to_path, PartialState, PatternModel, SequencerState};
use threebeat_services::{render_to_wav, JsonFileStore, RealtimeHost, SequencerEngine, StepObserver};
use tracing::{info, trace};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::CliConfig;

const USAGE: &str = "\
usage: threebeat <command> [args]

commands:
  show                       print the stored pattern as JSON
  dispatch <action-json>...  apply actions, e.g. '{\"type\":\"SET_BPM\",\"payload\":140}'
  reset                      restore the default pattern
  export [file.mid]          write the pattern as a MIDI file
  render [file.wav] [secs]   render the pattern offline to a WAV file
  play [secs]                play through the default output device; reads
                             actions from stdin, 'quit' stops";

/// Idle time between scheduler pumps during live playback
const PUMP_INTERVAL: Duration = Duration::from_millis(5);

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("threebeat=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        eprintln!("{USAGE}");
        return Ok(());
    };

    let config = config::load_config();
    let mut model = open_model(&config);

    match command.as_str() {
        "show" => println!("{}", serde_json::to_string_pretty(model.state())?),
        "dispatch" => {
            if rest.is_empty() {
                bail!("dispatch needs at least one action");
            }
            for action in rest {
                model.dispatch_json(action);
            }
        }
        "reset" => {
            model.load_snapshot(PartialState::from(SequencerState::default()));
            info!("Pattern reset to defaults");
        }
        "export" => export(&model, &config, rest.first())?,
        "render" => {
            let path = rest.first().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("3beat-pattern.wav"));
            let seconds = match rest.get(1) {
                Some(s) => s.parse::<f64>().with_context(|| format!("invalid length {s:?}"))?,
                None => config.render_seconds,
            };
            runtime()?.block_on(render_to_wav(model.state(), seconds, config.sample_rate, config.seed(), &path))?;
            println!("Rendered {}", path.display());
        }
        "play" => {
            let seconds = match rest.first() {
                Some(s) => Some(s.parse::<f64>().with_context(|| format!("invalid length {s:?}"))?),
                None => None,
            };
            runtime()?.block_on(play(&mut model, seconds))?;
        }
        other => {
            eprintln!("unknown command {other:?}\n\n{USAGE}");
            std::process::exit(2);
        }
    }
    Ok(())
}

fn open_model(config: &CliConfig) -> PatternModel {
    let store = JsonFileStore::new(config.state_path());
    let mut model = PatternModel::default().with_store(Box::new(store));
    model.load_from_store();
    model
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("failed to start async runtime")
}

fn export(model: &PatternModel, config: &CliConfig, path: Option<&String>) -> anyhow::Result<()> {
    let path = path.map(PathBuf::from).unwrap_or_else(|| config.export_path());
    let mut rng = Rng::with_seed(config.seed());
    let outcome = export_to_path(model.state(), &mut rng, &path);
    if !outcome.success {
        bail!("{}", outcome.message);
    }
    println!("{} ({})", outcome.message, path.display());
    Ok(())
}

/// Logs playback position at trace level
struct StepTrace;

impl StepObserver for StepTrace {
    fn on_step(&mut self, voice_index: usize, step: usize, time: f64) {
        trace!(voice = voice_index, step, time, "Step");
    }
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn play(model: &mut PatternModel, seconds: Option<f64>) -> anyhow::Result<()> {
    let host = RealtimeHost::open()?;
    let mut engine = SequencerEngine::new(host, model.state());
    engine.set_observer(Box::new(StepTrace));
    engine.attach(model);

    let input = spawn_stdin_reader();
    model.set_playing(true);
    engine.sync(model.state()).await;
    if !engine.is_playing() {
        bail!("playback could not start");
    }

    let started = Instant::now();
    let mut quit = false;
    while !quit {
        if seconds.is_some_and(|limit| started.elapsed().as_secs_f64() >= limit) {
            break;
        }
        loop {
            match input.try_recv() {
                Ok(line) => match line.trim() {
                    "" => {}
                    "quit" | "q" => quit = true,
                    action => model.dispatch_json(action),
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    // end of input only stops an open-ended session
                    quit |= seconds.is_none();
                    break;
                }
            }
        }
        engine.sync(model.state()).await;
        engine.pump();
        tokio::time::sleep(PUMP_INTERVAL).await;
    }

    model.set_playing(false);
    engine.sync(model.state()).await;
    engine.shutdown();
    Ok(())
}

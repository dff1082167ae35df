//! Play a set of stems in sync through the reverb bus
//!
//! Run with: cargo run --example stem_player --features cpal_sink -- drums.wav bass.wav vox.wav
//!
//! An optional `stembus.toml` in the working directory is picked up for the
//! asset root, impulse response, queue size and bus settings.

use std::path::Path;
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use stembus::{BufferCache, Engine, MixerConfig, Session, SessionEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = if Path::new("stembus.toml").exists() {
        MixerConfig::load("stembus.toml")?
    } else {
        MixerConfig::default()
    };

    let stems: Vec<String> = std::env::args().skip(1).collect();
    if stems.is_empty() {
        return Err("usage: stem_player <stem>...".into());
    }

    let engine = config.configure(Engine::default_output().ok_or("No audio device")?);
    let cache = Arc::new(BufferCache::new(config.asset_source()));
    let mut session = Session::open(engine, cache, &config).await?;

    for stem in &stems {
        session.import_track(stem.as_str(), stem.as_str())?;
    }
    let progress = session
        .load_pending(|p| println!("loaded {}/{} ({} failed)", p.loaded, p.total, p.failed))
        .await;
    if progress.loaded == 0 {
        return Err("no stem could be loaded".into());
    }

    let report = session.play_all()?;
    println!("Playing {} stems from {:.2}s... Ctrl+C to stop", report.started.len(), report.offset);

    // Render ahead of the device and poll like a UI frame would
    let start = Instant::now();
    let mut last_print = 0.0;
    loop {
        session.catch_up(start.elapsed(), 6);

        let poll = session.poll();
        if poll.position - last_print >= 1.0 {
            last_print = poll.position;
            println!("{:>6.1}s", poll.position);
        }
        if poll.events.contains(&SessionEvent::PlaybackEnded) {
            break;
        }
        sleep(Duration::from_micros(500));
    }

    println!("Done");
    Ok(())
}

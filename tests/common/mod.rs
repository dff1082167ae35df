#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;

use stembus::{BufferCache, Engine, MemoryAssetSource, MixerConfig, Session, TrackId};

/// Engine rate used by the session tests: 4 s is exactly 1000 blocks.
pub const ENGINE_RATE: u32 = 16_000;

/// Fixture rate, deliberately different from the engine's
pub const FIXTURE_RATE: u32 = 8_000;

/// A 16-bit WAV file of a quiet sine.
pub fn wav_bytes(secs: f32, sample_rate: u32, channels: u16) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        let frames = (secs * sample_rate as f32).round() as usize;
        for i in 0..frames {
            let s = ((i as f32 * 0.07).sin() * 0.4 * i16::MAX as f32) as i16;
            for _ in 0..channels {
                writer.write_sample(s).unwrap();
            }
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub fn test_config() -> MixerConfig {
    MixerConfig {
        sample_rate: ENGINE_RATE,
        analyser_window: 256,
        ..MixerConfig::default()
    }
}

/// A session with one mono track per `(url, seconds)`, all loaded.
pub async fn loaded_session(tracks: &[(&str, f32)]) -> (Session<MemoryAssetSource>, Vec<TrackId>) {
    let config = test_config();
    session_on(config.engine(), &config, tracks).await
}

/// [`loaded_session`] on a caller-built engine, e.g. one with a capture sink.
pub async fn session_on(
    engine: Engine,
    config: &MixerConfig,
    tracks: &[(&str, f32)],
) -> (Session<MemoryAssetSource>, Vec<TrackId>) {
    let source = MemoryAssetSource::new();
    for (url, secs) in tracks {
        source.insert(*url, wav_bytes(*secs, FIXTURE_RATE, 1));
    }
    let cache = Arc::new(BufferCache::new(source));
    let mut session = Session::new(engine, cache, config).unwrap();

    let ids = tracks
        .iter()
        .map(|(url, _)| session.import_track(*url, *url).unwrap())
        .collect();
    let progress = session.load_pending(|_| {}).await;
    assert_eq!(progress.loaded, tracks.len());
    (session, ids)
}

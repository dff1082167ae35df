mod common;

use std::sync::Arc;

use approx::assert_abs_diff_eq;
use common::{loaded_session, session_on, test_config, wav_bytes, ENGINE_RATE, FIXTURE_RATE};
use rtrb::RingBuffer;
use stembus::nodes::RtrbSink;
use stembus::{
    AudioBuffer, BufferCache, Command, Engine, FilterBand, LoadError, LoadState, MemoryAssetSource, MixerConfig,
    Outcome, Session, SessionError, SessionEvent, StereoChannel, TransportState, UiContext, UnitState,
};

#[tokio::test]
async fn pause_captures_elapsed_and_resume_starts_there() {
    let (mut session, ids) = loaded_session(&[("a.wav", 10.0), ("b.wav", 6.0)]).await;
    let (a, b) = (ids[0], ids[1]);

    let report = session.play_all().unwrap();
    assert_eq!(report.offset, 0.0);
    assert_eq!(report.started, vec![a, b]);

    session.render_secs(4.0);
    let elapsed = session.pause_all().unwrap();
    assert_abs_diff_eq!(elapsed, 4.0, epsilon = 1e-9);
    assert_abs_diff_eq!(session.transport().pause_elapsed(), 4.0, epsilon = 1e-9);
    assert!(session.active().is_empty());
    assert_eq!(session.unit_state(a), Some(UnitState::Stopped));

    let report = session.play_all().unwrap();
    assert_abs_diff_eq!(report.offset, 4.0, epsilon = 1e-9);
    let live_a = session.active().get(a).unwrap();
    let live_b = session.active().get(b).unwrap();
    assert_eq!(live_a.offset(), live_b.offset());

    let remaining = session.track(a).unwrap().duration_secs().unwrap() - live_a.offset();
    assert_abs_diff_eq!(remaining, 6.0, epsilon = 1e-6);
}

#[tokio::test]
async fn resume_is_within_one_block_of_the_pause() {
    let (mut session, _) = loaded_session(&[("a.wav", 3.0)]).await;
    session.play_all().unwrap();
    session.render_secs(1.3);
    let elapsed = session.pause_all().unwrap();

    let block = session.engine().block_secs();
    assert!((elapsed - 1.3).abs() <= block);

    // Time spent paused doesn't count
    session.render_secs(0.7);
    let report = session.play_all().unwrap();
    assert_eq!(report.offset, elapsed);
}

#[tokio::test]
async fn one_play_starts_every_track_at_the_same_offset_and_reference() {
    let (mut session, ids) = loaded_session(&[("a.wav", 2.0), ("b.wav", 3.0), ("c.wav", 1.0)]).await;
    session.scrub(0.5).unwrap();
    session.render(37);

    let report = session.play_all().unwrap();
    assert_eq!(report.started.len(), 3);
    let now = session.current_time();
    for id in ids {
        let live = session.active().get(id).unwrap();
        assert_eq!(live.offset(), 0.5);
        assert_eq!(live.started_at(), now);
        assert_eq!(session.unit_state(id), Some(UnitState::Playing { offset: 0.5 }));
    }
    assert_eq!(session.transport().play_offset_ref(), Some(now - 0.5));
}

#[tokio::test]
async fn restarting_a_track_keeps_one_live_source() {
    let (mut session, ids) = loaded_session(&[("a.wav", 2.0), ("b.wav", 2.0)]).await;
    session.play_all().unwrap();
    let nodes = session.engine().node_count();
    let first = session.active().get(ids[0]).unwrap().node();

    session.render(10);
    session.restart_track(ids[0]).unwrap();
    session.restart_track(ids[0]).unwrap();

    assert_eq!(session.active().len(), 2);
    assert_eq!(session.engine().node_count(), nodes);
    assert!(!session.engine().contains(first));
    assert_abs_diff_eq!(
        session.active().get(ids[0]).unwrap().offset(),
        session.position(),
        epsilon = 1e-9
    );
}

#[tokio::test]
async fn play_while_playing_resyncs_without_doubling() {
    let (mut session, _) = loaded_session(&[("a.wav", 2.0), ("b.wav", 2.0)]).await;
    session.play_all().unwrap();
    let nodes = session.engine().node_count();
    session.render(50);

    let report = session.play_all().unwrap();
    assert_abs_diff_eq!(report.offset, 50.0 * 64.0 / 16_000.0, epsilon = 1e-9);
    assert_eq!(session.active().len(), 2);
    assert_eq!(session.engine().node_count(), nodes);
}

#[tokio::test]
async fn stop_rewinds_to_zero() {
    let (mut session, _) = loaded_session(&[("a.wav", 5.0)]).await;
    session.play_all().unwrap();
    session.render_secs(2.0);
    session.pause_all().unwrap();
    session.stop_all();

    let transport = session.transport();
    assert_eq!(transport.state(), TransportState::Stopped);
    assert_eq!(transport.pause_elapsed(), 0.0);
    assert_eq!(transport.scrub_position(), 0.0);
    assert_eq!(transport.play_offset_ref(), None);

    assert_eq!(session.play_all().unwrap().offset, 0.0);
}

#[tokio::test]
async fn reverb_level_is_readable_immediately_and_never_rewires() {
    let (mut session, _) = loaded_session(&[("a.wav", 1.0)]).await;
    let edges = session.engine().edge_count();
    let nodes = session.engine().node_count();

    assert_eq!(session.set_reverb_level(0.5), 0.5);
    assert_eq!(session.set_reverb_level(1.55), 1.55);
    assert_eq!(session.bus().wet_level(), 1.55);
    assert_eq!(session.set_reverb_level(9.0), 2.0);

    assert_eq!(session.set_delay_time(StereoChannel::Right, 0.03), 0.03);
    assert_eq!(session.bus().delay_time(StereoChannel::Right), 0.03);
    assert_eq!(session.set_filter_frequency(FilterBand::Lowpass, 1e6), 7_200.0);

    session.render(4);
    assert_eq!(session.engine().edge_count(), edges);
    assert_eq!(session.engine().node_count(), nodes);
}

#[tokio::test]
async fn removing_a_track_mid_playback_leaves_the_rest_alone() {
    let (mut session, ids) = loaded_session(&[("a.wav", 4.0), ("b.wav", 4.0)]).await;
    let (a, b) = (ids[0], ids[1]);
    session.play_all().unwrap();
    session.render_secs(1.0);

    let node_a = session.active().get(a).unwrap().node();
    let before_b = session.active().get(b).unwrap().clone();
    let position = session.position();

    session.remove_track(a).unwrap();

    assert!(!session.active().contains(a));
    assert!(!session.engine().contains(node_a));
    assert!(session.track(a).is_none());
    assert!(!session.cache().contains("a.wav"));

    let after_b = session.active().get(b).unwrap();
    assert_eq!(after_b.node(), before_b.node());
    assert_eq!(after_b.offset(), before_b.offset());
    assert_eq!(after_b.started_at(), before_b.started_at());
    assert_eq!(session.state(), TransportState::Playing);
    assert_eq!(session.position(), position);

    assert_eq!(session.remove_track(a), Err(SessionError::UnknownTrack(a)));
}

#[tokio::test]
async fn main_track_end_stops_playback() {
    let (mut session, ids) = loaded_session(&[("long.wav", 1.0), ("short.wav", 0.5)]).await;
    assert_eq!(session.main_track(), Some(ids[0]));
    session.play_all().unwrap();

    session.render_secs(0.6);
    let poll = session.poll();
    assert_eq!(poll.state, TransportState::Playing);
    assert_eq!(poll.events, vec![SessionEvent::TrackEnded(ids[1])]);
    assert_eq!(session.unit_state(ids[1]), Some(UnitState::Ended));
    assert!(poll.position > 0.5);

    session.render_secs(0.5);
    let poll = session.poll();
    assert_eq!(poll.state, TransportState::Stopped);
    assert!(poll.events.contains(&SessionEvent::TrackEnded(ids[0])));
    assert!(poll.events.contains(&SessionEvent::PlaybackEnded));
    assert_eq!(session.transport().scrub_position(), 0.0);
    assert!(session.active().is_empty());
}

#[tokio::test]
async fn poll_refreshes_the_displayed_position() {
    let (mut session, _) = loaded_session(&[("a.wav", 2.0)]).await;
    session.play_all().unwrap();
    session.render(100);
    let poll = session.poll();
    assert_abs_diff_eq!(poll.position, 0.4, epsilon = 1e-9);
    assert_abs_diff_eq!(session.transport().scrub_position(), 0.4, epsilon = 1e-9);
}

#[tokio::test]
async fn scrub_while_playing_restarts_everything() {
    let (mut session, ids) = loaded_session(&[("a.wav", 5.0), ("b.wav", 5.0)]).await;
    session.play_all().unwrap();
    session.render(20);
    let old: Vec<_> = ids.iter().map(|id| session.active().get(*id).unwrap().node()).collect();

    assert_eq!(session.scrub(3.0).unwrap(), 3.0);
    let now = session.current_time();
    for (id, old) in ids.iter().zip(old) {
        let live = session.active().get(*id).unwrap();
        assert_ne!(live.node(), old);
        assert_eq!(live.offset(), 3.0);
        assert_eq!(live.started_at(), now);
    }
    assert_abs_diff_eq!(session.position(), 3.0, epsilon = 1e-9);
}

#[tokio::test]
async fn scrub_while_paused_moves_the_resume_point() {
    let (mut session, _) = loaded_session(&[("a.wav", 5.0)]).await;
    session.play_all().unwrap();
    session.render(20);
    session.pause_all().unwrap();

    session.scrub(2.5).unwrap();
    assert_eq!(session.transport().pause_elapsed(), 2.5);
    assert!(session.active().is_empty());
    assert_eq!(session.play_all().unwrap().offset, 2.5);
}

#[tokio::test]
async fn resume_past_the_end_starts_over() {
    let (mut session, _) = loaded_session(&[("a.wav", 1.0)]).await;
    assert_eq!(session.scrub(30.0).unwrap(), 1.0);
    assert_eq!(session.play_all().unwrap().offset, 0.0);
}

#[tokio::test]
async fn transport_commands_need_a_loaded_track() {
    let config = test_config();
    let cache = Arc::new(BufferCache::new(MemoryAssetSource::new()));
    let mut session = Session::new(config.engine(), cache, &config).unwrap();

    assert_eq!(session.play_all(), Err(SessionError::NoTracksLoaded));
    assert_eq!(session.toggle_playback(), Err(SessionError::NoTracksLoaded));
    assert_eq!(session.scrub(1.0), Err(SessionError::NoTracksLoaded));

    // A track that failed to load doesn't count
    let id = session.import_track("missing.wav", "missing").unwrap();
    let progress = session.load_pending(|_| {}).await;
    assert_eq!(progress.failed, 1);
    assert!(matches!(
        session.track(id).unwrap().load_state(),
        LoadState::Failed(LoadError::Fetch { .. })
    ));
    assert_eq!(session.play_all(), Err(SessionError::NoTracksLoaded));

    // Stop is always fine
    session.stop_all();
    assert_eq!(session.state(), TransportState::Stopped);
}

#[tokio::test]
async fn pause_and_restart_need_playback() {
    let (mut session, ids) = loaded_session(&[("a.wav", 1.0)]).await;
    let err = session.pause_all().unwrap_err();
    assert_eq!(err, SessionError::NotPlaying);
    assert!(err.is_precondition());
    assert_eq!(session.restart_track(ids[0]), Err(SessionError::NotPlaying));
}

#[tokio::test]
async fn a_failed_track_doesnt_stop_the_others() {
    let source = MemoryAssetSource::new()
        .with_asset("good.wav", wav_bytes(1.0, FIXTURE_RATE, 2))
        .with_asset("bad.wav", vec![0u8; 64]);
    let config = test_config();
    let cache = Arc::new(BufferCache::new(source));
    let mut session = Session::new(config.engine(), cache, &config).unwrap();

    let good = session.import_track("good.wav", "good").unwrap();
    let bad = session.import_track("bad.wav", "bad").unwrap();

    let mut seen = Vec::new();
    let progress = session.load_pending(|p| seen.push(p)).await;
    assert_eq!(seen.len(), 2);
    assert!(progress.is_complete());
    assert_eq!((progress.loaded, progress.failed), (1, 1));
    assert!(matches!(
        session.track(bad).unwrap().load_state(),
        LoadState::Failed(LoadError::Decode { .. })
    ));

    let report = session.play_all().unwrap();
    assert_eq!(report.started, vec![good]);
    assert_eq!(report.skipped, vec![bad]);
    assert_eq!(
        session.restart_track(bad),
        Err(SessionError::TrackNotLoaded(bad))
    );
}

#[tokio::test]
async fn track_parameters_are_clamped_and_mirrored() {
    let (mut session, ids) = loaded_session(&[("a.wav", 1.0)]).await;
    let id = ids[0];
    assert_eq!(session.set_track_volume(id, 1.7).unwrap(), 1.0);
    assert_eq!(session.set_track_send(id, 0.25).unwrap(), 0.25);
    assert_eq!(session.set_track_pan(id, -3.0).unwrap(), -1.0);

    let track = session.track(id).unwrap();
    assert_eq!(track.volume(), 1.0);
    assert_eq!(track.send_level(), 0.25);
    assert_eq!(track.pan(), Some(-1.0));

    session.remove_track(id).unwrap();
    assert_eq!(session.set_track_volume(id, 0.5), Err(SessionError::UnknownTrack(id)));
}

#[tokio::test]
async fn analyser_sees_the_mix() {
    let (mut session, _) = loaded_session(&[("a.wav", 1.0)]).await;
    session.render(8);
    session.analyser().update();
    assert_eq!(session.analyser().peak(), 0.0);

    session.play_all().unwrap();
    session.render(8);
    assert!(session.analyser().update() > 0);
    assert!(session.analyser().rms() > 0.01);
}

/// Play one 2 s track for `blocks` blocks with its destination captured.
async fn captured_mix(send: f32, impulse: bool, blocks: u64) -> Vec<f32> {
    let (producer, mut consumer) = RingBuffer::new(blocks as usize * 64 * 2);
    let config = MixerConfig {
        track_send: 0.0,
        ..test_config()
    };
    let engine = config.configure(Engine::new(ENGINE_RATE).with_output(RtrbSink::stereo(producer)));
    let (mut session, ids) = session_on(engine, &config, &[("a.wav", 2.0)]).await;

    if impulse {
        // A single unit tap: the wet path is the send itself, delayed and filtered
        assert!(session.set_impulse(&AudioBuffer::new(vec![vec![1.0]], ENGINE_RATE)));
    }
    session.set_filter_frequency(FilterBand::Highpass, 10.0);
    session.set_track_send(ids[0], send).unwrap();
    session.play_all().unwrap();
    session.render(blocks);

    let mut samples = Vec::new();
    while let Ok(s) = consumer.pop() {
        samples.push(s);
    }
    assert_eq!(samples.len(), blocks as usize * 64 * 2);
    samples
}

fn rms_of_difference(a: &[f32], b: &[f32]) -> f32 {
    let sum: f32 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
    (sum / a.len() as f32).sqrt()
}

#[tokio::test]
async fn muted_track_goes_silent_after_the_fade() {
    let (mut session, ids) = loaded_session(&[("a.wav", 2.0)]).await;
    session.play_all().unwrap();
    session.render(8);
    session.analyser().update();
    assert!(session.analyser().rms() > 0.01);

    session.set_track_volume(ids[0], 0.0).unwrap();
    // 5 ms fade at 16 kHz is 80 samples; 40 blocks is far past it
    session.render(40);
    session.analyser().update();
    assert!(session.analyser().rms() < 1e-4);
}

#[tokio::test]
async fn final_value_of_a_long_burst_is_heard() {
    let (mut session, ids) = loaded_session(&[("a.wav", 2.0)]).await;
    let queue_size = test_config().queue_size;
    session.play_all().unwrap();
    session.render(8);

    // Many more updates than any node queue holds, between two blocks
    for _ in 0..queue_size * 2 {
        session.set_track_volume(ids[0], 0.9).unwrap();
        session.set_track_send(ids[0], 0.9).unwrap();
        session.set_reverb_level(1.5);
    }
    assert_eq!(session.set_track_volume(ids[0], 0.0).unwrap(), 0.0);
    assert_eq!(session.track(ids[0]).unwrap().volume(), 0.0);

    session.render(40);
    session.analyser().update();
    assert!(session.analyser().rms() < 1e-4);

    // And back up again through another burst
    for _ in 0..queue_size * 2 {
        session.set_track_volume(ids[0], 0.0).unwrap();
    }
    session.set_track_volume(ids[0], 1.0).unwrap();
    session.render(40);
    session.analyser().update();
    assert!(session.analyser().rms() > 0.01);
}

#[tokio::test]
async fn send_level_opens_and_closes_the_wet_path() {
    const BLOCKS: u64 = 40;
    let dry = captured_mix(0.0, false, BLOCKS).await;
    let closed = captured_mix(0.0, true, BLOCKS).await;
    let open = captured_mix(1.0, true, BLOCKS).await;

    // Send at zero: the impulse adds nothing to the mix
    assert!(rms_of_difference(&closed, &dry) < 1e-6);

    // Send at one: the wet return is clearly audible once the micro-delays pass
    let settled = dry.len() / 2;
    assert!(rms_of_difference(&open[settled..], &dry[settled..]) > 0.01);
}

#[tokio::test]
async fn assignments_follow_tracks() {
    let (mut session, ids) = loaded_session(&[("a.wav", 1.0), ("b.wav", 1.0)]).await;
    assert_eq!(session.assignments().tracks_in(None), ids.as_slice());

    let ui = UiContext::with_selection("torus");
    session.assign_selected(ids[1], &ui).unwrap();
    assert_eq!(session.assignments().tracks_in(ui.selected.as_ref()), &[ids[1]]);
    assert_eq!(session.assignments().tracks_in(None), &[ids[0]]);

    session.remove_track(ids[1]).unwrap();
    assert_eq!(session.assignments().objects().count(), 0);
}

#[tokio::test]
async fn shared_urls_survive_removing_one_track() {
    let (mut session, _) = loaded_session(&[("a.wav", 1.0)]).await;
    let twin = session.import_track("a.wav", "twin").unwrap();
    session.load_pending(|_| {}).await;
    assert_eq!(session.cache().stats().decodes, 1);

    session.remove_track(twin).unwrap();
    assert!(session.cache().is_cached("a.wav"));
}

#[tokio::test]
async fn clear_and_teardown_leave_nothing_behind() {
    let (mut session, _) = loaded_session(&[("a.wav", 1.0), ("b.wav", 1.0)]).await;
    session.play_all().unwrap();
    session.render(4);

    session.clear_session();
    assert!(session.tracks().is_empty());
    assert!(session.active().is_empty());
    assert!(session.cache().is_empty());
    assert_eq!(session.state(), TransportState::Stopped);

    let engine = session.teardown();
    // Only the destination is left
    assert_eq!(engine.node_count(), 1);
    assert_eq!(engine.edge_count(), 0);
}

#[tokio::test]
async fn commands_dispatch_to_the_session() {
    let (mut session, ids) = loaded_session(&[("a.wav", 2.0)]).await;

    assert!(matches!(session.dispatch(Command::Play), Ok(Outcome::Played(_))));
    session.render(25);
    assert_eq!(
        session.dispatch(Command::TogglePlayback),
        Ok(Outcome::Transport(TransportState::Paused))
    );
    assert_eq!(
        session.dispatch(Command::SetTrackVolume(ids[0], 0.5)),
        Ok(Outcome::Value(0.5))
    );
    assert_eq!(session.dispatch(Command::SetReverbLevel(1.55)), Ok(Outcome::Value(1.55)));

    let imported = session.dispatch(Command::ImportTrack {
        url: "later.wav".into(),
        name: "later".into(),
    });
    assert!(matches!(imported, Ok(Outcome::Imported(_))));

    assert_eq!(
        session.dispatch(Command::Stop),
        Ok(Outcome::Transport(TransportState::Stopped))
    );
}

#[tokio::test]
async fn impulse_failure_keeps_dry_playback() {
    let (mut session, _) = loaded_session(&[("a.wav", 1.0)]).await;
    assert!(session.load_impulse("ir/missing.wav").await.is_err());
    assert!(!session.bus().reverb_enabled());
    assert!(session.play_all().is_ok());

    assert!(session.set_impulse(&AudioBuffer::new(vec![vec![1.0, 0.5, 0.25]], FIXTURE_RATE)));
    assert!(session.bus().reverb_enabled());
}

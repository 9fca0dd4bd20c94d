//! End-to-end orchestrator scenarios against an in-memory sink.
//!
//! The fake sink "plays" a clip for its real duration. Clips are tens of
//! milliseconds except "LONG ..." messages, which run for two seconds.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tannoy_core::{
    AudioClip, AudioSink, Collaborators, EngineConfig, EngineError, EngineEvent, EngineHandle,
    EngineResult, LogRecord, LogSink, MemoryLogSink, MicStream, Orchestrator, OrchestratorState,
    Playlist, RequestId, RequestKind, RequestStatus, StaticChime, TtsEngine,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const RATE: u32 = 8000;

fn clip_ms(ms: u64, level: f32) -> AudioClip {
    AudioClip::new(vec![level; (RATE as u64 * ms / 1000) as usize], RATE, 1)
}

#[derive(Debug, Clone, Copy)]
struct Played {
    frames: usize,
    first_sample: f32,
}

#[derive(Default)]
struct FakeSink {
    busy_until: Mutex<Option<Instant>>,
    plays: Mutex<Vec<Played>>,
    stops: AtomicUsize,
    failing_plays: AtomicUsize,
}

impl FakeSink {
    /// Make the next `n` calls to `play` fail as if the device vanished.
    fn fail_next_plays(&self, n: usize) {
        self.failing_plays.store(n, Ordering::SeqCst);
    }

    fn plays(&self) -> Vec<Played> {
        self.plays.lock().unwrap().clone()
    }

    fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl AudioSink for FakeSink {
    fn play(&self, clip: &AudioClip) -> EngineResult<()> {
        if self
            .failing_plays
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(EngineError::SinkUnavailable("device unplugged".to_string()));
        }
        let now = Instant::now();
        let mut busy = self.busy_until.lock().unwrap();
        let start = busy.filter(|t| *t > now).unwrap_or(now);
        *busy = Some(start + clip.duration());
        self.plays.lock().unwrap().push(Played {
            frames: clip.frames(),
            first_sample: clip.samples().first().copied().unwrap_or(0.0),
        });
        Ok(())
    }

    fn stop(&self) {
        *self.busy_until.lock().unwrap() = None;
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        self.busy_until
            .lock()
            .unwrap()
            .is_some_and(|t| Instant::now() < t)
    }
}

/// Speaks every message as a tone of fixed length; messages starting with
/// "FAIL" cannot be rendered.
struct ScriptedTts {
    length_ms: u64,
}

impl TtsEngine for ScriptedTts {
    fn synthesize(&self, text: &str) -> EngineResult<AudioClip> {
        if text.starts_with("FAIL") {
            return Err(EngineError::Render(format!("cannot pronounce {:?}", text)));
        }
        let ms = if text.starts_with("LONG") { 2000 } else { self.length_ms };
        Ok(clip_ms(ms, 0.5))
    }
}

struct RejectingLog;

impl LogSink for RejectingLog {
    fn append(&self, _record: &LogRecord) -> EngineResult<()> {
        Err(EngineError::Log("disk full".to_string()))
    }
}

fn test_config() -> EngineConfig {
    EngineConfig {
        chime_enabled: false,
        poll_interval_ms: 5,
        background_chunk_ms: 50,
        ..EngineConfig::default()
    }
}

struct Rig {
    handle: EngineHandle,
    sink: Arc<FakeSink>,
    log: MemoryLogSink,
    events: broadcast::Receiver<EngineEvent>,
    task: JoinHandle<()>,
}

impl Rig {
    fn start(config: EngineConfig, customize: impl FnOnce(Collaborators) -> Collaborators) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let sink = Arc::new(FakeSink::default());
        let log = MemoryLogSink::new();
        let parts = Collaborators::new(
            sink.clone(),
            Arc::new(ScriptedTts { length_ms: 40 }),
            Arc::new(log.clone()),
        );
        let (orchestrator, handle) = Orchestrator::new(&config, customize(parts)).unwrap();
        let events = handle.subscribe();
        let task = tokio::spawn(orchestrator.run());
        Self {
            handle,
            sink,
            log,
            events,
            task,
        }
    }

    async fn next_event(&mut self) -> EngineEvent {
        timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for engine event")
            .expect("event channel closed")
    }

    async fn wait_for_state(&mut self, wanted: OrchestratorState) {
        loop {
            if let EngineEvent::StateChanged(state) = self.next_event().await {
                if state == wanted {
                    return;
                }
            }
        }
    }

    /// Collect the next `n` finished requests, in order.
    async fn finished(&mut self, n: usize) -> Vec<(RequestId, RequestKind, RequestStatus)> {
        let mut out = Vec::new();
        while out.len() < n {
            if let EngineEvent::RequestFinished {
                request_id,
                kind,
                status,
                ..
            } = self.next_event().await
            {
                out.push((request_id, kind, status));
            }
        }
        out
    }

    async fn shutdown(self) {
        self.handle.shutdown();
        timeout(Duration::from_secs(5), self.task)
            .await
            .expect("orchestrator did not stop")
            .unwrap();
    }
}

#[tokio::test]
async fn chime_then_content_then_idle() {
    let mut rig = Rig::start(
        EngineConfig {
            chime_enabled: true,
            ..test_config()
        },
        |parts| parts.with_chime(Arc::new(StaticChime(clip_ms(20, 0.9)))),
    );

    let id = rig.handle.announce_text("Platform 3 attention").unwrap();

    let mut seen = Vec::new();
    loop {
        let event = rig.next_event().await;
        let done = event == EngineEvent::StateChanged(OrchestratorState::Idle);
        seen.push(event);
        if done {
            break;
        }
    }

    assert_eq!(
        seen,
        vec![
            EngineEvent::StateChanged(OrchestratorState::PlayingChime(id)),
            EngineEvent::StateChanged(OrchestratorState::PlayingContent(id)),
            EngineEvent::RequestFinished {
                request_id: id,
                kind: RequestKind::Text,
                status: RequestStatus::Completed,
                detail: None,
            },
            EngineEvent::StateChanged(OrchestratorState::Idle),
        ]
    );

    let records = rig.log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message, "Platform 3 attention");
    assert_eq!(records[0].final_status, RequestStatus::Completed);

    let plays = rig.sink.plays();
    assert_eq!(plays.len(), 2);
    assert_eq!(plays[0].frames, clip_ms(20, 0.0).frames());
    rig.shutdown().await;
}

#[tokio::test]
async fn equal_priority_plays_in_submission_order() {
    let mut rig = Rig::start(test_config(), |p| p);

    let a = rig.handle.announce_text("A").unwrap();
    let b = rig.handle.announce_text("B").unwrap();

    let done = rig.finished(2).await;
    assert_eq!(done[0].0, a);
    assert_eq!(done[1].0, b);
    assert!(done.iter().all(|(_, _, s)| *s == RequestStatus::Completed));
    rig.shutdown().await;
}

#[tokio::test]
async fn mic_preempts_background_then_background_resumes() {
    let mut rig = Rig::start(
        EngineConfig {
            background_audio_enabled: true,
            ..test_config()
        },
        |parts| parts.with_background(Box::new(Playlist::new(vec![clip_ms(2000, 0.2)]))),
    );

    rig.wait_for_state(OrchestratorState::PlayingBackground).await;

    let (feed, stream) = MicStream::channel();
    let id = rig.handle.announce_mic(stream).unwrap();
    assert!(feed.push(clip_ms(30, 0.6)));
    drop(feed);

    rig.wait_for_state(OrchestratorState::PlayingContent(id)).await;
    let done = rig.finished(1).await;
    assert_eq!(done, vec![(id, RequestKind::Mic, RequestStatus::Completed)]);

    rig.wait_for_state(OrchestratorState::PlayingBackground).await;
    // Background yielded at a chunk boundary; nothing was cut off.
    assert_eq!(rig.sink.stops(), 0);
    rig.shutdown().await;
}

#[tokio::test]
async fn tts_failure_is_logged_and_next_request_plays() {
    let mut rig = Rig::start(test_config(), |p| p);

    let bad = rig.handle.announce_text("FAIL please").unwrap();
    let good = rig.handle.announce_text("Next train").unwrap();

    let done = rig.finished(2).await;
    assert_eq!(done[0], (bad, RequestKind::Text, RequestStatus::Failed));
    assert_eq!(done[1], (good, RequestKind::Text, RequestStatus::Completed));

    let records = rig.log.records();
    assert_eq!(records[0].final_status, RequestStatus::Failed);
    assert!(records[0].detail.as_deref().unwrap_or("").contains("cannot pronounce"));
    rig.shutdown().await;
}

#[tokio::test]
async fn running_announcement_is_not_preempted_by_mic() {
    let mut rig = Rig::start(test_config(), |p| p);

    let text = rig.handle.announce_text("LONG text").unwrap();
    rig.wait_for_state(OrchestratorState::PlayingContent(text)).await;

    let (feed, stream) = MicStream::channel();
    let mic = rig.handle.announce_mic(stream).unwrap();
    feed.push(clip_ms(10, 0.6));
    drop(feed);

    let done = rig.finished(2).await;
    assert_eq!(done[0], (text, RequestKind::Text, RequestStatus::Completed));
    assert_eq!(done[1], (mic, RequestKind::Mic, RequestStatus::Completed));
    assert_eq!(rig.sink.stops(), 0);
    rig.shutdown().await;
}

#[tokio::test]
async fn queued_mic_jumps_ahead_of_queued_text() {
    let mut rig = Rig::start(test_config(), |p| p);

    let first = rig.handle.announce_text("LONG text").unwrap();
    rig.wait_for_state(OrchestratorState::PlayingContent(first)).await;

    let later_text = rig.handle.announce_text("Queued text").unwrap();
    let (feed, stream) = MicStream::channel();
    let mic = rig.handle.announce_mic(stream).unwrap();
    drop(feed);

    let order: Vec<RequestId> = rig.finished(3).await.into_iter().map(|(id, _, _)| id).collect();
    assert_eq!(order, vec![first, mic, later_text]);
    rig.shutdown().await;
}

#[tokio::test]
async fn operator_stop_skips_current_announcement() {
    let mut rig = Rig::start(test_config(), |p| p);

    let id = rig.handle.announce_text("LONG announcement").unwrap();
    rig.wait_for_state(OrchestratorState::PlayingContent(id)).await;
    rig.handle.stop();

    let done = rig.finished(1).await;
    assert_eq!(done, vec![(id, RequestKind::Text, RequestStatus::Skipped)]);
    assert!(rig.sink.stops() >= 1);
    assert_eq!(rig.log.records()[0].detail.as_deref(), Some("stopped by operator"));

    // The engine keeps serving after a stop.
    let next = rig.handle.announce_text("After stop").unwrap();
    assert_eq!(rig.finished(1).await[0].0, next);
    rig.shutdown().await;
}

#[tokio::test]
async fn stop_during_chime_skips_without_playing_content() {
    let mut rig = Rig::start(
        EngineConfig {
            chime_enabled: true,
            ..test_config()
        },
        |parts| parts.with_chime(Arc::new(StaticChime(clip_ms(2000, 0.9)))),
    );

    let id = rig.handle.announce_text("Platform alteration").unwrap();
    rig.wait_for_state(OrchestratorState::PlayingChime(id)).await;
    rig.handle.stop();

    let done = rig.finished(1).await;
    assert_eq!(done, vec![(id, RequestKind::Text, RequestStatus::Skipped)]);
    // Only the chime reached the sink.
    assert_eq!(rig.sink.plays().len(), 1);
    rig.shutdown().await;
}

#[tokio::test]
async fn sink_failure_fails_request_and_next_plays() {
    let mut rig = Rig::start(test_config(), |p| p);
    rig.sink.fail_next_plays(1);

    let broken = rig.handle.announce_text("Lost in the wires").unwrap();
    let next = rig.handle.announce_text("Heard clearly").unwrap();

    let done = rig.finished(2).await;
    assert_eq!(done[0], (broken, RequestKind::Text, RequestStatus::Failed));
    assert_eq!(done[1], (next, RequestKind::Text, RequestStatus::Completed));

    let records = rig.log.records();
    assert!(records[0].detail.as_deref().unwrap_or("").contains("device unplugged"));
    assert_eq!(rig.sink.plays().len(), 1);
    rig.shutdown().await;
}

#[tokio::test]
async fn dropped_mic_stream_fails_and_engine_continues() {
    let mut rig = Rig::start(test_config(), |p| p);

    let (feed, stream) = MicStream::channel();
    let mic = rig.handle.announce_mic(stream).unwrap();
    rig.wait_for_state(OrchestratorState::PlayingContent(mic)).await;
    assert!(feed.push(clip_ms(20, 0.6)));
    feed.fail("unplugged");

    let done = rig.finished(1).await;
    assert_eq!(done, vec![(mic, RequestKind::Mic, RequestStatus::Failed)]);
    assert!(rig.log.records()[0]
        .detail
        .as_deref()
        .unwrap_or("")
        .contains("unplugged"));

    let next = rig.handle.announce_text("Back to normal").unwrap();
    assert_eq!(
        rig.finished(1).await,
        vec![(next, RequestKind::Text, RequestStatus::Completed)]
    );
    rig.shutdown().await;
}

#[tokio::test]
async fn stop_then_release_marks_live_mic_skipped() {
    let mut rig = Rig::start(test_config(), |p| p);

    let (feed, stream) = MicStream::channel();
    let mic = rig.handle.announce_mic(stream).unwrap();
    rig.wait_for_state(OrchestratorState::PlayingContent(mic)).await;

    rig.handle.stop();
    drop(feed);

    let done = rig.finished(1).await;
    assert_eq!(done, vec![(mic, RequestKind::Mic, RequestStatus::Skipped)]);
    rig.shutdown().await;
}

#[tokio::test]
async fn stop_pauses_background_until_resumed() {
    let mut rig = Rig::start(
        EngineConfig {
            background_audio_enabled: true,
            ..test_config()
        },
        |parts| parts.with_background(Box::new(Playlist::new(vec![clip_ms(2000, 0.2)]))),
    );

    rig.wait_for_state(OrchestratorState::PlayingBackground).await;
    rig.handle.stop();
    rig.wait_for_state(OrchestratorState::Idle).await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(rig.handle.state(), OrchestratorState::Idle);

    rig.handle.resume_background();
    rig.wait_for_state(OrchestratorState::PlayingBackground).await;
    rig.shutdown().await;
}

#[tokio::test]
async fn pending_request_can_be_cancelled() {
    let log = MemoryLogSink::new();
    let parts = Collaborators::new(
        Arc::new(FakeSink::default()),
        Arc::new(ScriptedTts { length_ms: 40 }),
        Arc::new(log.clone()),
    );
    // Not running: everything stays queued.
    let (_orchestrator, handle) = Orchestrator::new(&test_config(), parts).unwrap();

    let keep = handle.announce_text("Keep").unwrap();
    let drop_me = handle.announce_text("Drop").unwrap();
    handle.cancel(drop_me).unwrap();

    assert_eq!(handle.queue().pending_ids(), vec![keep]);
    let records = log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].request_id, drop_me);
    assert_eq!(records[0].final_status, RequestStatus::Skipped);

    assert!(matches!(handle.cancel(RequestId(999)), Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn full_queue_rejects_new_requests() {
    let parts = Collaborators::new(
        Arc::new(FakeSink::default()),
        Arc::new(ScriptedTts { length_ms: 40 }),
        Arc::new(MemoryLogSink::new()),
    );
    let config = EngineConfig {
        queue_capacity: 2,
        ..test_config()
    };
    let (_orchestrator, handle) = Orchestrator::new(&config, parts).unwrap();

    handle.announce_text("one").unwrap();
    handle.announce_text("two").unwrap();
    assert!(matches!(
        handle.announce_text("three"),
        Err(EngineError::QueueFull { capacity: 2 })
    ));
    assert!(matches!(handle.announce_text(""), Err(EngineError::InvalidRequest(_))));
    assert_eq!(handle.queue().len(), 2);
}

#[tokio::test]
async fn volume_changes_are_validated_and_applied() {
    let mut rig = Rig::start(test_config(), |p| p);

    assert!(matches!(rig.handle.set_volume(1.5), Err(EngineError::InvalidVolume(_))));
    assert!(matches!(rig.handle.set_volume(f32::NAN), Err(EngineError::InvalidVolume(_))));
    assert_eq!(rig.handle.settings().volume, 1.0);

    rig.handle.set_volume(0.5).unwrap();
    rig.handle.announce_text("Quiet please").unwrap();
    rig.finished(1).await;

    let plays = rig.sink.plays();
    assert!((plays[0].first_sample - 0.25).abs() < 1e-6);
    rig.shutdown().await;
}

#[tokio::test]
async fn log_failure_does_not_block_the_queue() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let parts = Collaborators::new(
        Arc::new(FakeSink::default()),
        Arc::new(ScriptedTts { length_ms: 20 }),
        Arc::new(RejectingLog),
    );
    let (orchestrator, handle) = Orchestrator::new(&test_config(), parts).unwrap();
    let mut events = handle.subscribe();
    let task = tokio::spawn(orchestrator.run());

    let first = handle.announce_text("first").unwrap();
    let second = handle.announce_text("second").unwrap();

    let mut log_failures = Vec::new();
    let mut finished = Vec::new();
    while finished.len() < 2 {
        match timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap() {
            EngineEvent::LogAppendFailed { request_id, .. } => log_failures.push(request_id),
            EngineEvent::RequestFinished { request_id, status, .. } => {
                assert_eq!(status, RequestStatus::Completed);
                finished.push(request_id);
            }
            _ => {}
        }
    }
    assert_eq!(log_failures, vec![first, second]);
    assert_eq!(finished, vec![first, second]);

    handle.shutdown();
    timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
}

#[tokio::test]
async fn dropping_every_handle_stops_the_orchestrator() {
    let parts = Collaborators::new(
        Arc::new(FakeSink::default()),
        Arc::new(ScriptedTts { length_ms: 20 }),
        Arc::new(MemoryLogSink::new()),
    );
    let (orchestrator, handle) = Orchestrator::new(&test_config(), parts).unwrap();
    let task = tokio::spawn(orchestrator.run());
    drop(handle);
    timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
}

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use transport::{
    ChannelNames, Codec, Consumer, FrameMeta, MAX_FRAME_SIZE, Producer, PublishOutcome, Semaphore,
    TransportError,
};

// Channels are names in the OS-global namespace, so every test uses its own
// channel number and the tests can run concurrently.

fn hd_meta() -> FrameMeta {
    FrameMeta {
        codec: Codec::H264.into(),
        width: 1280,
        height: 720,
        fps: 30,
        is_keyframe: 1,
        ..FrameMeta::default()
    }
}

fn frame_buf() -> Vec<u8> {
    vec![0u8; MAX_FRAME_SIZE]
}

/// A consumer that attaches after a publish starts at the live edge and only
/// sees frames published after it.
#[test]
fn test_single_publish_then_poll() {
    let mut producer = Producer::create(901).unwrap();

    let outcome = producer
        .publish(&[0xDE, 0xAD, 0xBE, 0xEF], &hd_meta())
        .unwrap();
    assert_eq!(outcome, PublishOutcome::Published);

    let mut consumer = Consumer::attach(901).unwrap();
    let mut buf = frame_buf();

    // Attached at the live edge: the earlier frame is history.
    assert!(consumer.poll(&mut buf).unwrap().is_none());

    producer.publish(&[0x01], &hd_meta()).unwrap();

    let meta = consumer.poll(&mut buf).unwrap().expect("second frame");
    assert_eq!(meta.size, 1);
    assert_eq!(buf[0], 0x01);
    assert_eq!(meta.sequence, 1, "second publish carries sequence 1");
    assert_eq!(meta.width, 1280);
    assert_eq!(meta.height, 720);
    assert_eq!(meta.fps, 30);
    assert_eq!(meta.is_keyframe, 1);
    assert_ne!(meta.timestamp_ms, 0, "zero timestamps are filled in");
}

/// A publish attempted while the write-gate is held is dropped, counted, and
/// is not an error.
#[test]
fn test_drop_when_gate_is_held() {
    let mut producer = Producer::create(902).unwrap();
    let names = ChannelNames::for_channel(902);

    let gate = Semaphore::open(&names.write_gate).unwrap();
    assert!(gate.try_acquire().unwrap());

    let outcome = producer.publish(&[0x55; 32], &hd_meta()).unwrap();
    assert_eq!(outcome, PublishOutcome::Dropped);
    assert_eq!(producer.dropped_total(), 1);
    assert_eq!(producer.published_total(), 0, "a drop must not publish");

    gate.post().unwrap();

    let outcome = producer.publish(&[0x55; 32], &hd_meta()).unwrap();
    assert_eq!(outcome, PublishOutcome::Published);
    assert_eq!(producer.published_total(), 1);
    assert_eq!(producer.dropped_total(), 1);
}

/// An idle consumer overrun by more than a full ring still reads the newest
/// frame, and the gap shows up in its per-reader missed accounting.
#[test]
fn test_overrun_reports_missed_frames() {
    let mut producer = Producer::create(903).unwrap();
    let mut consumer = Consumer::attach(903).unwrap();

    for i in 0..100u32 {
        let payload = [(i % 251) as u8; 64];
        let outcome = producer.publish(&payload, &hd_meta()).unwrap();
        assert_eq!(outcome, PublishOutcome::Published);
    }

    let mut buf = frame_buf();
    let meta = consumer.poll(&mut buf).unwrap().expect("newest frame");
    assert_eq!(meta.sequence, 99, "poll returns the newest frame");
    assert_eq!(buf[0], (99 % 251) as u8);

    assert_eq!(consumer.missed_since_attach(), 99);
    let stats = consumer.stats();
    assert_eq!(stats.total, 100);
    assert_eq!(stats.missed, 0, "caught up after the poll");
}

/// A blocked wait returns promptly once the producer publishes.
#[test]
fn test_wait_wakes_on_publish() {
    let mut producer = Producer::create(904).unwrap();
    let mut consumer = Consumer::attach(904).unwrap();

    let publisher = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        producer.publish(&[0x77; 16], &hd_meta()).unwrap();
        producer
    });

    let mut buf = frame_buf();
    let start = Instant::now();
    let meta = consumer
        .wait(&mut buf, Some(Duration::from_millis(1000)))
        .unwrap()
        .expect("wait must deliver the published frame");
    let elapsed = start.elapsed();

    assert_eq!(meta.size, 16);
    assert!(
        elapsed < Duration::from_millis(500),
        "wake took {elapsed:?}, expected well under the timeout"
    );

    let _producer = publisher.join().unwrap();
}

/// A wait with no publish times out with no frame and no error.
#[test]
fn test_wait_times_out_quietly() {
    let _producer = Producer::create(912).unwrap();
    let mut consumer = Consumer::attach(912).unwrap();

    let mut buf = frame_buf();
    let start = Instant::now();
    let result = consumer
        .wait(&mut buf, Some(Duration::from_millis(100)))
        .unwrap();
    assert!(result.is_none());
    assert!(start.elapsed() >= Duration::from_millis(90));
}

/// The read-signal counts publications, not deliveries: a wake-up that finds
/// no newer frame reports "nothing" rather than an error.
#[test]
fn test_wait_after_poll_finds_no_new_frame() {
    let mut producer = Producer::create(913).unwrap();
    let mut consumer = Consumer::attach(913).unwrap();

    producer.publish(&[0x10; 8], &hd_meta()).unwrap();

    let mut buf = frame_buf();
    assert!(consumer.poll(&mut buf).unwrap().is_some());

    // The publish's signal token is still pending; the wake finds nothing new.
    let result = consumer
        .wait(&mut buf, Some(Duration::from_millis(200)))
        .unwrap();
    assert!(result.is_none());
}

/// Attaching to a region with a foreign version fails without counting the
/// reader.
#[test]
fn test_version_mismatch_rejects_attach() {
    use std::io::{Read, Seek, SeekFrom, Write};

    let _producer = Producer::create(905).unwrap();

    // POSIX shared objects surface under /dev/shm on Linux; rewrite the
    // version field the way an incompatible peer would have.
    let path = "/dev/shm/video_stream_ch905";
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .unwrap();
    file.seek(SeekFrom::Start(4)).unwrap();
    file.write_all(&2u32.to_le_bytes()).unwrap();

    match Consumer::attach(905) {
        Err(TransportError::VersionMismatch { magic, version }) => {
            assert_eq!(magic, 0x5649_4445);
            assert_eq!(version, 2);
        }
        other => panic!("expected VersionMismatch, got {other:?}"),
    }

    // active_readers sits at byte offset 24 and must still be zero.
    let mut raw = [0u8; 4];
    file.seek(SeekFrom::Start(24)).unwrap();
    file.read_exact(&mut raw).unwrap();
    assert_eq!(u32::from_le_bytes(raw), 0);
}

/// A new producer recovers a channel whose previous owner died leaving
/// garbage behind.
#[test]
fn test_stale_region_recovery() {
    std::fs::write("/dev/shm/video_stream_ch906", vec![0xFF; 4096]).unwrap();

    let mut producer = Producer::create(906).unwrap();
    assert_eq!(producer.published_total(), 0);
    assert_eq!(producer.dropped_total(), 0);

    let mut consumer = Consumer::attach(906).unwrap();
    let stats = consumer.stats();
    assert_eq!(stats.total, 0);
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.missed, 0);

    producer.publish(&[0xAA; 4], &hd_meta()).unwrap();
    let mut buf = frame_buf();
    let meta = consumer.poll(&mut buf).unwrap().expect("fresh channel works");
    assert_eq!(meta.sequence, 0);
}

/// The header's magic and version are installed once at init and survive
/// arbitrary traffic untouched.
#[test]
fn test_magic_and_version_survive_traffic() {
    let mut producer = Producer::create(914).unwrap();

    let read_prefix = || {
        let raw = std::fs::read("/dev/shm/video_stream_ch914").unwrap();
        (
            u32::from_le_bytes(raw[0..4].try_into().unwrap()),
            u32::from_le_bytes(raw[4..8].try_into().unwrap()),
        )
    };

    assert_eq!(read_prefix(), (0x5649_4445, 1));

    for _ in 0..40 {
        producer.publish(&[0x0F; 128], &hd_meta()).unwrap();
    }

    assert_eq!(read_prefix(), (0x5649_4445, 1));
}

/// Attempted = published + dropped, with nothing lost in between.
#[test]
fn test_drop_conservation() {
    let mut producer = Producer::create(907).unwrap();
    let names = ChannelNames::for_channel(907);
    let gate = Semaphore::open(&names.write_gate).unwrap();

    assert!(gate.try_acquire().unwrap());
    for _ in 0..10 {
        let outcome = producer.publish(&[0; 8], &hd_meta()).unwrap();
        assert_eq!(outcome, PublishOutcome::Dropped);
    }
    gate.post().unwrap();

    for _ in 0..25 {
        let outcome = producer.publish(&[0; 8], &hd_meta()).unwrap();
        assert_eq!(outcome, PublishOutcome::Published);
    }

    assert_eq!(producer.published_total(), 25);
    assert_eq!(producer.dropped_total(), 10);
}

/// Every attached reader independently sees the same published frame.
#[test]
fn test_multiple_consumers_see_the_same_frame() {
    let mut producer = Producer::create(908).unwrap();

    let mut consumers = [
        Consumer::attach(908).unwrap(),
        Consumer::attach(908).unwrap(),
        Consumer::attach(908).unwrap(),
    ];
    assert_eq!(consumers[0].active_readers(), 3);

    producer.publish(&[0x31, 0x41, 0x59], &hd_meta()).unwrap();

    for consumer in &mut consumers {
        let mut buf = frame_buf();
        let meta = consumer.poll(&mut buf).unwrap().expect("frame for every reader");
        assert_eq!(meta.sequence, 0);
        assert_eq!(meta.size, 3);
        assert_eq!(&buf[..3], &[0x31, 0x41, 0x59]);
    }
}

/// NotReady is recoverable end-to-end: a waiting consumer converges as soon
/// as a producer appears.
#[test]
fn test_attach_retries_until_producer_appears() {
    let (done_tx, done_rx) = mpsc::channel::<()>();

    let producer_thread = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        let producer = Producer::create(910).unwrap();
        // Keep the channel alive until the consumer side is finished.
        let _ = done_rx.recv();
        drop(producer);
    });

    let consumer = common::wait_for_resource(|| Consumer::attach(910), 10, "channel 910 consumer");
    assert_eq!(consumer.active_readers(), 1);

    drop(consumer);
    done_tx.send(()).unwrap();
    producer_thread.join().unwrap();
}

/// With no producer at all, bounded retries surface NotReady to the caller.
#[test]
fn test_bounded_retry_reports_not_ready() {
    let result = common::retry_with_backoff(|| Consumer::attach(911), 3, 1, "channel 911 consumer");
    assert!(matches!(result, Err(TransportError::NotReady)));
}

/// Sustained producer/consumer traffic across threads: the consumer always
/// observes monotonically increasing sequences and never a torn payload.
#[test]
fn test_concurrent_stream_stays_coherent() {
    const FRAMES: u32 = 200;

    let mut producer = Producer::create(909).unwrap();
    let mut consumer = Consumer::attach(909).unwrap();

    let publisher = thread::spawn(move || {
        for i in 0..FRAMES {
            let mut payload = [0u8; 64];
            payload[..4].copy_from_slice(&i.to_le_bytes());
            payload[4..].fill((i % 251) as u8);
            producer.publish(&payload, &hd_meta()).unwrap();
            thread::sleep(Duration::from_millis(1));
        }
        producer
    });

    let mut buf = frame_buf();
    let mut last_sequence: Option<u32> = None;
    let mut frames_seen = 0u32;
    let deadline = Instant::now() + Duration::from_secs(10);

    while frames_seen < 20 && Instant::now() < deadline {
        match consumer
            .wait(&mut buf, Some(Duration::from_millis(200)))
            .unwrap()
        {
            Some(meta) => {
                let tagged = u32::from_le_bytes(buf[..4].try_into().unwrap());
                assert_eq!(tagged, meta.sequence, "payload and metadata must agree");
                assert!(
                    buf[4..meta.size as usize]
                        .iter()
                        .all(|&b| b == (meta.sequence % 251) as u8),
                    "payload of frame {} is torn",
                    meta.sequence
                );
                if let Some(prev) = last_sequence {
                    assert!(meta.sequence > prev, "sequences must move forward");
                }
                last_sequence = Some(meta.sequence);
                frames_seen += 1;
            }
            None => {}
        }
    }

    let producer = publisher.join().unwrap();
    assert!(frames_seen >= 20, "only saw {frames_seen} frames");
    assert_eq!(producer.published_total(), FRAMES);
    drop(consumer);
}

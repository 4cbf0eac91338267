//! # Stress Tests for Flashlog
//!
//! High-load tests to verify log behavior under extreme conditions:
//! - Concurrent writers and readers contending for the guard
//! - Thousands of appends forcing repeated compaction
//! - Erratic clocks
//! - Power loss at every byte of a write

use flashlog::codec::{self, MAX_ENTRY_SIZE};
use flashlog::{
    FlashDriver, FlashLog, FlashLogBuilder, FlashLogConfig, FlashLogError, ManualClock, RamFlash,
    RecoveryAction,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

fn open(flash: &RamFlash, config: FlashLogConfig, clock: Arc<ManualClock>) -> FlashLog<RamFlash> {
    FlashLogBuilder::new(flash.clone())
        .config(config)
        .clock(clock)
        .init()
        .unwrap()
}

fn assert_strictly_increasing(log: &FlashLog<RamFlash>) -> Vec<flashlog::LogEntry> {
    let entries = log.read_all().unwrap();
    for pair in entries.windows(2) {
        assert!(
            pair[0].timestamp < pair[1].timestamp,
            "timestamps out of order: {} then {}",
            pair[0].timestamp,
            pair[1].timestamp
        );
    }
    entries
}

/// Test 1: Writers and readers hammering one log from many threads
///
/// Verifies:
/// - Contention only ever surfaces as `Busy`
/// - Refused writes are counted and flushed into the log
/// - The log stays readable and ordered throughout
#[test]
fn test_concurrent_writers_and_readers() {
    let flash = RamFlash::new(2048, 4);
    let log = Arc::new(open(
        &flash,
        FlashLogConfig::default(),
        Arc::new(ManualClock::new(0)),
    ));

    let writers = 8;
    let appends_per_writer = 300;
    let written = Arc::new(AtomicUsize::new(0));
    let busy = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for writer in 0..writers {
        let log = Arc::clone(&log);
        let written = Arc::clone(&written);
        let busy = Arc::clone(&busy);
        handles.push(thread::spawn(move || {
            for i in 0..appends_per_writer {
                let payload = [writer as u8, (i % 256) as u8, 0x5a];
                match log.add_event(0x40 + writer as u8, &payload) {
                    Ok(()) => {
                        written.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(FlashLogError::Busy) => {
                        busy.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => panic!("unexpected append error: {e}"),
                }
            }
        }));
    }

    for _ in 0..2 {
        let log = Arc::clone(&log);
        handles.push(thread::spawn(move || {
            let mut buf = [0u8; MAX_ENTRY_SIZE];
            let mut after = 0;
            for _ in 0..2_000 {
                match log.dequeue(after, &mut buf) {
                    Ok(Some(len)) => {
                        assert!(codec::validate(&buf[..len]));
                        let entry = flashlog::LogEntry::decode(&buf[..len]).unwrap();
                        after = entry.timestamp;
                    }
                    Ok(None) => after = 0,
                    Err(FlashLogError::Busy) => {}
                    Err(e) => panic!("unexpected dequeue error: {e}"),
                }
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(written.load(Ordering::Relaxed) > 0);
    assert_eq!(
        written.load(Ordering::Relaxed) + busy.load(Ordering::Relaxed),
        writers * appends_per_writer
    );

    // Each append flushes at most 255 pending failures
    while log.lock_failures() > 0 {
        log.add_event(0x7f, b"flush").unwrap();
    }
    log.add_event(0x7f, b"done").unwrap();

    let entries = assert_strictly_increasing(&log);
    assert_eq!(entries.last().unwrap().payload, b"done");
    let stats = log.stats().unwrap();
    assert!(stats.write_cursor <= stats.capacity);
}

/// Test 2: Thousands of random appends on a small region
///
/// Forces compaction over and over and checks after every append that the
/// newest entry is the one just written.
#[test]
fn test_repeated_compaction_keeps_newest() {
    let config = FlashLogConfig::small();
    let flash = RamFlash::new(config.capacity, config.write_granularity);
    let clock = Arc::new(ManualClock::new(0));
    let log = open(&flash, config.clone(), Arc::clone(&clock));
    let mut rng = StdRng::seed_from_u64(0x5eed);

    let erases_before = flash.erase_count();
    let mut last_timestamp = 0;
    for i in 0..5_000u32 {
        let len = rng.random_range(0..=codec::MAX_PAYLOAD_SIZE);
        let payload: Vec<u8> = (0..len).map(|_| rng.random()).collect();
        let event_type = (i % 200) as u8 + 16;
        log.add_event(event_type, &payload).unwrap();

        let stats = log.stats().unwrap();
        assert!(stats.write_cursor <= config.capacity);
        assert!(stats.last_timestamp > last_timestamp);
        last_timestamp = stats.last_timestamp;

        if i % 250 == 0 {
            let entries = assert_strictly_increasing(&log);
            let newest = entries.last().unwrap();
            assert_eq!(newest.event_type, event_type);
            assert_eq!(newest.payload, payload);
        }
    }

    assert!(flash.erase_count() > erases_before + 10);
    assert_eq!(log.overflow_failures(), 0);
}

/// Test 3: Clock running backwards, stalling and jumping
///
/// Timestamps must stay strictly increasing whatever uptime reports, and
/// must survive a reopen.
#[test]
fn test_erratic_clock_keeps_timestamps_monotonic() {
    let config = FlashLogConfig::default();
    let flash = RamFlash::new(config.capacity, config.write_granularity);
    let clock = Arc::new(ManualClock::new(0));
    let mut rng = StdRng::seed_from_u64(42);

    let log = open(&flash, config.clone(), Arc::clone(&clock));
    for i in 0..400u32 {
        match rng.random_range(0..4) {
            0 => clock.set(rng.random_range(0..100)),
            1 => clock.advance(rng.random_range(0..10_000)),
            _ => {}
        }
        if i == 200 {
            log.set_timestamp_base(log.stats().unwrap().last_timestamp + 50)
                .unwrap();
        }
        log.add_event(0x21, &i.to_le_bytes()).unwrap();
    }
    let before = assert_strictly_increasing(&log);
    let newest = before.last().unwrap().timestamp;
    drop(log);

    clock.set(0);
    let log = open(&flash, config, clock);
    assert_eq!(log.recovery().last_timestamp, newest);
    log.add_event(0x21, b"reopened").unwrap();
    let after = assert_strictly_increasing(&log);
    assert!(after.last().unwrap().timestamp > newest);
}

/// Test 4: Power cut after every possible number of programmed bytes
///
/// Verifies committed entries survive, a torn entry is either complete or
/// repaired, and the log keeps working afterwards.
#[test]
fn test_power_loss_at_every_byte() {
    let config = FlashLogConfig::small();
    // 7 byte header + 3 byte payload, padded to 12
    let padded = codec::padded_size(3, config.write_granularity);

    for cut in 0..=padded {
        let flash = RamFlash::new(config.capacity, config.write_granularity);
        let clock = Arc::new(ManualClock::new(0));
        let committed;
        let torn_offset;
        {
            let log = open(&flash, config.clone(), Arc::clone(&clock));
            for i in 0..5u8 {
                log.add_event(0x30, &[i, i, i]).unwrap();
            }
            committed = log.read_all().unwrap();
            torn_offset = log.stats().unwrap().write_cursor;

            flash.fail_after(cut);
            let result = log.add_event(0x31, b"cut");
            if cut < padded {
                assert!(matches!(result, Err(FlashLogError::Flash(_))));
            } else {
                result.unwrap();
            }
            flash.restore_power();
        }

        let image = flash.snapshot();
        let window = &image[torn_offset..torn_offset + MAX_ENTRY_SIZE];
        let survived = codec::validate(window);

        let log = open(&flash, config.clone(), Arc::clone(&clock));
        let entries = assert_strictly_increasing(&log);
        assert_eq!(&entries[..committed.len()], &committed[..]);

        match log.recovery().action {
            RecoveryAction::Resumed => {
                if survived {
                    assert_eq!(entries.last().unwrap().payload, b"cut");
                } else {
                    assert_eq!(cut, 0, "only an untouched slot resumes cleanly");
                    assert_eq!(entries.len(), committed.len());
                }
            }
            RecoveryAction::Corrupted { offset, compacted } => {
                assert!(!survived);
                assert_eq!(offset, torn_offset);
                assert!(compacted);
                assert_eq!(entries.len(), committed.len() + 1);
            }
            other => panic!("unexpected recovery {other:?} at cut {cut}"),
        }

        log.add_event(0x32, b"next").unwrap();
        let entries = assert_strictly_increasing(&log);
        assert_eq!(entries.last().unwrap().payload, b"next");
    }
}

/// Test 5: Damage at every byte of a populated region
///
/// Whatever byte is flipped, init must not panic, must come up ready and
/// every entry it hands out must validate.
#[test]
fn test_single_byte_damage_anywhere() {
    let config = FlashLogConfig::with_capacity(256)
        .with_preserve_window(128)
        .with_startup_high_water(256);
    let pristine = {
        let flash = RamFlash::new(config.capacity, config.write_granularity);
        let log = open(&flash, config.clone(), Arc::new(ManualClock::new(0)));
        for i in 0..12u8 {
            log.add_event(0x50, &[i; 5]).unwrap();
        }
        flash.snapshot()
    };
    let used = pristine
        .iter()
        .rposition(|&b| b != codec::ERASED_BYTE)
        .unwrap()
        + 1;

    for offset in 0..used {
        let mut image = pristine.clone();
        image[offset] ^= 0x10;
        let flash = RamFlash::from_image(image, config.write_granularity);
        assert_eq!(flash.capacity(), config.capacity);

        let log = open(&flash, config.clone(), Arc::new(ManualClock::new(0)));
        let entries = assert_strictly_increasing(&log);
        assert!(!entries.is_empty());
        log.add_event(0x51, b"after").unwrap();
    }
}

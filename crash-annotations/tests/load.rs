use crash_annotations::{AnnotationType, Error, RingBufferAnnotation, RingBufferReader};
use std::{
    sync::{Arc, atomic},
    time::Duration,
};

static LOAD: RingBufferAnnotation<1024> =
    RingBufferAnnotation::new(AnnotationType::user_defined(0x42), "ring-buffer-load");

/// Hammers a single ring buffer annotation with writers while a reader keeps
/// snapshotting it, every snapshot must only contain whole records, in the
/// order each writer pushed them
#[test]
fn concurrent_push_and_snapshot() {
    const WRITERS: usize = 4;
    const RECORDS: usize = 5000;

    let snapshots = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let dropped = Arc::new(atomic::AtomicUsize::new(0));
    let done = Arc::new(atomic::AtomicBool::new(false));

    let reader = {
        let snapshots = snapshots.clone();
        let done = done.clone();
        std::thread::spawn(move || {
            while !done.load(atomic::Ordering::Relaxed) {
                if let Ok(snapshot) = LOAD.snapshot(Duration::from_millis(10)) {
                    let records: Vec<_> = RingBufferReader::new(&*snapshot).collect();
                    snapshots.lock().push(records);
                }
            }
        })
    };

    let writers: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let dropped = dropped.clone();
            std::thread::spawn(move || {
                for i in 0..RECORDS {
                    match LOAD.push(format!("{writer}:{i}").as_bytes()) {
                        Ok(()) => {}
                        Err(Error::GuardUnavailable) => {
                            dropped.fetch_add(1, atomic::Ordering::Relaxed);
                        }
                        Err(err) => panic!("unexpected push failure: {err}"),
                    }
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }

    done.store(true, atomic::Ordering::Relaxed);
    reader.join().unwrap();

    assert!(dropped.load(atomic::Ordering::Relaxed) < WRITERS * RECORDS);

    let snapshots = snapshots.lock();
    for records in snapshots.iter() {
        let mut last = [None; WRITERS];

        for record in records {
            let record = std::str::from_utf8(record).expect("torn record");
            let (writer, i) = record.split_once(':').expect("torn record");
            let writer: usize = writer.parse().unwrap();
            let i: usize = i.parse().unwrap();

            if let Some(prev) = last[writer] {
                assert!(i > prev, "{record} after {writer}:{prev}");
            }
            last[writer] = Some(i);
        }
    }

    // The final state is also consistent
    let last: Vec<_> = RingBufferReader::new(&*LOAD.snapshot(Duration::ZERO).unwrap()).collect();
    assert!(!last.is_empty());
}

use intermediate_dump::{
    DumpObject, DumpSource, Error, InitializeResult, IntermediateDumpReader,
    IntermediateDumpWriter, Key, ProcessMemory, ReaderState,
};
use proptest::prelude::*;

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Writes a dump resembling one written for an actual crash
fn write_dump<W: std::io::Write>(writer: &mut IntermediateDumpWriter<W>) {
    let thread_name = b"main\0";
    let stack: Vec<u8> = (0..5_000).map(|i| (i % 256) as u8).collect();

    writer.root_map(|w| {
        w.add_property(Key::VERSION, 1u8);

        w.map(Key::PROCESS_INFO, |w| {
            w.add_property(Key::PID, 1234u32);
            w.add_property(Key::PARENT_PID, 1u32);
            w.add_property(Key::START_TIME, -5i64);
        });

        w.map(Key::SIGNAL_EXCEPTION, |w| {
            w.add_property(Key::SIGNAL_NUMBER, 11i32);
            w.add_property(Key::SIGNAL_ADDRESS, 0xdead_usize);
        });

        w.array(Key::THREADS, |w| {
            for id in 0..3u64 {
                w.array_map(|w| {
                    w.add_property(Key::THREAD_ID, id);
                    w.add_property_cstring(
                        &ProcessMemory,
                        Key::THREAD_NAME,
                        64,
                        thread_name.as_ptr() as usize,
                    );
                    w.add_property_from(
                        &ProcessMemory,
                        Key::STACK_REGION_DATA,
                        stack.as_ptr() as usize,
                        stack.len(),
                    );
                    w.array(Key::THREAD_CONTEXT_MEMORY_REGIONS, |_w| {});
                });
            }
        });

        w.array(Key::MODULES, |w| {
            w.array_map(|w| {
                w.add_property_str(Key::NAME, "/usr/bin/crashy");
            });
        });
    });
}

fn dump_bytes() -> Vec<u8> {
    let mut writer = IntermediateDumpWriter::new(Vec::new());
    write_dump(&mut writer);
    writer.close().unwrap()
}

/// Writing a tree, then reading it back, reproduces the same keys, nesting,
/// and values
#[test]
fn writer_to_reader() {
    init_logging();

    let bytes = dump_bytes();
    let mut reader = IntermediateDumpReader::new();
    assert_eq!(
        reader.initialize(DumpSource::Bytes(&bytes)),
        InitializeResult::Success
    );
    assert_eq!(reader.state(), ReaderState::Valid);

    let root = reader.root_map().unwrap();
    assert_eq!(root.len(), 5);
    assert_eq!(root.required_value::<u8>(Key::VERSION), Some(1));

    let process = root.get_as_map(Key::PROCESS_INFO).unwrap();
    assert_eq!(process.required_value::<u32>(Key::PID), Some(1234));
    assert_eq!(process.required_value::<i64>(Key::START_TIME), Some(-5));

    let signal = root.get_as_map(Key::SIGNAL_EXCEPTION).unwrap();
    assert_eq!(signal.required_value::<i32>(Key::SIGNAL_NUMBER), Some(11));
    assert_eq!(
        signal.required_value::<usize>(Key::SIGNAL_ADDRESS),
        Some(0xdead)
    );

    let threads = root.get_as_list(Key::THREADS).unwrap();
    assert_eq!(threads.len(), 3);

    for (id, thread) in threads.iter().enumerate() {
        assert_eq!(thread.required_value::<u64>(Key::THREAD_ID), Some(id as u64));
        assert_eq!(thread.required_string(Key::THREAD_NAME).as_deref(), Some("main"));

        let stack = thread.get_as_data(Key::STACK_REGION_DATA).unwrap();
        assert_eq!(stack.len(), 5_000);
        assert!(stack.bytes().iter().enumerate().all(|(i, b)| *b == (i % 256) as u8));

        assert!(
            thread
                .get_as_list(Key::THREAD_CONTEXT_MEMORY_REGIONS)
                .unwrap()
                .is_empty()
        );
    }

    let module = root.get_as_list(Key::MODULES).unwrap().get(0).unwrap();
    assert_eq!(
        module.required_string(Key::NAME).as_deref(),
        Some("/usr/bin/crashy")
    );
}

/// Every prefix of a valid dump, ie. a dump written by a process that died
/// partway through, can be read without any problems, and keeps everything
/// written before the cut
#[test]
fn truncated_dumps() {
    let bytes = dump_bytes();

    for len in 1..bytes.len() {
        let mut reader = IntermediateDumpReader::new();
        assert_eq!(
            reader.initialize(DumpSource::Bytes(&bytes[..len])),
            InitializeResult::Incomplete,
            "{len}"
        );
        assert!(matches!(reader.error(), Some(Error::Parse(_))));

        let root = reader.root_map().unwrap();

        // The version is the first property, so once it is in the truncated
        // data it must be in the tree
        if len > 1 + 2 + std::mem::size_of::<usize>() + 1 {
            assert_eq!(root.required_value::<u8>(Key::VERSION), Some(1), "{len}");
        }
    }
}

proptest! {
    /// Corrupting any bytes of a valid dump never causes the reader to panic
    /// or over-read, and whatever was read before the corruption is kept
    #[test]
    fn corrupt_dumps(edits in proptest::collection::vec((any::<prop::sample::Index>(), any::<u8>()), 1..8)) {
        let mut corrupt = dump_bytes();
        for (index, byte) in edits {
            let index = index.index(corrupt.len());
            corrupt[index] = byte;
        }

        let mut reader = IntermediateDumpReader::new();
        let res = reader.initialize(DumpSource::Bytes(&corrupt));
        prop_assert_ne!(res, InitializeResult::Failure);
        prop_assert!(reader.root_map().is_some());
    }

    /// Arbitrary data is never a valid dump, but still produces a tree
    #[test]
    fn arbitrary_bytes(bytes in proptest::collection::vec(any::<u8>(), 1..512)) {
        let mut reader = IntermediateDumpReader::new();
        prop_assert_ne!(
            reader.initialize(DumpSource::Bytes(&bytes)),
            InitializeResult::Failure
        );
        prop_assert!(reader.root_map().is_some());
    }

    /// Cutting a dump short anywhere keeps everything before the cut
    #[test]
    fn truncated_anywhere(cut in any::<prop::sample::Index>()) {
        let bytes = dump_bytes();
        let len = cut.index(bytes.len() - 1) + 1;

        let mut reader = IntermediateDumpReader::new();
        prop_assert_eq!(
            reader.initialize(DumpSource::Bytes(&bytes[..len])),
            InitializeResult::Incomplete
        );

        let root = reader.root_map().unwrap();
        if len > 1 + 2 + std::mem::size_of::<usize>() + 1 {
            prop_assert_eq!(root.required_value::<u8>(Key::VERSION), Some(1));
        }
    }
}

#[test]
fn file_sources() {
    init_logging();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("crash.dump");

    let mut writer = IntermediateDumpWriter::open(&path).unwrap();
    write_dump(&mut writer);
    writer.close().unwrap();

    let mut reader = IntermediateDumpReader::new();
    assert_eq!(
        reader.initialize(DumpSource::File(&path)),
        InitializeResult::Success
    );
    assert!(path.exists());

    let mut consumer = IntermediateDumpReader::new();
    assert_eq!(
        consumer.initialize(DumpSource::ConsumeFile(&path)),
        InitializeResult::Success
    );
    assert!(!path.exists(), "consumed dump was not removed");
    assert_eq!(reader.root_map(), consumer.root_map());

    // Once consumed, the dump is gone
    let mut missing = IntermediateDumpReader::new();
    assert_eq!(
        missing.initialize(DumpSource::ConsumeFile(&path)),
        InitializeResult::Failure
    );
    assert!(matches!(missing.error(), Some(Error::Io(_))));
    assert_eq!(missing.state(), ReaderState::Failed);
}

#[test]
fn empty_file() {
    let file = tempfile::NamedTempFile::new().unwrap();

    let mut reader = IntermediateDumpReader::new();
    assert_eq!(
        reader.initialize(DumpSource::File(file.path())),
        InitializeResult::Failure
    );
    assert!(matches!(reader.error(), Some(Error::Empty)));
}

/// Map and list nodes can be walked generically, eg. for printing
#[test]
fn generic_walk() {
    fn count(map: &intermediate_dump::DumpMap) -> usize {
        map.iter()
            .map(|(_key, object)| match object {
                DumpObject::Data(_) => 1,
                DumpObject::Map(map) => 1 + count(map),
                DumpObject::List(list) => 1 + list.iter().map(count).sum::<usize>(),
            })
            .sum()
    }

    let bytes = dump_bytes();
    let mut reader = IntermediateDumpReader::new();
    reader.initialize(DumpSource::Bytes(&bytes));

    // version, process info (3), signal (2), threads (3 * 4), modules (1)
    assert_eq!(count(reader.root_map().unwrap()), 1 + 4 + 3 + 13 + 2);
}

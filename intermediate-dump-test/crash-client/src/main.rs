use crash_annotations::{
    Annotation, AnnotationList, AnnotationType, RingBufferAnnotation, StringAnnotation,
};
use intermediate_dump::{CaptureOptions, IntermediateDumpWriter, Key, ProcessMemory};
use intermediate_dump_test::{BREADCRUMBS, BUILD_ID, MODULE_NAME, Signal, VERSION};
use parking_lot::Mutex;
use std::{
    fs::File,
    path::PathBuf,
    sync::atomic::{AtomicU8, Ordering},
};

use clap::Parser;

#[derive(Parser)]
struct Command {
    /// The path of the intermediate dump to write when this client crashes
    #[clap(long)]
    dump: PathBuf,
    /// The signal/exception to raise
    #[clap(long)]
    signal: Signal,
    /// Raises the signal on a separate thread rather than the main thread
    #[clap(long)]
    use_thread: bool,
}

static VERSION_ANNOTATION: StringAnnotation<32> = StringAnnotation::new("version");
static CLEARED: StringAnnotation<8> = StringAnnotation::new("cleared");
static BREADCRUMB_LOG: RingBufferAnnotation<256> =
    RingBufferAnnotation::new(AnnotationType::user_defined(2), "breadcrumbs");
static BUILD_ID_STORAGE: [AtomicU8; 8] = [const { AtomicU8::new(0) }; 8];
static BUILD_ID_ANNOTATION: Annotation = Annotation::new(
    AnnotationType::user_defined(1),
    "build-id",
    &BUILD_ID_STORAGE,
);

fn set_annotations() -> anyhow::Result<()> {
    VERSION_ANNOTATION.set(VERSION);

    CLEARED.set("gone");
    CLEARED.clear();

    for (slot, byte) in BUILD_ID_STORAGE.iter().zip(BUILD_ID) {
        slot.store(byte, Ordering::Relaxed);
    }
    BUILD_ID_ANNOTATION.set_size(BUILD_ID.len() as u32);

    for i in 0..BREADCRUMBS {
        BREADCRUMB_LOG.push(format!("breadcrumb {i}").as_bytes())?;
    }

    Ok(())
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        fn write_exception(w: &mut IntermediateDumpWriter, cc: &crash_handler::CrashContext) {
            w.map(Key::SIGNAL_EXCEPTION, |w| {
                w.add_property(Key::SIGNAL_NUMBER, cc.siginfo.ssi_signo);
                w.add_property(Key::SIGNAL_CODE, cc.siginfo.ssi_code);
                w.add_property(Key::SIGNAL_ADDRESS, cc.siginfo.ssi_addr);
            });
        }
    } else if #[cfg(target_os = "macos")] {
        fn write_exception(w: &mut IntermediateDumpWriter, cc: &crash_handler::CrashContext) {
            if let Some(exception) = &cc.exception {
                w.map(Key::MACH_EXCEPTION, |w| {
                    w.add_property(Key::EXCEPTION, exception.kind);
                    w.add_property(Key::CODES, exception.code);
                });
            }
        }
    } else {
        fn write_exception(_w: &mut IntermediateDumpWriter, _cc: &crash_handler::CrashContext) {}
    }
}

/// Called from the crash handler, so nothing in here may allocate or lock
fn write_dump(writer: &mut IntermediateDumpWriter, cc: &crash_handler::CrashContext) -> bool {
    writer.root_map(|w| {
        w.add_property(Key::VERSION, 1u8);
        w.map(Key::PROCESS_INFO, |w| {
            w.add_property(Key::PID, std::process::id());
        });

        write_exception(w, cc);

        w.array(Key::MODULES, |w| {
            w.array_map(|w| {
                w.add_property_str(Key::NAME, MODULE_NAME);

                if let Some(list) = AnnotationList::get() {
                    intermediate_dump::write_annotations(
                        w,
                        &ProcessMemory,
                        list,
                        &CaptureOptions::default(),
                    );
                }
            });
        });
    });

    writer.flush()
}

#[allow(unsafe_code)]
fn real_main() -> anyhow::Result<()> {
    let cmd = Command::parse();

    println!("pid: {}", std::process::id());

    set_annotations()?;

    // The writer, and the file it writes to, are created up front, as that
    // can't be done safely once we've crashed
    let writer = Mutex::new(IntermediateDumpWriter::new(File::create(&cmd.dump)?));

    let _handler = crash_handler::CrashHandler::attach(unsafe {
        crash_handler::make_crash_event(move |cc: &crash_handler::CrashContext| {
            // Only one crash is ever handled, so the lock is never contended
            let handled = writer
                .try_lock()
                .is_some_and(|mut writer| write_dump(&mut writer, cc));
            crash_handler::CrashEventResult::Handled(handled)
        })
    })?;

    let signal = cmd.signal;

    let raise_signal = move || {
        // SAFETY: we're about to intentionally crash ourselves, none of this
        // is safe
        unsafe {
            match signal {
                Signal::Abort => {
                    sadness_generator::raise_abort();
                }
                Signal::Illegal => {
                    sadness_generator::raise_illegal_instruction();
                }
                Signal::Segv => {
                    sadness_generator::raise_segfault();
                }
                Signal::Trap => {
                    sadness_generator::raise_trap();
                }
            }
        }
    };

    if cmd.use_thread {
        std::thread::spawn(raise_signal)
            .join()
            .expect("failed to join thread");
    } else {
        raise_signal();
    }

    anyhow::bail!("we should have raised a signal and exited");
}

fn main() {
    // We want this program to crash and have a dump written, it _shouldn't_
    // have errors that prevent that from happening, so emit an error code if we
    // do encounter an error so that we can fail the test
    if let Err(e) = real_main() {
        eprintln!("error: {:#}", e);

        // When exiting due to a crash, the exit code will be 128 + the integer
        // signal number, at least on unixes
        #[allow(clippy::exit)]
        std::process::exit(222);
    }
}

use intermediate_dump::{DumpMap, DumpSource, InitializeResult, IntermediateDumpReader, Key};
use std::path::PathBuf;

/// The value of the string annotation set by the crash client
pub const VERSION: &str = "1.2.3-crashy";
/// The value of the bytes annotation set by the crash client
pub const BUILD_ID: [u8; 8] = [0xde, 0xad, 0xbe, 0xef, 0x00, 0x01, 0x02, 0x03];
/// The number of breadcrumbs the crash client pushes, which is more than fit
/// in its ring buffer
pub const BREADCRUMBS: usize = 100;
/// The name of the module the crash client's annotations are stored under
pub const MODULE_NAME: &str = "crash-client";

#[derive(clap::ValueEnum, Clone, Copy)]
pub enum Signal {
    Abort,
    Illegal,
    Segv,
    Trap,
}

use std::fmt;
impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Abort => "abort",
            Self::Illegal => "illegal",
            Self::Segv => "segv",
            Self::Trap => "trap",
        })
    }
}

#[inline]
fn make_dump_path(id: &str) -> PathBuf {
    PathBuf::from(format!(".dumps/{id}.dump"))
}

#[inline]
pub fn run_test(signal: Signal, counter: u32, use_thread: bool) -> DumpMap {
    let id = format!(
        "{}-{}-{}",
        signal,
        counter,
        if use_thread { "threaded" } else { "simple" }
    );
    let root = generate_dump(&id, signal, use_thread);
    assert_dump(&root, signal);
    root
}

pub fn run_threaded_test(signal: Signal, count: u32) {
    use rayon::prelude::*;

    (0..count).into_par_iter().for_each(|i| {
        run_test(signal, i, true);
    });
}

pub fn run_client(dump_path: &std::path::Path, signal: Signal, use_thread: bool) {
    use std::env;

    // Adapted from
    // https://github.com/rust-lang/cargo/blob/485670b3983b52289a2f353d589c57fae2f60f82/tests/testsuite/support/mod.rs#L507
    let mut cmd_path = env::current_exe().expect("failed to get exe path");
    cmd_path.pop();
    if cmd_path.ends_with("deps") {
        cmd_path.pop();
    }

    cmd_path.push("crash-client");
    if !env::consts::EXE_SUFFIX.is_empty() {
        cmd_path.set_extension(env::consts::EXE_SUFFIX);
    }

    let mut cmd = std::process::Command::new(&cmd_path);
    cmd.stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());
    cmd.arg("--dump")
        .arg(dump_path)
        .args(["--signal", &signal.to_string()]);
    if use_thread {
        cmd.arg("--use-thread");
    }

    let child = cmd.spawn().expect("failed to run crash-client");
    let output = child.wait_with_output().expect("failed to wait for output");

    let stdout = std::str::from_utf8(&output.stdout).expect("invalid stdout");
    let stderr = std::str::from_utf8(&output.stderr).expect("invalid stderr");

    println!("{stdout}");
    eprintln!("{stderr}");

    // Ensure it was interrupted and did not exit properly
    assert!(output.status.code().is_none());
}

#[inline]
pub fn capture_output() {
    static SUB: std::sync::Once = std::sync::Once::new();

    SUB.call_once(|| {
        tracing_subscriber::fmt().with_test_writer().init();
    });
}

/// Runs the crash client, and reads the dump it wrote from within its crash
/// handler
pub fn generate_dump(id: &str, signal: Signal, use_thread: bool) -> DumpMap {
    capture_output();

    let dump_path = make_dump_path(id);

    if let Some(parent) = dump_path.parent() {
        std::fs::create_dir_all(parent).expect("failed to create dump directory");
    }

    if dump_path.exists() {
        if let Err(e) = std::fs::remove_file(&dump_path) {
            panic!(
                "failed to remove existing dump file {}: {}",
                dump_path.display(),
                e
            );
        }
    }

    run_client(&dump_path, signal, use_thread);

    let mut reader = IntermediateDumpReader::new();
    let res = reader.initialize(DumpSource::ConsumeFile(&dump_path));
    assert_eq!(
        res,
        InitializeResult::Success,
        "failed to read dump: {:?}",
        reader.error()
    );

    reader.into_root_map().expect("dump has no root map")
}

#[cfg(unix)]
#[inline]
pub fn expected_signal_number(signal: Signal) -> i32 {
    match signal {
        Signal::Abort => libc::SIGABRT,
        Signal::Illegal => libc::SIGILL,
        Signal::Segv => libc::SIGSEGV,
        Signal::Trap => libc::SIGTRAP,
    }
}

pub fn assert_dump(root: &DumpMap, signal: Signal) {
    use crash_annotations::AnnotationType;

    assert_eq!(root.required_value::<u8>(Key::VERSION), Some(1));

    let process = root.required_map(Key::PROCESS_INFO).expect("no process info");
    assert!(process.required_value::<u32>(Key::PID).is_some());

    cfg_if::cfg_if! {
        if #[cfg(any(target_os = "linux", target_os = "android"))] {
            let exception = root
                .required_map(Key::SIGNAL_EXCEPTION)
                .expect("no signal exception");
            assert_eq!(
                exception.required_value::<u32>(Key::SIGNAL_NUMBER),
                Some(expected_signal_number(signal) as u32)
            );
        } else {
            let _ = signal;
        }
    }

    let modules = root.required_list(Key::MODULES).expect("no modules");
    let module = modules
        .iter()
        .find(|module| module.required_string(Key::NAME).as_deref() == Some(MODULE_NAME))
        .expect("unable to find crash-client module");

    let annotations = intermediate_dump::extract_annotations(module);

    let version = annotations
        .iter()
        .find(|a| a.name == "version")
        .expect("missing version annotation");
    assert_eq!(version.string().as_deref(), Some(VERSION));

    let build = annotations
        .iter()
        .find(|a| a.name == "build-id")
        .expect("missing build-id annotation");
    assert_eq!(build.kind, AnnotationType::user_defined(1));
    assert_eq!(build.value, BUILD_ID);

    let breadcrumbs = annotations
        .iter()
        .find(|a| a.name == "breadcrumbs")
        .expect("missing breadcrumbs annotation")
        .ring_buffer_records()
        .expect("breadcrumbs are not a valid ring buffer");

    // The oldest breadcrumbs were evicted, but the newest must be present
    // and in order
    assert!(!breadcrumbs.is_empty() && breadcrumbs.len() < BREADCRUMBS);
    let first = BREADCRUMBS - breadcrumbs.len();
    for (i, crumb) in breadcrumbs.iter().enumerate() {
        assert_eq!(
            std::str::from_utf8(crumb).expect("invalid breadcrumb"),
            format!("breadcrumb {}", first + i)
        );
    }

    // The cleared annotation is not captured
    assert!(!annotations.iter().any(|a| a.name == "cleared"));
}

use intermediate_dump_test::*;

#[test]
fn trap_simple() {
    run_test(Signal::Trap, 0, false);
}

/// The dump is consumed when it is read, so the same crash is never
/// reported twice
#[test]
fn trap_dump_is_consumed() {
    run_test(Signal::Trap, 1, false);
    assert!(!std::path::Path::new(".dumps/trap-1-simple.dump").exists());
}

// BEGIN - Embark standard lints v6 for Rust 1.55+
// do not change or add/remove here, but one can add exceptions after this section
// for more info see: <https://github.com/EmbarkStudios/rust-ecosystem/issues/59>
#![deny(unsafe_code)]
#![warn(
    clippy::all,
    clippy::await_holding_lock,
    clippy::char_lit_as_u8,
    clippy::checked_conversions,
    clippy::dbg_macro,
    clippy::debug_assert_with_mut_call,
    clippy::doc_markdown,
    clippy::empty_enum,
    clippy::enum_glob_use,
    clippy::exit,
    clippy::expl_impl_clone_on_copy,
    clippy::explicit_deref_methods,
    clippy::explicit_into_iter_loop,
    clippy::fallible_impl_from,
    clippy::filter_map_next,
    clippy::flat_map_option,
    clippy::float_cmp_const,
    clippy::fn_params_excessive_bools,
    clippy::from_iter_instead_of_collect,
    clippy::if_let_mutex,
    clippy::implicit_clone,
    clippy::imprecise_flops,
    clippy::inefficient_to_string,
    clippy::invalid_upcast_comparisons,
    clippy::large_digit_groups,
    clippy::large_stack_arrays,
    clippy::large_types_passed_by_value,
    clippy::let_unit_value,
    clippy::linkedlist,
    clippy::lossy_float_literal,
    clippy::macro_use_imports,
    clippy::manual_ok_or,
    clippy::map_err_ignore,
    clippy::map_flatten,
    clippy::map_unwrap_or,
    clippy::match_on_vec_items,
    clippy::match_same_arms,
    clippy::match_wild_err_arm,
    clippy::match_wildcard_for_single_variants,
    clippy::mem_forget,
    clippy::mismatched_target_os,
    clippy::missing_enforced_import_renames,
    clippy::mut_mut,
    clippy::mutex_integer,
    clippy::needless_borrow,
    clippy::needless_continue,
    clippy::needless_for_each,
    clippy::option_option,
    clippy::path_buf_push_overwrite,
    clippy::ptr_as_ptr,
    clippy::rc_mutex,
    clippy::ref_option_ref,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::same_functions_in_if_condition,
    clippy::semicolon_if_nothing_returned,
    clippy::single_match_else,
    clippy::string_add_assign,
    clippy::string_add,
    clippy::string_lit_as_bytes,
    clippy::string_to_string,
    clippy::todo,
    clippy::trait_duplication_in_bounds,
    clippy::unimplemented,
    clippy::unnested_or_patterns,
    clippy::unused_self,
    clippy::useless_transmute,
    clippy::verbose_file_reads,
    clippy::zero_sized_map_values,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms
)]
// END - Embark standard lints v6 for Rust 1.55+
// crate-specific exceptions:

//! A compact, append only format for serializing a tree of process state from
//! within a crash handler, and a reader that rebuilds the tree afterwards.
//!
//! The [`IntermediateDumpWriter`] is meant to be driven from a signal or
//! exception handler, it never allocates for payloads, never blocks, and
//! reports failures by writing a fixed message to stderr rather than altering
//! the control flow of the crashing thread. Memory belonging to the crashed
//! process is only ever copied through a [`SafeRead`] implementation.
//!
//! The [`IntermediateDumpReader`] runs later, in a healthy process, and is
//! tolerant of dumps that were cut short or are otherwise corrupt, returning
//! as much of the tree as could be decoded.
//!
//! ```
//! use intermediate_dump::{DumpSource, InitializeResult, IntermediateDumpReader, IntermediateDumpWriter, Key};
//!
//! let mut writer = IntermediateDumpWriter::new(Vec::new());
//! writer.root_map(|w| {
//!     w.add_property(Key::VERSION, 1u8);
//!     w.map(Key::PROCESS_INFO, |w| w.add_property(Key::PID, 42u32));
//! });
//! let bytes = writer.close().unwrap();
//!
//! let mut reader = IntermediateDumpReader::new();
//! assert_eq!(reader.initialize(DumpSource::Bytes(&bytes)), InitializeResult::Success);
//!
//! let root = reader.root_map().unwrap();
//! let process = root.get_as_map(Key::PROCESS_INFO).unwrap();
//! assert_eq!(process.get_as_data(Key::PID).unwrap().value::<u32>(), Some(42));
//! ```

mod capture;
mod errors;
pub mod format;
mod key;
#[allow(unsafe_code)]
pub mod memory;
mod reader;
mod snapshot;
mod tree;
mod writer;

pub use capture::{CaptureOptions, write_annotations};
pub use errors::{Error, ParseError};
pub use format::{Command, PropertyValue};
pub use key::Key;
pub use memory::{ProcessMemory, SafeRead};
pub use reader::{DumpSource, InitializeResult, IntermediateDumpReader, ReaderState};
pub use snapshot::{AnnotationSnapshot, extract_annotations};
pub use tree::{DumpData, DumpList, DumpMap, DumpObject};
pub use writer::IntermediateDumpWriter;

/// Prints a message to stderr in a signal safe manner when the `debug-print`
/// feature is enabled
#[cfg(feature = "debug-print")]
#[macro_export]
macro_rules! debug_print {
    ($s:literal) => {
        let cstr = concat!($s, "\n");
        $crate::write_stderr(cstr);
    };
}

#[cfg(not(feature = "debug-print"))]
#[macro_export]
macro_rules! debug_print {
    ($s:literal) => {};
}

/// Writes the specified string directly to stderr.
///
/// This is safe to be called from within a compromised context.
#[inline]
#[allow(unsafe_code)]
pub fn write_stderr(s: &'static str) {
    unsafe {
        #[cfg(target_os = "windows")]
        libc::write(2, s.as_ptr().cast(), s.len() as u32);

        #[cfg(not(target_os = "windows"))]
        libc::write(2, s.as_ptr().cast(), s.len());
    }
}

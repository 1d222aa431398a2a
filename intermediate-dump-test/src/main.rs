use anyhow::Context as _;
use clap::Parser;
use intermediate_dump::{
    AnnotationSnapshot, DumpData, DumpMap, DumpObject, DumpSource, InitializeResult,
    IntermediateDumpReader, Key,
};
use std::path::PathBuf;

/// Prints the contents of an intermediate dump
#[derive(Parser)]
struct Command {
    /// The dump to read
    path: PathBuf,
    /// Only print the annotations in the dump
    #[clap(long)]
    annotations: bool,
    /// Removes the dump once it has been read
    #[clap(long)]
    consume: bool,
    /// The maximum number of bytes of each property to print
    #[clap(long, default_value_t = 32)]
    max_bytes: usize,
}

fn print_data(data: &DumpData, max_bytes: usize) -> String {
    let bytes = data.bytes();

    if !bytes.is_empty() && bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        return format!("{:?}", data.string());
    }

    let mut hex = String::with_capacity(max_bytes.min(bytes.len()) * 2 + 16);
    for b in bytes.iter().take(max_bytes) {
        hex.push_str(&format!("{b:02x}"));
    }

    if bytes.len() > max_bytes {
        hex.push_str(&format!("... ({} bytes)", bytes.len()));
    }

    hex
}

fn print_map(map: &DumpMap, indent: usize, max_bytes: usize) {
    for (key, object) in map {
        match object {
            DumpObject::Data(data) => {
                println!("{:indent$}{key}: {}", "", print_data(data, max_bytes));
            }
            DumpObject::Map(map) => {
                println!("{:indent$}{key}:", "");
                print_map(map, indent + 2, max_bytes);
            }
            DumpObject::List(list) => {
                println!("{:indent$}{key}: [{}]", "", list.len());
                for (i, element) in list.iter().enumerate() {
                    println!("{:width$}[{i}]", "", width = indent + 2);
                    print_map(element, indent + 4, max_bytes);
                }
            }
        }
    }
}

fn print_annotation(annotation: &AnnotationSnapshot, max_bytes: usize) {
    if let Some(s) = annotation.string() {
        println!("  {} = {s:?}", annotation.name);
        return;
    }

    println!(
        "  {} ({:?}) = {}",
        annotation.name,
        annotation.kind,
        print_data(&DumpData::new(annotation.value.clone()), max_bytes)
    );

    // Ring buffers are user defined types, so the only way to find them is to
    // check if the value looks like one
    if let Ok(records) = annotation.ring_buffer_records() {
        for record in records {
            println!("    {}", print_data(&DumpData::new(record), max_bytes));
        }
    }
}

fn real_main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let cmd = Command::parse();

    let source = if cmd.consume {
        DumpSource::ConsumeFile(&cmd.path)
    } else {
        DumpSource::File(&cmd.path)
    };

    let mut reader = IntermediateDumpReader::new();
    match reader.initialize(source) {
        InitializeResult::Success => {}
        InitializeResult::Incomplete => {
            log::warn!(
                "'{}' is incomplete: {}",
                cmd.path.display(),
                reader
                    .error()
                    .map_or_else(|| "unknown error".to_owned(), |e| e.to_string())
            );
        }
        InitializeResult::Failure => {
            let err = reader
                .error()
                .map_or_else(|| "unknown error".to_owned(), |e| e.to_string());
            anyhow::bail!("failed to read '{}': {err}", cmd.path.display());
        }
    }

    let root = reader.root_map().context("dump has no root map")?;

    if !cmd.annotations {
        print_map(root, 0, cmd.max_bytes);
        return Ok(());
    }

    let Some(modules) = root.get_as_list(Key::MODULES) else {
        println!("no modules");
        return Ok(());
    };

    for module in modules {
        let annotations = intermediate_dump::extract_annotations(module);
        if annotations.is_empty() {
            continue;
        }

        let name = module
            .get_as_data(Key::NAME)
            .map_or_else(|| "<unknown>".to_owned(), DumpData::string);
        println!("{name}");

        for annotation in &annotations {
            print_annotation(annotation, cmd.max_bytes);
        }
    }

    Ok(())
}

fn main() {
    if let Err(e) = real_main() {
        eprintln!("error: {:#}", e);
        #[allow(clippy::exit)]
        std::process::exit(1);
    }
}

use crate::{
    Command, Error, Key, PropertyValue, SafeRead,
    format::{CSTRING_MAX_LENGTH, MAX_PROPERTY_SIZE, WRITE_BUFFER_SIZE},
    write_stderr,
};
use std::{fs::File, io::Write, path::Path};

/// The size of a property's header, the command tag, key, and length
const PROPERTY_HEADER_SIZE: usize = 1 + 2 + std::mem::size_of::<usize>();
/// C strings are read at most a page at a time, so that a string that ends
/// right before an unmapped page can still be read
const CSTRING_READ_ALIGNMENT: usize = 4096;
/// The amount of a C string that is scanned for its terminator at a time
const CSTRING_SCAN_SIZE: usize = 64;

/// Serializes a tree of maps, arrays and properties to an output.
///
/// The staging buffer is allocated when the writer is created, after that
/// nothing allocates and stack use is small and bounded, so a writer created
/// ahead of time can be used from a crash handler running on a small
/// alternate signal stack.
///
/// Every command is appended to the output as soon as it is made, so if the
/// process dies partway through a dump, everything written up to that point
/// can still be recovered by [`crate::IntermediateDumpReader`].
///
/// Commands are staged in a fixed size buffer and flushed in whole buffer
/// chunks, the buffer is flushed for the final time by [`Self::close`], or
/// when the writer is dropped.
///
/// None of the commands return errors, a failure to write is reported on
/// stderr and the command returns `false`, but the writer can continue to be
/// used. It is up to the caller to emit a valid structure, eg. that every
/// [`Self::map_start`] is paired with a [`Self::map_end`], the scoped helpers
/// such as [`Self::map`] take care of this automatically.
pub struct IntermediateDumpWriter<W: Write = File> {
    sink: Option<W>,
    buffer: Box<[u8]>,
    occupied: usize,
    /// The number of times the staging buffer has been written to the sink
    flushes: usize,
}

impl IntermediateDumpWriter<File> {
    /// Creates (or truncates) the file at `path` and writes the dump to it.
    ///
    /// This is not meant to be called in a crash handler, the file should
    /// instead be opened ahead of time.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let file = File::create(path)?;
        Ok(Self::new(file))
    }
}

impl<W: Write> IntermediateDumpWriter<W> {
    /// Writes the dump to an already open output
    pub fn new(sink: W) -> Self {
        Self {
            sink: Some(sink),
            buffer: vec![0; WRITE_BUFFER_SIZE].into_boxed_slice(),
            occupied: 0,
            flushes: 0,
        }
    }

    /// Flushes any buffered data and returns the underlying output
    pub fn close(mut self) -> Result<W, Error> {
        let mut sink = self.sink.take().ok_or(Error::Closed)?;
        sink.write_all(&self.buffer[..self.occupied])?;
        sink.flush()?;
        self.occupied = 0;
        Ok(sink)
    }

    /// Writes any buffered data to the output
    pub fn flush(&mut self) -> bool {
        if self.flush_buffer() {
            true
        } else {
            write_stderr("intermediate dump: failed to flush\n");
            false
        }
    }

    #[inline]
    pub fn root_map_start(&mut self) -> bool {
        self.command(&[Command::RootMapStart as u8])
    }

    #[inline]
    pub fn root_map_end(&mut self) -> bool {
        self.command(&[Command::RootMapEnd as u8])
    }

    /// Starts a map stored under `key` in the current map
    #[inline]
    pub fn map_start(&mut self, key: Key) -> bool {
        self.keyed_command(Command::MapStart, key)
    }

    /// Starts an element of the current array, maps within arrays don't
    /// have a key
    #[inline]
    pub fn array_map_start(&mut self) -> bool {
        self.command(&[Command::MapStart as u8])
    }

    /// Ends the current map, regardless of whether it was started with
    /// [`Self::map_start`] or [`Self::array_map_start`]
    #[inline]
    pub fn map_end(&mut self) -> bool {
        self.command(&[Command::MapEnd as u8])
    }

    /// Starts an array stored under `key` in the current map
    #[inline]
    pub fn array_start(&mut self, key: Key) -> bool {
        self.keyed_command(Command::ArrayStart, key)
    }

    #[inline]
    pub fn array_end(&mut self) -> bool {
        self.command(&[Command::ArrayEnd as u8])
    }

    /// Writes the entire dump within `f`
    pub fn root_map<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.root_map_start();
        let res = f(self);
        self.root_map_end();
        res
    }

    /// Writes a map stored under `key` within `f`
    pub fn map<R>(&mut self, key: Key, f: impl FnOnce(&mut Self) -> R) -> R {
        self.map_start(key);
        let res = f(self);
        self.map_end();
        res
    }

    /// Writes an array stored under `key` within `f`, every element must be
    /// written with [`Self::array_map`]
    pub fn array<R>(&mut self, key: Key, f: impl FnOnce(&mut Self) -> R) -> R {
        self.array_start(key);
        let res = f(self);
        self.array_end();
        res
    }

    /// Writes a single element of the current array within `f`
    pub fn array_map<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.array_map_start();
        let res = f(self);
        self.map_end();
        res
    }

    /// Adds a property whose value is `value`
    pub fn add_property_bytes(&mut self, key: Key, value: &[u8]) -> bool {
        if !property_size_valid(value.len()) {
            return false;
        }

        if !self.staged(|w| w.property_header(key, value.len()) && w.write_all(value)) {
            write_stderr("intermediate dump: failed to write property\n");
            return false;
        }

        true
    }

    /// Adds a property whose value is the native byte representation of
    /// `value`
    #[inline]
    pub fn add_property<T: PropertyValue>(&mut self, key: Key, value: T) -> bool {
        self.add_property_bytes(key, value.to_ne_bytes().as_ref())
    }

    /// Adds a property whose value is the UTF-8 bytes of `value`, without a
    /// terminator
    #[inline]
    pub fn add_property_str(&mut self, key: Key, value: &str) -> bool {
        self.add_property_bytes(key, value.as_bytes())
    }

    /// Adds a property whose value is copied from `len` bytes of memory at
    /// `address`.
    ///
    /// The entire range is checked to be readable before anything is
    /// written, if it isn't the property is omitted. If the memory becomes
    /// unreadable while it is being copied, the remainder of the value is
    /// zeroed so that the structure of the dump remains intact.
    pub fn add_property_from<M: SafeRead>(
        &mut self,
        memory: &M,
        key: Key,
        address: usize,
        len: usize,
    ) -> bool {
        if !property_size_valid(len) {
            return false;
        }

        if !memory.probe(address, len) {
            write_stderr("intermediate dump: unable to read property memory\n");
            return false;
        }

        let mut readable = true;

        let written = self.staged(|w| {
            if !w.property_header(key, len) {
                return false;
            }

            let mut copied = 0;

            // Copy directly into the staging buffer rather than going through
            // another buffer on the stack
            while copied < len {
                if w.occupied == WRITE_BUFFER_SIZE && !w.flush_buffer() {
                    return false;
                }

                let count = (len - copied).min(WRITE_BUFFER_SIZE - w.occupied);
                let dst = &mut w.buffer[w.occupied..w.occupied + count];

                if readable && !memory.read(address + copied, dst) {
                    write_stderr("intermediate dump: property memory became unreadable\n");
                    readable = false;
                }

                if !readable {
                    dst.fill(0);
                }

                w.occupied += count;
                copied += count;
            }

            true
        });

        if !written {
            write_stderr("intermediate dump: failed to write property\n");
            return false;
        }

        readable
    }

    /// Adds a property whose value is the NUL terminated string at
    /// `address`, without the terminator.
    ///
    /// At most `max_length` bytes, including the terminator, are read. The
    /// property is omitted if the memory is unreadable before a NUL is found,
    /// or there is no NUL within `max_length` bytes.
    pub fn add_property_cstring<M: SafeRead>(
        &mut self,
        memory: &M,
        key: Key,
        max_length: usize,
        address: usize,
    ) -> bool {
        debug_assert!(
            max_length <= CSTRING_MAX_LENGTH,
            "C string maximum length is too large"
        );

        let mut chunk = [0u8; CSTRING_SCAN_SIZE];
        let max_length = max_length.min(CSTRING_MAX_LENGTH);
        let mut read = 0;

        // Find the terminator a small chunk at a time, then copy the string
        // directly into the staging buffer
        while read < max_length {
            let Some(current) = address.checked_add(read) else {
                break;
            };
            let to_boundary = CSTRING_READ_ALIGNMENT - current % CSTRING_READ_ALIGNMENT;
            let count = to_boundary.min(max_length - read).min(CSTRING_SCAN_SIZE);
            let chunk = &mut chunk[..count];

            if !memory.read(current, chunk) {
                write_stderr("intermediate dump: unable to read C string\n");
                return false;
            }

            if let Some(nul) = chunk.iter().position(|b| *b == 0) {
                return self.add_property_from(memory, key, address, read + nul);
            }

            read += count;
        }

        write_stderr("intermediate dump: C string is not terminated\n");
        false
    }

    #[inline]
    fn command(&mut self, bytes: &[u8]) -> bool {
        if self.staged(|w| w.write_all(bytes)) {
            true
        } else {
            write_stderr("intermediate dump: failed to write command\n");
            false
        }
    }

    #[inline]
    fn keyed_command(&mut self, command: Command, key: Key) -> bool {
        let key = key.raw().to_ne_bytes();
        self.command(&[command as u8, key[0], key[1]])
    }

    fn property_header(&mut self, key: Key, len: usize) -> bool {
        let mut header = [0u8; PROPERTY_HEADER_SIZE];
        header[0] = Command::Property as u8;
        header[1..3].copy_from_slice(&key.raw().to_ne_bytes());
        header[3..].copy_from_slice(&len.to_ne_bytes());
        self.write_all(&header)
    }

    /// Runs `f`, which stages a single command, discarding everything it
    /// staged if it fails so that a later flush never emits part of a command
    fn staged(&mut self, f: impl FnOnce(&mut Self) -> bool) -> bool {
        let (occupied, flushes) = (self.occupied, self.flushes);

        if f(self) {
            return true;
        }

        // If the buffer was flushed, everything still staged belongs to the
        // failed command
        self.occupied = if self.flushes == flushes { occupied } else { 0 };
        false
    }

    /// Appends `bytes` to the output.
    ///
    /// The staging buffer is filled first, and flushed when full. Any whole
    /// buffer sized chunks that remain are then written directly, and the
    /// final partial chunk is staged.
    fn write_all(&mut self, mut bytes: &[u8]) -> bool {
        if self.sink.is_none() {
            return false;
        }

        let count = bytes.len().min(WRITE_BUFFER_SIZE - self.occupied);
        self.buffer[self.occupied..self.occupied + count].copy_from_slice(&bytes[..count]);
        self.occupied += count;
        bytes = &bytes[count..];

        if self.occupied < WRITE_BUFFER_SIZE {
            return true;
        }

        if !self.flush_buffer() {
            return false;
        }

        let direct = bytes.len() - bytes.len() % WRITE_BUFFER_SIZE;
        if direct > 0 {
            let Some(sink) = &mut self.sink else {
                return false;
            };

            if sink.write_all(&bytes[..direct]).is_err() {
                return false;
            }

            bytes = &bytes[direct..];
        }

        self.buffer[..bytes.len()].copy_from_slice(bytes);
        self.occupied = bytes.len();
        true
    }

    fn flush_buffer(&mut self) -> bool {
        let Some(sink) = &mut self.sink else {
            return false;
        };

        if self.occupied == 0 {
            return true;
        }

        if sink.write_all(&self.buffer[..self.occupied]).is_err() {
            return false;
        }

        self.occupied = 0;
        self.flushes += 1;
        true
    }
}

/// Properties larger than [`MAX_PROPERTY_SIZE`] are rejected by the reader,
/// so they are never written
#[inline]
fn property_size_valid(len: usize) -> bool {
    if len > MAX_PROPERTY_SIZE {
        write_stderr("intermediate dump: property is too large\n");
        return false;
    }

    true
}

impl<W: Write> Drop for IntermediateDumpWriter<W> {
    fn drop(&mut self) {
        if self.sink.is_some() && !self.flush_buffer() {
            write_stderr("intermediate dump: failed to flush\n");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ProcessMemory;

    fn written(f: impl FnOnce(&mut IntermediateDumpWriter<Vec<u8>>)) -> Vec<u8> {
        let mut writer = IntermediateDumpWriter::new(Vec::new());
        f(&mut writer);
        writer.close().unwrap()
    }

    fn property(key: Key, value: &[u8]) -> Vec<u8> {
        let mut bytes = vec![Command::Property as u8];
        bytes.extend_from_slice(&key.raw().to_ne_bytes());
        bytes.extend_from_slice(&value.len().to_ne_bytes());
        bytes.extend_from_slice(value);
        bytes
    }

    /// Memory that can never be read
    struct Unreadable;

    impl SafeRead for Unreadable {
        fn read(&self, _address: usize, _buf: &mut [u8]) -> bool {
            false
        }
    }

    /// Memory that can be probed, but fails to read after `after` bytes have
    /// been copied
    struct FailsAfter {
        start: usize,
        after: usize,
    }

    impl SafeRead for FailsAfter {
        fn read(&self, address: usize, buf: &mut [u8]) -> bool {
            if address + buf.len() > self.start + self.after {
                return false;
            }

            ProcessMemory.read(address, buf)
        }

        fn probe(&self, _address: usize, _len: usize) -> bool {
            true
        }
    }

    #[test]
    fn command_encoding() {
        let bytes = written(|w| {
            w.root_map(|w| {
                w.map(Key::PROCESS_INFO, |w| {
                    w.add_property(Key::PID, 7u32);
                });
                w.array(Key::MODULES, |w| {
                    w.array_map(|_w| {});
                });
            });
        });

        let mut expected = vec![Command::RootMapStart as u8, Command::MapStart as u8];
        expected.extend_from_slice(&Key::PROCESS_INFO.raw().to_ne_bytes());
        expected.extend(property(Key::PID, &7u32.to_ne_bytes()));
        expected.push(Command::MapEnd as u8);
        expected.push(Command::ArrayStart as u8);
        expected.extend_from_slice(&Key::MODULES.raw().to_ne_bytes());
        expected.extend([
            Command::MapStart as u8,
            Command::MapEnd as u8,
            Command::ArrayEnd as u8,
            Command::RootMapEnd as u8,
        ]);

        assert_eq!(bytes, expected);
    }

    #[test]
    fn large_properties_span_buffers() {
        for len in [
            WRITE_BUFFER_SIZE - PROPERTY_HEADER_SIZE,
            WRITE_BUFFER_SIZE,
            WRITE_BUFFER_SIZE * 3 + 17,
        ] {
            let value: Vec<u8> = (0..len).map(|i| i as u8).collect();

            let bytes = written(|w| {
                w.add_property_bytes(Key::STACK_REGION_DATA, b"x");
                w.add_property_bytes(Key::STACK_REGION_DATA, &value);
                w.add_property_bytes(Key::STACK_REGION_DATA, b"y");
            });

            let mut expected = property(Key::STACK_REGION_DATA, b"x");
            expected.extend(property(Key::STACK_REGION_DATA, &value));
            expected.extend(property(Key::STACK_REGION_DATA, b"y"));
            assert_eq!(bytes, expected, "{len}");
        }
    }

    #[test]
    fn copies_process_memory() {
        let src: Vec<u8> = (0..WRITE_BUFFER_SIZE * 2).map(|i| (i % 251) as u8).collect();

        let bytes = written(|w| {
            assert!(w.add_property_from(
                &ProcessMemory,
                Key::STACK_REGION_DATA,
                src.as_ptr() as usize,
                src.len()
            ));
        });

        assert_eq!(bytes, property(Key::STACK_REGION_DATA, &src));
    }

    #[test]
    fn omits_unreadable_memory() {
        let bytes = written(|w| {
            w.root_map(|w| {
                assert!(!w.add_property_from(&Unreadable, Key::STACK_REGION_DATA, 0x1000, 16));
                assert!(!w.add_property_cstring(&Unreadable, Key::NAME, 64, 0x1000));
            });
        });

        assert_eq!(
            bytes,
            [Command::RootMapStart as u8, Command::RootMapEnd as u8]
        );
    }

    #[test]
    fn zero_fills_memory_that_becomes_unreadable() {
        let src = [0xffu8; 64];
        let memory = FailsAfter {
            start: src.as_ptr() as usize,
            after: 0,
        };

        let bytes = written(|w| {
            assert!(!w.add_property_from(&memory, Key::STACK_REGION_DATA, memory.start, src.len()));
        });

        assert_eq!(bytes, property(Key::STACK_REGION_DATA, &[0; 64]));
    }

    #[test]
    fn reads_c_strings() {
        let cstr = b"crashed thread\0garbage";

        let bytes = written(|w| {
            assert!(w.add_property_cstring(
                &ProcessMemory,
                Key::THREAD_NAME,
                CSTRING_MAX_LENGTH,
                cstr.as_ptr() as usize,
            ));
        });
        assert_eq!(bytes, property(Key::THREAD_NAME, b"crashed thread"));

        // The terminator must be within the maximum length
        let bytes = written(|w| {
            assert!(!w.add_property_cstring(
                &ProcessMemory,
                Key::THREAD_NAME,
                8,
                cstr.as_ptr() as usize,
            ));
        });
        assert!(bytes.is_empty());
    }

    #[test]
    fn c_string_before_unreadable_memory() {
        // Only the bytes up to the terminator are readable
        let cstr = b"short\0";
        let memory = FailsAfter {
            start: cstr.as_ptr() as usize,
            after: cstr.len(),
        };

        let bytes = written(|w| {
            w.add_property_cstring(&memory, Key::THREAD_NAME, cstr.len(), memory.start);
        });
        assert_eq!(bytes, property(Key::THREAD_NAME, b"short"));
    }

    #[test]
    fn flushes_on_drop() {
        let file = tempfile::NamedTempFile::new().unwrap();

        {
            let mut writer = IntermediateDumpWriter::open(file.path()).unwrap();
            writer.root_map_start();
            writer.add_property(Key::VERSION, 1u8);
            // Intentionally not closed or ended
        }

        let mut expected = vec![Command::RootMapStart as u8];
        expected.extend(property(Key::VERSION, &[1]));
        assert_eq!(std::fs::read(file.path()).unwrap(), expected);
    }

    #[test]
    fn write_failures_are_not_fatal() {
        struct Full;

        impl Write for Full {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::ErrorKind::StorageFull.into())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut writer = IntermediateDumpWriter::new(Full);
        assert!(writer.root_map_start());
        assert!(!writer.add_property_bytes(Key::STACK_REGION_DATA, &[0; WRITE_BUFFER_SIZE]));
        assert!(!writer.flush());
        assert!(writer.close().is_err());
    }

    #[test]
    fn writer_is_small() {
        // The writer lives on the crash handler's stack, which is small
        assert!(std::mem::size_of::<IntermediateDumpWriter>() <= 64);
    }

    #[test]
    fn reads_long_c_strings() {
        let mut cstr: Vec<u8> = (0..300).map(|i| b'a' + (i % 26) as u8).collect();
        cstr.push(0);

        let bytes = written(|w| {
            assert!(w.add_property_cstring(
                &ProcessMemory,
                Key::THREAD_NAME,
                CSTRING_MAX_LENGTH,
                cstr.as_ptr() as usize,
            ));
        });
        assert_eq!(bytes, property(Key::THREAD_NAME, &cstr[..300]));
    }

    #[test]
    fn failed_commands_are_discarded() {
        /// Fails the `fail_on`th write, every other write succeeds
        struct Flaky {
            fail_on: usize,
            writes: usize,
            data: Vec<u8>,
        }

        impl Flaky {
            fn new(fail_on: usize) -> Self {
                Self {
                    fail_on,
                    writes: 0,
                    data: Vec::new(),
                }
            }
        }

        impl Write for Flaky {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.writes += 1;
                if self.writes == self.fail_on {
                    return Err(std::io::Error::other("flaky"));
                }

                self.data.extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut writer = IntermediateDumpWriter::new(Flaky::new(1));

        assert!(writer.root_map_start());
        assert!(!writer.add_property_bytes(Key::STACK_REGION_DATA, &[7; WRITE_BUFFER_SIZE]));
        assert!(writer.add_property(Key::VERSION, 1u8));
        assert!(writer.root_map_end());

        let mut expected = vec![Command::RootMapStart as u8];
        expected.extend(property(Key::VERSION, &[1]));
        expected.push(Command::RootMapEnd as u8);
        assert_eq!(writer.close().unwrap().data, expected);

        // A failure after part of a property has already been flushed
        // discards the rest of it
        let src: Vec<u8> = vec![3; WRITE_BUFFER_SIZE * 2];
        let mut writer = IntermediateDumpWriter::new(Flaky::new(2));
        assert!(writer.add_property(Key::VERSION, 1u8));
        assert!(!writer.add_property_from(
            &ProcessMemory,
            Key::STACK_REGION_DATA,
            src.as_ptr() as usize,
            src.len()
        ));
        assert_eq!(writer.occupied, 0);

        let flaky = writer.close().unwrap();
        assert_eq!(flaky.data.len(), WRITE_BUFFER_SIZE);
        assert_eq!(
            &flaky.data[..PROPERTY_HEADER_SIZE + 1],
            property(Key::VERSION, &[1]).as_slice()
        );
    }

    #[test]
    fn rejects_oversized_properties() {
        /// Memory that reads as all zeroes
        struct Zeroes;

        impl SafeRead for Zeroes {
            fn read(&self, _address: usize, buf: &mut [u8]) -> bool {
                buf.fill(0);
                true
            }
        }

        let bytes = written(|w| {
            w.root_map(|w| {
                assert!(!w.add_property_from(
                    &Zeroes,
                    Key::STACK_REGION_DATA,
                    0x1000,
                    MAX_PROPERTY_SIZE + 1
                ));
            });
        });

        assert_eq!(
            bytes,
            [Command::RootMapStart as u8, Command::RootMapEnd as u8]
        );
    }
}

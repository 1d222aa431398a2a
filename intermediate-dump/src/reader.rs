use crate::{
    Command, DumpData, DumpList, DumpMap, DumpObject, Error, Key, ParseError,
    format::{MAX_DEPTH, MAX_PROPERTY_SIZE},
};
use scroll::Pread;
use std::{borrow::Cow, path::Path};

/// The outcome of [`IntermediateDumpReader::initialize`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InitializeResult {
    /// The entire dump was decoded
    Success,
    /// The dump was only partially decoded, but whatever could be decoded
    /// before the error is available
    Incomplete,
    /// Nothing could be decoded
    Failure,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReaderState {
    Created,
    Initializing,
    /// The root map is available, though it may be incomplete
    Valid,
    Failed,
}

/// Where to read an intermediate dump from
#[derive(Copy, Clone, Debug)]
pub enum DumpSource<'src> {
    Bytes(&'src [u8]),
    File(&'src Path),
    /// Reads the file then removes it, so that the same dump is never
    /// processed more than once, even if processing it crashes
    ConsumeFile(&'src Path),
}

impl<'src> DumpSource<'src> {
    fn load(self) -> Result<Cow<'src, [u8]>, Error> {
        let bytes = match self {
            Self::Bytes(bytes) => Cow::Borrowed(bytes),
            Self::File(path) => Cow::Owned(std::fs::read(path)?),
            Self::ConsumeFile(path) => {
                let read = std::fs::read(path);

                if let Err(err) = std::fs::remove_file(path) {
                    if read.is_ok() {
                        log::warn!("failed to remove '{}': {err}", path.display());
                    }
                }

                Cow::Owned(read?)
            }
        };

        if bytes.is_empty() {
            return Err(Error::Empty);
        }

        Ok(bytes)
    }
}

/// Decodes an intermediate dump written by [`crate::IntermediateDumpWriter`].
///
/// Dumps are written by a process in an unknown state, and may be cut short
/// at any point, so the reader always keeps as much of the tree as it was
/// able to decode before encountering a problem.
pub struct IntermediateDumpReader {
    state: ReaderState,
    root: Option<DumpMap>,
    error: Option<Error>,
}

impl IntermediateDumpReader {
    pub fn new() -> Self {
        Self {
            state: ReaderState::Created,
            root: None,
            error: None,
        }
    }

    /// Decodes the dump from `source`.
    ///
    /// If the dump is empty or cannot be read at all, [`InitializeResult::Failure`]
    /// is returned and there is no root map. If only part of the dump could
    /// be decoded, [`InitializeResult::Incomplete`] is returned, and the root
    /// map contains everything decoded up to that point.
    pub fn initialize(&mut self, source: DumpSource<'_>) -> InitializeResult {
        debug_assert_eq!(
            self.state,
            ReaderState::Created,
            "intermediate dump reader was already initialized"
        );

        self.state = ReaderState::Initializing;
        self.root = None;
        self.error = None;

        let bytes = match source.load() {
            Ok(bytes) => bytes,
            Err(err) => {
                log::error!("unable to read intermediate dump: {err}");
                self.error = Some(err);
                self.state = ReaderState::Failed;
                return InitializeResult::Failure;
            }
        };

        let (root, res) = parse(&bytes);
        self.root = Some(root);
        self.state = ReaderState::Valid;

        match res {
            Ok(()) => InitializeResult::Success,
            Err(err) => {
                log::warn!("intermediate dump is incomplete: {err}");
                self.error = Some(err.into());
                InitializeResult::Incomplete
            }
        }
    }

    #[inline]
    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// The decoded root map, only available once the reader is valid
    #[inline]
    pub fn root_map(&self) -> Option<&DumpMap> {
        self.root.as_ref()
    }

    #[inline]
    pub fn into_root_map(self) -> Option<DumpMap> {
        self.root
    }

    /// The error that stopped the dump from being fully decoded
    #[inline]
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }
}

impl Default for IntermediateDumpReader {
    fn default() -> Self {
        Self::new()
    }
}

enum Frame {
    /// Maps within an array, and the root map, have no key
    Map { key: Option<Key>, map: DumpMap },
    List { key: Key, list: DumpList },
}

impl Frame {
    fn kind(&self) -> &'static str {
        match self {
            Self::Map { key: None, .. } => "array map",
            Self::Map { .. } => "map",
            Self::List { .. } => "list",
        }
    }

    fn attach(&mut self, child: Frame) {
        match (self, child) {
            (Self::Map { map, .. }, Self::Map { key: Some(key), map: child }) => {
                map.insert(key, DumpObject::Map(child));
            }
            (Self::Map { map, .. }, Self::List { key, list }) => {
                map.insert(key, DumpObject::List(list));
            }
            (Self::List { list, .. }, Self::Map { key: None, map }) => {
                list.push(map);
            }
            (parent, child) => {
                log::error!("unable to attach a {} to a {}", child.kind(), parent.kind());
            }
        }
    }
}

struct Parser<'b> {
    bytes: &'b [u8],
    offset: usize,
    stack: Vec<Frame>,
}

/// Decodes `bytes`, returning the root map even if an error was encountered
fn parse(bytes: &[u8]) -> (DumpMap, Result<(), ParseError>) {
    let mut parser = Parser {
        bytes,
        offset: 0,
        stack: Vec::with_capacity(MAX_DEPTH + 1),
    };

    let res = parser.run();
    (parser.unwind(), res)
}

impl Parser<'_> {
    fn run(&mut self) -> Result<(), ParseError> {
        if self.command()? != Command::RootMapStart {
            return Err(ParseError::MissingRootMap);
        }

        self.stack.push(Frame::Map {
            key: None,
            map: DumpMap::new(),
        });

        loop {
            if self.stack.len() > MAX_DEPTH {
                return Err(ParseError::TooDeep(MAX_DEPTH));
            }

            if self.offset == self.bytes.len() {
                return Err(ParseError::UnclosedContainers(self.stack.len()));
            }

            let command = self.command()?;
            let depth = self.stack.len();
            let (in_map, parent) = match self.stack.last() {
                Some(frame) if depth == 1 => (matches!(frame, Frame::Map { .. }), "root map"),
                Some(frame) => (matches!(frame, Frame::Map { .. }), frame.kind()),
                None => return Err(ParseError::MissingRootMap),
            };

            match (command, in_map) {
                (Command::MapStart, true) => {
                    let key = self.key()?;
                    self.stack.push(Frame::Map {
                        key: Some(key),
                        map: DumpMap::new(),
                    });
                }
                (Command::MapStart, false) => {
                    self.stack.push(Frame::Map {
                        key: None,
                        map: DumpMap::new(),
                    });
                }
                (Command::ArrayStart, true) => {
                    let key = self.key()?;
                    self.stack.push(Frame::List {
                        key,
                        list: DumpList::new(),
                    });
                }
                (Command::Property, true) => {
                    let (key, value) = self.property()?;
                    if let Some(Frame::Map { map, .. }) = self.stack.last_mut() {
                        map.insert(key, DumpObject::Data(DumpData::new(value)));
                    }
                }
                // The root map can only be ended by RootMapEnd
                (Command::MapEnd, true) if depth > 1 => {
                    self.pop();
                }
                (Command::ArrayEnd, false) => {
                    self.pop();
                }
                (Command::RootMapEnd, true) if depth == 1 => {
                    let remaining = self.bytes.len() - self.offset;
                    if remaining != 0 {
                        return Err(ParseError::TrailingData(remaining));
                    }

                    return Ok(());
                }
                _ => return Err(ParseError::UnexpectedCommand { command, parent }),
            }
        }
    }

    /// Pops the top frame and attaches it to its parent
    fn pop(&mut self) {
        if self.stack.len() < 2 {
            return;
        }

        if let Some(child) = self.stack.pop() {
            if let Some(parent) = self.stack.last_mut() {
                parent.attach(child);
            }
        }
    }

    /// Attaches every open frame to its parent, returning the root map
    fn unwind(mut self) -> DumpMap {
        while self.stack.len() > 1 {
            self.pop();
        }

        match self.stack.pop() {
            Some(Frame::Map { map, .. }) => map,
            _ => DumpMap::new(),
        }
    }

    fn command(&mut self) -> Result<Command, ParseError> {
        let tag: u8 = self.read()?;
        Command::from_u8(tag).ok_or(ParseError::UnknownCommand(tag))
    }

    fn key(&mut self) -> Result<Key, ParseError> {
        let raw: u16 = self.read()?;
        if raw == Key::INVALID.raw() {
            return Err(ParseError::InvalidKey);
        }
        Ok(Key::from_raw(raw))
    }

    fn property(&mut self) -> Result<(Key, Vec<u8>), ParseError> {
        let key = self.key()?;

        let length: u64 = if cfg!(target_pointer_width = "64") {
            self.read::<u64>()?
        } else {
            u64::from(self.read::<u32>()?)
        };

        if length > MAX_PROPERTY_SIZE as u64 {
            return Err(ParseError::PropertyTooLarge { key, length });
        }

        let length = length as usize;
        let value = self
            .bytes
            .get(self.offset..self.offset + length)
            .ok_or(ParseError::Truncated)?;
        self.offset += length;

        Ok((key, value.to_vec()))
    }

    #[inline]
    fn read<T>(&mut self) -> Result<T, ParseError>
    where
        T: for<'a> scroll::ctx::TryFromCtx<'a, scroll::Endian, Error = scroll::Error>,
    {
        self.bytes
            .gread_with(&mut self.offset, scroll::NATIVE)
            .or(Err(ParseError::Truncated))
    }
}

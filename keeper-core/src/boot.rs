//! Boot-loader inputs: the device map and the stream fed to the loader's stdin.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::CoreError;

/// What the boot loader reads on its standard input.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BootInput {
    /// Nothing; stdin is closed.
    #[default]
    Empty,
    /// The caller's own stdin, for interactive boot menus.
    Inherit,
    /// A fixed byte string written in one go.
    Literal(Vec<u8>),
    /// Keystrokes typed one line at a time while the loader runs.
    Scripted(ScriptedInput),
}

impl BootInput {
    /// Interprets the `grub:in` property.
    ///
    /// `-` selects the caller's stdin and a value starting with `"` is
    /// unescaped with [`unquote`]. Any other value, or no value, means empty
    /// input.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidBootInput`] if a quoted literal is malformed.
    pub fn from_property(value: Option<&str>) -> Result<Self, CoreError> {
        match value {
            Some("-") => Ok(Self::Inherit),
            Some(v) if v.starts_with('"') => unquote(v).map(Self::Literal),
            _ => Ok(Self::Empty),
        }
    }
}

/// Boot keystrokes delivered at a fixed pace.
///
/// The writer waits `delay` before the first line, then sends one line per
/// `interval`. Each line is newline-terminated on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedInput {
    /// Lines to type, in order.
    pub lines: Vec<String>,
    /// Pause before the first line.
    pub delay: Duration,
    /// Pause between consecutive lines.
    pub interval: Duration,
}

impl ScriptedInput {
    /// Default pause before the first line and between lines.
    pub const DEFAULT_PACE: Duration = Duration::from_secs(1);

    /// Creates a script with the default one-second pacing.
    #[must_use]
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines, delay: Self::DEFAULT_PACE, interval: Self::DEFAULT_PACE }
    }

    /// Sets the pause before the first line.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sets the pause between lines.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Wire form of line `index`, always ending in `\n`.
    #[must_use]
    pub fn line_bytes(&self, index: usize) -> Option<Vec<u8>> {
        self.lines.get(index).map(|line| {
            let mut bytes = line.as_bytes().to_vec();
            if !line.ends_with('\n') {
                bytes.push(b'\n');
            }
            bytes
        })
    }
}

/// Disk aliases handed to the boot loader.
///
/// `hd0` is always the VM's volume; `cd0` is present when an ISO is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMap {
    entries: Vec<(String, PathBuf)>,
}

impl DeviceMap {
    /// Creates a map binding `hd0` to `disk`.
    #[must_use]
    pub fn new(disk: impl Into<PathBuf>) -> Self {
        Self { entries: vec![("hd0".to_owned(), disk.into())] }
    }

    /// Binds `cd0` to `iso`.
    #[must_use]
    pub fn with_cdrom(mut self, iso: impl Into<PathBuf>) -> Self {
        self.entries.push(("cd0".to_owned(), iso.into()));
        self
    }

    /// Iterates over `(alias, path)` pairs.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.entries.iter().map(|(a, p)| (a.as_str(), p.as_path()))
    }

    /// Renders the map in the loader's `device.map` format.
    #[must_use]
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(alias, path)| format!("({alias}) {}\n", path.display()))
            .collect()
    }
}

/// Unescapes a double-quoted literal.
///
/// Accepts the escapes `\a \b \f \n \r \t \v \\ \"`, `\xHH`, three-digit octal
/// `\ooo`, `\uHHHH` and `\UHHHHHHHH`. `\x` and octal escapes yield raw bytes,
/// so the result need not be UTF-8.
///
/// # Errors
/// Returns [`CoreError::InvalidBootInput`] when the quotes are missing, the
/// body contains a bare `"` or newline, or an escape is malformed.
pub fn unquote(literal: &str) -> Result<Vec<u8>, CoreError> {
    let fail = |reason: &str| CoreError::InvalidBootInput {
        literal: literal.to_owned(),
        reason: reason.to_owned(),
    };

    let body = literal
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .ok_or_else(|| fail("not enclosed in double quotes"))?;

    let mut out = Vec::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Err(fail("unescaped '\"' inside literal")),
            '\n' => return Err(fail("newline inside literal")),
            '\\' => {
                let esc = chars.next().ok_or_else(|| fail("dangling '\\'"))?;
                match esc {
                    'a' => out.push(0x07),
                    'b' => out.push(0x08),
                    'f' => out.push(0x0c),
                    'n' => out.push(b'\n'),
                    'r' => out.push(b'\r'),
                    't' => out.push(b'\t'),
                    'v' => out.push(0x0b),
                    '\\' => out.push(b'\\'),
                    '"' => out.push(b'"'),
                    'x' => {
                        let value = take_digits(&mut chars, 2, 16)
                            .ok_or_else(|| fail("bad \\x escape"))?;
                        out.push(u8::try_from(value).map_err(|_| fail("bad \\x escape"))?);
                    }
                    '0'..='7' => {
                        let rest = take_digits(&mut chars, 2, 8)
                            .ok_or_else(|| fail("bad octal escape"))?;
                        let value = esc.to_digit(8).unwrap_or(0) * 64 + rest;
                        let byte =
                            u8::try_from(value).map_err(|_| fail("octal escape out of range"))?;
                        out.push(byte);
                    }
                    'u' | 'U' => {
                        let width = if esc == 'u' { 4 } else { 8 };
                        let value = take_digits(&mut chars, width, 16)
                            .ok_or_else(|| fail("bad unicode escape"))?;
                        let ch = char::from_u32(value).ok_or_else(|| fail("invalid code point"))?;
                        let mut buf = [0u8; 4];
                        out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                    }
                    _ => return Err(fail("unknown escape")),
                }
            }
            _ => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    Ok(out)
}

fn take_digits(chars: &mut std::str::Chars<'_>, count: usize, radix: u32) -> Option<u32> {
    let mut value: u32 = 0;
    for _ in 0..count {
        let digit = chars.next()?.to_digit(radix)?;
        value = value * radix + digit;
    }
    Some(value)
}

//! RTS flag parsing
//!
//! Runtime options can ride along on the program's own command line:
//!
//! ```text
//! prog input.txt +RTS -K32k -N8 -RTS --verbose
//! ```
//!
//! Everything between `+RTS` and `-RTS` (or the end of argv) is an RTS flag.
//! `--RTS` ends flag processing; every argument after it belongs to the program,
//! even `+RTS`.

use crate::{ConfigError, ConfigResult};

/// A single parsed RTS flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtsFlag {
    /// `-k<n>`: default evaluation budget
    StackSize(usize),
    /// `-K<n>`: ceiling for explicit budgets
    MaxStackSize(usize),
    /// `-N<n>`: maximum managed threads running at once
    MaxWorkers(usize),
}

/// Command line split into program arguments and RTS flags
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RtsArgs {
    /// Arguments the managed program sees, program name first
    pub program_args: Vec<String>,
    /// Flags found between `+RTS` and `-RTS`
    pub flags: Vec<RtsFlag>,
}

/// Separate RTS flags from program arguments
///
/// The first argument is the program name and is never treated as a flag.
pub fn split_rts_args<I, S>(args: I) -> ConfigResult<RtsArgs>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut out = RtsArgs::default();
    let mut iter = args.into_iter().map(Into::into);

    if let Some(prog_name) = iter.next() {
        out.program_args.push(prog_name);
    }

    let mut in_rts = false;
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "+RTS" => in_rts = true,
            "-RTS" => in_rts = false,
            "--RTS" => {
                out.program_args.extend(iter.by_ref());
                break;
            }
            _ if in_rts => out.flags.push(parse_flag(&arg)?),
            _ => out.program_args.push(arg),
        }
    }

    Ok(out)
}

/// Parse whitespace-separated flags, as found in `SLOTH_RTS`
pub fn parse_flag_string(flags: &str) -> ConfigResult<Vec<RtsFlag>> {
    flags.split_whitespace().map(parse_flag).collect()
}

/// Parse one RTS flag such as `-K64k`
pub fn parse_flag(flag: &str) -> ConfigResult<RtsFlag> {
    let Some(body) = flag.strip_prefix('-') else {
        return Err(ConfigError::UnknownFlag(flag.to_string()));
    };

    let mut chars = body.chars();
    let (letter, value) = match chars.next() {
        Some(c) => (c, chars.as_str()),
        None => return Err(ConfigError::UnknownFlag(flag.to_string())),
    };

    match letter {
        'k' => Ok(RtsFlag::StackSize(parse_size(flag, value)?)),
        'K' => Ok(RtsFlag::MaxStackSize(parse_size(flag, value)?)),
        'N' => Ok(RtsFlag::MaxWorkers(parse_size(flag, value)?)),
        _ => Err(ConfigError::UnknownFlag(flag.to_string())),
    }
}

/// Parse a count with an optional `k`/`m` multiplier (powers of 1024)
fn parse_size(flag: &str, value: &str) -> ConfigResult<usize> {
    let malformed = || ConfigError::MalformedSize {
        flag: flag.to_string(),
        value: value.to_string(),
    };

    let (digits, multiplier) = match value.char_indices().last() {
        Some((i, 'k' | 'K')) => (&value[..i], 1024),
        Some((i, 'm' | 'M')) => (&value[..i], 1024 * 1024),
        Some(_) => (value, 1),
        None => return Err(malformed()),
    };

    let n: usize = digits.parse().map_err(|_| malformed())?;
    match n.checked_mul(multiplier) {
        Some(0) | None => Err(malformed()),
        Some(size) => Ok(size),
    }
}

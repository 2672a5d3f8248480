use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use crate::{read_i32, write_i32, Result, Seq2SeqError};

/// Sizes shared by the encoder and decoder checkpoints.
///
/// Stored as the leading i32 header of `encoder.bin` and `decoder.bin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub vocab_size: usize,
    pub hidden_size: usize,
}

impl Config {
    pub fn new(vocab_size: usize, hidden_size: usize) -> Self {
        Self {
            vocab_size,
            hidden_size,
        }
    }

    pub fn from_reader<R: Read>(r: &mut R) -> Result<Self> {
        let vocab_size = read_dim(r, "vocab_size")?;
        let hidden_size = read_dim(r, "hidden_size")?;
        Ok(Self {
            vocab_size,
            hidden_size,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        write_i32(w, to_i32(self.vocab_size, "vocab_size")?)?;
        write_i32(w, to_i32(self.hidden_size, "hidden_size")?)
    }
}

fn read_dim<R: Read>(r: &mut R, name: &str) -> Result<usize> {
    let v = read_i32(r)?;
    if v <= 0 {
        return Err(Seq2SeqError::Checkpoint(format!(
            "{name} must be positive, got {v}"
        )));
    }
    Ok(v as usize)
}

fn to_i32(v: usize, name: &str) -> Result<i32> {
    i32::try_from(v)
        .map_err(|_| Seq2SeqError::Checkpoint(format!("{name} {v} does not fit in an i32")))
}

/// Which decoder a checkpoint holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderKind {
    Plain = 0,
    Attention = 1,
}

impl DecoderKind {
    pub fn from_reader<R: Read>(r: &mut R) -> Result<Self> {
        match read_i32(r)? {
            0 => Ok(Self::Plain),
            1 => Ok(Self::Attention),
            other => Err(Seq2SeqError::Checkpoint(format!(
                "unknown decoder kind {other}"
            ))),
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        write_i32(w, *self as i32)
    }
}

impl fmt::Display for DecoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => write!(f, "plain"),
            Self::Attention => write!(f, "attention"),
        }
    }
}

impl FromStr for DecoderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "plain" | "rnn" => Ok(Self::Plain),
            "attention" => Ok(Self::Attention),
            _ => Err(format!("expected `plain` or `attention`, got `{s}`")),
        }
    }
}

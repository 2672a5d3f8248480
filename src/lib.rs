use std::io::{self, Read, Write};

pub mod attention;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod gru;
pub mod kernel;
pub mod model;
pub mod sampler;
pub mod tensor;
pub mod tokenizer;
pub mod weights;

mod error;

pub use decoder::{Decoder, DecoderStep};
pub use encoder::Encoder;
pub use error::Result;
pub use error::Seq2SeqError;
pub use model::{AttentionMap, Seq2Seq};
pub use sampler::Sampler;
pub use tensor::{Tensor, TokenBatch};
pub use tokenizer::Vocab;

pub(crate) fn read_i32<R: Read>(r: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

pub(crate) fn write_i32<W: Write>(w: &mut W, v: i32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// Reads `num` little-endian floats, allocating only as much as the reader yields.
pub(crate) fn read_tensor<R: Read>(r: &mut R, num: usize) -> Result<Vec<f32>> {
    let bytes_to_read = num
        .checked_mul(std::mem::size_of::<f32>())
        .ok_or_else(|| {
            Seq2SeqError::Checkpoint(format!("tensor of {num} floats is too large"))
        })?;
    let mut raw_tensor = Vec::new();
    r.take(bytes_to_read as u64).read_to_end(&mut raw_tensor)?;
    if raw_tensor.len() != bytes_to_read {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }
    Ok(raw_tensor
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

pub(crate) fn write_tensor<W: Write>(w: &mut W, data: &[f32]) -> Result<()> {
    let raw_tensor = data
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect::<Vec<u8>>();
    w.write_all(&raw_tensor)?;
    Ok(())
}

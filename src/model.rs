use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::config::{Config, DecoderKind};
use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::sampler::Sampler;
use crate::tensor::{Float, TokenBatch};
use crate::tokenizer::Vocab;
use crate::{Result, Seq2SeqError};

pub const ENCODER_FILE: &str = "encoder.bin";
pub const DECODER_FILE: &str = "decoder.bin";
pub const IDX_DICT_FILE: &str = "idx_dict.json";

/// Upper bound on characters generated for one word.
pub const MAX_GENERATED_CHARS: usize = 20;

/// Attention weights of one decoded word, `(output_len, input_len)`.
///
/// Row `i` is the distribution the decoder used when emitting output token
/// `i`; the last row belongs to the end token when decoding finished on it.
#[derive(Debug, Clone, PartialEq)]
pub struct AttentionMap {
    pub input_labels: Vec<String>,
    pub output_labels: Vec<String>,
    pub weights: Vec<Vec<Float>>,
}

impl AttentionMap {
    /// (output_len, input_len)
    pub fn shape(&self) -> (usize, usize) {
        (self.output_labels.len(), self.input_labels.len())
    }
}

struct Decoded {
    /// sampled tokens, including the end token if one was produced
    tokens: Vec<usize>,
    /// one row per step, empty for the plain decoder
    attention: Vec<Vec<Float>>,
}

/// Encoder, decoder and vocabulary of a trained translator.
#[derive(Debug, Clone)]
pub struct Seq2Seq {
    pub encoder: Encoder,
    pub decoder: Decoder,
    pub vocab: Vocab,
    max_generated_chars: usize,
}

impl Seq2Seq {
    pub fn new(encoder: Encoder, decoder: Decoder, vocab: Vocab) -> Result<Self> {
        let (enc, dec) = (encoder.config(), decoder.config());
        if enc != dec {
            return Err(Seq2SeqError::Checkpoint(format!(
                "encoder {enc:?} does not match decoder {dec:?}"
            )));
        }
        if vocab.vocab_size() != enc.vocab_size {
            return Err(Seq2SeqError::Checkpoint(format!(
                "idx_dict holds {} tokens but the model expects {}",
                vocab.vocab_size(),
                enc.vocab_size
            )));
        }
        Ok(Self {
            encoder,
            decoder,
            vocab,
            max_generated_chars: MAX_GENERATED_CHARS,
        })
    }

    /// Untrained model with uniformly initialised parameters.
    pub fn random(
        vocab: Vocab,
        hidden_size: usize,
        kind: DecoderKind,
        seed: u64,
    ) -> Result<Self> {
        if hidden_size == 0 {
            return Err(Seq2SeqError::ShapeMismatch {
                op: "Seq2Seq::random",
                expected: vec![1],
                actual: vec![hidden_size],
            });
        }
        let config = Config::new(vocab.vocab_size(), hidden_size);
        let mut rng = SmallRng::seed_from_u64(seed);
        Ok(Self {
            encoder: Encoder::random(&config, &mut rng),
            decoder: Decoder::random(kind, &config, &mut rng),
            vocab,
            max_generated_chars: MAX_GENERATED_CHARS,
        })
    }

    pub fn with_max_generated_chars(mut self, max_generated_chars: usize) -> Self {
        self.max_generated_chars = max_generated_chars;
        self
    }

    pub fn config(&self) -> Config {
        self.encoder.config()
    }

    /// Reads `encoder.bin`, `decoder.bin` and `idx_dict.json` from `dir`.
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        tracing::info!("loading checkpoint from {}", dir.display());

        let mut file = BufReader::new(File::open(dir.join(ENCODER_FILE))?);
        let encoder = Encoder::from_reader(&mut file)?;

        let mut file = BufReader::new(File::open(dir.join(DECODER_FILE))?);
        let decoder = Decoder::from_reader(&mut file)?;

        let vocab = Vocab::load(dir.join(IDX_DICT_FILE))?;

        let model = Self::new(encoder, decoder, vocab)?;
        tracing::info!(
            vocab_size = model.config().vocab_size,
            hidden_size = model.config().hidden_size,
            decoder = %model.decoder.kind(),
            "checkpoint loaded"
        );
        Ok(model)
    }

    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let mut file = BufWriter::new(File::create(dir.join(ENCODER_FILE))?);
        self.encoder.write_to(&mut file)?;
        file.flush()?;

        let mut file = BufWriter::new(File::create(dir.join(DECODER_FILE))?);
        self.decoder.write_to(&mut file)?;
        file.flush()?;

        self.vocab.save(dir.join(IDX_DICT_FILE))?;
        tracing::debug!("checkpoint written to {}", dir.display());
        Ok(())
    }

    /// Translates every whitespace-separated word and joins the results with
    /// single spaces.
    pub fn translate(&self, sentence: &str, sampler: &mut Sampler) -> Result<String> {
        let words = sentence
            .split_whitespace()
            .map(|word| self.translate_word(word, sampler))
            .collect::<Result<Vec<_>>>()?;
        Ok(words.join(" "))
    }

    pub fn translate_word(&self, word: &str, sampler: &mut Sampler) -> Result<String> {
        let decoded = self.decode(word, sampler)?;
        Ok(self.vocab.decode(&decoded.tokens))
    }

    /// Greedy decode of `word`, keeping the attention weights of every step.
    pub fn attention_map(&self, word: &str) -> Result<AttentionMap> {
        if self.decoder.kind() != DecoderKind::Attention {
            return Err(Seq2SeqError::Unsupported(
                "attention maps need an attention decoder",
            ));
        }
        let input = self.vocab.encode_word(word)?;
        let decoded = self.decode(word, &mut Sampler::greedy())?;

        let labels = |ids: &[usize]| {
            ids.iter()
                .map(|&i| self.vocab.label(i).unwrap_or_else(|| i.to_string()))
                .collect::<Vec<_>>()
        };
        Ok(AttentionMap {
            input_labels: labels(&input),
            output_labels: labels(&decoded.tokens),
            weights: decoded.attention,
        })
    }

    fn decode(&self, word: &str, sampler: &mut Sampler) -> Result<Decoded> {
        let input = self.vocab.encode_word(word)?;
        let (annotations, mut hidden) = self.encoder.encode(&TokenBatch::single(&input))?;

        let end_token = self.vocab.end_token();
        let mut token = self.vocab.start_token();
        let mut decoded = Decoded {
            tokens: Vec::new(),
            attention: Vec::new(),
        };
        for _ in 0..self.max_generated_chars {
            let step = self.decoder.step(&[token], &hidden, &annotations)?;
            if let Some(weights) = step.attention {
                decoded.attention.push(weights.into_vec());
            }
            hidden = step.hidden;

            token = sampler.sample(&step.logits[0]);
            decoded.tokens.push(token);
            if token == end_token {
                return Ok(decoded);
            }
        }
        tracing::debug!(
            word,
            max_generated_chars = self.max_generated_chars,
            "stopped without an end token"
        );
        Ok(decoded)
    }
}

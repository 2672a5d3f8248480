use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use seq2seq::config::DecoderKind;
use seq2seq::Sampler;
use seq2seq::Seq2Seq;
use seq2seq::Vocab;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Checkpoint directory with encoder.bin, decoder.bin and idx_dict.json
    #[arg(short, long)]
    load: Option<PathBuf>,

    /// Seed for an untrained model, used when no checkpoint is given
    #[arg(long, default_value_t = 0)]
    init_seed: u64,

    /// Hidden size of an untrained model
    #[arg(long, default_value_t = 10)]
    hidden_size: usize,

    /// `attention` or `plain`, for an untrained model
    #[arg(short, long, default_value = "attention")]
    decoder: DecoderKind,

    /// Write the model to this directory before translating
    #[arg(long)]
    save: Option<PathBuf>,

    /// Maximum characters generated per word
    #[arg(short, long, default_value_t = 20)]
    max_len: usize,

    /// [0, inf)
    #[arg(short = 'T', long, default_value_t = 0.0, value_parser = parse_temperature)]
    temperature: f32,

    #[arg(short, long)]
    seed: Option<u64>,

    /// Words to translate
    #[arg(default_value = "the air conditioning is working")]
    sentence: Vec<String>,
}

fn parse_temperature(s: &str) -> Result<f32, String> {
    let temperature = s.parse::<f32>().map_err(|e| e.to_string())?;
    if !(temperature >= 0.0) || !temperature.is_finite() {
        return Err(format!("temperature must be finite and non-negative, got {s}"));
    }
    Ok(temperature)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("seq2seq=info".parse()?))
        .init();

    let args = Args::parse();
    let sentence = args.sentence.join(" ");

    let model = match &args.load {
        Some(dir) => Seq2Seq::load(dir)?,
        None => {
            tracing::warn!("no checkpoint given, translating with an untrained model");
            let vocab = Vocab::from_words(
                std::iter::once("abcdefghijklmnopqrstuvwxyz-").chain(sentence.split_whitespace()),
            );
            Seq2Seq::random(vocab, args.hidden_size, args.decoder, args.init_seed)?
        }
    }
    .with_max_generated_chars(args.max_len);

    if let Some(dir) = &args.save {
        model.save(dir)?;
        tracing::info!("model saved to {}", dir.display());
    }

    let mut sampler = match args.seed {
        Some(seed) => Sampler::with_seed(args.temperature, seed),
        None => Sampler::new(args.temperature),
    };

    let translated = model.translate(&sentence, &mut sampler)?;
    println!("source:\t\t{sentence}");
    println!("translated:\t{translated}");

    Ok(())
}

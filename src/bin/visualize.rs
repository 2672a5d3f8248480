use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use image::{ImageBuffer, Luma};
use tracing_subscriber::EnvFilter;

use seq2seq::{AttentionMap, Sampler, Seq2Seq};

const WORDS: &[&str] = &[
    "well-defined",
    "a-b",
    "b-c",
    "ef-gh",
    "ba-ce",
    "well-mannered",
    "ten-year-old",
    "a-writeup",
    "sugar-free",
    "power-driven",
    "user-generated",
];

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Checkpoint directory with encoder.bin, decoder.bin and idx_dict.json
    #[arg(short, long)]
    load: PathBuf,

    /// Where to write the heatmaps, defaults to the checkpoint directory
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Side of one heatmap cell in pixels
    #[arg(long, default_value_t = 24)]
    cell_size: u32,

    /// Words to visualise, defaults to a list of hyphenated words
    words: Vec<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("seq2seq=info".parse()?))
        .init();

    let args = Args::parse();

    let model = Seq2Seq::load(&args.load)?;
    let out = args.out.as_deref().unwrap_or(args.load.as_path());
    std::fs::create_dir_all(out)?;

    let words = if args.words.is_empty() {
        WORDS.iter().map(|w| w.to_string()).collect()
    } else {
        args.words
    };

    for word in &words {
        let translated = model.translate(word, &mut Sampler::greedy())?;
        println!("{word} --> {translated}");

        let map = model.attention_map(word)?;
        print_map(&map);
        save_heatmap(&map, args.cell_size, &out.join(format!("{word}.png")))?;
    }

    Ok(())
}

fn print_map(map: &AttentionMap) {
    print!("{:>5}", "");
    for label in &map.input_labels {
        print!("{label:>5}");
    }
    println!();
    for (label, row) in map.output_labels.iter().zip(&map.weights) {
        print!("{label:>5}");
        for w in row {
            print!("{w:>5.2}");
        }
        println!();
    }
}

/// Rows are output tokens, columns input tokens; brighter means more weight.
fn save_heatmap(map: &AttentionMap, cell_size: u32, path: &Path) -> Result<()> {
    let (rows, cols) = map.shape();
    let cell_size = cell_size.max(1);
    let image: ImageBuffer<Luma<u8>, Vec<u8>> = ImageBuffer::from_fn(
        cols as u32 * cell_size,
        rows as u32 * cell_size,
        |x, y| {
            let w = map.weights[(y / cell_size) as usize][(x / cell_size) as usize];
            Luma([(w.clamp(0.0, 1.0) * u8::MAX as f32).round() as u8])
        },
    );
    image.save(path)?;
    tracing::info!("saved attention map to {}", path.display());
    Ok(())
}

//! Scores a few sentence pairs with `bert-base-uncased`.
//!
//! Run with: cargo run --example score_pairs
//! Set `RUST_LOG=bertscore=debug` for loading details.

use bertscore::{BERTScorerBuilder, EmptySentencePolicy};
use tch::Device;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let references = [
        "The cat sat on the mat.",
        "A dog ran in the park.",
        "hello world",
        "oh hi",
    ];
    let candidates = [
        "The cat was sitting on the mat.",
        "A dog was running in the park.",
        "Hellow words",
        "oh hello",
    ];

    let scorer = BERTScorerBuilder::new()
        .device(Device::cuda_if_available())
        .batch_size(2)
        .empty_policy(EmptySentencePolicy::Zero)
        .build()?;

    let results = scorer.score_triples(&references, &candidates)?;

    for ((reference, candidate), result) in references.iter().zip(&candidates).zip(&results) {
        println!(
            "P={:.4} R={:.4} F1={:.4}  {:?} | {:?}",
            result.precision, result.recall, result.f1, candidate, reference
        );
    }

    Ok(())
}

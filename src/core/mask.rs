//! Content and weight masks over padded token batches.

use crate::core::{idf::IdfTable, tokenizer::SpecialTokenIds};
use crate::Result;
use tch::{Kind, Tensor};

/// Builds the content mask for a padded batch of token ids.
///
/// The result is a float tensor with the shape of `input_ids` holding `1.0`
/// exactly where the attention mask is set and the token is neither the
/// begin nor the end marker. Padding is dropped through the attention mask,
/// so the pad id itself does not need to be known here.
pub fn content_mask(
    input_ids: &Tensor,
    attention_mask: &Tensor,
    special: &SpecialTokenIds,
) -> Tensor {
    let markers = input_ids
        .eq(special.begin_id)
        .logical_or(&input_ids.eq(special.end_id));
    attention_mask
        .ne(0)
        .logical_and(&markers.logical_not())
        .to_kind(Kind::Float)
}

/// Builds the aggregation weights for a batch.
///
/// With an IDF table the weights are the per-token IDF values restricted to
/// content positions, so padding and begin/end markers always weigh zero
/// whatever the table holds for their ids. Without a table the content mask
/// is used as is.
pub fn weight_mask(input_ids: &Tensor, content: &Tensor, idf: Option<&IdfTable>) -> Result<Tensor> {
    match idf {
        Some(table) => Ok(table.lookup(input_ids)? * content),
        None => Ok(content.shallow_clone()),
    }
}

//! Classification loss terms and hard-negative mining.

use burn::{
    prelude::*,
    tensor::{activation::log_softmax, backend::Backend, Tensor},
};

/// Softmax cross-entropy of every anchor.
///
/// `logits` is `[batch, M, C]`, `labels` is `[batch, M]`. Ignored anchors (label `-1`) are
/// scored against class 0; callers mask them out.
pub fn per_anchor_cross_entropy<B: Backend>(
    logits: Tensor<B, 3>,
    labels: Tensor<B, 2, Int>,
) -> Tensor<B, 2> {
    let [batch, anchors, _] = logits.dims();
    let classes = labels.clamp_min(0).reshape([batch, anchors, 1]);

    log_softmax(logits, 2)
        .gather(2, classes)
        .reshape([batch, anchors])
        .neg()
}

/// Select the `quota` highest-loss negatives of every image.
///
/// `loss` and `negatives` are `[batch, M]`, `quota` is `[batch, 1]`. Each row ranks its
/// negatives by descending loss and keeps the first `quota` of them; anchors outside
/// `negatives` are never selected.
pub fn hard_negative_mask<B: Backend>(
    loss: Tensor<B, 2>,
    negatives: Tensor<B, 2, Bool>,
    quota: Tensor<B, 2, Int>,
) -> Tensor<B, 2, Bool> {
    let [_, anchors] = loss.dims();

    let ranked = loss.mask_fill(negatives.clone().bool_not(), f32::NEG_INFINITY);
    let (_, order) = ranked.sort_descending_with_indices(1);
    // Position of every anchor in its row's descending order.
    let rank = order.argsort(1);

    let selected = rank.lower(quota.repeat_dim(1, anchors));
    (selected.int() + negatives.int()).equal_elem(2)
}

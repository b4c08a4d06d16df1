//! Smooth-L1 regression loss.

use burn::{
    nn::loss::HuberLossConfig,
    prelude::*,
    tensor::{backend::Backend, Tensor},
};

/// Configuration for Smooth-L1 Loss.
#[derive(Config, Debug)]
pub struct SmoothL1LossConfig {
    /// Transition point between the quadratic and the linear branch.
    #[config(default = 1.0)]
    pub beta: f32,
}

/// Smooth-L1 loss: `0.5 x²` for `|x| < beta`, `|x| - 0.5 beta` otherwise (`beta = 1`).
///
/// Equal to the Huber loss with `delta = beta` scaled by `1 / beta`.
#[derive(Module, Debug)]
pub struct SmoothL1Loss<B: Backend> {
    pub beta: f32,
    _phantom: std::marker::PhantomData<B>,
}

impl SmoothL1LossConfig {
    /// Initialize a new Smooth-L1 loss with the given configuration.
    pub const fn init<B: Backend>(&self) -> SmoothL1Loss<B> {
        SmoothL1Loss {
            beta: self.beta,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<B: Backend> Default for SmoothL1Loss<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> SmoothL1Loss<B> {
    /// Create a new Smooth-L1 loss with `beta = 1`.
    pub fn new() -> Self {
        SmoothL1LossConfig::new().init()
    }

    /// Element-wise loss, same shape as the inputs.
    pub fn forward_no_reduction<const D: usize>(
        &self,
        pred: Tensor<B, D>,
        target: Tensor<B, D>,
    ) -> Tensor<B, D> {
        HuberLossConfig::new(self.beta)
            .init()
            .forward_no_reduction(pred, target)
            / self.beta
    }

    /// Loss summed over the last dimension: `[..., K]` to `[...]` per-row values.
    pub fn forward_rows(&self, pred: Tensor<B, 3>, target: Tensor<B, 3>) -> Tensor<B, 2> {
        let [batch, rows, _] = pred.dims();
        self.forward_no_reduction(pred, target)
            .sum_dim(2)
            .reshape([batch, rows])
    }
}

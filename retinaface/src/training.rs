//! Training step output for RetinaFace.
//!
//! [`RetinaFaceOutput`] is what a `TrainStep` / `ValidStep` of a RetinaFace model returns;
//! it carries the loss terms to the Burn metric system.

use burn::{
    prelude::*,
    tensor::{backend::Backend, Transaction},
    train::metric::{Adaptor, ItemLazy},
};

use crate::{losses::MultiBoxLossOutput, metrics::LossComponentInput};

/// Output of a RetinaFace training or validation step.
#[derive(Debug, Clone)]
pub struct RetinaFaceOutput<B: Backend> {
    pub loss: Tensor<B, 1>,
    pub loss_loc: Tensor<B, 1>,
    pub loss_cls: Tensor<B, 1>,
    pub loss_landmark: Tensor<B, 1>,
    pub batch_size: usize,
}

impl<B: Backend> RetinaFaceOutput<B> {
    /// Wrap the loss of a batch of `batch_size` images.
    pub fn new(output: MultiBoxLossOutput<B>, batch_size: usize) -> Self {
        Self {
            loss: output.loss,
            loss_loc: output.loss_loc,
            loss_cls: output.loss_cls,
            loss_landmark: output.loss_landmark,
            batch_size,
        }
    }
}

impl<B: Backend> ItemLazy for RetinaFaceOutput<B> {
    type ItemSync = Self;

    fn sync(self) -> Self::ItemSync {
        let transaction_result = Transaction::default()
            .register(self.loss)
            .register(self.loss_loc)
            .register(self.loss_cls)
            .register(self.loss_landmark)
            .execute();

        let [loss, loss_loc, loss_cls, loss_landmark] =
            transaction_result.try_into().unwrap_or_else(|_| {
                panic!(
                    "Failed to extract exactly 4 tensors from transaction. \
                     Expected: [loss, loss_loc, loss_cls, loss_landmark]. This indicates a \
                     programming error in RetinaFaceOutput::sync implementation."
                )
            });

        let device = &Default::default();

        Self {
            loss: Tensor::from_data(loss, device),
            loss_loc: Tensor::from_data(loss_loc, device),
            loss_cls: Tensor::from_data(loss_cls, device),
            loss_landmark: Tensor::from_data(loss_landmark, device),
            batch_size: self.batch_size,
        }
    }
}

impl<B: Backend> Adaptor<LossComponentInput<B>> for RetinaFaceOutput<B> {
    fn adapt(&self) -> LossComponentInput<B> {
        LossComponentInput {
            loss: self.loss.clone(),
            loss_loc: self.loss_loc.clone(),
            loss_cls: self.loss_cls.clone(),
            loss_landmark: self.loss_landmark.clone(),
            batch_size: self.batch_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        losses::{MultiBoxLoss, Predictions},
        targets::TargetBatch,
    };
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_output_syncs_and_adapts() {
        let device = Default::default();
        let targets = TargetBatch::<TestBackend> {
            boxes: Tensor::zeros([2, 3, 4], &device),
            labels: Tensor::from_data(TensorData::new(vec![1_i64, 0, 0, 0, 1, -1], [2, 3]), &device),
            landmarks: Tensor::zeros([2, 3, 10], &device),
            landmark_valid: Tensor::<TestBackend, 2, Int>::zeros([2, 3], &device).bool(),
        };
        let predictions = Predictions {
            boxes: Tensor::ones([2, 3, 4], &device),
            logits: Tensor::zeros([2, 3, 2], &device),
            landmarks: Tensor::zeros([2, 3, 10], &device),
        };
        let loss = MultiBoxLoss::new().forward(predictions, targets).unwrap();
        let expected = loss.to_loss_dict();

        let output = RetinaFaceOutput::new(loss, 2).sync();
        let input: LossComponentInput<TestBackend> = output.adapt();

        assert_eq!(input.batch_size, 2);
        let total: f32 = input.loss.into_scalar();
        assert!((f64::from(total) - expected["loss"]).abs() < 1e-6);
        let localization: f32 = input.loss_loc.into_scalar();
        assert!((f64::from(localization) - expected["loss_loc"]).abs() < 1e-6);
    }
}

//! Loss metrics for RetinaFace training.
//!
//! One [`LossComponentMetric`] per loss term lets a Burn `Learner` report the total,
//! localization, classification and landmark losses separately.

use std::marker::PhantomData;

use burn::{
    prelude::*,
    tensor::{backend::Backend, ElementConversion},
    train::metric::{
        state::{FormatOptions, NumericMetricState},
        Metric, MetricEntry, MetricMetadata, Numeric,
    },
};

/// Loss term tracked by a [`LossComponentMetric`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossComponent {
    Total,
    Localization,
    Classification,
    Landmark,
}

impl LossComponent {
    pub const ALL: [Self; 4] = [
        Self::Total,
        Self::Localization,
        Self::Classification,
        Self::Landmark,
    ];

    /// Metric name shown by the training dashboard.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Total => "Loss",
            Self::Localization => "Loss Loc",
            Self::Classification => "Loss Cls",
            Self::Landmark => "Loss Ldm",
        }
    }
}

/// Input of [`LossComponentMetric`]: the scalar terms of one batch.
pub struct LossComponentInput<B: Backend> {
    pub loss: Tensor<B, 1>,
    pub loss_loc: Tensor<B, 1>,
    pub loss_cls: Tensor<B, 1>,
    pub loss_landmark: Tensor<B, 1>,
    pub batch_size: usize,
}

impl<B: Backend> LossComponentInput<B> {
    fn component(&self, component: LossComponent) -> &Tensor<B, 1> {
        match component {
            LossComponent::Total => &self.loss,
            LossComponent::Localization => &self.loss_loc,
            LossComponent::Classification => &self.loss_cls,
            LossComponent::Landmark => &self.loss_landmark,
        }
    }
}

/// Running average of one loss term.
pub struct LossComponentMetric<B: Backend> {
    component: LossComponent,
    state: NumericMetricState,
    _b: PhantomData<B>,
}

impl<B: Backend> LossComponentMetric<B> {
    pub fn new(component: LossComponent) -> Self {
        Self {
            component,
            state: NumericMetricState::default(),
            _b: PhantomData,
        }
    }

    pub const fn component(&self) -> LossComponent {
        self.component
    }

    fn record(&mut self, item: &LossComponentInput<B>) -> MetricEntry {
        let value = item
            .component(self.component)
            .clone()
            .into_scalar()
            .elem::<f64>();
        self.state.update(
            value,
            item.batch_size,
            FormatOptions::new(self.component.name()).precision(5),
        )
    }
}

impl<B: Backend> Metric for LossComponentMetric<B> {
    type Input = LossComponentInput<B>;

    fn name(&self) -> String {
        self.component.name().to_string()
    }

    fn update(&mut self, item: &Self::Input, _metadata: &MetricMetadata) -> MetricEntry {
        self.record(item)
    }

    fn clear(&mut self) {
        self.state.reset();
    }
}

impl<B: Backend> Numeric for LossComponentMetric<B> {
    fn value(&self) -> f64 {
        self.state.value()
    }
}

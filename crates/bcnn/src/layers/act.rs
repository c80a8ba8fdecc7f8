//! # Rectifier Layer Wrapper
//!
//! [`Rectifier`] dispatches over the rectified activations the model
//! families use; [`RectifierConfig`] selects the variant at construction
//! time.

use burn::nn::{LeakyRelu, LeakyReluConfig, Relu};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`Rectifier`] Configuration.
#[derive(Config, Debug)]
pub enum RectifierConfig {
    /// [`Relu`] layer.
    Relu,

    /// [`LeakyRelu`] layer.
    LeakyRelu(LeakyReluConfig),
}

impl From<LeakyReluConfig> for RectifierConfig {
    fn from(config: LeakyReluConfig) -> Self {
        Self::LeakyRelu(config)
    }
}

impl Default for RectifierConfig {
    fn default() -> Self {
        Self::LeakyRelu(LeakyReluConfig::new())
    }
}

impl RectifierConfig {
    /// Initialize a wrapped rectifier layer.
    pub fn init(&self) -> Rectifier {
        match self {
            RectifierConfig::Relu => Rectifier::Relu(Relu),
            RectifierConfig::LeakyRelu(config) => Rectifier::LeakyRelu(config.init()),
        }
    }
}

/// Rectifier Layer Wrapper.
#[derive(Module, Clone, Debug)]
pub enum Rectifier {
    /// [`Relu`] layer.
    Relu(Relu),

    /// [`LeakyRelu`] layer.
    LeakyRelu(LeakyRelu),
}

impl Rectifier {
    /// Forward Pass.
    ///
    /// ``output = x if x >= 0, else x * negative_slope`` (slope 0 for Relu).
    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        match self {
            Rectifier::Relu(layer) => layer.forward(input),
            Rectifier::LeakyRelu(layer) => layer.forward(input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_relu_forward() {
        let device = Default::default();
        let act = RectifierConfig::Relu.init();

        let input = Tensor::<B, 2>::from_floats([[-2.0, -0.5, 0.0, 3.0]], &device);
        let output = act.forward(input);

        output
            .to_data()
            .assert_eq(&Tensor::<B, 2>::from_floats([[0.0, 0.0, 0.0, 3.0]], &device).to_data(), true);
    }

    #[test]
    fn test_leaky_relu_forward() {
        let device = Default::default();
        let act = RectifierConfig::default().init();
        assert!(matches!(&act, Rectifier::LeakyRelu(layer) if layer.negative_slope == 0.01));

        let input = Tensor::<B, 2>::from_floats([[-2.0, 4.0]], &device);
        let output = act.forward(input);

        output
            .to_data()
            .assert_eq(&Tensor::<B, 2>::from_floats([[-0.02, 4.0]], &device).to_data(), true);
    }
}

//! Export -> reload -> execute equivalence checks, via tract.

use bcnn::models::classifier::{ImageClassifier, ImageClassifierConfig};
use bcnn::models::convnet::ConvNetConfig;
use bcnn::models::densenet::DenseNetConfig;
use bcnn::models::resnet::ResNetConfig;
use bcnn::onnx;
use burn::backend::NdArray;
use burn::tensor::{Distribution, Tensor};
use std::path::Path;
use tract_onnx::prelude::*;

type B = NdArray<f32>;

/// Load an exported graph with a fixed input shape and run it.
fn run_exported(
    path: &Path,
    input: Vec<f32>,
    input_shape: [usize; 4],
) -> Vec<f32> {
    let mut shape = tvec!();
    for dim in input_shape {
        shape.push(dim);
    }

    let plan = tract_onnx::onnx()
        .model_for_path(path)
        .unwrap()
        .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), shape))
        .unwrap()
        .into_optimized()
        .unwrap()
        .into_runnable()
        .unwrap();

    let input =
        tract_ndarray::ArrayD::from_shape_vec(tract_ndarray::IxDyn(&input_shape), input).unwrap();
    let outputs = plan.run(tvec!(input.into_tvalue())).unwrap();

    outputs[0]
        .to_array_view::<f32>()
        .unwrap()
        .iter()
        .copied()
        .collect()
}

fn assert_export_matches_forward(
    config: ImageClassifierConfig,
    batch: usize,
) {
    let device = Default::default();
    let model: ImageClassifier<B> = config.init(&device);

    let input = Tensor::<B, 4>::random(
        [batch, 3, 32, 32],
        Distribution::Uniform(-1.0, 1.0),
        &device,
    );
    let expected = model
        .forward(input.clone())
        .into_data()
        .to_vec::<f32>()
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.onnx");
    onnx::export_to_file(&model, [3, 32, 32], &path).unwrap();

    let actual = run_exported(
        &path,
        input.into_data().to_vec::<f32>().unwrap(),
        [batch, 3, 32, 32],
    );

    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(&expected) {
        let tolerance = 1e-4 * e.abs().max(1.0);
        assert!((a - e).abs() <= tolerance, "{a} != {e}");
    }
}

#[test]
fn test_convnet_export_matches_forward() {
    assert_export_matches_forward(ConvNetConfig::new(10).into(), 1);
}

#[test]
fn test_resnet_export_matches_forward() {
    assert_export_matches_forward(ResNetConfig::new(10).with_blocks([1, 1, 1]).into(), 1);
}

#[test]
fn test_densenet_export_matches_forward() {
    assert_export_matches_forward(
        DenseNetConfig::new(10).with_blocks([2, 2, 2, 2]).into(),
        1,
    );
}

#[test]
fn test_exported_graph_accepts_other_batch_sizes() {
    // exported from a batch-1 representative shape; executed with batch 3
    assert_export_matches_forward(ConvNetConfig::new(10).into(), 3);
}

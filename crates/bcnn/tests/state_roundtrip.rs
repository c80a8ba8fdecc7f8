//! Checkpoint round-trip behavior across whole models.

use bcnn::checkpoint::{CheckpointError, Checkpointable, StateDict};
use bcnn::models::classifier::{ImageClassifier, ImageClassifierConfig};
use bcnn::models::resnet::ResNetConfig;
use burn::backend::NdArray;
use burn::prelude::*;
use burn::tensor::Distribution;

type B = NdArray<f32>;

fn small_resnet() -> ImageClassifierConfig {
    ResNetConfig::new(10).with_blocks([1, 1, 1]).into()
}

#[test]
fn test_roundtrip_reproduces_forward_outputs_bit_identically() {
    let device = Default::default();
    let config = small_resnet();

    B::seed(7);
    let trained: ImageClassifier<B> = config.init(&device);

    let mut dict = StateDict::new();
    trained.collect("", &mut dict);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.ckpt");
    dict.save(&path).unwrap();
    let dict = StateDict::load(&path).unwrap();

    B::seed(99);
    let restored: ImageClassifier<B> = config.init(&device);
    let restored = restored.restore("", &dict);

    let input = Tensor::<B, 4>::random([2, 3, 32, 32], Distribution::Default, &device);
    let expected = trained.forward(input.clone());
    let actual = restored.forward(input);

    actual.to_data().assert_eq(&expected.to_data(), true);
}

#[test]
fn test_partial_load_leaves_missing_parameters_initialized() {
    let device = Default::default();
    let config = small_resnet();

    B::seed(7);
    let donor: ImageClassifier<B> = config.init(&device);
    let ImageClassifier::ResNet(donor) = donor else {
        unreachable!()
    };

    // a checkpoint holding only the stem
    let mut dict = StateDict::new();
    donor.stem.collect("stem", &mut dict);

    B::seed(99);
    let fresh: ImageClassifier<B> = config.init(&device);
    let ImageClassifier::ResNet(fresh) = fresh else {
        unreachable!()
    };
    let fc_before = fresh.fc.weight.val();

    let restored = fresh.restore("", &dict);

    // overlapping names took the checkpoint values
    restored
        .stem
        .conv
        .weight
        .val()
        .to_data()
        .assert_eq(&donor.stem.conv.weight.val().to_data(), true);

    // non-overlapping names kept their initialized values
    restored
        .fc
        .weight
        .val()
        .to_data()
        .assert_eq(&fc_before.to_data(), true);
}

#[test]
fn test_checkpoint_from_other_topology_is_tolerated() {
    let device = Default::default();

    let donor: ImageClassifier<B> =
        ImageClassifierConfig::from(ResNetConfig::new(10).with_blocks([1, 1, 1])).init(&device);
    let mut dict = StateDict::new();
    donor.collect("", &mut dict);

    let convnet: ImageClassifier<B> =
        ImageClassifierConfig::ConvNet(bcnn::models::convnet::ConvNetConfig::new(10))
            .init(&device);

    // shares no names with the resnet dict; restore is a silent no-op
    let restored = convnet.restore("", &dict);
    assert_eq!(restored.num_classes(), 10);
}

#[test]
fn test_missing_checkpoint_file_fails_before_reading() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("does-not-exist.ckpt");

    let err = StateDict::load(&path).unwrap_err();
    assert!(matches!(err, CheckpointError::NotFound { .. }));
}

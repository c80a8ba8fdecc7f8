//! Batching, normalization, and train-time augmentation.

use burn::{
    data::{
        dataloader::batcher::Batcher,
        dataset::vision::{Annotation, ImageDatasetItem, PixelDepth},
    },
    prelude::*,
};
use rand::Rng;

/// CIFAR-10 channel means.
const MEAN: [f32; 3] = [0.4914, 0.4822, 0.4465];
/// CIFAR-10 channel standard deviations.
const STD: [f32; 3] = [0.2023, 0.1994, 0.2010];

/// Padding applied before the random re-crop.
const CROP_PAD: usize = 4;
/// Brightness jitter half-range.
const BRIGHTNESS_JITTER: f64 = 0.3;

/// Per-channel normalizer.
#[derive(Clone, Debug)]
pub struct Normalizer<B: Backend> {
    /// `[1, 3, 1, 1]` channel means.
    pub mean: Tensor<B, 4>,
    /// `[1, 3, 1, 1]` channel standard deviations.
    pub std: Tensor<B, 4>,
}

impl<B: Backend> Normalizer<B> {
    /// Creates a new normalizer on `device`.
    pub fn new(device: &Device<B>) -> Self {
        let mean = Tensor::<B, 1>::from_floats(MEAN, device).reshape([1, 3, 1, 1]);
        let std = Tensor::<B, 1>::from_floats(STD, device).reshape([1, 3, 1, 1]);
        Self { mean, std }
    }

    /// Normalizes `input` (in `[0, 1]`) to `(input - mean) / std`.
    pub fn normalize(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        (input - self.mean.clone()) / self.std.clone()
    }

    /// Returns the normalizer on the given device.
    pub fn to_device(&self, device: &B::Device) -> Self {
        Self {
            mean: self.mean.clone().to_device(device),
            std: self.std.clone().to_device(device),
        }
    }
}

/// Batches dataset items into normalized image/target tensors.
#[derive(Clone)]
pub struct ClassificationBatcher<B: Backend> {
    normalizer: Normalizer<B>,
    augment: bool,
}

/// One batch of images and class targets.
#[derive(Clone, Debug)]
pub struct ClassificationBatch<B: Backend> {
    /// `[batch, 3, 32, 32]` normalized images.
    pub images: Tensor<B, 4>,
    /// `[batch]` class indices.
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> ClassificationBatcher<B> {
    /// Batcher for the training split: flip/crop/brightness augmentation,
    /// then normalization.
    pub fn for_training(device: &B::Device) -> Self {
        Self {
            normalizer: Normalizer::new(device),
            augment: true,
        }
    }

    /// Batcher for evaluation: normalization only.
    pub fn for_evaluation(device: &B::Device) -> Self {
        Self {
            normalizer: Normalizer::new(device),
            augment: false,
        }
    }
}

impl<B: Backend> Batcher<B, ImageDatasetItem, ClassificationBatch<B>> for ClassificationBatcher<B> {
    fn batch(&self, items: Vec<ImageDatasetItem>, device: &B::Device) -> ClassificationBatch<B> {
        fn image_as_vec_u8(item: ImageDatasetItem) -> Vec<u8> {
            // CIFAR-10 images are u8 pixels
            item.image
                .into_iter()
                .map(|p: PixelDepth| -> u8 { p.try_into().unwrap() })
                .collect::<Vec<u8>>()
        }

        let targets = items
            .iter()
            .map(|item| {
                if let Annotation::Label(y) = item.annotation {
                    Tensor::<B, 1, Int>::from_data(
                        TensorData::from([(y as i64).elem::<B::IntElem>()]),
                        device,
                    )
                } else {
                    panic!("expected a class label annotation")
                }
            })
            .collect();

        let images = items
            .into_iter()
            .map(|item| TensorData::new(image_as_vec_u8(item), Shape::new([32, 32, 3])))
            .map(|data| {
                Tensor::<B, 3>::from_data(data.convert::<B::FloatElem>(), device)
                    // [H, W, C] -> [C, H, W]
                    .swap_dims(2, 1)
                    .swap_dims(1, 0)
            })
            .map(|tensor| tensor / 255)
            .map(|tensor| {
                if self.augment {
                    augment(tensor)
                } else {
                    tensor
                }
            })
            .collect();

        let images = Tensor::stack(images, 0);
        let targets = Tensor::cat(targets, 0);

        let images = self.normalizer.to_device(device).normalize(images);

        ClassificationBatch { images, targets }
    }
}

/// Random horizontal flip, padded re-crop, and brightness jitter.
///
/// Operates on a `[3, height, width]` tensor in `[0, 1]`; shape and value
/// range are preserved.
fn augment<B: Backend>(image: Tensor<B, 3>) -> Tensor<B, 3> {
    let mut rng = rand::rng();
    let [channels, height, width] = image.dims();

    let mut image = image;
    if rng.random_bool(0.5) {
        image = image.flip([2]);
    }

    let dy = rng.random_range(0..=2 * CROP_PAD);
    let dx = rng.random_range(0..=2 * CROP_PAD);
    image = image
        .pad((CROP_PAD, CROP_PAD, CROP_PAD, CROP_PAD), 0.0)
        .slice([0..channels, dy..dy + height, dx..dx + width]);

    let scale = 1.0 + rng.random_range(-BRIGHTNESS_JITTER..=BRIGHTNESS_JITTER);
    image.mul_scalar(scale).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type B = NdArray<f32>;

    #[test]
    fn test_augment_preserves_shape_and_range() {
        let device = Default::default();

        for _ in 0..8 {
            let image =
                Tensor::<B, 3>::random([3, 32, 32], Distribution::Uniform(0.0, 1.0), &device);
            let augmented = augment(image);
            assert_eq!(augmented.dims(), [3, 32, 32]);

            let values = augmented.into_data().to_vec::<f32>().unwrap();
            assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_normalizer_centers_the_means() {
        let device = Default::default();
        let normalizer = Normalizer::<B>::new(&device);

        // a batch holding exactly the channel means normalizes to zero
        let mean_image: Tensor<B, 4> = normalizer.mean.clone().expand([1, 3, 32, 32]);
        let normalized = normalizer.normalize(mean_image);

        let values = normalized.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| v.abs() < 1e-6));
    }
}

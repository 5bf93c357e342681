//! In-memory labeled image storage and the MNIST source.

use anyhow::{anyhow, ensure, Result};
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use burn_dataset::{vision::MnistDataset, Dataset};
use sievenn_core::{seeded_rng, shuffled_indices};

/// Height, width and channel count of the images an evaluator was built for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ImageShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

/// One partition of a dataset: normalized grayscale images plus class labels.
///
/// Pixels are stored flat, one image after another, already scaled to [0, 1].
#[derive(Clone, Debug, PartialEq)]
pub struct ImageSet {
    images: Vec<f32>,
    labels: Vec<i64>,
    height: usize,
    width: usize,
}

/// A minibatch materialized as backend tensors, NCHW with a single channel.
#[derive(Clone)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub labels: Tensor<B, 1, Int>,
}

impl ImageSet {
    pub fn new(images: Vec<f32>, labels: Vec<i64>, height: usize, width: usize) -> Result<Self> {
        ensure!(height > 0 && width > 0, "image extent must be positive");
        ensure!(
            images.len() == labels.len() * height * width,
            "pixel buffer length {} does not match {} images of {}x{}",
            images.len(),
            labels.len(),
            height,
            width
        );
        ensure!(
            labels.iter().all(|&label| label >= 0),
            "class labels must be non-negative"
        );
        Ok(Self {
            images,
            labels,
            height,
            width,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn shape(&self) -> ImageShape {
        ImageShape {
            height: self.height,
            width: self.width,
            channels: 1,
        }
    }

    pub fn label(&self, index: usize) -> i64 {
        self.labels[index]
    }

    /// The pixel rows of one image, flattened.
    pub fn image(&self, index: usize) -> &[f32] {
        let pixels = self.height * self.width;
        &self.images[index * pixels..(index + 1) * pixels]
    }

    pub fn max_label(&self) -> Option<i64> {
        self.labels.iter().copied().max()
    }

    /// Gather a subset of images into a fresh set, in the given order.
    pub fn subset(&self, indices: &[usize]) -> Self {
        let pixels = self.height * self.width;
        let mut images = Vec::with_capacity(indices.len() * pixels);
        let mut labels = Vec::with_capacity(indices.len());
        for &index in indices {
            images.extend_from_slice(self.image(index));
            labels.push(self.labels[index]);
        }
        Self {
            images,
            labels,
            height: self.height,
            width: self.width,
        }
    }

    /// Split into (train, holdout) by a shuffled index partition.
    ///
    /// The same seed over the same set always produces the same partition.
    pub fn split(&self, train_fraction: f64, seed: u64) -> (Self, Self) {
        let order = shuffled_indices(&mut seeded_rng(seed), self.len());
        let cut = (self.len() as f64 * train_fraction).floor() as usize;
        (self.subset(&order[..cut]), self.subset(&order[cut..]))
    }

    /// Materialize the images at `indices` as a backend minibatch.
    pub fn batch<B: Backend>(&self, indices: &[usize], device: &B::Device) -> ImageBatch<B> {
        let pixels = self.height * self.width;
        let mut images = Vec::with_capacity(indices.len() * pixels);
        let mut labels = Vec::with_capacity(indices.len());
        for &index in indices {
            images.extend_from_slice(self.image(index));
            labels.push(self.labels[index]);
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images, [indices.len(), 1, self.height, self.width]),
            device,
        );
        let labels = Tensor::<B, 1, Int>::from_ints(TensorData::new(labels, [indices.len()]), device);

        ImageBatch { images, labels }
    }
}

/// Load MNIST through the dataset collaborator as (train source, test set).
pub fn mnist_source() -> Result<(ImageSet, ImageSet)> {
    let train = image_set_from(&MnistDataset::train())?;
    let test = image_set_from(&MnistDataset::test())?;
    Ok((train, test))
}

fn image_set_from(dataset: &MnistDataset) -> Result<ImageSet> {
    let mut images = Vec::with_capacity(dataset.len() * 28 * 28);
    let mut labels = Vec::with_capacity(dataset.len());

    for index in 0..dataset.len() {
        let item = dataset
            .get(index)
            .ok_or_else(|| anyhow!("dataset index {} out of bounds", index))?;
        for row in item.image.iter() {
            for &pixel in row.iter() {
                images.push(pixel as f32 / 255.0);
            }
        }
        labels.push(item.label as i64);
    }

    ImageSet::new(images, labels, 28, 28)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 40 images of 4 classes; pixel values encode the sample index so
    /// overlaps between splits are detectable.
    fn tagged_set() -> ImageSet {
        let n = 40;
        let (height, width) = (6, 6);
        let mut images = Vec::with_capacity(n * height * width);
        let mut labels = Vec::with_capacity(n);
        for index in 0..n {
            images.extend(std::iter::repeat(index as f32 / n as f32).take(height * width));
            labels.push((index % 4) as i64);
        }
        ImageSet::new(images, labels, height, width).unwrap()
    }

    #[test]
    fn new_rejects_mismatched_buffers() {
        assert!(ImageSet::new(vec![0.0; 10], vec![0, 1], 3, 3).is_err());
        assert!(ImageSet::new(vec![0.0; 9], vec![-1], 3, 3).is_err());
        assert!(ImageSet::new(vec![], vec![], 0, 3).is_err());
    }

    #[test]
    fn split_produces_eighty_twenty() {
        let set = tagged_set();
        let (train, holdout) = set.split(0.8, 123);
        assert_eq!(train.len(), 32);
        assert_eq!(holdout.len(), 8);
    }

    #[test]
    fn split_is_deterministic_per_seed() {
        let set = tagged_set();
        let (train_a, holdout_a) = set.split(0.8, 123);
        let (train_b, holdout_b) = set.split(0.8, 123);
        assert_eq!(train_a, train_b);
        assert_eq!(holdout_a, holdout_b);

        let (train_c, _) = set.split(0.8, 124);
        assert_ne!(train_a, train_c);
    }

    #[test]
    fn split_partitions_are_disjoint_and_complete() {
        let set = tagged_set();
        let (train, holdout) = set.split(0.8, 123);

        // The first pixel of every image is its unique tag.
        let mut tags: Vec<f32> = (0..train.len())
            .map(|i| train.image(i)[0])
            .chain((0..holdout.len()).map(|i| holdout.image(i)[0]))
            .collect();
        tags.sort_by(f32::total_cmp);
        tags.dedup();
        assert_eq!(tags.len(), set.len());
    }

    #[test]
    fn max_label_spans_all_classes() {
        assert_eq!(tagged_set().max_label(), Some(3));
    }

    #[test]
    fn batch_has_nchw_layout() {
        use burn_candle::{Candle, CandleDevice};

        let set = tagged_set();
        let batch = set.batch::<Candle<f32, i64>>(&[0, 5, 9], &CandleDevice::Cpu);
        assert_eq!(batch.images.dims(), [3, 1, 6, 6]);
        assert_eq!(batch.labels.dims(), [3]);
    }
}

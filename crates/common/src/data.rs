//! Data pipeline: image loading, augmentation, batching.
//!
//! Images are stored as raw `u8` planes (`N × C × H × W`) and normalised per
//! channel only when a batch is assembled, so augmentation works on pixels
//! exactly as they were on disk.
//!
//! * **[`ImageDataset`]** — CIFAR-10 binary files or a seeded synthetic set.
//! * **[`DataLoader`]** — shuffled, augmented epochs; optional prefetch thread.
//! * **[`loaders`]** / **[`test_loader`]** — loaders for an [`ExperimentConfig`].

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use anyhow::{Context, Result as AnyhowResult};
use candle_core::{Device, Result, Tensor};
use memmap2::Mmap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::config::{DatasetKind, ExperimentConfig};

// ── CIFAR-10 binary format ──────────────────────────────────────────────────

/// Number of classes in CIFAR-10.
pub const CIFAR10_CLASSES: usize = 10;
/// Per-channel mean of the CIFAR-10 training set (RGB, in `[0, 1]`).
pub const CIFAR10_MEAN: [f32; 3] = [0.4914, 0.4822, 0.4465];
/// Per-channel standard deviation of the CIFAR-10 training set.
pub const CIFAR10_STD: [f32; 3] = [0.2470, 0.2435, 0.2616];

/// One record: label byte, then 1024 R, 1024 G, 1024 B bytes.
const CIFAR_RECORD_LEN: usize = 1 + 3 * 32 * 32;
const CIFAR_TRAIN_FILES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
const CIFAR_TEST_FILE: &str = "test_batch.bin";
/// Directory name inside the official `cifar-10-binary.tar.gz`.
const CIFAR_SUBDIR: &str = "cifar-10-batches-bin";

/// Zero padding added on each side before the random crop.
const CROP_PADDING: usize = 4;

/// Number of batches the producer thread may run ahead of training.
pub const PREFETCH_BUFFER: usize = 8;

// ── Shapes ──────────────────────────────────────────────────────────────────

/// Channel-first image dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl ImageShape {
    pub const CIFAR10: Self = Self {
        channels: 3,
        height: 32,
        width: 32,
    };

    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    /// Values per image.
    pub fn numel(&self) -> usize {
        self.channels * self.height * self.width
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

// ── ImageDataset ────────────────────────────────────────────────────────────

/// In-memory labelled image set.
pub struct ImageDataset {
    pixels: Vec<u8>,
    labels: Vec<u8>,
    shape: ImageShape,
    num_classes: usize,
    mean: Vec<f32>,
    std: Vec<f32>,
}

impl ImageDataset {
    /// Wrap raw `N × C × H × W` pixels.
    pub fn from_raw(
        pixels: Vec<u8>,
        labels: Vec<u8>,
        shape: ImageShape,
        num_classes: usize,
    ) -> AnyhowResult<Self> {
        if pixels.len() != labels.len() * shape.numel() {
            anyhow::bail!(
                "pixel buffer has {} bytes, expected {} images × {}",
                pixels.len(),
                labels.len(),
                shape.numel()
            );
        }
        if let Some(&bad) = labels.iter().find(|&&l| l as usize >= num_classes) {
            anyhow::bail!("label {bad} out of range for {num_classes} classes");
        }
        let (mean, std) = channel_stats(shape.channels);
        Ok(Self {
            pixels,
            labels,
            shape,
            num_classes,
            mean,
            std,
        })
    }

    /// Load one split of CIFAR-10 in the official binary format.
    ///
    /// `dir` is either the `cifar-10-batches-bin` directory itself or its parent.
    pub fn load_cifar10(dir: &Path, split: Split) -> AnyhowResult<Self> {
        let dir = resolve_cifar_dir(dir);
        let files: Vec<PathBuf> = match split {
            Split::Train => CIFAR_TRAIN_FILES.iter().map(|f| dir.join(f)).collect(),
            Split::Test => vec![dir.join(CIFAR_TEST_FILE)],
        };

        let mut pixels = Vec::new();
        let mut labels = Vec::new();
        for path in &files {
            let n = read_cifar_file(path, &mut pixels, &mut labels)?;
            tracing::debug!(path = %path.display(), records = n, "read CIFAR-10 batch");
        }
        tracing::info!(split = ?split, samples = labels.len(), dir = %dir.display(), "Loaded CIFAR-10");
        Self::from_raw(pixels, labels, ImageShape::CIFAR10, CIFAR10_CLASSES)
    }

    /// Seeded synthetic set: one random prototype image per class, samples
    /// are the prototype plus bounded noise. Labels cycle `0, 1, …, k-1`.
    ///
    /// Both splits share prototypes for a given `seed`; the noise differs.
    pub fn synthetic(
        num_samples: usize,
        num_classes: usize,
        shape: ImageShape,
        seed: u64,
        split: Split,
    ) -> Self {
        let numel = shape.numel();
        let mut proto_rng = StdRng::seed_from_u64(seed);
        let prototypes: Vec<Vec<u8>> = (0..num_classes)
            .map(|_| (0..numel).map(|_| proto_rng.gen_range(0..=255u8)).collect())
            .collect();

        let salt = match split {
            Split::Train => 1,
            Split::Test => 2,
        };
        let mut noise_rng = StdRng::seed_from_u64(seed.wrapping_add(salt));
        let mut pixels = Vec::with_capacity(num_samples * numel);
        let mut labels = Vec::with_capacity(num_samples);
        for i in 0..num_samples {
            let label = i % num_classes;
            for &p in &prototypes[label] {
                let noise: i16 = noise_rng.gen_range(-24..=24);
                pixels.push((p as i16 + noise).clamp(0, 255) as u8);
            }
            labels.push(label as u8);
        }

        let (mean, std) = channel_stats(shape.channels);
        Self {
            pixels,
            labels,
            shape,
            num_classes,
            mean,
            std,
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn label(&self, index: usize) -> u8 {
        self.labels[index]
    }

    /// Assemble a normalised batch. With `rng`, each image gets a random
    /// padded crop and a random horizontal flip.
    pub fn batch(&self, indices: &[usize], mut rng: Option<&mut StdRng>) -> ImageBatch {
        let mut images = Vec::with_capacity(indices.len() * self.shape.numel());
        let mut labels = Vec::with_capacity(indices.len());
        for &idx in indices {
            let augment = rng.as_deref_mut().map(Augment::sample);
            self.write_image(idx, augment, &mut images);
            labels.push(self.labels[idx] as u32);
        }
        ImageBatch {
            images,
            labels,
            shape: self.shape,
        }
    }

    fn write_image(&self, idx: usize, augment: Option<Augment>, out: &mut Vec<f32>) {
        let ImageShape {
            channels,
            height,
            width,
        } = self.shape;
        let plane = height * width;
        let base = idx * self.shape.numel();
        for c in 0..channels {
            let (mean, std) = (self.mean[c], self.std[c]);
            let src = &self.pixels[base + c * plane..base + (c + 1) * plane];
            for y in 0..height {
                for x in 0..width {
                    let raw = match augment {
                        None => src[y * width + x],
                        Some(a) => {
                            let sx = if a.flip { width - 1 - x } else { x };
                            // Coordinates in the zero-padded image.
                            let (py, px) = (y + a.dy, sx + a.dx);
                            if py < CROP_PADDING
                                || px < CROP_PADDING
                                || py - CROP_PADDING >= height
                                || px - CROP_PADDING >= width
                            {
                                0
                            } else {
                                src[(py - CROP_PADDING) * width + (px - CROP_PADDING)]
                            }
                        }
                    };
                    out.push((raw as f32 / 255.0 - mean) / std);
                }
            }
        }
    }
}

/// Crop offset into the padded image plus flip flag.
#[derive(Debug, Clone, Copy)]
struct Augment {
    dy: usize,
    dx: usize,
    flip: bool,
}

impl Augment {
    fn sample(rng: &mut StdRng) -> Self {
        Self {
            dy: rng.gen_range(0..=2 * CROP_PADDING),
            dx: rng.gen_range(0..=2 * CROP_PADDING),
            flip: rng.gen_bool(0.5),
        }
    }
}

// ── ImageBatch ──────────────────────────────────────────────────────────────

/// Normalised images (`N × C × H × W`, flattened) and their labels.
#[derive(Debug, Clone)]
pub struct ImageBatch {
    pub images: Vec<f32>,
    pub labels: Vec<u32>,
    pub shape: ImageShape,
}

impl ImageBatch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Convert a batch to `(input (N, C, H, W) f32, labels (N,) u32)` tensors.
pub fn batch_to_tensors(batch: &ImageBatch, device: &Device) -> Result<(Tensor, Tensor)> {
    let ImageShape {
        channels,
        height,
        width,
    } = batch.shape;
    let n = batch.len();
    let input = Tensor::from_slice(&batch.images, (n, channels, height, width), device)?;
    let labels = Tensor::from_slice(&batch.labels, n, device)?;
    Ok((input, labels))
}

// ── DataLoader ──────────────────────────────────────────────────────────────

/// Batches one [`ImageDataset`] per epoch.
///
/// Shuffling and augmentation are seeded with `seed + epoch`, so a given
/// epoch always sees the same order and crops.
pub struct DataLoader {
    dataset: ImageDataset,
    batch_size: usize,
    shuffle: bool,
    augment: bool,
    seed: u64,
}

impl DataLoader {
    /// Sequential, un-augmented loader (evaluation).
    pub fn new(dataset: ImageDataset, batch_size: usize) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            shuffle: false,
            augment: false,
            seed: 0,
        }
    }

    /// Shuffle every epoch with the given base seed.
    pub fn shuffled(mut self, seed: u64) -> Self {
        self.shuffle = true;
        self.seed = seed;
        self
    }

    pub fn with_augmentation(mut self, augment: bool) -> Self {
        self.augment = augment;
        self
    }

    pub fn dataset(&self) -> &ImageDataset {
        &self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_samples(&self) -> usize {
        self.dataset.len()
    }

    /// Batches per epoch; the last batch may be short.
    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    /// Yield every sample of `epoch` exactly once, in batches.
    pub fn epoch_batches(&self, epoch: usize) -> impl Iterator<Item = ImageBatch> + '_ {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
        if self.shuffle {
            order.shuffle(&mut rng);
        }
        let augment = self.augment;
        let batch_size = self.batch_size;
        let dataset = &self.dataset;
        let mut start = 0usize;
        std::iter::from_fn(move || {
            if start >= order.len() {
                return None;
            }
            let end = (start + batch_size).min(order.len());
            let crop_rng = if augment { Some(&mut rng) } else { None };
            let batch = dataset.batch(&order[start..end], crop_rng);
            start = end;
            Some(batch)
        })
    }

    /// Run `f` on every batch of `epoch` while a producer thread assembles
    /// the next [`PREFETCH_BUFFER`] batches. The first error from `f` stops
    /// the producer and is returned.
    pub fn for_each_prefetched<F>(&self, epoch: usize, mut f: F) -> AnyhowResult<()>
    where
        F: FnMut(ImageBatch) -> AnyhowResult<()>,
    {
        let (tx, rx) = mpsc::sync_channel::<ImageBatch>(PREFETCH_BUFFER);
        thread::scope(|s| -> AnyhowResult<()> {
            s.spawn(move || {
                for batch in self.epoch_batches(epoch) {
                    if tx.send(batch).is_err() {
                        return;
                    }
                }
            });
            // Dropping `rx` on early return unblocks the producer.
            for batch in rx {
                f(batch)?;
            }
            Ok(())
        })
    }
}

/// Build the `(train, test)` loaders described by `config`.
pub fn loaders(config: &ExperimentConfig) -> AnyhowResult<(DataLoader, DataLoader)> {
    let train = load_split(config, Split::Train)?;
    let train = DataLoader::new(train, config.batch_size)
        .shuffled(config.seed)
        .with_augmentation(config.augment);
    Ok((train, test_loader(config)?))
}

/// Unshuffled, unaugmented loader over the test split only.
pub fn test_loader(config: &ExperimentConfig) -> AnyhowResult<DataLoader> {
    let test = load_split(config, Split::Test)?;
    Ok(DataLoader::new(test, config.batch_size))
}

fn load_split(config: &ExperimentConfig, split: Split) -> AnyhowResult<ImageDataset> {
    let dataset = match config.dataset {
        DatasetKind::Cifar10 => {
            if config.num_classes != CIFAR10_CLASSES {
                anyhow::bail!(
                    "CIFAR-10 has {CIFAR10_CLASSES} classes, config says {}",
                    config.num_classes
                );
            }
            ImageDataset::load_cifar10(&config.data_dir, split)?
        }
        DatasetKind::Synthetic => {
            // The test split is a quarter of the training split.
            let n = match split {
                Split::Train => config.synthetic_samples,
                Split::Test => config.synthetic_samples / 4,
            };
            ImageDataset::synthetic(n, config.num_classes, ImageShape::CIFAR10, config.seed, split)
        }
    };
    if dataset.is_empty() {
        anyhow::bail!("{split:?} split is empty");
    }
    Ok(dataset)
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Normalisation statistics: CIFAR-10 for RGB, `[0, 255] → [-1, 1]` otherwise.
fn channel_stats(channels: usize) -> (Vec<f32>, Vec<f32>) {
    if channels == 3 {
        (CIFAR10_MEAN.to_vec(), CIFAR10_STD.to_vec())
    } else {
        (vec![0.5; channels], vec![0.5; channels])
    }
}

fn resolve_cifar_dir(dir: &Path) -> PathBuf {
    let nested = dir.join(CIFAR_SUBDIR);
    if nested.is_dir() {
        nested
    } else {
        dir.to_path_buf()
    }
}

/// Append every record of one CIFAR-10 batch file. Returns the record count.
fn read_cifar_file(path: &Path, pixels: &mut Vec<u8>, labels: &mut Vec<u8>) -> AnyhowResult<usize> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mmap = unsafe { Mmap::map(&file).with_context(|| format!("mmap {}", path.display()))? };
    if mmap.len() % CIFAR_RECORD_LEN != 0 {
        anyhow::bail!(
            "{}: {} bytes is not a whole number of {}-byte records",
            path.display(),
            mmap.len(),
            CIFAR_RECORD_LEN
        );
    }
    for record in mmap.chunks_exact(CIFAR_RECORD_LEN) {
        let label = record[0];
        if label as usize >= CIFAR10_CLASSES {
            anyhow::bail!("{}: invalid label {label}", path.display());
        }
        labels.push(label);
        pixels.extend_from_slice(&record[1..]);
    }
    Ok(mmap.len() / CIFAR_RECORD_LEN)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Record whose red plane is `fill`, green `fill + 1`, blue `fill + 2`.
    fn cifar_record(label: u8, fill: u8) -> Vec<u8> {
        let mut r = vec![label];
        for c in 0..3u8 {
            r.extend(std::iter::repeat(fill.wrapping_add(c)).take(1024));
        }
        r
    }

    fn write_file(path: &Path, records: &[Vec<u8>]) {
        let mut f = File::create(path).unwrap();
        for r in records {
            f.write_all(r).unwrap();
        }
    }

    fn indexed_dataset(n: usize) -> ImageDataset {
        let shape = ImageShape::new(1, 2, 2);
        let labels: Vec<u8> = (0..n as u8).collect();
        ImageDataset::from_raw(vec![128; n * shape.numel()], labels, shape, n).unwrap()
    }

    #[test]
    fn load_cifar_test_split() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            &dir.path().join(CIFAR_TEST_FILE),
            &[cifar_record(3, 0), cifar_record(9, 255), cifar_record(0, 100)],
        );
        let ds = ImageDataset::load_cifar10(dir.path(), Split::Test).unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.shape(), ImageShape::CIFAR10);
        assert_eq!(ds.label(0), 3);
        assert_eq!(ds.label(1), 9);

        let batch = ds.batch(&[0, 1], None);
        assert_eq!(batch.labels, vec![3, 9]);
        assert_eq!(batch.images.len(), 2 * 3072);
        // First image, red plane is all zeros.
        let expected = (0.0 - CIFAR10_MEAN[0]) / CIFAR10_STD[0];
        assert!((batch.images[0] - expected).abs() < 1e-6);
        // First image, green plane holds pixel value 1.
        let expected = (1.0 / 255.0 - CIFAR10_MEAN[1]) / CIFAR10_STD[1];
        assert!((batch.images[1024] - expected).abs() < 1e-6);
    }

    #[test]
    fn load_cifar_from_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join(CIFAR_SUBDIR);
        std::fs::create_dir(&nested).unwrap();
        write_file(&nested.join(CIFAR_TEST_FILE), &[cifar_record(1, 7)]);
        let ds = ImageDataset::load_cifar10(dir.path(), Split::Test).unwrap();
        assert_eq!(ds.len(), 1);
    }

    #[test]
    fn truncated_cifar_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = cifar_record(1, 7);
        record.pop();
        write_file(&dir.path().join(CIFAR_TEST_FILE), &[record]);
        assert!(ImageDataset::load_cifar10(dir.path(), Split::Test).is_err());
    }

    #[test]
    fn invalid_cifar_label_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join(CIFAR_TEST_FILE), &[cifar_record(10, 7)]);
        assert!(ImageDataset::load_cifar10(dir.path(), Split::Test).is_err());
    }

    #[test]
    fn missing_train_batches_are_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("data_batch_1.bin"), &[cifar_record(1, 7)]);
        assert!(ImageDataset::load_cifar10(dir.path(), Split::Train).is_err());
    }

    #[test]
    fn from_raw_checks_lengths_and_labels() {
        let shape = ImageShape::new(1, 2, 2);
        assert!(ImageDataset::from_raw(vec![0; 7], vec![0, 1], shape, 2).is_err());
        assert!(ImageDataset::from_raw(vec![0; 8], vec![0, 2], shape, 2).is_err());
        assert!(ImageDataset::from_raw(vec![0; 8], vec![0, 1], shape, 2).is_ok());
    }

    #[test]
    fn centred_crop_without_flip_is_identity() {
        let shape = ImageShape::new(1, 3, 3);
        let pixels: Vec<u8> = (0..9).map(|v| v * 10).collect();
        let ds = ImageDataset::from_raw(pixels, vec![0], shape, 1).unwrap();

        let mut plain = Vec::new();
        ds.write_image(0, None, &mut plain);
        let mut centred = Vec::new();
        let a = Augment {
            dy: CROP_PADDING,
            dx: CROP_PADDING,
            flip: false,
        };
        ds.write_image(0, Some(a), &mut centred);
        assert_eq!(plain, centred);
    }

    #[test]
    fn flip_mirrors_rows_and_shift_pads_with_zero() {
        let shape = ImageShape::new(1, 1, 3);
        let ds = ImageDataset::from_raw(vec![255, 128, 0], vec![0], shape, 1).unwrap();
        let zero = (0.0 - 0.5) / 0.5;
        let full = (1.0 - 0.5) / 0.5;

        let mut flipped = Vec::new();
        let a = Augment {
            dy: CROP_PADDING,
            dx: CROP_PADDING,
            flip: true,
        };
        ds.write_image(0, Some(a), &mut flipped);
        assert_eq!(flipped[0], zero);
        assert_eq!(flipped[2], full);

        // Shift right by one: first column comes from padding.
        let mut shifted = Vec::new();
        let a = Augment {
            dy: CROP_PADDING,
            dx: CROP_PADDING - 1,
            flip: false,
        };
        ds.write_image(0, Some(a), &mut shifted);
        assert_eq!(shifted[0], zero);
        assert_eq!(shifted[1], full);
    }

    #[test]
    fn augmented_batch_keeps_shape() {
        let ds = ImageDataset::synthetic(6, 3, ImageShape::new(3, 8, 8), 0, Split::Train);
        let mut rng = StdRng::seed_from_u64(5);
        let batch = ds.batch(&[0, 1, 2, 3], Some(&mut rng));
        assert_eq!(batch.len(), 4);
        assert_eq!(batch.images.len(), 4 * 3 * 8 * 8);
        assert!(batch.images.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn epoch_keeps_short_last_batch() {
        let loader = DataLoader::new(indexed_dataset(10), 4);
        let sizes: Vec<usize> = loader.epoch_batches(0).map(|b| b.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(loader.num_batches(), 3);
        let labels: Vec<u32> = loader.epoch_batches(0).flat_map(|b| b.labels).collect();
        assert_eq!(labels, (0..10).collect::<Vec<u32>>());
    }

    #[test]
    fn shuffle_is_seeded_per_epoch() {
        let loader = DataLoader::new(indexed_dataset(32), 8).shuffled(42);
        let order = |epoch| -> Vec<u32> {
            loader.epoch_batches(epoch).flat_map(|b| b.labels).collect()
        };
        assert_eq!(order(0), order(0));
        assert_ne!(order(0), order(1));

        let mut sorted = order(1);
        sorted.sort_unstable();
        assert_eq!(sorted, (0..32).collect::<Vec<u32>>());
    }

    #[test]
    fn prefetch_visits_every_sample_once() {
        let loader = DataLoader::new(indexed_dataset(50), 7).shuffled(3);
        let mut seen = Vec::new();
        loader
            .for_each_prefetched(2, |batch| {
                seen.extend(batch.labels);
                Ok(())
            })
            .unwrap();
        let expected: Vec<u32> = loader.epoch_batches(2).flat_map(|b| b.labels).collect();
        assert_eq!(seen, expected);
        seen.sort_unstable();
        assert_eq!(seen, (0..50).collect::<Vec<u32>>());
    }

    #[test]
    fn prefetch_stops_on_first_error() {
        let loader = DataLoader::new(indexed_dataset(100), 1);
        let mut calls = 0;
        let result = loader.for_each_prefetched(0, |_| {
            calls += 1;
            anyhow::bail!("stop")
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn synthetic_labels_cycle_and_splits_differ() {
        let shape = ImageShape::new(3, 4, 4);
        let train = ImageDataset::synthetic(10, 4, shape, 9, Split::Train);
        let test = ImageDataset::synthetic(10, 4, shape, 9, Split::Test);
        assert_eq!(train.len(), 10);
        assert_eq!(train.num_classes(), 4);
        assert_eq!(train.label(5), 1);
        assert_ne!(train.pixels, test.pixels);
    }

    #[test]
    fn batch_tensors_have_expected_shapes() {
        let ds = ImageDataset::synthetic(5, 2, ImageShape::new(3, 4, 4), 0, Split::Test);
        let batch = ds.batch(&[0, 1, 2], None);
        let (x, y) = batch_to_tensors(&batch, &Device::Cpu).unwrap();
        assert_eq!(x.dims(), &[3, 3, 4, 4]);
        assert_eq!(y.to_vec1::<u32>().unwrap(), vec![0, 1, 0]);
    }

    #[test]
    fn synthetic_loaders_from_config() {
        let mut config = ExperimentConfig::new(crate::ModelKind::ResNet20, crate::ModelKind::Mlp);
        config.dataset = DatasetKind::Synthetic;
        config.synthetic_samples = 40;
        config.batch_size = 16;
        let (train, test) = loaders(&config).unwrap();
        assert_eq!(train.num_samples(), 40);
        assert_eq!(train.num_batches(), 3);
        assert_eq!(test.num_samples(), 10);
        assert_eq!(train.dataset().shape(), ImageShape::CIFAR10);
    }

    #[test]
    fn cifar_loader_rejects_wrong_class_count() {
        let mut config = ExperimentConfig::new(crate::ModelKind::Mlp, crate::ModelKind::Mlp);
        config.num_classes = 5;
        assert!(test_loader(&config).is_err());
    }
}

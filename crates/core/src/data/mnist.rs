use crate::{backend::Backend, data::InMemoryLoader};
use anyhow::{bail, ensure, Context};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const IMAGES_MAGIC: u32 = 0x0000_0803;
const LABELS_MAGIC: u32 = 0x0000_0801;
const IMAGES_HEADER_LEN: u64 = 16;
const LABELS_HEADER_LEN: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    fn file_names(self) -> (&'static str, &'static str) {
        match self {
            Split::Train => ("train-images-idx3-ubyte", "train-labels-idx1-ubyte"),
            Split::Test => ("t10k-images-idx3-ubyte", "t10k-labels-idx1-ubyte"),
        }
    }
}

/// An IDX image/label pair, pixels scaled to `[0, 1]`.
pub struct MnistDataset {
    pub images: Vec<f32>,
    pub labels: Vec<u8>,
    pub num_samples: usize,
    pub image_size: (usize, usize),
}

impl MnistDataset {
    pub fn load(dir: impl AsRef<Path>, split: Split) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let (images_name, labels_name) = split.file_names();
        let (images, image_size) = Self::load_images(&dir.join(images_name))?;
        let labels = Self::load_labels(&dir.join(labels_name))?;

        let pixels = image_size.0 * image_size.1;
        let num_samples = labels.len();
        ensure!(
            images.len() == num_samples * pixels,
            "{} holds {} images but {} has {} labels",
            images_name,
            images.len() / pixels.max(1),
            labels_name,
            num_samples
        );

        Ok(Self {
            images,
            labels,
            num_samples,
            image_size,
        })
    }

    fn load_images(path: &Path) -> anyhow::Result<(Vec<f32>, (usize, usize))> {
        let mut file = open(path)?;
        let magic = read_u32(&mut file, path)?;
        if magic != IMAGES_MAGIC {
            bail!("{} is not an IDX image file (magic {magic:#010x})", path.display());
        }
        let count = read_u32(&mut file, path)? as usize;
        let rows = read_u32(&mut file, path)? as usize;
        let cols = read_u32(&mut file, path)? as usize;

        let total = count
            .checked_mul(rows)
            .and_then(|n| n.checked_mul(cols))
            .with_context(|| format!("{} declares an impossible size {count}x{rows}x{cols}", path.display()))?;
        ensure_payload(path, IMAGES_HEADER_LEN, total)?;

        let mut pixels = vec![0u8; total];
        file.read_exact(&mut pixels)
            .with_context(|| format!("{} is truncated", path.display()))?;

        let normalized = pixels.into_iter().map(|p| p as f32 / 255.0).collect();
        Ok((normalized, (rows, cols)))
    }

    fn load_labels(path: &Path) -> anyhow::Result<Vec<u8>> {
        let mut file = open(path)?;
        let magic = read_u32(&mut file, path)?;
        if magic != LABELS_MAGIC {
            bail!("{} is not an IDX label file (magic {magic:#010x})", path.display());
        }
        let count = read_u32(&mut file, path)? as usize;

        ensure_payload(path, LABELS_HEADER_LEN, count)?;

        let mut labels = vec![0u8; count];
        file.read_exact(&mut labels)
            .with_context(|| format!("{} is truncated", path.display()))?;
        Ok(labels)
    }

    /// Batches of shape `[n, rows, cols]`.
    pub fn into_loader<B: Backend>(self, backend: B, batch_size: usize) -> crate::Result<InMemoryLoader<B>> {
        let labels = self.labels.into_iter().map(usize::from).collect();
        let (rows, cols) = self.image_size;
        InMemoryLoader::new(backend, self.images, labels, &[rows, cols], batch_size)
    }
}

fn open(path: &Path) -> anyhow::Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(BufReader::new(file))
}

/// Fails before allocating when the header promises more bytes than the file holds.
fn ensure_payload(path: &Path, header_len: u64, declared: usize) -> anyhow::Result<()> {
    let file_len = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len();
    let available = file_len.saturating_sub(header_len);
    ensure!(
        declared as u64 <= available,
        "{} declares {declared} bytes of data but holds {available}",
        path.display()
    );
    Ok(())
}

fn read_u32(file: &mut impl Read, path: &Path) -> anyhow::Result<u32> {
    let mut word = [0u8; 4];
    file.read_exact(&mut word)
        .with_context(|| format!("{} ends inside its header", path.display()))?;
    Ok(u32::from_be_bytes(word))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::CpuBackend, data::DataLoader};
    use std::fs;
    use std::path::PathBuf;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("scene_core_mnist_{name}_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_idx(dir: &Path, split: Split, images: &[u8], labels: &[u8], rows: u32, cols: u32) {
        let (images_name, labels_name) = split.file_names();
        let mut image_file = Vec::new();
        for word in [IMAGES_MAGIC, labels.len() as u32, rows, cols] {
            image_file.extend_from_slice(&word.to_be_bytes());
        }
        image_file.extend_from_slice(images);
        fs::write(dir.join(images_name), image_file).unwrap();

        let mut label_file = Vec::new();
        for word in [LABELS_MAGIC, labels.len() as u32] {
            label_file.extend_from_slice(&word.to_be_bytes());
        }
        label_file.extend_from_slice(labels);
        fs::write(dir.join(labels_name), label_file).unwrap();
    }

    #[test]
    fn reads_and_normalizes_idx_files() {
        let dir = scratch_dir("ok");
        write_idx(&dir, Split::Test, &[0, 255, 51, 102, 0, 0, 0, 255], &[7, 2], 2, 2);

        let data = MnistDataset::load(&dir, Split::Test).unwrap();
        assert_eq!(data.num_samples, 2);
        assert_eq!(data.image_size, (2, 2));
        assert_eq!(data.labels, [7, 2]);
        assert_eq!(data.images[..4], [0.0, 1.0, 0.2, 0.4]);

        let loader = data.into_loader(CpuBackend, 1).unwrap();
        assert_eq!(loader.num_batches(), 2);
        let first = loader.batches().next().unwrap().unwrap();
        assert_eq!(first.inputs.shape, vec![1, 2, 2]);
        assert_eq!(first.targets, [7]);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn wrong_magic_is_reported() {
        let dir = scratch_dir("magic");
        write_idx(&dir, Split::Train, &[0; 4], &[1], 2, 2);
        let (images_name, _) = Split::Train.file_names();
        fs::write(dir.join(images_name), [0u8; 16]).unwrap();

        let err = MnistDataset::load(&dir, Split::Train).err().unwrap();
        assert!(err.to_string().contains("not an IDX image file"));
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn overflowing_header_is_an_error() {
        let dir = scratch_dir("overflow");
        write_idx(&dir, Split::Train, &[0; 4], &[1], 2, 2);
        let (images_name, _) = Split::Train.file_names();
        let mut header = Vec::new();
        for word in [IMAGES_MAGIC, u32::MAX, u32::MAX, u32::MAX] {
            header.extend_from_slice(&word.to_be_bytes());
        }
        fs::write(dir.join(images_name), header).unwrap();

        let err = MnistDataset::load(&dir, Split::Train).err().unwrap();
        assert!(err.to_string().contains("impossible size"), "{err}");
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn header_larger_than_file_is_rejected_before_reading() {
        let dir = scratch_dir("short");
        write_idx(&dir, Split::Test, &[0; 4], &[1], 2, 2);
        let (_, labels_name) = Split::Test.file_names();
        let mut short = Vec::new();
        for word in [LABELS_MAGIC, 1 << 30] {
            short.extend_from_slice(&word.to_be_bytes());
        }
        short.push(3);
        fs::write(dir.join(labels_name), short).unwrap();

        let err = MnistDataset::load(&dir, Split::Test).err().unwrap();
        assert!(err.to_string().contains("holds 1"), "{err}");
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn missing_directory_names_the_file() {
        let err = MnistDataset::load("/nonexistent/scene", Split::Train).err().unwrap();
        assert!(err.to_string().contains("train-images-idx3-ubyte"));
    }
}

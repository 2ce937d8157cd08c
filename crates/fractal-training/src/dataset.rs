use crate::error::{TrainingError, TrainingResult};
use crate::layout::TaskLayout;
use crate::task::Task;
use std::path::Path;

/// Flat image/label buffers for one task, one row per sample.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDataset {
    inputs: Vec<f32>,
    labels: Vec<f32>,
    input_len: usize,
    num_classes: usize,
}

impl ImageDataset {
    pub fn new(inputs: Vec<f32>, labels: Vec<f32>, input_len: usize, num_classes: usize) -> TrainingResult<Self> {
        if input_len == 0 || num_classes == 0 {
            return Err(TrainingError::Dataset("sample dimensions must be > 0".to_string()));
        }
        if inputs.len() % input_len != 0 || labels.len() % num_classes != 0 {
            return Err(TrainingError::Dataset("buffers are not a whole number of samples".to_string()));
        }
        if inputs.len() / input_len != labels.len() / num_classes {
            return Err(TrainingError::Dataset(format!(
                "{} images but {} labels",
                inputs.len() / input_len,
                labels.len() / num_classes
            )));
        }
        Ok(Self { inputs, labels, input_len, num_classes })
    }

    pub fn len(&self) -> usize {
        self.inputs.len() / self.input_len
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Input and one-hot label slices of sample `index`.
    pub fn sample(&self, index: usize) -> Option<(&[f32], &[f32])> {
        if index >= self.len() {
            return None;
        }
        let input = &self.inputs[index * self.input_len..(index + 1) * self.input_len];
        let label = &self.labels[index * self.num_classes..(index + 1) * self.num_classes];
        Some((input, label))
    }
}

/// Turns a task's downloaded files into an in-memory dataset.
pub trait DatasetLoader: Send + Sync {
    fn id(&self) -> &'static str;

    fn load(&self, task: &Task, layout: &TaskLayout) -> TrainingResult<ImageDataset>;
}

/// Reads little-endian `f32` image and one-hot label files.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageBinLoader;

impl DatasetLoader for ImageBinLoader {
    fn id(&self) -> &'static str {
        "image_bin"
    }

    fn load(&self, task: &Task, layout: &TaskLayout) -> TrainingResult<ImageDataset> {
        let samples = usize::try_from(task.samples_per_epoch())
            .map_err(|_| TrainingError::Dataset("sample count overflows usize".to_string()))?;
        let input_len = task.input_len();
        let num_classes = task.num_classes as usize;

        let inputs = read_f32_le(&layout.images_path(task), samples * input_len)?;
        let labels = read_f32_le(&layout.labels_path(task), samples * num_classes)?;
        ImageDataset::new(inputs, labels, input_len, num_classes)
    }
}

/// Read the first `count` little-endian `f32` values of a file.
pub fn read_f32_le(path: &Path, count: usize) -> TrainingResult<Vec<f32>> {
    let bytes = std::fs::read(path)?;
    let needed = count * 4;
    if bytes.len() < needed {
        return Err(TrainingError::Dataset(format!(
            "{} holds {} bytes, need {needed}",
            path.display(),
            bytes.len()
        )));
    }
    Ok(bytes[..needed]
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub fn write_f32_le(path: &Path, values: &[f32]) -> TrainingResult<()> {
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    std::fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskId;
    use tempfile::TempDir;

    fn small_task() -> Task {
        let mut task = Task::new(TaskId(3));
        task.input_shape = vec![2, 2];
        task.num_classes = 2;
        task.num_trainings = 5;
        task.batch_size = 2;
        task
    }

    #[test]
    fn test_loader_reads_whole_batches_only() {
        let temp = TempDir::new().unwrap();
        let layout = TaskLayout::new(temp.path().to_path_buf());
        let task = small_task();

        let images: Vec<f32> = (0..20).map(|i| i as f32).collect();
        let labels: Vec<f32> = (0..5).flat_map(|i| if i % 2 == 0 { [1.0, 0.0] } else { [0.0, 1.0] }).collect();
        write_f32_le(&layout.images_path(&task), &images).unwrap();
        write_f32_le(&layout.labels_path(&task), &labels).unwrap();

        let dataset = ImageBinLoader.load(&task, &layout).unwrap();
        assert_eq!(dataset.len(), 4);
        let (input, label) = dataset.sample(1).unwrap();
        assert_eq!(input, &[4.0, 5.0, 6.0, 7.0]);
        assert_eq!(label, &[0.0, 1.0]);
        assert!(dataset.sample(4).is_none());
    }

    #[test]
    fn test_short_file_is_dataset_error() {
        let temp = TempDir::new().unwrap();
        let layout = TaskLayout::new(temp.path().to_path_buf());
        let task = small_task();
        write_f32_le(&layout.images_path(&task), &[0.0; 8]).unwrap();
        write_f32_le(&layout.labels_path(&task), &[0.0; 8]).unwrap();

        let err = ImageBinLoader.load(&task, &layout).unwrap_err();
        assert!(matches!(err, TrainingError::Dataset(_)));
    }

    #[test]
    fn test_mismatched_counts_rejected() {
        assert!(ImageDataset::new(vec![0.0; 8], vec![0.0; 2], 4, 2).is_err());
    }
}

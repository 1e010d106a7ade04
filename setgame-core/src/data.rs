use crate::{
    card::{Card, Target},
    error::{Error, Result},
};
use burn::{
    data::dataloader::{batcher::Batcher, Dataset},
    prelude::*,
    tensor::{ElementConversion, TensorData},
};
use image::{imageops::colorops::brighten_in_place, imageops::FilterType, DynamicImage, Rgb};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use mime_guess::MimeGuess;
use rand::{rngs::StdRng, seq::SliceRandom, thread_rng, Rng, SeedableRng};
use std::{
    collections::BTreeSet,
    f32::consts::PI,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// Side of the square classifier input.
pub const SIZE: usize = 224;

#[derive(Debug, Clone)]
pub struct ImageData {
    data: Vec<f32>,
    label: usize,
    path: PathBuf,
}

/// Labeled images, one class per sub-folder of the dataset root.
#[derive(Debug, Clone)]
pub struct CardDataSet {
    labels: Vec<String>,
    samples: Vec<(PathBuf, usize)>,
    augment: bool,
}

impl CardDataSet {
    pub fn from_folder(root: impl AsRef<Path>, target: Target) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(Error::FolderNotFound(root.to_path_buf()));
        }
        let mut folders = std::fs::read_dir(root)?
            .filter_map(|res| res.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| !name.starts_with('.'))
            .collect::<Vec<_>>();
        folders.sort();
        if folders.is_empty() {
            return Err(Error::NoClasses(root.to_path_buf()));
        }

        let classes = folders
            .iter()
            .map(|folder| class_of(folder, target))
            .collect::<Result<Vec<_>>>()?;
        let labels = classes
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();

        let mut samples = vec![];
        for (folder, class) in folders.iter().zip(classes.iter()) {
            let label = labels
                .iter()
                .position(|l| l == class)
                .expect("every class is listed in labels");
            let images = images_walk(root.join(folder));
            debug!(%folder, %class, images = images.len(), "class folder scanned");
            samples.extend(images.into_iter().map(|path| (path, label)));
        }
        if samples.is_empty() {
            return Err(Error::NoImages(root.to_path_buf()));
        }
        info!(
            root = %root.display(),
            classes = labels.len(),
            images = samples.len(),
            "dataset loaded"
        );
        Ok(Self {
            labels,
            samples,
            augment: false,
        })
    }

    /// Shuffles with `seed`, then keeps the first `floor(len * fraction)`
    /// samples for training and the rest for testing. Fails when that leaves
    /// nothing to train on.
    pub fn split(mut self, fraction: f32, seed: u64) -> Result<(Self, Self)> {
        if !(fraction > 0. && fraction <= 1.) {
            return Err(Error::InvalidSplit(fraction));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        self.samples.shuffle(&mut rng);
        let at = (self.samples.len() as f64 * fraction as f64).floor() as usize;
        if at == 0 {
            return Err(Error::EmptyTrainingSet);
        }
        let test = self.samples.split_off(at);
        let test = Self {
            labels: self.labels.clone(),
            samples: test,
            augment: false,
        };
        Ok((self, test))
    }

    /// Random flips, small rotations and brightness shifts on every read.
    pub fn with_augmentation(mut self, augment: bool) -> Self {
        self.augment = augment;
        self
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }

    pub fn samples(&self) -> &[(PathBuf, usize)] {
        &self.samples
    }
}

/// The class a folder belongs to: the folder name itself for whole cards,
/// the projected attribute otherwise.
fn class_of(folder: &str, target: Target) -> Result<String> {
    match (target, folder.parse::<Card>()) {
        (Target::Card, parsed) => {
            if parsed.is_err() {
                warn!(folder, "class folder is not a card label");
            }
            Ok(folder.to_string())
        }
        (target, Ok(card)) => Ok(target.project(&card)),
        (_, Err(_)) => Err(Error::NotACard(folder.to_string())),
    }
}

impl Dataset<ImageData> for CardDataSet {
    fn get(&self, index: usize) -> Option<ImageData> {
        let (path, label) = self.samples.get(index)?;
        let data = if self.augment {
            open_image_proc(path)
        } else {
            open_image_normalize(path)
        };
        Some(ImageData {
            data: data.unwrap_or_else(|e| panic!("{e}")),
            label: *label,
            path: path.clone(),
        })
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

#[derive(Clone)]
pub struct ImageBatcher<B: Backend> {
    device: B::Device,
}

#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    /// [batch_size, 3, SIZE, SIZE]
    pub images: Tensor<B, 4>,
    /// [batch_size]
    pub targets: Tensor<B, 1, Int>,
    pub paths: Vec<PathBuf>,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<ImageData, ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<ImageData>) -> ImageBatch<B> {
        let images = items
            .iter()
            .map(|item| TensorData::new(item.data.clone(), [SIZE, SIZE, 3]))
            .map(|data| Tensor::<B, 3>::from_data(data.convert::<B::FloatElem>(), &self.device))
            // HWC -> CHW
            .map(|tensor| tensor.swap_dims(0, 2).swap_dims(1, 2))
            .map(|tensor| tensor.reshape([1, 3, SIZE, SIZE]))
            .collect();
        let targets = items
            .iter()
            .map(|item| {
                Tensor::<B, 1, Int>::from_data(
                    TensorData::from([(item.label as i64).elem::<B::IntElem>()]),
                    &self.device,
                )
            })
            .collect();

        let images = Tensor::cat(images, 0);
        let targets = Tensor::cat(targets, 0);
        let paths = items.into_iter().map(|item| item.path).collect();

        ImageBatch {
            images,
            targets,
            paths,
        }
    }
}

pub(crate) fn images_walk(root: impl AsRef<Path>) -> Vec<PathBuf> {
    let mut res = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|res| res.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| match MimeGuess::from_path(e.path()).first() {
            Some(mime) if mime.type_() == "image" => Some(e.into_path()),
            _ => None,
        })
        .collect::<Vec<_>>();
    res.sort();
    res
}

fn open_image_proc(path: &Path) -> Result<Vec<f32>> {
    let mut img = open_image_resize(path)?;
    let mut rng = thread_rng();
    if rng.gen_bool(0.5) {
        img = img.fliph();
    }
    let theta = rng.gen_range(-1. / 12. ..1. / 12.);
    let mut buffer = rotate_about_center(
        &img.to_rgb8(),
        theta * PI,
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
    );
    brighten_in_place(&mut buffer, rng.gen_range(-32..32));
    Ok(normalize(buffer.into_raw()))
}

fn open_image_normalize(path: &Path) -> Result<Vec<f32>> {
    Ok(normalize(open_image_resize(path)?.to_rgb8().into_raw()))
}

fn open_image_resize(path: &Path) -> Result<DynamicImage> {
    let size = SIZE as u32;
    let img = image::open(path).map_err(|source| Error::Image {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(img.resize_exact(size, size, FilterType::Triangle))
}

fn normalize(raw: Vec<u8>) -> Vec<f32> {
    raw.into_iter().map(|p| p as f32 / 255.0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::fs;
    use tempfile::TempDir;

    fn write_image(path: &Path, color: [u8; 3]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        RgbImage::from_pixel(40, 30, Rgb(color)).save(path).unwrap();
    }

    fn fixture() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for i in 0..6 {
            write_image(&root.join(format!("2-red-solid-ovals/{i}.png")), [255, 0, 0]);
        }
        for i in 0..4 {
            write_image(&root.join(format!("1-green-empty-diamond/{i}.jpg")), [0, 255, 0]);
        }
        write_image(&root.join("3-red-striped-squiggles/nested/a.png"), [200, 0, 0]);
        fs::write(root.join("2-red-solid-ovals/notes.txt"), "not an image").unwrap();
        fs::create_dir_all(root.join(".cache")).unwrap();
        write_image(&root.join(".cache/skip.png"), [0, 0, 0]);
        dir
    }

    #[test]
    fn labels_are_sorted_folder_names() {
        let dir = fixture();
        let set = CardDataSet::from_folder(dir.path(), Target::Card).unwrap();
        assert_eq!(
            set.labels(),
            [
                "1-green-empty-diamond",
                "2-red-solid-ovals",
                "3-red-striped-squiggles"
            ]
        );
        assert_eq!(set.len(), 11);
        let counts = (0..3)
            .map(|l| set.samples().iter().filter(|(_, s)| *s == l).count())
            .collect::<Vec<_>>();
        assert_eq!(counts, [4, 6, 1]);
    }

    #[test]
    fn attribute_target_merges_folders() {
        let dir = fixture();
        let set = CardDataSet::from_folder(dir.path(), Target::Color).unwrap();
        assert_eq!(set.labels(), ["green", "red"]);
        assert_eq!(set.samples().iter().filter(|(_, l)| *l == 1).count(), 7);
    }

    #[test]
    fn attribute_target_rejects_foreign_folders() {
        let dir = fixture();
        fs::create_dir_all(dir.path().join("background")).unwrap();
        assert!(CardDataSet::from_folder(dir.path(), Target::Card).is_ok());
        assert!(matches!(
            CardDataSet::from_folder(dir.path(), Target::Shape),
            Err(Error::NotACard(name)) if name == "background"
        ));
    }

    #[test]
    fn missing_or_empty_folders() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            CardDataSet::from_folder(dir.path().join("mixed"), Target::Card),
            Err(Error::FolderNotFound(_))
        ));
        assert!(matches!(
            CardDataSet::from_folder(dir.path(), Target::Card),
            Err(Error::NoClasses(_))
        ));
        fs::create_dir_all(dir.path().join("1-red-solid-oval")).unwrap();
        assert!(matches!(
            CardDataSet::from_folder(dir.path(), Target::Card),
            Err(Error::NoImages(_))
        ));
    }

    #[test]
    fn split_is_deterministic_and_covering() {
        let dir = fixture();
        let set = CardDataSet::from_folder(dir.path(), Target::Card).unwrap();
        let (train, test) = set.clone().split(0.95, 42).unwrap();
        assert_eq!(train.len(), 10);
        assert_eq!(test.len(), 1);
        assert_eq!(test.labels(), set.labels());

        let (again, _) = set.clone().split(0.95, 42).unwrap();
        assert_eq!(train.samples(), again.samples());

        let mut all = train
            .samples()
            .iter()
            .chain(test.samples())
            .cloned()
            .collect::<Vec<_>>();
        all.sort();
        let mut expected = set.samples().to_vec();
        expected.sort();
        assert_eq!(all, expected);
    }

    #[test]
    fn card_labels_are_kept_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        for folder in ["1-red-solid-ovals", "1-Red-Solid-Oval", "2-green-empty-diamond"] {
            write_image(&dir.path().join(folder).join("a.png"), [0, 0, 255]);
        }
        let set = CardDataSet::from_folder(dir.path(), Target::Card).unwrap();
        assert_eq!(
            set.labels(),
            ["1-Red-Solid-Oval", "1-red-solid-ovals", "2-green-empty-diamond"]
        );
        let mut labels = set.samples().iter().map(|(_, l)| *l).collect::<Vec<_>>();
        labels.sort();
        assert_eq!(labels, [0, 1, 2]);

        let set = CardDataSet::from_folder(dir.path(), Target::Shape).unwrap();
        assert_eq!(set.labels(), ["diamond", "oval"]);
    }

    #[test]
    fn split_needs_a_training_sample() {
        let dir = tempfile::tempdir().unwrap();
        write_image(&dir.path().join("1-red-solid-oval/a.png"), [255, 0, 0]);
        let set = CardDataSet::from_folder(dir.path(), Target::Card).unwrap();
        assert!(matches!(
            set.clone().split(0.95, 42),
            Err(Error::EmptyTrainingSet)
        ));
        let (train, test) = set.split(1., 42).unwrap();
        assert_eq!((train.len(), test.len()), (1, 0));
    }

    #[cfg(feature = "ndarray")]
    #[test]
    fn batch_is_channel_first() {
        use burn::backend::{ndarray::NdArrayDevice, NdArray};

        let dir = tempfile::tempdir().unwrap();
        write_image(&dir.path().join("1-red-solid-oval/a.png"), [255, 0, 0]);
        write_image(&dir.path().join("1-red-solid-oval/b.png"), [255, 0, 0]);
        let set = CardDataSet::from_folder(dir.path(), Target::Card).unwrap();
        let items = (0..set.len()).filter_map(|i| set.get(i)).collect::<Vec<_>>();

        let batch = ImageBatcher::<NdArray<f32>>::new(NdArrayDevice::Cpu).batch(items);
        assert_eq!(batch.images.dims(), [2, 3, SIZE, SIZE]);
        assert_eq!(batch.targets.into_data().to_vec::<i64>().unwrap(), [0, 0]);
        let channel = |c: usize| {
            batch
                .images
                .clone()
                .slice([0..2, c..c + 1, 0..SIZE, 0..SIZE])
                .into_data()
                .to_vec::<f32>()
                .unwrap()
        };
        assert!(channel(0).iter().all(|p| (p - 1.).abs() < 1e-2));
        assert!(channel(1).iter().all(|p| p.abs() < 1e-2));
        assert!(channel(2).iter().all(|p| p.abs() < 1e-2));
    }

    #[test]
    fn split_rejects_bad_fractions() {
        let dir = fixture();
        let set = CardDataSet::from_folder(dir.path(), Target::Card).unwrap();
        assert!(set.clone().split(0., 1).is_err());
        assert!(set.clone().split(1.5, 1).is_err());
        let (train, test) = set.split(1., 1).unwrap();
        assert_eq!((train.len(), test.len()), (11, 0));
    }

    #[test]
    fn images_are_resized_and_scaled() {
        let dir = fixture();
        let set = CardDataSet::from_folder(dir.path(), Target::Card).unwrap();
        let item = set.get(0).unwrap();
        assert_eq!(item.data.len(), SIZE * SIZE * 3);
        assert!(item.data.iter().all(|p| (0.0..=1.0).contains(p)));
        // 1-green-empty-diamond comes first: pure green
        assert!(item.data[1] > 0.9 && item.data[0] < 0.1);

        let augmented = set.with_augmentation(true).get(0).unwrap();
        assert_eq!(augmented.data.len(), SIZE * SIZE * 3);
    }
}

use super::{load_image, EpisodicDataset, GallerySample, ImageInfo, QuerySample};
use crate::common::*;

/// Dataset file layout and image sizing options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// The annotation CSV file relative to the dataset directory.
    pub annotation_file: PathBuf,
    /// The image directory relative to the dataset directory.
    pub image_dir: PathBuf,
    /// The length of the shorter image side after resizing.
    pub target_size: usize,
    /// The maximum length of the longer image side after resizing.
    pub max_size: usize,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            annotation_file: PathBuf::from("annotation/train_all.csv"),
            image_dir: PathBuf::from("Image/SSM"),
            target_size: 600,
            max_size: 1000,
        }
    }
}

/// A row of the annotation file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub imname: String,
    pub x1: f64,
    pub y1: f64,
    pub del_x: f64,
    pub del_y: f64,
    /// The identity label. Negative values mark unlabeled persons.
    pub pid: i64,
}

/// A person box in original pixel units.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// `(x1, y1, x2, y2)` coordinates.
    pub tlbr: [f64; 4],
    /// The identity label, or `None` if unlabeled.
    pub pid: Option<i64>,
}

/// The person search dataset described by an annotation CSV file.
///
/// Labeled identities are numbered from 1. The number of identities is one
/// plus the largest labeled identity, which also serves as the label of
/// unlabeled persons.
#[derive(Debug, Clone)]
pub struct PersonSearchDataset {
    image_dir: PathBuf,
    target_size: usize,
    max_size: usize,
    images: IndexMap<String, Vec<Annotation>>,
    identities: HashMap<i64, IndexSet<String>>,
    num_pid: i64,
}

impl PersonSearchDataset {
    /// Loads the dataset from a directory.
    pub fn load<P>(data_dir: P, config: &DatasetConfig) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let data_dir = data_dir.as_ref();
        let annotation_file = data_dir.join(&config.annotation_file);

        let records: Vec<AnnotationRecord> = csv::Reader::from_path(&annotation_file)
            .with_context(|| {
                format!(
                    "failed to open annotation file '{}'",
                    annotation_file.display()
                )
            })?
            .deserialize::<AnnotationRecord>()
            .try_collect()
            .with_context(|| {
                format!(
                    "failed to parse annotation file '{}'",
                    annotation_file.display()
                )
            })?;

        Self::from_records(data_dir.join(&config.image_dir), config, records)
    }

    /// Builds the dataset from annotation records.
    pub fn from_records<P, I>(image_dir: P, config: &DatasetConfig, records: I) -> Result<Self>
    where
        P: Into<PathBuf>,
        I: IntoIterator<Item = AnnotationRecord>,
    {
        let DatasetConfig {
            target_size,
            max_size,
            ..
        } = *config;
        ensure!(
            target_size > 0 && max_size >= target_size,
            "target_size must be positive and not exceed max_size"
        );

        let mut images: IndexMap<String, Vec<Annotation>> = IndexMap::new();
        let mut identities: HashMap<i64, IndexSet<String>> = HashMap::new();

        for record in records {
            let AnnotationRecord {
                imname,
                x1,
                y1,
                del_x,
                del_y,
                pid,
            } = record;

            if !(del_x > 0.0 && del_y > 0.0) {
                warn!(
                    "ignore invalid box {:?} in image '{}'",
                    [x1, y1, del_x, del_y],
                    imname
                );
                continue;
            }

            let pid = (pid >= 0).then(|| pid);
            if let Some(pid) = pid {
                identities
                    .entry(pid)
                    .or_default()
                    .insert(imname.clone());
            }
            images.entry(imname).or_default().push(Annotation {
                tlbr: [x1, y1, x1 + del_x, y1 + del_y],
                pid,
            });
        }

        let num_pid = identities.keys().max().map(|&max| max + 1).unwrap_or(1);
        if identities.is_empty() {
            warn!("the dataset has no labeled identity");
        }
        info!(
            "loaded {} images with {} identity labels",
            images.len(),
            num_pid
        );

        Ok(Self {
            image_dir: image_dir.into(),
            target_size,
            max_size,
            images,
            identities,
            num_pid,
        })
    }

    /// The number of images.
    pub fn num_images(&self) -> usize {
        self.images.len()
    }

    /// The annotations of an image.
    pub fn annotations(&self, image_name: &str) -> Option<&[Annotation]> {
        self.images.get(image_name).map(|boxes| boxes.as_slice())
    }

    fn load_sample(
        &self,
        image_name: &str,
        flipped: bool,
    ) -> Result<(Tensor, ImageInfo, &[Annotation])> {
        let annotations = self
            .annotations(image_name)
            .ok_or_else(|| format_err!("image '{}' is not in the dataset", image_name))?;
        let path = self.image_dir.join(image_name);
        let (image, info) = load_image(&path, self.target_size, self.max_size, flipped)?;
        Ok((image, info, annotations))
    }
}

/// Scales a box to resized pixel units, mirroring it if requested.
fn transform_box(tlbr: &[f64; 4], info: &ImageInfo, flipped: bool) -> [f32; 4] {
    let [x1, y1, x2, y2] = tlbr.map(|value| value * info.scale);
    let [x1, x2] = if flipped {
        let width = info.width as f64;
        [width - x2, width - x1]
    } else {
        [x1, x2]
    };
    [x1 as f32, y1 as f32, x2 as f32, y2 as f32]
}

impl EpisodicDataset for PersonSearchDataset {
    fn num_pid(&self) -> i64 {
        self.num_pid
    }

    fn image_names(&self, pid: i64) -> Vec<String> {
        self.identities
            .get(&pid)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn query_sample(&self, image_name: &str, pid: i64) -> Result<QuerySample> {
        let (image, info, annotations) = self.load_sample(image_name, false)?;
        let annotation = annotations
            .iter()
            .find(|annotation| annotation.pid == Some(pid))
            .ok_or_else(|| {
                format_err!("identity {} does not appear in image '{}'", pid, image_name)
            })?;
        let roi = Tensor::of_slice(&transform_box(&annotation.tlbr, &info, false)).view([1, 4]);

        Ok(QuerySample { image, roi, info })
    }

    fn gallery_sample(&self, image_name: &str, flipped: bool) -> Result<GallerySample> {
        let (image, info, annotations) = self.load_sample(image_name, flipped)?;

        let coords: Vec<f32> = annotations
            .iter()
            .flat_map(|annotation| transform_box(&annotation.tlbr, &info, flipped))
            .collect();
        let pids: Vec<i64> = annotations
            .iter()
            .map(|annotation| annotation.pid.unwrap_or(self.num_pid))
            .collect();

        Ok(GallerySample {
            image,
            gt_boxes: Tensor::of_slice(&coords).view([-1, 4]),
            gt_pids: Tensor::of_slice(&pids),
            info,
        })
    }

    fn negative_sample(
        &self,
        exclude: &HashSet<String>,
        rng: &mut StdRng,
    ) -> Result<GallerySample> {
        let candidates: Vec<&String> = self
            .images
            .keys()
            .filter(|name| !exclude.contains(*name))
            .collect();
        let name = candidates
            .choose(rng)
            .ok_or_else(|| format_err!("no negative image is available"))?;
        self.gallery_sample(name, false)
    }
}

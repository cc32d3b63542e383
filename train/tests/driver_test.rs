use anyhow::{format_err, Result};
use approx::assert_abs_diff_eq;
use indexmap::IndexMap;
use rand::{rngs::StdRng, SeedableRng};
use sipn::{
    dataset::{EpisodicDataset, GallerySample, ImageInfo, QuerySample},
    loss::TripletLossInit,
    model::{DetectionLosses, DetectionOutput, PersonSearchModel},
};
use std::{cell::RefCell, collections::HashSet};
use tch::{
    nn::{self, OptimizerConfig as _},
    Device, Kind, Tensor,
};
use train::{
    logging::EventLogger,
    train::{TrainingLoop, TrainingSummary},
    utils::LrScheduler,
};

const NUM_PID: i64 = 5;
const FEATURE_DIM: i64 = 8;

fn image_info() -> ImageInfo {
    ImageInfo {
        height: 8,
        width: 8,
        scale: 1.0,
    }
}

/// Images mapped to the identities they contain. Identity 3 has no image and
/// identity 4 has a single one.
struct MockDataset {
    images: IndexMap<&'static str, Vec<i64>>,
    query_calls: RefCell<Vec<(String, i64)>>,
    gallery_calls: RefCell<Vec<(String, bool)>>,
    negative_excludes: RefCell<Vec<HashSet<String>>>,
}

impl MockDataset {
    fn new() -> Self {
        let images = IndexMap::from([
            ("a", vec![1, NUM_PID]),
            ("b", vec![1]),
            ("c", vec![1, 2]),
            ("d", vec![2]),
            ("e", vec![NUM_PID]),
            ("f", vec![4]),
        ]);
        Self {
            images,
            query_calls: RefCell::new(vec![]),
            gallery_calls: RefCell::new(vec![]),
            negative_excludes: RefCell::new(vec![]),
        }
    }

    fn sample(&self, name: &str) -> Result<GallerySample> {
        let pids = self
            .images
            .get(name)
            .ok_or_else(|| format_err!("unknown image {}", name))?;
        let boxes: Vec<f32> = pids
            .iter()
            .flat_map(|&pid| [pid as f32, 0.0, pid as f32 + 4.0, 4.0])
            .collect();

        Ok(GallerySample {
            image: Tensor::zeros(&[1, 3, 8, 8], (Kind::Float, Device::Cpu)),
            gt_boxes: Tensor::of_slice(&boxes).view([-1, 4]),
            gt_pids: Tensor::of_slice(pids),
            info: image_info(),
        })
    }
}

impl EpisodicDataset for MockDataset {
    fn num_pid(&self) -> i64 {
        NUM_PID
    }

    fn image_names(&self, pid: i64) -> Vec<String> {
        self.images
            .iter()
            .filter(|(_, pids)| pids.contains(&pid))
            .map(|(name, _)| name.to_string())
            .collect()
    }

    fn query_sample(&self, image_name: &str, pid: i64) -> Result<QuerySample> {
        self.query_calls
            .borrow_mut()
            .push((image_name.to_string(), pid));
        let sample = self.sample(image_name)?;
        let pids = Vec::<i64>::from(&sample.gt_pids);
        let index = pids
            .iter()
            .position(|&other| other == pid)
            .ok_or_else(|| format_err!("identity {} is not in {}", pid, image_name))?;

        Ok(QuerySample {
            image: sample.image,
            roi: sample.gt_boxes.narrow(0, index as i64, 1),
            info: sample.info,
        })
    }

    fn gallery_sample(&self, image_name: &str, flipped: bool) -> Result<GallerySample> {
        self.gallery_calls
            .borrow_mut()
            .push((image_name.to_string(), flipped));
        self.sample(image_name)
    }

    fn negative_sample(
        &self,
        exclude: &HashSet<String>,
        _rng: &mut StdRng,
    ) -> Result<GallerySample> {
        self.negative_excludes.borrow_mut().push(exclude.clone());
        let name = self
            .images
            .keys()
            .find(|name| !exclude.contains(**name))
            .ok_or_else(|| format_err!("no negative image"))?;
        self.sample(name)
    }
}

/// Embeds boxes with a linear layer and derives losses from the embeddings,
/// or uses a constant value for every detection loss term if one is given.
struct MockModel {
    embed: nn::Linear,
    detection_loss: Option<f64>,
}

impl MockModel {
    fn new(path: &nn::Path) -> Self {
        Self {
            embed: nn::linear(path / "embed", 4, FEATURE_DIM, Default::default()),
            detection_loss: None,
        }
    }

    fn with_detection_loss(path: &nn::Path, detection_loss: f64) -> Self {
        Self {
            detection_loss: Some(detection_loss),
            ..Self::new(path)
        }
    }

    fn features(&self, boxes: &Tensor) -> Tensor {
        let features = boxes.apply(&self.embed);
        let norm = (&features * &features)
            .sum_dim_intlist(&[1], true, Kind::Float)
            .sqrt()
            .clamp_min(1e-6);
        features / norm
    }
}

impl PersonSearchModel for MockModel {
    fn num_pid(&self) -> i64 {
        NUM_PID
    }

    fn query_forward(&mut self, sample: &QuerySample) -> Result<Tensor> {
        Ok(self.features(&sample.roi))
    }

    fn detection_forward(&mut self, sample: &GallerySample) -> Result<DetectionOutput> {
        let loss = match self.detection_loss {
            Some(value) => Tensor::full(&[], value, (Kind::Float, Device::Cpu)),
            None => {
                let raw = sample.gt_boxes.apply(&self.embed);
                (&raw * &raw).mean(Kind::Float)
            }
        };
        let weights = match self.detection_loss {
            Some(_) => [1.0; 4],
            None => [0.1, 0.2, 0.3, 0.4],
        };

        Ok(DetectionOutput {
            losses: DetectionLosses {
                rpn_cls: &loss * weights[0],
                rpn_box: &loss * weights[1],
                cls: &loss * weights[2],
                bbox: &loss * weights[3],
            },
            pid_labels: sample.gt_pids.shallow_clone(),
            reid_features: self.features(&sample.gt_boxes),
        })
    }
}

#[test]
fn episodic_training_loop() -> Result<()> {
    tch::manual_seed(0);
    let vs = nn::VarStore::new(Device::Cpu);
    let mut model = MockModel::new(&vs.root());
    let dataset = MockDataset::new();
    let init_weight = model.embed.ws.copy();

    let mut optimizer = nn::Sgd {
        momentum: 0.9,
        dampening: 0.0,
        wd: 1e-4,
        nesterov: false,
    }
    .build(&vs, 1e-2)?;
    let mut finished_epochs = vec![];

    let summary = TrainingLoop {
        model: &mut model,
        dataset: &dataset,
        optimizer: &mut optimizer,
        lr_scheduler: LrScheduler::new(1e-2, 0.1, &[1])?.display_factor(0.1),
        triplet_loss: TripletLossInit::default().build()?,
        event_logger: EventLogger::disabled(),
        device: Device::Cpu,
        negative_detection_loss: false,
        rng: StdRng::seed_from_u64(0),
    }
    .run(0..2, |epoch| {
        finished_epochs.push(epoch);
        Ok(())
    })?;

    // identity 1 has 2 galleries and identity 2 has 1, each visited twice;
    // identity 4 has no gallery and takes no step
    assert_eq!(summary.num_steps, 12);
    assert!(summary.average_loss.is_finite() && summary.average_loss > 0.0);
    assert_abs_diff_eq!(summary.lr, 1e-3, epsilon = 1e-12);
    assert_abs_diff_eq!(summary.display_lr, 1e-4, epsilon = 1e-12);
    assert_eq!(finished_epochs, vec![0, 1]);

    // the single-image identity is still visited in every epoch
    let queries = dataset.query_calls.borrow();
    assert_eq!(queries.len(), 6);
    let single: Vec<_> = queries.iter().filter(|(_, pid)| *pid == 4).collect();
    assert_eq!(single.len(), 2);
    assert!(single.iter().all(|(name, _)| name == "f"));
    assert!(queries.iter().all(|(_, pid)| *pid != 3));

    // galleries are visited flipped first, then in the same order unflipped
    let calls = dataset.gallery_calls.borrow();
    assert_eq!(calls.len(), 12);
    for identity_calls in [&calls[0..4], &calls[4..6], &calls[6..10], &calls[10..12]] {
        let half = identity_calls.len() / 2;
        let (flipped, unflipped) = identity_calls.split_at(half);
        assert!(flipped.iter().all(|(_, flip)| *flip));
        assert!(unflipped.iter().all(|(_, flip)| !*flip));
        let names = |calls: &[(String, bool)]| -> Vec<String> {
            calls.iter().map(|(name, _)| name.clone()).collect()
        };
        assert_eq!(names(flipped), names(unflipped));
    }

    // the query image is never a gallery of the same identity
    let first_names: HashSet<_> = calls[0..4].iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(first_names.len(), 2);
    assert!(first_names.iter().all(|name| ["a", "b", "c"].contains(name)));
    let second_names: HashSet<_> = calls[4..6].iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(second_names.len(), 1);
    assert!(second_names.iter().all(|name| ["c", "d"].contains(name)));

    // negatives exclude every image of the trained identity
    let excludes = dataset.negative_excludes.borrow();
    assert_eq!(excludes.len(), 12);
    let identity_1: HashSet<String> = ["a", "b", "c"].map(String::from).into();
    let identity_2: HashSet<String> = ["c", "d"].map(String::from).into();
    assert!(excludes[0..4].iter().all(|exclude| *exclude == identity_1));
    assert!(excludes[4..6].iter().all(|exclude| *exclude == identity_2));

    // parameters are updated
    let weight_diff = f64::from(&(&model.embed.ws - &init_weight).abs().sum(Kind::Float));
    assert!(weight_diff > 0.0);

    Ok(())
}

#[test]
fn mismatched_identity_count_is_rejected() -> Result<()> {
    struct OtherModel(MockModel);

    impl PersonSearchModel for OtherModel {
        fn num_pid(&self) -> i64 {
            NUM_PID + 1
        }

        fn query_forward(&mut self, sample: &QuerySample) -> Result<Tensor> {
            self.0.query_forward(sample)
        }

        fn detection_forward(&mut self, sample: &GallerySample) -> Result<DetectionOutput> {
            self.0.detection_forward(sample)
        }
    }

    let vs = nn::VarStore::new(Device::Cpu);
    let mut model = OtherModel(MockModel::new(&vs.root()));
    let dataset = MockDataset::new();
    let mut optimizer = nn::Sgd::default().build(&vs, 1e-2)?;

    let result = TrainingLoop {
        model: &mut model,
        dataset: &dataset,
        optimizer: &mut optimizer,
        lr_scheduler: LrScheduler::new(1e-2, 0.1, &[])?,
        triplet_loss: TripletLossInit::default().build()?,
        event_logger: EventLogger::disabled(),
        device: Device::Cpu,
        negative_detection_loss: true,
        rng: StdRng::seed_from_u64(0),
    }
    .run(0..1, |_| Ok(()));
    assert!(result.is_err());
    assert!(dataset.gallery_calls.borrow().is_empty());

    Ok(())
}

fn run_with_detection_loss(negative_detection_loss: bool) -> Result<TrainingSummary> {
    tch::manual_seed(0);
    let vs = nn::VarStore::new(Device::Cpu);
    let mut model = MockModel::with_detection_loss(&vs.root(), 0.25);
    let dataset = MockDataset::new();
    let mut optimizer = nn::Sgd::default().build(&vs, 1e-2)?;

    TrainingLoop {
        model: &mut model,
        dataset: &dataset,
        optimizer: &mut optimizer,
        lr_scheduler: LrScheduler::new(1e-2, 0.1, &[])?,
        triplet_loss: TripletLossInit::default().build()?,
        event_logger: EventLogger::disabled(),
        device: Device::Cpu,
        negative_detection_loss,
        rng: StdRng::seed_from_u64(0),
    }
    .run(0..1, |_| Ok(()))
}

#[test]
fn negative_detection_losses_are_added_on_request() -> Result<()> {
    let without = run_with_detection_loss(false)?;
    let with = run_with_detection_loss(true)?;
    assert_eq!(without.num_steps, 6);
    assert_eq!(with.num_steps, 6);

    // constant detection terms carry no gradient, so both runs follow the
    // same parameters and differ by the four negative terms of 0.25 each
    assert_abs_diff_eq!(with.average_loss - without.average_loss, 1.0, epsilon = 1e-4);

    Ok(())
}

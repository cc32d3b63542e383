//! The episodic training loop.

use crate::{
    common::*,
    logging::{EventLogger, StepLog},
    utils::LrScheduler,
};
use sipn::{
    dataset::{EpisodicDataset, GallerySample, QuerySample},
    loss::TripletLoss,
    model::PersonSearchModel,
};

/// Statistics of a finished training run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingSummary {
    /// The number of optimization steps.
    pub num_steps: usize,
    /// The mean total loss over all steps.
    pub average_loss: f64,
    /// The optimizer learning rate of the last epoch.
    pub lr: f64,
    /// The displayed learning rate of the last epoch.
    pub display_lr: f64,
}

/// Trains a person search model identity by identity.
///
/// For every identity one of its images becomes the query and the others
/// become galleries, visited flipped first and then unflipped. Each gallery
/// image is paired with a random negative image that does not contain the
/// identity, and one optimization step is taken on the sum of the detection
/// losses and the triplet loss.
pub struct TrainingLoop<'a, M, D>
where
    M: PersonSearchModel,
    D: EpisodicDataset,
{
    pub model: &'a mut M,
    pub dataset: &'a D,
    pub optimizer: &'a mut nn::Optimizer,
    pub lr_scheduler: LrScheduler,
    pub triplet_loss: TripletLoss,
    pub event_logger: EventLogger,
    pub device: Device,
    /// If set, detection losses of negative images are added to the total loss.
    pub negative_detection_loss: bool,
    pub rng: StdRng,
}

#[derive(Debug, Default)]
struct RunningLoss {
    sum: f64,
    count: usize,
}

impl RunningLoss {
    fn add(&mut self, loss: f64) {
        self.sum += loss;
        self.count += 1;
    }

    fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

impl<'a, M, D> TrainingLoop<'a, M, D>
where
    M: PersonSearchModel,
    D: EpisodicDataset,
{
    /// Runs the given epochs. `on_epoch_end` receives the 0-based index of
    /// each finished epoch.
    pub fn run<F>(mut self, epochs: Range<usize>, mut on_epoch_end: F) -> Result<TrainingSummary>
    where
        F: FnMut(usize) -> Result<()>,
    {
        let num_pid = self.model.num_pid();
        ensure!(
            num_pid == self.dataset.num_pid(),
            "the model expects {} identities, but the dataset has {}",
            num_pid,
            self.dataset.num_pid()
        );

        info!("start training");
        let train_start = Instant::now();
        let mut running_loss = RunningLoss::default();
        let mut num_persons = 0usize;

        for epoch in epochs {
            let epoch_start = Instant::now();
            let lr = self.lr_scheduler.start_epoch(epoch);
            self.optimizer.set_lr(lr);
            let display_lr = self.lr_scheduler.display_lr();

            for pid in 1..num_pid {
                let image_names = self.dataset.image_names(pid);
                if image_names.is_empty() {
                    warn!("identity {} has no image, skip it", pid);
                    continue;
                }

                let last_step = self.train_identity(pid, &image_names, &mut running_loss)?;
                num_persons += 1;

                info!(
                    "epoch {:2}, person {:4}/{:4}, average loss: {:.6}, lr: {:.2e}",
                    epoch + 1,
                    pid + 1,
                    num_pid,
                    running_loss.average(),
                    display_lr
                );
                if let Some(StepLog {
                    rpn_cls,
                    rpn_box,
                    cls,
                    bbox,
                    reid,
                    ..
                }) = last_step
                {
                    info!(
                        "rpn_cls: {:.6}, rpn_box: {:.6}, cls: {:.6}, box: {:.6}, reid: {:.6}",
                        rpn_cls, rpn_box, cls, bbox, reid
                    );
                }
                info!(
                    "time cost: {:.3}s/person",
                    train_start.elapsed().as_secs_f64() / num_persons as f64
                );
            }

            info!(
                "entire epoch time cost: {:.2} hours",
                epoch_start.elapsed().as_secs_f64() / 3600.0
            );
            self.event_logger.flush()?;
            on_epoch_end(epoch)?;
        }

        Ok(TrainingSummary {
            num_steps: running_loss.count,
            average_loss: running_loss.average(),
            lr: self.lr_scheduler.lr(),
            display_lr: self.lr_scheduler.display_lr(),
        })
    }

    /// Takes one step per gallery image of an identity and returns the
    /// losses of the last step.
    fn train_identity(
        &mut self,
        pid: i64,
        image_names: &[String],
        running_loss: &mut RunningLoss,
    ) -> Result<Option<StepLog>> {
        let query_name = image_names
            .choose(&mut self.rng)
            .ok_or_else(|| format_err!("identity {} has no image", pid))?;
        let query = self
            .dataset
            .query_sample(query_name, pid)?
            .to_device(self.device);

        let gallery_names: Vec<&String> = image_names
            .iter()
            .filter(|&name| name != query_name)
            .collect();
        let exclude: HashSet<String> = image_names.iter().cloned().collect();

        let mut last_step = None;

        for (flipped, gallery_name) in [true, false]
            .into_iter()
            .flat_map(|flipped| gallery_names.iter().map(move |&name| (flipped, name)))
        {
            let gallery = self
                .dataset
                .gallery_sample(gallery_name, flipped)?
                .to_device(self.device);
            let negative = self
                .dataset
                .negative_sample(&exclude, &mut self.rng)?
                .to_device(self.device);

            let step_log = self.train_step(pid, &query, &gallery, &negative, running_loss)?;
            last_step = Some(step_log);
        }

        Ok(last_step)
    }

    fn train_step(
        &mut self,
        pid: i64,
        query: &QuerySample,
        gallery: &GallerySample,
        negative: &GallerySample,
        running_loss: &mut RunningLoss,
    ) -> Result<StepLog> {
        let num_pid = self.model.num_pid();

        // the query graph is consumed by each backward pass
        let query_feature = self.model.query_forward(query)?;

        let output = self.model.detection_forward(gallery)?;
        let (pos_labels, pos_features) = output.drop_unlabeled(num_pid);

        let negative_output = self.model.detection_forward(negative)?;
        let (neg_labels, neg_features) = negative_output.drop_unlabeled(num_pid);

        let labels = Tensor::cat(&[pos_labels, neg_labels], 0);
        let features = Tensor::cat(&[pos_features, neg_features], 0);
        let reid_loss = self
            .triplet_loss
            .forward(&query_feature, pid, &features, &labels);

        let losses = &output.losses;
        let mut total_loss = losses.total() + &reid_loss;
        if self.negative_detection_loss {
            total_loss += negative_output.losses.total();
        }

        self.optimizer.backward_step(&total_loss);

        let total = f64::from(&total_loss);
        running_loss.add(total);

        let step_log = StepLog {
            rpn_cls: f64::from(&losses.rpn_cls),
            rpn_box: f64::from(&losses.rpn_box),
            cls: f64::from(&losses.cls),
            bbox: f64::from(&losses.bbox),
            reid: f64::from(&reid_loss),
            total,
            average: running_loss.average(),
            lr: self.lr_scheduler.display_lr(),
        };
        self.event_logger
            .log_step(running_loss.count as i64, &step_log)?;

        Ok(step_log)
    }
}

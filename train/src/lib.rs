//! The training program of the SIPN person search model.

pub mod args;
pub mod common;
pub mod config;
pub mod logging;
pub mod train;
pub mod utils;

use crate::{
    args::Args,
    common::*,
    config::Config,
    logging::EventLogger,
    train::TrainingLoop,
};
use sipn::{
    dataset::{EpisodicDataset, PersonSearchDataset},
    loss::TripletLossInit,
    model::Sipn,
};

/// The entry of training program.
pub fn start(args: Args, config: Config) -> Result<()> {
    let Args {
        net,
        epochs,
        ref gpu_ids,
        ref data_dir,
        lr,
        optimizer: optimizer_kind,
        ref out_dir,
        ref pre_model,
        ref resume,
        ..
    } = args;

    let device = utils::select_device(gpu_ids, tch::Cuda::is_available())?;
    info!("use device {:?}", device);
    tch::manual_seed(config.seed as i64);

    // create dirs and save config
    {
        fs::create_dir_all(out_dir).with_context(|| {
            format!("failed to create output directory '{}'", out_dir.display())
        })?;
        let out_dir_abs = out_dir
            .canonicalize()
            .with_context(|| format!("failed to resolve '{}'", out_dir.display()))?;
        info!("trained models will be saved to '{}'", out_dir_abs.display());

        let path = out_dir.join("config.json");
        let text = serde_json::to_string_pretty(&serde_json::json!({
            "args": &args,
            "config": &config,
        }))?;
        fs::write(&path, text)
            .with_context(|| format!("failed to write '{}'", path.display()))?;
    }

    // load dataset
    info!("loading dataset");
    let dataset = PersonSearchDataset::load(data_dir, &config.dataset)?;

    // init model
    info!("initializing model");
    let mut vs = nn::VarStore::new(device);
    let mut model = Sipn::new(
        &vs.root(),
        net,
        dataset.num_pid(),
        &config.model,
        config.seed,
    )?;

    if !pre_model.as_os_str().is_empty() {
        utils::load_pretrained(&mut vs, pre_model)?;
    }
    let start_epoch = match resume {
        Some(resume) => utils::resume_checkpoint(&mut vs, out_dir, resume)?,
        None => 0,
    };

    // choose parameters to be updated
    utils::freeze_parameters(&vs, &config.frozen_prefixes);
    info!("these parameters will be updated during training:");
    for name in utils::trainable_parameters(&vs) {
        info!("{}", name);
    }

    let mut optimizer = utils::build_optimizer(&vs, optimizer_kind, lr, &config)?;
    let lr_scheduler = utils::LrScheduler::new(lr, config.gamma.raw(), &config.decay_epochs)?
        .display_factor(utils::display_lr_factor(optimizer_kind, &config))
        .replay(start_epoch);

    let triplet_loss = TripletLossInit {
        margin: config.triplet.margin.raw(),
        mining: config.triplet.mining,
    }
    .build()?;
    let event_logger = if config.tensorboard {
        EventLogger::new(out_dir)?
    } else {
        EventLogger::disabled()
    };

    // training
    let summary = TrainingLoop {
        model: &mut model,
        dataset: &dataset,
        optimizer: &mut optimizer,
        lr_scheduler,
        triplet_loss,
        event_logger,
        device,
        negative_detection_loss: config.negative_detection_loss,
        rng: StdRng::seed_from_u64(config.seed.wrapping_add(1)),
    }
    .run(start_epoch..epochs, |epoch| {
        utils::save_checkpoint(&vs, out_dir, epoch + 1)?;
        Ok(())
    })?;

    info!(
        "finished {} steps with average loss {:.6}",
        summary.num_steps, summary.average_loss
    );

    Ok(())
}

use crate::{args::OptimizerKind, common::*, config::Config};

/// Builds the optimizer over trainable parameters of the variable store.
pub fn build_optimizer(
    vs: &nn::VarStore,
    kind: OptimizerKind,
    lr: f64,
    config: &Config,
) -> Result<nn::Optimizer> {
    let wd = config.weight_decay.raw();

    let optimizer = match kind {
        OptimizerKind::Sgd => nn::Sgd {
            momentum: config.momentum.raw(),
            dampening: 0.0,
            wd,
            nesterov: false,
        }
        .build(vs, lr)?,
        OptimizerKind::Adam => nn::Adam {
            beta1: 0.9,
            beta2: 0.999,
            wd,
        }
        .build(vs, lr)?,
    };

    Ok(optimizer)
}

/// The factor between the displayed learning rate and the optimizer
/// learning rate. Adam trains at the given rate but reports it scaled by
/// `adam_lr_factor`.
pub fn display_lr_factor(kind: OptimizerKind, config: &Config) -> f64 {
    match kind {
        OptimizerKind::Sgd => 1.0,
        OptimizerKind::Adam => config.adam_lr_factor.raw(),
    }
}

/// Stops gradient computation on parameters whose names start with any of `prefixes`.
pub fn freeze_parameters(vs: &nn::VarStore, prefixes: &[String]) {
    vs.variables()
        .into_iter()
        .filter(|(name, _)| prefixes.iter().any(|prefix| name.starts_with(prefix.as_str())))
        .for_each(|(name, tensor)| {
            info!("freeze parameter {}", name);
            let _ = tensor.set_requires_grad(false);
        });
}

/// Lists the names of parameters that receive gradients, sorted by name.
pub fn trainable_parameters(vs: &nn::VarStore) -> Vec<String> {
    vs.variables()
        .into_iter()
        .filter(|(_, tensor)| tensor.requires_grad())
        .map(|(name, _)| name)
        .sorted()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::LrScheduler;

    #[test]
    fn frozen_parameters_are_not_listed() {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();
        let _conv1 = nn::linear(&root / "conv1", 2, 2, Default::default());
        let _layer1 = nn::linear(&root / "layer1" / 0, 2, 2, Default::default());
        let _layer2 = nn::linear(&root / "layer2" / 0, 2, 2, Default::default());
        let _stat = root.zeros_no_train("running_mean", &[2]);

        freeze_parameters(&vs, &["conv1".into(), "layer1".into()]);
        assert_eq!(
            trainable_parameters(&vs),
            vec!["layer2.0.bias", "layer2.0.weight"]
        );
    }

    #[test]
    fn adam_scales_displayed_lr_only() -> Result<()> {
        let config: Config = serde_yaml::from_str("gamma: 0.1\nadam_lr_factor: 0.1\n")?;
        assert_eq!(display_lr_factor(OptimizerKind::Sgd, &config), 1.0);
        assert_eq!(display_lr_factor(OptimizerKind::Adam, &config), 0.1);

        let scheduler = LrScheduler::new(1e-5, config.gamma.raw(), &config.decay_epochs)?
            .display_factor(display_lr_factor(OptimizerKind::Adam, &config));
        assert_eq!(scheduler.lr(), 1e-5);
        assert!((scheduler.display_lr() - 1e-6).abs() < 1e-15);
        Ok(())
    }
}

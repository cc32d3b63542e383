//! Command line arguments.

use crate::common::*;
use sipn::model::ResNetKind;

#[derive(Debug, Clone, StructOpt, Serialize)]
/// Train the spatial invariant person search network
pub struct Args {
    #[structopt(long, default_value = "res50")]
    /// backbone network, one of res18, res34, res50 and res101
    pub net: ResNetKind,
    #[structopt(long, default_value = "10")]
    /// number of training epochs
    pub epochs: usize,
    #[structopt(long = "gpu_ids", default_value = "0")]
    /// comma separated GPU ids, -1 for CPU
    pub gpu_ids: String,
    #[structopt(long = "data_dir", default_value = "")]
    /// dataset directory
    pub data_dir: PathBuf,
    #[structopt(long, default_value = "0.00001")]
    /// initial learning rate
    pub lr: f64,
    #[structopt(long, default_value = "SGD")]
    /// optimizer, SGD or Adam
    pub optimizer: OptimizerKind,
    #[structopt(long = "out_dir", default_value = "./output")]
    /// directory to save checkpoints
    pub out_dir: PathBuf,
    #[structopt(long = "pre_model", default_value = "")]
    /// pretrained backbone weights in libtorch format
    pub pre_model: PathBuf,
    #[structopt(long, default_value = "config.yml")]
    /// configuration file in YAML or JSON5 format
    pub config: PathBuf,
    #[structopt(long)]
    /// checkpoint file to resume from, or "recent" for the latest one in out_dir
    pub resume: Option<Resume>,
}

/// The optimizer choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerKind {
    #[serde(rename = "SGD")]
    Sgd,
    Adam,
}

impl FromStr for OptimizerKind {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let kind = match text {
            "SGD" => Self::Sgd,
            "Adam" => Self::Adam,
            _ => bail!("unknown optimizer '{}'", text),
        };
        Ok(kind)
    }
}

/// Checkpoint resuming method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resume {
    /// Load the checkpoint with the largest epoch in the output directory.
    Recent,
    /// Load the checkpoint file at specified path.
    File(PathBuf),
}

impl FromStr for Resume {
    type Err = Infallible;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Ok(match text {
            "recent" => Self::Recent,
            path => Self::File(path.into()),
        })
    }
}

use crate::{args::Resume, common::*};

pub const FILE_STRFTIME: &str = "%Y-%m-%d-%H-%M-%S.%3f%z";

const CHECKPOINT_PATTERN: &str = r"^sipn_(\d+)\.ckpt$";

/// The checkpoint file name of a finished epoch counted from 1.
pub fn checkpoint_file_name(epoch: usize) -> String {
    format!("sipn_{}.ckpt", epoch)
}

/// Extracts the finished epoch from a checkpoint file name.
pub fn checkpoint_epoch(path: &Path) -> Option<usize> {
    let regex = Regex::new(CHECKPOINT_PATTERN).ok()?;
    let file_name = path.file_name()?.to_str()?;
    let captures = regex.captures(file_name)?;
    captures.get(1)?.as_str().parse().ok()
}

/// Save parameters to a checkpoint file.
pub fn save_checkpoint(vs: &nn::VarStore, checkpoint_dir: &Path, epoch: usize) -> Result<PathBuf> {
    let path = checkpoint_dir.join(checkpoint_file_name(epoch));
    vs.save(&path)
        .with_context(|| format!("failed to save checkpoint '{}'", path.display()))?;
    info!("saved checkpoint {}", path.display());
    Ok(path)
}

/// Finds the checkpoint with the largest epoch in a directory.
pub fn find_recent_checkpoint(checkpoint_dir: &Path) -> Result<Option<(PathBuf, usize)>> {
    let pattern = format!("{}/sipn_*.ckpt", checkpoint_dir.display());
    let paths: Vec<PathBuf> = glob::glob(&pattern)?.try_collect()?;

    let recent = paths
        .into_iter()
        .filter_map(|path| {
            let epoch = checkpoint_epoch(&path)?;
            Some((path, epoch))
        })
        .max_by_key(|(_path, epoch)| *epoch);
    Ok(recent)
}

/// Loads parameters with the specified resuming method and returns the
/// epoch to start training from.
pub fn resume_checkpoint(
    vs: &mut nn::VarStore,
    checkpoint_dir: &Path,
    resume: &Resume,
) -> Result<usize> {
    let (path, epoch) = match resume {
        Resume::Recent => match find_recent_checkpoint(checkpoint_dir)? {
            Some(found) => found,
            None => {
                warn!(
                    "no checkpoint file found in '{}'",
                    checkpoint_dir.display()
                );
                return Ok(0);
            }
        },
        Resume::File(file) => {
            ensure!(file.is_file(), "'{}' is not a file", file.display());
            let epoch = checkpoint_epoch(file).unwrap_or_else(|| {
                warn!(
                    "unable to infer the epoch from '{}', start from the first epoch",
                    file.display()
                );
                0
            });
            (file.to_owned(), epoch)
        }
    };

    info!("load checkpoint file {}", path.display());
    vs.load(&path)
        .with_context(|| format!("failed to load checkpoint '{}'", path.display()))?;

    Ok(epoch)
}

/// Loads pretrained weights whose names match the model.
pub fn load_pretrained(vs: &mut nn::VarStore, path: &Path) -> Result<()> {
    info!("load pretrained weights {}", path.display());
    let missing = vs
        .load_partial(path)
        .with_context(|| format!("failed to load pretrained weights '{}'", path.display()))?;
    if !missing.is_empty() {
        warn!(
            "{} parameters are not found in pretrained weights",
            missing.len()
        );
    }
    Ok(())
}

use crate::common::*;

/// Parses comma separated GPU ids.
pub fn parse_gpu_ids(text: &str) -> Result<Vec<i64>> {
    text.split(',')
        .map(|id| {
            let id = id.trim();
            id.parse::<i64>()
                .with_context(|| format!("invalid GPU id '{}'", id))
        })
        .try_collect()
}

/// Chooses the training device from GPU ids.
///
/// CUDA is used only if it is available and no id is -1. The first
/// non-negative id becomes the device.
pub fn select_device(gpu_ids: &str, cuda_available: bool) -> Result<Device> {
    let ids = parse_gpu_ids(gpu_ids)?;

    if !cuda_available || ids.contains(&-1) {
        return Ok(Device::Cpu);
    }

    let index = ids.iter().find(|&&id| id >= 0).copied().unwrap_or(0);
    Ok(Device::Cuda(index as usize))
}

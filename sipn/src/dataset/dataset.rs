use super::{GallerySample, QuerySample};
use crate::common::*;

/// The dataset that serves identity-centric training episodes.
pub trait EpisodicDataset {
    /// The number of identity labels. It is also the label of unlabeled persons.
    fn num_pid(&self) -> i64;

    /// The names of images where the identity appears.
    fn image_names(&self, pid: i64) -> Vec<String>;

    /// Loads an image as a query for the identity.
    fn query_sample(&self, image_name: &str, pid: i64) -> Result<QuerySample>;

    /// Loads an image with all its boxes, optionally flipped horizontally.
    fn gallery_sample(&self, image_name: &str, flipped: bool) -> Result<GallerySample>;

    /// Loads a random image whose name is not in `exclude`.
    fn negative_sample(
        &self,
        exclude: &HashSet<String>,
        rng: &mut StdRng,
    ) -> Result<GallerySample>;
}

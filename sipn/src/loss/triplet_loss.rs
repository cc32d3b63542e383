//! Triplet loss between a query embedding and labeled proposal embeddings.

use super::zero_loss;
use crate::common::*;

/// The way to pick positive and negative pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripletMining {
    /// Use the farthest positive and the closest negative.
    Hard,
    /// Average over every positive-negative pair.
    All,
}

impl Default for TripletMining {
    fn default() -> Self {
        Self::Hard
    }
}

#[derive(Debug, Clone)]
pub struct TripletLossInit {
    pub margin: f64,
    pub mining: TripletMining,
}

impl Default for TripletLossInit {
    fn default() -> Self {
        Self {
            margin: 0.2,
            mining: TripletMining::Hard,
        }
    }
}

impl TripletLossInit {
    pub fn build(self) -> Result<TripletLoss> {
        let Self { margin, mining } = self;
        ensure!(margin >= 0.0, "margin must be non-negative");
        Ok(TripletLoss { margin, mining })
    }
}

#[derive(Debug)]
pub struct TripletLoss {
    margin: f64,
    mining: TripletMining,
}

impl TripletLoss {
    /// Computes the loss of a `[1, D]` query embedding of identity `pid`
    /// against `[N, D]` embeddings labeled by `[N]` identities.
    pub fn forward(&self, query: &Tensor, pid: i64, features: &Tensor, labels: &Tensor) -> Tensor {
        let Self { margin, mining } = *self;
        let device = query.device();

        let query = query.view([1, -1]);
        let diff = features - &query;
        let distances = (&diff * &diff)
            .sum_dim_intlist(&[1], false, Kind::Float)
            .clamp_min(1e-12)
            .sqrt();

        let labels = labels.view([-1]);
        let pos_distances = distances.masked_select(&labels.eq(pid));
        let neg_distances = distances.masked_select(&labels.ne(pid));

        if pos_distances.numel() == 0 || neg_distances.numel() == 0 {
            return zero_loss(device);
        }

        match mining {
            TripletMining::Hard => (pos_distances.max() - neg_distances.min() + margin).relu(),
            TripletMining::All => (pos_distances.unsqueeze(1) - neg_distances.unsqueeze(0) + margin)
                .relu()
                .mean(Kind::Float),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn fixture() -> (Tensor, Tensor, Tensor) {
        let query = Tensor::of_slice(&[0f32, 0.0]).view([1, 2]);
        let features = Tensor::of_slice(&[
            1f32, 0.0, // positive, distance 1
            3.0, 0.0, // positive, distance 3
            0.0, 2.0, // negative, distance 2
            0.0, 5.0, // negative, distance 5
        ])
        .view([4, 2]);
        let labels = Tensor::of_slice(&[7i64, 7, 4, 9]);
        (query, features, labels)
    }

    #[test]
    fn hard_mining() -> Result<()> {
        let (query, features, labels) = fixture();
        let loss_fn = TripletLossInit::default().build()?;
        let loss = f64::from(&loss_fn.forward(&query, 7, &features, &labels));
        assert_abs_diff_eq!(loss, 1.2, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn all_pairs_mining() -> Result<()> {
        let (query, features, labels) = fixture();
        let loss_fn = TripletLossInit {
            mining: TripletMining::All,
            ..Default::default()
        }
        .build()?;
        let loss = f64::from(&loss_fn.forward(&query, 7, &features, &labels));
        assert_abs_diff_eq!(loss, 0.3, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn missing_positives_yield_zero() -> Result<()> {
        let (query, features, labels) = fixture();
        let loss_fn = TripletLossInit::default().build()?;
        let loss = loss_fn.forward(&query, 1, &features, &labels);
        assert_eq!(f64::from(&loss), 0.0);
        assert!(!loss.requires_grad());
        Ok(())
    }

    #[test]
    fn negative_margin_is_rejected() {
        let result = TripletLossInit {
            margin: -1.0,
            ..Default::default()
        }
        .build();
        assert!(result.is_err());
    }
}

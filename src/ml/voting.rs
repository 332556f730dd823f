use super::Classifier;

/// Averages the class probabilities of its members.
pub struct SoftVoting<'a> {
    members: Vec<&'a dyn Classifier>,
}

impl<'a> SoftVoting<'a> {
    pub fn new(members: Vec<&'a dyn Classifier>) -> Self {
        Self { members }
    }
}

impl Classifier for SoftVoting<'_> {
    fn n_classes(&self) -> usize {
        self.members.first().map_or(0, |m| m.n_classes())
    }

    fn n_features(&self) -> usize {
        self.members.first().map_or(0, |m| m.n_features())
    }

    fn predict_proba(&self, row: &[f64]) -> Vec<f64> {
        let mut proba = vec![0.0; self.n_classes()];
        for member in &self.members {
            for (slot, p) in proba.iter_mut().zip(member.predict_proba(row)) {
                *slot += p;
            }
        }
        let n = self.members.len().max(1) as f64;
        proba.iter_mut().for_each(|p| *p /= n);
        proba
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<f64>);

    impl Classifier for Fixed {
        fn n_classes(&self) -> usize {
            self.0.len()
        }

        fn n_features(&self) -> usize {
            1
        }

        fn predict_proba(&self, _row: &[f64]) -> Vec<f64> {
            self.0.clone()
        }
    }

    #[test]
    fn soft_vote_averages_members() {
        let a = Fixed(vec![0.8, 0.2]);
        let b = Fixed(vec![0.2, 0.8]);
        let c = Fixed(vec![0.5, 0.5]);
        let voting = SoftVoting::new(vec![&a, &b]);
        assert_eq!(voting.predict_proba(&[0.0]), vec![0.5, 0.5]);

        let voting = SoftVoting::new(vec![&a, &c]);
        let proba = voting.predict_proba(&[0.0]);
        assert!((proba[0] - 0.65).abs() < 1e-12);
        assert_eq!(voting.predict(&[0.0]), 0);
    }
}

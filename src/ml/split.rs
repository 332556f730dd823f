use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

fn shuffled_by_class(labels: &[usize], seed: u64) -> Vec<Vec<usize>> {
    let n_classes = labels.iter().max().map_or(0, |m| m + 1);
    let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); n_classes];
    for (i, &label) in labels.iter().enumerate() {
        by_class[label].push(i);
    }
    let mut rng = StdRng::seed_from_u64(seed);
    for members in &mut by_class {
        members.shuffle(&mut rng);
    }
    by_class
}

/// Stratified holdout split; returns sorted `(train, test)` row indices.
///
/// Each class contributes `round(count * test_fraction)` rows to the test side, keeping at
/// least one row of every class for training.
pub fn stratified_split(labels: &[usize], test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut train = Vec::new();
    let mut test = Vec::new();
    for members in shuffled_by_class(labels, seed) {
        let wanted = (members.len() as f64 * test_fraction).round() as usize;
        let take = wanted.min(members.len().saturating_sub(1));
        test.extend_from_slice(&members[..take]);
        train.extend_from_slice(&members[take..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

/// Stratified k-fold assignment; returns `(train, validation)` index pairs per fold.
pub fn stratified_folds(labels: &[usize], k: usize, seed: u64) -> Vec<(Vec<usize>, Vec<usize>)> {
    let k = k.max(2);
    let mut fold_of = vec![0usize; labels.len()];
    let mut next = 0;
    for members in shuffled_by_class(labels, seed) {
        for i in members {
            fold_of[i] = next % k;
            next += 1;
        }
    }
    (0..k)
        .map(|fold| {
            let (validation, train): (Vec<usize>, Vec<usize>) =
                (0..labels.len()).partition(|&i| fold_of[i] == fold);
            (train, validation)
        })
        .filter(|(train, validation)| !train.is_empty() && !validation.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_is_stratified_and_deterministic() {
        let labels: Vec<usize> = (0..100).map(|i| usize::from(i % 4 == 0)).collect();
        let (train, test) = stratified_split(&labels, 0.2, 42);

        assert_eq!(train.len() + test.len(), 100);
        assert_eq!(test.len(), 20);
        let test_positives = test.iter().filter(|&&i| labels[i] == 1).count();
        assert_eq!(test_positives, 5);
        assert_eq!(stratified_split(&labels, 0.2, 42), (train, test));
    }

    #[test]
    fn singleton_class_stays_in_training() {
        let labels = vec![0, 0, 0, 0, 1];
        let (train, test) = stratified_split(&labels, 0.5, 1);
        assert!(train.contains(&4));
        assert!(!test.contains(&4));
    }

    #[test]
    fn folds_cover_every_row_once() {
        let labels: Vec<usize> = (0..30).map(|i| i % 3).collect();
        let folds = stratified_folds(&labels, 5, 7);
        assert_eq!(folds.len(), 5);
        let mut seen: Vec<usize> = folds.iter().flat_map(|(_, v)| v.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..30).collect::<Vec<_>>());
        for (train, validation) in &folds {
            assert_eq!(train.len() + validation.len(), 30);
        }
    }
}

use num_traits::Float;

/// Minimum and maximum of the finite values, or `None` if there are none.
pub fn finite_min_max<T: Float>(values: impl IntoIterator<Item = T>) -> Option<(T, T)> {
    values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Median of the finite values, averaging the two central values for even counts.
pub fn finite_median<T: Float>(values: impl IntoIterator<Item = T>) -> Option<T> {
    let mut finite: Vec<T> = values.into_iter().filter(|v| v.is_finite()).collect();
    median_in_place(&mut finite)
}

/// Median of a slice, reordering it. `None` for an empty slice.
pub fn median_in_place<T: Float>(values: &mut [T]) -> Option<T> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    let cmp = |a: &T, b: &T| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal);
    let (_, upper, _) = values.select_nth_unstable_by(n / 2, cmp);
    let upper = *upper;
    if n % 2 == 1 {
        return Some(upper);
    }
    let lower = values[..n / 2]
        .iter()
        .copied()
        .fold(T::neg_infinity(), T::max);
    Some((lower + upper) / (T::one() + T::one()))
}

/// Mean and population standard deviation.
pub fn mean_stddev(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    if n == 0.0 {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

//! Descriptive statistics over small sample windows
//!
//! All helpers return 0 for inputs too small to be meaningful instead of NaN.

/// Arithmetic mean; 0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance; 0 for fewer than two values
pub fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Coefficient of variation (std / mean); 0 when the mean is not positive
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    let m = mean(values);
    if m <= 0.0 {
        return 0.0;
    }
    std_dev(values) / m
}

/// Shannon entropy (base 2) of a histogram with `bucket`-wide bins
///
/// Formula: values are binned as `round(v / bucket)`, then `-Σ p·log2(p)`.
pub fn entropy(values: &[f64], bucket: f64) -> f64 {
    if values.is_empty() || bucket <= 0.0 {
        return 0.0;
    }
    let mut bins: Vec<i64> = values.iter().map(|v| (v / bucket).round() as i64).collect();
    bins.sort_unstable();

    let total = values.len() as f64;
    let mut h = 0.0;
    let mut start = 0;
    while start < bins.len() {
        let end = bins[start..]
            .iter()
            .position(|b| *b != bins[start])
            .map_or(bins.len(), |offset| start + offset);
        let p = (end - start) as f64 / total;
        h -= p * p.log2();
        start = end;
    }
    h
}

/// Gaps between consecutive timestamps
pub fn gaps(timestamps: &[i64]) -> Vec<f64> {
    timestamps.windows(2).map(|w| (w[1] - w[0]) as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_variance() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&values) - 5.0).abs() < 1e-9);
        assert!((variance(&values) - 4.0).abs() < 1e-9);
        assert!((std_dev(&values) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(variance(&[42.0]), 0.0);
        assert_eq!(coefficient_of_variation(&[]), 0.0);
        assert_eq!(entropy(&[], 10.0), 0.0);
    }

    #[test]
    fn test_constant_latencies_have_zero_spread() {
        let latencies = [100.0, 100.0, 100.0, 100.0];
        assert_eq!(std_dev(&latencies), 0.0);
        assert_eq!(coefficient_of_variation(&latencies), 0.0);
        assert_eq!(entropy(&latencies, 10.0), 0.0);
    }

    #[test]
    fn test_entropy_of_two_equal_bins() {
        // 101 and 104 share the 100ms bucket; 148 and 151 share 150
        let h = entropy(&[101.0, 104.0, 148.0, 151.0], 10.0);
        assert!((h - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_gaps() {
        assert_eq!(gaps(&[0, 50, 150]), vec![50.0, 100.0]);
        assert!(gaps(&[7]).is_empty());
    }
}

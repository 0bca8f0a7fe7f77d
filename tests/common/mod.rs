//! Deterministic datasets shared by the integration tests

#![allow(dead_code)]

use chunksvm::Kernel;

/// Two overlapping 2D clusters centred at (±1.5, ±1.5), alternating labels
pub fn clusters(n: usize, spread: f64) -> (Vec<Vec<f64>>, Vec<f64>) {
    let mut points = Vec::with_capacity(n);
    let mut labels = Vec::with_capacity(n);
    for i in 0..n {
        let label = if i % 2 == 0 { 1.0 } else { -1.0 };
        let angle = i as f64 * 0.7;
        let radius = spread * (0.3 + 0.2 * (i % 5) as f64);
        points.push(vec![
            1.5 * label + radius * angle.cos(),
            1.5 * label + radius * angle.sin(),
        ]);
        labels.push(label);
    }
    (points, labels)
}

/// Σ_k alpha_k y_k K(i, k) recomputed from scratch
pub fn exact_gradient<K: Kernel + ?Sized>(kernel: &K, alpha: &[f64], labels: &[f64]) -> Vec<f64> {
    (0..alpha.len())
        .map(|i| {
            (0..alpha.len())
                .filter(|&k| alpha[k] != 0.0)
                .map(|k| alpha[k] * labels[k] * kernel.compute(i, k))
                .sum()
        })
        .collect()
}

pub fn assert_box_feasible(alpha: &[f64], cost: f64) {
    for (i, &a) in alpha.iter().enumerate() {
        assert!(a >= 0.0 && a <= cost, "alpha[{i}] = {a} outside [0, {cost}]");
    }
}

pub fn assert_gradient_consistent(gradient: &[f64], exact: &[f64]) {
    for (i, (g, e)) in gradient.iter().zip(exact).enumerate() {
        assert!(
            (g - e).abs() <= 1e-6 * (1.0 + e.abs()),
            "gradient[{i}] = {g}, recomputed {e}"
        );
    }
}

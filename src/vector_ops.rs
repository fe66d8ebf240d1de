use crate::config::{Number, EPSILON};
use wide::f32x8;

/// Squared Euclidean distance between two vectors of equal length, eight lanes
/// at a time. The summation order is fixed, so the same inputs always produce
/// the same bits.
pub fn squared_l2_distance_simd(a: &[Number], b: &[Number]) -> Number {
    debug_assert_eq!(a.len(), b.len());

    let mut sum = f32x8::splat(0.0);

    let a_lanes = a.chunks_exact(8);
    let b_lanes = b.chunks_exact(8);
    let a_tail = a_lanes.remainder();
    let b_tail = b_lanes.remainder();

    for (x, y) in a_lanes.zip(b_lanes) {
        let va = f32x8::new([x[0], x[1], x[2], x[3], x[4], x[5], x[6], x[7]]);
        let vb = f32x8::new([y[0], y[1], y[2], y[3], y[4], y[5], y[6], y[7]]);
        let diff = va - vb;
        sum += diff * diff;
    }

    let mut scalar_sum = sum.reduce_add();

    // Handle remaining elements
    for (x, y) in a_tail.iter().zip(b_tail) {
        let diff = x - y;
        scalar_sum += diff * diff;
    }

    scalar_sum
}

pub fn normalize_vector(vector: &mut [Number]) {
    let magnitude: Number = vector.iter().map(|&x| x * x).sum::<Number>().sqrt();
    if magnitude > EPSILON {
        for x in vector.iter_mut() {
            *x /= magnitude;
        }
    }
}

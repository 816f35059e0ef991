use itertools::izip;
use multiversion::multiversion;

#[multiversion(targets("x86_64+avx+avx2+fma", "x86+sse"))]
pub(crate) fn vector_dot(a: &[f64], b: &[f64]) -> f64 {
    assert!(a.len() == b.len());

    let head_length = a.len() - a.len() % 4;
    let (x, x_tail) = a.split_at(head_length);
    let (y, y_tail) = b.split_at(head_length);

    // Four independent accumulators so that the compiler can keep
    // them in one vector register.
    let mut acc = [0f64; 4];
    izip!(x.chunks_exact(4), y.chunks_exact(4)).for_each(|(x, y)| {
        for i in 0..4 {
            acc[i] += x[i] * y[i];
        }
    });

    let mut result = (acc[0] + acc[1]) + (acc[2] + acc[3]);
    for (val1, val2) in x_tail.iter().zip(y_tail) {
        result += *val1 * *val2;
    }
    result
}

#[multiversion(targets("x86_64+avx+avx2+fma", "x86+sse"))]
pub(crate) fn axpy(x: &[f64], y: &mut [f64], a: f64) {
    let n = x.len();
    assert!(y.len() == n);

    izip!(x, y).for_each(|(x, y)| {
        *y += a * x;
    });
}

#[multiversion(targets("x86_64+avx+avx2+fma", "x86+sse"))]
pub(crate) fn axpy_out(x: &[f64], y: &[f64], a: f64, out: &mut [f64]) {
    let n = x.len();
    assert!(y.len() == n);
    assert!(out.len() == n);

    izip!(x, y, out).for_each(|(x, y, out)| {
        *out = a * x + y;
    });
}

/// Compute `((end - start) · x, (end - start) · y)` in one pass.
#[multiversion(targets("x86_64+avx+avx2+fma", "x86+sse"))]
pub(crate) fn scalar_prods_of_diff(end: &[f64], start: &[f64], x: &[f64], y: &[f64]) -> (f64, f64) {
    let n = end.len();
    assert!(start.len() == n);
    assert!(x.len() == n);
    assert!(y.len() == n);

    izip!(end, start, x, y).fold((0f64, 0f64), |(s1, s2), (e, s, x, y)| {
        let diff = e - s;
        (s1 + diff * x, s2 + diff * y)
    })
}

pub(crate) fn all_finite(a: &[f64]) -> bool {
    a.iter().all(|val| val.is_finite())
}

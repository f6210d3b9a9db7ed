//! Host-side verification of device results.

use crate::buffer::{Element, HostBuffer};
use crate::error::Result;

/// Outcome of [`verify_detailed`].
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict<T> {
    Match,
    /// First element that differs from the reference.
    Mismatch { index: usize, expected: T, actual: T },
    /// Output and reference disagree on the element count.
    LengthMismatch { expected: usize, actual: usize },
}

impl<T> Verdict<T> {
    pub fn is_match(&self) -> bool {
        matches!(self, Verdict::Match)
    }
}

/// Recompute the expected output with `reference` and compare exactly.
///
/// `reference` receives every input, in binding order, and returns the whole
/// expected output. A failing reference counts as a mismatch.
pub fn verify<T, F>(output: &HostBuffer<T>, inputs: &[&HostBuffer<T>], reference: F) -> bool
where
    T: Element,
    F: Fn(&[&HostBuffer<T>]) -> Result<HostBuffer<T>>,
{
    matches!(verify_detailed(output, inputs, reference), Ok(Verdict::Match))
}

/// Like [`verify`], reporting where the first difference is.
///
/// Errors from `reference` are returned as is.
pub fn verify_detailed<T, F>(output: &HostBuffer<T>, inputs: &[&HostBuffer<T>], reference: F) -> Result<Verdict<T>>
where
    T: Element,
    F: Fn(&[&HostBuffer<T>]) -> Result<HostBuffer<T>>,
{
    let expected = reference(inputs)?;
    let (expected, actual) = (expected.as_slice(), output.as_slice());
    if expected.len() != actual.len() {
        return Ok(Verdict::LengthMismatch { expected: expected.len(), actual: actual.len() });
    }

    let first = expected.iter().zip(actual).position(|(expected, actual)| expected != actual);
    Ok(match first {
        Some(index) => {
            let (expected, actual) = (expected[index], actual[index]);
            tracing::debug!(index, ?expected, ?actual, "verification mismatch");
            Verdict::Mismatch { index, expected, actual }
        }
        None => Verdict::Match,
    })
}

/// Reference functions for common kernels.
pub mod reference {
    use crate::buffer::{Element, HostBuffer};
    use crate::error::Result;

    /// Build a reference that folds `op` over the `i`-th element of each input.
    ///
    /// The output is as long as the shortest input; no inputs is an `EmptyBuffer` error.
    pub fn elementwise<T: Element>(op: impl Fn(T, T) -> T) -> impl Fn(&[&HostBuffer<T>]) -> Result<HostBuffer<T>> {
        move |inputs: &[&HostBuffer<T>]| {
            let mut values = inputs.first().map(|first| first.as_slice().to_vec()).unwrap_or_default();
            for input in inputs.iter().skip(1) {
                values.truncate(input.element_count());
                for (acc, &value) in values.iter_mut().zip(input.as_slice()) {
                    *acc = op(*acc, value);
                }
            }
            HostBuffer::new(values)
        }
    }

    pub fn wrapping_add(inputs: &[&HostBuffer<i32>]) -> Result<HostBuffer<i32>> {
        elementwise(i32::wrapping_add)(inputs)
    }

    pub fn wrapping_sub(inputs: &[&HostBuffer<i32>]) -> Result<HostBuffer<i32>> {
        elementwise(i32::wrapping_sub)(inputs)
    }
}

use crate::verify::reference;
use crate::{Error, HostBuffer, Result, Verdict, verify, verify_detailed};

fn buffer(values: &[i32]) -> HostBuffer {
    HostBuffer::from_slice(values).unwrap()
}

fn reversed(inputs: &[&HostBuffer]) -> Result<HostBuffer> {
    HostBuffer::new(inputs[0].as_slice().iter().rev().copied().collect())
}

#[test]
fn test_verify_addition() {
    let a = buffer(&[0, 1, 2, 3]);
    let b = buffer(&[0, 1, 2, 3]);
    assert!(verify(&buffer(&[0, 2, 4, 6]), &[&a, &b], reference::wrapping_add));
    assert!(!verify(&buffer(&[0, 2, 5, 6]), &[&a, &b], reference::wrapping_add));
}

#[test]
fn test_first_mismatch_reported() {
    let a = buffer(&[1, 2, 3]);
    let b = buffer(&[1, 1, 1]);
    let verdict = verify_detailed(&buffer(&[2, 4, 5]), &[&a, &b], reference::wrapping_add).unwrap();
    assert_eq!(verdict, Verdict::Mismatch { index: 1, expected: 3, actual: 4 });
    assert!(!verdict.is_match());
}

#[test]
fn test_length_mismatch() {
    let a = buffer(&[1, 2, 3]);
    let verdict = verify_detailed(&buffer(&[1, 2]), &[&a], |inputs| Ok(inputs[0].clone())).unwrap();
    assert_eq!(verdict, Verdict::LengthMismatch { expected: 3, actual: 2 });
}

#[test]
fn test_whole_buffer_reference() {
    let a = buffer(&[1, 2, 3, 4]);
    assert!(verify(&buffer(&[4, 3, 2, 1]), &[&a], reversed));
    let verdict = verify_detailed(&buffer(&[4, 3, 1, 2]), &[&a], reversed).unwrap();
    assert_eq!(verdict, Verdict::Mismatch { index: 2, expected: 2, actual: 1 });
}

#[test]
fn test_reference_error_propagates() {
    let output = buffer(&[1]);
    assert!(matches!(verify_detailed(&output, &[], reference::wrapping_add), Err(Error::EmptyBuffer)));
    assert!(!verify(&output, &[], reference::wrapping_add));
}

#[test]
fn test_reference_functions() {
    let a = buffer(&[i32::MAX, 10, 3]);
    let b = buffer(&[1, 3, 9]);
    let c = buffer(&[5, 2, 4]);
    assert_eq!(reference::wrapping_add(&[&a, &b, &c]).unwrap().as_slice(), &[i32::MIN + 5, 15, 16]);
    assert_eq!(reference::wrapping_sub(&[&a, &b]).unwrap().as_slice(), &[i32::MAX - 1, 7, -6]);
    assert_eq!(reference::elementwise(i32::max)(&[&a, &b, &c]).unwrap().as_slice(), &[i32::MAX, 10, 9]);
    assert_eq!(reference::elementwise(i32::wrapping_mul)(&[&b]).unwrap(), b);
}

#[test]
fn test_elementwise_truncates_to_shortest() {
    let long = buffer(&[1, 2, 3]);
    let short = buffer(&[10, 20]);
    assert_eq!(reference::wrapping_add(&[&long, &short]).unwrap().as_slice(), &[11, 22]);
}

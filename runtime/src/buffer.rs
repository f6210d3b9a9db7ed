//! Host-resident element arrays.

use std::fmt;

use bytemuck::Pod;
use snafu::ensure;

use crate::error::{EmptyBufferSnafu, Result};

/// Element types that can cross the host/device boundary.
///
/// Elements are plain old data, so a buffer can be viewed as raw bytes for
/// transfers without copying.
pub trait Element: Pod + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Type name as spelled in kernel source.
    const NAME: &'static str;
}

macro_rules! impl_element {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl Element for $ty {
                const NAME: &'static str = $name;
            }
        )*
    };
}

impl_element!(i32 => "int", u32 => "uint", i64 => "long", f32 => "float");

/// A non-empty array of elements owned by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct HostBuffer<T: Element = i32> {
    data: Vec<T>,
}

impl<T: Element> HostBuffer<T> {
    /// Wrap `data`. Fails with `EmptyBuffer` when it holds no elements.
    pub fn new(data: Vec<T>) -> Result<Self> {
        ensure!(!data.is_empty(), EmptyBufferSnafu);
        Ok(Self { data })
    }

    /// `element_count` zeroed elements.
    pub fn zeroed(element_count: usize) -> Result<Self> {
        Self::new(vec![T::zeroed(); element_count])
    }

    pub fn from_slice(data: &[T]) -> Result<Self> {
        Self::new(data.to_vec())
    }

    pub fn element_count(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    pub fn size_bytes(&self) -> usize {
        std::mem::size_of_val(self.data.as_slice())
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.data)
    }
}

impl<T: Element> TryFrom<Vec<T>> for HostBuffer<T> {
    type Error = crate::Error;

    fn try_from(data: Vec<T>) -> Result<Self> {
        Self::new(data)
    }
}

//! Strided multi-dimensional access over a handle
//!
//! An indexer maps coordinates `[i, j, k, ...]` to the element
//! `position + sum(i_d * strides[d])` of its handle. Coordinates are checked
//! against `sizes` on every access; the largest reachable offset is checked
//! against the handle window once, when the indexer is built.
//!
//! ```ignore
//! let mut pixels = AddressHandle::allocate(HandleKind::Float, 480 * 640 * 3)?;
//! let mut image = Indexer::<f32>::new(&mut pixels, &[480, 640, 3])?;
//! image.put(&[10, 20, 1], 0.5)?;
//! ```

use crate::error::{Error, Result};
use crate::handle::{AddressHandle, Element};
use core::marker::PhantomData;

/// Row-major strides: the last dimension is contiguous
pub fn row_major_strides(sizes: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; sizes.len()];
    for d in (0..sizes.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * sizes[d + 1];
    }
    strides
}

pub struct Indexer<'h, E: Element> {
    handle: &'h mut AddressHandle,
    sizes: Vec<usize>,
    strides: Vec<usize>,
    _element: PhantomData<E>,
}

impl<'h, E: Element> Indexer<'h, E> {
    /// Dense row-major indexer over `sizes`
    pub fn new(handle: &'h mut AddressHandle, sizes: &[usize]) -> Result<Self> {
        let strides = row_major_strides(sizes);
        Self::with_strides(handle, sizes, &strides)
    }

    /// Indexer with explicit strides, counted in elements
    pub fn with_strides(handle: &'h mut AddressHandle, sizes: &[usize], strides: &[usize]) -> Result<Self> {
        if handle.element_size() != core::mem::size_of::<E>() {
            return Err(Error::KindMismatch {
                expected: E::KIND.to_string(),
                found: handle.kind().to_string(),
            });
        }
        if sizes.is_empty() || sizes.len() != strides.len() {
            return Err(Error::InvalidShape {
                reason: format!("{} sizes with {} strides", sizes.len(), strides.len()),
            });
        }
        if handle.is_null() {
            return Err(Error::NullHandle);
        }

        let available = window(handle)?;
        if sizes.iter().all(|&size| size > 0) {
            let last = sizes
                .iter()
                .zip(strides)
                .try_fold(0usize, |acc, (&size, &stride)| {
                    (size - 1).checked_mul(stride).and_then(|span| acc.checked_add(span))
                })
                .ok_or_else(|| Error::InvalidShape {
                    reason: "index space overflows".to_string(),
                })?;
            if last >= available {
                return Err(Error::InvalidShape {
                    reason: format!("index space needs {} elements, handle holds {}", last + 1, available),
                });
            }
        }

        Ok(Self {
            handle,
            sizes: sizes.to_vec(),
            strides: strides.to_vec(),
            _element: PhantomData,
        })
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn rows(&self) -> usize {
        self.sizes[0]
    }

    pub fn cols(&self) -> Option<usize> {
        self.sizes.get(1).copied()
    }

    pub fn channels(&self) -> Option<usize> {
        self.sizes.get(2).copied()
    }

    /// Linear element offset of `indices` from the handle position
    pub fn index(&self, indices: &[usize]) -> Result<usize> {
        let in_bounds = indices.len() == self.sizes.len()
            && indices.iter().zip(&self.sizes).all(|(&i, &size)| i < size);
        if !in_bounds {
            return Err(Error::IndexOutOfBounds {
                index: indices.to_vec(),
                sizes: self.sizes.clone(),
            });
        }
        Ok(indices.iter().zip(&self.strides).map(|(i, stride)| i * stride).sum())
    }

    pub fn get(&self, indices: &[usize]) -> Result<E> {
        let offset = self.index(indices)?;
        // SAFETY: every in-bounds offset was checked against the window in `with_strides`
        Ok(unsafe { self.handle.get::<E>(offset) })
    }

    pub fn put(&mut self, indices: &[usize], value: E) -> Result<&mut Self> {
        let offset = self.index(indices)?;
        // SAFETY: as in `get`
        unsafe {
            self.handle.put::<E>(offset, value);
        }
        Ok(self)
    }

    /// The indexed handle
    pub fn handle(&self) -> &AddressHandle {
        &*self.handle
    }
}

/// Elements reachable from `position`: up to `limit`, else up to `capacity`
fn window(handle: &AddressHandle) -> Result<usize> {
    let (position, limit) = (handle.position(), handle.limit());
    if limit == 0 {
        return Ok(handle.capacity().saturating_sub(position));
    }
    limit
        .checked_sub(position)
        .ok_or(Error::LimitBeforePosition { limit, position })
}

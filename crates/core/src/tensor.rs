use crate::backend::Backend;
use crate::error::{Error, Result};
use std::sync::Arc;

/// A row-major `f32` tensor living in a backend buffer. The first axis is
/// always the batch axis.
pub struct Tensor<B: Backend> {
    pub buf: Arc<B::Buf>,
    pub shape: Vec<usize>,
}

impl<B: Backend> Tensor<B> {
    pub fn zeros(backend: &B, shape: &[usize]) -> Self {
        let len = shape.iter().product();
        Self::from_buf(backend.alloc(len), shape)
    }

    pub fn from_host(backend: &B, data: &[f32], shape: &[usize]) -> Result<Self> {
        let len: usize = shape.iter().product();
        if data.len() != len {
            return Err(Error::shape(&[len], &[data.len()]));
        }
        Ok(Self::from_buf(backend.upload(data), shape))
    }

    /// Wraps a buffer the caller already sized for `shape`.
    pub(crate) fn from_buf(buf: B::Buf, shape: &[usize]) -> Self {
        Self {
            buf: Arc::new(buf),
            shape: shape.to_vec(),
        }
    }

    pub fn to_host(&self, backend: &B) -> Vec<f32> {
        let mut host_data = vec![0.0; self.len()];
        backend.download(&self.buf, &mut host_data);
        host_data
    }

    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn batch_size(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Elements per sample (product of every axis after the batch axis).
    pub fn features(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    pub fn dims2(&self) -> Result<(usize, usize)> {
        match self.shape[..] {
            [n, f] => Ok((n, f)),
            _ => Err(Error::RankMismatch {
                expected: 2,
                actual: self.shape.clone(),
            }),
        }
    }

    pub fn dims4(&self) -> Result<(usize, usize, usize, usize)> {
        match self.shape[..] {
            [n, c, h, w] => Ok((n, c, h, w)),
            _ => Err(Error::RankMismatch {
                expected: 4,
                actual: self.shape.clone(),
            }),
        }
    }

    /// Same buffer, new shape. Element count must not change.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        let len: usize = shape.iter().product();
        if len != self.len() {
            return Err(Error::shape(shape, &self.shape));
        }
        Ok(Self {
            buf: Arc::clone(&self.buf),
            shape: shape.to_vec(),
        })
    }

    /// Mutable access to the buffer, cloning it first if it is shared.
    pub fn buf_mut(&mut self) -> &mut B::Buf {
        Arc::make_mut(&mut self.buf)
    }

    pub fn set_zero(&mut self, backend: &B) {
        self.buf = Arc::new(backend.alloc(self.len()));
    }

    /// Replaces the contents with `data` (same element count).
    pub fn write_host(&mut self, backend: &B, data: &[f32]) -> Result<()> {
        if data.len() != self.len() {
            return Err(Error::shape(&[self.len()], &[data.len()]));
        }
        self.buf = Arc::new(backend.upload(data));
        Ok(())
    }
}

impl<B: Backend> Clone for Tensor<B> {
    fn clone(&self) -> Self {
        Self {
            buf: Arc::clone(&self.buf),
            shape: self.shape.clone(),
        }
    }
}

impl<B: Backend> std::fmt::Debug for Tensor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor").field("shape", &self.shape).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;

    #[test]
    fn from_host_rejects_wrong_length() {
        let err = Tensor::from_host(&CpuBackend, &[1.0, 2.0, 3.0], &[2, 2]).unwrap_err();
        assert_eq!(err, Error::shape(&[4], &[3]));
    }

    #[test]
    fn reshape_shares_the_buffer() {
        let t = Tensor::from_host(&CpuBackend, &[1.0; 12], &[2, 3, 2]).unwrap();
        let flat = t.reshape(&[2, 6]).unwrap();
        assert!(Arc::ptr_eq(&t.buf, &flat.buf));
        assert_eq!(flat.features(), 6);
        assert!(t.reshape(&[5, 2]).is_err());
    }

    #[test]
    fn buf_mut_copies_on_write() {
        let a = Tensor::from_host(&CpuBackend, &[1.0, 2.0], &[1, 2]).unwrap();
        let mut b = a.clone();
        b.buf_mut()[0] = 9.0;
        assert_eq!(a.to_host(&CpuBackend), vec![1.0, 2.0]);
        assert_eq!(b.to_host(&CpuBackend), vec![9.0, 2.0]);
    }
}

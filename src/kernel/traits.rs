//! Kernel evaluation contract

/// Structural properties a kernel can advertise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelProperty {
    /// Plain inner product of explicit features. Shrinking keeps a single
    /// running snapshot instead of a history of alpha vectors.
    Linear,
    /// Weighted sum of sub-kernels whose weights may be learned (MKL)
    LinearCombination,
}

/// Kernel over a fixed set of training vectors addressed by index
///
/// The solver borrows the kernel for a whole training run and evaluates it
/// from several worker threads at once, hence `Send + Sync`.
pub trait Kernel: Send + Sync {
    /// Number of vectors the kernel is defined on
    fn num_vectors(&self) -> usize;

    /// Kernel value K(i, j)
    fn compute(&self, i: usize, j: usize) -> f64;

    /// Kernel values K(i, j) for every j in `indices`
    fn compute_row(&self, i: usize, indices: &[usize]) -> Vec<f64> {
        indices.iter().map(|&j| self.compute(i, j)).collect()
    }

    fn has_property(&self, property: KernelProperty) -> bool {
        let _ = property;
        false
    }

    /// A kernel without data cannot be trained on
    fn is_initialized(&self) -> bool {
        self.num_vectors() > 0
    }

    /// Number of sub-kernels for `LinearCombination` kernels
    fn num_subkernels(&self) -> usize {
        1
    }

    /// Value of sub-kernel `d` at (i, j), unweighted
    fn compute_subkernel(&self, d: usize, i: usize, j: usize) -> f64 {
        let _ = d;
        self.compute(i, j)
    }

    /// Mixture weights the kernel starts with
    fn subkernel_weights(&self) -> Vec<f64> {
        vec![1.0; self.num_subkernels()]
    }
}

impl<K: Kernel + ?Sized> Kernel for &K {
    fn num_vectors(&self) -> usize {
        (**self).num_vectors()
    }

    fn compute(&self, i: usize, j: usize) -> f64 {
        (**self).compute(i, j)
    }

    fn compute_row(&self, i: usize, indices: &[usize]) -> Vec<f64> {
        (**self).compute_row(i, indices)
    }

    fn has_property(&self, property: KernelProperty) -> bool {
        (**self).has_property(property)
    }

    fn is_initialized(&self) -> bool {
        (**self).is_initialized()
    }

    fn num_subkernels(&self) -> usize {
        (**self).num_subkernels()
    }

    fn compute_subkernel(&self, d: usize, i: usize, j: usize) -> f64 {
        (**self).compute_subkernel(d, i, j)
    }

    fn subkernel_weights(&self) -> Vec<f64> {
        (**self).subkernel_weights()
    }
}

impl<K: Kernel + ?Sized> Kernel for Box<K> {
    fn num_vectors(&self) -> usize {
        (**self).num_vectors()
    }

    fn compute(&self, i: usize, j: usize) -> f64 {
        (**self).compute(i, j)
    }

    fn compute_row(&self, i: usize, indices: &[usize]) -> Vec<f64> {
        (**self).compute_row(i, indices)
    }

    fn has_property(&self, property: KernelProperty) -> bool {
        (**self).has_property(property)
    }

    fn is_initialized(&self) -> bool {
        (**self).is_initialized()
    }

    fn num_subkernels(&self) -> usize {
        (**self).num_subkernels()
    }

    fn compute_subkernel(&self, d: usize, i: usize, j: usize) -> f64 {
        (**self).compute_subkernel(d, i, j)
    }

    fn subkernel_weights(&self) -> Vec<f64> {
        (**self).subkernel_weights()
    }
}

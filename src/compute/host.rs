//! CPU reference kernel

use super::{operand_len, ElementwiseKernel};
use crate::error::ComputeError;

/// Evaluates the elementwise operation on the host.
#[derive(Debug, Clone)]
pub struct HostKernel {
    name: String,
    op: fn(f64, f64) -> f64,
}

impl HostKernel {
    pub fn new(name: impl Into<String>, op: fn(f64, f64) -> f64) -> Self {
        Self {
            name: name.into(),
            op,
        }
    }

    /// `c[i] = a[i] + b[i]`, same as the bundled `add` kernel.
    pub fn add() -> Self {
        Self::new("add", |a, b| a + b)
    }

    /// `c[i] = a[i] * b[i]`, same as the bundled `mul` kernel.
    pub fn mul() -> Self {
        Self::new("mul", |a, b| a * b)
    }

    /// Host counterpart of a bundled kernel entry point.
    pub fn for_entry_point(entry_point: &str) -> Option<Self> {
        match entry_point {
            "add" => Some(Self::add()),
            "mul" => Some(Self::mul()),
            _ => None,
        }
    }
}

impl ElementwiseKernel for HostKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn launch(&mut self, a: &[f64], b: &[f64]) -> Result<Vec<f64>, ComputeError> {
        operand_len(a, b)?;
        Ok(a.iter().zip(b).map(|(x, y)| (self.op)(*x, *y)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add() {
        let mut kernel = HostKernel::add();
        assert_eq!(kernel.name(), "add");
        let out = kernel.launch(&[1.0, -2.5, 0.0], &[1.0, 2.5, 7.0]).unwrap();
        assert_eq!(out, vec![2.0, 0.0, 7.0]);
    }

    #[test]
    fn test_for_entry_point() {
        let mut mul = HostKernel::for_entry_point("mul").unwrap();
        assert_eq!(mul.name(), "mul");
        assert_eq!(mul.launch(&[3.0], &[4.0]).unwrap(), vec![12.0]);

        assert_eq!(HostKernel::for_entry_point("add").unwrap().name(), "add");
        assert!(HostKernel::for_entry_point("pow").is_none());
    }

    #[test]
    fn test_custom_op() {
        let mut kernel = HostKernel::new("mul", |a, b| a * b);
        assert_eq!(kernel.launch(&[3.0, 4.0], &[2.0, 0.5]).unwrap(), vec![6.0, 2.0]);
    }
}

//! Local mirrors of a contiguous block of slave points.

use crate::ClientError;

/// A contiguous block of points starting at `start_address`, refreshed from
/// reads and consulted by address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointBlock<T> {
    start_address: u16,
    values: Vec<T>,
}

pub type CoilPoints = PointBlock<bool>;
pub type RegisterPoints = PointBlock<u16>;

impl<T: Copy + Default> PointBlock<T> {
    pub fn new(start_address: u16, count: usize) -> Self {
        Self {
            start_address,
            values: vec![T::default(); count],
        }
    }
}

impl<T: Copy> PointBlock<T> {
    pub fn from_values(start_address: u16, values: Vec<T>) -> Self {
        Self {
            start_address,
            values,
        }
    }

    pub fn start_address(&self) -> u16 {
        self.start_address
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Quantity to request when refreshing the whole block.
    pub(crate) fn quantity(&self) -> Result<u16, ClientError> {
        u16::try_from(self.values.len())
            .map_err(|_| ClientError::Encode(wiremod_core::EncodeError::ValueOutOfRange))
    }

    fn offset(&self, address: u16) -> Option<usize> {
        let offset = usize::from(address.checked_sub(self.start_address)?);
        (offset < self.values.len()).then_some(offset)
    }

    pub fn get(&self, address: u16) -> Option<T> {
        self.offset(address).map(|offset| self.values[offset])
    }

    pub fn set(&mut self, address: u16, value: T) -> Result<(), ClientError> {
        let offset = self
            .offset(address)
            .ok_or(ClientError::AddressOutOfRange(address))?;
        self.values[offset] = value;
        Ok(())
    }

    /// Copies `values` read from `start_address` into the block. Every
    /// address must fall inside it; nothing is written otherwise.
    pub fn apply_read(&mut self, start_address: u16, values: &[T]) -> Result<(), ClientError> {
        if values.is_empty() {
            return Ok(());
        }
        let first = self
            .offset(start_address)
            .ok_or(ClientError::AddressOutOfRange(start_address))?;
        let end = first + values.len();
        if end > self.values.len() {
            let last = usize::from(self.start_address) + end - 1;
            return Err(ClientError::AddressOutOfRange(
                u16::try_from(last).unwrap_or(u16::MAX),
            ));
        }
        self.values[first..end].copy_from_slice(values);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{CoilPoints, RegisterPoints};
    use crate::ClientError;

    #[test]
    fn coil_points_apply_read() {
        let mut points = CoilPoints::new(10, 4);
        points.apply_read(11, &[true, false]).unwrap();
        assert_eq!(points.get(10), Some(false));
        assert_eq!(points.get(11), Some(true));
        assert_eq!(points.get(12), Some(false));
        assert_eq!(points.get(14), None);
        assert_eq!(points.get(9), None);
    }

    #[test]
    fn register_points_apply_read() {
        let mut points = RegisterPoints::new(100, 3);
        points.apply_read(100, &[10, 20, 30]).unwrap();
        assert_eq!(points.get(101), Some(20));
        points.set(102, 42).unwrap();
        assert_eq!(points.values(), &[10, 20, 42]);
    }

    #[test]
    fn reads_past_the_block_leave_it_untouched() {
        let mut points = RegisterPoints::from_values(0xFFFE, vec![1, 2]);
        let err = points.apply_read(0xFFFF, &[7, 8]).unwrap_err();
        assert!(matches!(err, ClientError::AddressOutOfRange(0xFFFF)));
        assert_eq!(points.values(), &[1, 2]);

        let err = points.set(5, 1).unwrap_err();
        assert!(matches!(err, ClientError::AddressOutOfRange(5)));
    }
}

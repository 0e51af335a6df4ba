use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

/// Minimal row-major dense f64 matrix, just enough for the projector/basis
/// fits. The binary exchange format is little-endian throughout:
/// `u32 rows, u32 cols`, then `rows*cols` f64 values in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Dense {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Dense {
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(Error::Matrix("matrix dimensions must be nonzero".into()));
        }
        if data.len() != rows * cols {
            return Err(Error::Matrix(format!(
                "{}x{} matrix needs {} values, got {}",
                rows,
                cols,
                rows * cols,
                data.len()
            )));
        }
        Ok(Dense { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn at(&self, r: usize, c: usize) -> f64 {
        self.data[r * self.cols + c]
    }

    /// `self · v`, requiring `v.len() == cols`.
    pub fn mul_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(v.len(), self.cols);
        let mut out = vec![0.0; self.rows];
        for (r, out_r) in out.iter_mut().enumerate() {
            let row = &self.data[r * self.cols..(r + 1) * self.cols];
            *out_r = row.iter().zip(v).map(|(a, b)| a * b).sum();
        }
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 8 * self.data.len());
        buf.write_u32::<LittleEndian>(self.rows as u32).unwrap();
        buf.write_u32::<LittleEndian>(self.cols as u32).unwrap();
        for &v in &self.data {
            buf.write_f64::<LittleEndian>(v).unwrap();
        }
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut rd = bytes;
        let rows = rd
            .read_u32::<LittleEndian>()
            .map_err(|_| Error::Matrix("matrix payload truncated".into()))? as usize;
        let cols = rd
            .read_u32::<LittleEndian>()
            .map_err(|_| Error::Matrix("matrix payload truncated".into()))? as usize;
        let n = rows
            .checked_mul(cols)
            .ok_or_else(|| Error::Matrix("matrix dimensions overflow".into()))?;
        if rd.len() != 8 * n {
            return Err(Error::Matrix(format!(
                "{}x{} matrix payload has {} data bytes, want {}",
                rows,
                cols,
                rd.len(),
                8 * n
            )));
        }
        let mut data = Vec::with_capacity(n);
        for _ in 0..n {
            data.push(rd.read_f64::<LittleEndian>().unwrap());
        }
        Dense::new(rows, cols, data)
    }

    /// Decodes the base64 form used by the control payloads.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| Error::Matrix(format!("bad base64: {e}")))?;
        Dense::from_bytes(&bytes)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_vec_projects() {
        let p = Dense::new(2, 3, vec![1.0, 0.0, 1.0, 0.0, 2.0, 0.0]).unwrap();
        assert_eq!(p.mul_vec(&[3.0, 4.0, 5.0]), vec![8.0, 8.0]);
    }

    #[test]
    fn base64_round_trip() {
        let m = Dense::new(3, 2, vec![0.5, -1.0, 2.25, 0.0, 7.0, -3.5]).unwrap();
        let decoded = Dense::from_base64(&m.to_base64()).unwrap();
        assert_eq!(decoded, m);
    }

    #[test]
    fn from_bytes_rejects_short_payload() {
        let m = Dense::new(2, 2, vec![1.0; 4]).unwrap();
        let mut bytes = m.to_bytes();
        bytes.pop();
        assert!(Dense::from_bytes(&bytes).is_err());
    }
}

//! Raw V4L2 buffer → 8-bit grayscale conversion.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("buffer too short: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

fn check_len(buf: &[u8], expected: usize) -> Result<(), ConvertError> {
    if buf.len() < expected {
        return Err(ConvertError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// Extract the Y channel of packed YUYV (4:2:2): every even-indexed byte.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ConvertError> {
    let expected = width as usize * height as usize * 2;
    check_len(yuyv, expected)?;
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Keep the high byte of each 16-bit little-endian sample.
pub fn y16_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ConvertError> {
    let pixels = width as usize * height as usize;
    check_len(buf, pixels * 2)?;
    Ok(buf[..pixels * 2].chunks_exact(2).map(|px| px[1]).collect())
}

/// Copy a native 8-bit grayscale buffer, dropping any driver padding.
pub fn grey_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ConvertError> {
    let pixels = width as usize * height as usize;
    check_len(buf, pixels)?;
    Ok(buf[..pixels].to_vec())
}

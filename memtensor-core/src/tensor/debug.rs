use std::fmt::Write;

use tracing::info;

use super::Tensor;
use crate::Result;

impl Tensor {
    /// Render shape and every element in row-major order, one line per
    /// innermost run. Diagnostic output only; the format is not stable.
    pub fn debug_string(&self) -> Result<String> {
        let width = self.size_of_type()?;
        let guard = self.map()?;
        let bytes = guard.as_bytes();

        let mut os = format!("Tensor {} size: [", self.name);
        for dim in &self.shape {
            let _ = write!(os, "{dim}, ");
        }
        os.push_str("], content:\n");

        let run = self.shape.last().copied().unwrap_or(1);
        for i in 0..self.size() {
            if i != 0 && i % run == 0 {
                os.push('\n');
            }
            let start = (i * width).min(bytes.len());
            os.push_str(&self.dtype.format_element(&bytes[start..])?);
            os.push_str(", ");
        }
        Ok(os)
    }

    /// Log [`Tensor::debug_string`] at INFO.
    pub fn debug_print(&self) -> Result<()> {
        let s = self.debug_string()?;
        info!("{s}");
        Ok(())
    }
}

//! JPEG XL via the reference command-line tools.
//!
//! Every call gets its own scratch directory, removed when the call returns
//! on any path. Nothing is ever written to a fixed shared filename, so the
//! adapter can be driven from all workers at once.

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use image::ImageFormat;
use tempfile::TempDir;

use super::{CodecInfo, TileCodec};
use crate::config::JxlConfig;
use crate::error::{Result, TilerError};
use crate::PixelBuffer;

const INPUT_PNG: &str = "tile.png";
const ENCODED: &str = "tile.jxl";
const DECODED_PNG: &str = "decoded.png";

/// JPEG XL codec backed by `cjxl` and `djxl`.
#[derive(Debug, Clone)]
pub struct JxlCodec {
    cjxl: String,
    djxl: String,
    scratch_root: Option<PathBuf>,
}

impl JxlCodec {
    /// Create a codec using the given encoder and decoder binaries.
    pub fn new(cjxl: impl Into<String>, djxl: impl Into<String>) -> Self {
        Self {
            cjxl: cjxl.into(),
            djxl: djxl.into(),
            scratch_root: None,
        }
    }

    /// Create a codec from configuration.
    pub fn from_config(config: &JxlConfig) -> Self {
        Self::new(config.cjxl_bin.clone(), config.djxl_bin.clone())
    }

    /// Create scratch directories under `root` instead of the system temp dir.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    fn scratch_dir(&self, prefix: &str) -> std::io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        match self.scratch_root {
            Some(ref root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
    }
}

impl TileCodec for JxlCodec {
    /// Check that both binaries can be executed.
    fn probe(&self) -> Result<()> {
        probe_binary(&self.cjxl).map_err(TilerError::Encode)?;
        probe_binary(&self.djxl).map_err(TilerError::Decode)?;
        Ok(())
    }

    fn encode(&self, buffer: &PixelBuffer, distance: f32, effort: u8) -> Result<Vec<u8>> {
        let scratch = self
            .scratch_dir("tiler-cjxl-")
            .map_err(|e| TilerError::Encode(format!("Cannot create scratch directory: {}", e)))?;
        let input = scratch.path().join(INPUT_PNG);
        let output = scratch.path().join(ENCODED);

        buffer
            .to_rgb_image()
            .save_with_format(&input, ImageFormat::Png)
            .map_err(|e| TilerError::Encode(format!("Cannot write PNG intermediate: {}", e)))?;

        let result = Command::new(&self.cjxl)
            .arg(&input)
            .arg(&output)
            .arg("-d")
            .arg(format!("{:.4}", distance))
            .arg("-e")
            .arg(effort.to_string())
            .stdin(Stdio::null())
            .output()
            .map_err(|e| TilerError::Encode(format!("Failed to run {}: {}", self.cjxl, e)))?;
        check_status(&self.cjxl, &result).map_err(TilerError::Encode)?;

        let encoded = read_output(&output).map_err(TilerError::Encode)?;

        log::trace!(
            "Encoded {}x{} tile at d={:.3} to {} bytes",
            buffer.width,
            buffer.height,
            distance,
            encoded.len()
        );

        Ok(encoded)
    }

    fn decode(&self, data: &[u8]) -> Result<PixelBuffer> {
        if data.is_empty() {
            return Err(TilerError::Decode("Empty input".into()));
        }

        let scratch = self
            .scratch_dir("tiler-djxl-")
            .map_err(|e| TilerError::Decode(format!("Cannot create scratch directory: {}", e)))?;
        let input = scratch.path().join(ENCODED);
        let output = scratch.path().join(DECODED_PNG);

        std::fs::write(&input, data)
            .map_err(|e| TilerError::Decode(format!("Cannot write encoded input: {}", e)))?;

        let result = Command::new(&self.djxl)
            .arg(&input)
            .arg(&output)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| TilerError::Decode(format!("Failed to run {}: {}", self.djxl, e)))?;
        check_status(&self.djxl, &result).map_err(TilerError::Decode)?;

        let png = read_output(&output).map_err(TilerError::Decode)?;
        let image = image::load_from_memory_with_format(&png, ImageFormat::Png)
            .map_err(|e| TilerError::Decode(format!("Decoder output is not a PNG: {}", e)))?;

        Ok(PixelBuffer::from_rgb_image(image.to_rgb8()))
    }

    fn info(&self) -> CodecInfo {
        CodecInfo {
            name: "JPEG XL",
            extension: "jxl",
        }
    }
}

fn check_status(binary: &str, output: &Output) -> std::result::Result<(), String> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(format!("{} exited with {}: {}", binary, output.status, stderr.trim()))
}

fn read_output(path: &Path) -> std::result::Result<Vec<u8>, String> {
    match std::fs::read(path) {
        Ok(bytes) if bytes.is_empty() => Err(format!("{} is empty", path.display())),
        Ok(bytes) => Ok(bytes),
        Err(e) => Err(format!("No output at {}: {}", path.display(), e)),
    }
}

fn probe_binary(binary: &str) -> std::result::Result<(), String> {
    let output = Command::new(binary)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| format!("{} not runnable: {}", binary, e))?;
    check_status(binary, &output)?;
    log::debug!(
        "{}: {}",
        binary,
        String::from_utf8_lossy(&output.stdout).lines().next().unwrap_or("")
    );
    Ok(())
}

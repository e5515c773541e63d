//! Packed canvas codec.
//!
//! The canvas is a fixed grid of 4-bit color cells packed two per byte: the
//! cell at an even pixel index occupies the high nibble of its byte, the odd
//! cell the low nibble. The packed buffer is the only canonical
//! representation; the wire carries it base64-encoded. Nibble placement is
//! load-bearing: a buffer written by one process must decode identically in
//! every other.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Bits per cell. Two cells pack into one byte.
pub const BITS_PER_PIXEL: u32 = 4;

/// Default canvas width in cells.
pub const DEFAULT_WIDTH: u32 = 500;

/// Default canvas height in cells.
pub const DEFAULT_HEIGHT: u32 = 500;

/// Default palette size. Must fit in [`BITS_PER_PIXEL`] bits.
pub const DEFAULT_COLOR_COUNT: u16 = 16;

/// Canvas geometry and palette bounds.
///
/// All codec operations hang off a spec so tests can use small grids and
/// deployments can reconfigure dimensions without touching the bit math.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasSpec {
    /// Grid width in cells
    pub width: u32,
    /// Grid height in cells
    pub height: u32,
    /// Number of palette entries; valid colors are `0..color_count`
    pub color_count: u16,
}

impl CanvasSpec {
    /// Create a spec, rejecting dimensions the packed layout cannot hold.
    pub fn new(width: u32, height: u32, color_count: u16) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidConfig {
                field: "canvas.width/canvas.height".to_string(),
                message: "canvas dimensions must be at least 1x1".to_string(),
            });
        }
        if !(2..=16).contains(&color_count) {
            return Err(Error::InvalidConfig {
                field: "canvas.color_count".to_string(),
                message: format!("palette must have 2..=16 entries, got {color_count}"),
            });
        }
        Ok(Self {
            width,
            height,
            color_count,
        })
    }

    /// Total number of cells.
    #[must_use]
    pub fn cell_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Length in bytes of the packed buffer: `ceil(cells * 4 / 8)`.
    #[must_use]
    pub fn buffer_len(&self) -> usize {
        ((self.cell_count() * u64::from(BITS_PER_PIXEL)).div_ceil(8)) as usize
    }

    /// A zeroed buffer: every cell holds color 0 ("background").
    #[must_use]
    pub fn empty_buffer(&self) -> Vec<u8> {
        vec![0u8; self.buffer_len()]
    }

    /// Bit offset of the cell at `(x, y)`, as used by field-level store
    /// writes. Callers must pass in-range coordinates.
    #[must_use]
    pub fn bit_offset(&self, x: u32, y: u32) -> u64 {
        self.pixel_index(x, y) * u64::from(BITS_PER_PIXEL)
    }

    fn pixel_index(&self, x: u32, y: u32) -> u64 {
        u64::from(y) * u64::from(self.width) + u64::from(x)
    }

    /// Validate raw wire coordinates. Out-of-range values are rejected,
    /// never clamped.
    pub fn validate_coords(&self, x: i64, y: i64) -> Result<(u32, u32)> {
        let in_range = (0..i64::from(self.width)).contains(&x)
            && (0..i64::from(self.height)).contains(&y);
        if !in_range {
            return Err(Error::InvalidCoordinates {
                x,
                y,
                width: self.width,
                height: self.height,
            });
        }
        Ok((x as u32, y as u32))
    }

    /// Validate a raw wire color index against the palette.
    pub fn validate_color(&self, color: i64) -> Result<u8> {
        if !(0..i64::from(self.color_count)).contains(&color) {
            return Err(Error::InvalidColor {
                color,
                color_count: self.color_count,
            });
        }
        Ok(color as u8)
    }

    /// Read the color index of the cell at `(x, y)`.
    pub fn read_cell(&self, buffer: &[u8], x: u32, y: u32) -> Result<u8> {
        let (x, y) = self.validate_coords(i64::from(x), i64::from(y))?;
        let index = self.pixel_index(x, y);
        let byte = *buffer
            .get((index / 2) as usize)
            .ok_or_else(|| self.short_buffer(buffer.len()))?;
        Ok(if index % 2 == 0 {
            (byte >> 4) & 0x0F
        } else {
            byte & 0x0F
        })
    }

    /// Write `color` into the cell at `(x, y)`, preserving the neighbor
    /// nibble. Returns the new value of the touched byte.
    pub fn write_cell(&self, buffer: &mut [u8], x: u32, y: u32, color: u8) -> Result<u8> {
        let (x, y) = self.validate_coords(i64::from(x), i64::from(y))?;
        let color = self.validate_color(i64::from(color))?;
        let index = self.pixel_index(x, y);
        let len = buffer.len();
        let byte = buffer
            .get_mut((index / 2) as usize)
            .ok_or_else(|| self.short_buffer(len))?;
        *byte = if index % 2 == 0 {
            (color << 4) | (*byte & 0x0F)
        } else {
            (*byte & 0xF0) | color
        };
        Ok(*byte)
    }

    fn short_buffer(&self, actual: usize) -> Error {
        Error::PersistenceUnavailable {
            message: format!(
                "canvas buffer is {actual} bytes, {}x{} requires {}",
                self.width,
                self.height,
                self.buffer_len()
            ),
        }
    }
}

impl Default for CanvasSpec {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            color_count: DEFAULT_COLOR_COUNT,
        }
    }
}

/// Encode a packed buffer for the wire (REST canvas body and WebSocket
/// `canvas_state` both carry this).
#[must_use]
pub fn encode_canvas(buffer: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    STANDARD.encode(buffer)
}

/// Decode a wire canvas back into packed bytes, enforcing the expected
/// buffer length.
pub fn decode_canvas(spec: &CanvasSpec, data: &str) -> Result<Vec<u8>> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    let bytes = STANDARD
        .decode(data)
        .map_err(|e| Error::PersistenceUnavailable {
            message: format!("canvas payload is not valid base64: {e}"),
        })?;
    if bytes.len() != spec.buffer_len() {
        return Err(Error::PersistenceUnavailable {
            message: format!(
                "decoded canvas is {} bytes, expected {}",
                bytes.len(),
                spec.buffer_len()
            ),
        });
    }
    Ok(bytes)
}

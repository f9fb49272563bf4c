//! Terminal geometry

/// Terminal size in character cells plus the pixel size of one cell.
///
/// The kernel's pixel fields are derived from the cell size:
/// `xpixel = cols * cell_width`, `ypixel = rows * cell_height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub rows: u16,
    pub cols: u16,
    pub cell_width: u16,
    pub cell_height: u16,
}

impl TerminalSize {
    /// Size in cells with an unknown (zero) cell size
    pub fn new(rows: u16, cols: u16) -> Self {
        Self {
            rows,
            cols,
            cell_width: 0,
            cell_height: 0,
        }
    }

    pub fn with_cell_size(mut self, cell_width: u16, cell_height: u16) -> Self {
        self.cell_width = cell_width;
        self.cell_height = cell_height;
        self
    }

    /// Build from host-side integers. Negative values clamp to zero and
    /// values past `u16::MAX` clamp to `u16::MAX`.
    pub fn from_host(rows: i32, cols: i32, cell_width: i32, cell_height: i32) -> Self {
        Self {
            rows: clamp_dimension(rows),
            cols: clamp_dimension(cols),
            cell_width: clamp_dimension(cell_width),
            cell_height: clamp_dimension(cell_height),
        }
    }

    /// Total width in pixels, saturating at `u16::MAX`
    pub fn pixel_width(&self) -> u16 {
        self.cols.saturating_mul(self.cell_width)
    }

    /// Total height in pixels, saturating at `u16::MAX`
    pub fn pixel_height(&self) -> u16 {
        self.rows.saturating_mul(self.cell_height)
    }

    pub fn to_winsize(&self) -> libc::winsize {
        libc::winsize {
            ws_row: self.rows,
            ws_col: self.cols,
            ws_xpixel: self.pixel_width(),
            ws_ypixel: self.pixel_height(),
        }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::new(24, 80)
    }
}

fn clamp_dimension(value: i32) -> u16 {
    value.clamp(0, i32::from(u16::MAX)) as u16
}

use serde::{Deserialize, Serialize};

/// Run-length-encoded binary mask for one segmentation detection.
///
/// Runs are row-major and alternate, starting with background, so a grid
/// that begins with foreground pixels starts with a zero-length run. The
/// grid covers the original image extent at a reduced resolution; the
/// renderer scales it back up when drawing.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct Mask {
    pub width: u32,
    pub height: u32,
    pub counts: Vec<u32>,
}

impl Mask {
    /// Encodes a row-major bitmap. `bits.len()` must equal `width * height`.
    pub fn encode(bits: &[bool], width: u32, height: u32) -> Self {
        debug_assert_eq!(bits.len(), (width * height) as usize);
        let mut counts = Vec::new();
        let mut current = false;
        let mut run: u32 = 0;
        for &bit in bits {
            if bit == current {
                run += 1;
            } else {
                counts.push(run);
                current = bit;
                run = 1;
            }
        }
        counts.push(run);
        Self {
            width,
            height,
            counts,
        }
    }

    /// Expands back to a row-major bitmap of `width * height` entries.
    pub fn decode(&self) -> Vec<bool> {
        let mut bits = Vec::with_capacity((self.width * self.height) as usize);
        let mut value = false;
        for &run in &self.counts {
            bits.extend(std::iter::repeat(value).take(run as usize));
            value = !value;
        }
        bits.truncate((self.width * self.height) as usize);
        bits
    }

    /// Number of foreground pixels, without materializing the bitmap.
    pub fn area(&self) -> u32 {
        self.counts.iter().skip(1).step_by(2).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_exact() {
        let bits = vec![
            false, false, true, true, //
            true, false, false, true, //
            true, true, true, false,
        ];
        let mask = Mask::encode(&bits, 4, 3);
        assert_eq!(mask.decode(), bits);
        assert_eq!(mask.area(), 7);
    }

    #[test]
    fn leading_foreground_starts_with_zero_run() {
        let bits = vec![true, true, false, false];
        let mask = Mask::encode(&bits, 4, 1);
        assert_eq!(mask.counts, vec![0, 2, 2]);
        assert_eq!(mask.decode(), bits);
    }

    #[test]
    fn uniform_grids() {
        let empty = Mask::encode(&[false; 16], 4, 4);
        assert_eq!(empty.counts, vec![16]);
        assert_eq!(empty.area(), 0);

        let full = Mask::encode(&[true; 16], 4, 4);
        assert_eq!(full.counts, vec![0, 16]);
        assert_eq!(full.area(), 16);
    }
}

use serde::{Deserialize, Serialize};

/// Bounding box of one detected face, in source-frame pixels.
///
/// Travels on the wire as `[x, y, w, h]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct FaceBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl FaceBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Box from corner coordinates, as most detectors report them.
    pub fn from_corners(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    pub fn center(&self) -> (i32, i32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

impl From<[i32; 4]> for FaceBox {
    fn from(v: [i32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<FaceBox> for [i32; 4] {
    fn from(b: FaceBox) -> Self {
        [b.x, b.y, b.width, b.height]
    }
}

use serde::Serialize;

use crate::error::ConvertError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Rect {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn contains(&self, point: [f32; 2]) -> bool {
        point[0] >= self.x1 && point[0] <= self.x2 && point[1] >= self.y1 && point[1] <= self.y2
    }
}

/// Reduces a polygon to the axis-aligned rectangle spanning all of its points.
pub fn rect_from_polygon(points: &[[f32; 2]]) -> Result<Rect, ConvertError> {
    let Some(first) = points.first() else {
        return Err(ConvertError::InvalidGeometry(
            "polygon has no points".to_string(),
        ));
    };
    let mut rect = Rect {
        x1: first[0],
        y1: first[1],
        x2: first[0],
        y2: first[1],
    };
    for point in points {
        if !point[0].is_finite() || !point[1].is_finite() {
            return Err(ConvertError::InvalidGeometry(format!(
                "non-finite point ({}, {})",
                point[0], point[1]
            )));
        }
        rect.x1 = rect.x1.min(point[0]);
        rect.y1 = rect.y1.min(point[1]);
        rect.x2 = rect.x2.max(point[0]);
        rect.y2 = rect.y2.max(point[1]);
    }
    Ok(rect)
}

/// Overlap of `[start1, end1]` and `[start2, end2]` divided by the shorter length.
pub fn overlap_ratio(start1: f32, end1: f32, start2: f32, end2: f32) -> f32 {
    let shorter = (end1 - start1).min(end2 - start2);
    if shorter <= 0.0 {
        return 0.0;
    }
    let overlap = (end1.min(end2) - start1.max(start2)).max(0.0);
    overlap / shorter
}

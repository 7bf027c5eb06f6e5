//! Atlas layout math: grid selection for N materials and the padded UV
//! sub-rectangle assigned to each. The UV remap into cells is the intended
//! final state of atlas baking, not a probe side effect, so it does not go
//! through the transaction machinery.

use anyhow::{Result, bail};

use crate::engine::MeshUvStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasLayout {
    pub columns: u32,
    pub rows: u32,
}

impl AtlasLayout {
    pub fn capacity(&self) -> u32 {
        self.columns * self.rows
    }
}

/// Grid for `material_count` items. Hand-picked layouts up to 16, then the
/// smallest square that fits.
pub fn plan_layout(material_count: usize) -> AtlasLayout {
    let (columns, rows) = match material_count {
        0 | 1 => (1, 1),
        2 => (2, 1),
        3 | 4 => (2, 2),
        5 | 6 => (3, 2),
        7..=9 => (3, 3),
        10..=12 => (4, 3),
        13..=16 => (4, 4),
        n => {
            let side = (n as f64).sqrt().ceil() as u32;
            (side, side)
        }
    };
    AtlasLayout { columns, rows }
}

/// Padded sub-rectangle for one atlas index. Padding is expressed as a
/// fraction of the whole atlas and divided by the grid dimension, so it
/// shrinks with cell size; padding < 0.5 keeps every cell non-degenerate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtlasCell {
    pub u_min: f32,
    pub v_min: f32,
    pub u_max: f32,
    pub v_max: f32,
}

impl AtlasCell {
    pub fn width(&self) -> f32 {
        self.u_max - self.u_min
    }

    pub fn height(&self) -> f32 {
        self.v_max - self.v_min
    }

    pub fn overlaps(&self, other: &AtlasCell) -> bool {
        self.u_min < other.u_max
            && other.u_min < self.u_max
            && self.v_min < other.v_max
            && other.v_min < self.v_max
    }
}

pub fn cell_bounds(layout: AtlasLayout, index: usize, padding: f32) -> AtlasCell {
    let col = (index as u32) % layout.columns;
    let row = (index as u32) / layout.columns;

    let u_size = 1.0 / layout.columns as f32;
    let v_size = 1.0 / layout.rows as f32;

    let pad_u = padding / layout.columns as f32;
    let pad_v = padding / layout.rows as f32;

    AtlasCell {
        u_min: col as f32 * u_size + pad_u,
        v_min: row as f32 * v_size + pad_v,
        u_max: (col + 1) as f32 * u_size - pad_u,
        v_max: (row + 1) as f32 * v_size - pad_v,
    }
}

/// Permanently remaps every face's loop UVs into the cell assigned to its
/// material index. Faces whose material index exceeds the layout capacity
/// are left untouched.
pub fn remap_uvs_into_cells(
    uv: &mut dyn MeshUvStore,
    layout: AtlasLayout,
    material_count: usize,
    padding: f32,
) -> Result<()> {
    if material_count > layout.capacity() as usize {
        bail!(
            "atlas layout {}x{} cannot accommodate {} materials",
            layout.columns,
            layout.rows,
            material_count
        );
    }

    for face in 0..uv.face_count() {
        let index = uv.face_material_index(face);
        if index >= material_count {
            continue;
        }
        let cell = cell_bounds(layout, index, padding);
        for corner in 0..uv.loop_count(face) {
            let [u, v] = uv.loop_uv(face, corner);
            uv.set_loop_uv(
                face,
                corner,
                [
                    cell.u_min + u * cell.width(),
                    cell.v_min + v * cell.height(),
                ],
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_table_matches_expected_grids() {
        assert_eq!(plan_layout(1), AtlasLayout { columns: 1, rows: 1 });
        assert_eq!(plan_layout(2), AtlasLayout { columns: 2, rows: 1 });
        assert_eq!(plan_layout(4), AtlasLayout { columns: 2, rows: 2 });
        assert_eq!(plan_layout(6), AtlasLayout { columns: 3, rows: 2 });
        assert_eq!(plan_layout(9), AtlasLayout { columns: 3, rows: 3 });
        assert_eq!(plan_layout(12), AtlasLayout { columns: 4, rows: 3 });
        assert_eq!(plan_layout(16), AtlasLayout { columns: 4, rows: 4 });
        assert_eq!(plan_layout(17), AtlasLayout { columns: 5, rows: 5 });
    }

    #[test]
    fn cells_stay_inside_unit_square() {
        let layout = plan_layout(6);
        for i in 0..6 {
            let c = cell_bounds(layout, i, 0.02);
            assert!(c.u_min >= 0.0 && c.u_max <= 1.0);
            assert!(c.v_min >= 0.0 && c.v_max <= 1.0);
            assert!(c.width() > 0.0 && c.height() > 0.0);
        }
    }
}

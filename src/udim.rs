//! UDIM tile math and the temporary loop-UV renormalization used while a
//! non-default tile is being baked. Tile numbering: `1001 + u + 10*v`, ten
//! tiles per row, valid ids 1001..=1100.

use std::collections::HashMap;

use anyhow::{Result, bail};

use crate::engine::MeshUvStore;

pub const FIRST_TILE: u32 = 1001;
pub const LAST_TILE: u32 = 1100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UdimTile(pub u32);

impl UdimTile {
    pub fn new(number: u32) -> Result<Self> {
        if !(FIRST_TILE..=LAST_TILE).contains(&number) {
            bail!("UDIM tile {number} outside valid range {FIRST_TILE}..={LAST_TILE}");
        }
        Ok(Self(number))
    }

    /// Tile containing the given UV coordinate, if it lands in the valid grid.
    pub fn containing(u: f32, v: f32) -> Option<Self> {
        if u < 0.0 || v < 0.0 {
            return None;
        }
        let (tu, tv) = (u.floor() as u32, v.floor() as u32);
        if tu >= 10 {
            return None;
        }
        Self::new(FIRST_TILE + tu + 10 * tv).ok()
    }

    pub fn coords(self) -> (u32, u32) {
        let index = self.0 - FIRST_TILE;
        (index % 10, index / 10)
    }

    pub fn from_coords(tile_u: u32, tile_v: u32) -> Result<Self> {
        if tile_u >= 10 {
            bail!("UDIM tile column {tile_u} outside 0..10");
        }
        Self::new(FIRST_TILE + tile_u + 10 * tile_v)
    }

    /// The tile's 1x1 window in UV space.
    pub fn bounds(self) -> TileBounds {
        let (tu, tv) = self.coords();
        TileBounds {
            u_min: tu as f32,
            v_min: tv as f32,
            u_max: (tu + 1) as f32,
            v_max: (tv + 1) as f32,
        }
    }

    pub fn is_default(self) -> bool {
        self.0 == FIRST_TILE
    }
}

impl std::fmt::Display for UdimTile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileBounds {
    pub u_min: f32,
    pub v_min: f32,
    pub u_max: f32,
    pub v_max: f32,
}

impl TileBounds {
    pub fn contains(&self, u: f32, v: f32) -> bool {
        (self.u_min..self.u_max).contains(&u) && (self.v_min..self.v_max).contains(&v)
    }
}

/// Tiles actually referenced by the mesh, ascending. Loops outside the valid
/// grid are ignored.
pub fn detect_tiles(uv: &dyn MeshUvStore) -> Vec<UdimTile> {
    let mut tiles: Vec<UdimTile> = Vec::new();
    for face in 0..uv.face_count() {
        for corner in 0..uv.loop_count(face) {
            let [u, v] = uv.loop_uv(face, corner);
            if let Some(tile) = UdimTile::containing(u, v) {
                if !tiles.contains(&tile) {
                    tiles.push(tile);
                }
            }
        }
    }
    tiles.sort_by_key(|t| t.0);
    tiles
}

/// Undo map produced by [`normalize_for_tile`]: original UVs keyed by
/// (face, corner). Empty when the tile needed no renormalization.
pub type OriginalUvs = HashMap<(usize, usize), [f32; 2]>;

/// Shifts every loop inside `tile`'s window into the 0-1 range so the engine
/// sees a conventional UV layout, recording originals for [`restore_uvs`].
/// Loops outside the tile are recorded but left untouched.
pub fn normalize_for_tile(uv: &mut dyn MeshUvStore, tile: UdimTile) -> OriginalUvs {
    let bounds = tile.bounds();
    let (tile_u, tile_v) = tile.coords();
    let mut originals = OriginalUvs::new();

    for face in 0..uv.face_count() {
        for corner in 0..uv.loop_count(face) {
            let [u, v] = uv.loop_uv(face, corner);
            originals.insert((face, corner), [u, v]);
            if bounds.contains(u, v) {
                uv.set_loop_uv(face, corner, [u - tile_u as f32, v - tile_v as f32]);
            }
        }
    }
    originals
}

pub fn restore_uvs(uv: &mut dyn MeshUvStore, originals: &OriginalUvs) {
    for (&(face, corner), &orig) in originals {
        uv.set_loop_uv(face, corner, orig);
    }
}

/// Standard UDIM file naming: `<base>.<tile>.<channel>.<ext>`.
pub fn udim_file_name(base: &str, tile: UdimTile, channel_suffix: &str, extension: &str) -> String {
    format!("{base}.{tile}.{channel_suffix}.{extension}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_coords_round_trip() {
        for number in FIRST_TILE..=LAST_TILE {
            let tile = UdimTile::new(number).unwrap();
            let (tu, tv) = tile.coords();
            assert_eq!(UdimTile::from_coords(tu, tv).unwrap(), tile);
        }
    }

    #[test]
    fn containing_matches_bounds() {
        let tile = UdimTile::containing(1.5, 2.25).unwrap();
        assert_eq!(tile.0, 1001 + 1 + 10 * 2);
        assert!(tile.bounds().contains(1.5, 2.25));
        assert!(UdimTile::containing(-0.1, 0.5).is_none());
        assert!(UdimTile::containing(10.2, 0.0).is_none());
    }

    #[test]
    fn udim_names_use_standard_layout() {
        let tile = UdimTile::new(1012).unwrap();
        assert_eq!(
            udim_file_name("chest_Gold", tile, "BaseColor", "png"),
            "chest_Gold.1012.BaseColor.png"
        );
    }
}

// Grid mesh generation
//
// A flat lattice in the XZ plane. Heights are not part of the vertex: the
// vertex shader adds them from a separate buffer written by the wave step.

use bytemuck::{Pod, Zeroable};

/// Water colour for every vertex
pub const GRID_COLOR: [f32; 3] = [0.1, 0.35, 0.8];

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

#[derive(Debug, Clone)]
pub struct GridMesh {
    pub width: u32,
    pub height: u32,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl GridMesh {
    /// Build a `width` x `height` vertex lattice centred on the origin.
    ///
    /// Vertices are row-major (x fastest). Each cell becomes two triangles.
    /// `width * height` must be within `compute::MAX_GRID_VERTICES`, which
    /// `Config::validate` enforces.
    pub fn new(width: u32, height: u32, spacing: f32) -> Self {
        let half_width = (width.saturating_sub(1)) as f32 * spacing * 0.5;
        let half_depth = (height.saturating_sub(1)) as f32 * spacing * 0.5;

        let vertices = (0..height)
            .flat_map(|row| (0..width).map(move |col| (row, col)))
            .map(|(row, col)| Vertex {
                position: [
                    col as f32 * spacing - half_width,
                    0.0,
                    row as f32 * spacing - half_depth,
                ],
                color: GRID_COLOR,
            })
            .collect();

        let mut indices = Vec::with_capacity(index_count(width, height) as usize);
        for row in 0..height.saturating_sub(1) {
            for col in 0..width.saturating_sub(1) {
                let i = row * width + col;
                indices.extend_from_slice(&[i, i + 1, i + width]);
                indices.extend_from_slice(&[i + width, i + width + 1, i + 1]);
            }
        }

        Self {
            width,
            height,
            vertices,
            indices,
        }
    }

    pub fn vertex_count(&self) -> u32 {
        self.width * self.height
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

/// Indices needed for a grid of `width` x `height` vertices
pub fn index_count(width: u32, height: u32) -> u32 {
    width.saturating_sub(1) * height.saturating_sub(1) * 6
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn counts_match_dimensions() {
        let mesh = GridMesh::new(4, 3, 1.0);
        assert_eq!(mesh.vertices.len(), 12);
        assert_eq!(mesh.vertex_count(), 12);
        assert_eq!(mesh.index_count(), 3 * 2 * 6);
        assert_eq!(index_count(4, 3), mesh.index_count());
    }

    #[test]
    fn largest_grid_counts_fit_u32() {
        use crate::compute::MAX_GRID_VERTICES;
        // Square and degenerate strip shapes at the vertex cap
        assert_eq!(4096 * 4096, MAX_GRID_VERTICES);
        assert_eq!(index_count(4096, 4096), 4095 * 4095 * 6);
        assert_eq!(index_count(2, MAX_GRID_VERTICES / 2), (MAX_GRID_VERTICES / 2 - 1) * 6);
    }

    #[test]
    fn first_cell_triangles() {
        let mesh = GridMesh::new(3, 3, 1.0);
        assert_eq!(&mesh.indices[..6], &[0, 1, 3, 3, 4, 1]);
        // Second cell of the first row
        assert_eq!(&mesh.indices[6..12], &[1, 2, 4, 4, 5, 2]);
    }

    #[test]
    fn indices_stay_in_range() {
        let mesh = GridMesh::new(7, 5, 0.25);
        assert!(mesh.indices.iter().all(|&i| i < mesh.vertex_count()));
    }

    #[test]
    fn lattice_is_centred_and_flat() {
        let mesh = GridMesh::new(5, 3, 0.5);

        let first = mesh.vertices[0].position;
        let last = mesh.vertices[mesh.vertices.len() - 1].position;
        assert_relative_eq!(first[0], -1.0);
        assert_relative_eq!(first[2], -0.5);
        assert_relative_eq!(last[0], 1.0);
        assert_relative_eq!(last[2], 0.5);

        assert!(mesh.vertices.iter().all(|v| v.position[1] == 0.0));
        assert!(mesh.vertices.iter().all(|v| v.color == GRID_COLOR));
    }

    #[test]
    fn rows_are_x_major() {
        let mesh = GridMesh::new(3, 2, 1.0);
        // Index 1 is one step along x, index 3 one step along z
        assert_relative_eq!(mesh.vertices[1].position[0] - mesh.vertices[0].position[0], 1.0);
        assert_relative_eq!(mesh.vertices[3].position[2] - mesh.vertices[0].position[2], 1.0);
    }

    #[test]
    fn vertex_layout_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 24);
        assert_eq!(std::mem::offset_of!(Vertex, color), 12);
    }
}

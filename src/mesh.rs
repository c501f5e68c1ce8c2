//! Triangle-mesh representation and the marching-cubes kernel shared by the
//! brain isosurface and the tumor-shell overlay.
//!
//! The kernel walks the grid in a fixed z-outer order and deduplicates edge
//! vertices through a two-slab cache, so mesh topology and vertex ordering are
//! reproducible for a given field and isovalue. Cancellation is checked once
//! per z-slab.

use crate::cancel::CancelFlag;
use crate::error::RenderError;

use glam::Vec3;
use ndarray::Array3;

/// A renderable boundary representation extracted from a scalar field.
///
/// Positions are in physical millimetres once scaled by the caller (the
/// kernel itself emits grid-index coordinates, `x` in `Vec3::x` and so on).
/// `depths` carries the per-vertex normalized peel depth when the mesh was
/// produced or annotated by the peel engine, enabling clip-at-render.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurfaceMesh {
    pub positions: Vec<Vec3>,
    /// Per-vertex normals, accumulated from adjacent faces and normalized.
    pub normals: Vec<Vec3>,
    /// Triangle indices; every 3 consecutive entries form one triangle.
    pub indices: Vec<u32>,
    /// Normalized radial peel depth per vertex, if annotated.
    pub depths: Option<Vec<f32>>,
}

impl SurfaceMesh {
    pub fn num_triangles(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Scale grid-index positions into physical space, `spacing` in
    /// millimetres ordered (z, y, x) to match the volume layout.
    pub fn scale_to_physical(&mut self, spacing: (f32, f32, f32)) {
        let factor = Vec3::new(spacing.2, spacing.1, spacing.0);
        for p in &mut self.positions {
            *p *= factor;
        }
    }

    /// Vertex positions as raw bytes for the display layer's vertex buffer.
    pub fn position_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.positions)
    }

    /// Triangle indices as raw bytes for the display layer's index buffer.
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

/// Two-slab cache of edge-vertex indices, keyed by grid node and edge axis.
/// Only the current and previous z-slab are live at any time.
struct EdgeCache {
    nx: usize,
    ny: usize,
    slots: Vec<[u32; 3]>,
}

impl EdgeCache {
    fn new(nx: usize, ny: usize) -> Self {
        Self {
            nx,
            ny,
            slots: vec![[0; 3]; nx * ny * 2],
        }
    }

    #[inline]
    fn slot(&self, x: usize, y: usize, z: usize) -> usize {
        self.nx * self.ny * (z & 1) + y * self.nx + x
    }

    #[inline]
    fn get(&self, x: usize, y: usize, z: usize, axis: usize) -> u32 {
        self.slots[self.slot(x, y, z)][axis]
    }

    #[inline]
    fn set(&mut self, x: usize, y: usize, z: usize, axis: usize, index: u32) {
        let slot = self.slot(x, y, z);
        self.slots[slot][axis] = index;
    }
}

struct Kernel<'a> {
    field: &'a Array3<f32>,
    isovalue: f32,
    cache: EdgeCache,
    mesh: SurfaceMesh,
}

impl<'a> Kernel<'a> {
    /// Corner value shifted so the surface sits at zero.
    #[inline]
    fn sample(&self, x: usize, y: usize, z: usize) -> f32 {
        self.field[[z, y, x]] - self.isovalue
    }

    /// Create the interpolated vertex where the surface crosses the edge
    /// starting at grid node (x, y, z) along `axis`, if the endpoint signs
    /// differ. Records the vertex index in the slab cache.
    #[inline]
    fn edge_vertex(&mut self, va: f32, vb: f32, axis: usize, x: usize, y: usize, z: usize) {
        if (va < 0.0) == (vb < 0.0) {
            return;
        }
        let mut position = Vec3::new(x as f32, y as f32, z as f32);
        position[axis] += va / (va - vb);
        let index = self.mesh.positions.len() as u32;
        self.cache.set(x, y, z, axis, index);
        self.mesh.positions.push(position);
        self.mesh.normals.push(Vec3::ZERO);
    }

    /// Accumulate the geometric normal of triangle (a, b, c) onto its vertices.
    #[inline]
    fn accumulate_normal(&mut self, a: u32, b: u32, c: u32) {
        let va = self.mesh.positions[a as usize];
        let vb = self.mesh.positions[b as usize];
        let vc = self.mesh.positions[c as usize];
        let n = (vc - vb).cross(va - vb);
        self.mesh.normals[a as usize] += n;
        self.mesh.normals[b as usize] += n;
        self.mesh.normals[c as usize] += n;
    }

    fn cell(&mut self, x: usize, y: usize, z: usize) {
        let mut vs = [0.0f32; 8];
        vs[0] = self.sample(x, y, z);
        vs[1] = self.sample(x + 1, y, z);
        vs[2] = self.sample(x, y + 1, z);
        vs[3] = self.sample(x + 1, y + 1, z);
        vs[4] = self.sample(x, y, z + 1);
        vs[5] = self.sample(x + 1, y, z + 1);
        vs[6] = self.sample(x, y + 1, z + 1);
        vs[7] = self.sample(x + 1, y + 1, z + 1);

        let mut config = 0usize;
        for (bit, &v) in vs.iter().enumerate() {
            config |= usize::from(v < 0.0) << bit;
        }
        // Fully inside or fully outside, no surface crossing.
        if config == 0 || config == 255 {
            return;
        }

        // Each cube owns the three edges leaving its far corner; edges on the
        // low-boundary faces are only computed by the first cube that sees
        // them, every other cube reads them from the slab cache.
        if y == 0 && z == 0 {
            self.edge_vertex(vs[0], vs[1], 0, x, y, z);
        }
        if z == 0 {
            self.edge_vertex(vs[2], vs[3], 0, x, y + 1, z);
        }
        if y == 0 {
            self.edge_vertex(vs[4], vs[5], 0, x, y, z + 1);
        }
        self.edge_vertex(vs[6], vs[7], 0, x, y + 1, z + 1);

        if x == 0 && z == 0 {
            self.edge_vertex(vs[0], vs[2], 1, x, y, z);
        }
        if z == 0 {
            self.edge_vertex(vs[1], vs[3], 1, x + 1, y, z);
        }
        if x == 0 {
            self.edge_vertex(vs[4], vs[6], 1, x, y, z + 1);
        }
        self.edge_vertex(vs[5], vs[7], 1, x + 1, y, z + 1);

        if x == 0 && y == 0 {
            self.edge_vertex(vs[0], vs[4], 2, x, y, z);
        }
        if y == 0 {
            self.edge_vertex(vs[1], vs[5], 2, x + 1, y, z);
        }
        if x == 0 {
            self.edge_vertex(vs[2], vs[6], 2, x, y + 1, z);
        }
        self.edge_vertex(vs[3], vs[7], 2, x + 1, y + 1, z);

        let edge_indices = [
            self.cache.get(x, y, z, 0),
            self.cache.get(x, y + 1, z, 0),
            self.cache.get(x, y, z + 1, 0),
            self.cache.get(x, y + 1, z + 1, 0),
            self.cache.get(x, y, z, 1),
            self.cache.get(x + 1, y, z, 1),
            self.cache.get(x, y, z + 1, 1),
            self.cache.get(x + 1, y, z + 1, 1),
            self.cache.get(x, y, z, 2),
            self.cache.get(x + 1, y, z, 2),
            self.cache.get(x, y + 1, z, 2),
            self.cache.get(x + 1, y + 1, z, 2),
        ];

        let entry = TRIANGLE_TABLE[config];
        let num_triangles = (entry & 0xF) as usize;
        let index_base = self.mesh.indices.len();

        let mut offset = 4;
        for _ in 0..num_triangles * 3 {
            let edge = ((entry >> offset) & 0xF) as usize;
            self.mesh.indices.push(edge_indices[edge]);
            offset += 4;
        }

        for t in 0..num_triangles {
            let a = self.mesh.indices[index_base + t * 3];
            let b = self.mesh.indices[index_base + t * 3 + 1];
            let c = self.mesh.indices[index_base + t * 3 + 2];
            self.accumulate_normal(a, b, c);
        }
    }
}

/// Extract the isosurface of `field` at `isovalue` as a triangle mesh in
/// grid-index coordinates.
///
/// Traversal order is fixed (z outer, y, x inner), so the output is
/// byte-reproducible for identical inputs.
///
/// # Errors
///
/// Returns [`RenderError::InvalidInput`] if any grid dimension is below 2 and
/// [`RenderError::Cancelled`] if the flag is raised mid-extraction.
pub fn marching_cubes(
    field: &Array3<f32>,
    isovalue: f32,
    cancel: &CancelFlag,
) -> Result<SurfaceMesh, RenderError> {
    let (nz, ny, nx) = field.dim();
    if nx < 2 || ny < 2 || nz < 2 {
        return Err(RenderError::InvalidInput(format!(
            "grid {nx}x{ny}x{nz} too small for surface extraction, all dimensions must be >= 2"
        )));
    }

    let mut kernel = Kernel {
        field,
        isovalue,
        cache: EdgeCache::new(nx, ny),
        mesh: SurfaceMesh::default(),
    };

    for z in 0..nz - 1 {
        cancel.checkpoint()?;
        for y in 0..ny - 1 {
            for x in 0..nx - 1 {
                kernel.cell(x, y, z);
            }
        }
    }

    let mut mesh = kernel.mesh;
    for normal in &mut mesh.normals {
        let len = normal.length();
        if len > 1e-10 {
            *normal /= len;
        }
    }
    Ok(mesh)
}

/// Packed triangle configurations, one `u64` per cube configuration.
///
/// Bits `[3:0]` hold the triangle count (0-5); each following 4-bit group is
/// an edge index (0-11) for one triangle vertex.
#[rustfmt::skip]
static TRIANGLE_TABLE: [u64; 256] = [
    0, 33793, 36945, 159668546,
    18961, 144771090, 5851666, 595283255635,
    20913, 67640146, 193993474, 655980856339,
    88782242, 736732689667, 797430812739, 194554754,
    26657, 104867330, 136709522, 298069416227,
    109224258, 8877909667, 318136408323, 1567994331701604,
    189884450, 350847647843, 559958167731, 3256298596865604,
    447393122899, 651646838401572, 2538311371089956, 737032694307,
    29329, 43484162, 91358498, 374810899075,
    158485010, 178117478419, 88675058979, 433581536604804,
    158486962, 649105605635, 4866906995, 3220959471609924,
    649165714851, 3184943915608436, 570691368417972, 595804498035,
    124295042, 431498018963, 508238522371, 91518530,
    318240155763, 291789778348404, 1830001131721892, 375363605923,
    777781811075, 1136111028516116, 3097834205243396, 508001629971,
    2663607373704004, 680242583802939237, 333380770766129845, 179746658,
    42545, 138437538, 93365810, 713842853011,
    73602098, 69575510115, 23964357683, 868078761575828,
    28681778, 713778574611, 250912709379, 2323825233181284,
    302080811955, 3184439127991172, 1694042660682596, 796909779811,
    176306722, 150327278147, 619854856867, 1005252473234484,
    211025400963, 36712706, 360743481544788, 150627258963,
    117482600995, 1024968212107700, 2535169275963444, 4734473194086550421,
    628107696687956, 9399128243, 5198438490361643573, 194220594,
    104474994, 566996932387, 427920028243, 2014821863433780,
    492093858627, 147361150235284, 2005882975110676, 9671606099636618005,
    777701008947, 3185463219618820, 482784926917540, 2900953068249785909,
    1754182023747364, 4274848857537943333, 13198752741767688709, 2015093490989156,
    591272318771, 2659758091419812, 1531044293118596, 298306479155,
    408509245114388, 210504348563, 9248164405801223541, 91321106,
    2660352816454484, 680170263324308757, 8333659837799955077, 482966828984116,
    4274926723105633605, 3184439197724820, 192104450, 15217,
    45937, 129205250, 129208402, 529245952323,
    169097138, 770695537027, 382310500883, 2838550742137652,
    122763026, 277045793139, 81608128403, 1991870397907988,
    362778151475, 2059003085103236, 2132572377842852, 655681091891,
    58419234, 239280858627, 529092143139, 1568257451898804,
    447235128115, 679678845236084, 2167161349491220, 1554184567314086709,
    165479003923, 1428768988226596, 977710670185060, 10550024711307499077,
    1305410032576132, 11779770265620358997, 333446212255967269, 978168444447012,
    162736434, 35596216627, 138295313843, 891861543990356,
    692616541075, 3151866750863876, 100103641866564, 6572336607016932133,
    215036012883, 726936420696196, 52433666, 82160664963,
    2588613720361524, 5802089162353039525, 214799000387, 144876322,
    668013605731, 110616894681956, 1601657732871812, 430945547955,
    3156382366321172, 7644494644932993285, 3928124806469601813, 3155990846772900,
    339991010498708, 10743689387941597493, 5103845475, 105070898,
    3928064910068824213, 156265010, 1305138421793636, 27185,
    195459938, 567044449971, 382447549283, 2175279159592324,
    443529919251, 195059004769796, 2165424908404116, 1554158691063110021,
    504228368803, 1436350466655236, 27584723588724, 1900945754488837749,
    122971970, 443829749251, 302601798803, 108558722,
    724700725875, 43570095105972, 2295263717447940, 2860446751369014181,
    2165106202149444, 69275726195, 2860543885641537797, 2165106320445780,
    2280890014640004, 11820349930268368933, 8721082628082003989, 127050770,
    503707084675, 122834978, 2538193642857604, 10129,
    801441490467, 2923200302876740, 1443359556281892, 2901063790822564949,
    2728339631923524, 7103874718248233397, 12775311047932294245, 95520290,
    2623783208098404, 1900908618382410757, 137742672547, 2323440239468964,
    362478212387, 727199575803140, 73425410, 34337,
    163101314, 668566030659, 801204361987, 73030562,
    591509145619, 162574594, 100608342969108, 5553,
    724147968595, 1436604830452292, 176259090, 42001,
    143955266, 2385, 18433, 0,
];

#[cfg(test)]
mod tests {
    use super::*;

    fn run(field: &Array3<f32>, isovalue: f32) -> SurfaceMesh {
        marching_cubes(field, isovalue, &CancelFlag::new()).unwrap()
    }

    #[test]
    fn uniform_field_yields_no_surface() {
        let above = Array3::from_elem((3, 3, 3), 1.0);
        assert!(run(&above, 0.0).is_empty());
        let below = Array3::from_elem((3, 3, 3), -1.0);
        assert!(run(&below, 0.0).is_empty());
    }

    #[test]
    fn single_corner_crossing_emits_one_triangle() {
        let mut field = Array3::from_elem((2, 2, 2), 1.0);
        field[[0, 0, 0]] = -1.0;
        let mesh = run(&field, 0.0);
        assert_eq!(mesh.num_triangles(), 1);
        assert_eq!(mesh.positions.len(), 3);
    }

    #[test]
    fn sphere_mesh_lies_on_sphere() {
        let n = 20usize;
        let center = Vec3::splat(n as f32 / 2.0);
        let radius = n as f32 / 4.0;
        let field = Array3::from_shape_fn((n, n, n), |(z, y, x)| {
            (Vec3::new(x as f32, y as f32, z as f32) - center).length() - radius
        });

        let mesh = run(&field, 0.0);
        assert!(mesh.num_triangles() > 100);
        assert_eq!(mesh.positions.len(), mesh.normals.len());
        assert_eq!(mesh.indices.len() % 3, 0);

        for &index in &mesh.indices {
            assert!((index as usize) < mesh.positions.len());
        }
        for normal in &mesh.normals {
            assert!((normal.length() - 1.0).abs() < 0.01);
        }
        for position in &mesh.positions {
            let distance = (*position - center).length();
            assert!(
                (distance - radius).abs() < 2.0,
                "vertex {position:?} is {distance} from center, expected ~{radius}"
            );
        }
    }

    #[test]
    fn extraction_is_reproducible() {
        let field = Array3::from_shape_fn((8, 8, 8), |(z, y, x)| {
            (x as f32).sin() + (y as f32).cos() + z as f32 * 0.1
        });
        let a = run(&field, 0.5);
        let b = run(&field, 0.5);
        assert_eq!(a, b);
    }

    #[test]
    fn cancellation_stops_extraction() {
        let field = Array3::zeros((8, 8, 8));
        let flag = CancelFlag::new();
        flag.cancel();
        assert_eq!(
            marching_cubes(&field, 0.5, &flag),
            Err(RenderError::Cancelled)
        );
    }

    #[test]
    fn too_small_grid_is_rejected() {
        let field = Array3::zeros((1, 4, 4));
        assert!(matches!(
            marching_cubes(&field, 0.0, &CancelFlag::new()),
            Err(RenderError::InvalidInput(_))
        ));
    }

    #[test]
    fn physical_scaling_applies_spacing() {
        let mut mesh = SurfaceMesh {
            positions: vec![Vec3::new(1.0, 2.0, 3.0)],
            normals: vec![Vec3::Z],
            indices: vec![],
            depths: None,
        };
        mesh.scale_to_physical((2.0, 0.5, 1.0));
        assert_eq!(mesh.positions[0], Vec3::new(1.0, 1.0, 6.0));
    }
}

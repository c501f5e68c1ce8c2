//! End-to-end scenario: a synthetic 64x64x64 scan with a spherical brain
//! (radius 30) and a small off-axis tumor blob (radius 5), driven through the
//! full 2D and 3D paths.

use glam::Vec3;
use mri_volume::{
    CancelFlag, IsosurfaceBuilder, Mask, Orientation, OverlayCompositor, PeelEngine, PeelState,
    RenderSession, SliceExtractor, VoxelVolume, WindowSettings,
};
use std::sync::Arc;

const N: usize = 64;
const BRAIN_RADIUS: f32 = 30.0;
const TUMOR_RADIUS: f32 = 5.0;

fn grid_center() -> Vec3 {
    Vec3::splat((N as f32 - 1.0) / 2.0)
}

fn tumor_center() -> Vec3 {
    grid_center() + Vec3::new(8.0, 0.0, 0.0)
}

fn synthetic_scan() -> (Arc<VoxelVolume>, Arc<Mask>) {
    let mut intensities = Vec::with_capacity(N * N * N);
    let mut weights = Vec::with_capacity(N * N * N);
    for z in 0..N {
        for y in 0..N {
            for x in 0..N {
                let p = Vec3::new(x as f32, y as f32, z as f32);
                intensities.push(if (p - grid_center()).length() < BRAIN_RADIUS {
                    1.0
                } else {
                    0.0
                });
                weights.push(if (p - tumor_center()).length() < TUMOR_RADIUS {
                    1.0
                } else {
                    0.0
                });
            }
        }
    }
    let volume = VoxelVolume::new((N, N, N), (1.0, 1.0, 1.0), intensities).unwrap();
    let mask = Mask::new((N, N, N), weights).unwrap();
    (Arc::new(volume), Arc::new(mask))
}

fn mean_radius(positions: &[Vec3]) -> f32 {
    let sum: f32 = positions
        .iter()
        .map(|p| (*p - grid_center()).length())
        .sum();
    sum / positions.len() as f32
}

#[test]
fn isosurface_approximates_the_brain_sphere() {
    let (volume, _) = synthetic_scan();
    let mesh = IsosurfaceBuilder::build(&volume, 0.5, &CancelFlag::new()).unwrap();
    assert!(mesh.num_triangles() > 1000);

    let radius = mean_radius(&mesh.positions);
    assert!(
        (radius - BRAIN_RADIUS).abs() < 1.5,
        "mean mesh radius {radius}, expected ~{BRAIN_RADIUS}"
    );
}

#[test]
fn peeling_exposes_an_interior_surface() {
    let (volume, _) = synthetic_scan();
    let engine = PeelEngine::new(volume, 0.5).unwrap();
    let peeled = engine
        .build(PeelState::new(0.6).unwrap(), &CancelFlag::new())
        .unwrap();
    assert!(!peeled.is_empty());

    // Erosion layers track the sphere radius, so depth 0.6 leaves roughly the
    // innermost 40% of the radius.
    let radius = mean_radius(&peeled.positions);
    let expected = (1.0 - 0.6) * BRAIN_RADIUS;
    assert!(
        (radius - expected).abs() < 4.0,
        "peeled surface radius {radius}, expected ~{expected}"
    );
}

#[test]
fn tumor_overlay_appears_once_its_depth_is_revealed() {
    let (volume, mask) = synthetic_scan();
    let engine = PeelEngine::new(volume.clone(), 0.5).unwrap();
    let compositor = OverlayCompositor::default();

    // Outer surface: every vertex sits ~30 voxels out, far from the tumor, so
    // no overlay geometry is tinted.
    let outer = engine
        .build(PeelState::new(0.0).unwrap(), &CancelFlag::new())
        .unwrap();
    let outer_overlay = compositor.composite_mesh(&outer, &mask, volume.spacing(), |z, y, x| {
        engine.visible(z, y, x, 0.0)
    });
    assert!(outer_overlay.weights.iter().all(|&w| w == 0.0));

    // Peeled to depth 0.6 the exposed surface passes through the tumor blob.
    let inner = engine
        .build(PeelState::new(0.6).unwrap(), &CancelFlag::new())
        .unwrap();
    let inner_overlay = compositor.composite_mesh(&inner, &mask, volume.spacing(), |z, y, x| {
        engine.visible(z, y, x, 0.6)
    });
    assert!(
        inner_overlay.weights.iter().any(|&w| w > 0.0),
        "tumor should be tinted once peeling reveals its depth"
    );
}

#[test]
fn slice_path_shows_the_tumor_overlay() {
    let (volume, mask) = synthetic_scan();
    let window = WindowSettings::robust_for(&volume);
    let index = tumor_center().z as usize;
    let slice =
        SliceExtractor::extract(&volume, Orientation::Axial, index, window, Some(&mask)).unwrap();

    let overlay = slice.overlay.as_ref().unwrap();
    let (ty, tx) = (tumor_center().y as usize, tumor_center().x as usize);
    assert_eq!(overlay[[ty, tx]], 1.0);
    assert_eq!(overlay[[2, 2]], 0.0);

    let composited = OverlayCompositor::default().composite_slice(&slice);
    let tumor_pixel = composited.get_pixel(tx as u32, ty as u32);
    assert!(tumor_pixel[0] > tumor_pixel[1], "tumor pixel not tinted");
}

#[tokio::test]
async fn full_session_round_trip() {
    let (volume, mask) = synthetic_scan();
    let volume = Arc::try_unwrap(volume).ok().unwrap();
    let mask = Arc::try_unwrap(mask).ok().unwrap();

    let mut session = RenderSession::new();
    session.load_volume(volume, Some(mask)).unwrap();
    session.set_peel_depth(0.6).unwrap();
    session.flush().await;

    let slice = session.slice_frame().expect("2D path committed");
    assert_eq!(slice.slice.dim(), (N, N));

    let surface = session.surface_frame().expect("3D path committed");
    assert_eq!(surface.peel_depth, 0.6);
    assert!(!surface.mesh.is_empty());
    let overlay = surface.overlay.as_ref().expect("mask supplied");
    assert!(overlay.weights.iter().any(|&w| w > 0.0));
    assert!(surface.tumor_shell.is_some());
}

use glam::Vec3;
use mri_volume::{Mask, RenderSession, VoxelVolume};

/// Synthetic scan: a spherical "brain" with a small off-axis "tumor" blob.
fn synthetic_scan(n: usize) -> (VoxelVolume, Mask) {
    let center = (n as f32 - 1.0) / 2.0;
    let brain_radius = n as f32 * 0.47;
    let tumor_center = Vec3::splat(center) + Vec3::new(6.0, 4.0, 0.0);
    let tumor_radius = n as f32 * 0.08;

    let mut intensities = Vec::with_capacity(n * n * n);
    let mut weights = Vec::with_capacity(n * n * n);
    for z in 0..n {
        for y in 0..n {
            for x in 0..n {
                let p = Vec3::new(x as f32, y as f32, z as f32);
                let brain = (p - Vec3::splat(center)).length() < brain_radius;
                let tumor = (p - tumor_center).length() < tumor_radius;
                intensities.push(if brain { 1.0 } else { 0.0 });
                weights.push(if tumor { 1.0 } else { 0.0 });
            }
        }
    }

    let volume = VoxelVolume::new((n, n, n), (1.0, 1.0, 1.0), intensities)
        .expect("should have built synthetic volume");
    let mask = Mask::new((n, n, n), weights).expect("should have built synthetic mask");
    (volume, mask)
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();

    let (volume, mask) = synthetic_scan(64);
    let mut session = RenderSession::new();
    session
        .load_volume(volume, Some(mask))
        .expect("should have loaded synthetic scan");
    session
        .set_peel_depth(0.4)
        .expect("should have accepted peel depth");
    session.flush().await;

    let slice = session
        .slice_frame()
        .expect("should have committed a slice frame");
    slice
        .composited
        .save("slice.png")
        .expect("should have saved composited slice");

    let surface = session
        .surface_frame()
        .expect("should have committed a surface frame");
    println!(
        "slice {}x{} written to slice.png, peeled surface has {} triangles",
        slice.slice.dim().1,
        slice.slice.dim().0,
        surface.mesh.num_triangles()
    );
}

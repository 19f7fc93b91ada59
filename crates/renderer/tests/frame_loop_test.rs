//! Frame loop tests over the headless backend.

use glam::{Mat4, Vec3};
use umbra_core::EngineConfig;
use umbra_platform::InputContext;
use umbra_renderer::backend::{GpuBackend, ResourceRef};
use umbra_renderer::headless::ImageKind;
use umbra_renderer::ubo::MvpUniform;
use umbra_renderer::{BindingLayout, Engine, FrameStatus, HeadlessBackend, RenderError};
use umbra_resources::{BaseMaterialDescription, DirectoryAssets, ObjectDescription, SceneDescription};
use umbra_rhi::vk;
use umbra_scene::{Light, Transform};

const EXTENT: vk::Extent2D = vk::Extent2D {
    width: 320,
    height: 240,
};

/// One light, one texture slot, two objects under one base material.
fn demo_scene() -> SceneDescription {
    SceneDescription {
        base_materials: vec![
            BaseMaterialDescription::new("lit", "shaders/lit.vert.spv", "shaders/lit.frag.spv")
                .with_textures(1, Some("builtin:white")),
        ],
        objects: vec![
            ObjectDescription::new("crate", "lit", "builtin:cube")
                .with_transform(Transform::new().with_position(Vec3::new(0.0, 0.5, 0.0))),
            ObjectDescription::new("floor", "lit", "builtin:plane")
                .with_textures(["builtin:checker"])
                .with_transform(Transform::new().with_uniform_scale(10.0)),
        ],
        lights: vec![Light {
            position: Vec3::new(4.0, 8.0, 4.0),
            ..Light::default()
        }],
    }
}

fn engine(frames: usize) -> Engine<HeadlessBackend> {
    let backend = HeadlessBackend::new(EXTENT.width, EXTENT.height);
    let mut engine = Engine::new(backend, EngineConfig::default()).expect("Failed to create engine");
    engine
        .load_scene(demo_scene(), &mut DirectoryAssets::new("."))
        .expect("Failed to load scene");
    engine
        .init_frame_resources(EXTENT, frames)
        .expect("Failed to init frame resources");
    engine
}

fn read_mvp(engine: &Engine<HeadlessBackend>, object: &str, slot: usize) -> MvpUniform {
    let key = engine
        .scene()
        .and_then(|s| s.object_by_name(object))
        .expect("object exists");
    let buffer = engine.mvp_buffer(key, slot).expect("mvp buffer");
    let bytes = engine.backend().read_host_buffer(buffer).expect("readable");
    bytemuck::pod_read_unaligned(&bytes)
}

#[test]
fn frames_alternate_slots_and_write_camera_matrices() {
    let mut engine = engine(2);
    let input = InputContext::new();

    let mut slots = Vec::new();
    let mut views: Vec<Option<Mat4>> = vec![None, None];
    for step in 0..3 {
        engine.camera_mut().position = Vec3::new(step as f32, 1.0, 5.0 + step as f32);
        let report = engine.render_frame(0.016, &input).unwrap();
        let slot = report.frame_slot;
        slots.push(slot);

        let view = engine.camera().view_matrix();
        let mvp = read_mvp(&engine, "crate", slot);
        assert_eq!(mvp.view, view, "frame {step} wrote slot {slot}");
        assert_eq!(mvp.proj, engine.camera().projection_matrix());
        assert_eq!(mvp.model, Mat4::from_translation(Vec3::new(0.0, 0.5, 0.0)));

        // The other slot still holds the camera of the frame that last used it.
        let other = 1 - slot;
        if let Some(previous) = views[other] {
            let stale = read_mvp(&engine, "crate", other);
            assert_eq!(stale.view, previous);
            assert_ne!(stale.view, view);
        }
        views[slot] = Some(view);
    }
    assert_eq!(slots, vec![0, 1, 0]);

    let floor = read_mvp(&engine, "floor", 0);
    assert_eq!(floor.model, Mat4::from_scale(Vec3::splat(10.0)));

    assert_eq!(engine.backend().presented_images(), &[0, 1, 2]);
    assert!(engine.backend().hazards().is_empty());
}

#[test]
fn no_hazards_for_any_frame_count() {
    for frames in 1..=3 {
        let mut engine = engine(frames);
        let input = InputContext::new();
        for _ in 0..(frames * 3) {
            engine.render_frame(0.016, &input).unwrap();
        }
        assert!(
            engine.backend().hazards().is_empty(),
            "{} frames in flight: {:?}",
            frames,
            engine.backend().hazards()
        );
    }
}

#[test]
fn in_flight_submissions_never_share_uniforms() {
    let mut engine = engine(2);
    let input = InputContext::new();
    engine.render_frame(0.016, &input).unwrap();
    engine.render_frame(0.016, &input).unwrap();

    let slot0 = read_mvp_buffer(&engine, 0);
    let slot1 = read_mvp_buffer(&engine, 1);
    let submissions = engine.backend().submissions();
    assert_eq!(submissions.len(), 2);
    assert!(submissions[0].reads(slot0) && !submissions[0].reads(slot1));
    assert!(submissions[1].reads(slot1) && !submissions[1].reads(slot0));
}

fn read_mvp_buffer(engine: &Engine<HeadlessBackend>, slot: usize) -> umbra_renderer::backend::BufferKey {
    let key = engine
        .scene()
        .and_then(|s| s.object_by_name("crate"))
        .expect("object exists");
    engine.mvp_buffer(key, slot).expect("mvp buffer")
}

#[test]
fn pools_are_sized_exactly() {
    let engine = engine(2);
    let scene = engine.scene().expect("initialized");
    let (sizes, sets) = scene.descriptor_demand(2);

    // Per instance per slot: 2L+3 uniform buffers, L+T image samplers, two sets.
    let (l, t) = (1, 1);
    assert_eq!(sizes.uniform_buffers, 2 * (2 * l + 3) * 2);
    assert_eq!(sizes.combined_image_samplers, 2 * (l + t) * 2);
    assert_eq!(sets, 2 * 2 * 2);
    assert_eq!(engine.backend().live_objects().descriptor_sets, sets as usize);
    assert!(scene.all_ready());
}

#[test]
fn resize_rebuilds_shadow_maps_without_leaks() {
    let mut engine = engine(2);
    let input = InputContext::new();
    engine.render_frame(0.016, &input).unwrap();

    let before = engine.backend().live_objects();
    let old_maps = engine.shadow_maps();
    let resized = vk::Extent2D {
        width: 800,
        height: 400,
    };
    engine.resize(resized).unwrap();

    let new_maps = engine.shadow_maps();
    assert_eq!(engine.backend().live_objects(), before);
    for old in &old_maps {
        assert_eq!(engine.backend().image_kind(*old), None);
    }
    for map in &new_maps {
        assert_eq!(engine.backend().image_kind(*map), Some(ImageKind::ShadowDepth));
        assert_eq!(engine.backend().image_extent(*map), Some(resized));
    }

    let scene = engine.scene().expect("initialized");
    let key = scene.object_by_name("crate").expect("object exists");
    let instance = scene.instance_of(key).unwrap();
    let layout = BindingLayout::new(1, 1);
    for (slot, map) in new_maps.iter().enumerate() {
        let set = instance.descriptor_set(slot).unwrap();
        assert_eq!(
            engine.backend().set_binding(set, layout.shadow_map(0)),
            Some(ResourceRef::ShadowMap(*map))
        );
    }

    engine.render_frame(0.016, &input).unwrap();
    assert_eq!(engine.camera().aspect, 2.0);
    assert!(engine.backend().hazards().is_empty());
}

#[test]
fn stale_acquire_skips_the_frame_and_recovers() {
    let mut engine = engine(2);
    let input = InputContext::new();
    engine.render_frame(0.016, &input).unwrap();

    engine.backend_mut().inject_stale_acquires(1);
    let skipped = engine.render_frame(0.016, &input).unwrap();
    assert_eq!(skipped.status, FrameStatus::SkippedStale);
    assert_eq!(skipped.image_index, None);
    assert_eq!(skipped.frame_slot, 1);
    assert_eq!(engine.backend().surface_rebuilds(), 1);

    let retried = engine.render_frame(0.016, &input).unwrap();
    assert_eq!(retried.status, FrameStatus::Presented);
    assert_eq!(retried.frame_slot, 1);
    assert!(engine.backend().hazards().is_empty());
}

#[test]
fn stale_present_rebuilds_after_presenting() {
    let mut engine = engine(2);
    let input = InputContext::new();

    engine.backend_mut().inject_stale_presents(1);
    let report = engine.render_frame(0.016, &input).unwrap();
    assert_eq!(report.status, FrameStatus::PresentedStale);
    assert_eq!(report.image_index, Some(0));
    assert_eq!(engine.backend().surface_rebuilds(), 1);

    let next = engine.render_frame(0.016, &input).unwrap();
    assert_eq!(next.frame_slot, 1);
    assert_eq!(next.status, FrameStatus::Presented);
    assert!(engine.backend().hazards().is_empty());
}

#[test]
fn hung_gpu_reports_a_timeout() {
    let mut engine = engine(1);
    let input = InputContext::new();
    engine.render_frame(0.016, &input).unwrap();

    engine.backend_mut().set_gpu_hung(true);
    let err = engine.render_frame(0.016, &input).unwrap_err();
    assert!(matches!(err, RenderError::Timeout(_)));
    assert!(!err.is_recoverable());

    engine.backend_mut().set_gpu_hung(false);
    let report = engine.render_frame(0.016, &input).unwrap();
    assert_eq!(report.status, FrameStatus::Presented);
}

#[test]
fn shutdown_releases_everything() {
    let mut engine = engine(3);
    let input = InputContext::new();
    for _ in 0..5 {
        engine.render_frame(0.016, &input).unwrap();
    }
    engine.shutdown().unwrap();

    let live = engine.backend().live_objects();
    assert_eq!(live.buffers, 0);
    assert_eq!(live.images, 0);
    assert_eq!(live.framebuffers, 0);
    assert_eq!(live.set_layouts, 0);
    assert_eq!(live.descriptor_pools, 0);
    assert_eq!(live.pipelines, 0);
    assert_eq!(live.fences, 0);
    assert_eq!(live.semaphores, 0);
    assert_eq!(live.command_buffers, 0);
    // The main pass belongs to the backend.
    assert_eq!(live.render_passes, 1);
    assert!(engine.backend().hazards().is_empty());
}

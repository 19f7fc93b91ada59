//! Integration tests for scene descriptions and asset loading.

use std::path::PathBuf;

use glam::Vec3;
use umbra_resources::{
    AssetLoader, BaseMaterialDescription, DirectoryAssets, MaterialProperties, ObjectDescription,
    ResourceError, SceneDescription,
};
use umbra_scene::{Light, Transform};

fn asset_dir(test: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("umbra-resources-{}-{test}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("Failed to create asset dir");
    dir
}

fn demo_scene() -> SceneDescription {
    SceneDescription {
        base_materials: vec![
            BaseMaterialDescription::new("lit", "shaders/lit.vert.spv", "shaders/lit.frag.spv")
                .with_textures(1, Some("builtin:white")),
        ],
        objects: vec![
            ObjectDescription::new("floor", "lit", "builtin:plane")
                .with_textures(["builtin:checker"])
                .with_transform(Transform::default().with_uniform_scale(20.0))
                .with_shadow(false),
            ObjectDescription::new("crate", "lit", "builtin:cube")
                .with_properties(MaterialProperties::blinn_phong(
                    Vec3::new(0.8, 0.5, 0.3),
                    Vec3::ONE,
                    64.0,
                ))
                .with_transform(Transform::default().with_position(Vec3::new(0.0, 0.5, 0.0))),
        ],
        lights: vec![Light::default()],
    }
}

#[test]
fn demo_scene_loads_every_asset() {
    let scene = demo_scene();
    scene.validate().expect("demo scene should validate");

    let mut assets = DirectoryAssets::new(asset_dir("demo"));
    for object in &scene.objects {
        let mesh = assets.load_mesh(&object.mesh).expect("builtin mesh");
        assert!(mesh.index_count() > 0);
        for texture in scene.resolved_textures(object).unwrap() {
            let texture = assets.load_texture(&texture).expect("builtin texture");
            assert!(texture.width > 0 && texture.height > 0);
        }
    }
}

#[test]
fn textures_are_read_relative_to_root() {
    let dir = asset_dir("relative");
    image::RgbaImage::from_pixel(4, 4, image::Rgba([255, 0, 0, 255]))
        .save(dir.join("red.png"))
        .expect("Failed to write test texture");

    let mut assets = DirectoryAssets::new(&dir);
    let texture = assets.load_texture("red.png").unwrap();
    assert_eq!((texture.width, texture.height), (4, 4));
    assert_eq!(&texture.pixels[..4], &[255, 0, 0, 255]);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn unknown_base_material_is_rejected() {
    let mut scene = demo_scene();
    scene.objects[1].base_material = "unlit".into();
    assert!(matches!(
        scene.validate(),
        Err(ResourceError::InvalidScene(_))
    ));
}

#[test]
fn duplicate_object_names_are_rejected() {
    let mut scene = demo_scene();
    scene.objects[1].name = "floor".into();
    let err = scene.validate().unwrap_err();
    assert!(err.to_string().contains("duplicate object"));
}

#[test]
fn too_many_textures_are_rejected() {
    let mut scene = demo_scene();
    scene.objects[0].textures.push("builtin:white".into());
    assert!(scene.validate().is_err());
}

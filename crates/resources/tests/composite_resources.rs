//! Integration tests for meshes and materials against the mock backend.

use std::sync::Arc;

use glam::Vec4;
use strand_resources::{Material, Mesh, ResourceError, Vertex, decode_rgba8};
use strand_rhi::command::{CommandBuffer, CommandPool, RetainPolicy};
use strand_rhi::descriptor::DescriptorPool;
use strand_rhi::mock::{MockBackend, ObjectKind};
use strand_rhi::pipeline::Pipeline;
use strand_rhi::sampler::Sampler;
use strand_rhi::sync::Fence;
use strand_rhi::transfer::TransferContext;
use strand_rhi::vk::{self, Handle};
use strand_rhi::{ResourceKind, Shared};

fn transfer(mock: &Arc<MockBackend>) -> TransferContext {
    TransferContext::new(mock.backend(), RetainPolicy::default())
        .expect("Failed to create transfer context")
}

fn pipeline(mock: &Arc<MockBackend>) -> Shared<Pipeline> {
    let (pipeline, layout) = mock.create_pipeline();
    Pipeline::adopt(
        mock.backend(),
        pipeline,
        layout,
        vk::PipelineBindPoint::GRAPHICS,
    )
}

/// A command buffer with its pool and a fence for one submission.
fn recorder(mock: &Arc<MockBackend>) -> (CommandBuffer, Fence) {
    let pool = CommandPool::new(mock.backend()).unwrap();
    let cb = CommandBuffer::new(&pool, RetainPolicy::default()).unwrap();
    let fence = Fence::new(mock.backend(), false).unwrap();
    (cb, fence)
}

#[test]
fn test_mesh_upload_leaves_only_final_buffers() {
    let mock = MockBackend::new();
    let mut transfer = transfer(&mock);
    let (vertices, indices) = Vertex::quad();

    let mesh = Mesh::from_vertices(&mut transfer, "quad", &vertices, &indices).unwrap();
    assert_eq!(mesh.vertex_count(), 4);
    assert_eq!(mesh.index_count(), 6);
    assert_eq!(mesh.triangle_count(), 2);
    assert_eq!(mesh.vertex_buffer().size(), 4 * 32);
    assert_eq!(mesh.index_buffer().size(), 6 * 4);
    assert!(mesh.bounds().is_some());

    // Staging buffers are gone once the uploads returned.
    assert_eq!(mock.live(ObjectKind::Buffer), 2);
    assert_eq!(mock.created(ObjectKind::Buffer), 4);

    drop(mesh);
    assert_eq!(mock.live(ObjectKind::Buffer), 0);
    assert!(mock.errors().is_empty(), "{:?}", mock.errors());
}

#[test]
fn test_mesh_with_custom_vertex_type() {
    let mock = MockBackend::new();
    let mut transfer = transfer(&mock);
    let positions: [[f32; 2]; 3] = [[0.0, -0.5], [0.5, 0.5], [-0.5, 0.5]];

    let mesh = Mesh::upload(&mut transfer, "triangle", &positions, &[0, 1, 2]).unwrap();
    assert_eq!(mesh.vertex_buffer().size(), 24);
    assert!(mesh.bounds().is_none());
}

#[test]
fn test_mesh_validation() {
    let mock = MockBackend::new();
    let mut transfer = transfer(&mock);
    let (vertices, _) = Vertex::quad();

    assert!(matches!(
        Mesh::from_vertices(&mut transfer, "empty", &vertices, &[]),
        Err(ResourceError::EmptyMesh(_))
    ));
    assert!(matches!(
        Mesh::from_vertices(&mut transfer, "broken", &vertices, &[0, 1, 4]),
        Err(ResourceError::IndexOutOfRange {
            index: 4,
            vertex_count: 4
        })
    ));
    assert_eq!(mock.created(ObjectKind::Buffer), 0);
}

#[test]
fn test_drawn_mesh_outlives_its_owner() {
    let mock = MockBackend::new();
    let mut transfer = transfer(&mock);
    let (vertices, indices) = Vertex::quad();
    let mesh = Mesh::from_vertices(&mut transfer, "quad", &vertices, &indices).unwrap();
    let vertex_raw = mesh.vertex_buffer().handle().as_raw();
    let index_raw = mesh.index_buffer().handle().as_raw();

    let (mut cb, fence) = recorder(&mock);
    cb.begin().unwrap();
    Mesh::draw(&mesh, &mut cb, 1).unwrap();
    assert!(cb.retains(&mesh));
    assert_eq!(cb.retained().count_of(ResourceKind::Buffer), 2);
    cb.end().unwrap();
    cb.submit(&fence).unwrap();

    // The owner lets go while the draw is in flight.
    mesh.release();
    assert!(mock.is_live(vertex_raw));
    assert!(mock.is_live(index_raw));

    fence.wait_forever().unwrap();
    cb.reset().unwrap();
    assert!(!mock.is_live(vertex_raw));
    assert!(!mock.is_live(index_raw));
    assert!(mock.errors().is_empty(), "{:?}", mock.errors());
}

#[test]
fn test_bound_material_outlives_its_owner() {
    let mock = MockBackend::new();
    let backend = mock.backend();
    let mut transfer = transfer(&mock);

    let pixels = [0xffu8; 2 * 2 * 4];
    let texture = transfer
        .upload_image(
            &pixels,
            vk::Extent2D {
                width: 2,
                height: 2,
            },
            vk::Format::R8G8B8A8_SRGB,
        )
        .unwrap();
    let sampler = Sampler::linear(backend.clone()).unwrap();
    let pool = DescriptorPool::for_samplers(backend, 4).unwrap();
    let material = Material::new(
        &pool,
        vk::DescriptorSetLayout::null(),
        texture,
        sampler,
        Vec4::new(1.0, 0.0, 0.0, 1.0),
    )
    .unwrap();
    drop(pool);
    assert_eq!(material.uniform().base_color.x, 1.0);

    let pipeline = pipeline(&mock);
    let (mut cb, fence) = recorder(&mock);
    cb.begin().unwrap();
    Material::bind(&material, &mut cb, &pipeline, 0).unwrap();
    assert!(cb.retains(&material));
    assert!(cb.retains(material.descriptor_set()));
    cb.end().unwrap();
    cb.submit(&fence).unwrap();

    material.release();
    assert_eq!(mock.live(ObjectKind::DescriptorSet), 1);
    assert_eq!(mock.live(ObjectKind::Sampler), 1);
    assert_eq!(mock.live(ObjectKind::Image), 1);

    fence.wait_forever().unwrap();
    cb.reset().unwrap();
    assert_eq!(mock.live(ObjectKind::DescriptorSet), 0);
    assert_eq!(mock.live(ObjectKind::DescriptorPool), 0);
    assert_eq!(mock.live(ObjectKind::Sampler), 0);
    assert_eq!(mock.live(ObjectKind::Image), 0);
    assert_eq!(mock.live(ObjectKind::ImageView), 0);
    assert!(mock.errors().is_empty(), "{:?}", mock.errors());
}

#[test]
fn test_decoded_image_uploads() {
    let mock = MockBackend::new();
    let mut transfer = transfer(&mock);

    let image = image::RgbaImage::from_pixel(4, 4, image::Rgba([10, 20, 30, 255]));
    let mut encoded = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut encoded, image::ImageFormat::Png)
        .unwrap();

    let decoded = decode_rgba8(encoded.get_ref()).unwrap();
    let texture = decoded
        .upload(&mut transfer, vk::Format::R8G8B8A8_SRGB)
        .unwrap();
    assert_eq!(texture.extent().width, 4);
    assert_eq!(texture.format(), vk::Format::R8G8B8A8_SRGB);
}

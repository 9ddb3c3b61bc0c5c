//! Unit tests for Renderer frame orchestration (GPU-less, mock device)

use std::f32::consts::FRAC_PI_2;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use glam::{Mat4, Vec3, Vec4};
use crate::cache::PipelineSettings;
use crate::error::Error;
use crate::graphics_device::mock_graphics_device::{MockGraphicsDevice, SharedMockState};
use crate::graphics_device::{
    DeviceLimits, FrameStatus, TextureDesc, TextureFormat, VertexAttribute, VertexBinding, VertexFormat,
    VertexInputRate, VertexLayout, Viewport,
};
use crate::render_graph::{ClearTarget, FrameBlock, GraphicalFrameData, RenderQueue, ViewBlock};
use crate::renderer::*;

// ============================================================================
// FIXTURE
// ============================================================================

fn renderer_with(device: MockGraphicsDevice, desc: RendererDesc) -> (Renderer, SharedMockState) {
    let state = device.state();
    let renderer = Renderer::new(Box::new(device), desc).unwrap();
    (renderer, state)
}

fn renderer() -> (Renderer, SharedMockState) {
    renderer_with(MockGraphicsDevice::new(), RendererDesc::new(800, 600))
}

fn shader_desc() -> ShaderProgramDesc {
    ShaderProgramDesc {
        vertex_code: vec![0; 8],
        fragment_code: vec![0; 8],
        vertex_entry: "main".to_string(),
        fragment_entry: "main".to_string(),
        vertex_layout: VertexLayout {
            bindings: vec![VertexBinding { binding: 0, stride: 12, input_rate: VertexInputRate::Vertex }],
            attributes: vec![VertexAttribute {
                location: 0,
                binding: 0,
                format: VertexFormat::R32G32B32_SFLOAT,
                offset: 0,
            }],
        },
        material_fields: vec![
            MaterialFieldDesc::new("color", FieldType::Vec4),
            MaterialFieldDesc::new("roughness", FieldType::Float),
        ],
        texture_slots: vec!["albedo".to_string()],
    }
}

fn triangle(indexed: bool) -> MeshDesc {
    let vertices: [f32; 9] = [0.0, 0.5, 0.0, -0.5, -0.5, 0.0, 0.5, -0.5, 0.0];
    MeshDesc {
        vertices: bytemuck::cast_slice(&vertices).to_vec(),
        vertex_stride: 12,
        indices: indexed.then(|| vec![0, 1, 2]),
    }
}

struct Scene {
    mesh: MeshHandle,
    shader: ShaderHandle,
    material: ShaderMaterialHandle,
}

fn scene(renderer: &mut Renderer) -> Scene {
    let mesh = renderer.create_mesh(triangle(true)).unwrap();
    let shader = renderer.create_shader(shader_desc()).unwrap();
    let material = renderer
        .create_shader_material(
            ShaderMaterialDesc::new(shader)
                .with_property("color", MaterialValue::Vec4(Vec4::new(1.0, 2.0, 3.0, 4.0)))
                .with_property("roughness", MaterialValue::Float(0.5)),
        )
        .unwrap();
    Scene { mesh, shader, material }
}

fn item(scene: &Scene, mesh: MeshHandle, material: ShaderMaterialHandle) -> GraphicalFrameData {
    GraphicalFrameData {
        mesh,
        shader: scene.shader,
        material,
        transform: Mat4::IDENTITY,
    }
}

/// One frame block, one view: clear then draw `items`
fn queue(items: Vec<GraphicalFrameData>) -> RenderQueue {
    let mut queue = RenderQueue::new();
    queue.push_frame_block(FrameBlock { frame_time: 0.016, delta_time: 0.016 });
    let mut view = ViewBlock::new(Mat4::IDENTITY, Mat4::IDENTITY);
    view.clear(ClearTarget::color_and_depth([0.0, 0.0, 0.0, 1.0], 1.0)).draw(items);
    queue.push_view_block(view);
    queue
}

fn run_frame(renderer: &mut Renderer, queue: &RenderQueue) -> FrameStatus {
    assert_eq!(renderer.begin_frame().unwrap(), FrameStatus::Success);
    renderer.draw_render_queue(queue).unwrap();
    renderer.end_frame().unwrap()
}

fn clear_events(state: &SharedMockState) {
    state.lock().unwrap().events.clear();
}

/// Commands recorded since the last `clear_events`, without the "cmdN:" prefix
fn recorded_commands(state: &SharedMockState) -> Vec<String> {
    state
        .lock()
        .unwrap()
        .events
        .iter()
        .filter(|e| e.starts_with("cmd"))
        .filter_map(|e| e.split_once(':').map(|(_, command)| command.to_string()))
        .collect()
}

fn command_kinds(commands: &[String]) -> Vec<&str> {
    commands
        .iter()
        .map(|c| c.split_whitespace().next().unwrap_or(""))
        .collect()
}

fn read_floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn material_block(renderer: &Renderer, material: ShaderMaterialHandle) -> Vec<u8> {
    let location = renderer.material_block_location(material).unwrap();
    renderer
        .uniform_buffers()
        .map_global_buffer(MATERIAL_BUFFER_NAME, location.buffer_id)
        .unwrap()
        .read(location.offset, location.size as usize)
        .unwrap()
}

// ============================================================================
// INITIALIZATION
// ============================================================================

#[test]
fn test_new_creates_frame_resources() {
    let (renderer, state) = renderer();
    let state = state.lock().unwrap();

    assert!(state.position("create_swapchain 800x600").is_some());
    assert!(state.position("create_render_target 800x600 D32_FLOAT").is_some());
    assert_eq!(state.events_with_prefix("create_command_list").len(), 2);
    assert!(state.position("create_sampler").is_some());
    assert!(state.position("create_texture 1x1").is_some());

    let (width, height, aspect) = renderer.shape();
    assert_eq!((width, height), (800, 600));
    assert!((aspect - 800.0 / 600.0).abs() < 1e-6);
    assert_eq!(renderer.frame_phase(), FramePhase::Idle);
}

#[test]
fn test_new_rejects_zero_size() {
    let result = Renderer::new(Box::new(MockGraphicsDevice::new()), RendererDesc::new(0, 600));
    assert!(matches!(result, Err(Error::InitializationFailed(_))));
}

// ============================================================================
// FRAME LIFECYCLE
// ============================================================================

#[test]
fn test_begin_frame_waits_before_acquire() {
    let (mut renderer, state) = renderer();
    clear_events(&state);

    assert_eq!(renderer.begin_frame().unwrap(), FrameStatus::Success);

    let state = state.lock().unwrap();
    let wait = state.position("wait_for_frame 0").unwrap();
    let acquire = state.position("acquire slot=0 image=0 Success").unwrap();
    let begin = state.position("cmd1:begin").unwrap();
    assert!(wait < acquire);
    assert!(acquire < begin);
    assert_eq!(renderer.frame_phase(), FramePhase::Acquired { image_index: 0 });
}

#[test]
fn test_frame_ring_reuses_slot_only_after_wait() {
    let (mut renderer, state) = renderer();
    let queue = RenderQueue::new();
    for _ in 0..3 {
        run_frame(&mut renderer, &queue);
    }

    let state = state.lock().unwrap();
    let submits = state.events_with_prefix("submit");
    assert_eq!(
        submits,
        vec!["submit slot=0 cmd=1 image=0", "submit slot=1 cmd=2 image=1", "submit slot=0 cmd=1 image=2"]
    );

    // Slot 0 is re-recorded in frame 3: its wait must come after frame 1's submit
    // and before the re-record
    let waits: Vec<usize> = state
        .events
        .iter()
        .enumerate()
        .filter(|(_, e)| *e == "wait_for_frame 0")
        .map(|(i, _)| i)
        .collect();
    let begins: Vec<usize> = state
        .events
        .iter()
        .enumerate()
        .filter(|(_, e)| *e == "cmd1:begin")
        .map(|(i, _)| i)
        .collect();
    assert_eq!(waits.len(), 2);
    assert_eq!(begins.len(), 2);
    let first_submit = state.position("submit slot=0 cmd=1 image=0").unwrap();
    assert!(first_submit < waits[1]);
    assert!(waits[1] < begins[1]);
}

#[test]
fn test_frame_state_errors() {
    let (mut renderer, _state) = renderer();
    let queue = RenderQueue::new();

    assert!(matches!(renderer.end_frame(), Err(Error::InvalidState(_))));
    assert!(matches!(renderer.draw_render_queue(&queue), Err(Error::InvalidState(_))));

    renderer.begin_frame().unwrap();
    assert!(matches!(renderer.begin_frame(), Err(Error::InvalidState(_))));
    renderer.draw_render_queue(&queue).unwrap();
    assert!(matches!(renderer.draw_render_queue(&queue), Err(Error::InvalidState(_))));
    renderer.end_frame().unwrap();

    assert_eq!(renderer.frame_phase(), FramePhase::Idle);
    assert_eq!(renderer.current_frame_slot(), 1);
}

#[test]
fn test_full_frame_command_sequence() {
    let (mut renderer, state) = renderer();
    let scene = scene(&mut renderer);
    let queue = queue(vec![item(&scene, scene.mesh, scene.material)]);
    clear_events(&state);

    assert_eq!(run_frame(&mut renderer, &queue), FrameStatus::Success);

    let commands = recorded_commands(&state);
    assert_eq!(
        command_kinds(&commands),
        vec![
            "begin",
            "clear",
            "clear",
            "begin_render_pass",
            "set_viewport",
            "set_scissor",
            "bind_pipeline",
            "bind_binding_group",
            "bind_binding_group",
            "push_constants",
            "bind_vertex_buffer",
            "bind_index_buffer",
            "draw_indexed",
            "end_render_pass",
            "end",
        ]
    );
    assert!(commands.contains(&"clear swapchain0 from Undefined Color([0.0, 0.0, 0.0, 1.0])".to_string()));
    assert!(commands.contains(&"clear depth from Undefined DepthStencil { depth: 1.0, stencil: 0 }".to_string()));
    assert!(commands[3].ends_with("clears=2"));
    assert_eq!(commands[4], "set_viewport 800x600");
    assert!(commands[7].starts_with("bind_binding_group set=0"));
    assert!(commands[8].starts_with("bind_binding_group set=1"));
    assert!(commands[9].ends_with("offset=0 size=64"));
    assert_eq!(commands[11], "bind_index_buffer offset=0 U32");
    assert_eq!(commands[12], "draw_indexed 3 0 0");

    let state = state.lock().unwrap();
    let submit = state.position("submit slot=0 cmd=1 image=0").unwrap();
    let present = state.position("present image=0 Success").unwrap();
    assert!(submit < present);
}

#[test]
fn test_empty_frame_transitions_to_present() {
    let (mut renderer, state) = renderer();
    clear_events(&state);

    renderer.begin_frame().unwrap();
    renderer.end_frame().unwrap();

    assert_eq!(
        recorded_commands(&state),
        vec!["begin", "transition swapchain0 Undefined->PresentSrc", "end"]
    );
}

#[test]
fn test_empty_queue_transitions_to_present() {
    let (mut renderer, state) = renderer();
    clear_events(&state);

    run_frame(&mut renderer, &RenderQueue::new());

    assert_eq!(
        recorded_commands(&state),
        vec!["begin", "transition swapchain0 Undefined->PresentSrc", "end"]
    );
    assert_eq!(renderer.stats().physical_passes, 0);
}

#[test]
fn test_trailing_clear_transitions_to_present() {
    let (mut renderer, state) = renderer();
    let mut queue = RenderQueue::new();
    let mut view = ViewBlock::new(Mat4::IDENTITY, Mat4::IDENTITY);
    view.clear(ClearTarget { color: Some([0.2, 0.2, 0.2, 1.0]), depth: None });
    queue.push_view_block(view);
    clear_events(&state);

    run_frame(&mut renderer, &queue);

    assert_eq!(
        recorded_commands(&state),
        vec![
            "begin",
            "clear swapchain0 from Undefined Color([0.2, 0.2, 0.2, 1.0])",
            "transition swapchain0 TransferDst->PresentSrc",
            "end",
        ]
    );
}

#[test]
fn test_viewport_override() {
    let (mut renderer, state) = renderer();
    let scene = scene(&mut renderer);
    let mut queue = queue(vec![item(&scene, scene.mesh, scene.material)]);
    queue.view_blocks[0].viewport = Some(Viewport::from_extent(400, 300));
    clear_events(&state);

    run_frame(&mut renderer, &queue);

    let commands = recorded_commands(&state);
    assert!(commands.contains(&"set_viewport 400x300".to_string()));
    assert!(commands.contains(&"set_scissor 400x300".to_string()));
}

#[test]
fn test_stats_count_draws() {
    let (mut renderer, _state) = renderer();
    let scene = scene(&mut renderer);
    let queue = queue(vec![
        item(&scene, scene.mesh, scene.material),
        item(&scene, scene.mesh, scene.material),
    ]);

    run_frame(&mut renderer, &queue);

    let stats = renderer.stats();
    assert_eq!(stats.draw_calls, 2);
    assert_eq!(stats.triangles, 2);
    assert_eq!(stats.physical_passes, 1);
    assert_eq!(stats.skipped_items, 0);
    assert_eq!(stats.cached_pipelines, 1);
}

#[test]
fn test_non_indexed_mesh_draws_vertices() {
    let (mut renderer, state) = renderer();
    let scene = scene(&mut renderer);
    let mesh = renderer.create_mesh(triangle(false)).unwrap();
    let queue = queue(vec![item(&scene, mesh, scene.material)]);
    clear_events(&state);

    run_frame(&mut renderer, &queue);

    let commands = recorded_commands(&state);
    assert!(commands.contains(&"draw 3 0".to_string()));
    assert!(!commands.iter().any(|c| c.starts_with("bind_index_buffer")));
}

#[test]
fn test_draw_error_still_presents_frame() {
    let (mut renderer, state) = renderer();
    let scene = scene(&mut renderer);
    let queue = queue(vec![item(&scene, scene.mesh, scene.material)]);
    clear_events(&state);
    state.lock().unwrap().fail_draws = true;

    renderer.begin_frame().unwrap();
    assert!(renderer.draw_render_queue(&queue).is_err());
    assert!(matches!(renderer.frame_phase(), FramePhase::Recorded { .. }));
    assert_eq!(renderer.end_frame().unwrap(), FrameStatus::Success);

    // The open pass is closed and the image still reaches PresentSrc
    let commands = recorded_commands(&state);
    let kinds = command_kinds(&commands);
    assert_eq!(&kinds[kinds.len() - 3..], &["end_render_pass", "transition", "end"]);
    assert!(commands.contains(&"transition swapchain0 Undefined->PresentSrc".to_string()));
    assert!(state.lock().unwrap().position("present image=0 Success").is_some());

    state.lock().unwrap().fail_draws = false;
    assert_eq!(run_frame(&mut renderer, &queue), FrameStatus::Success);
    assert_eq!(renderer.stats().draw_calls, 1);
}

// ============================================================================
// ENGINE UNIFORMS
// ============================================================================

#[test]
fn test_engine_uniforms_written() {
    let (mut renderer, _state) = renderer();
    let projection = Renderer::build_perspective_matrix(FRAC_PI_2, 800.0 / 600.0, 0.1, 100.0);
    let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);

    let mut queue = RenderQueue::new();
    queue.push_frame_block(FrameBlock { frame_time: 0.016, delta_time: 0.008 });
    queue.push_view_block(ViewBlock::new(projection, view));

    renderer.begin_frame().unwrap();
    renderer.draw_render_queue(&queue).unwrap();

    let buffers = renderer.uniform_buffers();
    let frame_buffer = buffers.find_per_frame_buffer(FRAME_UNIFORMS_NAME, 0, 0).unwrap();
    let mut bytes = vec![0u8; std::mem::size_of::<FrameUniforms>()];
    frame_buffer.read(0, &mut bytes).unwrap();
    let frame: FrameUniforms = bytemuck::pod_read_unaligned(&bytes);
    assert_eq!(frame.time, 0.016);
    assert_eq!(frame.delta_time, 0.008);
    assert_eq!(frame.frame_index, 0);

    let view_buffer = buffers.find_per_frame_buffer(VIEW_UNIFORMS_NAME, 0, 0).unwrap();
    let mut bytes = vec![0u8; std::mem::size_of::<ViewUniforms>()];
    view_buffer.read(0, &mut bytes).unwrap();
    let uniforms: ViewUniforms = bytemuck::pod_read_unaligned(&bytes);
    assert_eq!(uniforms.projection, projection);
    assert_eq!(uniforms.view, view);
    assert_eq!(uniforms.view_projection, projection * view);
    assert_eq!(uniforms.viewport, [0.0, 0.0, 800.0, 600.0]);

    // The other slot's buffer is a separate allocation
    assert!(buffers.find_per_frame_buffer(FRAME_UNIFORMS_NAME, 0, 1).is_some());
    assert!(!Arc::ptr_eq(&frame_buffer, &buffers.find_per_frame_buffer(FRAME_UNIFORMS_NAME, 0, 1).unwrap()));
    renderer.end_frame().unwrap();
}

#[test]
fn test_engine_binding_groups_are_reused() {
    let (mut renderer, state) = renderer();
    let scene = scene(&mut renderer);
    let queue = queue(vec![item(&scene, scene.mesh, scene.material)]);

    run_frame(&mut renderer, &queue);
    run_frame(&mut renderer, &queue);
    let after_two = state.lock().unwrap().binding_groups_created;
    run_frame(&mut renderer, &queue);
    run_frame(&mut renderer, &queue);

    // one material group + one set 0 group per frame slot
    assert_eq!(after_two, 3);
    assert_eq!(state.lock().unwrap().binding_groups_created, 3);
}

// ============================================================================
// SHADER-MATERIALS
// ============================================================================

#[test]
fn test_material_block_contents() {
    let (mut renderer, _state) = renderer();
    let scene = scene(&mut renderer);

    let location = renderer.material_block_location(scene.material).unwrap();
    assert_eq!(location.size, 32);
    let floats = read_floats(&material_block(&renderer, scene.material));
    assert_eq!(&floats[..5], &[1.0, 2.0, 3.0, 4.0, 0.5]);
}

#[test]
fn test_material_blocks_are_aligned() {
    let (mut renderer, _state) = renderer();
    let scene = scene(&mut renderer);
    let second = renderer.create_shader_material(ShaderMaterialDesc::new(scene.shader)).unwrap();

    let first = renderer.material_block_location(scene.material).unwrap();
    let second = renderer.material_block_location(second).unwrap();
    assert_eq!((first.buffer_id, first.offset), (0, 0));
    assert_eq!((second.buffer_id, second.offset), (0, 256));
    assert_eq!(renderer.uniform_buffers().global_buffer_count(MATERIAL_BUFFER_NAME), 1);
}

#[test]
fn test_material_buffer_rolls_over_when_full() {
    let device = MockGraphicsDevice::with_limits(DeviceLimits {
        max_uniform_buffer_range: 1024,
        min_uniform_buffer_offset_alignment: 256,
    });
    let (mut renderer, _state) = renderer_with(device, RendererDesc::new(800, 600));
    let shader = renderer.create_shader(shader_desc()).unwrap();

    let locations: Vec<MaterialBlockLocation> = (0..5)
        .map(|_| {
            let material = renderer.create_shader_material(ShaderMaterialDesc::new(shader)).unwrap();
            renderer.material_block_location(material).unwrap()
        })
        .collect();

    let placed: Vec<(u32, u64)> = locations.iter().map(|l| (l.buffer_id, l.offset)).collect();
    assert_eq!(placed, vec![(0, 0), (0, 256), (0, 512), (0, 768), (1, 0)]);
    assert_eq!(renderer.uniform_buffers().global_buffer_count(MATERIAL_BUFFER_NAME), 2);
}

#[test]
fn test_create_material_prewarms_pipeline() {
    let (mut renderer, state) = renderer();
    let scene = scene(&mut renderer);

    assert_eq!(state.lock().unwrap().pipelines_created, 1);
    assert_eq!(renderer.pipeline_cache().material_pipeline_count(scene.material), 1);

    run_frame(&mut renderer, &queue(vec![item(&scene, scene.mesh, scene.material)]));

    // The clear + draw pass has the prewarmed pass shape
    assert_eq!(state.lock().unwrap().pipelines_created, 1);
    assert_eq!(state.lock().unwrap().render_passes_created, 1);
}

#[test]
fn test_pipeline_settings_select_pipeline() {
    let (mut renderer, state) = renderer();
    let scene = scene(&mut renderer);
    let blended = renderer
        .create_shader_material(ShaderMaterialDesc::new(scene.shader).with_settings(PipelineSettings::alpha_blended()))
        .unwrap();

    assert_eq!(state.lock().unwrap().pipelines_created, 2);
    assert_eq!(renderer.pipeline_cache().material_pipeline_count(blended), 1);
}

#[test]
fn test_update_shader_material_rewrites_block() {
    let (mut renderer, state) = renderer();
    let scene = scene(&mut renderer);
    let groups_before = state.lock().unwrap().binding_groups_created;

    renderer
        .update_shader_material(
            scene.material,
            &[("roughness".to_string(), MaterialValue::Float(0.25))],
            &[],
        )
        .unwrap();

    let floats = read_floats(&material_block(&renderer, scene.material));
    assert_eq!(&floats[..5], &[1.0, 2.0, 3.0, 4.0, 0.25]);
    assert_eq!(state.lock().unwrap().binding_groups_created, groups_before);
}

#[test]
fn test_update_shader_material_waits_before_rewrite() {
    let (mut renderer, state) = renderer();
    let scene = scene(&mut renderer);
    run_frame(&mut renderer, &queue(vec![item(&scene, scene.mesh, scene.material)]));
    clear_events(&state);

    renderer
        .update_shader_material(
            scene.material,
            &[("roughness".to_string(), MaterialValue::Float(0.25))],
            &[],
        )
        .unwrap();

    {
        let state = state.lock().unwrap();
        let wait = state.position("wait_idle").unwrap();
        let write = state.events.iter().position(|e| e.starts_with("update_buffer")).unwrap();
        assert!(wait < write);
    }

    // Rejected updates touch neither the GPU nor the block
    clear_events(&state);
    let result = renderer.update_shader_material(
        scene.material,
        &[("metalness".to_string(), MaterialValue::Float(1.0))],
        &[],
    );
    assert!(result.is_err());
    assert!(state.lock().unwrap().events.is_empty());
}

#[test]
fn test_update_rejects_type_mismatch_and_keeps_values() {
    let (mut renderer, _state) = renderer();
    let scene = scene(&mut renderer);

    let result = renderer.update_shader_material(
        scene.material,
        &[
            ("color".to_string(), MaterialValue::Vec4(Vec4::ZERO)),
            ("roughness".to_string(), MaterialValue::Vec4(Vec4::ONE)),
        ],
        &[],
    );

    assert!(matches!(result, Err(Error::InvalidResource(_))));
    let floats = read_floats(&material_block(&renderer, scene.material));
    assert_eq!(&floats[..5], &[1.0, 2.0, 3.0, 4.0, 0.5]);
}

#[test]
fn test_update_textures_rebuilds_binding_group() {
    let (mut renderer, state) = renderer();
    let scene = scene(&mut renderer);
    let texture = renderer
        .create_texture(
            TextureDesc { width: 2, height: 2, format: TextureFormat::R8G8B8A8_SRGB, data: Some(vec![128; 16]) },
            None,
        )
        .unwrap();
    let groups_before = state.lock().unwrap().binding_groups_created;

    renderer
        .update_shader_material(scene.material, &[], &[("albedo".to_string(), texture)])
        .unwrap();

    assert_eq!(state.lock().unwrap().binding_groups_created, groups_before + 1);
}

#[test]
fn test_unknown_texture_slot_is_rejected() {
    let (mut renderer, _state) = renderer();
    let scene = scene(&mut renderer);
    let texture = renderer
        .create_texture(
            TextureDesc { width: 1, height: 1, format: TextureFormat::R8G8B8A8_SRGB, data: None },
            None,
        )
        .unwrap();

    let result = renderer.create_shader_material(ShaderMaterialDesc::new(scene.shader).with_texture("normal", texture));
    assert!(matches!(result, Err(Error::InvalidResource(_))));
}

#[test]
fn test_unknown_property_is_rejected() {
    let (mut renderer, _state) = renderer();
    let scene = scene(&mut renderer);

    let result = renderer.create_shader_material(
        ShaderMaterialDesc::new(scene.shader).with_property("metallic", MaterialValue::Float(1.0)),
    );
    assert!(matches!(result, Err(Error::InvalidResource(_))));
}

#[test]
#[should_panic(expected = "duplicate texture slot")]
fn test_duplicate_texture_slot_panics() {
    let (mut renderer, _state) = renderer();
    let mut desc = shader_desc();
    desc.texture_slots = vec!["albedo".to_string(), "albedo".to_string()];
    let _ = renderer.create_shader(desc);
}

#[test]
#[should_panic(expected = "duplicate material field")]
fn test_duplicate_material_field_panics() {
    let (mut renderer, _state) = renderer();
    let mut desc = shader_desc();
    desc.material_fields.push(MaterialFieldDesc::new("color", FieldType::Vec3));
    let _ = renderer.create_shader(desc);
}

// ============================================================================
// DESTRUCTION
// ============================================================================

#[test]
fn test_destroy_shader_material_drops_pipelines() {
    let (mut renderer, state) = renderer();
    let scene = scene(&mut renderer);
    clear_events(&state);

    renderer.destroy_shader_material(scene.material).unwrap();

    assert!(state.lock().unwrap().position("wait_idle").is_some());
    assert_eq!(renderer.pipeline_cache().material_pipeline_count(scene.material), 0);
    assert!(renderer.material_block_location(scene.material).is_none());

    run_frame(&mut renderer, &queue(vec![item(&scene, scene.mesh, scene.material)]));
    let stats = renderer.stats();
    assert_eq!(stats.draw_calls, 0);
    assert_eq!(stats.skipped_items, 1);
}

#[test]
fn test_destroyed_material_block_is_reused() {
    let (mut renderer, _state) = renderer();
    let scene = scene(&mut renderer);
    let freed = renderer.material_block_location(scene.material).unwrap();
    renderer.create_shader_material(ShaderMaterialDesc::new(scene.shader)).unwrap();
    renderer.destroy_shader_material(scene.material).unwrap();

    let reused = renderer.create_shader_material(ShaderMaterialDesc::new(scene.shader)).unwrap();
    assert_eq!(renderer.material_block_location(reused), Some(freed));

    let appended = renderer.create_shader_material(ShaderMaterialDesc::new(scene.shader)).unwrap();
    let appended = renderer.material_block_location(appended).unwrap();
    assert_eq!((appended.buffer_id, appended.offset), (0, 512));
}

#[test]
fn test_destroy_shader_in_use_fails() {
    let (mut renderer, _state) = renderer();
    let scene = scene(&mut renderer);

    assert!(matches!(renderer.destroy_shader(scene.shader), Err(Error::InvalidResource(_))));
    renderer.destroy_shader_material(scene.material).unwrap();
    renderer.destroy_shader(scene.shader).unwrap();
    assert!(matches!(
        renderer.create_shader_material(ShaderMaterialDesc::new(scene.shader)),
        Err(Error::InvalidResource(_))
    ));
}

#[test]
fn test_stale_mesh_handle_is_rejected() {
    let (mut renderer, _state) = renderer();
    let scene = scene(&mut renderer);

    renderer.destroy_mesh(scene.mesh).unwrap();
    assert!(matches!(renderer.destroy_mesh(scene.mesh), Err(Error::InvalidResource(_))));

    let replacement = renderer.create_mesh(triangle(true)).unwrap();
    assert_ne!(replacement, scene.mesh);

    run_frame(&mut renderer, &queue(vec![item(&scene, scene.mesh, scene.material)]));
    assert_eq!(renderer.stats().draw_calls, 0);
    assert_eq!(renderer.stats().skipped_items, 1);
}

#[test]
fn test_create_mesh_validates_stride() {
    let (mut renderer, _state) = renderer();

    let mut zero_stride = triangle(true);
    zero_stride.vertex_stride = 0;
    assert!(matches!(renderer.create_mesh(zero_stride), Err(Error::InvalidResource(_))));

    let mut ragged = triangle(true);
    ragged.vertices.pop();
    assert!(matches!(renderer.create_mesh(ragged), Err(Error::InvalidResource(_))));

    let mut no_indices = triangle(true);
    no_indices.indices = Some(Vec::new());
    assert!(matches!(renderer.create_mesh(no_indices), Err(Error::InvalidResource(_))));
}

// ============================================================================
// SWAPCHAIN RECREATION
// ============================================================================

#[test]
fn test_out_of_date_acquire_skips_frame() {
    let (mut renderer, state) = renderer();
    state.lock().unwrap().acquire_results.push_back(FrameStatus::OutOfDate);

    assert_eq!(renderer.begin_frame().unwrap(), FrameStatus::OutOfDate);
    assert_eq!(renderer.frame_phase(), FramePhase::Idle);
    assert!(renderer.is_swapchain_stale());

    // Stays out of date without touching the swapchain until recreation
    clear_events(&state);
    assert_eq!(renderer.begin_frame().unwrap(), FrameStatus::OutOfDate);
    assert!(state.lock().unwrap().events_with_prefix("acquire").is_empty());

    renderer.recreate_swapchain().unwrap();
    assert!(!renderer.is_swapchain_stale());
    assert_eq!(run_frame(&mut renderer, &RenderQueue::new()), FrameStatus::Success);
}

#[test]
fn test_suboptimal_present_requires_recreation() {
    let (mut renderer, state) = renderer();
    state.lock().unwrap().present_results.push_back(FrameStatus::SubOptimal);

    assert_eq!(run_frame(&mut renderer, &RenderQueue::new()), FrameStatus::SubOptimal);
    assert_eq!(renderer.begin_frame().unwrap(), FrameStatus::OutOfDate);
}

#[test]
fn test_resize_keeps_pipelines() {
    let (mut renderer, state) = renderer();
    let scene = scene(&mut renderer);
    let queue = queue(vec![item(&scene, scene.mesh, scene.material)]);

    clear_events(&state);
    run_frame(&mut renderer, &queue);
    let pipeline_before = state.lock().unwrap().events_with_prefix("cmd1:bind_pipeline");
    let pipelines_created = state.lock().unwrap().pipelines_created;

    renderer.resize(1024, 768);
    assert_eq!(renderer.begin_frame().unwrap(), FrameStatus::OutOfDate);
    renderer.recreate_swapchain().unwrap();

    let (width, height, aspect) = renderer.shape();
    assert_eq!((width, height), (1024, 768));
    assert!((aspect - 1024.0 / 768.0).abs() < 1e-6);

    clear_events(&state);
    run_frame(&mut renderer, &queue);
    let commands = recorded_commands(&state);
    let pipeline_after: Vec<&String> = commands.iter().filter(|c| c.starts_with("bind_pipeline")).collect();
    assert_eq!(pipeline_before.len(), 1);
    assert_eq!(pipeline_after.len(), 1);
    assert!(pipeline_before[0].ends_with(pipeline_after[0].as_str()));
    assert!(commands.contains(&"set_viewport 1024x768".to_string()));

    let state = state.lock().unwrap();
    assert_eq!(state.pipelines_created, pipelines_created);
    assert!(state.position("create_framebuffer 1024x768 [swapchain0,depth]").is_some());
}

#[test]
fn test_recreate_follows_teardown_order() {
    let (mut renderer, state) = renderer();
    let _scene = scene(&mut renderer);
    run_frame(&mut renderer, &queue(Vec::new()));
    let groups_before = state.lock().unwrap().binding_groups_created;
    assert!(renderer.uniform_buffers().per_frame_set_count() > 0);
    clear_events(&state);

    renderer.resize(640, 480);
    renderer.recreate_swapchain().unwrap();

    let state = state.lock().unwrap();
    let idle = state.position("wait_idle").unwrap();
    let swapchain = state.position("recreate_swapchain 640x480").unwrap();
    let depth = state.position("create_render_target 640x480 D32_FLOAT").unwrap();
    let frames = state.events.iter().position(|e| e.starts_with("create_command_list")).unwrap();
    assert!(idle < swapchain);
    assert!(swapchain < depth);
    assert!(depth < frames);

    // material binding group rebuilt, per-frame uniforms dropped
    assert_eq!(state.binding_groups_created, groups_before + 1);
    assert_eq!(renderer.uniform_buffers().per_frame_set_count(), 0);
    assert_eq!(renderer.current_frame_slot(), 0);
}

#[test]
fn test_recreate_polls_window_size_until_nonzero() {
    let polls = Arc::new(AtomicU32::new(0));
    let counter = polls.clone();
    let desc = RendererDesc::new(800, 600).with_window_size(move || {
        if counter.fetch_add(1, Ordering::SeqCst) < 3 { (0, 0) } else { (640, 480) }
    });
    let (mut renderer, _state) = renderer_with(MockGraphicsDevice::new(), desc);

    renderer.resize(0, 0);
    renderer.recreate_swapchain().unwrap();

    assert_eq!(polls.load(Ordering::SeqCst), 4);
    assert_eq!(renderer.shape().0, 640);
    assert_eq!(renderer.shape().1, 480);
}

#[test]
fn test_recreate_uses_surface_size() {
    let (mut renderer, state) = renderer();
    state.lock().unwrap().surface_size = Some((500, 400));

    renderer.resize(1000, 800);
    renderer.recreate_swapchain().unwrap();

    assert_eq!((renderer.shape().0, renderer.shape().1), (500, 400));
}

#[test]
fn test_recreate_without_size_fails() {
    let (mut renderer, _state) = renderer();
    renderer.resize(0, 0);
    assert!(matches!(renderer.recreate_swapchain(), Err(Error::InvalidState(_))));
}

// ============================================================================
// PROJECTION
// ============================================================================

#[test]
fn test_perspective_matrix_is_reverse_z() {
    let projection = Renderer::build_perspective_matrix(FRAC_PI_2, 1.0, 0.1, 100.0);

    let near = projection * Vec4::new(0.0, 0.0, -0.1, 1.0);
    let far = projection * Vec4::new(0.0, 0.0, -100.0, 1.0);
    assert!((near.z / near.w - 1.0).abs() < 1e-5);
    assert!((far.z / far.w).abs() < 1e-5);

    // Vulkan clip space: +Y in view space points down on screen
    let up = projection * Vec4::new(0.0, 1.0, -1.0, 1.0);
    assert!((up.y / up.w + 1.0).abs() < 1e-5);
}

// ============================================================================
// SHUTDOWN
// ============================================================================

#[test]
fn test_shutdown_is_idempotent() {
    let (mut renderer, state) = renderer();
    let _scene = scene(&mut renderer);
    clear_events(&state);

    renderer.shutdown();
    renderer.shutdown();

    assert_eq!(state.lock().unwrap().events_with_prefix("wait_idle").len(), 1);
    assert_eq!(renderer.pipeline_cache().pipeline_count(), 0);
    assert!(renderer.render_pass_cache().is_empty());
    assert_eq!(renderer.uniform_buffers().global_buffer_count(MATERIAL_BUFFER_NAME), 0);
    assert!(matches!(renderer.begin_frame(), Err(Error::InvalidState(_))));
    assert!(matches!(renderer.create_mesh(triangle(true)), Err(Error::InvalidState(_))));

    drop(renderer);
    assert_eq!(state.lock().unwrap().events_with_prefix("wait_idle").len(), 1);
}

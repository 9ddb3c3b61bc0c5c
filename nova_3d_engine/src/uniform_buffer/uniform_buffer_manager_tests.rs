//! Unit tests for UniformBufferManager

use std::sync::Arc;
use crate::graphics_device::mock_graphics_device::MockGraphicsDevice;
use crate::graphics_device::{DeviceLimits, GraphicsDevice, MAX_FRAMES_IN_FLIGHT};
use crate::uniform_buffer::{UniformBufferManager, UNIFORM_BUFFER_SIZE_CAP};

fn manager() -> UniformBufferManager {
    UniformBufferManager::from_limits(MAX_FRAMES_IN_FLIGHT, &MockGraphicsDevice::new().limits())
}

// ============================================================================
// SIZING
// ============================================================================

#[test]
fn test_buffer_size_follows_device_range() {
    let limits = DeviceLimits { max_uniform_buffer_range: 16384, min_uniform_buffer_offset_alignment: 64 };
    let manager = UniformBufferManager::from_limits(2, &limits);
    assert_eq!(manager.buffer_size(), 16384);
    assert_eq!(manager.frame_count(), 2);
}

#[test]
fn test_buffer_size_is_capped() {
    let limits = DeviceLimits { max_uniform_buffer_range: u32::MAX as u64, min_uniform_buffer_offset_alignment: 64 };
    let manager = UniformBufferManager::from_limits(2, &limits);
    assert_eq!(manager.buffer_size(), UNIFORM_BUFFER_SIZE_CAP);
}

// ============================================================================
// PER-FRAME BUFFERS
// ============================================================================

#[test]
fn test_per_frame_set_allocated_once() {
    let mut device = MockGraphicsDevice::new();
    let state = device.state();
    let mut manager = manager();

    let frame0 = manager.find_or_create_per_frame_buffer(&mut device, "engine_view", 0, 0).unwrap();
    let frame1 = manager.find_or_create_per_frame_buffer(&mut device, "engine_view", 0, 1).unwrap();
    let again = manager.find_or_create_per_frame_buffer(&mut device, "engine_view", 0, 0).unwrap();

    assert!(Arc::ptr_eq(&frame0, &again));
    assert!(!Arc::ptr_eq(&frame0, &frame1));
    assert_eq!(state.lock().unwrap().buffers_created, MAX_FRAMES_IN_FLIGHT as u32);
    assert_eq!(manager.per_frame_set_count(), 1);
}

#[test]
fn test_per_frame_ids_are_independent() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = manager();

    let view0 = manager.find_or_create_per_frame_buffer(&mut device, "engine_view", 0, 0).unwrap();
    let view1 = manager.find_or_create_per_frame_buffer(&mut device, "engine_view", 1, 0).unwrap();
    assert!(!Arc::ptr_eq(&view0, &view1));
    assert!(manager.find_per_frame_buffer("engine_frame", 0, 0).is_none());
}

#[test]
#[should_panic(expected = "frame index 2 >= frame count 2")]
fn test_per_frame_index_out_of_range_panics() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = manager();
    let _ = manager.find_or_create_per_frame_buffer(&mut device, "engine_view", 0, 2);
}

#[test]
fn test_per_frame_mapping_round_trip() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = manager();

    for frame in 0..MAX_FRAMES_IN_FLIGHT {
        let mapping = manager.map_per_frame_buffer(&mut device, "engine_frame", 0, frame).unwrap();
        let bytes: Vec<u8> = (0..32).map(|i| i as u8 + frame as u8).collect();
        mapping.write(128, &bytes).unwrap();
        assert_eq!(mapping.read(128, bytes.len()).unwrap(), bytes);
    }
}

#[test]
fn test_mapping_write_pod() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = manager();
    let mapping = manager.map_per_frame_buffer(&mut device, "engine_frame", 0, 1).unwrap();

    mapping.write_pod(0, &[1.5f32, 2.5]).unwrap();
    let read = mapping.read(0, 8).unwrap();
    assert_eq!(read, bytemuck::bytes_of(&[1.5f32, 2.5]).to_vec());
}

#[test]
fn test_mapping_rejects_overflow() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = manager();
    let mapping = manager.map_per_frame_buffer(&mut device, "engine_frame", 0, 0).unwrap();
    let size = mapping.size();
    assert!(mapping.write(size - 2, &[0; 4]).is_err());
}

#[test]
fn test_invalidate_drops_per_frame_sets_only() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = manager();
    let before = manager.find_or_create_per_frame_buffer(&mut device, "engine_view", 0, 0).unwrap();
    manager.create_global_buffer(&mut device, "material", 0).unwrap();

    manager.invalidate_per_frame_buffers();
    assert!(manager.find_per_frame_buffer("engine_view", 0, 0).is_none());
    assert_eq!(manager.global_buffer_count("material"), 1);

    let after = manager.find_or_create_per_frame_buffer(&mut device, "engine_view", 0, 0).unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
}

// ============================================================================
// GLOBAL BUFFERS
// ============================================================================

#[test]
fn test_global_buffers_append() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = manager();
    assert_eq!(manager.global_buffer_count("material"), 0);

    let first = manager.create_global_buffer(&mut device, "material", 0).unwrap();
    let second = manager.create_global_buffer(&mut device, "material", 1).unwrap();

    assert_eq!(manager.global_buffer_count("material"), 2);
    assert!(Arc::ptr_eq(&manager.find_global_buffer("material", 0).unwrap(), &first));
    assert!(Arc::ptr_eq(&manager.find_global_buffer("material", 1).unwrap(), &second));
    assert!(manager.find_global_buffer("material", 2).is_none());
}

#[test]
fn test_global_existing_id_returns_same_buffer() {
    let mut device = MockGraphicsDevice::new();
    let state = device.state();
    let mut manager = manager();

    let first = manager.create_global_buffer(&mut device, "material", 0).unwrap();
    let again = manager.create_global_buffer(&mut device, "material", 0).unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(state.lock().unwrap().buffers_created, 1);
}

#[test]
fn test_global_id_gap_is_error() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = manager();
    assert!(manager.create_global_buffer(&mut device, "material", 3).is_err());
    assert_eq!(manager.global_buffer_count("material"), 0);
}

#[test]
fn test_global_mapping_round_trip() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = manager();
    manager.create_global_buffer(&mut device, "material", 0).unwrap();

    let mapping = manager.map_global_buffer("material", 0).unwrap();
    mapping.write(256, &[9, 8, 7]).unwrap();
    assert_eq!(mapping.read(256, 3).unwrap(), vec![9, 8, 7]);
    assert!(manager.map_global_buffer("material", 1).is_err());
}

#[test]
fn test_free_releases_all() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = manager();
    manager.create_global_buffer(&mut device, "material", 0).unwrap();
    manager.find_or_create_per_frame_buffer(&mut device, "engine_view", 0, 0).unwrap();

    manager.free();
    assert_eq!(manager.global_buffer_count("material"), 0);
    assert_eq!(manager.per_frame_set_count(), 0);
}

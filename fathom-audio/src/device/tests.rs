use super::*;

const RATE: u32 = 1000;

fn device_with_buffer(samples: &[i16]) -> (SoftwareDevice, SourceId, BufferId) {
    let device = SoftwareDevice::new();
    let source = device.create_source().unwrap();
    let buffer = device.create_buffer().unwrap();
    device.buffer_data(buffer, samples, 1, RATE).unwrap();
    (device, source, buffer)
}

fn render_frames(device: &SoftwareDevice, frames: usize) -> Vec<f32> {
    let mut out = vec![0.0; frames * 2];
    device.render(&mut out, RATE);
    out
}

#[test]
fn test_static_source_plays_to_end_then_stops() {
    let (device, source, buffer) = device_with_buffer(&[8000; 100]);
    device.bind_buffer(source, Some(buffer)).unwrap();
    device.play(source).unwrap();
    assert_eq!(device.source_state(source).unwrap(), SourceState::Playing);

    let out = render_frames(&device, 50);
    assert!(out.iter().all(|s| *s > 0.0));
    assert_eq!(device.sample_offset(source).unwrap(), 50);

    render_frames(&device, 60);
    assert_eq!(device.source_state(source).unwrap(), SourceState::Stopped);
}

#[test]
fn test_looping_source_keeps_playing() {
    let (device, source, buffer) = device_with_buffer(&[8000; 100]);
    device.bind_buffer(source, Some(buffer)).unwrap();
    device.set_looping(source, true).unwrap();
    device.play(source).unwrap();

    render_frames(&device, 250);
    assert_eq!(device.source_state(source).unwrap(), SourceState::Playing);
    assert_eq!(device.sample_offset(source).unwrap(), 50);
}

#[test]
fn test_queue_marks_processed_and_underruns() {
    let device = SoftwareDevice::new();
    let source = device.create_source().unwrap();
    let a = device.create_buffer().unwrap();
    let b = device.create_buffer().unwrap();
    device.buffer_data(a, &[1000; 40], 1, RATE).unwrap();
    device.buffer_data(b, &[1000; 40], 1, RATE).unwrap();
    device.queue_buffer(source, a).unwrap();
    device.queue_buffer(source, b).unwrap();
    device.play(source).unwrap();

    render_frames(&device, 50);
    assert_eq!(device.buffers_processed(source).unwrap(), 1);
    assert_eq!(device.unqueue_processed(source).unwrap().as_slice(), &[a]);
    assert_eq!(device.buffers_queued(source).unwrap(), 1);

    render_frames(&device, 50);
    assert_eq!(device.source_state(source).unwrap(), SourceState::Stopped);
    assert_eq!(device.buffers_processed(source).unwrap(), 1);
}

#[test]
fn test_buffer_in_use_cannot_change() {
    let (device, source, buffer) = device_with_buffer(&[0; 10]);
    device.bind_buffer(source, Some(buffer)).unwrap();

    assert_eq!(
        device.buffer_data(buffer, &[1; 10], 1, RATE),
        Err(DeviceError::InvalidOperation("buffer is attached to a source"))
    );
    assert!(device.delete_buffer(buffer).is_err());

    device.bind_buffer(source, None).unwrap();
    device.delete_buffer(buffer).unwrap();
    assert_eq!(device.buffer_count(), 0);
}

#[test]
fn test_cannot_rebind_while_playing() {
    let (device, source, buffer) = device_with_buffer(&[100; 10]);
    device.bind_buffer(source, Some(buffer)).unwrap();
    device.play(source).unwrap();
    assert!(matches!(
        device.bind_buffer(source, None),
        Err(DeviceError::InvalidOperation(_))
    ));
}

#[test]
fn test_offset_survives_restart() {
    let (device, source, buffer) = device_with_buffer(&[100; 100]);
    device.bind_buffer(source, Some(buffer)).unwrap();
    device.play(source).unwrap();
    render_frames(&device, 30);

    let offset = device.sample_offset(source).unwrap();
    device.stop(source).unwrap();
    device.play(source).unwrap();
    device.set_sample_offset(source, offset).unwrap();
    assert_eq!(device.sample_offset(source).unwrap(), 30);

    assert!(device.set_sample_offset(source, 101).is_err());
}

#[test]
fn test_stale_handles_are_rejected() {
    let device = SoftwareDevice::new();
    let source = device.create_source().unwrap();
    device.delete_source(source).unwrap();
    assert_eq!(device.play(source), Err(DeviceError::InvalidSource));
    assert_eq!(device.buffer_len(BufferId(999)), Err(DeviceError::InvalidBuffer));
}

#[test]
fn test_play_without_data_stops_immediately() {
    let device = SoftwareDevice::new();
    let source = device.create_source().unwrap();
    device.play(source).unwrap();
    assert_eq!(device.source_state(source).unwrap(), SourceState::Stopped);
}

#[test]
fn test_distance_silences_far_sources() {
    let (device, source, buffer) = device_with_buffer(&[8000; 100]);
    device.bind_buffer(source, Some(buffer)).unwrap();
    device.set_distances(source, 10.0, 20.0).unwrap();
    device.set_position(source, Some(Vec3::new(0.0, 0.0, -50.0))).unwrap();
    device.play(source).unwrap();

    let out = render_frames(&device, 10);
    assert!(out.iter().all(|s| *s == 0.0));
    // Silent sources still advance
    assert_eq!(device.sample_offset(source).unwrap(), 10);
}

#[test]
fn test_source_to_the_right_pans_right() {
    let (device, source, buffer) = device_with_buffer(&[8000; 100]);
    device.bind_buffer(source, Some(buffer)).unwrap();
    device.set_position(source, Some(Vec3::new(5.0, 0.0, 0.0))).unwrap();
    device.play(source).unwrap();

    let out = render_frames(&device, 4);
    assert!(out[1] > out[0] * 10.0);
}

#[test]
fn test_gain_is_clamped() {
    let (device, source, buffer) = device_with_buffer(&[16000; 10]);
    device.bind_buffer(source, Some(buffer)).unwrap();
    device.set_gain(source, 7.5).unwrap();
    device.play(source).unwrap();

    let out = render_frames(&device, 1);
    // Unit gain, centre pan: 16000/32768 * cos(pi/4)
    assert!((out[0] - 0.3466).abs() < 0.01, "{}", out[0]);

    device.set_gain(source, f32::NAN).unwrap();
    let out = render_frames(&device, 1);
    assert_eq!(out[0], 0.0);
}

#[test]
fn test_disconnect_flag() {
    let device = SoftwareDevice::new();
    assert!(device.is_connected());
    device.mark_disconnected();
    assert!(!device.is_connected());
}

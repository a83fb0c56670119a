use avbot_hardware::camera_from_spec;
use avbot_hardware::error::HwError;
use avbot_traits::Camera;
use rstest::rstest;
use std::time::Duration;

// One 2x1 frame: red then green
#[rstest]
fn file_backed_camera_delivers_a_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frames.rgb");
    let bytes = [255, 0, 0, 0, 255, 0];
    std::fs::write(&path, bytes).unwrap();

    let spec = path.to_string_lossy().into_owned();
    let mut cam = camera_from_spec(&spec, 2, 1).unwrap();
    let frame = cam.read(Duration::from_millis(500)).unwrap();
    assert_eq!(frame.width(), 2);
    assert_eq!(frame.pixel(1, 0), Some([0, 255, 0]));
}

#[rstest]
fn missing_stream_path_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let spec = dir.path().join("absent.rgb").to_string_lossy().into_owned();
    let err = camera_from_spec(&spec, 2, 1).err().expect("open must fail");
    assert!(matches!(err, HwError::Io(_)), "{err}");
}

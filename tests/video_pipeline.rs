mod common;

use std::{path::Path, sync::Arc};

use common::*;
use jingjie::{
  input::UnsupportedVideoOpener,
  output::EncoderCandidate,
  pipeline::{PipelineError, VideoPipeline, VideoReport},
};

const GUN_BOX: BBox = BBox::new(10.0, 10.0, 40.0, 40.0);

fn run(
  detector: &dyn Detector,
  opener: &dyn VideoOpener,
  encoders: &[Arc<dyn EncoderCandidate>],
  store: &ArtifactStore,
  config: &DetectionConfig,
) -> Result<VideoReport, PipelineError> {
  let annotator = Annotator::default();
  VideoPipeline::new(detector, &annotator, opener, encoders, store, config)
    .process(Path::new("upload.mp4"))
}

#[test]
fn gun_video_summary() {
  let dir = tempfile::tempdir().unwrap();
  let store = ArtifactStore::new(dir.path(), "/api/video/processed");
  let detector = SequenceDetector::new("gun", vec![Some(0.5), Some(0.8), Some(0.7)], GUN_BOX);
  let opener = VecOpener::new(64, 48, 30, 90);
  let encoder = Arc::new(MemoryEncoder::new("h264", "mp4"));
  let encoders: Vec<Arc<dyn EncoderCandidate>> = vec![encoder.clone() as Arc<dyn EncoderCandidate>];

  let report = run(&detector, &opener, &encoders, &store, &DetectionConfig::default()).unwrap();

  assert_eq!(report.total_frames, 90);
  assert_eq!(report.processed_frames, 90);
  assert_eq!(report.sampled_frames, 3);
  assert_eq!(report.skipped_samples, 0);
  assert_eq!(detector.calls(), 3);
  assert_eq!(report.encoder, "h264");
  assert!(report.processing_time >= 0.0);
  assert_eq!(opener.opened(), vec![Path::new("upload.mp4").to_path_buf()]);

  assert_eq!(report.summary.len(), 1);
  let gun = report.summary.get("gun").unwrap();
  assert_eq!(gun.count, 3);
  assert_eq!(gun.max_confidence, 0.8);
  assert_eq!(gun.frames_detected, vec![0, 30, 60]);
  assert_eq!(report.summary.total_detections(), 3);

  let name = &report.artifact.name;
  assert!(name.ends_with(".mp4"));
  assert_eq!(report.artifact.url, format!("/api/video/processed/{}", name));
  assert_eq!(all_files(dir.path()), vec![name.clone()]);
  assert_eq!(std::fs::read_to_string(&report.artifact.path).unwrap(), "frames=90");

  // 只有抽样帧带标注
  let frames = encoder.frames();
  let plain = synthetic_image(64, 48);
  assert_eq!(frames.len(), 90);
  for (index, frame) in frames.iter().enumerate() {
    assert_eq!(*frame != plain, index % 30 == 0, "frame {}", index);
  }
}

#[test]
fn summary_counts_match_sampled_detections() {
  let dir = tempfile::tempdir().unwrap();
  let store = ArtifactStore::new(dir.path(), "/p");
  let detector = StubDetector::new("knife", 0.6, GUN_BOX);
  let opener = VecOpener::new(50, 50, 25, 101);
  let encoders: Vec<Arc<dyn EncoderCandidate>> = vec![Arc::new(MemoryEncoder::new("h264", "mp4"))];
  let config = DetectionConfig::default().with_stride(10);

  let report = run(&detector, &opener, &encoders, &store, &config).unwrap();

  // 0, 10, ..., 100
  assert_eq!(report.sampled_frames, 11);
  assert_eq!(report.processed_frames, report.total_frames);
  assert_eq!(report.summary.total_detections(), 11);
  for (_, class) in report.summary.classes() {
    assert_eq!(class.count as usize, class.frames_detected.len());
  }
}

#[test]
fn falls_back_to_next_encoder() {
  let dir = tempfile::tempdir().unwrap();
  let store = ArtifactStore::new(dir.path(), "/p");
  let detector = StubDetector::new("gun", 0.9, GUN_BOX);
  let opener = VecOpener::new(32, 32, 30, 10);
  let encoders: Vec<Arc<dyn EncoderCandidate>> = vec![
    Arc::new(FailingEncoder::new("h264", "mp4")),
    Arc::new(FailingEncoder::new("mpeg4", "mp4")),
    Arc::new(MemoryEncoder::new("mjpeg", "avi")),
  ];

  let report = run(&detector, &opener, &encoders, &store, &DetectionConfig::default()).unwrap();

  assert_eq!(report.encoder, "mjpeg");
  assert!(report.artifact.name.ends_with(".avi"));
  assert_eq!(all_files(dir.path()), vec![report.artifact.name.clone()]);
}

#[test]
fn no_working_encoder_is_output_error() {
  let dir = tempfile::tempdir().unwrap();
  let store = ArtifactStore::new(dir.path(), "/p");
  let detector = StubDetector::new("gun", 0.9, GUN_BOX);
  let opener = VecOpener::new(32, 32, 30, 10);
  let encoders: Vec<Arc<dyn EncoderCandidate>> = vec![
    Arc::new(FailingEncoder::new("h264", "mp4")),
    Arc::new(FailingEncoder::new("mjpeg", "avi")),
  ];

  let err = run(&detector, &opener, &encoders, &store, &DetectionConfig::default()).unwrap_err();

  match err {
    PipelineError::OutputOpen(OutputError::NoEncoderAvailable(tried)) => {
      assert_eq!(tried, vec!["h264", "mjpeg"]);
    }
    other => panic!("unexpected error: {:?}", other),
  }
  assert_eq!(detector.calls(), 0);
  assert!(all_files(dir.path()).is_empty());
}

#[test]
fn empty_encoder_list_is_backend_unavailable() {
  let dir = tempfile::tempdir().unwrap();
  let store = ArtifactStore::new(dir.path(), "/p");
  let detector = StubDetector::new("gun", 0.9, GUN_BOX);
  let opener = VecOpener::new(32, 32, 30, 10);

  let err = run(&detector, &opener, &[], &store, &DetectionConfig::default()).unwrap_err();
  assert!(matches!(err, PipelineError::BackendUnavailable(_)));
  assert!(opener.opened().is_empty());
}

#[test]
fn unsupported_opener_is_backend_unavailable() {
  let dir = tempfile::tempdir().unwrap();
  let store = ArtifactStore::new(dir.path(), "/p");
  let detector = StubDetector::new("gun", 0.9, GUN_BOX);
  let encoders: Vec<Arc<dyn EncoderCandidate>> = vec![Arc::new(MemoryEncoder::new("h264", "mp4"))];

  let err = run(&detector, &UnsupportedVideoOpener, &encoders, &store, &DetectionConfig::default())
    .unwrap_err();

  assert!(matches!(err, PipelineError::BackendUnavailable(_)));
  assert_eq!(detector.calls(), 0);
  assert!(all_files(dir.path()).is_empty());
}

#[test]
fn mid_stream_read_error_discards_output() {
  let dir = tempfile::tempdir().unwrap();
  let store = ArtifactStore::new(dir.path(), "/p");
  let detector = StubDetector::new("gun", 0.9, GUN_BOX);
  let opener = VecOpener::new(32, 32, 30, 90).failing_at(45);
  let encoders: Vec<Arc<dyn EncoderCandidate>> = vec![Arc::new(MemoryEncoder::new("h264", "mp4"))];

  let err = run(&detector, &opener, &encoders, &store, &DetectionConfig::default()).unwrap_err();

  assert!(matches!(err, PipelineError::VideoProcessing(_)));
  assert!(all_files(dir.path()).is_empty());
}

#[test]
fn mid_stream_write_error_discards_output() {
  let dir = tempfile::tempdir().unwrap();
  let store = ArtifactStore::new(dir.path(), "/p");
  let detector = StubDetector::new("gun", 0.9, GUN_BOX);
  let opener = VecOpener::new(32, 32, 30, 90);
  let encoders: Vec<Arc<dyn EncoderCandidate>> =
    vec![Arc::new(BrokenSinkEncoder::failing_write_at(40))];

  let err = run(&detector, &opener, &encoders, &store, &DetectionConfig::default()).unwrap_err();

  assert!(matches!(err, PipelineError::VideoProcessing(_)));
  // 未完成的临时文件也被删除
  assert!(all_files(dir.path()).is_empty());
  assert_eq!(detector.calls(), 2);
}

#[test]
fn finish_error_discards_output() {
  let dir = tempfile::tempdir().unwrap();
  let store = ArtifactStore::new(dir.path(), "/p");
  let detector = StubDetector::new("gun", 0.9, GUN_BOX);
  let opener = VecOpener::new(32, 32, 30, 60);
  let encoders: Vec<Arc<dyn EncoderCandidate>> = vec![Arc::new(BrokenSinkEncoder::failing_finish())];

  let err = run(&detector, &opener, &encoders, &store, &DetectionConfig::default()).unwrap_err();

  assert!(matches!(err, PipelineError::VideoProcessing(_)));
  assert!(all_files(dir.path()).is_empty());
}

#[test]
fn failed_sample_is_skipped() {
  let dir = tempfile::tempdir().unwrap();
  let store = ArtifactStore::new(dir.path(), "/p");
  let detector = SequenceDetector::new("gun", vec![Some(0.6), None, Some(0.9)], GUN_BOX);
  let opener = VecOpener::new(32, 32, 30, 90);
  let encoders: Vec<Arc<dyn EncoderCandidate>> = vec![Arc::new(MemoryEncoder::new("h264", "mp4"))];

  let report = run(&detector, &opener, &encoders, &store, &DetectionConfig::default()).unwrap();

  assert_eq!(report.processed_frames, 90);
  assert_eq!(report.sampled_frames, 3);
  assert_eq!(report.skipped_samples, 1);
  let gun = report.summary.get("gun").unwrap();
  assert_eq!(gun.count, 2);
  assert_eq!(gun.frames_detected, vec![0, 60]);
  assert_eq!(gun.max_confidence, 0.9);
}

#[test]
fn zero_stride_is_rejected() {
  let dir = tempfile::tempdir().unwrap();
  let store = ArtifactStore::new(dir.path(), "/p");
  let detector = StubDetector::new("gun", 0.9, GUN_BOX);
  let opener = VecOpener::new(32, 32, 30, 10);
  let encoders: Vec<Arc<dyn EncoderCandidate>> = vec![Arc::new(MemoryEncoder::new("h264", "mp4"))];
  let config = DetectionConfig::default().with_stride(0);

  let err = run(&detector, &opener, &encoders, &store, &config).unwrap_err();

  assert!(matches!(err, PipelineError::Validation(_)));
  assert!(opener.opened().is_empty());
}

#[test]
fn empty_video_is_decode_error() {
  let dir = tempfile::tempdir().unwrap();
  let store = ArtifactStore::new(dir.path(), "/p");
  let detector = StubDetector::new("gun", 0.9, GUN_BOX);
  let opener = VecOpener::new(32, 32, 30, 0);
  let encoders: Vec<Arc<dyn EncoderCandidate>> = vec![Arc::new(MemoryEncoder::new("h264", "mp4"))];

  let err = run(&detector, &opener, &encoders, &store, &DetectionConfig::default()).unwrap_err();

  assert!(matches!(err, PipelineError::Decode(_)));
  assert!(all_files(dir.path()).is_empty());
}

#[test]
fn invalid_stream_is_decode_error() {
  let dir = tempfile::tempdir().unwrap();
  let store = ArtifactStore::new(dir.path(), "/p");
  let detector = StubDetector::new("gun", 0.9, GUN_BOX);
  let opener = VecOpener::new(0, 32, 30, 5);
  let encoders: Vec<Arc<dyn EncoderCandidate>> = vec![Arc::new(MemoryEncoder::new("h264", "mp4"))];

  let err = run(&detector, &opener, &encoders, &store, &DetectionConfig::default()).unwrap_err();

  assert!(matches!(err, PipelineError::Decode(_)));
  assert!(all_files(dir.path()).is_empty());
}

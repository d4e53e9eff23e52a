#![allow(unused_imports)]

mod fixtures;
pub use fixtures::*;

pub use jingjie::{
  config::DetectionConfig,
  frame::{Frame, FrameRate, StreamInfo},
  input::{InputError, VideoOpener, VideoSource},
  model::{BBox, Detection, Detector, ModelInferenceError},
  output::{Annotator, EncoderCandidate, OutputError, VideoSink},
  storage::ArtifactStore,
};

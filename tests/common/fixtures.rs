#![allow(dead_code)]

use std::{
  collections::VecDeque,
  io::Cursor,
  path::{Path, PathBuf},
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
};

use image::{ImageFormat, Rgb, RgbImage};
use jingjie::{
  frame::{Frame, FrameRate, StreamInfo},
  input::{InputError, VideoOpener, VideoSource},
  model::{BBox, Detection, Detector, ModelInferenceError},
  output::{EncoderCandidate, OutputError, VideoSink},
};

/// 纯灰色测试帧
pub fn synthetic_image(width: u32, height: u32) -> RgbImage {
  RgbImage::from_pixel(width, height, Rgb([96, 96, 96]))
}

pub fn png_bytes(image: &RgbImage) -> Vec<u8> {
  let mut bytes = Vec::new();
  image
    .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
    .expect("encode png");
  bytes
}

/// 每次调用都返回同一个检测结果
pub struct StubDetector {
  class_label: String,
  confidence: f32,
  bbox: BBox,
  calls: AtomicUsize,
}

impl StubDetector {
  pub fn new(class_label: &str, confidence: f32, bbox: BBox) -> Self {
    Self {
      class_label: class_label.to_string(),
      confidence,
      bbox,
      calls: AtomicUsize::new(0),
    }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Detector for StubDetector {
  fn detect(&self, _frame: &RgbImage, _threshold: f32) -> Result<Vec<Detection>, ModelInferenceError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    Ok(vec![Detection::new(
      self.class_label.clone(),
      self.confidence,
      self.bbox,
    )])
  }
}

/// 第 n 次调用返回置信度 `confidences[n]`
///
/// `None` 表示该次调用失败；超出列表后返回空结果。
pub struct SequenceDetector {
  class_label: String,
  confidences: Vec<Option<f32>>,
  bbox: BBox,
  calls: AtomicUsize,
}

impl SequenceDetector {
  pub fn new(class_label: &str, confidences: Vec<Option<f32>>, bbox: BBox) -> Self {
    Self {
      class_label: class_label.to_string(),
      confidences,
      bbox,
      calls: AtomicUsize::new(0),
    }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Detector for SequenceDetector {
  fn detect(&self, _frame: &RgbImage, _threshold: f32) -> Result<Vec<Detection>, ModelInferenceError> {
    let call = self.calls.fetch_add(1, Ordering::SeqCst);
    match self.confidences.get(call) {
      Some(Some(confidence)) => Ok(vec![Detection::new(
        self.class_label.clone(),
        *confidence,
        self.bbox,
      )]),
      Some(None) => Err(ModelInferenceError::Backend(format!("call {} failed", call))),
      None => Ok(Vec::new()),
    }
  }
}

/// 内存中的合成视频
pub struct VecSource {
  info: StreamInfo,
  frames: VecDeque<Result<Frame, InputError>>,
}

impl Iterator for VecSource {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    self.frames.pop_front()
  }
}

impl VideoSource for VecSource {
  fn info(&self) -> StreamInfo {
    self.info
  }
}

/// 忽略路径，打开 `frame_count` 帧的合成视频
pub struct VecOpener {
  pub width: u32,
  pub height: u32,
  pub frame_rate: FrameRate,
  pub frame_count: u64,
  /// 该帧返回读取错误
  pub fail_at: Option<u64>,
  pub opened: Mutex<Vec<PathBuf>>,
}

impl VecOpener {
  pub fn new(width: u32, height: u32, fps: u32, frame_count: u64) -> Self {
    Self {
      width,
      height,
      frame_rate: FrameRate::per_second(fps),
      frame_count,
      fail_at: None,
      opened: Mutex::new(Vec::new()),
    }
  }

  pub fn failing_at(mut self, index: u64) -> Self {
    self.fail_at = Some(index);
    self
  }

  pub fn opened(&self) -> Vec<PathBuf> {
    self.opened.lock().unwrap().clone()
  }
}

impl VideoOpener for VecOpener {
  fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>, InputError> {
    self.opened.lock().unwrap().push(path.to_path_buf());
    let frames = (0..self.frame_count)
      .map(|index| {
        if self.fail_at == Some(index) {
          Err(InputError::ReadError(format!("corrupt frame {}", index)))
        } else {
          Ok(Frame::new(
            synthetic_image(self.width, self.height),
            index,
            self.frame_rate,
          ))
        }
      })
      .collect();
    Ok(Box::new(VecSource {
      info: StreamInfo::new(self.width, self.height, self.frame_rate)
        .with_frame_count(Some(self.frame_count)),
      frames,
    }))
  }
}

/// 帧保存在内存中；`finish` 时向目标文件写入标记
pub struct MemorySink {
  path: PathBuf,
  frames: Arc<Mutex<Vec<RgbImage>>>,
  written: u64,
}

impl VideoSink for MemorySink {
  fn write_frame(&mut self, frame: &RgbImage) -> Result<(), OutputError> {
    self.frames.lock().unwrap().push(frame.clone());
    self.written += 1;
    Ok(())
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    std::fs::write(&self.path, format!("frames={}", self.written))?;
    Ok(())
  }

  fn frames_written(&self) -> u64 {
    self.written
  }
}

pub struct MemoryEncoder {
  name: String,
  extension: String,
  pub frames: Arc<Mutex<Vec<RgbImage>>>,
}

impl MemoryEncoder {
  pub fn new(name: &str, extension: &str) -> Self {
    Self {
      name: name.to_string(),
      extension: extension.to_string(),
      frames: Arc::new(Mutex::new(Vec::new())),
    }
  }

  pub fn frames(&self) -> Vec<RgbImage> {
    self.frames.lock().unwrap().clone()
  }
}

impl EncoderCandidate for MemoryEncoder {
  fn name(&self) -> &str {
    &self.name
  }

  fn extension(&self) -> &str {
    &self.extension
  }

  fn open(&self, path: &Path, _info: &StreamInfo) -> Result<Box<dyn VideoSink>, OutputError> {
    Ok(Box::new(MemorySink {
      path: path.to_path_buf(),
      frames: self.frames.clone(),
      written: 0,
    }))
  }
}

/// 总是打开失败
pub struct FailingEncoder {
  name: String,
  extension: String,
}

impl FailingEncoder {
  pub fn new(name: &str, extension: &str) -> Self {
    Self {
      name: name.to_string(),
      extension: extension.to_string(),
    }
  }
}

impl EncoderCandidate for FailingEncoder {
  fn name(&self) -> &str {
    &self.name
  }

  fn extension(&self) -> &str {
    &self.extension
  }

  fn open(&self, _path: &Path, _info: &StreamInfo) -> Result<Box<dyn VideoSink>, OutputError> {
    Err(OutputError::Encoder(format!("{} is not installed", self.name)))
  }
}

/// 打开时立即创建输出文件，随后在指定位置失败
pub struct BrokenSinkEncoder {
  /// 写入该帧时返回错误
  pub fail_write_at: Option<u64>,
  pub fail_finish: bool,
}

impl BrokenSinkEncoder {
  pub fn failing_write_at(index: u64) -> Self {
    Self {
      fail_write_at: Some(index),
      fail_finish: false,
    }
  }

  pub fn failing_finish() -> Self {
    Self {
      fail_write_at: None,
      fail_finish: true,
    }
  }
}

impl EncoderCandidate for BrokenSinkEncoder {
  fn name(&self) -> &str {
    "broken"
  }

  fn extension(&self) -> &str {
    "mp4"
  }

  fn open(&self, path: &Path, _info: &StreamInfo) -> Result<Box<dyn VideoSink>, OutputError> {
    std::fs::write(path, b"header")?;
    Ok(Box::new(BrokenSink {
      path: path.to_path_buf(),
      fail_write_at: self.fail_write_at,
      fail_finish: self.fail_finish,
      written: 0,
    }))
  }
}

pub struct BrokenSink {
  path: PathBuf,
  fail_write_at: Option<u64>,
  fail_finish: bool,
  written: u64,
}

impl VideoSink for BrokenSink {
  fn write_frame(&mut self, _frame: &RgbImage) -> Result<(), OutputError> {
    if self.fail_write_at == Some(self.written) {
      return Err(OutputError::Encoder(format!("disk full at frame {}", self.written)));
    }
    self.written += 1;
    Ok(())
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    if self.fail_finish {
      std::fs::write(&self.path, b"truncated")?;
      return Err(OutputError::Encoder("muxer did not finalize".to_string()));
    }
    std::fs::write(&self.path, format!("frames={}", self.written))?;
    Ok(())
  }

  fn frames_written(&self) -> u64 {
    self.written
  }
}

/// 目录中的可见文件名
pub fn visible_files(dir: &Path) -> Vec<String> {
  let mut names: Vec<String> = std::fs::read_dir(dir)
    .unwrap()
    .filter_map(|e| e.ok())
    .map(|e| e.file_name().to_string_lossy().into_owned())
    .filter(|n| !n.starts_with('.'))
    .collect();
  names.sort();
  names
}

/// 目录中的全部文件名，包括隐藏文件
pub fn all_files(dir: &Path) -> Vec<String> {
  let mut names: Vec<String> = std::fs::read_dir(dir)
    .unwrap()
    .filter_map(|e| e.ok())
    .map(|e| e.file_name().to_string_lossy().into_owned())
    .collect();
  names.sort();
  names
}

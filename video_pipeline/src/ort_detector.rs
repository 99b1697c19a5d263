use crate::{
    config::{DevicePreference, ModelSettings},
    detector::{BoundingBox, Detection, Detector, DetectorError, Device},
    frame::Frame,
};
use image::imageops::{self, FilterType};
use ndarray::{Array, ArrayD, ArrayViewD, Axis, Ix3, Ix4};
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::path::Path;

/// Resizes the frame to a `size x size` square and lays it out as a
/// `[1, 3, size, size]` tensor with samples scaled into `[0, 1]`.
///
/// The aspect ratio is not preserved.
fn frame_to_tensor(frame: &Frame, size: u32) -> Array<f32, Ix4> {
    let resized = imageops::resize(frame.image(), size, size, FilterType::Triangle);

    let side = size as usize;
    let mut input = Array::zeros((1, 3, side, side));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        let [r, g, b] = pixel.0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    input
}

/// Decodes a YOLOv8 head of shape `[1, 4 + classes, anchors]` into boxes in
/// the model's input space, keeping the best class of each anchor.
fn decode_output(
    output: ArrayViewD<f32>,
    min_probability: f32,
    iou_threshold: f32,
) -> Result<Vec<Detection>, DetectorError> {
    let output = output
        .into_dimensionality::<Ix3>()
        .map_err(|e| DetectorError::InvalidOutput(format!("expected a 3D tensor: {}", e)))?;
    let output = output.index_axis(Axis(0), 0);
    if output.nrows() < 5 {
        return Err(DetectorError::InvalidOutput(format!(
            "expected at least 5 rows per anchor, got {}",
            output.nrows()
        )));
    }

    let mut candidates = Vec::new();
    for anchor in output.axis_iter(Axis(1)) {
        let (class_id, confidence) = anchor
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |best, (index, value)| {
                if value > best.1 {
                    (index, value)
                } else {
                    best
                }
            });

        if confidence < min_probability {
            continue;
        }

        let bbox = BoundingBox::from_center(anchor[0], anchor[1], anchor[2], anchor[3]);
        candidates.push(Detection::new(bbox, class_id as u32, confidence));
    }

    Ok(non_max_suppression(candidates, iou_threshold))
}

/// Greedy class-agnostic suppression, most confident first.
pub fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        if kept
            .iter()
            .all(|k| k.bbox.iou(&candidate.bbox) < iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

fn select_device(preference: DevicePreference) -> Result<Device, DetectorError> {
    let cuda_available = || {
        CUDAExecutionProvider::default()
            .is_available()
            .unwrap_or(false)
    };

    match preference {
        DevicePreference::Cpu => Ok(Device::Cpu),
        DevicePreference::Cuda if cuda_available() => Ok(Device::Cuda),
        DevicePreference::Cuda => Err(DetectorError::DeviceUnavailable(Device::Cuda)),
        DevicePreference::Auto if cuda_available() => Ok(Device::Cuda),
        DevicePreference::Auto => Ok(Device::Cpu),
    }
}

fn build_session(path: &Path, device: Device) -> Result<Session, ort::Error> {
    let builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
    let builder = match device {
        Device::Cuda => builder.with_execution_providers([CUDAExecutionProvider::default()
            .build()
            .error_on_failure()])?,
        Device::Cpu => builder.with_execution_providers([CPUExecutionProvider::default().build()])?,
    };
    builder.commit_from_file(path)
}

fn inference_error(device: Device, error: ort::Error) -> DetectorError {
    let reason = error.to_string();
    let lowered = reason.to_lowercase();
    if lowered.contains("out of memory") || lowered.contains("failed to allocate") {
        DetectorError::DeviceResource { device, reason }
    } else {
        DetectorError::Inference(reason)
    }
}

/// YOLOv8 detector running on ONNX Runtime.
///
/// Boxes are reported in the `input_size x input_size` space the frames are
/// resized to, unless `rescale_boxes` is set.
pub struct OrtDetector {
    session: Session,
    device: Device,
    input_size: u32,
    min_probability: f32,
    iou_threshold: f32,
    rescale_boxes: bool,
    frames_seen: u64,
}

impl OrtDetector {
    pub fn load(model: &ModelSettings) -> Result<Self, DetectorError> {
        let path = model.get_model_path();
        let device = select_device(model.device)?;
        let session = build_session(&path, device).map_err(|source| DetectorError::ModelLoad {
            path: path.clone(),
            source,
        })?;

        tracing::info!(
            model = %path.display(),
            device = %device,
            input_size = model.input_size,
            "Loaded detection model"
        );

        Ok(Self {
            session,
            device,
            input_size: model.input_size,
            min_probability: model.min_probability,
            iou_threshold: model.iou_threshold,
            rescale_boxes: model.rescale_boxes,
            frames_seen: 0,
        })
    }

    fn run_inference(&mut self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, DetectorError> {
        let device = self.device;
        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| DetectorError::Inference(format!("failed to build tensor: {}", e)))?;

        let input_tensor = ort::inputs![tensor_ref];
        let outputs = self
            .session
            .run(input_tensor)
            .map_err(|e| inference_error(device, e))?;

        let (shape, data) = outputs["output0"]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InvalidOutput(format!("failed to extract tensor: {}", e)))?;

        let ix = shape.to_ixdyn();
        ArrayD::from_shape_vec(ix, data.to_vec())
            .map_err(|e| DetectorError::InvalidOutput(format!("invalid tensor shape: {}", e)))
    }
}

impl Detector for OrtDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let input = frame_to_tensor(frame, self.input_size);
        let output = self.run_inference(&input)?;
        let mut detections = decode_output(output.view(), self.min_probability, self.iou_threshold)?;

        if self.rescale_boxes {
            let sx = frame.width() as f32 / self.input_size as f32;
            let sy = frame.height() as f32 / self.input_size as f32;
            for detection in detections.iter_mut() {
                detection.bbox = detection.bbox.scale(sx, sy);
            }
        }

        self.frames_seen += 1;
        tracing::trace!(
            frame = self.frames_seen,
            detections = detections.len(),
            "Ran inference"
        );
        Ok(detections)
    }

    fn reclaim(&mut self) {
        // The session arena cannot be shrunk.
        tracing::trace!(device = %self.device, "No device memory to reclaim");
    }

    fn device(&self) -> Device {
        self.device
    }
}

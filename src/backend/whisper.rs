//! Local transcription with whisper.cpp
//!
//! The model is loaded once when the backend is built and reused for every
//! segment. whisper.cpp inference is CPU-bound and not reentrant-friendly, so
//! runs are serialized behind a mutex and pushed onto the blocking pool.

use std::os::raw::{c_char, c_uint, c_void};
use std::path::Path;
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::{BackendError, TranscriptFragment, TranscriptionBackend};
use crate::audio::rms_dbfs;
use crate::audio::segment::Segment;

/// Frames with RMS below this level never count as voice.
const VAD_THRESHOLD_DBFS: f32 = -55.0;
const VAD_FRAME_MS: usize = 30;

pub struct LocalWhisperBackend {
    ctx: Arc<WhisperContext>,
    inference_lock: Arc<Mutex<()>>,
    vad_filter: bool,
}

impl LocalWhisperBackend {
    /// Load ggml model weights from disk.
    pub fn load(model_path: &Path, vad_filter: bool) -> Result<Self, BackendError> {
        install_whisper_log_silencer();

        if !model_path.exists() {
            return Err(BackendError::ModelLoad(format!(
                "model file not found: {} (download ggml weights from \
                 https://huggingface.co/ggerganov/whisper.cpp and place them there)",
                model_path.display()
            )));
        }
        let path_str = model_path
            .to_str()
            .ok_or_else(|| BackendError::ModelLoad("model path is not valid UTF-8".to_string()))?;

        info!("Loading whisper model from {}", model_path.display());
        let ctx = WhisperContext::new_with_params(path_str, WhisperContextParameters::default())
            .map_err(|e| BackendError::ModelLoad(e.to_string()))?;
        Ok(Self {
            ctx: Arc::new(ctx),
            inference_lock: Arc::new(Mutex::new(())),
            vad_filter,
        })
    }
}

#[async_trait]
impl TranscriptionBackend for LocalWhisperBackend {
    fn name(&self) -> &'static str {
        "local-whisper"
    }

    /// whisper.cpp windows long audio internally, so the pipeline hands the
    /// whole clip over as a single segment.
    fn wants_segmentation(&self) -> bool {
        false
    }

    async fn transcribe(
        &self,
        segment: &Segment,
        language: Option<&str>,
    ) -> Result<TranscriptFragment, BackendError> {
        if self.vad_filter && !has_voice(segment.samples(), segment.sample_rate()) {
            debug!(
                "Segment {} has no frame above {} dBFS, skipping inference",
                segment.index(),
                VAD_THRESHOLD_DBFS
            );
            return Err(BackendError::UnrecognizedSpeech);
        }

        let ctx = Arc::clone(&self.ctx);
        let lock = Arc::clone(&self.inference_lock);
        let samples = segment.to_f32();
        let language = language.map(str::to_string);

        let text = tokio::task::spawn_blocking(move || -> Result<String, BackendError> {
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let mut state = ctx
                .create_state()
                .map_err(|e| BackendError::Service(format!("failed to create whisper state: {e}")))?;

            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            match language.as_deref() {
                Some(lang) => {
                    params.set_language(Some(lang));
                    params.set_detect_language(false);
                }
                None => {
                    params.set_language(None);
                    params.set_detect_language(true);
                }
            }
            // Limit CPU usage so laptops don't max out all cores.
            params.set_n_threads(num_cpus::get().min(8) as i32);
            params.set_print_progress(false);
            params.set_print_timestamps(false);
            params.set_print_special(false);
            params.set_print_realtime(false);
            params.set_translate(false);
            params.set_token_timestamps(false);

            state
                .full(params, &samples)
                .map_err(|e| BackendError::Service(format!("whisper inference failed: {e}")))?;

            let segment_count = state
                .full_n_segments()
                .map_err(|e| BackendError::Service(format!("whisper segment count failed: {e}")))?;
            let mut pieces = Vec::new();
            for i in 0..segment_count.max(0) {
                match state.full_get_segment_text_lossy(i) {
                    Ok(text) => {
                        let cleaned = text.replace("[BLANK_AUDIO]", "");
                        let cleaned = cleaned.trim();
                        if !cleaned.is_empty() {
                            pieces.push(cleaned.to_string());
                        }
                    }
                    Err(e) => debug!("Failed to read whisper segment {i}: {e}"),
                }
            }
            Ok(pieces.join(" "))
        })
        .await
        .map_err(|e| BackendError::Service(format!("whisper task failed: {e}")))??;

        if text.trim().is_empty() {
            return Err(BackendError::UnrecognizedSpeech);
        }
        Ok(TranscriptFragment::from_segment(segment, text))
    }
}

/// Quick energy scan: does any frame rise above the voice threshold?
fn has_voice(samples: &[i16], sample_rate: u32) -> bool {
    let frame_len = sample_rate as usize * VAD_FRAME_MS / 1000;
    if frame_len == 0 {
        return true;
    }
    samples
        .chunks(frame_len)
        .any(|frame| rms_dbfs(frame) > VAD_THRESHOLD_DBFS)
}

fn install_whisper_log_silencer() {
    // whisper.cpp writes banners straight to stderr, which would tear
    // through the progress display.
    static INSTALL_LOG_CALLBACK: Once = Once::new();
    INSTALL_LOG_CALLBACK.call_once(|| unsafe {
        whisper_rs::set_log_callback(Some(whisper_log_callback), std::ptr::null_mut());
    });
}

unsafe extern "C" fn whisper_log_callback(
    _level: c_uint,
    _text: *const c_char,
    _user_data: *mut c_void,
) {
}

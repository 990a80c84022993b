use std::path::{Path, PathBuf};

use log::debug;
use mime_guess::MimeGuess;

use crate::error::Result;

pub const IDLE_PROMPT: &str = "Drop your video here or click to browse";
pub const ENGINE_LOADING_LABEL: &str = "Loading FFmpeg...";
const PROGRESS_BAR_CELLS: usize = 40;

/// A picked file as the uploader sees it: a name, a declared media type and,
/// when it lives on disk, where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub name: String,
    pub media_type: String,
    pub path: Option<PathBuf>,
    pub size: Option<u64>,
}

impl MediaFile {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>) -> Self {
        MediaFile {
            name: name.into(),
            media_type: media_type.into(),
            path: None,
            size: None,
        }
    }

    pub fn from_path(path: &Path) -> Result<MediaFile> {
        let metadata = std::fs::metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(MediaFile {
            name,
            media_type: media_type_for(path),
            path: Some(path.to_path_buf()),
            size: Some(metadata.len()),
        })
    }

    pub fn is_video(&self) -> bool {
        self.media_type.starts_with("video/")
    }
}

/// Media type from the file extension, the way a browser file input reports it.
pub fn media_type_for(path: &Path) -> String {
    MimeGuess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Keeps only files whose declared media type is a video.
pub fn accept_video(file: Option<MediaFile>) -> Option<MediaFile> {
    match file {
        Some(f) if f.is_video() => Some(f),
        Some(f) => {
            debug!("Ignoring non-video selection '{}' ({})", f.name, f.media_type);
            None
        }
        None => None,
    }
}

type FileCallback = Box<dyn FnMut(Option<MediaFile>)>;

pub struct VideoUploader {
    on_file_change: FileCallback,
}

impl VideoUploader {
    pub fn new(on_file_change: impl FnMut(Option<MediaFile>) + 'static) -> Self {
        VideoUploader {
            on_file_change: Box::new(on_file_change),
        }
    }

    /// Reports the first picked file, or `None` when it is not a video.
    pub fn handle_selection(&mut self, files: Vec<MediaFile>) {
        let first = files.into_iter().next();
        (self.on_file_change)(accept_video(first));
    }
}

/// Display inputs pushed in by whoever runs the conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadState {
    pub file: Option<MediaFile>,
    pub error: Option<String>,
    pub progress: u8,
    pub loading: bool,
    pub is_loading_engine: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressView {
    pub width: u8,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploaderView {
    pub prompt: String,
    pub error: Option<String>,
    pub progress: Option<ProgressView>,
}

impl UploaderView {
    pub fn to_text(&self) -> String {
        let mut out = format!("[ {} ]\n", self.prompt);
        if let Some(err) = &self.error {
            out.push_str(&format!("! {}\n", err));
        }
        if let Some(p) = &self.progress {
            let filled = PROGRESS_BAR_CELLS * p.width as usize / 100;
            out.push_str(&format!(
                "[{}{}] {}\n",
                "#".repeat(filled),
                "-".repeat(PROGRESS_BAR_CELLS - filled),
                p.label
            ));
        }
        out
    }
}

pub fn render(state: &UploadState) -> UploaderView {
    let prompt = state
        .file
        .as_ref()
        .map(|f| f.name.clone())
        .unwrap_or_else(|| IDLE_PROMPT.to_string());

    let error = state.error.clone().filter(|e| !e.is_empty());

    let progress = (state.loading || state.is_loading_engine).then(|| {
        if state.is_loading_engine {
            ProgressView {
                width: 100,
                label: ENGINE_LOADING_LABEL.to_string(),
            }
        } else {
            let pct = state.progress.min(100);
            ProgressView {
                width: pct,
                label: format!("Converting... {}%", pct),
            }
        }
    });

    UploaderView { prompt, error, progress }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn capture() -> (VideoUploader, Rc<RefCell<Vec<Option<MediaFile>>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        (VideoUploader::new(move |f| sink.borrow_mut().push(f)), seen)
    }

    #[test]
    fn test_image_selection_reports_no_file() {
        let (mut uploader, seen) = capture();
        uploader.handle_selection(vec![MediaFile::new("cat.png", "image/png")]);
        assert_eq!(*seen.borrow(), vec![None]);
    }

    #[test]
    fn test_video_selection_passes_file_through() {
        let (mut uploader, seen) = capture();
        let clip = MediaFile::new("clip.mp4", "video/mp4");
        uploader.handle_selection(vec![clip.clone(), MediaFile::new("other.mp4", "video/mp4")]);
        assert_eq!(*seen.borrow(), vec![Some(clip)]);
    }

    #[test]
    fn test_empty_selection_reports_no_file() {
        let (mut uploader, seen) = capture();
        uploader.handle_selection(Vec::new());
        assert_eq!(*seen.borrow(), vec![None]);
    }

    #[test]
    fn test_engine_loading_pins_bar_to_full() {
        let state = UploadState {
            progress: 42,
            loading: true,
            is_loading_engine: true,
            ..Default::default()
        };
        let view = render(&state);
        assert_eq!(
            view.progress,
            Some(ProgressView {
                width: 100,
                label: ENGINE_LOADING_LABEL.to_string(),
            })
        );
    }

    #[test]
    fn test_converting_bar_tracks_progress() {
        let state = UploadState {
            progress: 42,
            loading: true,
            ..Default::default()
        };
        let progress = render(&state).progress.unwrap();
        assert_eq!(progress.width, 42);
        assert_eq!(progress.label, "Converting... 42%");
    }

    #[test]
    fn test_idle_has_no_bar_and_shows_prompt() {
        let view = render(&UploadState::default());
        assert_eq!(view.prompt, IDLE_PROMPT);
        assert!(view.progress.is_none());
        assert!(view.error.is_none());
    }

    #[test]
    fn test_prompt_shows_file_name_and_error_verbatim() {
        let state = UploadState {
            file: Some(MediaFile::new("holiday.mov", "video/quicktime")),
            error: Some("Conversion failed: exit status 1".to_string()),
            ..Default::default()
        };
        let view = render(&state);
        assert_eq!(view.prompt, "holiday.mov");
        assert_eq!(view.error.as_deref(), Some("Conversion failed: exit status 1"));

        let blank = UploadState {
            error: Some(String::new()),
            ..Default::default()
        };
        assert!(render(&blank).error.is_none());
    }

    #[test]
    fn test_to_text_draws_bar() {
        let state = UploadState {
            progress: 50,
            loading: true,
            ..Default::default()
        };
        let text = render(&state).to_text();
        assert!(text.contains(&format!("[{}{}] Converting... 50%", "#".repeat(20), "-".repeat(20))));
    }

    #[test]
    fn test_from_path_detects_media_type() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("Clip.MP4");
        std::fs::write(&video, b"not really a video").unwrap();
        let file = MediaFile::from_path(&video).unwrap();
        assert_eq!(file.name, "Clip.MP4");
        assert_eq!(file.media_type, "video/mp4");
        assert_eq!(file.size, Some(18));
        assert!(file.is_video());

        assert_eq!(media_type_for(Path::new("still.png")), "image/png");
        assert_eq!(media_type_for(Path::new("rip.mkv")), "video/x-matroska");
        assert_eq!(media_type_for(Path::new("holiday.mov")), "video/quicktime");
        assert_eq!(media_type_for(Path::new("clip.webm")), "video/webm");
        assert_eq!(media_type_for(Path::new("noext")), "application/octet-stream");
    }
}

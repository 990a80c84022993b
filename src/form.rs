// Settings form: a headless view of the conversion settings controls.
// The same component serves the inline panel and the modal dialog.

use log::debug;

use crate::error::Result;
use crate::options::{
    AudioBitrate, AudioCodec, CompressionMethod, ConversionSettings, FrameRate, Resolution,
    SettingKey, VideoBitrate, VideoCodec, CRF_RANGE, FILESIZE_RANGE_MB, PERCENTAGE_RANGE,
};

pub const FORM_TITLE: &str = "Conversion Settings";
pub const RESOLUTION_NOTE: &str = "Note: Resolution scaling maintains the original aspect ratio";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presentation {
    Inline,
    Dialog { open: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

impl SelectOption {
    fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        SelectOption {
            value: value.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Widget {
    Select {
        value: String,
        options: Vec<SelectOption>,
    },
    Range {
        min: u32,
        max: u32,
        value: String,
        caption: String,
    },
    Number {
        min: u32,
        max: u32,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub key: SettingKey,
    pub label: &'static str,
    pub widget: Widget,
    pub help: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormView {
    pub title: &'static str,
    pub controls: Vec<Control>,
    pub note: &'static str,
}

impl FormView {
    pub fn control(&self, key: SettingKey) -> Option<&Control> {
        self.controls.iter().find(|c| c.key == key)
    }

    /// Plain-text rendering for a terminal.
    pub fn to_text(&self) -> String {
        let mut out = format!("{}\n", self.title);
        for control in &self.controls {
            match &control.widget {
                Widget::Select { value, options } => {
                    let shown = options
                        .iter()
                        .find(|o| &o.value == value)
                        .map(|o| o.label.as_str())
                        .unwrap_or(value.as_str());
                    out.push_str(&format!("  {}: {}\n", control.label, shown));
                }
                Widget::Range { caption, .. } => {
                    out.push_str(&format!("  {}: {}\n", control.label, caption));
                }
                Widget::Number { value, min, max } => {
                    out.push_str(&format!("  {}: {} ({}-{})\n", control.label, value, min, max));
                }
            }
        }
        out.push_str(self.note);
        out.push('\n');
        out
    }
}

fn select_of<T: Copy>(all: &[T], wire: fn(T) -> &'static str, label: fn(T) -> &'static str) -> Vec<SelectOption> {
    all.iter().map(|v| SelectOption::new(wire(*v), label(*v))).collect()
}

/// The 34 quality-factor options; only the two ends carry a hint.
pub fn crf_options() -> Vec<SelectOption> {
    let (best, smallest) = CRF_RANGE;
    (best..=smallest)
        .map(|v| {
            let label = if v == best {
                format!("{} (Best Quality)", v)
            } else if v == smallest {
                format!("{} (Smallest Size)", v)
            } else {
                v.to_string()
            };
            SelectOption::new(v.to_string(), label)
        })
        .collect()
}

fn quality_control(settings: &ConversionSettings) -> Control {
    match settings.compression_method {
        CompressionMethod::Percentage => {
            let value = settings.effective_percentage().to_string();
            Control {
                key: SettingKey::TargetPercentage,
                label: "Target Quality Percentage",
                widget: Widget::Range {
                    min: PERCENTAGE_RANGE.0,
                    max: PERCENTAGE_RANGE.1,
                    caption: format!("{}% quality", value),
                    value,
                },
                help: Some(
                    "100% maintains highest quality and 1% gives maximum compression. \
                     Lower values result in smaller files but may reduce video quality.",
                ),
            }
        }
        CompressionMethod::Filesize => Control {
            key: SettingKey::TargetFilesize,
            label: "Target File Size (MB)",
            widget: Widget::Number {
                min: FILESIZE_RANGE_MB.0,
                max: FILESIZE_RANGE_MB.1,
                value: settings.effective_filesize().to_string(),
            },
            help: Some("Larger sizes maintain better quality. Maximum 10240MB (10GB)."),
        },
        CompressionMethod::Crf => Control {
            key: SettingKey::CrfValue,
            label: "Video Quality (CRF)",
            widget: Widget::Select {
                value: settings.effective_crf().to_string(),
                options: crf_options(),
            },
            help: Some("Lower values mean better quality but larger file size."),
        },
        CompressionMethod::Bitrate => Control {
            key: SettingKey::VideoBitrate,
            label: "Video Bitrate",
            widget: Widget::Select {
                value: settings.video_bitrate.as_str().to_string(),
                options: select_of(VideoBitrate::ALL, VideoBitrate::as_str, VideoBitrate::label),
            },
            help: None,
        },
    }
}

fn simple_select(key: SettingKey, label: &'static str, value: &str, options: Vec<SelectOption>) -> Control {
    Control {
        key,
        label,
        widget: Widget::Select {
            value: value.to_string(),
            options,
        },
        help: None,
    }
}

/// Builds the view for `settings` regardless of presentation.
pub fn build_view(settings: &ConversionSettings) -> FormView {
    let controls = vec![
        simple_select(
            SettingKey::CompressionMethod,
            "Compression Method",
            settings.compression_method.as_str(),
            select_of(CompressionMethod::ALL, CompressionMethod::as_str, CompressionMethod::label),
        ),
        quality_control(settings),
        simple_select(
            SettingKey::VideoCodec,
            "Video Codec",
            settings.video_codec.as_str(),
            select_of(VideoCodec::ALL, VideoCodec::as_str, VideoCodec::label),
        ),
        simple_select(
            SettingKey::AudioCodec,
            "Audio Codec",
            settings.audio_codec.as_str(),
            select_of(AudioCodec::ALL, AudioCodec::as_str, AudioCodec::label),
        ),
        simple_select(
            SettingKey::AudioBitrate,
            "Audio Bitrate",
            settings.audio_bitrate.as_str(),
            select_of(AudioBitrate::ALL, AudioBitrate::as_str, AudioBitrate::label),
        ),
        simple_select(
            SettingKey::FrameRate,
            "Frame Rate",
            settings.frame_rate.as_str(),
            select_of(FrameRate::ALL, FrameRate::as_str, FrameRate::label),
        ),
        simple_select(
            SettingKey::Resolution,
            "Max Resolution",
            settings.resolution.as_str(),
            select_of(Resolution::ALL, Resolution::as_str, Resolution::label),
        ),
    ];
    FormView {
        title: FORM_TITLE,
        controls,
        note: RESOLUTION_NOTE,
    }
}

type SettingsCallback = Box<dyn FnMut(ConversionSettings)>;
type OpenCallback = Box<dyn FnMut(bool)>;

pub struct SettingsForm {
    presentation: Presentation,
    on_settings_change: SettingsCallback,
    on_open_change: Option<OpenCallback>,
}

impl SettingsForm {
    pub fn inline(on_settings_change: impl FnMut(ConversionSettings) + 'static) -> Self {
        SettingsForm {
            presentation: Presentation::Inline,
            on_settings_change: Box::new(on_settings_change),
            on_open_change: None,
        }
    }

    pub fn dialog(
        open: bool,
        on_settings_change: impl FnMut(ConversionSettings) + 'static,
        on_open_change: impl FnMut(bool) + 'static,
    ) -> Self {
        SettingsForm {
            presentation: Presentation::Dialog { open },
            on_settings_change: Box::new(on_settings_change),
            on_open_change: Some(Box::new(on_open_change)),
        }
    }

    pub fn presentation(&self) -> Presentation {
        self.presentation
    }

    pub fn is_visible(&self) -> bool {
        !matches!(self.presentation, Presentation::Dialog { open: false })
    }

    /// Opens or closes a dialog form. Has no effect on an inline form.
    pub fn set_open(&mut self, open: bool) {
        if let Presentation::Dialog { open: current } = &mut self.presentation {
            if *current == open {
                return;
            }
            *current = open;
            debug!("Settings dialog {}", if open { "opened" } else { "closed" });
            if let Some(cb) = self.on_open_change.as_mut() {
                cb(open);
            }
        }
    }

    pub fn close(&mut self) {
        self.set_open(false);
    }

    pub fn render(&self, settings: &ConversionSettings) -> Option<FormView> {
        self.is_visible().then(|| build_view(settings))
    }

    /// Applies one control edit and emits the resulting settings.
    /// `settings` itself is left as it was.
    pub fn handle_change(&mut self, settings: &ConversionSettings, key: SettingKey, value: &str) -> Result<()> {
        let next = settings.with_setting(key, value)?;
        debug!("Setting {} changed to '{}'", key, value);
        (self.on_settings_change)(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn with_method(method: &str) -> ConversionSettings {
        ConversionSettings::default()
            .with_setting(SettingKey::CompressionMethod, method)
            .unwrap()
    }

    fn quality_keys(view: &FormView) -> Vec<SettingKey> {
        view.controls
            .iter()
            .map(|c| c.key)
            .filter(|k| {
                matches!(
                    k,
                    SettingKey::TargetPercentage | SettingKey::TargetFilesize | SettingKey::CrfValue | SettingKey::VideoBitrate
                )
            })
            .collect()
    }

    #[test]
    fn test_exactly_one_quality_control_per_method() {
        let cases = [
            ("bitrate", SettingKey::VideoBitrate),
            ("percentage", SettingKey::TargetPercentage),
            ("filesize", SettingKey::TargetFilesize),
            ("crf", SettingKey::CrfValue),
        ];
        for (method, key) in cases {
            let view = build_view(&with_method(method));
            assert_eq!(quality_keys(&view), vec![key], "method {}", method);
            for always in [
                SettingKey::CompressionMethod,
                SettingKey::VideoCodec,
                SettingKey::AudioCodec,
                SettingKey::AudioBitrate,
                SettingKey::FrameRate,
                SettingKey::Resolution,
            ] {
                assert!(view.control(always).is_some(), "{} missing for {}", always, method);
            }
        }
    }

    #[test]
    fn test_crf_dropdown_options() {
        let view = build_view(&with_method("crf"));
        let Widget::Select { value, options } = &view.control(SettingKey::CrfValue).unwrap().widget else {
            panic!("crf control should be a select");
        };
        assert_eq!(value, "23");
        assert_eq!(options.len(), 34);
        let values: Vec<u32> = options.iter().map(|o| o.value.parse().unwrap()).collect();
        assert_eq!(values, (18..=51).collect::<Vec<_>>());
        assert_eq!(options[0].label, "18 (Best Quality)");
        assert_eq!(options[33].label, "51 (Smallest Size)");
        for o in &options[1..33] {
            assert_eq!(o.label, o.value);
        }
    }

    #[test]
    fn test_percentage_slider_defaults_to_100() {
        let mut settings = with_method("percentage");
        settings.target_percentage = Some(String::new());
        let view = build_view(&settings);
        let widget = &view.control(SettingKey::TargetPercentage).unwrap().widget;
        assert_eq!(
            widget,
            &Widget::Range {
                min: 1,
                max: 100,
                value: "100".to_string(),
                caption: "100% quality".to_string(),
            }
        );
    }

    #[test]
    fn test_filesize_input_bounds_and_default() {
        let view = build_view(&with_method("filesize"));
        let widget = &view.control(SettingKey::TargetFilesize).unwrap().widget;
        assert_eq!(
            widget,
            &Widget::Number {
                min: 1,
                max: 10240,
                value: "100".to_string(),
            }
        );
    }

    #[test]
    fn test_handle_change_emits_new_value_and_keeps_snapshot() {
        let emitted = Rc::new(RefCell::new(Vec::new()));
        let sink = emitted.clone();
        let mut form = SettingsForm::inline(move |s| sink.borrow_mut().push(s));

        let before = ConversionSettings::default();
        form.handle_change(&before, SettingKey::FrameRate, "60").unwrap();

        assert_eq!(before.frame_rate, FrameRate::Fps30);
        let emitted = emitted.borrow();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].frame_rate, FrameRate::Fps60);
    }

    #[test]
    fn test_handle_change_rejects_unknown_option_without_emitting() {
        let count = Rc::new(RefCell::new(0));
        let sink = count.clone();
        let mut form = SettingsForm::inline(move |_| *sink.borrow_mut() += 1);
        assert!(form
            .handle_change(&ConversionSettings::default(), SettingKey::Resolution, "4096x2160")
            .is_err());
        assert_eq!(*count.borrow(), 0);
    }

    #[test]
    fn test_dialog_renders_only_while_open() {
        let opens = Rc::new(RefCell::new(Vec::new()));
        let sink = opens.clone();
        let mut form = SettingsForm::dialog(false, |_| {}, move |open| sink.borrow_mut().push(open));
        let settings = ConversionSettings::default();

        assert!(form.render(&settings).is_none());
        form.set_open(true);
        assert_eq!(form.render(&settings), Some(build_view(&settings)));
        form.set_open(true);
        form.close();
        assert!(form.render(&settings).is_none());
        assert_eq!(*opens.borrow(), vec![true, false]);
    }

    #[test]
    fn test_inline_ignores_open_state() {
        let mut form = SettingsForm::inline(|_| {});
        form.close();
        assert_eq!(form.presentation(), Presentation::Inline);
        assert!(form.render(&ConversionSettings::default()).is_some());
    }

    #[test]
    fn test_to_text_shows_labels() {
        let text = build_view(&with_method("crf")).to_text();
        assert!(text.starts_with(FORM_TITLE));
        assert!(text.contains("Compression Method: Target a video quality (CRF)"));
        assert!(text.contains("Video Quality (CRF): 23"));
        assert!(text.contains("Max Resolution: 1080p (1920px)"));
        assert!(text.ends_with(&format!("{}\n", RESOLUTION_NOTE)));
    }
}

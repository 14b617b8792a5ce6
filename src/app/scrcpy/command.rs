use crate::app::error::AppError;
use crate::app::models::LaunchOptions;
use crate::app::scrcpy::catalog::{MediaKind, MediaSelection};

pub const DEFAULT_WINDOW_TITLE: &str = "Android Device";
pub const BITRATE_SUFFIX: &str = "K";

/// Boolean options; presence of a truthy value emits the flag.
const TOGGLES: [(&str, &str); 5] = [
    ("turn_screen_off", "--turn-screen-off"),
    ("fullscreen", "--fullscreen"),
    ("mipmaps", "--no-mipmaps"),
    ("no_audio", "--no-audio"),
    ("no_video", "--no-video"),
];

/// `--flag=value` options, emitted in this order.
const VALUE_OPTIONS: [(&str, &str); 10] = [
    ("start_app", "--start-app"),
    ("mouse_mode", "--mouse"),
    ("gamepad_mode", "--gamepad"),
    ("keyboard_mode", "--keyboard"),
    ("mouse_bind", "--mouse-bind"),
    ("render_driver", "--render-driver"),
    ("max_fps", "--max-fps"),
    ("video_bitrate_slider", "--video-bit-rate"),
    ("audio_buffer", "--audio-buffer"),
    ("video_buffer", "--video-buffer"),
];

/// Window title precedence: explicit title, `start_app_name`, then the fallback label.
/// `None` means the title flag is omitted.
pub fn resolve_window_title(options: &LaunchOptions, window_title: Option<&str>) -> Option<String> {
    let title = window_title
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| {
            options
                .text("start_app_name")
                .filter(|value| !value.trim().is_empty())
        })
        .unwrap_or_else(|| DEFAULT_WINDOW_TITLE.to_string());
    if title == "None" {
        None
    } else {
        Some(title)
    }
}

/// Codec/encoder pair for one stream, only when both sides are set.
pub fn media_selection(options: &LaunchOptions, kind: MediaKind) -> Option<MediaSelection> {
    let codec = options.text(&format!("{}_codec", kind.as_str()));
    let encoder = options.text(&format!("{}_encoder", kind.as_str()));
    MediaSelection::from_labels(codec.as_deref(), encoder.as_deref())
}

/// Builds the scrcpy argv (program name first) for a set of launch options.
///
/// Sentinel values (`Auto`, `None`, `Disabled`, `0`, empty) suppress their flag. A virtual
/// display supersedes any static size selection. `extraargs` is split with shell rules and
/// appended last; malformed quoting is a parse error.
pub fn build_scrcpy_command(
    options: &LaunchOptions,
    window_title: Option<&str>,
    device_id: Option<&str>,
    trace_id: &str,
) -> Result<Vec<String>, AppError> {
    let mut args = vec!["scrcpy".to_string()];

    if let Some(serial) = device_id.map(str::trim).filter(|value| !value.is_empty()) {
        args.push(format!("--serial={serial}"));
    }
    if let Some(title) = resolve_window_title(options, window_title) {
        args.push(format!("--window-title={title}"));
    }

    for (key, flag) in TOGGLES {
        if options.flag(key) {
            args.push(flag.to_string());
        }
    }
    // scrcpy sessions keep the device awake unless explicitly turned off
    let stay_awake = options
        .get("stay_awake")
        .map(|value| value.as_flag())
        .unwrap_or(true);
    if stay_awake {
        args.push("--stay-awake".to_string());
    }

    for (key, flag) in VALUE_OPTIONS {
        let Some(value) = options.setting(key) else {
            continue;
        };
        if key == "video_bitrate_slider" && value.chars().all(|c| c.is_ascii_digit()) {
            args.push(format!("{flag}={value}{BITRATE_SUFFIX}"));
        } else {
            args.push(format!("{flag}={value}"));
        }
    }

    for kind in [MediaKind::Video, MediaKind::Audio] {
        if let Some(selection) = media_selection(options, kind) {
            args.push(format!("--{}-codec={}", kind.as_str(), selection.codec));
            args.push(format!("--{}-encoder={}", kind.as_str(), selection.encoder));
        }
    }

    if let Some(new_display) = options.setting("new_display") {
        args.push(format!("--new-display={new_display}"));
    } else {
        if let Some(display_id) = options.setting("display") {
            args.push(format!("--display-id={display_id}"));
        }
        if let Some(max_size) = static_max_size(options) {
            args.push(format!("--max-size={max_size}"));
        }
    }

    if let Some(extra) = options.text("extraargs") {
        let extra = extra.trim();
        if !extra.is_empty() {
            let words = shell_words::split(extra).map_err(|err| {
                AppError::parse(format!("Invalid extra arguments `{extra}`: {err}"), trace_id)
            })?;
            args.extend(words);
        }
    }

    Ok(args)
}

/// `max_size` wins; a `resolution` like `1920x1080` contributes its width.
fn static_max_size(options: &LaunchOptions) -> Option<String> {
    if let Some(max_size) = options.setting("max_size") {
        return Some(max_size);
    }
    let resolution = options.setting("resolution")?;
    let width = resolution.split('x').next()?.trim();
    (!width.is_empty()).then(|| width.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::models::ConfigValue;

    fn build(options: &LaunchOptions) -> Vec<String> {
        build_scrcpy_command(options, None, None, "trace").expect("build")
    }

    fn has_flag(args: &[String], flag: &str) -> bool {
        args.iter().any(|item| item == flag)
    }

    fn has_prefix(args: &[String], prefix: &str) -> bool {
        args.iter().any(|item| item.starts_with(prefix))
    }

    fn full_options() -> LaunchOptions {
        LaunchOptions::new()
            .with("start_app", "com.example.game")
            .with("start_app_name", "Example")
            .with("mouse_mode", "uhid")
            .with("gamepad_mode", "aoa")
            .with("keyboard_mode", "uhid")
            .with("mouse_bind", "++++:bhsn")
            .with("render_driver", "opengl")
            .with("max_fps", "60")
            .with("video_bitrate_slider", 8000i64)
            .with("audio_buffer", 50i64)
            .with("video_buffer", 20i64)
            .with("video_codec", "HW - h265")
            .with("video_encoder", "c2.qti.hevc.encoder (hw)")
            .with("audio_codec", "SW - opus")
            .with("audio_encoder", "c2.android.opus.encoder (sw)")
            .with("max_size", "1920")
            .with("display", "2")
            .with("fullscreen", true)
            .with("turn_screen_off", true)
            .with("mipmaps", true)
            .with("no_audio", true)
            .with("no_video", true)
            .with("stay_awake", true)
    }

    #[test]
    fn scenario_auto_codec_with_fullscreen_and_fps() {
        let options = LaunchOptions::new()
            .with("video_codec", "Auto")
            .with("fullscreen", true)
            .with("max_fps", "60");
        let args = build(&options);
        assert!(has_flag(&args, "--fullscreen"));
        assert!(has_flag(&args, "--max-fps=60"));
        assert!(!has_prefix(&args, "--video-codec"));
        assert!(!has_prefix(&args, "--video-encoder"));
    }

    #[test]
    fn scenario_new_display_supersedes_max_size() {
        let options = LaunchOptions::new()
            .with("new_display", "1280x720")
            .with("max_size", "1080")
            .with("resolution", "1920x1080")
            .with("display", "1");
        let args = build(&options);
        assert!(has_flag(&args, "--new-display=1280x720"));
        assert!(!has_prefix(&args, "--max-size"));
        assert!(!has_prefix(&args, "--display-id"));
    }

    #[test]
    fn auto_encoder_suppresses_codec_pair() {
        for (codec, encoder) in [
            ("Auto", "c2.qti.avc.encoder (hw)"),
            ("HW - h264", "Auto"),
            ("Auto", "Auto"),
            ("HW - h264", ""),
        ] {
            let options = LaunchOptions::new()
                .with("video_codec", codec)
                .with("video_encoder", encoder);
            let args = build(&options);
            assert!(!has_prefix(&args, "--video-codec"), "{codec} / {encoder}");
            assert!(!has_prefix(&args, "--video-encoder"), "{codec} / {encoder}");
        }
    }

    #[test]
    fn codec_labels_are_reduced_to_values() {
        let args = build(&full_options());
        assert!(has_flag(&args, "--video-codec=h265"));
        assert!(has_flag(&args, "--video-encoder=c2.qti.hevc.encoder"));
        assert!(has_flag(&args, "--audio-codec=opus"));
        assert!(has_flag(&args, "--audio-encoder=c2.android.opus.encoder"));
    }

    #[test]
    fn full_options_emit_expected_order() {
        let args = build(&full_options());
        assert_eq!(
            args,
            vec![
                "scrcpy",
                "--window-title=Example",
                "--turn-screen-off",
                "--fullscreen",
                "--no-mipmaps",
                "--no-audio",
                "--no-video",
                "--stay-awake",
                "--start-app=com.example.game",
                "--mouse=uhid",
                "--gamepad=aoa",
                "--keyboard=uhid",
                "--mouse-bind=++++:bhsn",
                "--render-driver=opengl",
                "--max-fps=60",
                "--video-bit-rate=8000K",
                "--audio-buffer=50",
                "--video-buffer=20",
                "--video-codec=h265",
                "--video-encoder=c2.qti.hevc.encoder",
                "--audio-codec=opus",
                "--audio-encoder=c2.android.opus.encoder",
                "--display-id=2",
                "--max-size=1920",
            ]
        );
    }

    #[test]
    fn sentinel_values_suppress_every_value_option() {
        let cases: [(&str, &str); 10] = [
            ("start_app", "--start-app"),
            ("mouse_mode", "--mouse="),
            ("gamepad_mode", "--gamepad"),
            ("keyboard_mode", "--keyboard"),
            ("mouse_bind", "--mouse-bind"),
            ("render_driver", "--render-driver"),
            ("max_fps", "--max-fps"),
            ("video_bitrate_slider", "--video-bit-rate"),
            ("audio_buffer", "--audio-buffer"),
            ("video_buffer", "--video-buffer"),
        ];
        for (key, prefix) in cases {
            assert!(has_prefix(&build(&full_options()), prefix), "{key} present by default");
            for sentinel in ["Auto", "None", "0", "disabled", "Disabled", ""] {
                let mut options = full_options();
                options.set(key, sentinel);
                assert!(
                    !has_prefix(&build(&options), prefix),
                    "{key}={sentinel:?} should suppress {prefix}"
                );
            }
            let mut options = full_options();
            options.set(key, ConfigValue::Number(0));
            assert!(!has_prefix(&build(&options), prefix), "{key}=0 (number)");
            let mut options = full_options();
            options.remove(key);
            assert!(!has_prefix(&build(&options), prefix), "{key} absent");
        }
    }

    #[test]
    fn sentinel_values_suppress_every_toggle() {
        for (key, flag) in [
            ("turn_screen_off", "--turn-screen-off"),
            ("fullscreen", "--fullscreen"),
            ("mipmaps", "--no-mipmaps"),
            ("no_audio", "--no-audio"),
            ("no_video", "--no-video"),
            ("stay_awake", "--stay-awake"),
        ] {
            for value in [
                ConfigValue::Flag(false),
                ConfigValue::Number(0),
                ConfigValue::Text("0".to_string()),
                ConfigValue::Text(String::new()),
                ConfigValue::Text("None".to_string()),
            ] {
                let mut options = full_options();
                options.set(key, value.clone());
                assert!(!has_flag(&build(&options), flag), "{key}={value:?}");
            }
        }
    }

    #[test]
    fn sentinel_values_suppress_sizes_and_displays() {
        for sentinel in ["Auto", "None", "0", "disabled", "Disabled", ""] {
            let options = LaunchOptions::new()
                .with("new_display", sentinel)
                .with("max_size", sentinel)
                .with("resolution", sentinel)
                .with("display", sentinel);
            let args = build(&options);
            assert!(!has_prefix(&args, "--new-display"), "{sentinel:?}");
            assert!(!has_prefix(&args, "--max-size"), "{sentinel:?}");
            assert!(!has_prefix(&args, "--display-id"), "{sentinel:?}");
        }
    }

    #[test]
    fn disabled_new_display_falls_back_to_resolution_width() {
        let options = LaunchOptions::new()
            .with("new_display", "Disabled")
            .with("resolution", "1280x720");
        let args = build(&options);
        assert!(has_flag(&args, "--max-size=1280"));
        assert!(!has_prefix(&args, "--new-display"));
    }

    #[test]
    fn stay_awake_defaults_on_when_absent() {
        let args = build(&LaunchOptions::new());
        assert!(has_flag(&args, "--stay-awake"));
    }

    #[test]
    fn bitrate_suffix_only_for_plain_numbers() {
        let options = LaunchOptions::new().with("video_bitrate_slider", "8M");
        assert!(has_flag(&build(&options), "--video-bit-rate=8M"));
        let options = LaunchOptions::new().with("video_bitrate_slider", "3000");
        assert!(has_flag(&build(&options), "--video-bit-rate=3000K"));
    }

    #[test]
    fn window_title_resolution_order() {
        let options = LaunchOptions::new().with("start_app_name", "From Config");
        let args = build_scrcpy_command(&options, Some("Explicit"), None, "t").expect("build");
        assert!(has_flag(&args, "--window-title=Explicit"));

        let args = build(&options);
        assert!(has_flag(&args, "--window-title=From Config"));

        let args = build(&LaunchOptions::new());
        assert!(has_flag(&args, "--window-title=Android Device"));

        let options = LaunchOptions::new().with("start_app_name", "None");
        assert!(!has_prefix(&build(&options), "--window-title"));
        let args = build_scrcpy_command(&LaunchOptions::new(), Some("None"), None, "t").expect("build");
        assert!(!has_prefix(&args, "--window-title"));
    }

    #[test]
    fn device_id_adds_serial() {
        let args =
            build_scrcpy_command(&LaunchOptions::new(), None, Some("R5CT10"), "t").expect("build");
        assert_eq!(args[1], "--serial=R5CT10");
        let args = build_scrcpy_command(&LaunchOptions::new(), None, Some(" "), "t").expect("build");
        assert!(!has_prefix(&args, "--serial"));
    }

    #[test]
    fn extraargs_are_shell_split_and_trailing() {
        let options = LaunchOptions::new()
            .with("fullscreen", true)
            .with("extraargs", r#"--push-target="/sdcard/My Files" --no-clipboard-autosync"#);
        let args = build(&options);
        let len = args.len();
        assert_eq!(args[len - 2], "--push-target=/sdcard/My Files");
        assert_eq!(args[len - 1], "--no-clipboard-autosync");
    }

    #[test]
    fn malformed_extraargs_is_parse_error() {
        let options = LaunchOptions::new().with("extraargs", "--window-title='unterminated");
        let err = build_scrcpy_command(&options, None, None, "trace-p").expect_err("parse error");
        assert_eq!(err.code, "ERR_PARSE");
        assert_eq!(err.trace_id, "trace-p");
    }

    #[test]
    fn builder_is_deterministic() {
        let options = full_options().with("extraargs", "--verbosity=debug");
        let first = build_scrcpy_command(&options, Some("Game"), Some("dev"), "a").expect("first");
        let second = build_scrcpy_command(&options, Some("Game"), Some("dev"), "b").expect("second");
        assert_eq!(first, second);
    }
}

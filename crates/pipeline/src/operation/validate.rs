use std::str::FromStr;

use clipper_common::{CommonError, END_OF_MEDIA, TimeSegment};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use strum::VariantNames;

use super::loose::{Flag, Scalar};
use super::options::*;
use super::*;
use crate::error::{CompileError, Result};

const TEXT_FONTSIZE: u32 = 24;
const KARAOKE_FONTSIZE: u32 = 60;
const KARAOKE_HIGHLIGHT_BORDER: u32 = 12;
const WATERMARK_OPACITY: f64 = 0.7;
const GIF_FPS: u32 = 10;
const GIF_SCALE: &str = "480:-1";

/// Validate one raw request entry into a typed descriptor.
///
/// Accepts both `{"op": name, ...fields}` and `{"op": name, "data": {...}}`.
pub fn parse(index: usize, raw: &Value) -> Result<Descriptor> {
    let object = raw
        .as_object()
        .ok_or_else(|| CompileError::invalid(index, "<missing>", "op", "operation must be a JSON object"))?;

    let name = match object.get("op") {
        Some(Value::String(name)) => name,
        Some(_) => return Err(CompileError::invalid(index, "<missing>", "op", "must be a string")),
        None => return Err(CompileError::invalid(index, "<missing>", "op", "missing required field")),
    };

    let kind = OpKind::from_str(name).map_err(|_| CompileError::UnknownOperation {
        index,
        op: name.clone(),
    })?;
    let ctx = OpContext::new(index, kind);
    let options = options_of(object);

    match kind {
        OpKind::Trim => trim(&ctx, decode(&ctx, &options)?).map(Descriptor::Trim),
        OpKind::Text => text(&ctx, decode(&ctx, &options)?).map(Descriptor::Text),
        OpKind::TextSequence => {
            text_sequence(&ctx, decode(&ctx, &options)?).map(Descriptor::TextSequence)
        }
        OpKind::Karaoke => karaoke(&ctx, decode(&ctx, &options)?).map(Descriptor::Karaoke),
        OpKind::Speed => speed(&ctx, decode(&ctx, &options)?).map(Descriptor::Speed),
        OpKind::Watermark => watermark(&ctx, decode(&ctx, &options)?).map(Descriptor::Watermark),
        OpKind::Audio => audio(&ctx, decode(&ctx, &options)?).map(Descriptor::Audio),
        OpKind::BackgroundColor => {
            background_color(&ctx, decode(&ctx, &options)?).map(Descriptor::BackgroundColor)
        }
        OpKind::Transcode => encode(&ctx, decode(&ctx, &options)?).map(Descriptor::Transcode),
        OpKind::Compress => encode(&ctx, decode(&ctx, &options)?).map(Descriptor::Compress),
        OpKind::Concat => concat(&ctx, decode(&ctx, &options)?).map(Descriptor::Concat),
        OpKind::ExtractAudio => {
            extract_audio(&ctx, decode(&ctx, &options)?).map(Descriptor::ExtractAudio)
        }
        OpKind::Gif => gif(&ctx, decode(&ctx, &options)?).map(Descriptor::Gif),
        OpKind::DownloadFromYoutube => {
            download(&ctx, decode(&ctx, &options)?).map(Descriptor::DownloadFromYoutube)
        }
        OpKind::ConvertToPlatform => {
            platform(&ctx, decode(&ctx, &options)?).map(Descriptor::ConvertToPlatform)
        }
    }
}

fn options_of(object: &Map<String, Value>) -> Value {
    if let Some(Value::Object(data)) = object.get("data") {
        return Value::Object(data.clone());
    }
    let mut options = object.clone();
    options.remove("op");
    Value::Object(options)
}

fn decode<T: DeserializeOwned>(ctx: &OpContext, options: &Value) -> Result<T> {
    serde_json::from_value(options.clone()).map_err(|error| {
        let field = locate_field::<T>(options).unwrap_or_else(|| "options".to_string());
        ctx.invalid(field, error.to_string())
    })
}

/// Find the key whose removal makes the options decode
fn locate_field<T: DeserializeOwned>(options: &Value) -> Option<String> {
    let object = options.as_object()?;
    object.keys().find_map(|key| {
        let mut probe = object.clone();
        probe.remove(key);
        serde_json::from_value::<T>(Value::Object(probe))
            .is_ok()
            .then(|| key.clone())
    })
}

fn field_name(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{prefix}.{field}")
    }
}

fn number(ctx: &OpContext, field: &str, value: Option<&Scalar>) -> Result<Option<f64>> {
    value
        .map(|value| value.as_f64().map_err(|message| ctx.invalid(field, message)))
        .transpose()
}

fn positive(ctx: &OpContext, field: &str, value: Option<&Scalar>) -> Result<Option<f64>> {
    match number(ctx, field, value)? {
        Some(value) if value <= 0.0 => Err(ctx.invalid(field, format!("must be positive, got {value}"))),
        other => Ok(other),
    }
}

fn count(ctx: &OpContext, field: &str, value: Option<&Scalar>) -> Result<Option<u32>> {
    value
        .map(|value| value.as_u32().map_err(|message| ctx.invalid(field, message)))
        .transpose()
}

fn flag(ctx: &OpContext, field: &str, value: Option<&Flag>) -> Result<Option<bool>> {
    value
        .map(|value| value.as_bool().map_err(|message| ctx.invalid(field, message)))
        .transpose()
}

fn expr(ctx: &OpContext, field: &str, value: Option<&Scalar>, default: &str) -> Result<Expr> {
    let text = value.map(Scalar::to_text).unwrap_or_else(|| default.to_string());
    Expr::parse(&text).map_err(|message| ctx.invalid(field, message))
}

fn size(ctx: &OpContext, field: &str, value: Option<&Scalar>) -> Result<Option<Expr>> {
    value
        .map(|value| Expr::parse_size(&value.to_text()).map_err(|message| ctx.invalid(field, message)))
        .transpose()
}

fn color(ctx: &OpContext, field: &str, value: Option<String>) -> Result<Option<String>> {
    value
        .map(|value| parse_color(&value).map_err(|message| ctx.invalid(field, message)))
        .transpose()
}

fn required_text(ctx: &OpContext, field: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(text) if !text.trim().is_empty() => Ok(text),
        Some(_) => Err(ctx.invalid(field, "must not be empty")),
        None => Err(ctx.missing(field)),
    }
}

/// `"192k"` stays as is, a bare number is read as kbit/s
fn bitrate(value: Option<&Scalar>) -> Option<String> {
    value.map(|value| match value {
        Scalar::Number(kbps) => format!("{kbps}k"),
        Scalar::Text(text) => text.trim().to_string(),
    })
}

fn time_segment(
    ctx: &OpContext,
    prefix: &str,
    start: Option<&Scalar>,
    end: Option<&Scalar>,
) -> Result<TimeSegment> {
    let start_field = field_name(prefix, "start_sec");
    let end_field = field_name(prefix, "end_sec");
    let start_sec = number(ctx, &start_field, start)?.unwrap_or(0.0);
    let end_sec = number(ctx, &end_field, end)?.unwrap_or(END_OF_MEDIA);

    if end_sec < 0.0 && end_sec != END_OF_MEDIA {
        return Err(ctx.invalid(end_field, format!("must be positive or -1, got {end_sec}")));
    }
    TimeSegment::new(start_sec, end_sec).map_err(|error| match error {
        CommonError::InvalidTimeRange { .. } => ctx.invalid(end_field, error.to_string()),
        other => ctx.invalid(start_field, other.to_string()),
    })
}

fn trim(ctx: &OpContext, raw: TrimOptions) -> Result<Trim> {
    let segment = time_segment(ctx, "", raw.start_sec.as_ref(), raw.end_sec.as_ref())?;
    let segment = match positive(ctx, "duration", raw.duration.as_ref())? {
        Some(duration) => TimeSegment {
            end_sec: segment.start_sec + duration,
            ..segment
        },
        None => segment,
    };
    Ok(Trim { segment })
}

struct TextDefaults {
    x: &'static str,
    y: &'static str,
}

fn text_style(ctx: &OpContext, prefix: &str, raw: &TextStyleOptions) -> Result<TextStyle> {
    let fontsize = count(ctx, &field_name(prefix, "fontsize"), raw.fontsize.as_ref())?
        .unwrap_or(TEXT_FONTSIZE);
    if fontsize == 0 {
        return Err(ctx.invalid(field_name(prefix, "fontsize"), "must be positive"));
    }
    Ok(TextStyle {
        fontsize,
        fontcolor: color(ctx, &field_name(prefix, "fontcolor"), raw.fontcolor.clone())?,
        fontfile: raw.fontfile.clone(),
        boxed: flag(ctx, &field_name(prefix, "background"), raw.background.as_ref())?
            .unwrap_or(false),
        boxcolor: color(ctx, &field_name(prefix, "boxcolor"), raw.boxcolor.clone())?,
        boxborderw: count(ctx, &field_name(prefix, "boxborderw"), raw.boxborderw.as_ref())?,
    })
}

fn text_segment(
    ctx: &OpContext,
    prefix: &str,
    raw: TextSegmentOptions,
    defaults: &TextDefaults,
) -> Result<TextSegment> {
    let text = required_text(ctx, &field_name(prefix, "text"), raw.text)?;
    let segment = time_segment(ctx, prefix, raw.start_sec.as_ref(), raw.end_sec.as_ref())?;
    let style = text_style(ctx, prefix, &raw.style)?;
    let fade = Fade {
        in_ms: count(ctx, &field_name(prefix, "fade_in_ms"), raw.style.fade_in_ms.as_ref())?
            .unwrap_or(0),
        out_ms: count(ctx, &field_name(prefix, "fade_out_ms"), raw.style.fade_out_ms.as_ref())?
            .unwrap_or(0),
    };
    Ok(TextSegment {
        segment,
        text,
        x: expr(ctx, &field_name(prefix, "x"), raw.style.x.as_ref(), defaults.x)?,
        y: expr(ctx, &field_name(prefix, "y"), raw.style.y.as_ref(), defaults.y)?,
        style,
        fade,
    })
}

fn text_segments(
    ctx: &OpContext,
    field: &str,
    items: Vec<TextSegmentOptions>,
    defaults: &TextDefaults,
) -> Result<Vec<TextSegment>> {
    if items.is_empty() {
        return Err(ctx.invalid(field, "at least one segment is required"));
    }
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| text_segment(ctx, &format!("{field}[{i}]"), item, defaults))
        .collect()
}

fn text(ctx: &OpContext, raw: TextOptions) -> Result<TextOverlay> {
    let defaults = TextDefaults { x: "10", y: "10" };
    let segments = match raw.segment {
        Some(segments) => text_segments(ctx, "segment", segments.into_vec(), &defaults)?,
        None if raw.inline.text.is_none() => return Err(ctx.missing("text")),
        None => vec![text_segment(ctx, "", raw.inline, &defaults)?],
    };
    Ok(TextOverlay { segments })
}

fn text_sequence(ctx: &OpContext, raw: TextSequenceOptions) -> Result<TextOverlay> {
    let defaults = TextDefaults {
        x: "(w-text_w)/2",
        y: "(h-text_h)/2",
    };
    let items = raw.items.ok_or_else(|| ctx.missing("items"))?;
    Ok(TextOverlay {
        segments: text_segments(ctx, "items", items, &defaults)?,
    })
}

fn karaoke(ctx: &OpContext, raw: KaraokeOptions) -> Result<Karaoke> {
    let words = raw
        .words
        .map(|words| {
            if words.is_empty() {
                return Err(ctx.invalid("words", "at least one word is required"));
            }
            words
                .into_iter()
                .enumerate()
                .map(|(i, word)| {
                    let prefix = format!("words[{i}]");
                    Ok(WordTiming {
                        word: required_text(ctx, &field_name(&prefix, "word"), word.word)?,
                        segment: time_segment(ctx, &prefix, word.start_sec.as_ref(), word.end_sec.as_ref())?,
                    })
                })
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?;

    let sentence = match (raw.sentence, &words) {
        (Some(sentence), _) if sentence.split_whitespace().next().is_some() => sentence,
        (Some(_), _) => return Err(ctx.invalid("sentence", "must contain at least one word")),
        (None, Some(words)) => words.iter().map(|w| w.word.as_str()).collect::<Vec<_>>().join(" "),
        (None, None) => return Err(ctx.missing("sentence")),
    };

    let segment = time_segment(ctx, "", raw.start_sec.as_ref(), raw.end_sec.as_ref())?;
    let fontsize = count(ctx, "fontsize", raw.fontsize.as_ref())?.unwrap_or(KARAOKE_FONTSIZE);
    if fontsize == 0 {
        return Err(ctx.invalid("fontsize", "must be positive"));
    }
    let x = expr(ctx, "x", raw.x.as_ref(), "(w-text_w)/2")?;
    let y = expr(ctx, "y", raw.y.as_ref(), "(h-text_h)/2")?;
    let highlight_y = expr(
        ctx,
        "highlight_y",
        raw.highlight_y.as_ref(),
        &format!("({y})+{}", fontsize * 3 / 2),
    )?;

    Ok(Karaoke {
        sentence,
        words,
        segment,
        x,
        y,
        style: TextStyle {
            fontsize,
            fontcolor: Some(color(ctx, "fontcolor", raw.fontcolor)?.unwrap_or_else(|| "white".to_string())),
            fontfile: raw.fontfile.clone(),
            boxed: false,
            boxcolor: None,
            boxborderw: None,
        },
        highlight: TextStyle {
            fontsize,
            fontcolor: Some(
                color(ctx, "highlight_fontcolor", raw.highlight_fontcolor)?
                    .unwrap_or_else(|| "yellow".to_string()),
            ),
            fontfile: raw.fontfile,
            boxed: true,
            boxcolor: Some(
                color(ctx, "highlight_boxcolor", raw.highlight_boxcolor)?
                    .unwrap_or_else(|| "black@0.6".to_string()),
            ),
            boxborderw: Some(
                count(ctx, "highlight_boxborderw", raw.highlight_boxborderw.as_ref())?
                    .unwrap_or(KARAOKE_HIGHLIGHT_BORDER),
            ),
        },
        highlight_y,
    })
}

fn speed(ctx: &OpContext, raw: SpeedOptions) -> Result<Speed> {
    let segments = match (raw.segment, raw.speed) {
        (Some(segments), _) => {
            let segments = segments.into_vec();
            if segments.is_empty() {
                return Err(ctx.invalid("segment", "at least one segment is required"));
            }
            segments
                .into_iter()
                .enumerate()
                .map(|(i, item)| {
                    let prefix = format!("segment[{i}]");
                    let speed_field = field_name(&prefix, "speed");
                    let speed = positive(ctx, &speed_field, item.speed.as_ref())?
                        .ok_or_else(|| ctx.missing(&speed_field))?;
                    Ok(SpeedSegment {
                        segment: time_segment(ctx, &prefix, item.start_sec.as_ref(), item.end_sec.as_ref())?,
                        speed,
                    })
                })
                .collect::<Result<Vec<_>>>()?
        }
        (None, Some(speed)) => {
            let speed = positive(ctx, "speed", Some(&speed))?.unwrap_or(1.0);
            vec![SpeedSegment {
                segment: TimeSegment::open_ended(0.0),
                speed,
            }]
        }
        (None, None) => return Err(ctx.missing("segment")),
    };
    Ok(Speed { segments })
}

fn watermark(ctx: &OpContext, raw: WatermarkOptions) -> Result<Watermark> {
    let nested = raw.overlay.unwrap_or_default();
    let inline = raw.inline;

    let path = required_text(ctx, "path", nested.path.or(inline.path))?;
    let position = nested
        .position
        .or(inline.position)
        .unwrap_or_else(|| "SAFE_BOTTOM".to_string());
    let position = OverlayPosition::parse(&position).map_err(|message| ctx.invalid("position", message))?;
    let opacity = number(ctx, "opacity", nested.opacity.or(inline.opacity).as_ref())?
        .unwrap_or(WATERMARK_OPACITY);
    if !(0.0..=1.0).contains(&opacity) {
        return Err(ctx.invalid("opacity", format!("must be within 0..1, got {opacity}")));
    }
    Ok(Watermark { path, position, opacity })
}

fn audio(ctx: &OpContext, raw: AudioOptions) -> Result<AudioOverlay> {
    let nested = raw.overlay.unwrap_or_default();
    let inline = raw.inline;

    let path = required_text(ctx, "path", nested.path.or(inline.path))?;
    let mix_volume = number(ctx, "mix_volume", nested.mix_volume.or(inline.mix_volume).as_ref())?
        .unwrap_or(1.0);
    if mix_volume < 0.0 {
        return Err(ctx.invalid("mix_volume", format!("must not be negative, got {mix_volume}")));
    }
    Ok(AudioOverlay {
        path,
        mix_volume,
        looped: flag(ctx, "loop", nested.looped.or(inline.looped).as_ref())?.unwrap_or(false),
        mute_source: flag(ctx, "mute_source", nested.mute_source.or(inline.mute_source).as_ref())?
            .unwrap_or(false),
    })
}

fn background_color(ctx: &OpContext, raw: BackgroundColorOptions) -> Result<BackgroundColor> {
    let nested = raw.overlay.unwrap_or_default();
    let inline = raw.inline;

    Ok(BackgroundColor {
        color: color(ctx, "color", nested.color.or(inline.color))?.unwrap_or_else(|| "black".to_string()),
        only_color: flag(ctx, "only_color", nested.only_color.or(inline.only_color).as_ref())?
            .unwrap_or(false),
    })
}

fn encode(ctx: &OpContext, raw: EncodeOptions) -> Result<Encode> {
    let nested = raw.options.unwrap_or_default();
    let inline = raw.inline;

    let crf = count(ctx, "crf", nested.crf.or(inline.crf).as_ref())?.unwrap_or(23);
    if crf > 51 {
        return Err(ctx.invalid("crf", format!("must be within 0..51, got {crf}")));
    }
    let scale = size(ctx, "scale", nested.scale.or(inline.scale).as_ref())?;

    Ok(Encode {
        video_codec: nested.codec.or(inline.codec).unwrap_or_else(|| "libx264".to_string()),
        preset: nested.preset.or(inline.preset).unwrap_or_else(|| "medium".to_string()),
        crf,
        audio_codec: nested.audio_codec.or(inline.audio_codec).unwrap_or_else(|| "aac".to_string()),
        audio_bitrate: bitrate(nested.audio_bitrate.or(inline.audio_bitrate).as_ref()),
        movflags: nested.movflags.or(inline.movflags),
        scale,
        target_size_mb: positive(ctx, "target_size_mb", nested.target_size_mb.or(inline.target_size_mb).as_ref())?,
    })
}

fn concat(ctx: &OpContext, raw: ConcatOptions) -> Result<Concat> {
    let inputs = raw.inputs.ok_or_else(|| ctx.missing("inputs"))?;
    if inputs.is_empty() {
        return Err(ctx.invalid("inputs", "at least one input is required"));
    }
    if let Some(i) = inputs.iter().position(|input| input.trim().is_empty()) {
        return Err(ctx.invalid(format!("inputs[{i}]"), "must not be empty"));
    }
    Ok(Concat {
        inputs,
        normalize: flag(ctx, "normalize", raw.normalize.as_ref())?.unwrap_or(true),
    })
}

fn extract_audio(ctx: &OpContext, raw: ExtractAudioOptions) -> Result<ExtractAudio> {
    let format = raw
        .format
        .map(|format| {
            AudioFormat::from_str(format.trim()).map_err(|_| {
                ctx.invalid(
                    "format",
                    format!("`{format}` is not one of {}", AudioFormat::VARIANTS.join(", ")),
                )
            })
        })
        .transpose()?
        .unwrap_or_default();
    Ok(ExtractAudio {
        format,
        bitrate: bitrate(raw.bitrate.as_ref()),
    })
}

fn gif(ctx: &OpContext, raw: GifOptions) -> Result<Gif> {
    let start_time = number(ctx, "start_time", raw.start_time.as_ref())?.unwrap_or(0.0);
    if start_time < 0.0 {
        return Err(ctx.invalid("start_time", format!("must not be negative, got {start_time}")));
    }
    let scale = raw.scale.unwrap_or_else(|| Scalar::Text(GIF_SCALE.to_string()));
    let fps = count(ctx, "fps", raw.fps.as_ref())?.unwrap_or(GIF_FPS);
    if fps == 0 {
        return Err(ctx.invalid("fps", "must be positive"));
    }
    Ok(Gif {
        start_time,
        duration: positive(ctx, "duration", raw.duration.as_ref())?,
        fps,
        scale: Expr::parse_size(&scale.to_text()).map_err(|message| ctx.invalid("scale", message))?,
    })
}

fn download(ctx: &OpContext, raw: DownloadOptions) -> Result<Download> {
    let url = raw.url.map(|url| required_text(ctx, "url", Some(url))).transpose()?;
    let format = match raw.format {
        Some(format) if format.chars().all(|c| c.is_ascii_alphanumeric()) && !format.is_empty() => {
            Some(format.to_ascii_lowercase())
        }
        Some(format) => return Err(ctx.invalid("format", format!("`{format}` is not a container extension"))),
        None => None,
    };
    Ok(Download {
        url,
        quality: raw.quality.unwrap_or_else(|| "best".to_string()),
        format,
        audio_only: flag(ctx, "audio_only", raw.audio_only.as_ref())?.unwrap_or(false),
    })
}

fn platform(ctx: &OpContext, raw: PlatformOptions) -> Result<ConvertToPlatform> {
    let name = required_text(ctx, "platform_preset", raw.platform_preset)?;
    let platform = Platform::from_str(name.trim()).map_err(|_| {
        ctx.invalid(
            "platform_preset",
            format!("`{name}` is not one of {}", Platform::VARIANTS.join(", ")),
        )
    })?;
    Ok(ConvertToPlatform { platform })
}

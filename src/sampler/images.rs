//! Image XObject decoding into tiny-skia pixmaps.
//!
//! Only what matters for locating dark horizontal strokes is decoded: sample
//! values are reduced to gray. Scanned scores are typically CCITT Group 4,
//! JPEG or Flate-compressed gray/RGB.

use crate::document::{read_numbers, resolve, stream_data};
use lopdf::{Dictionary, Document, Object, Stream};
use std::borrow::Cow;
use tiny_skia::{IntSize, Pixmap};

/// Largest accepted image side, in samples.
const MAX_IMAGE_SIDE: u32 = 20_000;

/// How samples map to gray.
#[derive(Debug, Clone, PartialEq)]
enum ColorModel {
    Gray,
    Rgb,
    Cmyk,
    /// Separation/DeviceN: a single tint, 1.0 = full ink
    Tint,
    Indexed {
        base: Box<ColorModel>,
        lookup: Vec<u8>,
    },
}

impl ColorModel {
    fn components(&self) -> usize {
        match self {
            ColorModel::Gray | ColorModel::Tint | ColorModel::Indexed { .. } => 1,
            ColorModel::Rgb => 3,
            ColorModel::Cmyk => 4,
        }
    }

    /// Gray level (0 = black, 255 = white) of one pixel's normalized components.
    ///
    /// `sample_max` is the largest raw sample value, used to recover palette
    /// indices.
    fn gray(&self, comps: &[f32], sample_max: f32) -> u8 {
        let level = match self {
            ColorModel::Gray => comps[0],
            ColorModel::Tint => 1.0 - comps[0],
            ColorModel::Rgb => luminance(comps[0], comps[1], comps[2]),
            ColorModel::Cmyk => {
                let (r, g, b) = cmyk_to_rgb(comps[0], comps[1], comps[2], comps[3]);
                luminance(r, g, b)
            },
            ColorModel::Indexed { base, lookup } => {
                let n = base.components();
                let index = (comps[0] * sample_max).round() as usize;
                let entry = lookup.get(index * n..index * n + n);
                match entry {
                    Some(bytes) => {
                        let normalized: Vec<f32> =
                            bytes.iter().map(|b| *b as f32 / 255.0).collect();
                        return base.gray(&normalized, 255.0);
                    },
                    None => 1.0,
                }
            },
        };
        (level.clamp(0.0, 1.0) * 255.0).round() as u8
    }
}

/// Perceptual gray of an RGB color.
pub(crate) fn luminance(r: f32, g: f32, b: f32) -> f32 {
    0.299 * r + 0.587 * g + 0.114 * b
}

/// Convert CMYK to RGB.
pub(crate) fn cmyk_to_rgb(c: f32, m: f32, y: f32, k: f32) -> (f32, f32, f32) {
    let r = (1.0 - c) * (1.0 - k);
    let g = (1.0 - m) * (1.0 - k);
    let b = (1.0 - y) * (1.0 - k);
    (r, g, b)
}

/// Decode an image XObject into an opaque (or, for stencil masks,
/// transparent-background) pixmap in image sample space.
///
/// `fill_gray` is the current fill level (0..1), used to paint stencil
/// masks. Returns `Err` with a reason for unsupported or corrupt images.
pub(crate) fn decode_image(
    doc: &Document,
    stream: &Stream,
    fill_gray: f32,
) -> Result<Pixmap, String> {
    let dict = &stream.dict;
    let width = int_entry(doc, stream, b"Width").ok_or("image has no /Width")?;
    let height = int_entry(doc, stream, b"Height").ok_or("image has no /Height")?;
    if width == 0 || height == 0 || width > MAX_IMAGE_SIDE || height > MAX_IMAGE_SIDE {
        return Err(format!("unsupported image size {}x{}", width, height));
    }

    let filters = filter_names(doc, stream);
    let last_filter = filters.last().map(|f| f.as_slice());
    let is_mask = dict
        .get(b"ImageMask")
        .ok()
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_bool().ok())
        .unwrap_or(false);
    let decode = dict
        .get(b"Decode")
        .ok()
        .and_then(|o| read_numbers(doc, o));
    let inverted = decode
        .as_ref()
        .map(|d| d.len() >= 2 && d[0] > d[1])
        .unwrap_or(false);

    // Gray levels, one byte per sample position.
    let gray: Vec<u8> = match last_filter {
        Some(b"DCTDecode") | Some(b"DCT") => {
            let data = undo_leading_filters(doc, stream, &filters)?;
            decode_jpeg(&data, width, height)?
        },
        Some(b"CCITTFaxDecode") | Some(b"CCF") => {
            let data = undo_leading_filters(doc, stream, &filters)?;
            decode_ccitt(doc, stream, &data, width, height)?
        },
        Some(b"JPXDecode") | Some(b"JBIG2Decode") => {
            return Err(format!(
                "unsupported image filter {}",
                String::from_utf8_lossy(last_filter.unwrap_or_default())
            ))
        },
        _ => {
            let data = stream_data(stream)?;
            if is_mask {
                unpack_samples(&data, width, height, 1, 1)
                    .into_iter()
                    .map(|v| if v > 0.5 { 255 } else { 0 })
                    .collect()
            } else {
                let bpc = int_entry(doc, stream, b"BitsPerComponent").unwrap_or(8);
                let model = dict
                    .get(b"ColorSpace")
                    .ok()
                    .map(|cs| color_model(doc, cs))
                    .unwrap_or(ColorModel::Gray);
                let n = model.components();
                let sample_max = if bpc < 8 { ((1u32 << bpc) - 1) as f32 } else { 255.0 };
                let samples = unpack_samples(&data, width, height, n, bpc);
                samples
                    .chunks(n)
                    .map(|comps| model.gray(comps, sample_max))
                    .collect()
            }
        },
    };

    let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
    if is_mask {
        // Sample 0 paints unless /Decode is [1 0]; painted pixels take the fill color.
        let paint = (fill_gray.clamp(0.0, 1.0) * 255.0).round() as u8;
        for &level in &gray {
            let painted = (level == 0) != inverted;
            if painted {
                rgba.extend_from_slice(&[paint, paint, paint, 255]);
            } else {
                rgba.extend_from_slice(&[0, 0, 0, 0]);
            }
        }
    } else {
        for &level in &gray {
            let level = if inverted { 255 - level } else { level };
            rgba.extend_from_slice(&[level, level, level, 255]);
        }
    }

    let size = IntSize::from_wh(width, height).ok_or("invalid image size")?;
    Pixmap::from_vec(rgba, size).ok_or_else(|| "image sample count mismatch".to_string())
}

fn int_entry(doc: &Document, stream: &Stream, key: &[u8]) -> Option<u32> {
    let value = resolve(doc, stream.dict.get(key).ok()?)?.as_i64().ok()?;
    u32::try_from(value).ok()
}

fn filter_names(doc: &Document, stream: &Stream) -> Vec<Vec<u8>> {
    let Some(filter) = stream.dict.get(b"Filter").ok().and_then(|f| resolve(doc, f)) else {
        return Vec::new();
    };
    match filter {
        Object::Name(name) => vec![name.clone()],
        Object::Array(items) => items
            .iter()
            .filter_map(|item| resolve(doc, item)?.as_name().ok().map(|n| n.to_vec()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Input of the last filter in the chain: the raw content, with any filters
/// listed before it (e.g. `[/FlateDecode /DCTDecode]`) already undone.
fn undo_leading_filters<'a>(
    doc: &Document,
    stream: &'a Stream,
    filters: &[Vec<u8>],
) -> Result<Cow<'a, [u8]>, String> {
    let Some((_, leading)) = filters.split_last() else {
        return Ok(Cow::Borrowed(&stream.content));
    };
    if leading.is_empty() {
        return Ok(Cow::Borrowed(&stream.content));
    }

    let mut partial = Stream::new(Dictionary::new(), stream.content.clone());
    if let [only] = leading {
        partial.dict.set("Filter", Object::Name(only.clone()));
        let params = stream
            .dict
            .get(b"DecodeParms")
            .ok()
            .and_then(|p| resolve(doc, p))
            .and_then(|p| p.as_array().ok())
            .and_then(|items| items.first())
            .and_then(|p| resolve(doc, p))
            .and_then(|p| p.as_dict().ok());
        if let Some(params) = params {
            partial.dict.set("DecodeParms", params.clone());
        }
    } else {
        let names = leading.iter().map(|n| Object::Name(n.clone())).collect();
        partial.dict.set("Filter", Object::Array(names));
    }
    stream_data(&partial).map(Cow::Owned)
}

fn color_model(doc: &Document, cs: &Object) -> ColorModel {
    let Some(cs) = resolve(doc, cs) else {
        return ColorModel::Gray;
    };
    match cs {
        Object::Name(name) => match name.as_slice() {
            b"DeviceRGB" | b"CalRGB" | b"RGB" => ColorModel::Rgb,
            b"DeviceCMYK" | b"CMYK" => ColorModel::Cmyk,
            _ => ColorModel::Gray,
        },
        Object::Array(items) => {
            let family = items
                .first()
                .and_then(|f| resolve(doc, f))
                .and_then(|f| f.as_name().ok())
                .unwrap_or_default();
            match family {
                b"ICCBased" => {
                    let n = items
                        .get(1)
                        .and_then(|s| resolve(doc, s))
                        .and_then(|s| s.as_stream().ok())
                        .and_then(|s| s.dict.get(b"N").ok())
                        .and_then(|n| n.as_i64().ok())
                        .unwrap_or(3);
                    match n {
                        1 => ColorModel::Gray,
                        4 => ColorModel::Cmyk,
                        _ => ColorModel::Rgb,
                    }
                },
                b"CalRGB" => ColorModel::Rgb,
                b"CalGray" => ColorModel::Gray,
                b"Separation" | b"DeviceN" => ColorModel::Tint,
                b"Indexed" | b"I" => {
                    let base = items
                        .get(1)
                        .map(|b| color_model(doc, b))
                        .unwrap_or(ColorModel::Rgb);
                    let lookup = items
                        .get(3)
                        .and_then(|l| resolve(doc, l))
                        .and_then(|l| match l {
                            Object::String(bytes, _) => Some(bytes.clone()),
                            Object::Stream(s) => stream_data(s).ok(),
                            _ => None,
                        })
                        .unwrap_or_default();
                    ColorModel::Indexed {
                        base: Box::new(base),
                        lookup,
                    }
                },
                _ => ColorModel::Gray,
            }
        },
        _ => ColorModel::Gray,
    }
}

/// Unpack `width × height × n` samples of `bpc` bits into normalized values.
///
/// Rows are padded to a byte boundary; missing data reads as 1.0.
fn unpack_samples(data: &[u8], width: u32, height: u32, n: usize, bpc: u32) -> Vec<f32> {
    let per_row = width as usize * n;
    let total = per_row * height as usize;
    let mut out = Vec::with_capacity(total);

    match bpc {
        8 => {
            for i in 0..total {
                out.push(data.get(i).map(|v| *v as f32 / 255.0).unwrap_or(1.0));
            }
        },
        16 => {
            for i in 0..total {
                out.push(data.get(i * 2).map(|v| *v as f32 / 255.0).unwrap_or(1.0));
            }
        },
        1 | 2 | 4 => {
            let bits = bpc as usize;
            let row_bytes = (per_row * bits).div_ceil(8);
            let max = ((1u32 << bpc) - 1) as f32;
            for row in 0..height as usize {
                for i in 0..per_row {
                    let bit_offset = i * bits;
                    let byte = data.get(row * row_bytes + bit_offset / 8).copied();
                    let value = match byte {
                        Some(byte) => {
                            let shift = 8 - bits - (bit_offset % 8);
                            ((byte >> shift) & ((1u8 << bits) - 1)) as f32 / max
                        },
                        None => 1.0,
                    };
                    out.push(value);
                }
            }
        },
        _ => {
            log::warn!("Unsupported BitsPerComponent {}, treating image as blank", bpc);
            out.resize(total, 1.0);
        },
    }
    out
}

fn decode_jpeg(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, String> {
    let decoded = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
        .map_err(|e| format!("JPEG decoding failed: {}", e))?;
    let gray = decoded.to_luma8();
    if gray.width() != width || gray.height() != height {
        log::debug!(
            "JPEG is {}x{} but image dictionary says {}x{}; resizing",
            gray.width(),
            gray.height(),
            width,
            height
        );
        let resized =
            image::imageops::resize(&gray, width, height, image::imageops::FilterType::Triangle);
        return Ok(resized.into_raw());
    }
    Ok(gray.into_raw())
}

/// Decode CCITT Group 3/4 data straight to gray levels.
fn decode_ccitt(
    doc: &Document,
    stream: &Stream,
    data: &[u8],
    width: u32,
    height: u32,
) -> Result<Vec<u8>, String> {
    let params = stream
        .dict
        .get(b"DecodeParms")
        .ok()
        .and_then(|p| resolve(doc, p))
        .and_then(|p| match p {
            Object::Dictionary(d) => Some(d.clone()),
            Object::Array(items) => items
                .last()
                .and_then(|i| resolve(doc, i))
                .and_then(|i| i.as_dict().ok().cloned()),
            _ => None,
        })
        .unwrap_or_default();
    let k = params.get(b"K").and_then(|o| o.as_i64()).unwrap_or(0);
    let columns = params
        .get(b"Columns")
        .and_then(|o| o.as_i64())
        .map(|c| c as u32)
        .unwrap_or(width);
    let black_is_1 = params
        .get(b"BlackIs1")
        .and_then(|o| o.as_bool())
        .unwrap_or(false);

    let columns = u16::try_from(columns).map_err(|_| "CCITT image too wide".to_string())?;
    let rows = u16::try_from(height).ok();

    // Sample values of decoded white and black runs.
    let (white, black) = if black_is_1 { (0u8, 255u8) } else { (255u8, 0u8) };

    let mut gray = Vec::with_capacity(width as usize * height as usize);
    let mut push_row = |transitions: &[u16]| {
        let mut is_black = false;
        let mut start = 0usize;
        let mut row = vec![white; width as usize];
        for &pos in transitions {
            let pos = (pos as usize).min(width as usize);
            if is_black {
                row[start.min(pos)..pos].fill(black);
            }
            is_black = !is_black;
            start = pos;
        }
        if is_black && start < width as usize {
            row[start..].fill(black);
        }
        gray.extend_from_slice(&row);
    };

    let bytes = data.iter().copied();
    let decoded = if k < 0 {
        fax::decoder::decode_g4(bytes, columns, rows, &mut push_row)
    } else {
        fax::decoder::decode_g3(bytes, &mut push_row)
    };
    if decoded.is_none() && gray.is_empty() {
        return Err("CCITT decoding failed".to_string());
    }

    log::debug!("CCITT decoded {} of {} rows (K={})", gray.len() / width as usize, height, k);
    // Truncated data leaves the remaining rows white.
    gray.resize(width as usize * height as usize, white);
    Ok(gray)
}

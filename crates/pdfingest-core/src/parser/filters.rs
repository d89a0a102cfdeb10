//! Stream filter chain
//!
//! Supported: FlateDecode, ASCIIHexDecode, ASCII85Decode, LZWDecode,
//! RunLengthDecode, with PNG and TIFF predictors. Image codecs are
//! recognised but left encoded.

use flate2::{Decompress, FlushDecompress, Status};
use thiserror::Error;

use super::object::{Dictionary, Object};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("unsupported filter /{0}")]
    Unsupported(String),

    #[error("image data ({0}) is not decoded")]
    ImageCodec(String),

    #[error("{filter} failed: {message}")]
    Corrupt { filter: String, message: String },

    /// The chain stopped early; `data` holds what was decoded before it
    #[error("{filter} stopped early: {message}")]
    Partial {
        filter: String,
        message: String,
        data: Vec<u8>,
    },
}

fn corrupt(filter: &str, message: impl Into<String>) -> FilterError {
    FilterError::Corrupt {
        filter: filter.to_string(),
        message: message.into(),
    }
}

/// Filter names paired with their decode parameters, in application order.
///
/// `resolve` maps indirect references to their targets so that `/Filter`
/// and `/DecodeParms` may be stored as separate objects.
pub(crate) fn filter_chain<'a, F>(dict: &'a Dictionary, resolve: F) -> Vec<(&'a str, Option<&'a Dictionary>)>
where
    F: Fn(&'a Object) -> &'a Object,
{
    let filters: Vec<&str> = match dict.get("Filter").map(&resolve) {
        Some(Object::Name(name)) => vec![name.as_str()],
        Some(Object::Array(items)) => items
            .iter()
            .filter_map(|item| resolve(item).as_name())
            .collect(),
        _ => Vec::new(),
    };

    let params: Vec<Option<&Dictionary>> = match dict.get("DecodeParms").map(&resolve) {
        Some(Object::Dictionary(d)) => vec![Some(d)],
        Some(Object::Array(items)) => items
            .iter()
            .map(|item| match resolve(item) {
                Object::Dictionary(d) => Some(d),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    filters
        .into_iter()
        .enumerate()
        .map(|(i, name)| (name, params.get(i).copied().flatten()))
        .collect()
}

/// Apply the filter chain to raw stream data.
///
/// A filter that stops early does not end the chain: later filters run
/// over the partial data and the result comes back as
/// [`FilterError::Partial`].
pub(crate) fn apply_filters(
    data: &[u8],
    chain: &[(&str, Option<&Dictionary>)],
) -> Result<Vec<u8>, FilterError> {
    let mut current = data.to_vec();
    let mut stopped = None;
    for (name, params) in chain {
        current = match apply_filter(name, &current, *params) {
            Ok(out) => out,
            Err(FilterError::Partial { filter, message, data }) => {
                stopped.get_or_insert((filter, message));
                data
            }
            Err(e) => return Err(e),
        };
    }
    match stopped {
        None => Ok(current),
        Some((filter, message)) => Err(FilterError::Partial {
            filter,
            message,
            data: current,
        }),
    }
}

fn apply_filter(name: &str, data: &[u8], params: Option<&Dictionary>) -> Result<Vec<u8>, FilterError> {
    match name {
        "FlateDecode" | "Fl" => match flate_decode(data) {
            Err(FilterError::Partial { filter, message, data }) => Err(FilterError::Partial {
                filter,
                message,
                data: apply_predictor(data, params)?,
            }),
            inflated => apply_predictor(inflated?, params),
        },
        "LZWDecode" | "LZW" => {
            let early_change = params
                .and_then(|p| p.get("EarlyChange"))
                .and_then(Object::as_i64)
                .unwrap_or(1)
                != 0;
            let decoded = lzw_decode(data, early_change)?;
            apply_predictor(decoded, params)
        }
        "ASCIIHexDecode" | "AHx" => ascii_hex_decode(data),
        "ASCII85Decode" | "A85" => ascii85_decode(data),
        "RunLengthDecode" | "RL" => run_length_decode(data),
        "Crypt" => {
            // Only the identity crypt filter can be honoured without keys
            match params.and_then(|p| p.get_name("Name")) {
                None | Some("Identity") => Ok(data.to_vec()),
                Some(other) => Err(FilterError::Unsupported(format!("Crypt/{}", other))),
            }
        }
        "DCTDecode" | "DCT" | "JPXDecode" | "CCITTFaxDecode" | "CCF" | "JBIG2Decode" => {
            Err(FilterError::ImageCodec(name.to_string()))
        }
        other => Err(FilterError::Unsupported(other.to_string())),
    }
}

fn flate_decode(data: &[u8]) -> Result<Vec<u8>, FilterError> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    let (out, fault) = inflate(data, true);
    let Some(fault) = fault else {
        return Ok(out);
    };
    if !out.is_empty() {
        return Err(partial("FlateDecode", fault, out));
    }

    // Some writers omit the zlib header
    match inflate(data, false) {
        (raw, None) if !raw.is_empty() => Ok(raw),
        (raw, Some(fault)) if !raw.is_empty() => Err(partial("FlateDecode", fault, raw)),
        (_, None) => Err(corrupt("FlateDecode", "no data inflated")),
        (_, Some(fault)) => Err(corrupt("FlateDecode", fault)),
    }
}

fn partial(filter: &str, message: String, data: Vec<u8>) -> FilterError {
    FilterError::Partial {
        filter: filter.to_string(),
        message,
        data,
    }
}

/// Inflate until the end-of-stream marker. The second value is set when
/// the data is damaged or ends before the marker.
fn inflate(data: &[u8], zlib_header: bool) -> (Vec<u8>, Option<String>) {
    let mut decoder = Decompress::new(zlib_header);
    let mut out = Vec::with_capacity(data.len().saturating_mul(4).max(64));

    loop {
        if out.len() == out.capacity() {
            out.reserve(out.capacity().max(4096));
        }
        let consumed = decoder.total_in() as usize;
        let produced = decoder.total_out();
        let input = data.get(consumed..).unwrap_or_default();

        match decoder.decompress_vec(input, &mut out, FlushDecompress::None) {
            Ok(Status::StreamEnd) => return (out, None),
            Ok(_) => {
                let progressed = decoder.total_in() as usize > consumed || decoder.total_out() > produced;
                if !progressed {
                    return (out, Some("data ends before the end-of-stream marker".to_string()));
                }
            }
            Err(e) => return (out, Some(e.to_string())),
        }
    }
}

fn apply_predictor(data: Vec<u8>, params: Option<&Dictionary>) -> Result<Vec<u8>, FilterError> {
    let Some(params) = params else {
        return Ok(data);
    };
    let int = |key: &str, default: i64| params.get(key).and_then(Object::as_i64).unwrap_or(default);

    let predictor = int("Predictor", 1);
    let colors = int("Colors", 1).clamp(1, 32) as usize;
    let bpc = int("BitsPerComponent", 8).clamp(1, 16) as usize;
    let columns = int("Columns", 1).clamp(1, 1 << 20) as usize;

    match predictor {
        1 => Ok(data),
        2 => Ok(tiff_unpredict(data, colors, bpc, columns)),
        10..=15 => png_unpredict(&data, colors, bpc, columns),
        other => Err(corrupt("Predictor", format!("unknown predictor {}", other))),
    }
}

fn png_unpredict(data: &[u8], colors: usize, bpc: usize, columns: usize) -> Result<Vec<u8>, FilterError> {
    let bytes_per_pixel = ((colors * bpc + 7) / 8).max(1);
    let row_len = (colors * bpc * columns + 7) / 8;
    let mut out = Vec::with_capacity(data.len());
    let mut prev = vec![0u8; row_len];

    for chunk in data.chunks(row_len + 1) {
        let filter = chunk[0];
        let mut row = chunk[1..].to_vec();

        for i in 0..row.len() {
            let left = if i >= bytes_per_pixel { row[i - bytes_per_pixel] } else { 0 };
            let up = prev[i];
            let upper_left = if i >= bytes_per_pixel { prev[i - bytes_per_pixel] } else { 0 };
            row[i] = match filter {
                0 => row[i],
                1 => row[i].wrapping_add(left),
                2 => row[i].wrapping_add(up),
                3 => row[i].wrapping_add(((u16::from(left) + u16::from(up)) / 2) as u8),
                4 => row[i].wrapping_add(paeth(left, up, upper_left)),
                other => return Err(corrupt("Predictor", format!("bad PNG row filter {}", other))),
            };
        }

        prev[..row.len()].copy_from_slice(&row);
        out.extend_from_slice(&row);
    }

    Ok(out)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = i16::from(a) + i16::from(b) - i16::from(c);
    let pa = (p - i16::from(a)).abs();
    let pb = (p - i16::from(b)).abs();
    let pc = (p - i16::from(c)).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

fn tiff_unpredict(mut data: Vec<u8>, colors: usize, bpc: usize, columns: usize) -> Vec<u8> {
    // Only byte-aligned samples are undone; other depths pass through
    if bpc != 8 {
        return data;
    }
    let row_len = colors * columns;
    for row in data.chunks_mut(row_len) {
        for i in colors..row.len() {
            row[i] = row[i].wrapping_add(row[i - colors]);
        }
    }
    data
}

fn ascii_hex_decode(data: &[u8]) -> Result<Vec<u8>, FilterError> {
    let mut out = Vec::with_capacity(data.len() / 2);
    let mut pending: Option<u8> = None;

    for &b in data {
        let value = match b {
            b'>' => break,
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            b if b.is_ascii_whitespace() || b == 0 => continue,
            other => {
                return Err(corrupt(
                    "ASCIIHexDecode",
                    format!("invalid character 0x{:02x}", other),
                ))
            }
        };
        match pending.take() {
            Some(hi) => out.push(hi << 4 | value),
            None => pending = Some(value),
        }
    }

    if let Some(hi) = pending {
        out.push(hi << 4);
    }
    Ok(out)
}

fn ascii85_decode(data: &[u8]) -> Result<Vec<u8>, FilterError> {
    let body = data.strip_prefix(b"<~").unwrap_or(data);
    let mut out = Vec::with_capacity(body.len() * 4 / 5);
    let mut acc: u64 = 0;
    let mut count = 0usize;

    for &b in body {
        match b {
            b'~' => break,
            b'z' if count == 0 => out.extend_from_slice(&[0, 0, 0, 0]),
            b'!'..=b'u' => {
                acc = acc * 85 + u64::from(b - b'!');
                count += 1;
                if count == 5 {
                    let word = u32::try_from(acc)
                        .map_err(|_| corrupt("ASCII85Decode", "group value overflows"))?;
                    out.extend_from_slice(&word.to_be_bytes());
                    acc = 0;
                    count = 0;
                }
            }
            b if b.is_ascii_whitespace() || b == 0 => {}
            other => {
                return Err(corrupt(
                    "ASCII85Decode",
                    format!("invalid character 0x{:02x}", other),
                ))
            }
        }
    }

    // Final partial group is padded with 'u'
    if count > 1 {
        for _ in count..5 {
            acc = acc * 85 + 84;
        }
        let word = u32::try_from(acc).map_err(|_| corrupt("ASCII85Decode", "final group overflows"))?;
        out.extend_from_slice(&word.to_be_bytes()[..count - 1]);
    }

    Ok(out)
}

fn lzw_decode(data: &[u8], early_change: bool) -> Result<Vec<u8>, FilterError> {
    const CLEAR: usize = 256;
    const END: usize = 257;
    const MAX_ENTRIES: usize = 4096;

    let mut table: Vec<Vec<u8>> = (0..=255u8).map(|b| vec![b]).collect();
    table.push(Vec::new());
    table.push(Vec::new());

    let mut out = Vec::new();
    let mut code_len = 9u32;
    let mut prev: Option<usize> = None;
    let mut bit_buf: u32 = 0;
    let mut bit_count = 0u32;
    let mut input = data.iter();

    loop {
        while bit_count < code_len {
            let Some(&b) = input.next() else {
                return Ok(out);
            };
            bit_buf = (bit_buf << 8) | u32::from(b);
            bit_count += 8;
        }
        let code = ((bit_buf >> (bit_count - code_len)) & ((1 << code_len) - 1)) as usize;
        bit_count -= code_len;
        bit_buf &= (1 << bit_count) - 1;

        match code {
            CLEAR => {
                table.truncate(END + 1);
                code_len = 9;
                prev = None;
                continue;
            }
            END => return Ok(out),
            _ => {}
        }

        let entry = if code < table.len() {
            table[code].clone()
        } else if code == table.len() {
            let p = prev.ok_or_else(|| corrupt("LZWDecode", "code before first entry"))?;
            let mut entry = table[p].clone();
            entry.push(table[p][0]);
            entry
        } else {
            return Err(corrupt("LZWDecode", format!("code {} out of range", code)));
        };

        if let Some(p) = prev {
            if table.len() < MAX_ENTRIES {
                let mut next = table[p].clone();
                next.push(entry[0]);
                table.push(next);
            }
        }

        out.extend_from_slice(&entry);
        prev = Some(code);

        let limit = table.len() + usize::from(early_change);
        code_len = match limit {
            0..=511 => 9,
            512..=1023 => 10,
            1024..=2047 => 11,
            _ => 12,
        };
    }
}

fn run_length_decode(data: &[u8]) -> Result<Vec<u8>, FilterError> {
    let mut out = Vec::with_capacity(data.len() * 2);
    let mut i = 0;

    while i < data.len() {
        let len = data[i] as usize;
        i += 1;
        match len {
            128 => break,
            0..=127 => {
                let end = (i + len + 1).min(data.len());
                out.extend_from_slice(&data[i..end]);
                i = end;
            }
            _ => {
                let Some(&b) = data.get(i) else {
                    return Err(corrupt("RunLengthDecode", "run without value"));
                };
                out.extend(std::iter::repeat(b).take(257 - len));
                i += 1;
            }
        }
    }

    Ok(out)
}

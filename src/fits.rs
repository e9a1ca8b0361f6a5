//! Minimal FITS image codec for 1-D float64 arrays
//!
//! Only what the loss history needs: a primary HDU followed by any number of
//! IMAGE extensions, each holding one vector. Headers are 80-character cards
//! in 2880-byte blocks, data is big-endian IEEE-754.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::{GalshapeError, Result};

const BLOCK: usize = 2880;
const CARD: usize = 80;

/// Write each slice as one HDU: the first as the primary array, the rest as
/// IMAGE extensions. Any existing file is overwritten.
pub fn write_hdus(path: &Path, arrays: &[&[f64]]) -> Result<()> {
    let mut bytes = Vec::new();

    for (index, values) in arrays.iter().enumerate() {
        let mut header = Vec::new();
        if index == 0 {
            header.push(value_card("SIMPLE", "T"));
        } else {
            header.push(string_card("XTENSION", "IMAGE"));
        }
        header.push(value_card("BITPIX", "-64"));
        header.push(value_card("NAXIS", "1"));
        header.push(value_card("NAXIS1", &values.len().to_string()));
        if index == 0 {
            header.push(value_card("EXTEND", if arrays.len() > 1 { "T" } else { "F" }));
        } else {
            header.push(value_card("PCOUNT", "0"));
            header.push(value_card("GCOUNT", "1"));
        }
        header.push(format!("{:<80}", "END"));

        for card in &header {
            bytes.extend_from_slice(card.as_bytes());
        }
        pad(&mut bytes, b' ');

        for value in values.iter() {
            bytes.extend_from_slice(&value.to_be_bytes());
        }
        pad(&mut bytes, 0);
    }

    fs::write(path, bytes)?;
    Ok(())
}

/// Read every HDU's data as a flat float vector
pub fn read_hdus(path: &Path) -> Result<Vec<Vec<f64>>> {
    let bytes = fs::read(path)?;
    if bytes.len() % BLOCK != 0 {
        return Err(GalshapeError::Fits(format!(
            "{} is {} bytes, not a whole number of blocks",
            path.display(),
            bytes.len()
        )));
    }

    let mut hdus = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let (header, header_len) = parse_header(&bytes[offset..])?;
        offset += header_len;

        let first_key = if hdus.is_empty() { "SIMPLE" } else { "XTENSION" };
        if !header.contains_key(first_key) {
            return Err(GalshapeError::Fits(format!(
                "HDU {} is missing {}",
                hdus.len(),
                first_key
            )));
        }

        let bitpix = int_keyword(&header, "BITPIX")?;
        let naxis = int_keyword(&header, "NAXIS")?;
        let mut count = 0usize;
        if naxis > 0 {
            let dims = (1..=naxis)
                .map(|axis| int_keyword(&header, &format!("NAXIS{}", axis)))
                .collect::<Result<Vec<_>>>()?;
            count = dims.iter().product::<i64>().max(0) as usize;
        }

        let width = (bitpix.unsigned_abs() / 8) as usize;
        let data_len = count * width;
        if offset + data_len > bytes.len() {
            return Err(GalshapeError::Fits(format!(
                "HDU {} data runs past end of file",
                hdus.len()
            )));
        }

        let data = &bytes[offset..offset + data_len];
        let values: Vec<f64> = match bitpix {
            -64 => data
                .chunks_exact(8)
                .map(|c| f64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
            -32 => data
                .chunks_exact(4)
                .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]) as f64)
                .collect(),
            other => {
                return Err(GalshapeError::Fits(format!(
                    "unsupported BITPIX {} in HDU {}",
                    other,
                    hdus.len()
                )))
            }
        };
        hdus.push(values);

        offset += data_len.div_ceil(BLOCK) * BLOCK;
    }

    if hdus.is_empty() {
        return Err(GalshapeError::Fits(format!("{} is empty", path.display())));
    }
    Ok(hdus)
}

fn value_card(keyword: &str, value: &str) -> String {
    format!("{:<8}= {:>20}{:<50}", keyword, value, "")
}

fn string_card(keyword: &str, value: &str) -> String {
    let quoted = format!("'{:<8}'", value);
    format!("{:<8}= {:<20}{:<50}", keyword, quoted, "")
}

fn pad(bytes: &mut Vec<u8>, fill: u8) {
    let rem = bytes.len() % BLOCK;
    if rem != 0 {
        bytes.resize(bytes.len() + BLOCK - rem, fill);
    }
}

/// Parse cards up to END; returns keywords and the padded header length
fn parse_header(bytes: &[u8]) -> Result<(HashMap<String, String>, usize)> {
    let mut header = HashMap::new();

    for (index, card) in bytes.chunks_exact(CARD).enumerate() {
        let text = std::str::from_utf8(card)
            .map_err(|_| GalshapeError::Fits("header card is not ASCII".to_string()))?;
        let keyword = text[..8].trim_end();

        if keyword == "END" {
            let used = (index + 1) * CARD;
            return Ok((header, used.div_ceil(BLOCK) * BLOCK));
        }
        if keyword.is_empty() || &text[8..10] != "= " {
            continue;
        }

        let value = text[10..].split('/').next().unwrap_or("").trim();
        let value = value.trim_matches('\'').trim_end().to_string();
        header.insert(keyword.to_string(), value);
    }

    Err(GalshapeError::Fits("header has no END card".to_string()))
}

fn int_keyword(header: &HashMap<String, String>, keyword: &str) -> Result<i64> {
    header
        .get(keyword)
        .ok_or_else(|| GalshapeError::Fits(format!("missing keyword {}", keyword)))?
        .parse::<i64>()
        .map_err(|_| GalshapeError::Fits(format!("keyword {} is not an integer", keyword)))
}

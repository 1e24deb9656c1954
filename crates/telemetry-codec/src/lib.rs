pub mod derive;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::warn;
use types::{ExtractedDps, ImportantDps, PhaseA, PvDc, RawStatusItem, RawValue, Sample};

pub const REVERSE_ENERGY_CODE: &str = "reverse_energy_total";
pub const TEMP_CODE: &str = "temp_current";
pub const AC_POWER_CODE: &str = "ac_power";
pub const PHASE_A_CODE: &str = "phase_a";
pub const PV1_DC_CODE: &str = "pv1_dc_data";

const REVERSE_ENERGY_DIVISOR: f64 = 100.0;
const AC_POWER_DIVISOR: f64 = 10.0;
const COMPOSITE_DIVISOR: f64 = 10.0;

// Padding is optional in payloads seen from the cloud API.
const DPS_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("decoded length {0} is not a whole number of u16 words")]
    OddLength(usize),
    #[error("{kind} carries {actual} words, at least {expected} required")]
    TooShort {
        kind: CompositeKind,
        expected: usize,
        actual: usize,
    },
    #[error("composite value is not a base64 string")]
    NotText,
}

/// Composite DPS fields and the minimum number of words each must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeKind {
    PhaseA,
    Pv1Dc,
}

impl CompositeKind {
    pub fn min_words(&self) -> usize {
        match self {
            CompositeKind::PhaseA => 2,
            CompositeKind::Pv1Dc => 3,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CompositeKind::PhaseA => PHASE_A_CODE,
            CompositeKind::Pv1Dc => PV1_DC_CODE,
        }
    }
}

impl std::fmt::Display for CompositeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Base64-decodes `value` and unpacks it as big-endian u16 words.
pub fn decode_composite(value: &str) -> Result<Vec<u16>, DecodeError> {
    let bytes = DPS_BASE64.decode(value.trim())?;
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddLength(bytes.len()));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

/// Decodes a composite field and enforces the minimum word count for its kind.
pub fn decode_kind(value: &RawValue, kind: CompositeKind) -> Result<Vec<u16>, DecodeError> {
    let text = match value {
        RawValue::Text(text) => text,
        _ => return Err(DecodeError::NotText),
    };
    let words = decode_composite(text)?;
    if words.len() < kind.min_words() {
        return Err(DecodeError::TooShort {
            kind,
            expected: kind.min_words(),
            actual: words.len(),
        });
    }
    Ok(words)
}

/// Builds a sample from a raw status list. Malformed fields become unavailable;
/// derived quantities are left to [`derive::apply`].
pub fn decode_status(items: &[RawStatusItem], timestamp: NaiveDateTime) -> Sample {
    let important = ImportantDps {
        reverse_energy_kwh: scalar(items, REVERSE_ENERGY_CODE).map(|v| v / REVERSE_ENERGY_DIVISOR),
        temp_c: scalar(items, TEMP_CODE),
        ac_power_w: scalar(items, AC_POWER_CODE).map(|v| v / AC_POWER_DIVISOR),
    };

    let phase_a = match composite(items, CompositeKind::PhaseA) {
        Some(words) => PhaseA {
            ac_voltage: Some(scale(words[0])),
            frequency: words.last().map(|w| scale(*w)),
            ac_current: None,
        },
        None => PhaseA::default(),
    };

    let pv1_dc = match composite(items, CompositeKind::Pv1Dc) {
        Some(words) => PvDc {
            dc_voltage: Some(scale(words[0])),
            dc_current: Some(scale(words[1])),
            dc_power: Some(scale(words[2])),
        },
        None => PvDc::default(),
    };

    Sample {
        timestamp,
        important,
        extracted: ExtractedDps { phase_a, pv1_dc },
    }
}

fn find<'a>(items: &'a [RawStatusItem], code: &str) -> Option<&'a RawValue> {
    items.iter().find(|item| item.code == code).map(|item| &item.value)
}

fn scalar(items: &[RawStatusItem], code: &str) -> Option<f64> {
    match find(items, code)? {
        RawValue::Number(value) if value.is_finite() => Some(*value),
        RawValue::Text(text) => match text.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => Some(value),
            _ => {
                warn!(code, value = %text, "scalar dps is not numeric");
                None
            }
        },
        other => {
            warn!(code, value = ?other, "scalar dps has unexpected type");
            None
        }
    }
}

fn composite(items: &[RawStatusItem], kind: CompositeKind) -> Option<Vec<u16>> {
    let value = find(items, kind.code())?;
    match decode_kind(value, kind) {
        Ok(words) => Some(words),
        Err(err) => {
            warn!(code = kind.code(), error = %err, "composite dps rejected");
            None
        }
    }
}

fn scale(word: u16) -> f64 {
    f64::from(word) / COMPOSITE_DIVISOR
}

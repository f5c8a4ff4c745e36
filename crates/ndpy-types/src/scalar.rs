//! Reading and writing individual scalar values.
//!
//! [`Scalar`] is the runtime's boxed form of a single value. It is the
//! common currency of the generic assignment path: a source element is read
//! into a `Scalar` and written back out in the destination's encoding, with
//! range and precision checks governed by [`AssignErrorMode`].

use std::fmt;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use half::f16;
use num_complex::Complex64;

use crate::arrmeta::ArrMeta;
use crate::error::{NdError, NdResult};
use crate::memblock::DataPtr;
use crate::missing;
use crate::parse::parse_type;
use crate::types::{FloatWidth, IntWidth, RuntimeType, StringEncoding, TypeKind, TICKS_PER_SECOND};

/// How strictly value assignments are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum AssignErrorMode {
    /// Truncate and wrap silently
    Nocheck,
    /// Reject values outside the destination's range
    Overflow,
    /// Also reject dropped fractional parts
    #[default]
    Fractional,
    /// Also reject any loss of precision
    Inexact,
}

/// A single boxed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Missing,
    Bool(bool),
    Int(i128),
    /// Unsigned values that may exceed `i128::MAX`
    UInt(u128),
    Float(f64),
    Complex(Complex64),
    Bytes(Vec<u8>),
    String(String),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Type(RuntimeType),
}

impl Scalar {
    /// Short name of the value's kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Scalar::Missing => "missing",
            Scalar::Bool(_) => "bool",
            Scalar::Int(_) | Scalar::UInt(_) => "int",
            Scalar::Float(_) => "float",
            Scalar::Complex(_) => "complex",
            Scalar::Bytes(_) => "bytes",
            Scalar::String(_) => "string",
            Scalar::Date(_) => "date",
            Scalar::Time(_) => "time",
            Scalar::DateTime(_) => "datetime",
            Scalar::Type(_) => "type",
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Missing => write!(f, "NA"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::UInt(u) => write!(f, "{u}"),
            Scalar::Float(x) => write!(f, "{x}"),
            Scalar::Complex(c) => write!(f, "({}{:+}j)", c.re, c.im),
            Scalar::Bytes(b) => write!(f, "{}", b.escape_ascii()),
            Scalar::String(s) => write!(f, "{s:?}"),
            Scalar::Date(d) => write!(f, "{d}"),
            Scalar::Time(t) => write!(f, "{t}"),
            Scalar::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.f")),
            Scalar::Type(t) => write!(f, "{t}"),
        }
    }
}

// ============================================================================
// Date and time encodings
// ============================================================================

fn epoch_date() -> NaiveDate {
    NaiveDate::default()
}

fn epoch_datetime() -> NaiveDateTime {
    NaiveDateTime::default()
}

/// Days since 1970-01-01.
pub fn date_to_days(date: NaiveDate) -> NdResult<i32> {
    let days = date.signed_duration_since(epoch_date()).num_days();
    i32::try_from(days).map_err(|_| NdError::overflow(date, "date"))
}

pub fn days_to_date(days: i32) -> NdResult<NaiveDate> {
    epoch_date()
        .checked_add_signed(Duration::days(days as i64))
        .ok_or_else(|| NdError::invalid_value("date", format!("{days} days is out of range")))
}

/// Ticks since midnight. Sub-tick precision is an error unless unchecked.
pub fn time_to_ticks(time: NaiveTime, mode: AssignErrorMode) -> NdResult<i64> {
    let nanos = time.nanosecond() as i64;
    if nanos % 100 != 0 && mode != AssignErrorMode::Nocheck {
        return Err(NdError::inexact(time, "time"));
    }
    Ok(time.num_seconds_from_midnight() as i64 * TICKS_PER_SECOND + nanos / 100)
}

pub fn ticks_to_time(ticks: i64) -> NdResult<NaiveTime> {
    let secs = ticks.div_euclid(TICKS_PER_SECOND);
    let nanos = ticks.rem_euclid(TICKS_PER_SECOND) * 100;
    u32::try_from(secs)
        .ok()
        .and_then(|s| NaiveTime::from_num_seconds_from_midnight_opt(s, nanos as u32))
        .ok_or_else(|| NdError::invalid_value("time", format!("{ticks} ticks is out of range")))
}

/// Ticks since the epoch.
pub fn datetime_to_ticks(dt: NaiveDateTime, mode: AssignErrorMode) -> NdResult<i64> {
    let delta = dt.signed_duration_since(epoch_datetime());
    let secs = delta.num_seconds();
    let sub_nanos = (delta - Duration::seconds(secs)).num_nanoseconds().unwrap_or(0);
    if sub_nanos % 100 != 0 && mode != AssignErrorMode::Nocheck {
        return Err(NdError::inexact(dt, "datetime"));
    }
    secs.checked_mul(TICKS_PER_SECOND)
        .and_then(|t| t.checked_add(sub_nanos / 100))
        .ok_or_else(|| NdError::overflow(dt, "datetime"))
}

pub fn ticks_to_datetime(ticks: i64) -> NdResult<NaiveDateTime> {
    let secs = ticks.div_euclid(TICKS_PER_SECOND);
    let nanos = ticks.rem_euclid(TICKS_PER_SECOND) * 100;
    epoch_datetime()
        .checked_add_signed(Duration::seconds(secs) + Duration::nanoseconds(nanos))
        .ok_or_else(|| NdError::invalid_value("datetime", format!("{ticks} ticks is out of range")))
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .or_else(|| parse_date(s).map(|d| d.and_time(NaiveTime::default())))
}

// ============================================================================
// Reading
// ============================================================================

fn read_int(ptr: &DataPtr, width: IntWidth, signed: bool) -> Scalar {
    let n = width.bytes();
    let raw = ptr.read(n);
    let negative = signed && raw[n - 1] & 0x80 != 0;
    let mut wide = if negative { [0xffu8; 16] } else { [0u8; 16] };
    wide[..n].copy_from_slice(&raw);
    if signed {
        Scalar::Int(i128::from_le_bytes(wide))
    } else {
        Scalar::UInt(u128::from_le_bytes(wide))
    }
}

fn read_float(ptr: &DataPtr, width: FloatWidth) -> f64 {
    match width {
        FloatWidth::F16 => f16::from_le_bytes(ptr.read_array()).to_f64(),
        FloatWidth::F32 => f32::from_le_bytes(ptr.read_array()) as f64,
        FloatWidth::F64 => f64::from_le_bytes(ptr.read_array()),
    }
}

fn read_span_bytes(meta: &ArrMeta, ptr: &DataPtr, tp: &RuntimeType) -> NdResult<Vec<u8>> {
    let span = ptr.read_span();
    if span.is_null() {
        return Ok(Vec::new());
    }
    let block = meta
        .blockref()
        .ok_or_else(|| NdError::invariant(format!("{tp} metadata has no data block")))?;
    Ok(block.read(span.begin as usize, span.len()))
}

fn decode_utf8(bytes: Vec<u8>, tp: &RuntimeType) -> NdResult<String> {
    String::from_utf8(bytes).map_err(|e| NdError::invalid_value(tp, format!("invalid utf-8: {e}")))
}

/// Read the scalar stored at `ptr`.
pub fn read_scalar(tp: &RuntimeType, meta: &ArrMeta, ptr: &DataPtr) -> NdResult<Scalar> {
    Ok(match tp.kind() {
        TypeKind::Void => Scalar::Missing,
        TypeKind::Bool => Scalar::Bool(ptr.read_array::<1>()[0] != 0),
        TypeKind::Int { width, signed } => read_int(ptr, *width, *signed),
        TypeKind::Float(w) => Scalar::Float(read_float(ptr, *w)),
        TypeKind::Complex(w) => {
            let re = read_float(ptr, *w);
            let im = read_float(&ptr.offset_by(w.bytes() as isize), *w);
            Scalar::Complex(Complex64::new(re, im))
        }
        TypeKind::Bytes { fixed: Some(n) } => Scalar::Bytes(ptr.read(*n)),
        TypeKind::Bytes { fixed: None } => Scalar::Bytes(read_span_bytes(meta, ptr, tp)?),
        TypeKind::String { fixed: Some(n), .. } => {
            let mut bytes = ptr.read(*n);
            let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
            bytes.truncate(end);
            Scalar::String(decode_utf8(bytes, tp)?)
        }
        TypeKind::String { fixed: None, .. } => Scalar::String(decode_utf8(read_span_bytes(meta, ptr, tp)?, tp)?),
        TypeKind::Date => Scalar::Date(days_to_date(i32::from_le_bytes(ptr.read_array()))?),
        TypeKind::Time => Scalar::Time(ticks_to_time(i64::from_le_bytes(ptr.read_array()))?),
        TypeKind::DateTime => Scalar::DateTime(ticks_to_datetime(i64::from_le_bytes(ptr.read_array()))?),
        TypeKind::Type => {
            let pool = meta
                .type_pool()
                .ok_or_else(|| NdError::invariant("type metadata has no type pool"))?;
            Scalar::Type(pool.get(ptr.read_u64()).unwrap_or_else(RuntimeType::void))
        }
        TypeKind::Option(value_tp) => {
            if missing::is_na(value_tp, ptr)? {
                Scalar::Missing
            } else {
                read_scalar(value_tp, meta.value_meta(), ptr)?
            }
        }
        TypeKind::Categorical(categories) => {
            let index = match read_int(ptr, categories.index_width(), false) {
                Scalar::UInt(u) => u as usize,
                _ => usize::MAX,
            };
            categories
                .get(index)
                .cloned()
                .ok_or_else(|| NdError::invalid_value(tp, format!("category index {index} is out of range")))?
        }
        TypeKind::FixedDim { .. }
        | TypeKind::VarDim { .. }
        | TypeKind::Tuple(_)
        | TypeKind::Struct(_)
        | TypeKind::Any => {
            return Err(NdError::not_assignable(tp, "scalar"));
        }
    })
}

// ============================================================================
// Writing
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Wide {
    Signed(i128),
    Unsigned(u128),
}

fn int_bounds(width: IntWidth, signed: bool) -> (i128, u128) {
    let bits = width.bits();
    match (signed, bits) {
        (true, 128) => (i128::MIN, i128::MAX as u128),
        (true, b) => (-(1i128 << (b - 1)), (1u128 << (b - 1)) - 1),
        (false, 128) => (0, u128::MAX),
        (false, b) => (0, (1u128 << b) - 1),
    }
}

fn in_range(value: Wide, width: IntWidth, signed: bool) -> bool {
    let (min, max) = int_bounds(width, signed);
    match value {
        Wide::Signed(v) => v >= min && (v < 0 || v as u128 <= max),
        Wide::Unsigned(u) => u <= max,
    }
}

fn float_to_wide(x: f64, tp: &RuntimeType, mode: AssignErrorMode) -> NdResult<Wide> {
    if !x.is_finite() {
        if mode == AssignErrorMode::Nocheck {
            return Ok(Wide::Signed(0));
        }
        return Err(NdError::overflow(x, tp));
    }
    if x.fract() != 0.0 && mode >= AssignErrorMode::Fractional {
        return Err(NdError::fractional(x, tp));
    }
    let x = x.trunc();
    if x >= 170141183460469231731687303715884105728.0 {
        Ok(Wide::Unsigned(x as u128))
    } else {
        Ok(Wide::Signed(x as i128))
    }
}

fn to_wide(value: &Scalar, tp: &RuntimeType, mode: AssignErrorMode) -> NdResult<Wide> {
    match value {
        Scalar::Bool(b) => Ok(Wide::Signed(*b as i128)),
        Scalar::Int(i) => Ok(Wide::Signed(*i)),
        Scalar::UInt(u) => Ok(Wide::Unsigned(*u)),
        Scalar::Float(x) => float_to_wide(*x, tp, mode),
        Scalar::Complex(c) => {
            if c.im != 0.0 && mode != AssignErrorMode::Nocheck {
                return Err(NdError::invalid_value(tp, format!("{value} has a nonzero imaginary part")));
            }
            float_to_wide(c.re, tp, mode)
        }
        Scalar::String(s) => {
            let s = s.trim();
            s.parse::<i128>()
                .map(Wide::Signed)
                .or_else(|_| s.parse::<u128>().map(Wide::Unsigned))
                .map_err(|_| NdError::invalid_value(tp, format!("cannot parse {s:?} as an integer")))
        }
        _ => Err(NdError::not_assignable(value.kind_name(), tp)),
    }
}

fn write_int(ptr: &DataPtr, width: IntWidth, value: Wide) {
    let bytes = match value {
        Wide::Signed(v) => v.to_le_bytes(),
        Wide::Unsigned(u) => u.to_le_bytes(),
    };
    ptr.write(&bytes[..width.bytes()]);
}

fn to_f64(value: &Scalar, tp: &RuntimeType, mode: AssignErrorMode) -> NdResult<f64> {
    match value {
        Scalar::Bool(b) => Ok(*b as u8 as f64),
        Scalar::Int(i) => {
            let x = *i as f64;
            if mode == AssignErrorMode::Inexact && x as i128 != *i {
                return Err(NdError::inexact(i, tp));
            }
            Ok(x)
        }
        Scalar::UInt(u) => {
            let x = *u as f64;
            if mode == AssignErrorMode::Inexact && x as u128 != *u {
                return Err(NdError::inexact(u, tp));
            }
            Ok(x)
        }
        Scalar::Float(x) => Ok(*x),
        Scalar::Complex(c) => {
            if c.im != 0.0 && mode != AssignErrorMode::Nocheck {
                return Err(NdError::invalid_value(tp, format!("{value} has a nonzero imaginary part")));
            }
            Ok(c.re)
        }
        Scalar::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| NdError::invalid_value(tp, format!("cannot parse {s:?} as a float"))),
        _ => Err(NdError::not_assignable(value.kind_name(), tp)),
    }
}

fn write_float(ptr: &DataPtr, width: FloatWidth, x: f64, tp: &RuntimeType, mode: AssignErrorMode) -> NdResult<()> {
    match width {
        FloatWidth::F64 => ptr.write(&x.to_le_bytes()),
        FloatWidth::F32 => {
            let y = x as f32;
            check_narrowed(x, y as f64, tp, mode)?;
            ptr.write(&y.to_le_bytes());
        }
        FloatWidth::F16 => {
            let y = f16::from_f64(x);
            check_narrowed(x, y.to_f64(), tp, mode)?;
            ptr.write(&y.to_le_bytes());
        }
    }
    Ok(())
}

fn check_narrowed(x: f64, y: f64, tp: &RuntimeType, mode: AssignErrorMode) -> NdResult<()> {
    if mode >= AssignErrorMode::Overflow && x.is_finite() && y.is_infinite() {
        return Err(NdError::overflow(x, tp));
    }
    if mode == AssignErrorMode::Inexact && !x.is_nan() && x != y {
        return Err(NdError::inexact(x, tp));
    }
    Ok(())
}

fn write_span_bytes(meta: &ArrMeta, ptr: &DataPtr, bytes: &[u8], tp: &RuntimeType) -> NdResult<()> {
    let block = meta
        .blockref()
        .ok_or_else(|| NdError::invariant(format!("{tp} metadata has no data block")))?;
    let span = block.allocate(bytes.len(), 1);
    block.write(span.begin as usize, bytes);
    ptr.write_span(span);
    Ok(())
}

fn write_fixed_bytes(ptr: &DataPtr, bytes: &[u8], len: usize, tp: &RuntimeType) -> NdResult<()> {
    if bytes.len() > len {
        return Err(NdError::invalid_value(
            tp,
            format!("{} bytes do not fit in {len}", bytes.len()),
        ));
    }
    ptr.write(bytes);
    ptr.block().fill_zero(ptr.offset() + bytes.len(), len - bytes.len());
    Ok(())
}

fn text_of(value: &Scalar, tp: &RuntimeType) -> NdResult<String> {
    match value {
        Scalar::String(s) => Ok(s.clone()),
        Scalar::Bool(_)
        | Scalar::Int(_)
        | Scalar::UInt(_)
        | Scalar::Float(_)
        | Scalar::Date(_)
        | Scalar::Time(_)
        | Scalar::DateTime(_)
        | Scalar::Type(_) => Ok(value.to_string()),
        _ => Err(NdError::not_assignable(value.kind_name(), tp)),
    }
}

/// Write `value` at `ptr` in the encoding of `tp`.
pub fn write_scalar(
    tp: &RuntimeType,
    meta: &ArrMeta,
    ptr: &DataPtr,
    value: &Scalar,
    mode: AssignErrorMode,
) -> NdResult<()> {
    if let TypeKind::Option(value_tp) = tp.kind() {
        return match value {
            Scalar::Missing => missing::assign_na(value_tp, ptr),
            _ => write_scalar(value_tp, meta.value_meta(), ptr, value, mode),
        };
    }
    if matches!(value, Scalar::Missing) && !matches!(tp.kind(), TypeKind::Void) {
        return Err(NdError::not_assignable("missing value", tp));
    }

    match tp.kind() {
        TypeKind::Void => {}
        TypeKind::Bool => {
            let b = match value {
                Scalar::Bool(b) => *b,
                Scalar::String(s) => match s.trim() {
                    "true" | "True" | "1" => true,
                    "false" | "False" | "0" => false,
                    other => return Err(NdError::invalid_value(tp, format!("cannot parse {other:?} as a bool"))),
                },
                _ => match to_wide(value, tp, mode)? {
                    Wide::Signed(0) | Wide::Unsigned(0) => false,
                    Wide::Signed(1) | Wide::Unsigned(1) => true,
                    _ if mode == AssignErrorMode::Nocheck => true,
                    _ => return Err(NdError::overflow(value, tp)),
                },
            };
            ptr.write(&[b as u8]);
        }
        TypeKind::Int { width, signed } => {
            let wide = to_wide(value, tp, mode)?;
            if mode != AssignErrorMode::Nocheck && !in_range(wide, *width, *signed) {
                return Err(NdError::overflow(value, tp));
            }
            write_int(ptr, *width, wide);
        }
        TypeKind::Float(w) => {
            let x = to_f64(value, tp, mode)?;
            write_float(ptr, *w, x, tp, mode)?;
        }
        TypeKind::Complex(w) => {
            let c = match value {
                Scalar::Complex(c) => *c,
                _ => Complex64::new(to_f64(value, tp, mode)?, 0.0),
            };
            write_float(ptr, *w, c.re, tp, mode)?;
            write_float(&ptr.offset_by(w.bytes() as isize), *w, c.im, tp, mode)?;
        }
        TypeKind::Bytes { fixed } => {
            let bytes = match value {
                Scalar::Bytes(b) => b,
                _ => return Err(NdError::not_assignable(value.kind_name(), tp)),
            };
            match fixed {
                Some(n) => write_fixed_bytes(ptr, bytes, *n, tp)?,
                None => write_span_bytes(meta, ptr, bytes, tp)?,
            }
        }
        TypeKind::String { encoding, fixed } => {
            let text = text_of(value, tp)?;
            if *encoding == StringEncoding::Ascii && !text.is_ascii() {
                return Err(NdError::invalid_value(tp, format!("{text:?} is not ascii")));
            }
            match fixed {
                Some(n) => write_fixed_bytes(ptr, text.as_bytes(), *n, tp)?,
                None => write_span_bytes(meta, ptr, text.as_bytes(), tp)?,
            }
        }
        TypeKind::Date => {
            let date = match value {
                Scalar::Date(d) => *d,
                Scalar::DateTime(dt) if dt.time() == NaiveTime::default() => dt.date(),
                Scalar::DateTime(dt) => {
                    return Err(NdError::invalid_value(tp, format!("{dt} has a nonzero time part")));
                }
                Scalar::String(s) => parse_date(s)
                    .ok_or_else(|| NdError::invalid_value(tp, format!("cannot parse {s:?} as a date")))?,
                _ => return Err(NdError::not_assignable(value.kind_name(), tp)),
            };
            ptr.write(&date_to_days(date)?.to_le_bytes());
        }
        TypeKind::Time => {
            let time = match value {
                Scalar::Time(t) => *t,
                Scalar::String(s) => parse_time(s)
                    .ok_or_else(|| NdError::invalid_value(tp, format!("cannot parse {s:?} as a time")))?,
                _ => return Err(NdError::not_assignable(value.kind_name(), tp)),
            };
            ptr.write(&time_to_ticks(time, mode)?.to_le_bytes());
        }
        TypeKind::DateTime => {
            let dt = match value {
                Scalar::DateTime(dt) => *dt,
                Scalar::Date(d) => d.and_time(NaiveTime::default()),
                Scalar::String(s) => parse_datetime(s)
                    .ok_or_else(|| NdError::invalid_value(tp, format!("cannot parse {s:?} as a datetime")))?,
                _ => return Err(NdError::not_assignable(value.kind_name(), tp)),
            };
            ptr.write(&datetime_to_ticks(dt, mode)?.to_le_bytes());
        }
        TypeKind::Type => {
            let stored = match value {
                Scalar::Type(t) => t.clone(),
                Scalar::String(s) => parse_type(s)?,
                _ => return Err(NdError::not_assignable(value.kind_name(), tp)),
            };
            let pool = meta
                .type_pool()
                .ok_or_else(|| NdError::invariant("type metadata has no type pool"))?;
            ptr.write_u64(pool.store(stored));
        }
        TypeKind::Categorical(categories) => {
            let index = categories.index_of(value, mode)?;
            write_int(ptr, categories.index_width(), Wide::Unsigned(index as u128));
        }
        TypeKind::Option(_) => {
            return Err(NdError::invariant(format!("option type {tp} reached the value writer")));
        }
        TypeKind::FixedDim { .. }
        | TypeKind::VarDim { .. }
        | TypeKind::Tuple(_)
        | TypeKind::Struct(_)
        | TypeKind::Any => {
            return Err(NdError::not_assignable(value.kind_name(), tp));
        }
    }
    Ok(())
}

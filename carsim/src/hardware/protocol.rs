//! Line based wire protocol of the vehicle controller.
//!
//! Host → device: the numeric action (`0`, `1`, `2`) or the reset token, terminated by a newline.
//! Device → host: `r1,...,rN,score,done` with N normalized sensor readings, the step score
//! and a terminal flag (`0`/`1`/`true`/`false`).

use ql::prelude::{Action, QlError};

use crate::sensor::Observation;

pub const FIELD_SEPARATOR: char = ',';

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub observation: Observation,
    pub score: f32,
    pub done: bool,
}

pub fn encode_action<A: Action>(action: A) -> String { format!("{}\n", action.numeric()) }

pub fn encode_token(token: &str) -> String { format!("{}\n", token) }

/// Parses one reply line carrying `observation_len` readings
pub fn parse_reply(
    line: &str,
    observation_len: usize,
) -> Result<Reply, QlError> {
    let fields = line.trim().split(FIELD_SEPARATOR).map(str::trim).collect::<Vec<_>>();
    if fields.len() != observation_len + 2 {
        return Err(QlError::protocol(format!(
            "expected {} fields, got {} in '{}'",
            observation_len + 2,
            fields.len(),
            line.trim()
        )));
    }

    let readings = fields[..observation_len]
        .iter()
        .map(|f| parse_reading(f))
        .collect::<Result<Vec<_>, _>>()?;
    let observation = Observation::new(readings).map_err(|e| QlError::protocol(e.to_string()))?;
    let score = parse_float(fields[observation_len])?;
    let done = parse_flag(fields[observation_len + 1])?;

    Ok(Reply {
        observation,
        score,
        done,
    })
}

fn parse_float(field: &str) -> Result<f32, QlError> {
    match field.parse::<f32>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(QlError::protocol(format!("invalid number '{}'", field))),
    }
}

fn parse_reading(field: &str) -> Result<f32, QlError> {
    let v = parse_float(field)?;
    if !(0.0..=1.0).contains(&v) {
        return Err(QlError::protocol(format!("sensor reading {} out of range [0, 1]", v)));
    }
    Ok(v)
}

fn parse_flag(field: &str) -> Result<bool, QlError> {
    match field {
        "0" | "false" => Ok(false),
        "1" | "true" => Ok(true),
        _ => Err(QlError::protocol(format!("invalid terminal flag '{}'", field))),
    }
}

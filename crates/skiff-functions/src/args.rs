//! Typed accessors over rendered argument maps

use crate::error::{FuncError, Result};
use skiff_crd::{Value, ValueMap};
use std::time::Duration;

/// Optional duration: an integer number of seconds, or a string such as
/// `"30"`, `"30s"`, `"5m"` or `"2h"`
pub fn opt_arg_duration(args: &ValueMap, name: &str) -> Result<Option<Duration>> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Integer(i)) if *i >= 0 => Ok(Some(Duration::from_secs(*i as u64))),
        Some(Value::Float(f)) if *f >= 0.0 => Ok(Some(Duration::from_secs_f64(*f))),
        Some(Value::String(s)) => parse_duration(s).map(Some).ok_or_else(|| {
            FuncError::InvalidArgument {
                arg: name.to_string(),
                message: format!("cannot parse duration '{}'", s),
            }
        }),
        Some(other) => Err(wrong_type(name, "duration", other)),
    }
}

fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let (number, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(split) => raw.split_at(split),
        None => (raw, "s"),
    };
    let n: u64 = number.parse().ok()?;
    let secs = match unit {
        "ms" => return Some(Duration::from_millis(n)),
        "s" => n,
        "m" => n.checked_mul(60)?,
        "h" => n.checked_mul(3600)?,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

fn wrong_type(name: &str, expected: &str, got: &Value) -> FuncError {
    FuncError::InvalidArgument {
        arg: name.to_string(),
        message: format!("expected {}, got {}", expected, got.type_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ValueMap {
        let mut args = ValueMap::new();
        args.insert("bucket".to_string(), Value::from("backups"));
        args.insert("count".to_string(), Value::Integer(3));
        args.insert("wait".to_string(), Value::from("5m"));
        args
    }

    #[test]
    fn test_opt_arg_duration() {
        let args = args();
        assert_eq!(opt_arg_duration(&args, "wait").unwrap(), Some(Duration::from_secs(300)));
        assert_eq!(opt_arg_duration(&args, "count").unwrap(), Some(Duration::from_secs(3)));
        assert_eq!(opt_arg_duration(&args, "missing").unwrap(), None);
        assert!(opt_arg_duration(&args, "bucket").is_err());
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("2d"), None);
        assert_eq!(parse_duration(""), None);
    }
}

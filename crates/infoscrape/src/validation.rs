//! Validation logic for metric and label names derived from INFO field names.

const fn is_valid_start_char(ch: u8, allow_colon: bool) -> bool {
    ch == b'_' || ch.is_ascii_alphabetic() || (allow_colon && ch == b':')
}

const fn is_valid_char(ch: u8, allow_colon: bool) -> bool {
    is_valid_start_char(ch, allow_colon) || ch.is_ascii_digit()
}

fn validate_name(name: &str, allow_colon: bool) -> Result<(), &'static str> {
    let mut bytes = name.bytes();
    let Some(first) = bytes.next() else {
        return Err("name cannot be empty");
    };
    if !is_valid_start_char(first, allow_colon) {
        return Err("name starts with a disallowed char");
    }
    if bytes.all(|ch| is_valid_char(ch, allow_colon)) {
        Ok(())
    } else {
        Err("name contains a disallowed char")
    }
}

/// Checks that `name` matches `[a-zA-Z_:][a-zA-Z0-9_:]*`.
///
/// # Errors
///
/// Returns a human-readable description of the problem.
pub fn validate_metric_name(name: &str) -> Result<(), &'static str> {
    validate_name(name, true)
}

/// Checks that `name` matches `[a-zA-Z_][a-zA-Z0-9_]*` and does not start with `__`,
/// which is reserved for labels internal to Prometheus (e.g., `__name__`).
///
/// # Errors
///
/// Returns a human-readable description of the problem.
pub fn validate_label_name(name: &str) -> Result<(), &'static str> {
    validate_name(name, false)?;
    if name.starts_with("__") {
        return Err("names starting with `__` are reserved");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validating_names() {
        let valid_names = ["test", "_private", "snake_case", "l33t_c0d3", "Upper"];
        for name in valid_names {
            validate_metric_name(name).unwrap();
            validate_label_name(name).unwrap();
        }

        validate_metric_name("redis:info").unwrap();
        validate_label_name("redis:info").unwrap_err();

        for name in ["", "нет", "t!st", "1est", "used-memory", "a b"] {
            validate_metric_name(name).unwrap_err();
            validate_label_name(name).unwrap_err();
        }
    }

    #[test]
    fn reserved_label_names() {
        for name in ["__name__", "__", "__meta_redis"] {
            assert_eq!(
                validate_label_name(name),
                Err("names starting with `__` are reserved")
            );
            validate_metric_name(name).unwrap();
        }
    }
}

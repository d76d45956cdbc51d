//! Pre-parse template rendering.
//!
//! The environment description is treated as template input before YAML
//! parsing: `${VAR}` references are substituted from an explicit variable
//! map supplied by the caller (typically the process environment). There is
//! no ambient lookup; what the template may see is exactly what the caller
//! passes in. `$$` escapes a literal dollar sign.

use std::collections::BTreeMap;

use crate::error::{LoaderError, Result};

/// Substitutes `${VAR}` references in the document text.
pub fn render(text: &str, vars: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                out.push('$');
            }
            Some('{') => {
                chars.next();
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => return Err(LoaderError::UnterminatedVariable(name)),
                    }
                }
                let value = vars
                    .get(&name)
                    .ok_or_else(|| LoaderError::UndefinedVariable(name.clone()))?;
                out.push_str(value);
            }
            _ => out.push('$'),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_substitution() {
        let rendered = render("ip: ${HOST_IP}", &vars(&[("HOST_IP", "10.0.0.1")])).unwrap();
        assert_eq!(rendered, "ip: 10.0.0.1");
    }

    #[test]
    fn test_escape() {
        let rendered = render("cost: $$5", &vars(&[])).unwrap();
        assert_eq!(rendered, "cost: $5");
    }

    #[test]
    fn test_plain_dollar_passes_through() {
        let rendered = render("a $ b", &vars(&[])).unwrap();
        assert_eq!(rendered, "a $ b");
    }

    #[test]
    fn test_undefined_variable() {
        let err = render("${MISSING}", &vars(&[])).unwrap_err();
        assert!(matches!(err, LoaderError::UndefinedVariable(_)));
    }

    #[test]
    fn test_unterminated_reference() {
        let err = render("${OOPS", &vars(&[])).unwrap_err();
        assert!(matches!(err, LoaderError::UnterminatedVariable(_)));
    }
}
